use crate::error::{Result, WaError};
use crate::raster::{ensure_parent, GeoTransform, Grid, RasterAdapter};
use ndarray::Array2;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

/// GeoKey directory for a WGS84 geographic raster with area pixels.
const WGS84_GEOKEYS: [u16; 16] = [
    1, 1, 0, 3, // header: version, revision, minor, key count
    1024, 0, 1, 2, // GTModelType = geographic
    1025, 0, 1, 1, // GTRasterType = pixel is area
    2048, 0, 1, 4326, // GeographicType = WGS84
];

/// Single-band GeoTIFF files read and written with the `tiff` crate.
///
/// Georeferencing comes from the ModelPixelScale and ModelTiepoint tags; the
/// no-data value from the GDAL_NODATA tag.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoTiffAdapter;

fn to_f64(result: DecodingResult) -> Vec<f64> {
    match result {
        DecodingResult::U8(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U64(buf) => buf.into_iter().map(|v| v as f64).collect(),
        DecodingResult::I8(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I16(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I64(buf) => buf.into_iter().map(|v| v as f64).collect(),
        DecodingResult::F32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::F64(buf) => buf,
    }
}

impl RasterAdapter for GeoTiffAdapter {
    fn open(&self, path: &Path) -> Result<Grid> {
        let file = File::open(path)?;
        let mut decoder = Decoder::new(BufReader::new(file))?;
        let (width, height) = decoder.dimensions()?;

        let scale = decoder
            .find_tag(Tag::ModelPixelScaleTag)?
            .map(|v| v.into_f64_vec())
            .transpose()?;
        let tiepoint = decoder
            .find_tag(Tag::ModelTiepointTag)?
            .map(|v| v.into_f64_vec())
            .transpose()?;
        let (scale, tiepoint) = match (scale, tiepoint) {
            (Some(s), Some(t)) if s.len() >= 2 && t.len() >= 6 => (s, t),
            _ => {
                return Err(WaError::Raster(format!(
                    "{} has no ModelPixelScale/ModelTiepoint georeferencing",
                    path.display()
                )))
            }
        };
        let transform = GeoTransform {
            origin_x: tiepoint[3] - tiepoint[0] * scale[0],
            origin_y: tiepoint[4] + tiepoint[1] * scale[1],
            pixel_width: scale[0],
            pixel_height: scale[1],
        };

        let nodata = match decoder.find_tag(Tag::GdalNodata)? {
            Some(value) => {
                let text = value.into_string()?;
                let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
                Some(text.parse::<f64>()?)
            }
            None => None,
        };

        let values = to_f64(decoder.read_image()?);
        let data = Array2::from_shape_vec((height as usize, width as usize), values)?;
        log::debug!("opened {} ({}x{})", path.display(), height, width);
        Ok(Grid {
            data,
            transform,
            nodata,
        }
        .mask_nodata())
    }

    fn write(&self, path: &Path, grid: &Grid) -> Result<()> {
        ensure_parent(path)?;
        let (rows, cols) = grid.shape();
        let fill = grid.nodata.filter(|v| v.is_finite());
        let values: Vec<f64> = grid
            .data
            .iter()
            .map(|v| match fill {
                Some(nodata) if v.is_nan() => nodata,
                _ => *v,
            })
            .collect();

        let file = File::create(path)?;
        let mut encoder = TiffEncoder::new(BufWriter::new(file))?;
        let mut image = encoder.new_image::<colortype::Gray64Float>(cols as u32, rows as u32)?;
        let t = &grid.transform;
        image
            .encoder()
            .write_tag(Tag::ModelPixelScaleTag, &[t.pixel_width, t.pixel_height, 0.0][..])?;
        image.encoder().write_tag(
            Tag::ModelTiepointTag,
            &[0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0][..],
        )?;
        image
            .encoder()
            .write_tag(Tag::GeoKeyDirectoryTag, &WGS84_GEOKEYS[..])?;
        if let Some(nodata) = grid.nodata {
            image
                .encoder()
                .write_tag(Tag::GdalNodata, format!("{nodata}").as_str())?;
        }
        image.write_data(&values)?;
        Ok(())
    }
}
