//! Gridded data and the raster adapter seam.
//!
//! Everything the accounting needs from raster I/O goes through
//! [`RasterAdapter`]: open a file as a [`Grid`], write one back, bring a set
//! of files onto a reference grid and compute cell areas. Grids are
//! geographic (degrees) with north-up orientation.

use crate::error::{Result, WaError};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Mean earth radius used for cell areas, in km.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Position and resolution of a north-up grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// Longitude of the left edge.
    pub origin_x: f64,
    /// Latitude of the top edge.
    pub origin_y: f64,
    pub pixel_width: f64,
    /// Positive; rows go south.
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y - (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Row and column containing the point, if it falls inside a grid of `shape`.
    pub fn cell_at(&self, x: f64, y: f64, shape: (usize, usize)) -> Option<(usize, usize)> {
        let col = ((x - self.origin_x) / self.pixel_width).floor();
        let row = ((self.origin_y - y) / self.pixel_height).floor();
        if col < 0.0 || row < 0.0 {
            return None;
        }
        let (row, col) = (row as usize, col as usize);
        (row < shape.0 && col < shape.1).then_some((row, col))
    }

    fn approx_eq(&self, other: &GeoTransform) -> bool {
        let tol = 1e-9 * self.pixel_width.abs().max(1.0);
        (self.origin_x - other.origin_x).abs() < tol
            && (self.origin_y - other.origin_y).abs() < tol
            && (self.pixel_width - other.pixel_width).abs() < tol
            && (self.pixel_height - other.pixel_height).abs() < tol
    }
}

/// A georeferenced array. No-data pixels are held as NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub data: Array2<f64>,
    pub transform: GeoTransform,
    /// No-data value written back to files.
    pub nodata: Option<f64>,
}

impl Grid {
    pub fn new(data: Array2<f64>, transform: GeoTransform) -> Self {
        Grid {
            data,
            transform,
            nodata: None,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// True when both grids have the same shape, origin and resolution.
    pub fn same_grid(&self, other: &Grid) -> bool {
        self.shape() == other.shape() && self.transform.approx_eq(&other.transform)
    }

    /// A grid on the same georeference holding different values.
    pub fn with_data(&self, data: Array2<f64>) -> Grid {
        Grid {
            data,
            transform: self.transform,
            nodata: self.nodata,
        }
    }

    /// Replace the no-data value by NaN.
    pub fn mask_nodata(mut self) -> Grid {
        if let Some(nodata) = self.nodata {
            if nodata.is_finite() {
                self.data.mapv_inplace(|v| if v == nodata { f64::NAN } else { v });
            }
        }
        self
    }
}

/// Raster I/O used by the sheets and the pipeline.
pub trait RasterAdapter {
    /// Open a raster with no-data pixels as NaN.
    fn open(&self, path: &Path) -> Result<Grid>;

    /// Write a grid as a georeferenced raster, creating parent folders.
    fn write(&self, path: &Path, grid: &Grid) -> Result<()>;

    /// Resample each source onto the reference grid and write it under
    /// `output_dir` with the same file name. Returns the written paths in order.
    fn match_to_reference(
        &self,
        reference: &Path,
        sources: &[PathBuf],
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let reference = self.open(reference)?;
        let mut written = Vec::with_capacity(sources.len());
        for source in sources {
            let name = source
                .file_name()
                .ok_or_else(|| WaError::Raster(format!("{} has no file name", source.display())))?;
            let target = output_dir.join(name);
            let grid = self.open(source)?;
            let matched = if grid.same_grid(&reference) {
                grid
            } else {
                resample_nearest(&grid, &reference)
            };
            self.write(&target, &matched)?;
            written.push(target);
        }
        Ok(written)
    }

    /// Area of every cell of the reference raster in km².
    fn pixel_area_km2(&self, reference: &Path) -> Result<Array2<f64>> {
        let grid = self.open(reference)?;
        Ok(pixel_area_km2(&grid.transform, grid.shape()))
    }
}

pub(crate) fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Nearest-neighbour resample of `source` onto the extent and resolution of `reference`.
pub fn resample_nearest(source: &Grid, reference: &Grid) -> Grid {
    let shape = reference.shape();
    let data = Array2::from_shape_fn(shape, |(row, col)| {
        let (x, y) = reference.transform.cell_center(row, col);
        source
            .transform
            .cell_at(x, y, source.shape())
            .map(|cell| source.data[cell])
            .unwrap_or(f64::NAN)
    });
    Grid {
        data,
        transform: reference.transform,
        nodata: reference.nodata.or(source.nodata),
    }
}

/// Cell areas of a geographic grid on a spherical earth, in km².
///
/// Area depends only on latitude, so every cell of a row is equal.
pub fn pixel_area_km2(transform: &GeoTransform, shape: (usize, usize)) -> Array2<f64> {
    let dlon = transform.pixel_width.abs().to_radians();
    Array2::from_shape_fn(shape, |(row, _)| {
        let top = (transform.origin_y - row as f64 * transform.pixel_height).to_radians();
        let bottom = (transform.origin_y - (row + 1) as f64 * transform.pixel_height).to_radians();
        EARTH_RADIUS_KM * EARTH_RADIUS_KM * dlon * (top.sin() - bottom.sin()).abs()
    })
}

/// Sum ignoring NaN.
pub fn nansum(data: &Array2<f64>) -> f64 {
    data.iter().filter(|v| !v.is_nan()).sum()
}

/// Mean ignoring NaN; NaN when nothing is left.
pub fn nanmean(data: &Array2<f64>) -> f64 {
    let (sum, n) = data
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Convert depths in mm to volumes in km³ per cell.
pub fn depth_to_volume(depth_mm: &Array2<f64>, area_km2: &Array2<f64>) -> Array2<f64> {
    depth_mm * area_km2 * 1e-6
}

/// Mean of a fraction raster over the basin.
///
/// The fraction is resampled onto the mask's grid when they differ; pixels
/// where the mask is NaN are excluded.
pub fn basin_mean_fraction(fraction: &Grid, basin_mask: &Grid) -> f64 {
    let resampled;
    let fraction = if fraction.same_grid(basin_mask) {
        fraction
    } else {
        resampled = resample_nearest(fraction, basin_mask);
        &resampled
    };
    let (sum, n) = fraction
        .data
        .iter()
        .zip(basin_mask.data.iter())
        .filter(|(f, m)| !m.is_nan() && !f.is_nan())
        .fold((0.0, 0usize), |(s, n), (f, _)| (s + f, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Fail unless `data` has the expected shape.
pub fn ensure_shape(name: &str, data: &Array2<f64>, expected: (usize, usize)) -> Result<()> {
    if data.dim() == expected {
        Ok(())
    } else {
        Err(WaError::ShapeMismatch {
            name: name.to_string(),
            expected,
            found: data.dim(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn transform(origin_x: f64, origin_y: f64, size: f64) -> GeoTransform {
        GeoTransform {
            origin_x,
            origin_y,
            pixel_width: size,
            pixel_height: size,
        }
    }

    #[test]
    fn test_pixel_area_equator_cell() {
        let area = pixel_area_km2(&transform(0.0, 0.5, 1.0), (1, 2));
        // one degree square at the equator is roughly 111.2 km on each side
        let expected =
            EARTH_RADIUS_KM.powi(2) * 1f64.to_radians() * (0.5f64.to_radians().sin() * 2.0);
        assert!((area[[0, 0]] - expected).abs() < 1e-9);
        assert!((area[[0, 0]] - 12364.0).abs() < 20.0);
        assert_eq!(area[[0, 0]], area[[0, 1]]);
    }

    #[test]
    fn test_pixel_area_shrinks_poleward() {
        let area = pixel_area_km2(&transform(0.0, 60.0, 1.0), (3, 1));
        assert!(area[[0, 0]] < area[[1, 0]]);
        assert!(area[[1, 0]] < area[[2, 0]]);
    }

    #[test]
    fn test_resample_nearest_to_finer_grid() {
        let coarse = Grid::new(array![[1.0, 2.0], [3.0, 4.0]], transform(0.0, 2.0, 1.0));
        let fine_ref = Grid::new(Array2::zeros((4, 4)), transform(0.0, 2.0, 0.5));
        let fine = resample_nearest(&coarse, &fine_ref);
        assert_eq!(fine.shape(), (4, 4));
        assert_eq!(fine.data[[0, 0]], 1.0);
        assert_eq!(fine.data[[1, 3]], 2.0);
        assert_eq!(fine.data[[3, 0]], 3.0);
        assert_eq!(fine.data[[2, 2]], 4.0);
    }

    #[test]
    fn test_resample_outside_source_is_nan() {
        let source = Grid::new(array![[5.0]], transform(0.0, 1.0, 1.0));
        let reference = Grid::new(Array2::zeros((1, 2)), transform(0.0, 1.0, 1.0));
        let out = resample_nearest(&source, &reference);
        assert_eq!(out.data[[0, 0]], 5.0);
        assert!(out.data[[0, 1]].is_nan());
    }

    #[test]
    fn test_basin_mean_fraction_masks_outside() {
        let mask = Grid::new(array![[1.0, f64::NAN], [1.0, 1.0]], transform(0.0, 2.0, 1.0));
        let fraction = Grid::new(array![[0.2, 0.9], [0.4, f64::NAN]], transform(0.0, 2.0, 1.0));
        assert!((basin_mean_fraction(&fraction, &mask) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_basin_mean_fraction_resamples() {
        let mask = Grid::new(Array2::from_elem((2, 2), 1.0), transform(0.0, 2.0, 1.0));
        let fraction = Grid::new(array![[0.5]], transform(0.0, 2.0, 2.0));
        assert_eq!(basin_mean_fraction(&fraction, &mask), 0.5);
    }

    #[test]
    fn test_mask_nodata_and_nan_helpers() {
        let mut grid = Grid::new(array![[1.0, -9999.0], [3.0, 4.0]], transform(0.0, 2.0, 1.0));
        grid.nodata = Some(-9999.0);
        let grid = grid.mask_nodata();
        assert!(grid.data[[0, 1]].is_nan());
        assert_eq!(nansum(&grid.data), 8.0);
        assert!((nanmean(&grid.data) - 8.0 / 3.0).abs() < 1e-12);
        assert!(nanmean(&array![[f64::NAN]]).is_nan());
    }
}
