use chrono::NaiveDate;
use ndarray::{Array2, Zip};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use wa_core::account::AccountFile;
use wa_core::raster::{depth_to_volume, ensure_shape, resample_nearest};
use wa_core::{
    AlignedSeries, BasinMetadata, CategoryMap, CategoryValues, CompleteData, GlobalData, Grid,
    RasterAdapter, Result, VariableKey,
};
use wa_utils::dates::format_month_tag;

/// No-data value of rasters written by the sheets.
pub const OUTPUT_NODATA: f64 = -9999.0;

/// Everything a sheet builder reads besides the accumulated basin data.
pub struct SheetContext<'a> {
    pub basin: &'a BasinMetadata,
    pub global: &'a GlobalData,
    pub rasters: &'a dyn RasterAdapter,
    pub categories: &'a CategoryMap,
    /// `<output>/<basin name>`
    pub output_dir: PathBuf,
}

/// What a sheet builder hands back: the new basin data and its accounts.
#[derive(Debug, Clone)]
pub struct SheetOutput {
    pub data: CompleteData,
    pub accounts: Vec<AccountFile>,
}

impl<'a> SheetContext<'a> {
    pub fn new(
        basin: &'a BasinMetadata,
        global: &'a GlobalData,
        rasters: &'a dyn RasterAdapter,
        categories: &'a CategoryMap,
        output_root: &Path,
    ) -> Self {
        SheetContext {
            basin,
            global,
            rasters,
            categories,
            output_dir: output_root.join(&basin.name),
        }
    }

    /// The land-use grid, which is also the reference grid of the basin.
    pub fn land_use(&self) -> Result<Grid> {
        self.rasters.open(&self.basin.lu)
    }

    pub fn pixel_area(&self) -> Result<Array2<f64>> {
        self.rasters.pixel_area_km2(&self.basin.lu)
    }

    /// Open `key` for `date`, NaN outside the land-use map.
    pub fn open_month(
        &self,
        data: &CompleteData,
        key: VariableKey,
        date: &NaiveDate,
        lu: &Grid,
    ) -> Result<Array2<f64>> {
        let grid = self.rasters.open(data.file_for(key, date)?)?;
        ensure_shape(key.as_str(), &grid.data, lu.shape())?;
        Ok(mask_outside(grid.data, &lu.data))
    }

    /// Like [`open_month`](Self::open_month) but `None` when the variable or month is absent.
    pub fn open_month_opt(
        &self,
        data: &CompleteData,
        key: VariableKey,
        date: &NaiveDate,
        lu: &Grid,
    ) -> Result<Option<Array2<f64>>> {
        let available = data
            .series
            .get(&key)
            .is_some_and(|s| s.file_for(date).is_some());
        if available {
            self.open_month(data, key, date, lu).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Open an optional static raster on the land-use grid.
    pub fn open_static(&self, path: Option<&PathBuf>, lu: &Grid) -> Result<Option<Grid>> {
        let Some(path) = path else {
            return Ok(None);
        };
        let grid = self.rasters.open(path)?;
        if grid.same_grid(lu) {
            Ok(Some(grid))
        } else {
            Ok(Some(resample_nearest(&grid, lu)))
        }
    }

    pub fn derived_path(&self, key: VariableKey, date: &NaiveDate) -> PathBuf {
        self.output_dir
            .join("data")
            .join(key.as_str())
            .join(format!("{}_{}.tif", key, format_month_tag(date)))
    }

    /// Write a derived monthly raster on the land-use grid.
    pub fn write_month(
        &self,
        key: VariableKey,
        date: &NaiveDate,
        data: Array2<f64>,
        lu: &Grid,
    ) -> Result<PathBuf> {
        let path = self.derived_path(key, date);
        let mut grid = lu.with_data(data);
        grid.nodata = Some(OUTPUT_NODATA);
        self.rasters.write(&path, &grid)?;
        Ok(path)
    }

    /// Volume (km³) of a depth raster (mm) per land-use category.
    pub fn category_volumes(
        &self,
        depth: &Array2<f64>,
        lu: &Grid,
        area: &Array2<f64>,
    ) -> CategoryValues {
        self.categories
            .masked_sum(&depth_to_volume(depth, area), &lu.data)
    }
}

/// Derived rasters written by a sheet, collected per variable.
#[derive(Debug, Default)]
pub struct DerivedSeries(BTreeMap<VariableKey, Vec<(PathBuf, NaiveDate)>>);

impl DerivedSeries {
    pub fn push(&mut self, key: VariableKey, path: PathBuf, date: NaiveDate) {
        self.0.entry(key).or_default().push((path, date));
    }

    /// Add (or replace) the collected series in `data`.
    pub fn merge_into(self, mut data: CompleteData) -> Result<CompleteData> {
        for (key, pairs) in self.0 {
            data = data.with_series(key, AlignedSeries::from_pairs(pairs)?);
        }
        Ok(data)
    }
}

/// NaN wherever the land-use map is NaN.
pub fn mask_outside(mut data: Array2<f64>, lu: &Array2<f64>) -> Array2<f64> {
    Zip::from(&mut data).and(lu).for_each(|v, code| {
        if code.is_nan() {
            *v = f64::NAN;
        }
    });
    data
}

/// Pixels inside a subbasin mask: finite and non-zero.
pub fn inside_mask(mask: &Array2<f64>) -> Array2<bool> {
    mask.mapv(|m| m.is_finite() && m != 0.0)
}

/// Sum of `data` where `mask` holds, ignoring NaN.
pub fn masked_nansum(data: &Array2<f64>, mask: &Array2<bool>) -> f64 {
    data.iter()
        .zip(mask.iter())
        .filter(|(v, m)| **m && !v.is_nan())
        .map(|(v, _)| *v)
        .sum()
}
