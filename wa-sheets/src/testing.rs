//! Synthetic two-subbasin basin held in a `MemoryRaster`, shared by the sheet tests.

use crate::context::SheetContext;
use chrono::NaiveDate;
use ndarray::{array, Array2};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use wa_core::basin::GraceSplitBounds;
use wa_core::memory_raster::MemoryRaster;
use wa_core::month_range::MonthRange;
use wa_core::{
    AlignedSeries, BasinMetadata, CategoryMap, CompleteData, GeoTransform, GlobalData, Grid,
    RasterAdapter, Subbasin, VariableKey,
};
use wa_utils::dates::{add_months, format_month_tag};

/// Land use of the 2x2 grid: Protected, Managed / Utilized, outside.
pub fn land_use() -> Array2<f64> {
    array![[1.0, 60.0], [20.0, f64::NAN]]
}

pub struct Scenario {
    pub rasters: MemoryRaster,
    pub basin: BasinMetadata,
    pub global: GlobalData,
    pub categories: CategoryMap,
    pub dates: Vec<NaiveDate>,
    pub output_root: PathBuf,
}

impl Scenario {
    /// `months` months from January 2010 with constant raw inputs.
    pub fn new(months: usize) -> Self {
        let start = NaiveDate::from_ymd_opt(2010, 1, 1).unwrap();
        let end = add_months(&start, months as i32 - 1);
        let dates: Vec<NaiveDate> = MonthRange(start, end).collect();
        let rasters = MemoryRaster::new();
        let scenario = Scenario {
            rasters,
            basin: basin(),
            global: GlobalData::default(),
            categories: CategoryMap::wa_plus(),
            dates,
            output_root: PathBuf::from("/mem/out"),
        };
        scenario.put(&scenario.basin.lu, land_use());
        scenario.put(&scenario.basin.full_basin_mask, array![[1.0, 1.0], [1.0, f64::NAN]]);
        scenario.put(Path::new("/mem/mask_1.tif"), array![[1.0, 0.0], [1.0, 0.0]]);
        scenario.put(Path::new("/mem/mask_2.tif"), array![[0.0, 1.0], [0.0, 0.0]]);
        scenario
    }

    pub fn transform() -> GeoTransform {
        GeoTransform {
            origin_x: 30.0,
            origin_y: 1.0,
            pixel_width: 1.0,
            pixel_height: 1.0,
        }
    }

    pub fn put(&self, path: &Path, data: Array2<f64>) {
        self.rasters.insert(path, Grid::new(data, Self::transform()));
    }

    /// Store one grid per month for `key`, filled by `value(date)`.
    pub fn series_with<F>(&self, key: VariableKey, value: F) -> AlignedSeries
    where
        F: Fn(NaiveDate) -> f64,
    {
        let pairs = self
            .dates
            .iter()
            .map(|date| {
                let path = PathBuf::from(format!(
                    "/mem/{key}/{key}_{}.tif",
                    format_month_tag(date)
                ));
                self.put(&path, Array2::from_elem((2, 2), value(*date)));
                (path, *date)
            })
            .collect();
        AlignedSeries::from_pairs(pairs).unwrap()
    }

    pub fn constant(&self, key: VariableKey, value: f64) -> AlignedSeries {
        self.series_with(key, |_| value)
    }

    /// Raw inputs in mm/month.
    pub fn raw_data(&self) -> CompleteData {
        [
            (VariableKey::P, 100.0),
            (VariableKey::Et, 90.0),
            (VariableKey::Etref, 120.0),
            (VariableKey::Tr, 20.0),
            (VariableKey::Bf, 2.0),
            (VariableKey::Perc, 5.0),
            (VariableKey::Dperc, 3.0),
            (VariableKey::SupplyTotal, 10.0),
            (VariableKey::Dro, 1.0),
        ]
        .into_iter()
        .fold(CompleteData::default(), |data, (key, value)| {
            data.with_series(key, self.constant(key, value))
        })
    }

    pub fn context(&self) -> SheetContext<'_> {
        SheetContext::new(
            &self.basin,
            &self.global,
            &self.rasters as &dyn RasterAdapter,
            &self.categories,
            &self.output_root,
        )
    }
}

/// Subbasin 1 (left column) drains into subbasin 2 (top right), which leaves the basin.
fn basin() -> BasinMetadata {
    let subbasin = |name: &str, mask: &str| Subbasin {
        name: name.to_string(),
        mask: PathBuf::from(mask),
        inflow_files: Vec::new(),
        transfer_files: Vec::new(),
    };
    BasinMetadata {
        name: "Synthetic".to_string(),
        id: 1,
        lu: PathBuf::from("/mem/lu.tif"),
        full_basin_mask: PathBuf::from("/mem/basin_mask.tif"),
        masks: BTreeMap::from([
            (1, subbasin("Upper", "/mem/mask_1.tif")),
            (2, subbasin("Lower", "/mem/mask_2.tif")),
        ]),
        recycling_ratio: 0.02,
        water_year_start_month: 1,
        lu_based_supply_split: false,
        grace_supply_split: false,
        grace: None,
        grace_split_alpha_bounds: GraceSplitBounds::default(),
        fraction_xs: [4.0, 25.0, 4.0, 25.0],
        dico_in: BTreeMap::from([(1, vec![0]), (2, vec![1])]),
        dico_out: BTreeMap::from([(1, vec![2]), (2, vec![0])]),
        crops: Vec::new(),
    }
}
