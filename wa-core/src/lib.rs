//! Core types for Water Accounting Plus basin sheets.
//!
//! Basin metadata and routing, aligned monthly raster series, land-use
//! categories, the raster adapter seam and the `CLASS;SUBCLASS;VARIABLE;VALUE`
//! account tables shared by every sheet.

pub mod account;
pub mod aligner;
pub mod balance;
pub mod basin;
pub mod category;
pub mod error;
pub mod flows;
pub mod geotiff;
pub mod memory_raster;
pub mod month_range;
pub mod raster;
pub mod series;
pub mod temporal;
pub mod water_year;

pub use account::{AccountFile, AccountRow, SheetTable};
pub use balance::{BoundaryFlows, MonthlyBalance};
pub use basin::{BasinMetadata, GlobalData, RoutingGraph, Subbasin};
pub use category::{Category, CategoryMap, CategoryValues};
pub use error::{Result, WaError};
pub use flows::{BasinFlows, SubbasinFlow, SupplySplitFit};
pub use raster::{GeoTransform, Grid, RasterAdapter};
pub use series::{AlignedSeries, CompleteData, VariableKey};
pub use water_year::WaterYearCalendar;
