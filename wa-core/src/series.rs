use crate::balance::MonthlyBalance;
use crate::error::{Result, WaError};
use crate::flows::{BasinFlows, SupplySplitFit};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Hydrological variable keys, raw inputs first, then values derived by the sheets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKey {
    P,
    Et,
    Etb,
    Etg,
    /// Interception.
    I,
    /// Transpiration.
    T,
    /// Rainfall-generated surface runoff.
    R,
    /// Total runoff.
    Tr,
    Bf,
    Sr,
    Perc,
    Dperc,
    SupplyTotal,
    Dro,
    Rzsm,
    Ndm,
    Lai,
    N,
    Etref,
    SupplySw,
    SupplyGw,
    ReturnFlowSwSw,
    ReturnFlowSwGw,
    ReturnFlowGwSw,
    ReturnFlowGwGw,
    SwReturnFraction,
    Fractions,
}

impl VariableKey {
    pub const RAW: [VariableKey; 19] = [
        VariableKey::P,
        VariableKey::Et,
        VariableKey::Etb,
        VariableKey::Etg,
        VariableKey::I,
        VariableKey::T,
        VariableKey::R,
        VariableKey::Tr,
        VariableKey::Bf,
        VariableKey::Sr,
        VariableKey::Perc,
        VariableKey::Dperc,
        VariableKey::SupplyTotal,
        VariableKey::Dro,
        VariableKey::Rzsm,
        VariableKey::Ndm,
        VariableKey::Lai,
        VariableKey::N,
        VariableKey::Etref,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VariableKey::P => "p",
            VariableKey::Et => "et",
            VariableKey::Etb => "etb",
            VariableKey::Etg => "etg",
            VariableKey::I => "i",
            VariableKey::T => "t",
            VariableKey::R => "r",
            VariableKey::Tr => "tr",
            VariableKey::Bf => "bf",
            VariableKey::Sr => "sr",
            VariableKey::Perc => "perc",
            VariableKey::Dperc => "dperc",
            VariableKey::SupplyTotal => "supply_total",
            VariableKey::Dro => "dro",
            VariableKey::Rzsm => "rzsm",
            VariableKey::Ndm => "ndm",
            VariableKey::Lai => "lai",
            VariableKey::N => "n",
            VariableKey::Etref => "etref",
            VariableKey::SupplySw => "supply_sw",
            VariableKey::SupplyGw => "supply_gw",
            VariableKey::ReturnFlowSwSw => "return_flow_sw_sw",
            VariableKey::ReturnFlowSwGw => "return_flow_sw_gw",
            VariableKey::ReturnFlowGwSw => "return_flow_gw_sw",
            VariableKey::ReturnFlowGwGw => "return_flow_gw_gw",
            VariableKey::SwReturnFraction => "sw_return_fraction",
            VariableKey::Fractions => "fractions",
        }
    }

    pub fn all() -> impl Iterator<Item = VariableKey> {
        VariableKey::RAW.into_iter().chain([
            VariableKey::SupplySw,
            VariableKey::SupplyGw,
            VariableKey::ReturnFlowSwSw,
            VariableKey::ReturnFlowSwGw,
            VariableKey::ReturnFlowGwSw,
            VariableKey::ReturnFlowGwGw,
            VariableKey::SwReturnFraction,
            VariableKey::Fractions,
        ])
    }
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariableKey {
    type Err = WaError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().trim_end_matches("_folder");
        VariableKey::all()
            .find(|k| k.as_str() == key)
            .ok_or_else(|| WaError::Config(format!("unknown variable key '{s}'")))
    }
}

/// One raster file per month for a single variable, sorted by date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignedSeries {
    files: Vec<PathBuf>,
    dates: Vec<NaiveDate>,
}

impl AlignedSeries {
    /// Build a series from unordered (file, month) pairs. Fails on duplicate months.
    pub fn from_pairs(mut pairs: Vec<(PathBuf, NaiveDate)>) -> Result<Self> {
        pairs.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        for window in pairs.windows(2) {
            if window[0].1 == window[1].1 {
                return Err(WaError::DuplicateMonth {
                    date: window[0].1,
                    first: window[0].0.clone(),
                    second: window[1].0.clone(),
                });
            }
        }
        let (files, dates) = pairs.into_iter().unzip();
        Ok(AlignedSeries { files, dates })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn file_for(&self, date: &NaiveDate) -> Option<&Path> {
        self.dates
            .binary_search(date)
            .ok()
            .map(|i| self.files[i].as_path())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, NaiveDate)> {
        self.files
            .iter()
            .map(PathBuf::as_path)
            .zip(self.dates.iter().copied())
    }
}

/// The accumulated basin state threaded from stage to stage.
///
/// Each stage takes ownership of the value it is given and returns a new one;
/// nothing is shared between basins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompleteData {
    pub series: BTreeMap<VariableKey, AlignedSeries>,
    /// Sheet 5 routing results, per month.
    #[serde(default)]
    pub flows: BTreeMap<NaiveDate, BasinFlows>,
    /// Sheet 1 water balance records, per month.
    #[serde(default)]
    pub balances: BTreeMap<NaiveDate, MonthlyBalance>,
    /// Fitted GRACE-based surface water supply fraction, when one was calibrated.
    #[serde(default)]
    pub supply_split: Option<SupplySplitFit>,
}

impl CompleteData {
    pub fn with_series(mut self, key: VariableKey, series: AlignedSeries) -> Self {
        self.series.insert(key, series);
        self
    }

    pub fn contains(&self, key: VariableKey) -> bool {
        self.series.get(&key).is_some_and(|s| !s.is_empty())
    }

    pub fn series(&self, key: VariableKey) -> Result<&AlignedSeries> {
        self.series
            .get(&key)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| WaError::MissingVariable(key.to_string()))
    }

    /// The raster of `key` for `date`, failing if the month is absent.
    pub fn file_for(&self, key: VariableKey, date: &NaiveDate) -> Result<&Path> {
        self.series(key)?
            .file_for(date)
            .ok_or_else(|| WaError::MissingSeries {
                variable: key.to_string(),
                date: *date,
            })
    }

    /// Date lists of the requested keys, failing on the first key that is absent.
    pub fn date_lists(&self, keys: &[VariableKey]) -> Result<Vec<&[NaiveDate]>> {
        keys.iter()
            .map(|k| self.series(*k).map(AlignedSeries::dates))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn month(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    #[test]
    fn test_from_pairs_sorts_by_date() {
        let series = AlignedSeries::from_pairs(vec![
            (PathBuf::from("p_2020_03.tif"), month(2020, 3)),
            (PathBuf::from("p_2020_01.tif"), month(2020, 1)),
            (PathBuf::from("p_2020_02.tif"), month(2020, 2)),
        ])
        .unwrap();
        assert_eq!(series.dates(), &[month(2020, 1), month(2020, 2), month(2020, 3)]);
        assert_eq!(
            series.file_for(&month(2020, 2)),
            Some(Path::new("p_2020_02.tif"))
        );
        assert_eq!(series.file_for(&month(2020, 4)), None);
    }

    #[test]
    fn test_from_pairs_rejects_duplicate_months() {
        let result = AlignedSeries::from_pairs(vec![
            (PathBuf::from("a_2020_01.tif"), month(2020, 1)),
            (PathBuf::from("b_2020_01.tif"), month(2020, 1)),
        ]);
        assert!(matches!(result, Err(WaError::DuplicateMonth { .. })));
    }

    #[test]
    fn test_variable_key_parsing() {
        assert_eq!("supply_total".parse::<VariableKey>().unwrap(), VariableKey::SupplyTotal);
        assert_eq!("etref_folder".parse::<VariableKey>().unwrap(), VariableKey::Etref);
        assert_eq!("t_folder".parse::<VariableKey>().unwrap(), VariableKey::T);
        assert_eq!("i".parse::<VariableKey>().unwrap(), VariableKey::I);
        assert!("snow".parse::<VariableKey>().is_err());
        for key in VariableKey::all() {
            assert_eq!(key.as_str().parse::<VariableKey>().unwrap(), key);
        }
    }

    #[test]
    fn test_complete_data_missing_lookups() {
        let data = CompleteData::default().with_series(
            VariableKey::P,
            AlignedSeries::from_pairs(vec![(PathBuf::from("p.tif"), month(2020, 1))]).unwrap(),
        );
        assert!(data.contains(VariableKey::P));
        assert!(matches!(
            data.series(VariableKey::Et),
            Err(WaError::MissingVariable(_))
        ));
        assert!(matches!(
            data.file_for(VariableKey::P, &month(2020, 2)),
            Err(WaError::MissingSeries { .. })
        ));
    }

    #[test]
    fn test_complete_data_json_round_trip() {
        let data = CompleteData::default().with_series(
            VariableKey::Tr,
            AlignedSeries::from_pairs(vec![(PathBuf::from("tr.tif"), month(2020, 1))]).unwrap(),
        );
        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains("\"tr\""));
        let back: CompleteData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, data);
    }
}
