//! Tabular sheet accounts.
//!
//! Every sheet is written as `;`-delimited `CLASS;SUBCLASS;VARIABLE;VALUE`
//! rows. Monthly tables are rolled up into water years by summing the VALUE
//! column of twelve tables with identical row layout.

use crate::error::{Result, WaError};
use crate::water_year::WaterYearCalendar;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use wa_utils::dates::format_month_tag;

pub const DELIMITER: u8 = b';';

/// One line item of a sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRow {
    #[serde(rename = "CLASS")]
    pub class: String,
    #[serde(rename = "SUBCLASS")]
    pub subclass: String,
    #[serde(rename = "VARIABLE")]
    pub variable: String,
    #[serde(rename = "VALUE")]
    pub value: f64,
}

/// Ordered rows of one sheet for one period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetTable {
    pub rows: Vec<AccountRow>,
}

impl SheetTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, class: &str, subclass: &str, variable: &str, value: f64) {
        self.rows.push(AccountRow {
            class: class.to_string(),
            subclass: subclass.to_string(),
            variable: variable.to_string(),
            value,
        });
    }

    pub fn value(&self, class: &str, subclass: &str, variable: &str) -> Option<f64> {
        self.rows
            .iter()
            .find(|r| r.class == class && r.subclass == subclass && r.variable == variable)
            .map(|r| r.value)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(DELIMITER)
            .from_writer(writer);
        for row in &self.rows {
            wtr.serialize(row)?;
        }
        if self.rows.is_empty() {
            wtr.write_record(["CLASS", "SUBCLASS", "VARIABLE", "VALUE"])?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(true)
            .from_reader(reader);
        let rows = rdr.deserialize().collect::<std::result::Result<Vec<AccountRow>, _>>()?;
        Ok(SheetTable { rows })
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.to_writer(fs::File::create(path)?)
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        Self::from_reader(fs::File::open(path)?)
    }

    /// Row-wise sum of tables sharing the same row layout.
    pub fn sum(tables: &[&SheetTable]) -> Result<SheetTable> {
        let Some((first, rest)) = tables.split_first() else {
            return Ok(SheetTable::new());
        };
        let mut total = (*first).clone();
        for table in rest {
            if table.rows.len() != total.rows.len() {
                return Err(WaError::Config(format!(
                    "cannot sum tables with {} and {} rows",
                    total.rows.len(),
                    table.rows.len()
                )));
            }
            for (acc, row) in total.rows.iter_mut().zip(&table.rows) {
                if (&acc.class, &acc.subclass, &acc.variable)
                    != (&row.class, &row.subclass, &row.variable)
                {
                    return Err(WaError::Config(format!(
                        "row {};{};{} does not line up with {};{};{}",
                        acc.class, acc.subclass, acc.variable, row.class, row.subclass, row.variable
                    )));
                }
                acc.value += row.value;
            }
        }
        Ok(total)
    }
}

/// A sheet table together with the period and label it is filed under.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountFile {
    pub sheet: &'static str,
    pub date: NaiveDate,
    /// Extra name part for tables that are not plain monthly accounts.
    pub label: Option<String>,
    pub table: SheetTable,
}

impl AccountFile {
    pub fn monthly(sheet: &'static str, date: NaiveDate, table: SheetTable) -> Self {
        AccountFile {
            sheet,
            date,
            label: None,
            table,
        }
    }

    pub fn labelled(sheet: &'static str, date: NaiveDate, label: &str, table: SheetTable) -> Self {
        AccountFile {
            sheet,
            date,
            label: Some(label.to_string()),
            table,
        }
    }

    pub fn is_monthly(&self) -> bool {
        self.label.is_none()
    }

    /// `sheet1_2009_01.csv`, or `sheet3_maize_2009_01.csv` for labelled tables.
    pub fn file_name(&self) -> String {
        let tag = format_month_tag(&self.date);
        match &self.label {
            Some(label) => format!("{}_{}_{}.csv", self.sheet, sanitize(label), tag),
            None => format!("{}_{}.csv", self.sheet, tag),
        }
    }

    /// Write under `<dir>/<sheet>_monthly/` (or `<sheet>_other/` for labelled tables).
    pub fn write_into(&self, dir: &Path) -> Result<PathBuf> {
        let sub = if self.is_monthly() { "monthly" } else { "other" };
        let path = dir.join(format!("{}_{}", self.sheet, sub)).join(self.file_name());
        self.table.write_csv(&path)?;
        Ok(path)
    }
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

/// Sum monthly tables into water-year tables; years missing any month are dropped.
pub fn yearly_rollups(
    monthly: &[(NaiveDate, &SheetTable)],
    calendar: &WaterYearCalendar,
) -> Result<Vec<(i32, SheetTable)>> {
    let dates: Vec<NaiveDate> = monthly.iter().map(|(d, _)| *d).collect();
    let mut yearly = Vec::new();
    for (year, months) in calendar.complete_years(&dates) {
        let tables: Vec<&SheetTable> = months
            .iter()
            .filter_map(|m| monthly.iter().find(|(d, _)| d == m).map(|(_, t)| *t))
            .collect();
        yearly.push((year, SheetTable::sum(&tables)?));
    }
    Ok(yearly)
}

/// Roll up the monthly accounts of one sheet and write `<sheet>_<year>.csv`
/// files into `<dir>/<sheet>_yearly/`.
pub fn write_yearly_rollups(
    sheet: &str,
    files: &[AccountFile],
    calendar: &WaterYearCalendar,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    let monthly: Vec<(NaiveDate, &SheetTable)> = files
        .iter()
        .filter(|f| f.sheet == sheet && f.is_monthly())
        .map(|f| (f.date, &f.table))
        .collect();
    let mut written = Vec::new();
    for (year, table) in yearly_rollups(&monthly, calendar)? {
        let path = dir
            .join(format!("{sheet}_yearly"))
            .join(format!("{sheet}_{year}.csv"));
        table.write_csv(&path)?;
        written.push(path);
    }
    if !written.is_empty() {
        log::info!("{}: wrote {} yearly accounts", sheet, written.len());
    }
    Ok(written)
}
