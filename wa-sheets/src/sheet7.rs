//! Sheet 7: independent basin mass balance, checked against Sheet 1.

use crate::context::{SheetContext, SheetOutput};
use chrono::NaiveDate;
use wa_core::aligner::common_dates;
use wa_core::raster::{depth_to_volume, nanmean, nansum};
use wa_core::{AccountFile, CompleteData, MonthlyBalance, Result, SheetTable, VariableKey};

pub const SHEET7: &str = "sheet7";

/// Nash–Sutcliffe efficiency of `simulated` against `observed`.
///
/// NaN with fewer than two pairs or a constant observation.
pub fn nash_sutcliffe(observed: &[f64], simulated: &[f64]) -> f64 {
    if observed.len() < 2 || observed.len() != simulated.len() {
        return f64::NAN;
    }
    let mean = observed.iter().sum::<f64>() / observed.len() as f64;
    let variance: f64 = observed.iter().map(|o| (o - mean).powi(2)).sum();
    if variance == 0.0 {
        return f64::NAN;
    }
    let error: f64 = observed
        .iter()
        .zip(simulated)
        .map(|(o, s)| (o - s).powi(2))
        .sum();
    1.0 - error / variance
}

/// Cumulative balance relative to the mean precipitation.
pub fn relative_storage(balance: &[f64], p: &[f64]) -> Vec<f64> {
    let mean_p = if p.is_empty() {
        f64::NAN
    } else {
        p.iter().sum::<f64>() / p.len() as f64
    };
    let mut total = 0.0;
    balance
        .iter()
        .map(|b| {
            total += b;
            if mean_p > 0.0 {
                total / mean_p
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// Basin totals (km³) and means (mm) of one month.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonthlyCheck {
    pub date: NaiveDate,
    pub p: f64,
    pub et: f64,
    pub ro: f64,
    pub p_mm: f64,
    pub et_mm: f64,
    pub ro_mm: f64,
}

impl MonthlyCheck {
    /// Storage gain P - ET - RO.
    pub fn balance(&self) -> f64 {
        self.p - self.et - self.ro
    }

    fn table(&self, relative_storage: f64, sheet1: Option<&MonthlyBalance>) -> SheetTable {
        let mut t = SheetTable::new();
        t.push("PRECIPITATION", "Basin", "Volume", self.p);
        t.push("PRECIPITATION", "Basin", "Depth", self.p_mm);
        t.push("EVAPOTRANSPIRATION", "Basin", "Volume", self.et);
        t.push("EVAPOTRANSPIRATION", "Basin", "Depth", self.et_mm);
        t.push("RUNOFF", "Basin", "Volume", self.ro);
        t.push("RUNOFF", "Basin", "Depth", self.ro_mm);
        t.push("STORAGE", "Basin", "Balance", self.balance());
        t.push("STORAGE", "Basin", "Relative storage", relative_storage);
        let (p, et, ds) = sheet1.map_or((0.0, 0.0, 0.0), |b| (b.p_total, b.et_total, b.ds));
        t.push("SHEET1", "Basin", "P", p);
        t.push("SHEET1", "Basin", "ET", et);
        t.push("SHEET1", "Basin", "dS", ds);
        t
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Nash–Sutcliffe of Sheet 1 against the independent balance over shared months.
///
/// Sheet 1's dS is a storage loss, so it is compared with the negated balance.
pub fn comparison_table(checks: &[MonthlyCheck], data: &CompleteData) -> SheetTable {
    let paired: Vec<(&MonthlyCheck, &MonthlyBalance)> = checks
        .iter()
        .filter_map(|c| data.balances.get(&c.date).map(|b| (c, b)))
        .collect();
    let comparisons: [(&str, fn(&MonthlyCheck, &MonthlyBalance) -> (f64, f64)); 3] = [
        ("NSE P", |c, b| (c.p, b.p_total)),
        ("NSE ET", |c, b| (c.et, b.et_total)),
        ("NSE dS", |c, b| (-c.balance(), b.ds)),
    ];
    let mut t = SheetTable::new();
    t.push("COMPARISON", "Sheet 1", "Months", paired.len() as f64);
    for (name, pair) in comparisons {
        let (observed, simulated): (Vec<f64>, Vec<f64>) =
            paired.iter().map(|(c, b)| pair(*c, *b)).unzip();
        t.push("COMPARISON", "Sheet 1", name, nash_sutcliffe(&observed, &simulated));
    }
    t
}

/// Run Sheet 7 for every month with P, ET and runoff.
pub fn build(ctx: &SheetContext<'_>, data: CompleteData) -> Result<SheetOutput> {
    let keys = [VariableKey::P, VariableKey::Et, VariableKey::Tr];
    let dates = common_dates(&data.date_lists(&keys)?);
    let lu = ctx.land_use()?;
    let area = ctx.pixel_area()?;

    let mut checks = Vec::with_capacity(dates.len());
    for date in &dates {
        let mut totals = [0.0; 3];
        let mut means = [0.0; 3];
        for (i, key) in keys.iter().enumerate() {
            let depth = ctx.open_month(&data, *key, date, &lu)?;
            totals[i] = nansum(&depth_to_volume(&depth, &area));
            means[i] = finite_or_zero(nanmean(&depth));
        }
        checks.push(MonthlyCheck {
            date: *date,
            p: totals[0],
            et: totals[1],
            ro: totals[2],
            p_mm: means[0],
            et_mm: means[1],
            ro_mm: means[2],
        });
    }

    let balance: Vec<f64> = checks.iter().map(MonthlyCheck::balance).collect();
    let p: Vec<f64> = checks.iter().map(|c| c.p).collect();
    let storage = relative_storage(&balance, &p);
    let mut accounts: Vec<AccountFile> = checks
        .iter()
        .zip(&storage)
        .map(|(check, s)| {
            AccountFile::monthly(
                SHEET7,
                check.date,
                check.table(finite_or_zero(*s), data.balances.get(&check.date)),
            )
        })
        .collect();
    if let Some(first) = checks.first() {
        let summary = comparison_table(&checks, &data);
        log::info!(
            "{}: sheet 7 NSE of dS against sheet 1: {:?}",
            ctx.basin.name,
            summary.value("COMPARISON", "Sheet 1", "NSE dS")
        );
        accounts.push(AccountFile::labelled(SHEET7, first.date, "summary", summary));
    }
    Ok(SheetOutput { data, accounts })
}
