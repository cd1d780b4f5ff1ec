//! Water balance engine and sheet builders.
//!
//! Each sheet takes the accumulated [`CompleteData`](wa_core::CompleteData)
//! of a basin by value and hands back the updated data together with the
//! account tables it produced.

pub mod context;
pub mod engine;
pub mod moving_average;
pub mod sheet1;
pub mod sheet2;
pub mod sheet3;
pub mod sheet46;
pub mod sheet5;
pub mod sheet7;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{SheetContext, SheetOutput};
pub use engine::{compute_monthly_balance, BalanceInputs, UtilizedFlowFractions};
pub use moving_average::AverageMethod;
pub use sheet3::YieldSplit;
