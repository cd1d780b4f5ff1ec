//! Named pipeline stages and the checkpoint each one resumes from.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Reproject,
    Sheet46,
    Sheet2,
    Sheet3,
    Sheet5,
    Sheet1,
    Sheet7,
}

impl Stage {
    /// Pipeline order.
    pub const ALL: [Stage; 7] = [
        Stage::Reproject,
        Stage::Sheet46,
        Stage::Sheet2,
        Stage::Sheet3,
        Stage::Sheet5,
        Stage::Sheet1,
        Stage::Sheet7,
    ];

    /// Checkpoint key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Reproject => "reproject",
            Stage::Sheet46 => "sheet46",
            Stage::Sheet2 => "sheet2",
            Stage::Sheet3 => "sheet3",
            Stage::Sheet5 => "sheet5",
            Stage::Sheet1 => "sheet1",
            Stage::Sheet7 => "sheet7",
        }
    }

    /// The stage whose checkpoint holds this stage's input when nothing
    /// earlier ran in the same pass. `None` for the first stage, which
    /// starts from the raw folder scans.
    pub fn resume_from(&self) -> Option<Stage> {
        match self {
            Stage::Reproject => None,
            Stage::Sheet46 => Some(Stage::Reproject),
            Stage::Sheet2 | Stage::Sheet3 | Stage::Sheet5 => Some(Stage::Sheet46),
            Stage::Sheet1 | Stage::Sheet7 => Some(Stage::Sheet5),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
