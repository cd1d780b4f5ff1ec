/// Error types for the water accounting core
use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for water accounting operations
#[derive(Error, Debug)]
pub enum WaError {
    /// No file in a folder carries a parseable date
    #[error("No file in {folder} matches the date encoding")]
    Parse { folder: PathBuf },

    /// A single file name could not be turned into a date
    #[error("Failed to parse date from '{0}'")]
    DateParse(String),

    /// More than one plausible date encoding was found in a file name
    #[error("Ambiguous date encoding in '{file}' (candidates: {candidates:?})")]
    AmbiguousDate { file: String, candidates: Vec<String> },

    /// A monthly series skips a month
    #[error("{0} is missing in the monthly series")]
    Gap(NaiveDate),

    /// Two files of one series map to the same month
    #[error("Duplicate month {date} in series ({first} and {second})")]
    DuplicateMonth {
        date: NaiveDate,
        first: PathBuf,
        second: PathBuf,
    },

    /// A fraction mapping does not sum to one
    #[error("Fractions '{mapping}' sum to {sum}, expected 1.0")]
    FractionSum { mapping: String, sum: f64 },

    /// A required variable is absent from the aligned data
    #[error("Required variable '{0}' has no aligned series")]
    MissingVariable(String),

    /// A required variable has no raster for the requested month
    #[error("Variable '{variable}' has no value for {date}")]
    MissingSeries { variable: String, date: NaiveDate },

    /// The routing graph is not acyclic
    #[error("Routing graph contains a cycle through subbasins {0:?}")]
    RoutingCycle(Vec<u32>),

    /// dico_in and dico_out disagree or reference unknown subbasins
    #[error("Invalid routing: {0}")]
    Routing(String),

    /// Malformed basin metadata or run configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Not enough months around a date for a moving average
    #[error("Insufficient history for moving average at {date} (needed: {needed}, found: {found})")]
    InsufficientHistory {
        date: NaiveDate,
        needed: usize,
        found: usize,
    },

    /// Two grids that must share a shape do not
    #[error("Grid shape mismatch for {name}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        name: String,
        expected: (usize, usize),
        found: (usize, usize),
    },

    /// Raster content or georeferencing problem
    #[error("Raster error: {0}")]
    Raster(String),

    /// TIFF decoding or encoding failed
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// ndarray could not build a grid from decoded pixels
    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// Failed to parse or write CSV data
    #[error("Failed to parse CSV: {0}")]
    CsvParse(#[from] csv::Error),

    /// Failed to parse a number
    #[error("Failed to parse number: {0}")]
    NumberParse(#[from] std::num::ParseFloatError),

    /// A number parsed as NaN or infinity where a finite value is required
    #[error("Non-finite number '{value}' in {context}")]
    NonFinite { value: String, context: String },

    /// Underlying file system failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Results using WaError
pub type Result<T> = std::result::Result<T, WaError>;
