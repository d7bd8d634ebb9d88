// 🧯 Error Taxonomy
// Extraction errors stay inside their record, structural errors abort a
// reconciliation, input-contract errors are rejected before any parsing.

use thiserror::Error;

// ============================================================================
// EXTRACTION (per document, recoverable)
// ============================================================================

/// Why a single archived document could not become an invoice record.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The archive entry could not be decompressed/read.
    #[error("could not read archive entry: {0}")]
    Read(#[from] std::io::Error),

    /// The entry could not be opened (unsupported compression, encryption).
    #[error("could not open archive entry: {0}")]
    Archive(zip::result::ZipError),

    #[error("document is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("malformed XML: {0}")]
    MalformedXml(#[from] roxmltree::Error),

    #[error("missing element `{0}`")]
    MissingElement(&'static str),

    #[error("missing attribute `{attribute}` on `{element}`")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    #[error("invalid amount in `{attribute}`: {value:?} ({source})")]
    InvalidAmount {
        attribute: &'static str,
        value: String,
        source: rust_decimal::Error,
    },

    #[error("negative amount in `{attribute}`: {value}")]
    NegativeAmount {
        attribute: &'static str,
        value: String,
    },

    #[error("invalid issuance date {value:?} ({source})")]
    InvalidDate {
        value: String,
        source: chrono::ParseError,
    },
}

// ============================================================================
// STRUCTURAL (work paper schema violation, fatal)
// ============================================================================

/// The uploaded workbook does not honor the work-paper schema.
#[derive(Debug, Error)]
pub enum StructuralError {
    #[error("could not open workbook: {0}")]
    Workbook(#[from] calamine::XlsxError),

    #[error("missing sheet `{0}`")]
    MissingSheet(String),

    #[error("sheet `{0}` is empty")]
    EmptySheet(String),

    #[error("sheet `{sheet}` has no `{column}` column")]
    MissingColumn { sheet: String, column: String },

    #[error("sheet `{sheet}` has no row labeled `{label}`")]
    MissingLabel { sheet: String, label: String },

    #[error("sheet `{sheet}`, row {row}, `{column}`: expected a number, found {value:?}")]
    NonNumeric {
        sheet: String,
        row: usize,
        column: String,
        value: String,
    },
}

// ============================================================================
// INPUT CONTRACT (caller misuse, rejected up front)
// ============================================================================

#[derive(Debug, Error)]
pub enum InputContractError {
    #[error("archive is empty")]
    EmptyArchive,

    #[error("archive is not a zip container: {0}")]
    NotAnArchive(#[from] zip::result::ZipError),

    #[error("filer tax identifier is empty")]
    EmptyFilerId,

    #[error("invalid period {year}-{month}: month must be between 1 and 12")]
    InvalidPeriod { year: i32, month: u32 },

    #[error("workbook is empty")]
    EmptyWorkbook,
}

// ============================================================================
// WORK PAPER WRITING
// ============================================================================

#[derive(Debug, Error)]
pub enum WorkPaperError {
    #[error("xlsx writer failed: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("tolerance must be positive, got {0}")]
    InvalidTolerance(rust_decimal::Decimal),

    #[error("`{0}` must not be empty")]
    Empty(&'static str),
}

// ============================================================================
// CRATE ERROR
// ============================================================================

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    InputContract(#[from] InputContractError),

    #[error("work paper is structurally invalid: {0}")]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    WorkPaper(#[from] WorkPaperError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
