// Fiscal Validator - Core Library
// CFDI extraction, monthly ISR computation, work paper writing and reconciliation.
// Exposes all modules for use in the CLI and tests.

pub mod config;
pub mod error;
pub mod invoice;
pub mod parser;         // CFDI archive → invoice records
pub mod tax;            // Simplified-regime ISR calculator
pub mod workpaper;      // .xlsx work paper writer + shared schema
pub mod reconciliation; // Work paper self-consistency checks
pub mod pipeline;       // Validated extract → calculate → write

// Re-export commonly used types
pub use config::ValidatorConfig;
pub use error::{
    ConfigError, Error, ExtractionError, InputContractError, Result, StructuralError, WorkPaperError,
};
pub use invoice::{is_legal_entity_rfc, write_csv, InvoiceRecord};
pub use parser::{
    extract_archive, CfdiParser, ExtractedBatch, FileValidator, InvoiceExtractor,
    InvoiceParser, ParsedDocument,
};
pub use tax::{applicable_rate, calculate, work_paper_records, ComputationResult, Period};
pub use reconciliation::{
    reconcile, Outcome, ReconciliationEngine, ReconciliationFinding, WorkPaper,
};
pub use pipeline::{run_filing, FilingOutcome, FilingRequest};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
