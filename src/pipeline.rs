// 🔗 Filing Pipeline - archive → records → computation → work paper
// Input-contract checks happen here, before any document is parsed.

use crate::config::ValidatorConfig;
use crate::error::{InputContractError, Result};
use crate::parser::{ExtractedBatch, InvoiceExtractor};
use crate::tax::{calculate, work_paper_records, ComputationResult, Period};
use crate::workpaper;
use std::io::Cursor;
use tracing::info;
use zip::ZipArchive;

// ============================================================================
// REQUEST
// ============================================================================

/// A validated monthly filing request
#[derive(Debug, Clone)]
pub struct FilingRequest {
    archive: Vec<u8>,
    filer_rfc: String,
    period: Period,
    label: Option<String>,
}

impl FilingRequest {
    /// Validate the caller's inputs.
    ///
    /// The RFC is trimmed and upper-cased; the archive must be a readable
    /// zip container; the month must be 1-12.
    pub fn new(
        archive: Vec<u8>,
        filer_rfc: &str,
        year: i32,
        month: u32,
    ) -> std::result::Result<Self, InputContractError> {
        if archive.is_empty() {
            return Err(InputContractError::EmptyArchive);
        }

        let filer_rfc = filer_rfc.trim().to_uppercase();
        if filer_rfc.is_empty() {
            return Err(InputContractError::EmptyFilerId);
        }

        let period = Period::new(year, month)?;

        // Central directory only; entries are read during extraction
        ZipArchive::new(Cursor::new(archive.as_slice()))?;

        Ok(FilingRequest {
            archive,
            filer_rfc,
            period,
            label: None,
        })
    }

    /// Override the computation column header (default: `Period::label`)
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        self.label = if label.trim().is_empty() { None } else { Some(label) };
        self
    }

    pub fn filer_rfc(&self) -> &str {
        &self.filer_rfc
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn label(&self) -> String {
        self.label.clone().unwrap_or_else(|| self.period.label())
    }
}

// ============================================================================
// RUN
// ============================================================================

#[derive(Debug)]
pub struct FilingOutcome {
    pub batch: ExtractedBatch,
    pub computation: ComputationResult,
    pub work_paper: Vec<u8>,
}

pub fn run_filing(request: &FilingRequest, config: &ValidatorConfig) -> Result<FilingOutcome> {
    let extractor = InvoiceExtractor::from_config(config);
    let batch = extractor.extract_archive(&request.archive)?;

    let period = request.period;
    let computation = calculate(&batch.records, &request.filer_rfc, period.month, period.year);
    info!(
        filer = %request.filer_rfc,
        period = %period,
        income = %computation.total_income,
        net_due = %computation.net_due,
        "ISR computed"
    );

    let rows = work_paper_records(&batch.records, &request.filer_rfc, &period);
    let work_paper = workpaper::write(
        &rows,
        &computation,
        &request.filer_rfc,
        batch.declared_filer_name.as_deref(),
        &request.label(),
    )?;

    Ok(FilingOutcome {
        batch,
        computation,
        work_paper,
    })
}

// ============================================================================
// TESTS
// ============================================================================
