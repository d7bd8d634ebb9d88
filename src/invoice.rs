// 🧾 Invoice Record - One parsed CFDI document
// Core fields are set once by the extractor and never mutated afterwards.

use crate::error::ExtractionError;
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Placeholder when a document carries no `tfd:TimbreFiscalDigital`
pub const UUID_NOT_FOUND: &str = "No encontrado";

/// RFC length for a persona moral (legal entity)
pub const LEGAL_ENTITY_RFC_LEN: usize = 12;

/// RFC length for a persona física (individual)
pub const INDIVIDUAL_RFC_LEN: usize = 13;

/// Whether `rfc` denotes a legal entity, i.e. a payer that withholds ISR.
///
/// Length is the only signal available in a CFDI; an identifier of any other
/// length is treated as "not a legal entity".
pub fn is_legal_entity_rfc(rfc: &str) -> bool {
    rfc.trim().chars().count() == LEGAL_ENTITY_RFC_LEN
}

// ============================================================================
// INVOICE RECORD
// ============================================================================

/// Serde names are the `Facturacion` sheet / CSV column headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    /// Archive entry name
    #[serde(rename = "archivo")]
    pub source_name: String,

    /// Folio fiscal (UUID) or `UUID_NOT_FOUND`
    #[serde(rename = "uuid")]
    pub fiscal_uuid: String,

    /// Naive local issuance time
    #[serde(rename = "fecha")]
    pub issued_at: Option<NaiveDateTime>,

    #[serde(rename = "emisor_rfc")]
    pub issuer_rfc: String,

    #[serde(rename = "receptor_rfc")]
    pub receiver_rfc: String,

    pub subtotal: Decimal,

    pub total: Decimal,

    /// ISR withheld by the payer, 0 when the document has none
    #[serde(rename = "isr_retenido")]
    pub withheld_isr: Decimal,

    /// `None` on success, human-readable cause otherwise
    pub error: Option<String>,
}

impl InvoiceRecord {
    /// Error placeholder for an entry that failed extraction.
    ///
    /// Financial fields are zero and must never be summed.
    pub fn failed(source_name: impl Into<String>, cause: &ExtractionError) -> Self {
        InvoiceRecord {
            source_name: source_name.into(),
            fiscal_uuid: String::new(),
            issued_at: None,
            issuer_rfc: String::new(),
            receiver_rfc: String::new(),
            subtotal: Decimal::ZERO,
            total: Decimal::ZERO,
            withheld_isr: Decimal::ZERO,
            error: Some(format!("Error al procesar: {}", cause)),
        }
    }

    /// Keep the issuance date of a failed document so it still counts
    /// towards its period's audit total. Financial fields stay zero.
    pub fn dated(mut self, issued_at: Option<NaiveDateTime>) -> Self {
        self.issued_at = issued_at;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Receiver is a persona moral (its withholding counts)
    pub fn has_legal_entity_receiver(&self) -> bool {
        is_legal_entity_rfc(&self.receiver_rfc)
    }
}

// ============================================================================
// CSV EXPORT
// ============================================================================

/// Write records as CSV using the work-paper column names
pub fn write_csv<W: Write>(records: &[InvoiceRecord], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);

    for record in records {
        wtr.serialize(record)
            .with_context(|| format!("Failed to serialize record {}", record.source_name))?;
    }

    wtr.flush().context("Failed to flush CSV writer")?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
