// ⚖️ Reconciliation Engine - Work paper self-consistency
//
// Recomputes aggregates from the Facturacion line items and compares them
// with what the same workbook states:
//
//   1. Σ subtotal                       vs  Calculo ISR "Ingresos cobrados del mes"
//   2. Σ isr_retenido (12-char RFC)     vs  Calculo ISR "ISR retenido"
//   3. Calculo ISR "Total a pagar"      vs  RESUMEN "ISR a Pagar"
//
// Each check is independent and yields exactly one finding. A workbook that
// does not honor the schema is rejected as a whole.

use crate::config::ValidatorConfig;
use crate::error::{InputContractError, Result, StructuralError};
use crate::invoice::is_legal_entity_rfc;
use crate::workpaper::schema::*;
use calamine::{Data, Range, Reader, Xlsx};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read, Seek};
use std::str::FromStr;
use tracing::{info, warn};

// ============================================================================
// FINDINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Values agree within tolerance
    Ok,

    /// Values differ by at least the tolerance
    Mismatch,

    /// The recomputation could not be completed (decimal overflow)
    Inconclusive,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ok => "✅ Correcto",
            Outcome::Mismatch => "❌ Error",
            Outcome::Inconclusive => "⚠️ Advertencia",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationFinding {
    pub id: u32,
    pub label: String,
    pub outcome: Outcome,
    pub message: String,
}

impl ReconciliationFinding {
    pub fn ok(id: u32, label: &str, message: String) -> Self {
        ReconciliationFinding {
            id,
            label: label.to_string(),
            outcome: Outcome::Ok,
            message,
        }
    }

    pub fn mismatch(id: u32, label: &str, message: String) -> Self {
        ReconciliationFinding {
            id,
            label: label.to_string(),
            outcome: Outcome::Mismatch,
            message,
        }
    }

    pub fn inconclusive(id: u32, label: &str, message: String) -> Self {
        ReconciliationFinding {
            id,
            label: label.to_string(),
            outcome: Outcome::Inconclusive,
            message,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == Outcome::Ok
    }
}

pub const INCOME_CHECK: &str = "Conciliación de Ingresos";
pub const WITHHOLDING_CHECK: &str = "Verificación de Retenciones";
pub const NET_DUE_CHECK: &str = "Consistencia del Saldo a Pagar";
pub const VAT_EXEMPT_CHECK: &str = "Validación de IVA Exento";

// ============================================================================
// TYPED WORK PAPER
// ============================================================================

/// One `Facturacion` row
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    /// 1-based sheet row
    pub row: usize,
    pub receiver_rfc: String,
    pub subtotal: Decimal,
    pub withheld_isr: Decimal,
    pub error: Option<String>,
}

/// Values stated in `Calculo ISR`
#[derive(Debug, Clone, PartialEq)]
pub struct StatedComputation {
    pub period_label: String,
    pub total_income: Decimal,
    pub rate: Decimal,
    pub tax_before_withholding: Decimal,
    pub withheld_isr: Decimal,
    pub net_due: Decimal,
}

/// Values stated in `RESUMEN`
#[derive(Debug, Clone, PartialEq)]
pub struct StatedSummary {
    pub isr_due: Decimal,
    pub vat_due: Decimal,
}

/// A work paper loaded and validated against the schema
#[derive(Debug, Clone, PartialEq)]
pub struct WorkPaper {
    pub line_items: Vec<LineItem>,
    pub computation: StatedComputation,
    pub summary: StatedSummary,
}

impl WorkPaper {
    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, StructuralError> {
        let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))?;

        // All three sheets must exist before any of them is interpreted
        let line_items = sheet_range(&mut workbook, LINE_ITEMS_SHEET)?;
        let computation = sheet_range(&mut workbook, COMPUTATION_SHEET)?;
        let summary = sheet_range(&mut workbook, SUMMARY_SHEET)?;

        Ok(WorkPaper {
            line_items: load_line_items(&line_items)?,
            computation: load_computation(&computation)?,
            summary: load_summary(&summary)?,
        })
    }

    /// Line items that count towards totals
    pub fn valid_items(&self) -> impl Iterator<Item = &LineItem> {
        self.line_items.iter().filter(|item| item.error.is_none())
    }
}

fn sheet_range<RS: Read + Seek>(
    workbook: &mut Xlsx<RS>,
    name: &str,
) -> std::result::Result<Range<Data>, StructuralError> {
    if !workbook.sheet_names().iter().any(|sheet| sheet == name) {
        return Err(StructuralError::MissingSheet(name.to_string()));
    }
    Ok(workbook.worksheet_range(name)?)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) => text.trim().to_string(),
        other => other.to_string(),
    }
}

fn cell_decimal(cell: Option<&Data>) -> Option<Decimal> {
    match cell? {
        // Shortest round-trip text keeps 30000.01 as 30000.01
        Data::Float(value) => Decimal::from_str(&value.to_string()).ok(),
        Data::Int(value) => Some(Decimal::from(*value)),
        Data::String(text) => Decimal::from_str(text.trim()).ok(),
        _ => None,
    }
}

fn numeric(
    cell: Option<&Data>,
    sheet: &str,
    row: usize,
    column: &str,
) -> std::result::Result<Decimal, StructuralError> {
    cell_decimal(cell).ok_or_else(|| StructuralError::NonNumeric {
        sheet: sheet.to_string(),
        row,
        column: column.to_string(),
        value: cell.map(cell_text).unwrap_or_default(),
    })
}

fn first_row(range: &Range<Data>) -> usize {
    range.start().map(|(row, _)| row as usize).unwrap_or(0)
}

fn load_line_items(range: &Range<Data>) -> std::result::Result<Vec<LineItem>, StructuralError> {
    let mut rows = range.rows();
    let header = rows
        .next()
        .ok_or_else(|| StructuralError::EmptySheet(LINE_ITEMS_SHEET.to_string()))?;

    let position = |name: &str| header.iter().position(|cell| cell_text(cell) == name);
    let required = |name: &str| {
        position(name).ok_or_else(|| StructuralError::MissingColumn {
            sheet: LINE_ITEMS_SHEET.to_string(),
            column: name.to_string(),
        })
    };

    let receiver_col = required(COL_RECEIVER_RFC)?;
    let subtotal_col = required(COL_SUBTOTAL)?;
    let withheld_col = required(COL_WITHHELD_ISR)?;
    let error_col = position(COL_ERROR);

    let header_row = first_row(range) + 1;
    let mut items = Vec::new();

    for (offset, row) in rows.enumerate() {
        if row.iter().all(|cell| matches!(cell, Data::Empty)) {
            continue;
        }
        let row_number = header_row + offset + 1;

        let error = error_col
            .and_then(|col| row.get(col))
            .map(cell_text)
            .filter(|text| !text.is_empty());
        let receiver_rfc = row.get(receiver_col).map(cell_text).unwrap_or_default();

        if error.is_some() {
            items.push(LineItem {
                row: row_number,
                receiver_rfc,
                subtotal: Decimal::ZERO,
                withheld_isr: Decimal::ZERO,
                error,
            });
            continue;
        }

        let subtotal = numeric(row.get(subtotal_col), LINE_ITEMS_SHEET, row_number, COL_SUBTOTAL)?;
        let withheld_isr =
            numeric(row.get(withheld_col), LINE_ITEMS_SHEET, row_number, COL_WITHHELD_ISR)?;

        items.push(LineItem {
            row: row_number,
            receiver_rfc,
            subtotal,
            withheld_isr,
            error: None,
        });
    }

    Ok(items)
}

/// Value next to the row whose first cell is `label`
fn labeled_value(
    range: &Range<Data>,
    sheet: &str,
    label: &str,
) -> std::result::Result<Decimal, StructuralError> {
    let (offset, row) = range
        .rows()
        .enumerate()
        .find(|(_, row)| row.first().map(cell_text).as_deref() == Some(label))
        .ok_or_else(|| StructuralError::MissingLabel {
            sheet: sheet.to_string(),
            label: label.to_string(),
        })?;

    numeric(row.get(1), sheet, first_row(range) + offset + 1, label)
}

fn load_computation(range: &Range<Data>) -> std::result::Result<StatedComputation, StructuralError> {
    let period_label = range
        .rows()
        .next()
        .and_then(|header| header.get(1))
        .map(cell_text)
        .unwrap_or_default();

    Ok(StatedComputation {
        period_label,
        total_income: labeled_value(range, COMPUTATION_SHEET, INCOME_LABEL)?,
        rate: labeled_value(range, COMPUTATION_SHEET, RATE_LABEL)?,
        tax_before_withholding: labeled_value(range, COMPUTATION_SHEET, TAX_LABEL)?,
        withheld_isr: labeled_value(range, COMPUTATION_SHEET, WITHHELD_LABEL)?,
        net_due: labeled_value(range, COMPUTATION_SHEET, NET_DUE_LABEL)?,
    })
}

fn load_summary(range: &Range<Data>) -> std::result::Result<StatedSummary, StructuralError> {
    Ok(StatedSummary {
        isr_due: labeled_value(range, SUMMARY_SHEET, ISR_DUE_LABEL)?,
        vat_due: labeled_value(range, SUMMARY_SHEET, VAT_DUE_LABEL)?,
    })
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    /// Amounts reconcile when |a - b| < tolerance (default: 0.01)
    pub tolerance: Decimal,

    /// Also require RESUMEN "IVA a Pagar" to be zero
    pub check_vat_exemption: bool,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            tolerance: dec!(0.01),
            check_vat_exemption: false,
        }
    }

    pub fn with_tolerance(tolerance: Decimal) -> Self {
        ReconciliationEngine {
            tolerance,
            check_vat_exemption: false,
        }
    }

    pub fn from_config(config: &ValidatorConfig) -> Self {
        ReconciliationEngine {
            tolerance: config.tolerance,
            check_vat_exemption: config.check_vat_exemption,
        }
    }

    pub fn with_vat_exemption_check(mut self, enabled: bool) -> Self {
        self.check_vat_exemption = enabled;
        self
    }

    /// Load `bytes` as a work paper and run every check
    pub fn reconcile(&self, bytes: &[u8]) -> Result<Vec<ReconciliationFinding>> {
        if bytes.is_empty() {
            return Err(InputContractError::EmptyWorkbook.into());
        }

        let work_paper = WorkPaper::from_bytes(bytes)?;
        Ok(self.reconcile_work_paper(&work_paper))
    }

    pub fn reconcile_work_paper(&self, work_paper: &WorkPaper) -> Vec<ReconciliationFinding> {
        let mut findings = vec![
            self.check_income(work_paper),
            self.check_withholding(work_paper),
            self.check_net_due(work_paper),
        ];
        if self.check_vat_exemption {
            findings.push(self.check_vat_exempt(work_paper));
        }

        let failed = findings.iter().filter(|f| !f.is_ok()).count();
        if failed > 0 {
            warn!(checks = findings.len(), failed, "work paper does not reconcile");
        } else {
            info!(checks = findings.len(), "work paper reconciled");
        }

        findings
    }

    /// `Some(true)` when |a - b| < tolerance, `None` if the difference overflows
    pub fn amounts_match(&self, a: Decimal, b: Decimal) -> Option<bool> {
        a.checked_sub(b).map(|difference| difference.abs() < self.tolerance)
    }

    /// Σ subtotal over valid line items
    pub fn recompute_income(&self, work_paper: &WorkPaper) -> Option<Decimal> {
        work_paper
            .valid_items()
            .try_fold(Decimal::ZERO, |acc, item| acc.checked_add(item.subtotal))
    }

    /// Σ isr_retenido over valid line items billed to a legal entity
    pub fn recompute_withholding(&self, work_paper: &WorkPaper) -> Option<Decimal> {
        work_paper
            .valid_items()
            .filter(|item| is_legal_entity_rfc(&item.receiver_rfc))
            .try_fold(Decimal::ZERO, |acc, item| acc.checked_add(item.withheld_isr))
    }

    fn check_income(&self, work_paper: &WorkPaper) -> ReconciliationFinding {
        let stated = work_paper.computation.total_income;
        let Some(recomputed) = self.recompute_income(work_paper) else {
            return overflow(1, INCOME_CHECK, "los subtotales");
        };

        match self.amounts_match(stated, recomputed) {
            Some(true) => ReconciliationFinding::ok(
                1,
                INCOME_CHECK,
                format!("Los ingresos (${}) coinciden con los CFDI.", stated),
            ),
            Some(false) => ReconciliationFinding::mismatch(
                1,
                INCOME_CHECK,
                format!(
                    "Ingresos del cálculo (${}) no coinciden con los CFDI (${}).",
                    stated, recomputed
                ),
            ),
            None => overflow(1, INCOME_CHECK, "la diferencia de ingresos"),
        }
    }

    fn check_withholding(&self, work_paper: &WorkPaper) -> ReconciliationFinding {
        let stated = work_paper.computation.withheld_isr;
        let Some(recomputed) = self.recompute_withholding(work_paper) else {
            return overflow(2, WITHHOLDING_CHECK, "las retenciones");
        };

        match self.amounts_match(stated, recomputed) {
            Some(true) => ReconciliationFinding::ok(
                2,
                WITHHOLDING_CHECK,
                format!("La retención (${}) es consistente con los CFDI.", stated),
            ),
            Some(false) => ReconciliationFinding::mismatch(
                2,
                WITHHOLDING_CHECK,
                format!(
                    "La retención del cálculo (${}) no coincide con la de los CFDI (${}).",
                    stated, recomputed
                ),
            ),
            None => overflow(2, WITHHOLDING_CHECK, "la diferencia de retenciones"),
        }
    }

    fn check_net_due(&self, work_paper: &WorkPaper) -> ReconciliationFinding {
        let computed = work_paper.computation.net_due;
        let summarized = work_paper.summary.isr_due;

        match self.amounts_match(computed, summarized) {
            Some(true) => ReconciliationFinding::ok(
                3,
                NET_DUE_CHECK,
                format!("El saldo a pagar (${}) es consistente.", computed),
            ),
            Some(false) => ReconciliationFinding::mismatch(
                3,
                NET_DUE_CHECK,
                format!(
                    "El pago del cálculo (${}) no coincide con el resumen (${}).",
                    computed, summarized
                ),
            ),
            None => overflow(3, NET_DUE_CHECK, "la diferencia de saldos"),
        }
    }

    fn check_vat_exempt(&self, work_paper: &WorkPaper) -> ReconciliationFinding {
        let vat = work_paper.summary.vat_due;

        match self.amounts_match(vat, Decimal::ZERO) {
            Some(true) => ReconciliationFinding::ok(
                4,
                VAT_EXEMPT_CHECK,
                "El IVA a cargo es $0.00, acorde a la actividad exenta.".to_string(),
            ),
            Some(false) => ReconciliationFinding::mismatch(
                4,
                VAT_EXEMPT_CHECK,
                format!("Se calculó un IVA a cargo de ${} para una actividad exenta.", vat),
            ),
            None => overflow(4, VAT_EXEMPT_CHECK, "el IVA"),
        }
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn overflow(id: u32, label: &str, what: &str) -> ReconciliationFinding {
    ReconciliationFinding::inconclusive(
        id,
        label,
        format!("No se pudo realizar la validación: {} fuera del rango decimal.", what),
    )
}

/// Reconcile with default settings
pub fn reconcile(bytes: &[u8]) -> Result<Vec<ReconciliationFinding>> {
    ReconciliationEngine::new().reconcile(bytes)
}

// ============================================================================
// TESTS
// ============================================================================
