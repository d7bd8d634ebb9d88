// 📒 Work Paper Writer - records + computation → three-sheet .xlsx
//
// Sheets, in order:
//   1. Facturacion  - one row per record, headers = InvoiceRecord field names
//   2. Calculo ISR  - label | value (value column headed by the period label)
//   3. RESUMEN      - ISR a Pagar / IVA a Pagar
//
// `schema` is the contract shared with the reconciler.

use crate::error::WorkPaperError;
use crate::invoice::InvoiceRecord;
use crate::tax::ComputationResult;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_xlsxwriter::{DocProperties, Format, Workbook, Worksheet};
use tracing::info;

// ============================================================================
// SCHEMA
// ============================================================================

pub mod schema {
    pub const LINE_ITEMS_SHEET: &str = "Facturacion";
    pub const COMPUTATION_SHEET: &str = "Calculo ISR";
    pub const SUMMARY_SHEET: &str = "RESUMEN";

    pub const COL_SOURCE_NAME: &str = "archivo";
    pub const COL_UUID: &str = "uuid";
    pub const COL_ISSUED_AT: &str = "fecha";
    pub const COL_ISSUER_RFC: &str = "emisor_rfc";
    pub const COL_RECEIVER_RFC: &str = "receptor_rfc";
    pub const COL_SUBTOTAL: &str = "subtotal";
    pub const COL_TOTAL: &str = "total";
    pub const COL_WITHHELD_ISR: &str = "isr_retenido";
    pub const COL_ERROR: &str = "error";

    /// Same names and order as `InvoiceRecord`'s serde fields
    pub const LINE_ITEM_COLUMNS: [&str; 9] = [
        COL_SOURCE_NAME,
        COL_UUID,
        COL_ISSUED_AT,
        COL_ISSUER_RFC,
        COL_RECEIVER_RFC,
        COL_SUBTOTAL,
        COL_TOTAL,
        COL_WITHHELD_ISR,
        COL_ERROR,
    ];

    pub const CONCEPT_HEADER: &str = "Concepto";
    pub const INCOME_LABEL: &str = "Ingresos cobrados del mes";
    pub const RATE_LABEL: &str = "Tasa aplicable";
    pub const TAX_LABEL: &str = "Impuesto Causado";
    pub const WITHHELD_LABEL: &str = "ISR retenido";
    pub const NET_DUE_LABEL: &str = "Total a pagar";

    pub const ISR_DUE_LABEL: &str = "ISR a Pagar";
    pub const VAT_DUE_LABEL: &str = "IVA a Pagar";
}

use schema::*;

// ============================================================================
// WRITER
// ============================================================================

struct Formats {
    header: Format,
    money: Format,
    percent: Format,
    datetime: Format,
}

impl Formats {
    fn new() -> Self {
        Formats {
            header: Format::new().set_bold(),
            money: Format::new().set_num_format("#,##0.00"),
            percent: Format::new().set_num_format("0.0%"),
            datetime: Format::new().set_num_format("yyyy-mm-dd hh:mm:ss"),
        }
    }
}

// Decimal::to_f64 always returns Some (the 96-bit mantissa is within f64
// range); digits past ~15 significant figures are rounded away.
fn number(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

/// Serialize a filing into `.xlsx` bytes.
///
/// `records` are written as given (see `tax::work_paper_records` for the
/// pre-filtered subset). Filer identity goes into the document properties so
/// the three sheet grids keep their fixed shape.
pub fn write(
    records: &[InvoiceRecord],
    computation: &ComputationResult,
    filer_id: &str,
    filer_name: Option<&str>,
    period_label: &str,
) -> Result<Vec<u8>, WorkPaperError> {
    let formats = Formats::new();
    let mut workbook = Workbook::new();

    let properties = DocProperties::new()
        .set_title("Papel de trabajo ISR")
        .set_subject(&format!("{} {}", filer_id, period_label))
        .set_author(filer_name.unwrap_or(filer_id))
        .set_company(filer_id);
    workbook.set_properties(&properties);

    write_line_items(workbook.add_worksheet(), records, &formats)?;
    write_computation(workbook.add_worksheet(), computation, period_label, &formats)?;
    write_summary(workbook.add_worksheet(), computation, &formats)?;

    let bytes = workbook.save_to_buffer()?;
    info!(
        rows = records.len(),
        period = %computation.period,
        bytes = bytes.len(),
        "work paper written"
    );
    Ok(bytes)
}

fn write_line_items(
    sheet: &mut Worksheet,
    records: &[InvoiceRecord],
    formats: &Formats,
) -> Result<(), WorkPaperError> {
    sheet.set_name(LINE_ITEMS_SHEET)?;

    for (col, name) in LINE_ITEM_COLUMNS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *name, &formats.header)?;
    }
    sheet.set_column_width(0, 32)?;
    sheet.set_column_width(1, 38)?;
    sheet.set_column_width(2, 20)?;

    for (index, record) in records.iter().enumerate() {
        let row = (index + 1) as u32;
        sheet.write_string(row, 0, &record.source_name)?;

        // Failed documents: name + cause only, financial cells stay empty
        if let Some(cause) = &record.error {
            sheet.write_string(row, 8, cause)?;
            continue;
        }

        sheet.write_string(row, 1, &record.fiscal_uuid)?;
        if let Some(issued_at) = &record.issued_at {
            sheet.write_datetime_with_format(row, 2, issued_at, &formats.datetime)?;
        }
        sheet.write_string(row, 3, &record.issuer_rfc)?;
        sheet.write_string(row, 4, &record.receiver_rfc)?;
        sheet.write_number_with_format(row, 5, number(record.subtotal), &formats.money)?;
        sheet.write_number_with_format(row, 6, number(record.total), &formats.money)?;
        sheet.write_number_with_format(row, 7, number(record.withheld_isr), &formats.money)?;
    }

    Ok(())
}

fn write_computation(
    sheet: &mut Worksheet,
    computation: &ComputationResult,
    period_label: &str,
    formats: &Formats,
) -> Result<(), WorkPaperError> {
    sheet.set_name(COMPUTATION_SHEET)?;
    sheet.set_column_width(0, 28)?;
    sheet.set_column_width(1, 18)?;

    sheet.write_string_with_format(0, 0, CONCEPT_HEADER, &formats.header)?;
    sheet.write_string_with_format(0, 1, period_label, &formats.header)?;

    let rows = [
        (INCOME_LABEL, computation.total_income, &formats.money),
        (RATE_LABEL, computation.rate, &formats.percent),
        (TAX_LABEL, computation.tax_before_withholding, &formats.money),
        (WITHHELD_LABEL, computation.withheld_isr, &formats.money),
        (NET_DUE_LABEL, computation.net_due, &formats.money),
    ];
    for (offset, (label, value, format)) in rows.into_iter().enumerate() {
        let row = (offset + 1) as u32;
        sheet.write_string(row, 0, label)?;
        sheet.write_number_with_format(row, 1, number(value), format)?;
    }

    Ok(())
}

fn write_summary(
    sheet: &mut Worksheet,
    computation: &ComputationResult,
    formats: &Formats,
) -> Result<(), WorkPaperError> {
    sheet.set_name(SUMMARY_SHEET)?;
    sheet.set_column_width(0, 16)?;

    sheet.write_string(0, 0, ISR_DUE_LABEL)?;
    sheet.write_number_with_format(0, 1, number(computation.net_due), &formats.money)?;
    sheet.write_string(1, 0, VAT_DUE_LABEL)?;
    sheet.write_number_with_format(1, 1, number(computation.vat_due), &formats.money)?;

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
