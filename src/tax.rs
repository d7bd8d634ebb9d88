// 🧮 Tax Calculator - Simplified-regime (RESICO) monthly ISR
// Pure: records + filer RFC + period in, ComputationResult out.
//
//   net_due = total_income × rate − withheld_isr
//
// No rounding and no clamping: a negative net_due is a favorable balance.

use crate::error::InputContractError;
use crate::invoice::InvoiceRecord;
use chrono::{Datelike, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

const MONTH_NAMES: [&str; 12] = [
    "Enero", "Febrero", "Marzo", "Abril", "Mayo", "Junio", "Julio", "Agosto", "Septiembre",
    "Octubre", "Noviembre", "Diciembre",
];

// ============================================================================
// PERIOD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self, InputContractError> {
        if !(1..=12).contains(&month) {
            return Err(InputContractError::InvalidPeriod { year, month });
        }
        Ok(Period { year, month })
    }

    pub fn contains(&self, moment: &NaiveDateTime) -> bool {
        moment.year() == self.year && moment.month() == self.month
    }

    /// Column header used in the work paper, e.g. "Junio 2024"
    pub fn label(&self) -> String {
        match MONTH_NAMES.get((self.month as usize).wrapping_sub(1)) {
            Some(name) => format!("{} {}", name, self.year),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

// ============================================================================
// BRACKETS
// ============================================================================

/// Rate for a month's total income (inclusive upper bounds)
///
/// | income ≤     | rate |
/// |--------------|------|
/// | 25,000.00    | 1.0% |
/// | 50,000.00    | 1.1% |
/// | 83,333.33    | 1.5% |
/// | 208,333.33   | 2.0% |
/// | above        | 2.5% |
pub fn applicable_rate(total_income: Decimal) -> Decimal {
    if total_income <= dec!(25000) {
        dec!(0.010)
    } else if total_income <= dec!(50000) {
        dec!(0.011)
    } else if total_income <= dec!(83333.33) {
        dec!(0.015)
    } else if total_income <= dec!(208333.33) {
        dec!(0.020)
    } else {
        dec!(0.025)
    }
}

// ============================================================================
// COMPUTATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputationResult {
    pub period: Period,

    /// Σ subtotal of income records ("Ingresos cobrados del mes")
    pub total_income: Decimal,

    /// Bracket rate as a fraction (0.011 = 1.1%)
    pub rate: Decimal,

    /// "Impuesto Causado"
    pub tax_before_withholding: Decimal,

    /// Σ ISR withheld by legal-entity receivers ("ISR retenido")
    pub withheld_isr: Decimal,

    /// "Total a pagar", may be negative
    pub net_due: Decimal,

    /// Always 0 in this regime
    pub vat_due: Decimal,

    /// Records dated inside the period, qualifying or not
    pub records_in_period: usize,
}

impl ComputationResult {
    pub fn rate_percent(&self) -> Decimal {
        self.rate * dec!(100)
    }

    /// Withholding exceeds the liability
    pub fn is_favorable(&self) -> bool {
        self.net_due < Decimal::ZERO
    }

    pub fn summary(&self) -> String {
        format!(
            "ISR {}: ingresos ${}, tasa {}%, causado ${}, retenido ${}, a pagar ${}",
            self.period,
            self.total_income,
            self.rate_percent().normalize(),
            self.tax_before_withholding,
            self.withheld_isr,
            self.net_due
        )
    }
}

// ============================================================================
// CALCULATOR
// ============================================================================

fn in_period(record: &InvoiceRecord, period: &Period) -> bool {
    record
        .issued_at
        .as_ref()
        .map(|issued_at| period.contains(issued_at))
        .unwrap_or(false)
}

/// Income record: in period, parsed, issued by the filer (case-sensitive)
fn is_income(record: &InvoiceRecord, filer_id: &str, period: &Period) -> bool {
    in_period(record, period) && record.is_ok() && record.issuer_rfc == filer_id
}

/// Compute the month's ISR for `filer_id`.
///
/// `filer_id` is compared verbatim; callers normalize case beforehand.
pub fn calculate(
    records: &[InvoiceRecord],
    filer_id: &str,
    month: u32,
    year: i32,
) -> ComputationResult {
    let period = Period { year, month };

    let records_in_period = records.iter().filter(|r| in_period(r, &period)).count();
    let income: Vec<&InvoiceRecord> = records
        .iter()
        .filter(|r| is_income(r, filer_id, &period))
        .collect();

    let total_income: Decimal = income.iter().map(|r| r.subtotal).sum();
    let withheld_isr: Decimal = income
        .iter()
        .filter(|r| r.has_legal_entity_receiver())
        .map(|r| r.withheld_isr)
        .sum();

    let rate = applicable_rate(total_income);
    let tax_before_withholding = total_income * rate;
    let net_due = tax_before_withholding - withheld_isr;

    ComputationResult {
        period,
        total_income,
        rate,
        tax_before_withholding,
        withheld_isr,
        net_due,
        vat_due: Decimal::ZERO,
        records_in_period,
    }
}

/// Rows for the `Facturacion` sheet: the period's income records plus every
/// error record, in original order.
///
/// Writing this subset keeps the work paper pre-filtered, so summing its
/// line items reproduces the computation.
pub fn work_paper_records(
    records: &[InvoiceRecord],
    filer_id: &str,
    period: &Period,
) -> Vec<InvoiceRecord> {
    records
        .iter()
        .filter(|r| r.is_error() || is_income(r, filer_id, period))
        .cloned()
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ExtractionError;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    pub(crate) const FILER: &str = "AAA010101AAA";

    pub(crate) fn record(
        date: (i32, u32, u32),
        issuer: &str,
        receiver: &str,
        subtotal: Decimal,
        withheld: Decimal,
    ) -> InvoiceRecord {
        InvoiceRecord {
            source_name: format!("{}-{}.xml", issuer, subtotal),
            fiscal_uuid: "5FB2822E-396D-4725-8521-CDC4BDD20CCF".to_string(),
            issued_at: NaiveDate::from_ymd_opt(date.0, date.1, date.2)
                .unwrap()
                .and_hms_opt(12, 0, 0),
            issuer_rfc: issuer.to_string(),
            receiver_rfc: receiver.to_string(),
            subtotal,
            total: subtotal,
            withheld_isr: withheld,
            error: None,
        }
    }

    /// 20000 to an individual + 10000 to a legal entity with 110 withheld
    pub(crate) fn june_scenario() -> Vec<InvoiceRecord> {
        vec![
            record((2024, 6, 3), FILER, "CUPU800825569", dec!(20000), dec!(0)),
            record((2024, 6, 20), FILER, "BBB020202BB1", dec!(10000), dec!(110)),
        ]
    }

    #[test]
    fn test_reference_scenario() {
        let result = calculate(&june_scenario(), FILER, 6, 2024);

        assert_eq!(result.total_income, dec!(30000));
        assert_eq!(result.rate, dec!(0.011));
        assert_eq!(result.tax_before_withholding, dec!(330.00));
        assert_eq!(result.withheld_isr, dec!(110.00));
        assert_eq!(result.net_due, dec!(220.00));
        assert_eq!(result.vat_due, Decimal::ZERO);
        assert_eq!(result.records_in_period, 2);
        assert!(!result.is_favorable());

        println!("✅ {}", result.summary());
    }

    #[test]
    fn test_bracket_boundaries() {
        assert_eq!(applicable_rate(dec!(25000.00)), dec!(0.010));
        assert_eq!(applicable_rate(dec!(25000.01)), dec!(0.011));
        assert_eq!(applicable_rate(dec!(50000.00)), dec!(0.011));
        assert_eq!(applicable_rate(dec!(50000.01)), dec!(0.015));
        assert_eq!(applicable_rate(dec!(83333.33)), dec!(0.015));
        assert_eq!(applicable_rate(dec!(83333.34)), dec!(0.020));
        assert_eq!(applicable_rate(dec!(208333.33)), dec!(0.020));
        assert_eq!(applicable_rate(dec!(208333.34)), dec!(0.025));
    }

    #[test]
    fn test_zero_income() {
        let result = calculate(&[], FILER, 6, 2024);

        assert_eq!(result.total_income, Decimal::ZERO);
        assert_eq!(result.rate, dec!(0.010));
        assert_eq!(result.tax_before_withholding, Decimal::ZERO);
        assert_eq!(result.net_due, Decimal::ZERO);
        assert_eq!(result.records_in_period, 0);
    }

    #[test]
    fn test_individual_receiver_withholding_ignored() {
        let records = vec![record((2024, 6, 1), FILER, "CUPU800825569", dec!(1000), dec!(500))];
        let result = calculate(&records, FILER, 6, 2024);

        assert_eq!(result.withheld_isr, Decimal::ZERO);
        assert_eq!(result.net_due, dec!(10.00));
    }

    #[test]
    fn test_period_and_issuer_filtering() {
        let mut records = june_scenario();
        // Other month, other year, expense received by the filer
        records.push(record((2024, 7, 1), FILER, "BBB020202BB1", dec!(99999), dec!(99)));
        records.push(record((2023, 6, 1), FILER, "BBB020202BB1", dec!(88888), dec!(88)));
        records.push(record((2024, 6, 9), "CCC030303CC3", FILER, dec!(77777), dec!(77)));
        // Undated and failed documents
        let mut undated = record((2024, 6, 1), FILER, "BBB020202BB1", dec!(66666), dec!(66));
        undated.issued_at = None;
        records.push(undated);
        records.push(InvoiceRecord::failed("roto.xml", &ExtractionError::MissingElement("cfdi:Emisor")));

        let result = calculate(&records, FILER, 6, 2024);

        assert_eq!(result.total_income, dec!(30000));
        assert_eq!(result.withheld_isr, dec!(110));
        // Two income records + the expense are dated in June 2024
        assert_eq!(result.records_in_period, 3);
    }

    #[test]
    fn test_filer_comparison_is_case_sensitive() {
        let result = calculate(&june_scenario(), "aaa010101aaa", 6, 2024);
        assert_eq!(result.total_income, Decimal::ZERO);
    }

    #[test]
    fn test_negative_net_due_not_clamped() {
        let records = vec![record((2024, 6, 1), FILER, "BBB020202BB1", dec!(10000), dec!(1250.50))];
        let result = calculate(&records, FILER, 6, 2024);

        assert_eq!(result.tax_before_withholding, dec!(100.000));
        assert_eq!(result.net_due, dec!(-1150.50));
        assert!(result.is_favorable());
    }

    #[test]
    fn test_no_rounding() {
        let records = vec![record((2024, 6, 1), FILER, "CUPU800825569", dec!(1234.567), dec!(0))];
        let result = calculate(&records, FILER, 6, 2024);

        assert_eq!(result.tax_before_withholding, dec!(12.34567));
        assert_eq!(result.net_due, dec!(12.34567));
    }

    #[test]
    fn test_period_validation_and_label() {
        assert!(matches!(
            Period::new(2024, 13),
            Err(InputContractError::InvalidPeriod { year: 2024, month: 13 })
        ));
        assert!(Period::new(2024, 0).is_err());

        let period = Period::new(2024, 6).unwrap();
        assert_eq!(period.label(), "Junio 2024");
        assert_eq!(period.to_string(), "2024-06");
        assert_eq!(Period { year: 2024, month: 0 }.label(), "2024-00");
    }

    #[test]
    fn test_work_paper_records_keep_income_and_errors() {
        let mut records = june_scenario();
        records.insert(1, record((2024, 7, 1), FILER, "BBB020202BB1", dec!(5), dec!(0)));
        records.push(InvoiceRecord::failed("roto.xml", &ExtractionError::MissingElement("cfdi:Emisor")));

        let period = Period::new(2024, 6).unwrap();
        let rows = work_paper_records(&records, FILER, &period);

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].subtotal, dec!(20000));
        assert_eq!(rows[1].subtotal, dec!(10000));
        assert!(rows[2].is_error());
    }

    proptest! {
        #[test]
        fn prop_totals_invariant_to_order(
            rows in prop::collection::vec((0u32..5_000_000, any::<bool>(), 0u32..100_000), 0..40),
            rotation in 0usize..40,
        ) {
            let records: Vec<InvoiceRecord> = rows
                .iter()
                .map(|(cents, legal_entity, withheld)| {
                    let receiver = if *legal_entity { "BBB020202BB1" } else { "CUPU800825569" };
                    record(
                        (2024, 6, 15),
                        FILER,
                        receiver,
                        Decimal::new(*cents as i64, 2),
                        Decimal::new(*withheld as i64, 2),
                    )
                })
                .collect();

            let mut reordered = records.clone();
            reordered.reverse();
            if !reordered.is_empty() {
                let by = rotation % reordered.len();
                reordered.rotate_left(by);
            }

            let expected_income: Decimal = rows.iter().map(|(c, _, _)| Decimal::new(*c as i64, 2)).sum();
            let a = calculate(&records, FILER, 6, 2024);
            let b = calculate(&reordered, FILER, 6, 2024);

            prop_assert_eq!(a.total_income, expected_income);
            prop_assert_eq!(a, b);
        }
    }
}
