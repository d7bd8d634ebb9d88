// 🏗️ CFDI Extractor - zip of signed XML invoices → InvoiceRecord list
// One bad document never aborts the batch: it becomes an error record.

use crate::config::ValidatorConfig;
use crate::error::{ExtractionError, InputContractError};
use crate::invoice::{InvoiceRecord, UUID_NOT_FOUND};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use roxmltree::Node;
use rust_decimal::Decimal;
use std::io::{Cursor, Read};
use std::str::FromStr;
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// CFDI 4.0 primary namespace (`cfdi:` prefix)
pub const CFDI_NAMESPACE: &str = "http://www.sat.gob.mx/cfd/4";

/// Digital stamp namespace (`tfd:` prefix)
pub const TFD_NAMESPACE: &str = "http://www.sat.gob.mx/TimbreFiscalDigital";

// ============================================================================
// CORE TYPES
// ============================================================================

/// ParsedDocument - output of `InvoiceParser::parse` for one entry
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub record: InvoiceRecord,

    /// `Emisor/@Nombre`, trimmed, `None` when absent or blank
    pub issuer_name: Option<String>,
}

/// Every candidate entry of one archive, in archive order
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedBatch {
    pub records: Vec<InvoiceRecord>,

    /// First non-empty issuer name among successfully parsed entries
    pub declared_filer_name: Option<String>,
}

impl ExtractedBatch {
    pub fn document_count(&self) -> usize {
        self.records.len()
    }

    pub fn error_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_error()).count()
    }

    /// Sum of `Total` over successfully parsed documents
    pub fn total_invoiced(&self) -> Decimal {
        self.records
            .iter()
            .filter(|r| r.is_ok())
            .map(|r| r.total)
            .sum()
    }

    pub fn errors(&self) -> impl Iterator<Item = &InvoiceRecord> {
        self.records.iter().filter(|r| r.is_error())
    }
}

// ============================================================================
// COMPOSABLE TRAITS
// ============================================================================

/// InvoiceParser - turns one document's bytes into a record
pub trait InvoiceParser: Send + Sync {
    fn parse(&self, source_name: &str, bytes: &[u8]) -> Result<ParsedDocument, ExtractionError>;

    /// Best-effort issuance date of a document `parse` rejected
    fn issued_at(&self, _bytes: &[u8]) -> Option<NaiveDateTime> {
        None
    }

    /// Document schema version this parser understands
    fn version(&self) -> &str {
        "4.0"
    }
}

/// FileValidator - decides which archive entries are candidate documents
///
/// Entries rejected here are skipped silently, they never become records.
pub trait FileValidator {
    fn can_parse(&self, entry_name: &str) -> bool;
}

// ============================================================================
// CFDI 4.0 PARSER
// ============================================================================

#[derive(Debug, Clone)]
pub struct CfdiParser {
    income_tax_code: String,
    document_extension: String,
    ignored_prefix: String,
}

impl CfdiParser {
    pub fn new() -> Self {
        Self::from_config(&ValidatorConfig::default())
    }

    pub fn from_config(config: &ValidatorConfig) -> Self {
        CfdiParser {
            income_tax_code: config.income_tax_code.clone(),
            document_extension: config.document_extension.to_lowercase(),
            ignored_prefix: config.ignored_prefix.clone(),
        }
    }
}

impl Default for CfdiParser {
    fn default() -> Self {
        Self::new()
    }
}

impl InvoiceParser for CfdiParser {
    fn parse(&self, source_name: &str, bytes: &[u8]) -> Result<ParsedDocument, ExtractionError> {
        let doc = roxmltree::Document::parse(document_text(bytes)?)?;
        let root = doc.root_element();

        let issued_at = root.attribute("Fecha").map(parse_issued_at).transpose()?;
        let subtotal = parse_amount("SubTotal", required_attr(root, "cfdi:Comprobante", "SubTotal")?)?;
        let total = parse_amount("Total", required_attr(root, "cfdi:Comprobante", "Total")?)?;

        let emisor = cfdi_child(root, "Emisor").ok_or(ExtractionError::MissingElement("cfdi:Emisor"))?;
        let issuer_rfc = required_attr(emisor, "cfdi:Emisor", "Rfc")?;
        let issuer_name = emisor
            .attribute("Nombre")
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        let receptor =
            cfdi_child(root, "Receptor").ok_or(ExtractionError::MissingElement("cfdi:Receptor"))?;
        let receiver_rfc = required_attr(receptor, "cfdi:Receptor", "Rfc")?;

        // First ISR withholding anywhere in the document
        let withheld_isr = match root.descendants().find(|n| {
            n.has_tag_name((CFDI_NAMESPACE, "Retencion"))
                && n.attribute("Impuesto") == Some(self.income_tax_code.as_str())
        }) {
            Some(node) => parse_amount("Importe", required_attr(node, "cfdi:Retencion", "Importe")?)?,
            None => Decimal::ZERO,
        };

        // Missing stamp is informational only
        let fiscal_uuid = root
            .descendants()
            .find(|n| n.has_tag_name((TFD_NAMESPACE, "TimbreFiscalDigital")))
            .and_then(|n| n.attribute("UUID"))
            .map(str::to_string)
            .unwrap_or_else(|| UUID_NOT_FOUND.to_string());

        Ok(ParsedDocument {
            record: InvoiceRecord {
                source_name: source_name.to_string(),
                fiscal_uuid,
                issued_at,
                issuer_rfc: issuer_rfc.trim().to_string(),
                receiver_rfc: receiver_rfc.trim().to_string(),
                subtotal,
                total,
                withheld_isr,
                error: None,
            },
            issuer_name,
        })
    }

    fn issued_at(&self, bytes: &[u8]) -> Option<NaiveDateTime> {
        let text = document_text(bytes).ok()?;
        let doc = roxmltree::Document::parse(text).ok()?;
        doc.root_element()
            .attribute("Fecha")
            .and_then(|raw| parse_issued_at(raw).ok())
    }
}

impl FileValidator for CfdiParser {
    fn can_parse(&self, entry_name: &str) -> bool {
        if !self.ignored_prefix.is_empty() && entry_name.starts_with(&self.ignored_prefix) {
            return false;
        }
        entry_name.to_lowercase().ends_with(&self.document_extension)
    }
}

/// UTF-8 text without a leading BOM
fn document_text(bytes: &[u8]) -> Result<&str, ExtractionError> {
    let text = std::str::from_utf8(bytes)?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text))
}

fn cfdi_child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.has_tag_name((CFDI_NAMESPACE, name)))
}

fn required_attr<'a, 'input>(
    node: Node<'a, 'input>,
    element: &'static str,
    attribute: &'static str,
) -> Result<&'a str, ExtractionError> {
    node.attribute(attribute)
        .ok_or(ExtractionError::MissingAttribute { element, attribute })
}

fn parse_amount(attribute: &'static str, raw: &str) -> Result<Decimal, ExtractionError> {
    let amount = Decimal::from_str(raw.trim()).map_err(|source| ExtractionError::InvalidAmount {
        attribute,
        value: raw.to_string(),
        source,
    })?;

    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(ExtractionError::NegativeAmount {
            attribute,
            value: raw.to_string(),
        });
    }

    Ok(amount)
}

/// Normalize a CFDI `Fecha` into naive local time.
///
/// Accepts `T` or space as separator, an optional trailing `Z`, optional
/// fractional seconds and an optional `±HH:MM` offset (dropped, clock time kept).
/// A bare date is midnight.
pub fn parse_issued_at(raw: &str) -> Result<NaiveDateTime, ExtractionError> {
    let trimmed = raw.trim();
    let without_zulu = trimmed
        .strip_suffix('Z')
        .or_else(|| trimmed.strip_suffix('z'))
        .unwrap_or(trimmed);
    let normalized = without_zulu.replacen('T', " ", 1);

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(&normalized, format) {
            return Ok(parsed);
        }
    }

    for format in ["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%.f%:z"] {
        if let Ok(parsed) = DateTime::parse_from_str(&normalized, format) {
            return Ok(parsed.naive_local());
        }
    }

    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .map(|date| date.and_time(NaiveTime::MIN))
        .map_err(|source| ExtractionError::InvalidDate {
            value: raw.to_string(),
            source,
        })
}

// ============================================================================
// ARCHIVE EXTRACTOR
// ============================================================================

/// InvoiceExtractor - walks a zip archive and parses every candidate entry
pub struct InvoiceExtractor<P: InvoiceParser + FileValidator = CfdiParser> {
    parser: P,
}

impl InvoiceExtractor<CfdiParser> {
    pub fn new() -> Self {
        InvoiceExtractor {
            parser: CfdiParser::new(),
        }
    }

    pub fn from_config(config: &ValidatorConfig) -> Self {
        InvoiceExtractor {
            parser: CfdiParser::from_config(config),
        }
    }
}

impl Default for InvoiceExtractor<CfdiParser> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: InvoiceParser + FileValidator> InvoiceExtractor<P> {
    pub fn with_parser(parser: P) -> Self {
        InvoiceExtractor { parser }
    }

    /// Parse a single named document
    pub fn extract_entry(&self, name: &str, bytes: &[u8]) -> Result<ParsedDocument, ExtractionError> {
        self.parser.parse(name, bytes)
    }

    /// Extract every candidate entry of a zip archive.
    ///
    /// Only a container that is not a zip at all is an error; per-entry
    /// failures come back as error records in their archive position.
    pub fn extract_archive(&self, archive: &[u8]) -> Result<ExtractedBatch, InputContractError> {
        if archive.is_empty() {
            return Err(InputContractError::EmptyArchive);
        }

        let mut zip = ZipArchive::new(Cursor::new(archive))?;
        let mut outcomes: Vec<EntryOutcome> = Vec::new();

        for index in 0..zip.len() {
            // Filter on the central-directory name before opening the entry
            let Some(name) = zip.name_for_index(index).map(str::to_string) else {
                continue;
            };
            if name.ends_with('/') || !self.parser.can_parse(&name) {
                continue;
            }
            debug!(entry = %name, "parsing CFDI entry");

            let mut bytes = Vec::new();
            let result = match zip.by_index(index) {
                Ok(mut entry) => match entry.read_to_end(&mut bytes) {
                    Ok(_) => self.parser.parse(&name, &bytes),
                    Err(err) => Err(ExtractionError::from(err)),
                },
                Err(err) => Err(ExtractionError::Archive(err)),
            };

            // Failed documents keep their date when it was readable
            let issued_at = match &result {
                Ok(_) => None,
                Err(_) => self.parser.issued_at(&bytes),
            };
            outcomes.push(EntryOutcome {
                name,
                result,
                issued_at,
            });
        }

        let declared_filer_name = declared_filer_name(&outcomes);

        let records: Vec<InvoiceRecord> = outcomes
            .into_iter()
            .map(|outcome| match outcome.result {
                Ok(parsed) => parsed.record,
                Err(err) => {
                    warn!(entry = %outcome.name, error = %err, "CFDI entry failed extraction");
                    InvoiceRecord::failed(outcome.name, &err).dated(outcome.issued_at)
                }
            })
            .collect();

        let batch = ExtractedBatch {
            records,
            declared_filer_name,
        };
        info!(
            documents = batch.document_count(),
            errors = batch.error_count(),
            "archive extracted"
        );
        Ok(batch)
    }
}

/// One candidate entry, before it becomes a record
struct EntryOutcome {
    name: String,
    result: Result<ParsedDocument, ExtractionError>,
    issued_at: Option<NaiveDateTime>,
}

/// First non-empty issuer name in archive order (failed entries contribute nothing)
fn declared_filer_name(outcomes: &[EntryOutcome]) -> Option<String> {
    outcomes
        .iter()
        .filter_map(|outcome| outcome.result.as_ref().ok())
        .find_map(|parsed| parsed.issuer_name.clone())
}

/// Extract with default settings
pub fn extract_archive(archive: &[u8]) -> Result<ExtractedBatch, InputContractError> {
    InvoiceExtractor::new().extract_archive(archive)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    pub(crate) struct CfdiFixture<'a> {
        pub fecha: &'a str,
        pub issuer: &'a str,
        pub issuer_name: &'a str,
        pub receiver: &'a str,
        pub subtotal: &'a str,
        pub total: &'a str,
        pub isr_withheld: Option<&'a str>,
        pub uuid: Option<&'a str>,
    }

    impl<'a> Default for CfdiFixture<'a> {
        fn default() -> Self {
            CfdiFixture {
                fecha: "2024-06-15T10:30:00",
                issuer: "AAA010101AAA",
                issuer_name: "ARRENDADORA DEMO",
                receiver: "CUPU800825569",
                subtotal: "20000.00",
                total: "23200.00",
                isr_withheld: None,
                uuid: Some("5FB2822E-396D-4725-8521-CDC4BDD20CCF"),
            }
        }
    }

    impl<'a> CfdiFixture<'a> {
        pub(crate) fn xml(&self) -> String {
            let impuestos = match self.isr_withheld {
                Some(importe) => format!(
                    r#"<cfdi:Impuestos TotalImpuestosRetenidos="{importe}">
    <cfdi:Retenciones>
      <cfdi:Retencion Impuesto="002" Importe="999.99"/>
      <cfdi:Retencion Impuesto="001" Importe="{importe}"/>
    </cfdi:Retenciones>
  </cfdi:Impuestos>"#
                ),
                None => String::new(),
            };
            let complemento = match self.uuid {
                Some(uuid) => format!(
                    r#"<cfdi:Complemento>
    <tfd:TimbreFiscalDigital Version="1.1" UUID="{uuid}" FechaTimbrado="2024-06-15T10:31:00"/>
  </cfdi:Complemento>"#
                ),
                None => String::new(),
            };

            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<cfdi:Comprobante xmlns:cfdi="http://www.sat.gob.mx/cfd/4" xmlns:tfd="http://www.sat.gob.mx/TimbreFiscalDigital" Version="4.0" Fecha="{fecha}" SubTotal="{subtotal}" Total="{total}" Moneda="MXN" TipoDeComprobante="I">
  <cfdi:Emisor Rfc="{issuer}" Nombre="{issuer_name}" RegimenFiscal="626"/>
  <cfdi:Receptor Rfc="{receiver}" Nombre="CLIENTE" UsoCFDI="G03"/>
  <cfdi:Conceptos>
    <cfdi:Concepto ClaveProdServ="80131500" Cantidad="1" Descripcion="Arrendamiento" ValorUnitario="{subtotal}" Importe="{subtotal}"/>
  </cfdi:Conceptos>
  {impuestos}
  {complemento}
</cfdi:Comprobante>"#,
                fecha = self.fecha,
                subtotal = self.subtotal,
                total = self.total,
                issuer = self.issuer,
                issuer_name = self.issuer_name,
                receiver = self.receiver,
                impuestos = impuestos,
                complemento = complemento,
            )
        }
    }

    pub(crate) fn build_archive(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in entries {
            if name.ends_with('/') {
                zip.add_directory(*name, SimpleFileOptions::default()).unwrap();
                continue;
            }
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    /// Overwrite one field of an entry's local and central headers.
    /// `offsets` is (local, central) relative to each header signature.
    fn patch_entry_headers(archive: &mut [u8], entry: &str, offsets: (usize, usize), value: &[u8]) {
        let name = entry.as_bytes();
        let headers: [(&[u8], usize, usize); 2] =
            [(b"PK\x03\x04", offsets.0, 30), (b"PK\x01\x02", offsets.1, 46)];

        for (signature, field_at, name_at) in headers {
            let mut patched = 0;
            for start in 0..archive.len().saturating_sub(name_at + name.len()) {
                if &archive[start..start + 4] == signature
                    && &archive[start + name_at..start + name_at + name.len()] == name
                {
                    archive[start + field_at..start + field_at + value.len()].copy_from_slice(value);
                    patched += 1;
                }
            }
            assert_eq!(patched, 1, "header for {} not found", entry);
        }
    }

    fn flag_compression(archive: &mut [u8], entry: &str, method: u16) {
        patch_entry_headers(archive, entry, (8, 10), &method.to_le_bytes());
    }

    #[test]
    fn test_parses_full_document() {
        let xml = CfdiFixture {
            receiver: "BBB020202BB1",
            subtotal: "10000.00",
            total: "11490.00",
            isr_withheld: Some("110.00"),
            ..Default::default()
        }
        .xml();

        let parsed = CfdiParser::new().parse("junio/f1.xml", xml.as_bytes()).unwrap();
        let record = parsed.record;

        assert!(record.is_ok());
        assert_eq!(record.source_name, "junio/f1.xml");
        assert_eq!(record.fiscal_uuid, "5FB2822E-396D-4725-8521-CDC4BDD20CCF");
        assert_eq!(record.issuer_rfc, "AAA010101AAA");
        assert_eq!(record.receiver_rfc, "BBB020202BB1");
        assert_eq!(record.subtotal, dec!(10000.00));
        assert_eq!(record.total, dec!(11490.00));
        // 002 (IVA) retention is ignored, 001 (ISR) is taken
        assert_eq!(record.withheld_isr, dec!(110.00));
        assert_eq!(
            record.issued_at,
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap().and_hms_opt(10, 30, 0)
        );
        assert_eq!(parsed.issuer_name.as_deref(), Some("ARRENDADORA DEMO"));
    }

    #[test]
    fn test_missing_withholding_and_stamp() {
        let xml = CfdiFixture {
            uuid: None,
            ..Default::default()
        }
        .xml();

        let record = CfdiParser::new().parse("f.xml", xml.as_bytes()).unwrap().record;

        assert_eq!(record.withheld_isr, Decimal::ZERO);
        assert_eq!(record.fiscal_uuid, UUID_NOT_FOUND);
        assert!(record.is_ok());
    }

    #[test]
    fn test_timestamp_normalization() {
        let expected = NaiveDate::from_ymd_opt(2024, 6, 15)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();

        assert_eq!(parse_issued_at("2024-06-15T10:30:00").unwrap(), expected);
        assert_eq!(parse_issued_at("2024-06-15T10:30:00Z").unwrap(), expected);
        assert_eq!(parse_issued_at("2024-06-15 10:30:00").unwrap(), expected);
        assert_eq!(parse_issued_at(" 2024-06-15T10:30:00 ").unwrap(), expected);
        // Offset is dropped, local clock time kept
        assert_eq!(parse_issued_at("2024-06-15T10:30:00-06:00").unwrap(), expected);

        let with_millis = parse_issued_at("2024-06-15T10:30:00.250").unwrap();
        assert_eq!(with_millis.date(), expected.date());

        assert_eq!(
            parse_issued_at("2024-06-15").unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap().and_hms_opt(0, 0, 0).unwrap()
        );

        assert!(matches!(
            parse_issued_at("15/06/2024"),
            Err(ExtractionError::InvalidDate { .. })
        ));
    }

    #[test]
    fn test_missing_receptor_is_error() {
        let xml = CfdiFixture::default()
            .xml()
            .replace(r#"<cfdi:Receptor Rfc="CUPU800825569" Nombre="CLIENTE" UsoCFDI="G03"/>"#, "");

        let err = CfdiParser::new().parse("f.xml", xml.as_bytes()).unwrap_err();
        assert!(matches!(err, ExtractionError::MissingElement("cfdi:Receptor")));
    }

    #[test]
    fn test_bad_amount_is_error() {
        let xml = CfdiFixture {
            subtotal: "veinte mil",
            ..Default::default()
        }
        .xml();
        let err = CfdiParser::new().parse("f.xml", xml.as_bytes()).unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidAmount { attribute: "SubTotal", .. }));

        let xml = CfdiFixture {
            total: "-5.00",
            ..Default::default()
        }
        .xml();
        let err = CfdiParser::new().parse("f.xml", xml.as_bytes()).unwrap_err();
        assert!(matches!(err, ExtractionError::NegativeAmount { attribute: "Total", .. }));
    }

    #[test]
    fn test_missing_fecha_keeps_record() {
        let xml = CfdiFixture::default()
            .xml()
            .replace(r#"Fecha="2024-06-15T10:30:00" "#, "");

        let record = CfdiParser::new().parse("f.xml", xml.as_bytes()).unwrap().record;
        assert!(record.is_ok());
        assert!(record.issued_at.is_none());
    }

    #[test]
    fn test_candidate_entries_only() {
        let xml = CfdiFixture::default().xml().into_bytes();
        let archive = build_archive(&[
            ("junio/", Vec::new()),
            ("junio/a.xml", xml.clone()),
            ("junio/B.XML", xml.clone()),
            ("__MACOSX/junio/._a.xml", b"\x00\x05\x16\x07".to_vec()),
            ("leeme.txt", b"hola".to_vec()),
            ("junio/c.pdf", b"%PDF".to_vec()),
        ]);

        let batch = extract_archive(&archive).unwrap();

        assert_eq!(batch.document_count(), 2);
        assert_eq!(batch.records[0].source_name, "junio/a.xml");
        assert_eq!(batch.records[1].source_name, "junio/B.XML");
        assert_eq!(batch.error_count(), 0);
    }

    #[test]
    fn test_malformed_entry_is_isolated() {
        let good = |subtotal: &'static str| {
            CfdiFixture {
                subtotal,
                ..Default::default()
            }
            .xml()
            .into_bytes()
        };
        let archive = build_archive(&[
            ("1.xml", good("100.00")),
            ("2.xml", good("200.00")),
            ("3.xml", b"<cfdi:Comprobante><sin cerrar".to_vec()),
            ("4.xml", good("400.00")),
            ("5.xml", good("500.00")),
        ]);

        let batch = extract_archive(&archive).unwrap();

        assert_eq!(batch.records.len(), 5);
        assert_eq!(batch.error_count(), 1);

        let failed = &batch.records[2];
        assert_eq!(failed.source_name, "3.xml");
        assert!(failed.error.as_deref().unwrap().starts_with("Error al procesar:"));

        for record in batch.records.iter().filter(|r| r.is_ok()) {
            assert!(record.subtotal > Decimal::ZERO);
            assert!(record.issued_at.is_some());
            assert!(!record.issuer_rfc.is_empty());
        }
        assert_eq!(batch.records[4].subtotal, dec!(500.00));
    }

    #[test]
    fn test_unopenable_entries_keep_their_name() {
        let xml = CfdiFixture::default().xml().into_bytes();
        let mut archive = build_archive(&[
            ("a.xml", xml.clone()),
            ("leeme.txt", b"hola".to_vec()),
            ("junio/b.xml", xml),
        ]);
        // bzip2 is not compiled in, so neither entry can be opened
        flag_compression(&mut archive, "leeme.txt", 12);
        flag_compression(&mut archive, "junio/b.xml", 12);

        let batch = extract_archive(&archive).unwrap();

        // Non-candidates are skipped before opening
        assert_eq!(batch.document_count(), 2);
        assert!(batch.records[0].is_ok());

        let failed = &batch.records[1];
        assert_eq!(failed.source_name, "junio/b.xml");
        assert!(failed.error.as_deref().unwrap().contains("could not open archive entry"));
        assert!(failed.issued_at.is_none());
    }

    #[test]
    fn test_declared_size_is_not_trusted() {
        let mut archive = build_archive(&[("f.xml", CfdiFixture::default().xml().into_bytes())]);
        patch_entry_headers(&mut archive, "f.xml", (22, 24), &0xFFFF_FFF0u32.to_le_bytes());

        let batch = extract_archive(&archive).unwrap();

        assert_eq!(batch.document_count(), 1);
        assert_eq!(batch.records[0].source_name, "f.xml");
    }

    #[test]
    fn test_failed_document_counts_in_its_period() {
        let archive = build_archive(&[
            ("ok.xml", CfdiFixture::default().xml().into_bytes()),
            (
                "bad.xml",
                CfdiFixture {
                    fecha: "2024-06-28T12:00:00",
                    subtotal: "N/A",
                    ..Default::default()
                }
                .xml()
                .into_bytes(),
            ),
            ("roto.xml", b"<cfdi:Comprobante".to_vec()),
        ]);

        let batch = extract_archive(&archive).unwrap();

        let bad = &batch.records[1];
        assert!(bad.is_error());
        assert_eq!(
            bad.issued_at,
            NaiveDate::from_ymd_opt(2024, 6, 28).unwrap().and_hms_opt(12, 0, 0)
        );
        assert_eq!(bad.subtotal, Decimal::ZERO);
        // Unparseable XML has no readable date
        assert!(batch.records[2].issued_at.is_none());

        let result = crate::tax::calculate(&batch.records, "AAA010101AAA", 6, 2024);
        assert_eq!(result.records_in_period, 2);
        assert_eq!(result.total_income, dec!(20000.00));
    }

    #[test]
    fn test_declared_filer_name_first_non_empty() {
        let named = |issuer_name: &'static str| {
            CfdiFixture {
                issuer_name,
                ..Default::default()
            }
            .xml()
            .into_bytes()
        };
        let archive = build_archive(&[
            ("1.xml", named("")),
            ("2.xml", b"not xml".to_vec()),
            ("3.xml", named("JUAN PEREZ LOPEZ")),
            ("4.xml", named("OTRO NOMBRE")),
        ]);

        let batch = extract_archive(&archive).unwrap();
        assert_eq!(batch.declared_filer_name.as_deref(), Some("JUAN PEREZ LOPEZ"));
    }

    #[test]
    fn test_total_invoiced_skips_errors() {
        let archive = build_archive(&[
            ("1.xml", CfdiFixture::default().xml().into_bytes()),
            ("2.xml", b"<roto>".to_vec()),
        ]);

        let batch = extract_archive(&archive).unwrap();
        assert_eq!(batch.total_invoiced(), dec!(23200.00));
        assert_eq!(batch.errors().count(), 1);
    }

    #[test]
    fn test_rejects_non_archive() {
        assert!(matches!(extract_archive(&[]), Err(InputContractError::EmptyArchive)));
        assert!(matches!(
            extract_archive(b"esto no es un zip"),
            Err(InputContractError::NotAnArchive(_))
        ));
    }

    #[test]
    fn test_custom_extension_from_config() {
        let config = ValidatorConfig {
            document_extension: ".cfdi".to_string(),
            ..Default::default()
        };
        let parser = CfdiParser::from_config(&config);

        assert!(parser.can_parse("a.CFDI"));
        assert!(!parser.can_parse("a.xml"));
        assert!(!parser.can_parse("__MACOSX/a.cfdi"));
    }
}
