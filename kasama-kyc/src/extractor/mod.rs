//! Rule-based field extraction from OCR text
//!
//! **[KYC-FX-010]** Turns noisy OCR output into typed fields with per-field
//! confidences. Role-specific regex patterns apply in priority order;
//! per-field confidence is the product of the OCR mean confidence and the
//! pattern's specificity weight in [0.5, 1.0]. Fields that cannot be
//! extracted stay empty with a `None` confidence (never 0.0, which is a
//! legitimate low-confidence value).

pub mod dates;

use crate::types::{ClearanceType, ExtractedFields, FieldValue, IdType};
use dates::parse_date;
use once_cell::sync::Lazy;
use regex::Regex;

/// Inputs for one extraction pass
#[derive(Debug, Clone, Copy)]
pub struct ExtractionInput<'a> {
    /// Concatenated OCR text from ID_FRONT and ID_BACK
    pub id_text: &'a str,
    /// Mean OCR confidence over the ID documents (0.0-1.0)
    pub id_ocr_confidence: f64,
    /// Declared ID type, selects the pattern table
    pub id_type: IdType,
    /// OCR text from the CLEARANCE document, when present
    pub clearance_text: Option<&'a str>,
    /// Mean OCR confidence of the clearance document
    pub clearance_ocr_confidence: f64,
}

// Label patterns. Multi-line mode; the capture is the rest of the line
// after the label. Specificity weights reflect how unambiguous the label
// is on the physical card.

static RE_SURNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:APELYIDO\s*/\s*)?(?:SURNAME|LAST\s+NAME)\s*[:\-]?\s*(\S.*)$").unwrap()
});
static RE_GIVEN_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:MGA\s+PANGALAN\s*/\s*)?(?:GIVEN\s+NAMES?|FIRST\s+NAME)\s*[:\-]?\s*(\S.*)$")
        .unwrap()
});
static RE_MIDDLE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:GITNANG\s+APELYIDO\s*/\s*)?MIDDLE\s+NAME\s*[:\-]?\s*(\S.*)$").unwrap()
});
static RE_FULL_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*(?:FULL\s+)?NAME\s*[:\-]?\s*(\S.*)$").unwrap());
static RE_BIRTHDATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:PETSA\s+NG\s+KAPANGANAKAN\s*/\s*)?(?:DATE\s+OF\s+BIRTH|BIRTH\s*DATE)\s*[:\-]?\s*(\S.*)$")
        .unwrap()
});
static RE_PSN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*PSN\s*[:\-]?\s*([0-9][0-9\-\s]{10,22}[0-9])\s*$").unwrap());
static RE_ID_NO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:ID|LICENSE|PASSPORT|DOCUMENT)\s*(?:NO|NUMBER)\.?\s*[:\-]?\s*([A-Z0-9][A-Z0-9\-]{4,24})\s*$")
        .unwrap()
});
static RE_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:TIRAHAN\s*/\s*)?ADDRESS\s*[:\-]?\s*(\S.*)$").unwrap()
});
static RE_SEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:KASARIAN\s*/\s*)?SEX\s*[:\-]?\s*(M|F|MALE|FEMALE)\b").unwrap()
});
static RE_PLACE_OF_BIRTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:POOK\s+NG\s+KAPANGANAKAN\s*/\s*)?PLACE\s+OF\s+BIRTH\s*[:\-]?\s*(\S.*)$")
        .unwrap()
});
static RE_NATIONALITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:NATIONALITY|CITIZENSHIP)\s*[:\-]?\s*([A-Za-z\s]+?)\s*$").unwrap()
});

// Clearance patterns
static RE_CLEARANCE_NO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)(?:NBI|POLICE)?\s*CLEARANCE\s+NO\.?\s*[:\-]?\s*([A-Z0-9][A-Z0-9\-]{4,24})")
        .unwrap()
});
static RE_VALID_UNTIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)(?:VALID\s+UNTIL|VALIDITY(?:\s+DATE)?)\s*[:\-]?\s*(\S.*)$").unwrap()
});
static RE_ISSUED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)ISSUED\s*(?:ON|DATE)?\s*[:\-]?\s*(\S.*)$").unwrap()
});
static RE_NBI_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bNBI\b").unwrap());
static RE_POLICE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bPOLICE\b").unwrap());

/// Field extractor service
pub struct FieldExtractor;

impl FieldExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract structured fields from OCR text
    pub fn extract(&self, input: &ExtractionInput<'_>) -> ExtractedFields {
        let mut fields = ExtractedFields::new();

        self.extract_identity(&mut fields, input);
        if let Some(clearance_text) = input.clearance_text {
            self.extract_clearance(&mut fields, clearance_text, input.clearance_ocr_confidence);
        }

        fields
    }

    fn extract_identity(&self, fields: &mut ExtractedFields, input: &ExtractionInput<'_>) {
        let text = input.id_text;
        let ocr_conf = input.id_ocr_confidence;

        // Priority order: explicit per-part labels beat the generic NAME line
        if let Some(value) = capture_line(&RE_SURNAME, text) {
            fields.last_name = FieldValue::extracted(title_case(&value), ocr_conf * 1.0);
        }
        if let Some(value) = capture_line(&RE_GIVEN_NAME, text) {
            fields.first_name = FieldValue::extracted(title_case(&value), ocr_conf * 1.0);
        }
        if let Some(value) = capture_line(&RE_MIDDLE_NAME, text) {
            fields.middle_name = FieldValue::extracted(title_case(&value), ocr_conf * 1.0);
        }

        // "NAME: SURNAME, GIVEN" fallback; the embedded comma is honored
        if fields.last_name.is_empty() && fields.first_name.is_empty() {
            if let Some(value) = capture_line(&RE_FULL_NAME, text) {
                if let Some((surname, given)) = value.split_once(',') {
                    fields.last_name =
                        FieldValue::extracted(title_case(surname.trim()), ocr_conf * 0.7);
                    fields.first_name =
                        FieldValue::extracted(title_case(given.trim()), ocr_conf * 0.7);
                }
            }
        }

        if let Some(value) = capture_line(&RE_BIRTHDATE, text) {
            if let Some(parsed) = parse_date(&value) {
                fields.birthdate = FieldValue::extracted(
                    parsed.date.format("%Y-%m-%d").to_string(),
                    ocr_conf * 0.9 * parsed.confidence,
                );
            }
        }

        // ID number: PSN for PhilSys-family cards takes priority
        let id_number = match input.id_type {
            IdType::NationalId | IdType::PhilsysId => capture_line(&RE_PSN, text)
                .map(|v| (normalize_id_number(&v), 1.0))
                .or_else(|| capture_line(&RE_ID_NO, text).map(|v| (v, 0.8))),
            _ => capture_line(&RE_ID_NO, text)
                .map(|v| (v, 0.9))
                .or_else(|| capture_line(&RE_PSN, text).map(|v| (normalize_id_number(&v), 0.6))),
        };
        if let Some((value, weight)) = id_number {
            fields.id_number = FieldValue::extracted(value, ocr_conf * weight);
        }

        if let Some(value) = capture_line(&RE_ADDRESS, text) {
            fields.address = FieldValue::extracted(value, ocr_conf * 0.8);
        }
        if let Some(value) = capture_line(&RE_SEX, text) {
            let normalized = match value.to_ascii_uppercase().chars().next() {
                Some('M') => Some("M"),
                Some('F') => Some("F"),
                _ => None,
            };
            if let Some(sex) = normalized {
                fields.sex = FieldValue::extracted(sex, ocr_conf * 1.0);
            }
        }
        if let Some(value) = capture_line(&RE_PLACE_OF_BIRTH, text) {
            fields.place_of_birth = FieldValue::extracted(title_case(&value), ocr_conf * 0.9);
        }
        if let Some(value) = capture_line(&RE_NATIONALITY, text) {
            fields.nationality = FieldValue::extracted(title_case(&value), ocr_conf * 0.9);
        }
    }

    fn extract_clearance(&self, fields: &mut ExtractedFields, text: &str, ocr_conf: f64) {
        // Clearance type by whole-word token presence; NBI wins when both
        // appear (NBI certificates mention police stations)
        fields.clearance_type = if RE_NBI_TOKEN.is_match(text) {
            ClearanceType::Nbi
        } else if RE_POLICE_TOKEN.is_match(text) {
            ClearanceType::Police
        } else {
            ClearanceType::None
        };

        if let Some(value) = capture_line(&RE_CLEARANCE_NO, text) {
            fields.clearance_number = FieldValue::extracted(value, ocr_conf * 1.0);
        }
        if let Some(value) = capture_line(&RE_VALID_UNTIL, text) {
            if let Some(parsed) = parse_date(&value) {
                fields.clearance_validity_date = FieldValue::extracted(
                    parsed.date.format("%Y-%m-%d").to_string(),
                    ocr_conf * 0.9 * parsed.confidence,
                );
            }
        }
        if let Some(value) = capture_line(&RE_ISSUED, text) {
            if let Some(parsed) = parse_date(&value) {
                fields.clearance_issue_date = FieldValue::extracted(
                    parsed.date.format("%Y-%m-%d").to_string(),
                    ocr_conf * 0.8 * parsed.confidence,
                );
            }
        }
    }
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the text carries a clearance-issuer token (NBI or POLICE,
/// whole-word, case-insensitive)
pub fn clearance_keyword_present(text: &str) -> bool {
    RE_NBI_TOKEN.is_match(text) || RE_POLICE_TOKEN.is_match(text)
}

/// Clearance validity date parsed from a VALID UNTIL / VALIDITY line
pub fn clearance_validity(text: &str) -> Option<chrono::NaiveDate> {
    capture_line(&RE_VALID_UNTIL, text)
        .and_then(|v| parse_date(&v))
        .map(|parsed| parsed.date)
}

/// First capture of the first match, trimmed; None when empty
fn capture_line(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Strip separators from an ID number ("1234-5678-9012" -> "123456789012")
fn normalize_id_number(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Title-case a name ("DELA CRUZ" -> "Dela Cruz"); hyphenated parts are
/// cased per segment
fn title_case(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            word.split('-')
                .map(|part| {
                    let mut chars = part.chars();
                    match chars.next() {
                        Some(first) => {
                            first.to_uppercase().collect::<String>()
                                + &chars.as_str().to_lowercase()
                        }
                        None => String::new(),
                    }
                })
                .collect::<Vec<_>>()
                .join("-")
        })
        .collect::<Vec<_>>()
        .join(" ")
}
