//! CPF/CNPJ document codec.
//!
//! Parses, validates and formats Brazilian tax-identifier documents:
//! - CPF (individuals): 11 digits, masked as `XXX.XXX.XXX-XX`
//! - CNPJ (organizations): 14 digits, masked as `XX.XXX.XXX/XXXX-XX`
//!
//! The kind is inferred from the digit count alone. Parsing never panics;
//! failures are reported as a [`DocumentError`] that tells length problems
//! apart from checksum problems.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const CPF_LEN: usize = 11;
const CNPJ_LEN: usize = 14;

const CPF_FIRST_WEIGHTS: [u32; 9] = [10, 9, 8, 7, 6, 5, 4, 3, 2];
const CPF_SECOND_WEIGHTS: [u32; 10] = [11, 10, 9, 8, 7, 6, 5, 4, 3, 2];
const CNPJ_FIRST_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const CNPJ_SECOND_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

const CPF_MASK: [(usize, char); 3] = [(3, '.'), (6, '.'), (9, '-')];
const CNPJ_MASK: [(usize, char); 4] = [(2, '.'), (5, '.'), (8, '/'), (12, '-')];

/// Kind of document, inferred from digit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// CPF, 11 digits.
    Individual,
    /// CNPJ, 14 digits.
    Organization,
}

impl DocumentKind {
    pub const fn digit_count(self) -> usize {
        match self {
            DocumentKind::Individual => CPF_LEN,
            DocumentKind::Organization => CNPJ_LEN,
        }
    }

    pub fn from_digit_count(count: usize) -> Option<Self> {
        match count {
            CPF_LEN => Some(DocumentKind::Individual),
            CNPJ_LEN => Some(DocumentKind::Organization),
            _ => None,
        }
    }

    /// Short label shown next to the field ("CPF" / "CNPJ").
    pub fn label(self) -> &'static str {
        match self {
            DocumentKind::Individual => "CPF",
            DocumentKind::Organization => "CNPJ",
        }
    }

    fn mask(self) -> &'static [(usize, char)] {
        match self {
            DocumentKind::Individual => &CPF_MASK,
            DocumentKind::Organization => &CNPJ_MASK,
        }
    }
}

impl FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpf" | "individual" => Ok(DocumentKind::Individual),
            "cnpj" | "organization" => Ok(DocumentKind::Organization),
            other => Err(format!("unknown document kind '{}'", other)),
        }
    }
}

/// Why a raw string is not a valid document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    /// Digit count after stripping is neither 11 nor 14.
    InvalidLength { digits: usize },
    /// Eleven or fourteen repetitions of the same digit.
    RepeatedDigits,
    /// Right length, but the check digits do not match.
    InvalidChecksum { kind: DocumentKind },
}

impl DocumentError {
    /// Malformed input (length / trivial sequence) as opposed to a checksum miss.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, DocumentError::InvalidChecksum { .. })
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            DocumentError::InvalidLength { .. } => "invalid_length",
            DocumentError::RepeatedDigits => "repeated_digits",
            DocumentError::InvalidChecksum { .. } => "invalid_checksum",
        }
    }

    /// Field-level guidance for the form.
    pub fn guidance(&self) -> String {
        match self {
            DocumentError::InvalidLength { digits } => format!(
                "Enter 11 digits for a CPF or 14 digits for a CNPJ ({} typed)",
                digits
            ),
            DocumentError::RepeatedDigits => {
                "A document cannot be a single repeated digit".to_string()
            }
            DocumentError::InvalidChecksum { kind } => format!(
                "{} check digits do not match, please review the number",
                kind.label()
            ),
        }
    }
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentError::InvalidLength { digits } => {
                write!(f, "expected 11 or 14 digits, got {}", digits)
            }
            DocumentError::RepeatedDigits => write!(f, "repeated-digit sequence"),
            DocumentError::InvalidChecksum { kind } => {
                write!(f, "{} checksum mismatch", kind.label())
            }
        }
    }
}

impl std::error::Error for DocumentError {}

/// A validated CPF or CNPJ.
///
/// Only constructible through [`Document::parse`], so holding one means the
/// check digits passed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Document {
    digits: String,
    kind: DocumentKind,
}

impl Document {
    pub fn parse(raw: &str) -> Result<Self, DocumentError> {
        let digits = strip_non_digits(raw);

        let kind = DocumentKind::from_digit_count(digits.len()).ok_or(
            DocumentError::InvalidLength {
                digits: digits.len(),
            },
        )?;

        let values: Vec<u32> = digits.chars().filter_map(|c| c.to_digit(10)).collect();

        if values.iter().all(|d| *d == values[0]) {
            return Err(DocumentError::RepeatedDigits);
        }

        let valid = match kind {
            DocumentKind::Individual => {
                check_digit(&values[..9], &CPF_FIRST_WEIGHTS) == values[9]
                    && check_digit(&values[..10], &CPF_SECOND_WEIGHTS) == values[10]
            }
            DocumentKind::Organization => {
                check_digit(&values[..12], &CNPJ_FIRST_WEIGHTS) == values[12]
                    && check_digit(&values[..13], &CNPJ_SECOND_WEIGHTS) == values[13]
            }
        };

        if !valid {
            return Err(DocumentError::InvalidChecksum { kind });
        }

        Ok(Self { digits, kind })
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    /// Raw digits, no punctuation. Use this for comparisons and store queries.
    pub fn digits(&self) -> &str {
        &self.digits
    }

    /// Canonical punctuated form.
    pub fn formatted(&self) -> String {
        apply_mask(&self.digits, self.kind.mask())
    }

    /// Same kind and same raw digits.
    pub fn same_as(&self, other: &Document) -> bool {
        self.kind == other.kind && self.digits == other.digits
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.formatted())
    }
}

impl FromStr for Document {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Document::parse(s)
    }
}

impl TryFrom<String> for Document {
    type Error = DocumentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Document::parse(&value)
    }
}

impl From<Document> for String {
    fn from(doc: Document) -> Self {
        doc.digits
    }
}

/// Parses a raw string into a [`Document`].
pub fn parse(raw: &str) -> Result<Document, DocumentError> {
    Document::parse(raw)
}

/// Canonical punctuated form of a document.
pub fn format(doc: &Document) -> String {
    doc.formatted()
}

/// Masks digits as they are typed, without requiring a complete or valid
/// document. Without a hint, up to 11 digits are masked as a CPF and longer
/// input as a CNPJ. Extra digits beyond the kind's length are dropped.
pub fn format_partial(raw: &str, kind_hint: Option<DocumentKind>) -> String {
    let mut digits = strip_non_digits(raw);

    let kind = kind_hint.unwrap_or(if digits.len() <= CPF_LEN {
        DocumentKind::Individual
    } else {
        DocumentKind::Organization
    });

    digits.truncate(kind.digit_count());
    apply_mask(&digits, kind.mask())
}

pub fn strip_non_digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

// `11 - r` is 10 or 11 exactly when `r < 2`, so one rule serves both kinds.
fn check_digit(values: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = values.iter().zip(weights).map(|(d, w)| d * w).sum();
    let rem = sum % 11;
    if rem < 2 {
        0
    } else {
        11 - rem
    }
}

fn apply_mask(digits: &str, mask: &[(usize, char)]) -> String {
    let mut out = String::with_capacity(digits.len() + mask.len());
    for (idx, c) in digits.chars().enumerate() {
        if let Some((_, sep)) = mask.iter().find(|(pos, _)| *pos == idx) {
            out.push(*sep);
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_cpfs() {
        for raw in ["529.982.247-25", "11144477735", "123.456.789-09", "390.533.447-05"] {
            let doc = Document::parse(raw).unwrap();
            assert_eq!(doc.kind(), DocumentKind::Individual);
        }
    }

    #[test]
    fn test_cpf_check_digit_ten_maps_to_zero() {
        // First check digit sum leaves remainder 1, so 11 - 1 = 10 -> 0
        assert!(Document::parse("100.000.001-08").is_ok());
        assert_eq!(
            Document::parse("100.000.001-18"),
            Err(DocumentError::InvalidChecksum {
                kind: DocumentKind::Individual
            })
        );
    }

    #[test]
    fn test_invalid_cpf_checksum() {
        assert_eq!(
            Document::parse("529.982.247-26"),
            Err(DocumentError::InvalidChecksum {
                kind: DocumentKind::Individual
            })
        );
    }

    #[test]
    fn test_valid_cnpjs() {
        for raw in ["11.222.333/0001-81", "11444777000161", "45.723.174/0001-10"] {
            let doc = Document::parse(raw).unwrap();
            assert_eq!(doc.kind(), DocumentKind::Organization);
        }
    }

    #[test]
    fn test_invalid_cnpj_checksum() {
        assert_eq!(
            Document::parse("11.222.333/0001-82"),
            Err(DocumentError::InvalidChecksum {
                kind: DocumentKind::Organization
            })
        );
    }

    #[test]
    fn test_repeated_digits_are_malformed() {
        let err = Document::parse("111.111.111-11").unwrap_err();
        assert_eq!(err, DocumentError::RepeatedDigits);
        assert!(err.is_malformed());

        assert_eq!(
            Document::parse("00000000000000"),
            Err(DocumentError::RepeatedDigits)
        );
    }

    #[test]
    fn test_wrong_length_reports_digit_count() {
        assert_eq!(
            Document::parse(""),
            Err(DocumentError::InvalidLength { digits: 0 })
        );
        assert_eq!(
            Document::parse("123.456.789"),
            Err(DocumentError::InvalidLength { digits: 9 })
        );
        assert_eq!(
            Document::parse("abc"),
            Err(DocumentError::InvalidLength { digits: 0 })
        );
        assert!(Document::parse("1234567890123").unwrap_err().is_malformed());
    }

    #[test]
    fn test_format_matches_input_punctuation() {
        let doc = parse("11.222.333/0001-81").unwrap();
        assert_eq!(format(&doc), "11.222.333/0001-81");
        assert_eq!(doc.digits(), "11222333000181");

        let doc = parse("52998224725").unwrap();
        assert_eq!(doc.to_string(), "529.982.247-25");
    }

    #[test]
    fn test_format_partial_progression() {
        assert_eq!(format_partial("", None), "");
        assert_eq!(format_partial("529", None), "529");
        assert_eq!(format_partial("5299", None), "529.9");
        assert_eq!(format_partial("5299822", None), "529.982.2");
        assert_eq!(format_partial("5299822472", None), "529.982.247-2");
        assert_eq!(format_partial("112223330001", None), "11.222.333/0001");
        assert_eq!(format_partial("1122233300018199", None), "11.222.333/0001-81");
    }

    #[test]
    fn test_format_partial_respects_hint() {
        assert_eq!(
            format_partial("11222", Some(DocumentKind::Organization)),
            "11.222"
        );
        assert_eq!(
            format_partial("11222333000181", Some(DocumentKind::Individual)),
            "112.223.330-00"
        );
    }

    #[test]
    fn test_serde_uses_raw_digits() {
        let doc = parse("529.982.247-25").unwrap();
        assert_eq!(serde_json::to_string(&doc).unwrap(), "\"52998224725\"");

        let back: Document = serde_json::from_str("\"529.982.247-25\"").unwrap();
        assert_eq!(back, doc);

        assert!(serde_json::from_str::<Document>("\"52998224726\"").is_err());
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("CPF".parse::<DocumentKind>(), Ok(DocumentKind::Individual));
        assert_eq!(
            "organization".parse::<DocumentKind>(),
            Ok(DocumentKind::Organization)
        );
        assert!("rg".parse::<DocumentKind>().is_err());
    }
}
