use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static LABELLED_IDENTIFIERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(nhs\s*(?:no|number)?|mrn|hosp(?:ital)?\s*(?:no|number)|dob|d\.o\.b\.?|date of birth)\s*[:#=]?\s*([A-Za-z]{0,3}\d[A-Za-z0-9/.\-]{3,})")
        .expect("valid regex")
});

static NHS_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{3}[ -]?\d{3}[ -]?\d{4})\b").expect("valid regex"));

pub const IDENTIFIER_REMINDER: &str = "Reminder: do not include patient identifiers.";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactionResult {
    pub content: String,
    pub redaction_count: usize,
}

/// Masks text that looks like a patient identifier before it leaves the
/// device as exported text.
#[derive(Debug, Default, Clone)]
pub struct Redactor {
    enabled: bool,
}

impl Redactor {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn redact(&self, input: &str) -> RedactionResult {
        if !self.enabled || input.is_empty() {
            return RedactionResult {
                content: input.to_string(),
                redaction_count: 0,
            };
        }

        let mut redaction_count = LABELLED_IDENTIFIERS.find_iter(input).count();
        let labelled = LABELLED_IDENTIFIERS
            .replace_all(input, |caps: &regex::Captures<'_>| {
                let label = caps.get(1).map(|m| m.as_str()).unwrap_or("id");
                format!("{} [REDACTED]", label)
            })
            .to_string();

        redaction_count += NHS_NUMBER.find_iter(&labelled).count();
        let content = NHS_NUMBER
            .replace_all(&labelled, "[REDACTED_NHS_NUMBER]")
            .to_string();

        RedactionResult {
            content,
            redaction_count,
        }
    }
}

/// Number of identifier-shaped fragments in `input`, regardless of whether
/// redaction is enabled.
pub fn identifier_hits(input: &str) -> usize {
    Redactor::new(true).redact(input).redaction_count
}
