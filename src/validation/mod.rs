//! Schema validation shared by every provider normalizer and the state store.
//!
//! Policy: a missing or malformed mandatory field rejects the payload with a
//! [`ValidationError`] naming that field. Optional fields are coerced to a
//! documented default (empty list, `"unknown"`, zero, `None`) and never raise.

use reqwest::Url;
use serde_json::{Map, Value};

use crate::error::{ValidationError, ValidationResult};

/// Inclusive bounds for AI and reviewer scores.
pub const SCORE_MIN: i64 = 1;
/// Inclusive bounds for AI and reviewer scores.
pub const SCORE_MAX: i64 = 9;

/// Placeholder for optional string fields the provider left out.
pub const UNKNOWN: &str = "unknown";

/// Minimum reviewer justification length, in characters.
pub const JUSTIFICATION_MIN_CHARS: usize = 20;
/// Maximum reviewer justification length, in characters.
pub const JUSTIFICATION_MAX_CHARS: usize = 2000;

/// Score gap above which the reviewer is asked to double-check.
pub const DEVIATION_THRESHOLD: u8 = 2;

/// Read-only view of a JSON object that knows its own path, so every error
/// names the full field (`primary_market.tam_usd`).
#[derive(Debug, Clone, Copy)]
pub struct Fields<'a> {
    map: &'a Map<String, Value>,
    path: &'a str,
}

impl<'a> Fields<'a> {
    /// View `value` as an object, rejecting anything else.
    pub fn of(value: &'a Value, path: &'a str) -> ValidationResult<Self> {
        match value {
            Value::Object(map) => Ok(Self { map, path }),
            _ => Err(ValidationError::new(
                path,
                format!("Invalid {} structure", display_path(path)),
            )),
        }
    }

    /// View an already-extracted object.
    pub fn of_map(map: &'a Map<String, Value>, path: &'a str) -> Self {
        Self { map, path }
    }

    fn qualified(&self, field: &str) -> String {
        if self.path.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", self.path, field)
        }
    }

    /// Raw access; `null` is treated as absent.
    pub fn get(&self, field: &str) -> Option<&'a Value> {
        self.map.get(field).filter(|v| !v.is_null())
    }

    /// A nested object that must be present.
    pub fn object(&self, field: &str) -> ValidationResult<&'a Map<String, Value>> {
        match self.get(field) {
            Some(Value::Object(map)) => Ok(map),
            Some(_) => Err(ValidationError::new(
                self.qualified(field),
                format!("Field {} must be an object", self.qualified(field)),
            )),
            None => Err(ValidationError::missing(self.qualified(field))),
        }
    }

    /// A nested object that may be absent; malformed values count as absent.
    pub fn optional_object(&self, field: &str) -> Option<&'a Map<String, Value>> {
        self.get(field).and_then(Value::as_object)
    }

    /// A non-empty string that must be present.
    pub fn string(&self, field: &str) -> ValidationResult<String> {
        match self.get(field).and_then(Value::as_str).map(str::trim) {
            Some(s) if !s.is_empty() => Ok(s.to_string()),
            _ => Err(ValidationError::missing(self.qualified(field))),
        }
    }

    /// An optional string, defaulting to `default` when absent, blank or not a string.
    pub fn string_or(&self, field: &str, default: &str) -> String {
        match self.get(field).and_then(Value::as_str).map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => default.to_string(),
        }
    }

    /// An optional string with no default.
    pub fn optional_string(&self, field: &str) -> Option<String> {
        self.get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// A number that must be present. Numeric strings are accepted.
    pub fn number(&self, field: &str) -> ValidationResult<f64> {
        match self.get(field) {
            Some(value) => as_number(value).ok_or_else(|| {
                ValidationError::new(
                    self.qualified(field),
                    format!("Field {} must be numeric", self.qualified(field)),
                )
            }),
            None => Err(ValidationError::missing(self.qualified(field))),
        }
    }

    /// An optional number, defaulting to zero.
    pub fn number_or_zero(&self, field: &str) -> f64 {
        self.get(field).and_then(as_number).unwrap_or(0.0)
    }

    /// An optional non-negative count, defaulting to zero.
    pub fn count(&self, field: &str) -> u32 {
        self.get(field)
            .and_then(as_number)
            .filter(|n| *n >= 0.0 && n.is_finite())
            .map(|n| n as u32)
            .unwrap_or(0)
    }

    /// A mandatory score in [1, 9].
    pub fn score(&self, field: &str, dimension: &str) -> ValidationResult<u8> {
        let qualified = self.qualified(field);
        match self.get(field) {
            Some(value) => parse_score(value)
                .ok_or_else(|| ValidationError::invalid_score(dimension, qualified, value)),
            None => Err(ValidationError::invalid_score(dimension, qualified, "null")),
        }
    }

    /// An optional confidence; anything outside [0, 1] becomes `None`.
    pub fn confidence(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(as_number).and_then(coerce_confidence)
    }

    /// An optional list of strings, filtered to non-empty, non-placeholder entries.
    pub fn string_list(&self, field: &str) -> Vec<String> {
        self.get(field).map(string_list).unwrap_or_default()
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "payload"
    } else {
        path
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

/// Accept integral JSON numbers in [1, 9]. `7.0` counts as integral; `"7"` does not.
pub fn parse_score(value: &Value) -> Option<u8> {
    let n = value.as_f64()?;
    if n.fract() != 0.0 {
        return None;
    }
    check_score(n as i64).ok()
}

/// Range check for an integer score.
pub fn check_score(score: i64) -> Result<u8, i64> {
    if (SCORE_MIN..=SCORE_MAX).contains(&score) {
        Ok(score as u8)
    } else {
        Err(score)
    }
}

/// Confidence in [0, 1] passes through; everything else is dropped.
pub fn coerce_confidence(confidence: f64) -> Option<f64> {
    (0.0..=1.0).contains(&confidence).then_some(confidence)
}

/// Template artifacts such as `{company_name}` or `[TBD]` leaked by the provider.
pub fn is_placeholder(s: &str) -> bool {
    let s = s.trim();
    s.len() >= 2
        && ((s.starts_with('{') && s.ends_with('}')) || (s.starts_with('[') && s.ends_with(']')))
}

/// Filter a JSON array down to its meaningful strings.
pub fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty() && !is_placeholder(s))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Normalize a company reference: trim, default the scheme to https, and
/// require a dotted host name.
pub fn validate_url(input: &str) -> ValidationResult<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("url", "URL cannot be empty"));
    }

    let lower = trimmed.to_ascii_lowercase();
    let candidate = if lower.starts_with("http://") || lower.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let url = Url::parse(&candidate)
        .map_err(|_| ValidationError::new("url", "Invalid URL format"))?;
    match url.host_str() {
        Some(host) if host.contains('.') => Ok(candidate),
        _ => Err(ValidationError::new("url", "Invalid domain name")),
    }
}

/// Check a reviewer's score and written justification before submission.
pub fn validate_user_assessment(score: i64, justification: &str) -> ValidationResult<u8> {
    let score = check_score(score).map_err(|_| {
        ValidationError::new("userScore", "Score must be between 1 and 9")
    })?;

    let chars = justification.trim().chars().count();
    if chars == 0 {
        return Err(ValidationError::new("justification", "Justification is required"));
    }
    if chars < JUSTIFICATION_MIN_CHARS {
        return Err(ValidationError::new(
            "justification",
            format!("Justification must be at least {} characters", JUSTIFICATION_MIN_CHARS),
        ));
    }
    if chars > JUSTIFICATION_MAX_CHARS {
        return Err(ValidationError::new(
            "justification",
            format!("Justification must be less than {} characters", JUSTIFICATION_MAX_CHARS),
        ));
    }
    Ok(score)
}

/// Gap between the AI score and the reviewer's score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreDeviation {
    pub deviation: u8,
    pub flagged: bool,
}

impl ScoreDeviation {
    /// Compare two scores; `None` when either is missing.
    pub fn between(ai_score: Option<u8>, user_score: Option<u8>) -> Option<Self> {
        let (ai, user) = (ai_score?, user_score?);
        let deviation = ai.abs_diff(user);
        Some(Self {
            deviation,
            flagged: deviation > DEVIATION_THRESHOLD,
        })
    }
}
