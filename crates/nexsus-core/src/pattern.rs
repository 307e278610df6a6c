//! Per-model narrative patterns.
//!
//! A model may opt out of the default one-sentence narrative by shipping a
//! JSON pattern file: a template with `{field}` / `{field:formatter}`
//! placeholders, a list of key fields that are always included, and a
//! dynamic appendix of whatever non-empty fields remain.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::error::{NexsusError, Result};

/// Formatter names accepted in `{field:formatter}` placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Formatter {
    /// Locale-style thousands separators, two decimals.
    Currency,
    /// Long-form date rendering.
    Date,
    /// Item count with a short summary of the first few entries.
    Count,
    Upper,
    /// Verbatim, no humanization.
    Raw,
}

impl Formatter {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "currency" => Some(Self::Currency),
            "date" => Some(Self::Date),
            "count" => Some(Self::Count),
            "upper" => Some(Self::Upper),
            "raw" => Some(Self::Raw),
            _ => None,
        }
    }
}

/// A parsed placeholder occurrence inside a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub field: String,
    pub formatter: Option<Formatter>,
    /// Byte range of the `{...}` token in the template.
    pub span: (usize, usize),
}

/// A loaded narrative pattern for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativePattern {
    pub model_name: String,
    /// Template with `{field}` / `{field:formatter}` placeholders.
    pub template: String,
    /// Fields always included even when the template omits them.
    #[serde(default)]
    pub key_fields: Vec<String>,
    /// Append remaining non-empty fields after the template body.
    #[serde(default = "default_true")]
    pub include_remaining: bool,
    #[serde(default = "default_max_narrative_length")]
    pub max_narrative_length: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_narrative_length() -> usize {
    2000
}

impl NarrativePattern {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| NexsusError::Config(format!("narrative pattern {}: {e}", path.display())))?;
        let pattern: NarrativePattern = serde_json::from_str(&raw)?;
        pattern.validate()?;
        Ok(pattern)
    }

    pub fn validate(&self) -> Result<()> {
        if self.template.trim().is_empty() {
            return Err(NexsusError::Config(format!(
                "narrative pattern for {} has an empty template",
                self.model_name
            )));
        }
        for ph in self.placeholders() {
            if ph.field.is_empty() {
                return Err(NexsusError::Config(format!(
                    "narrative pattern for {} has an empty placeholder",
                    self.model_name
                )));
            }
        }
        Ok(())
    }

    /// All placeholder occurrences, left to right.
    pub fn placeholders(&self) -> Vec<Placeholder> {
        // {field} or {field:formatter}; unknown formatters fall back to None
        // so a typo degrades to default humanization rather than erroring.
        let re = Regex::new(r"\{([a-zA-Z0-9_]*)(?::([a-z_]+))?\}").expect("static regex");
        re.captures_iter(&self.template)
            .map(|cap| {
                let whole = cap.get(0).expect("capture 0");
                Placeholder {
                    field: cap[1].to_string(),
                    formatter: cap.get(2).and_then(|m| Formatter::parse(m.as_str())),
                    span: (whole.start(), whole.end()),
                }
            })
            .collect()
    }

    /// Field names consumed by the template or pinned as key fields.
    pub fn covered_fields(&self) -> BTreeSet<String> {
        let mut covered: BTreeSet<String> =
            self.placeholders().into_iter().map(|p| p.field).collect();
        covered.extend(self.key_fields.iter().cloned());
        covered
    }

    /// Substitute placeholders using `resolve`, which maps a field name and
    /// optional formatter to rendered text (empty string for gaps).
    pub fn render(&self, mut resolve: impl FnMut(&str, Option<Formatter>) -> String) -> String {
        let mut out = String::with_capacity(self.template.len());
        let mut cursor = 0usize;
        for ph in self.placeholders() {
            out.push_str(&self.template[cursor..ph.span.0]);
            out.push_str(&resolve(&ph.field, ph.formatter));
            cursor = ph.span.1;
        }
        out.push_str(&self.template[cursor..]);
        out
    }

    /// Enforce `max_narrative_length` with ellipsis truncation on a char
    /// boundary.
    pub fn truncate(&self, narrative: String) -> String {
        truncate_chars(narrative, self.max_narrative_length)
    }
}

/// Truncate to at most `max_chars` characters, appending an ellipsis.
pub fn truncate_chars(text: String, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text;
    }
    let keep = max_chars.saturating_sub(1);
    let mut out: String = text.chars().take(keep).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(template: &str) -> NarrativePattern {
        NarrativePattern {
            model_name: "sale.order".into(),
            template: template.into(),
            key_fields: vec!["name".into()],
            include_remaining: true,
            max_narrative_length: 40,
        }
    }

    #[test]
    fn parses_placeholders_with_formatters() {
        let p = pattern("Order {name} for {amount_total:currency} on {date_order:date}");
        let phs = p.placeholders();
        assert_eq!(phs.len(), 3);
        assert_eq!(phs[0].field, "name");
        assert_eq!(phs[0].formatter, None);
        assert_eq!(phs[1].formatter, Some(Formatter::Currency));
        assert_eq!(phs[2].formatter, Some(Formatter::Date));
    }

    #[test]
    fn unknown_formatter_degrades_to_default() {
        let p = pattern("{name:bogus}");
        assert_eq!(p.placeholders()[0].formatter, None);
    }

    #[test]
    fn render_substitutes_in_order() {
        let p = pattern("{a} and {b}");
        let rendered = p.render(|field, _| field.to_uppercase());
        assert_eq!(rendered, "A and B");
    }

    #[test]
    fn truncation_appends_ellipsis() {
        let p = pattern("{name}");
        let long = "x".repeat(100);
        let out = p.truncate(long);
        assert_eq!(out.chars().count(), 40);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn covered_fields_include_key_fields() {
        let p = pattern("{amount_total:currency}");
        let covered = p.covered_fields();
        assert!(covered.contains("amount_total"));
        assert!(covered.contains("name"));
    }

    #[test]
    fn empty_template_fails_validation() {
        let p = NarrativePattern {
            model_name: "m".into(),
            template: "  ".into(),
            key_fields: vec![],
            include_remaining: true,
            max_narrative_length: 10,
        };
        assert!(p.validate().is_err());
    }
}
