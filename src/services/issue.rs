//! Issue tracker links derived from merge request titles.
//!
//! Titles are expected to carry a tracker key such as `PROJ-123`. The link is
//! produced from a template holding a `{{.Issue}}` placeholder.

use crate::error::AppError;
use regex::Regex;

/// Tracker keys: upper-case project prefix, dash, number.
const ISSUE_PATTERN: &str = r"[A-Z]+-[0-9]+";

/// Placeholder name inside `{{ }}`.
const ISSUE_FIELD: &str = ".Issue";

/// One piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Issue,
}

/// Extracts issue keys and renders issue links.
#[derive(Debug, Clone)]
pub struct Issuer {
    pattern: Regex,
    template: Option<Vec<Segment>>,
}

impl Issuer {
    /// Create an issuer. Without a template no link is ever produced.
    pub fn new(template: Option<&str>) -> Result<Self, AppError> {
        let pattern = Regex::new(ISSUE_PATTERN)
            .map_err(|e| AppError::internal(format!("Invalid issue pattern: {}", e)))?;
        let template = template
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(parse_template)
            .transpose()?;

        Ok(Self { pattern, template })
    }

    /// Whether a link template is configured.
    pub fn has_template(&self) -> bool {
        self.template.is_some()
    }

    /// First issue key in `title`.
    pub fn extract_number(&self, title: &str) -> Option<String> {
        self.pattern.find(title).map(|m| m.as_str().to_string())
    }

    /// Link for `number`, or `None` when the number is empty or no template
    /// is configured.
    pub fn make_url(&self, number: &str) -> Option<String> {
        if number.is_empty() {
            return None;
        }
        let segments = self.template.as_ref()?;

        Some(
            segments
                .iter()
                .map(|segment| match segment {
                    Segment::Text(text) => text.as_str(),
                    Segment::Issue => number,
                })
                .collect(),
        )
    }
}

/// Split a template into literal text and `{{.Issue}}` placeholders.
fn parse_template(template: &str) -> Result<Vec<Segment>, AppError> {
    let mut segments = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            segments.push(Segment::Text(rest[..start].to_string()));
        }

        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            AppError::config(format!("Unclosed placeholder in issue URL template '{}'", template))
        })?;

        let field = after[..end].trim();
        if field != ISSUE_FIELD {
            return Err(AppError::config(format!(
                "Unknown placeholder '{{{{{}}}}}' in issue URL template, only {{{{.Issue}}}} is supported",
                field
            )));
        }
        segments.push(Segment::Issue);
        rest = &after[end + 2..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }

    Ok(segments)
}
