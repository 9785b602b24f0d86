//! Rendering metric identities into backend-specific names.

use super::types::{label, Metric};
use crate::core::{ExporterError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*\.(\w+)\s*\}\}").expect("valid placeholder regex"));
static CAMEL_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([^A-Z])([A-Z])").expect("valid camel case regex"));
static INVALID_NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_:]").expect("valid name charset regex"));

const DEFAULT_TEMPLATE: &str = "{{.Metric}}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    App,
    CellId,
    Guid,
    Index,
    Instance,
    Job,
    Metric,
    Organisation,
    Space,
}

impl Field {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "App" => Some(Field::App),
            "CellId" => Some(Field::CellId),
            "GUID" => Some(Field::Guid),
            "Index" => Some(Field::Index),
            "Instance" => Some(Field::Instance),
            "Job" => Some(Field::Job),
            "Metric" => Some(Field::Metric),
            "Organisation" => Some(Field::Organisation),
            "Space" => Some(Field::Space),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Field(Field),
}

/// A dotted-path template such as `{{.Space}}.{{.App}}.{{.Metric}}`.
///
/// `{{.Metric}}` expands to the metric name, with the `status_range` label
/// appended when present (`requests.2xx`). `{{.Index}}` is the instance
/// index, same as `{{.Instance}}`. `{{.CellId}}` and `{{.Job}}` render empty
/// unless the metric carries a placement label.
#[derive(Debug, Clone, PartialEq)]
pub struct PathTemplate {
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parse a template. An empty template renders just the metric name.
    pub fn parse(template: &str) -> Result<Self> {
        let template = if template.trim().is_empty() {
            DEFAULT_TEMPLATE
        } else {
            template
        };

        let mut segments = Vec::new();
        let mut last = 0;
        for captures in PLACEHOLDER.captures_iter(template) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            let name = &captures[1];
            let field = Field::parse(name).ok_or_else(|| {
                ExporterError::template(format!("unknown field '{}' in template '{}'", name, template))
            })?;

            push_literal(&mut segments, &template[last..whole.start()], template)?;
            segments.push(Segment::Field(field));
            last = whole.end();
        }
        push_literal(&mut segments, &template[last..], template)?;

        Ok(Self { segments })
    }

    /// Render the template for a metric.
    pub fn render(&self, metric: &Metric) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(field) => out.push_str(&field_value(*field, metric)),
            }
        }
        out
    }
}

fn push_literal(segments: &mut Vec<Segment>, text: &str, template: &str) -> Result<()> {
    if text.contains("{{") || text.contains("}}") {
        return Err(ExporterError::template(format!(
            "malformed placeholder in template '{}'",
            template
        )));
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
    Ok(())
}

fn field_value(field: Field, metric: &Metric) -> String {
    let get = |key: &str| metric.label(key).unwrap_or_default().to_string();
    match field {
        Field::App => get(label::APP),
        Field::CellId => get(label::CELL_ID),
        Field::Guid => get(label::GUID),
        Field::Index | Field::Instance => get(label::INSTANCE),
        Field::Job => get(label::JOB),
        Field::Organisation => get(label::ORGANISATION),
        Field::Space => get(label::SPACE),
        Field::Metric => match metric.label(label::STATUS_RANGE) {
            Some(range) => format!("{}.{}", metric.name(), range),
            None => metric.name().to_string(),
        },
    }
}

/// `memoryUtilization` → `memory_utilization`, `GUID` → `guid`, `AppID` → `app_id`.
pub fn snake_case(name: &str) -> String {
    CAMEL_BOUNDARY.replace_all(name, "${1}_${2}").to_lowercase()
}

/// Snake-case a name and replace anything a Prometheus metric or label name
/// may not contain.
pub fn prometheus_name(name: &str) -> String {
    let snake = snake_case(name);
    let mut sanitized = INVALID_NAME_CHARS.replace_all(&snake, "_").into_owned();
    if sanitized.starts_with(|c: char| c.is_ascii_digit()) {
        sanitized.insert(0, '_');
    }
    sanitized
}
