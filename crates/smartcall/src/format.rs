//! Merging model text with a call outcome.
//!
//! A [`ResponseFormatter`] holds named templates with `{placeholder}` slots:
//!
//! | Placeholder | Filled with |
//! |-------------|-------------|
//! | `{content}` | The model's text |
//! | `{function_result}` | The successful result, rendered as text |
//! | `{table_result}` | An array result rendered as a plain-text table |
//! | `{error_message}` | The failure message |
//!
//! Failed outcomes always render through the `error` template, whatever
//! template was asked for. Unknown placeholders are left as written.

use crate::dispatch::CallOutcome;
use serde_json::Value;
use std::collections::HashMap;

pub const DEFAULT_TEMPLATE: &str = "default";
pub const TABLE_TEMPLATE: &str = "table";
pub const ERROR_TEMPLATE: &str = "error";

/// Rendered in place of an empty table.
pub const EMPTY_TABLE: &str = "No data";

/// Named response templates.
#[derive(Debug, Clone)]
pub struct ResponseFormatter {
    templates: HashMap<String, String>,
}

impl Default for ResponseFormatter {
    fn default() -> Self {
        let templates = [
            (DEFAULT_TEMPLATE, "{content}\n\n{function_result}"),
            (TABLE_TEMPLATE, "{content}\n\nResults:\n{table_result}"),
            (ERROR_TEMPLATE, "{content}\n\nAn error occurred: {error_message}"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self { templates }
    }
}

impl ResponseFormatter {
    /// Formatter with the built-in `default`, `table`, and `error` templates.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a template.
    pub fn register_template(&mut self, name: impl Into<String>, template: impl Into<String>) {
        self.templates.insert(name.into(), template.into());
    }

    /// Add or replace a template (builder pattern).
    pub fn with_template(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.register_template(name, template);
        self
    }

    pub fn template(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }

    /// Merge `content` with an outcome using the named template.
    ///
    /// With no outcome the content is returned unchanged. An unknown template
    /// name falls back to `default`.
    pub fn mix(&self, content: &str, outcome: Option<&CallOutcome>, template: &str) -> String {
        let Some(outcome) = outcome else {
            return content.to_string();
        };

        match outcome {
            CallOutcome::Failed { message, .. } => {
                let tpl = self.lookup(ERROR_TEMPLATE);
                fill(tpl, &[("content", content), ("error_message", message.as_str())])
            }
            CallOutcome::Success { result, .. } => {
                let tpl = self.lookup(template);
                let rendered = render_value(result);
                let table = match result {
                    Value::Array(rows) => format_table(rows),
                    _ => rendered.clone(),
                };
                fill(
                    tpl,
                    &[
                        ("content", content),
                        ("function_result", rendered.as_str()),
                        ("table_result", table.as_str()),
                        ("error_message", ""),
                    ],
                )
            }
        }
    }

    fn lookup(&self, name: &str) -> &str {
        self.template(name)
            .or_else(|| self.template(DEFAULT_TEMPLATE))
            .unwrap_or("{content}\n\n{function_result}")
    }
}

/// Substitute `{name}` placeholders in a single pass. Substituted text is
/// never re-scanned.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some((before, after)) = rest.split_once('{') {
        out.push_str(before);
        match after.split_once('}') {
            Some((key, tail)) => match values.iter().find(|(k, _)| *k == key) {
                Some((_, value)) => {
                    out.push_str(value);
                    rest = tail;
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            },
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Render a result value as display text: strings as-is, `null` as empty,
/// anything else as compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render rows as a plain-text table.
///
/// Headers are the first row's keys in order; each column is as wide as its
/// widest cell (header included); cells are left-aligned and joined with
/// `" | "`, and the header is underlined with dashes joined by `"-+-"`.
/// Missing keys render as empty cells. If the first row is not an object the
/// values are listed one per line.
pub fn format_table(rows: &[Value]) -> String {
    let Some(first) = rows.first() else {
        return EMPTY_TABLE.to_string();
    };
    let Some(first) = first.as_object() else {
        return rows.iter().map(render_value).collect::<Vec<_>>().join("\n");
    };

    let headers: Vec<&str> = first.keys().map(String::as_str).collect();
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            headers
                .iter()
                .map(|h| row.get(h).map(render_value).unwrap_or_default())
                .collect()
        })
        .collect();

    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            cells
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(h.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |values: Vec<&str>| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(v, &w)| format!("{v:<w$}"))
            .collect::<Vec<_>>()
            .join(" | ")
    };

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(line(headers.clone()));
    lines.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    for row in &cells {
        lines.push(line(row.iter().map(String::as_str).collect()));
    }
    lines.join("\n")
}
