//! Whitespace-separated value lines with an optional trailing `#` comment.

use std::str::FromStr;

use crate::core::document::Document;
use crate::core::error::{SimError, SimResult};

/// A value line split into its numeric fields and trailing comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueLine<'a> {
    pub indent: &'a str,
    pub values: Vec<&'a str>,
    /// Comment text including the leading `#`.
    pub comment: Option<&'a str>,
}

impl<'a> ValueLine<'a> {
    pub fn split(line: &'a str) -> Self {
        let (body, comment) = match line.find('#') {
            Some(pos) => (&line[..pos], Some(line[pos..].trim_end())),
            None => (line, None),
        };
        let indent_len = body.len() - body.trim_start().len();
        Self {
            indent: &body[..indent_len],
            values: body.split_whitespace().collect(),
            comment,
        }
    }

    /// First token of the comment, which the solver uses as the parameter label.
    pub fn label(&self) -> Option<&'a str> {
        self.comment
            .map(|comment| comment.trim_start_matches('#'))
            .and_then(|text| text.split_whitespace().next())
    }

    pub fn is_comment_only(&self) -> bool {
        self.values.is_empty()
    }

    /// Rebuild the line with field `index` replaced.
    pub fn with_field(&self, index: usize, value: &str) -> Option<String> {
        if index >= self.values.len() {
            return None;
        }
        let mut values: Vec<&str> = self.values.clone();
        values[index] = value;
        Some(assemble(self.indent, &values, self.comment))
    }
}

fn assemble(indent: &str, values: &[&str], comment: Option<&str>) -> String {
    let mut out = format!("{indent}{}", values.join(" "));
    if let Some(comment) = comment {
        out.push(' ');
        out.push_str(comment);
    }
    out
}

/// Parse field `index` of line `line_index`. `marker` names the anchor in errors.
pub fn field<T: FromStr>(
    doc: &Document,
    line_index: usize,
    index: usize,
    marker: &str,
) -> SimResult<T> {
    let line = doc
        .line(line_index)
        .ok_or_else(|| SimError::format(doc.name(), marker, "line out of range"))?;
    let parsed = ValueLine::split(line);
    parsed
        .values
        .get(index)
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| {
            SimError::format(
                doc.name(),
                marker,
                format!(
                    "line {} has no numeric field {} ({line:?})",
                    line_index + 1,
                    index + 1
                ),
            )
        })
}

/// Return a copy of `doc` with field `index` of line `line_index` set to `value`.
pub fn set_field(
    doc: &Document,
    line_index: usize,
    index: usize,
    value: &str,
    marker: &str,
) -> SimResult<Document> {
    let line = doc
        .line(line_index)
        .ok_or_else(|| SimError::format(doc.name(), marker, "line out of range"))?;
    let rewritten = ValueLine::split(line)
        .with_field(index, value)
        .ok_or_else(|| {
            SimError::format(
                doc.name(),
                marker,
                format!("line {} has no field {}", line_index + 1, index + 1),
            )
        })?;
    doc.replace_line(line_index, rewritten)
}

/// Format a number the way the solver's own files print short values (`4`, `0.2`).
pub fn format_number(value: f64) -> String {
    format!("{value}")
}

/// Indices of value lines whose comment label equals `label`.
pub fn find_labelled(doc: &Document, label: &str) -> Vec<usize> {
    doc.lines()
        .iter()
        .enumerate()
        .filter(|(_, line)| {
            let parsed = ValueLine::split(line);
            !parsed.is_comment_only() && parsed.label() == Some(label)
        })
        .map(|(index, _)| index)
        .collect()
}

/// The single parameter line labelled `label`.
pub fn find_parameter(doc: &Document, label: &str) -> SimResult<usize> {
    match find_labelled(doc, label).as_slice() {
        [] => Err(SimError::contract(format!(
            "parameter {label:?} not found in {}",
            doc.name()
        ))),
        [index] => Ok(*index),
        many => Err(SimError::contract(format!(
            "parameter {label:?} is ambiguous in {}: {} lines match",
            doc.name(),
            many.len()
        ))),
    }
}
