//! Line-oriented document model for solver configuration files.
//!
//! The configuration format has no grammar. Sections are found by literal marker
//! substrings (usually comments written by the solver), never by line numbers carried
//! across edits, because every splice shifts the lines below it.
//!
//! All operations are pure: they borrow a [`Document`] and return a new one, so mutators
//! compose by threading documents through sequential calls.

use std::ops::Range;

use crate::core::error::{SimError, SimResult};

/// How a [`Marker`] is compared against a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Case {
    Sensitive,
    Insensitive,
}

/// A literal substring that identifies a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker<'a> {
    text: &'a str,
    case: Case,
}

impl<'a> Marker<'a> {
    pub const fn exact(text: &'a str) -> Self {
        Self {
            text,
            case: Case::Sensitive,
        }
    }

    pub const fn any_case(text: &'a str) -> Self {
        Self {
            text,
            case: Case::Insensitive,
        }
    }

    pub fn text(&self) -> &'a str {
        self.text
    }

    pub fn matches(&self, line: &str) -> bool {
        match self.case {
            Case::Sensitive => line.contains(self.text),
            Case::Insensitive => line
                .to_ascii_lowercase()
                .contains(&self.text.to_ascii_lowercase()),
        }
    }
}

/// An ordered sequence of lines from one configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    name: String,
    lines: Vec<String>,
    trailing_newline: bool,
}

impl Document {
    /// Split `text` into lines. `name` labels the document in error messages.
    pub fn parse(name: &str, text: &str) -> Self {
        let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
        let trailing_newline = text.ends_with('\n');
        if trailing_newline || text.is_empty() {
            lines.pop();
        }
        Self {
            name: name.to_string(),
            lines,
            trailing_newline,
        }
    }

    /// Build a document from lines; rendered output ends with a newline.
    pub fn from_lines<I, S>(name: &str, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            lines: lines.into_iter().map(Into::into).collect(),
            trailing_newline: true,
        }
    }

    /// Render back to text. Unmodified documents reproduce their input byte for byte.
    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn line(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Indices of every line containing `marker`.
    pub fn locate_all(&self, marker: Marker<'_>) -> Vec<usize> {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, line)| marker.matches(line))
            .map(|(index, _)| index)
            .collect()
    }

    /// Index of the single line containing `marker`.
    ///
    /// Fails when the marker is absent or appears more than once.
    pub fn locate(&self, marker: Marker<'_>) -> SimResult<usize> {
        match self.locate_all(marker).as_slice() {
            [] => Err(SimError::missing_marker(&self.name, marker.text())),
            [index] => Ok(*index),
            many => Err(SimError::format(
                &self.name,
                marker.text(),
                format!("marker is ambiguous (lines {})", one_based(many)),
            )),
        }
    }

    /// Index of the first line containing `marker`.
    pub fn locate_first(&self, marker: Marker<'_>) -> SimResult<usize> {
        self.locate_from(0, marker)
    }

    /// Index of the first line at or after `start` containing `marker`.
    pub fn locate_from(&self, start: usize, marker: Marker<'_>) -> SimResult<usize> {
        self.lines
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, line)| marker.matches(line))
            .map(|(index, _)| index)
            .ok_or_else(|| SimError::missing_marker(&self.name, marker.text()))
    }

    /// Index of the single line whose first whitespace token equals `keyword`.
    ///
    /// Report sections are introduced by bare keywords that also occur as substrings of
    /// other section names, so substring markers are not precise enough there.
    pub fn locate_keyword(&self, keyword: &str) -> SimResult<usize> {
        let hits: Vec<usize> = self
            .lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.split_whitespace().next() == Some(keyword))
            .map(|(index, _)| index)
            .collect();
        match hits.as_slice() {
            [] => Err(SimError::missing_marker(&self.name, keyword)),
            [index] => Ok(*index),
            many => Err(SimError::format(
                &self.name,
                keyword,
                format!("section keyword is ambiguous (lines {})", one_based(many)),
            )),
        }
    }

    /// Lines strictly between the unique `start` marker and the next `end` marker.
    pub fn locate_block(&self, start: Marker<'_>, end: Marker<'_>) -> SimResult<Range<usize>> {
        let open = self.locate(start)?;
        let close = self.locate_from(open + 1, end)?;
        Ok(open + 1..close)
    }

    /// Replace the lines in `range` with `replacement`, keeping everything else.
    pub fn splice(&self, range: Range<usize>, replacement: Vec<String>) -> SimResult<Document> {
        if range.start > range.end || range.end > self.lines.len() {
            return Err(SimError::contract(format!(
                "splice range {range:?} outside {} ({} lines)",
                self.name,
                self.lines.len()
            )));
        }
        let mut lines = Vec::with_capacity(self.lines.len() - range.len() + replacement.len());
        lines.extend_from_slice(&self.lines[..range.start]);
        lines.extend(replacement);
        lines.extend_from_slice(&self.lines[range.end..]);
        Ok(self.derive(lines))
    }

    /// Insert `new_lines` so the first of them lands at `index`.
    pub fn insert_at(&self, index: usize, new_lines: Vec<String>) -> SimResult<Document> {
        self.splice(index..index, new_lines)
    }

    /// Insert `new_lines` directly after the line at `index`.
    pub fn append_after(&self, index: usize, new_lines: Vec<String>) -> SimResult<Document> {
        if index >= self.lines.len() {
            return Err(SimError::contract(format!(
                "append after line {} outside {} ({} lines)",
                index + 1,
                self.name,
                self.lines.len()
            )));
        }
        self.insert_at(index + 1, new_lines)
    }

    /// Replace a single line.
    pub fn replace_line(&self, index: usize, line: String) -> SimResult<Document> {
        self.splice(index..index + 1, vec![line])
    }

    fn derive(&self, lines: Vec<String>) -> Document {
        Document {
            name: self.name.clone(),
            lines,
            trailing_newline: self.trailing_newline,
        }
    }
}

fn one_based(indices: &[usize]) -> String {
    indices
        .iter()
        .map(|index| (index + 1).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
