//! Parameter files written by the solver (`# name[i]:` headers followed by values).
//!
//! The solver numbers parameters by scalar slot in file order; the report's `Num`
//! column refers to the same slots, which is what lets index-informed rewrites line
//! the two files up.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::document::Document;
use crate::core::error::{SimError, SimResult};

static ENTRY_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#\s*[A-Za-z_][A-Za-z0-9_\[\]()]*\s*:\s*$").expect("valid entry header regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
struct ValueRow {
    indent: String,
    tokens: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    header: String,
    rows: Vec<ValueRow>,
}

/// A parsed parameter file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParFile {
    name: String,
    preamble: Vec<String>,
    entries: Vec<Entry>,
}

impl ParFile {
    pub fn parse(doc: &Document) -> SimResult<Self> {
        let mut preamble = Vec::new();
        let mut entries: Vec<Entry> = Vec::new();
        for line in doc.lines() {
            if ENTRY_HEADER.is_match(line.trim_end()) {
                entries.push(Entry {
                    header: line.clone(),
                    rows: Vec::new(),
                });
                continue;
            }
            match entries.last_mut() {
                None => preamble.push(line.clone()),
                Some(_) if line.trim().is_empty() => {}
                Some(entry) => {
                    let indent_len = line.len() - line.trim_start().len();
                    entry.rows.push(ValueRow {
                        indent: line[..indent_len].to_string(),
                        tokens: line.split_whitespace().map(str::to_string).collect(),
                    });
                }
            }
        }
        if entries.is_empty() {
            return Err(SimError::format(
                doc.name(),
                "# name:",
                "no parameter entries found",
            ));
        }
        if let Some(empty) = entries.iter().find(|entry| entry.rows.is_empty()) {
            return Err(SimError::format(
                doc.name(),
                empty.header.trim(),
                "parameter entry has no values",
            ));
        }
        Ok(Self {
            name: doc.name().to_string(),
            preamble,
            entries,
        })
    }

    /// Scalar values in slot order.
    pub fn slots(&self) -> Vec<&str> {
        self.entries
            .iter()
            .flat_map(|entry| entry.rows.iter())
            .flat_map(|row| row.tokens.iter().map(String::as_str))
            .collect()
    }

    pub fn slot_count(&self) -> usize {
        self.entries
            .iter()
            .flat_map(|entry| entry.rows.iter())
            .map(|row| row.tokens.len())
            .sum()
    }

    /// Same layout with every scalar replaced, in slot order.
    pub fn with_slots(&self, values: Vec<String>) -> SimResult<Self> {
        if values.len() != self.slot_count() {
            return Err(SimError::contract(format!(
                "{} has {} slots, got {} values",
                self.name,
                self.slot_count(),
                values.len()
            )));
        }
        let mut values = values.into_iter();
        let mut out = self.clone();
        for token in out
            .entries
            .iter_mut()
            .flat_map(|entry| entry.rows.iter_mut())
            .flat_map(|row| row.tokens.iter_mut())
        {
            if let Some(value) = values.next() {
                *token = value;
            }
        }
        Ok(out)
    }

    pub fn to_document(&self, name: &str) -> Document {
        let mut lines = self.preamble.clone();
        for entry in &self.entries {
            lines.push(entry.header.clone());
            for row in &entry.rows {
                lines.push(format!("{}{}", row.indent, row.tokens.join(" ")));
            }
        }
        Document::from_lines(name, lines)
    }
}
