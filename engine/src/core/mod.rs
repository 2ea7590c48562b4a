//! Deterministic, pure logic over solver configuration files.
//!
//! Core modules are free of I/O side effects. They take documents in and return new
//! documents, which keeps every mutator testable on in-memory fixtures.

pub mod document;
pub mod error;
pub mod fields;
pub mod mutators;
pub mod par;
pub mod report;
pub mod types;
