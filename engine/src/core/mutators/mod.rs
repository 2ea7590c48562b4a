//! Configuration mutators, one per experimental factor.
//!
//! Every mutator validates its parameters before touching a document and returns new
//! documents rather than editing in place. Per-row vector arguments follow one rule
//! everywhere: a single value is repeated for every row, a full-length vector is used as
//! is, and any other length is rejected.

pub mod estimation;
pub mod fishing;
pub mod index;
pub mod retro;
pub mod starter;
pub mod time_varying;

use crate::core::error::{SimError, SimResult};

/// Expand `values` to `len` rows.
pub fn broadcast<T: Clone>(name: &str, values: &[T], len: usize) -> SimResult<Vec<T>> {
    match values.len() {
        1 => Ok(vec![values[0].clone(); len]),
        n if n == len => Ok(values.to_vec()),
        n => Err(SimError::contract(format!(
            "{name} has {n} values; expected 1 or {len}"
        ))),
    }
}
