//! Filesystem and process side effects: model directories, unit records, solver runs.

pub mod files;
pub mod layout;
pub mod process;
pub mod solver;
pub mod tv;
pub mod unit_state;
