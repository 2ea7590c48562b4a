//! Configuration mutation and run orchestration for fisheries simulation experiments.
//!
//! The crate keeps a strict separation:
//!
//! - **[`core`]**: pure transformations of the solver's plain-text configuration
//!   files (document model, mutators, report parsing). No I/O.
//! - **[`io`]**: side effects (model directories, unit records, solver processes),
//!   isolated behind the [`io::solver::Solver`] trait so tests run without the solver.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
