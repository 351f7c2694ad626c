//! Errata Mirror Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging and error handling for the errata mirror workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`ErrataError`] and the [`Result`] alias
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` variables
//! - **Types**: package identifiers shared with the read API (NEVRA/EVRA)
//!
//! # Example
//!
//! ```no_run
//! use errata_common::types::Nevra;
//!
//! fn main() -> errata_common::Result<()> {
//!     let nevra = Nevra::parse("kernel-5.10.13-200.fc31.x86_64")?;
//!     assert_eq!(nevra.evra(), "5.10.13-200.fc31.x86_64");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{ErrataError, Result};
