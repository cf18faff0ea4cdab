//! Baseline-corrected band integration, peak intensities, ratios and
//! user formulas for Raman spectra.
//!
//! ```text
//!  Session ──► data::loader ──► processing::SpectrumProcessor ──► batch::Report ──► export
//! ```

pub mod batch;
pub mod data;
pub mod export;
pub mod processing;
pub mod session;

pub use batch::{BatchRunner, Report};
pub use session::Session;
