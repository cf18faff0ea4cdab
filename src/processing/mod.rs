/// Spectrum processing: integration, peaks, ratios and Spectral Math.
///
/// ```text
///   range / peak / formula text
///        │  definition::AnalysisSpec::parse   (errors stop the run)
///        ▼
///   ┌─────────────────┐   per spectrum
///   │ SpectrumProcessor │ ─► integrate   → areas
///   └─────────────────┘ ─► peaks       → raw / corrected intensities
///                        ─► ratios      → pairwise a/b
///                        ─► formula     → Spectral Math cells
///        │
///        ▼
///    ResultRow  (cell errors stay in their cell)
/// ```

pub mod cell;
pub mod definition;
pub mod formula;
pub mod integrate;
pub mod peaks;
pub mod processor;
pub mod ratios;

pub use cell::{CellError, CellValue};
pub use definition::{AnalysisSpec, SpecError};
pub use processor::{ProcessingSettings, ResultRow, RowStatus, SpectrumId, SpectrumProcessor};
