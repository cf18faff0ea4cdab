/// Data layer: spectrum types and file loading.
///
/// Architecture:
/// ```text
///  .txt / .spc / .csv / .json / .parquet
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → SpectralDataset   (spc: binary SPC reader)
///   └──────────┘
///        │
///        ▼
///   ┌───────────────┐
///   │ SpectralDataset │  Vec<Spectrum>, ascending x, map coordinates
///   └───────────────┘
/// ```

pub mod loader;
pub mod model;
pub mod spc;
