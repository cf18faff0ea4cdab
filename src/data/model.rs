use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// MetadataValue – a single cell in a metadata column
// ---------------------------------------------------------------------------

/// A dynamically-typed metadata value carried through from tabular inputs
/// (CSV / JSON / Parquet) to the exported sheets.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Null => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Spectrum – one (wavenumber, intensity) trace
// ---------------------------------------------------------------------------

/// Reasons a spectrum cannot be processed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpectrumError {
    #[error("x has {x} values but y has {y}")]
    LengthMismatch { x: usize, y: usize },

    #[error("spectrum has {0} samples, at least 2 are required")]
    TooFewSamples(usize),

    #[error("non-finite value at sample {0}")]
    NonFinite(usize),

    #[error("wavenumbers not strictly increasing at sample {0}")]
    NotIncreasing(usize),
}

/// A single spectrum.
#[derive(Debug, Clone, Default)]
pub struct Spectrum {
    /// Wavenumber axis (x), ascending after loading.
    pub x: Vec<f64>,
    /// Intensity axis (y) – same length as `x`.
    pub y: Vec<f64>,
    /// Map coordinates (empty for single-spectrum files).
    pub coordinates: Vec<f64>,
    /// Dynamic metadata columns: column_name → value.
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl Spectrum {
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Self {
        Spectrum {
            x,
            y,
            ..Default::default()
        }
    }

    pub fn with_coordinates(mut self, coordinates: Vec<f64>) -> Self {
        self.coordinates = coordinates;
        self
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Reverse both axes when the wavenumbers were stored high → low.
    /// Instruments commonly export descending axes.
    pub fn ensure_ascending(&mut self) {
        if self.x.len() >= 2 && self.x[0] > self.x[self.x.len() - 1] {
            self.x.reverse();
            self.y.reverse();
        }
    }

    /// Check the sample invariants the processor relies on.
    pub fn validate(&self) -> Result<(), SpectrumError> {
        if self.x.len() != self.y.len() {
            return Err(SpectrumError::LengthMismatch {
                x: self.x.len(),
                y: self.y.len(),
            });
        }
        if self.x.len() < 2 {
            return Err(SpectrumError::TooFewSamples(self.x.len()));
        }
        for (i, (xi, yi)) in self.x.iter().zip(&self.y).enumerate() {
            if !xi.is_finite() || !yi.is_finite() {
                return Err(SpectrumError::NonFinite(i));
            }
        }
        if let Some(i) = self.x.windows(2).position(|w| w[1] <= w[0]) {
            return Err(SpectrumError::NotIncreasing(i + 1));
        }
        Ok(())
    }

    /// `(first, last)` wavenumber. Only meaningful on a validated spectrum.
    pub fn domain(&self) -> (f64, f64) {
        (self.x[0], self.x[self.x.len() - 1])
    }

    /// Index of the sample closest to `position` (ties go to the lower index).
    pub fn nearest_index(&self, position: f64) -> usize {
        let upper = self.x.partition_point(|&xi| xi < position);
        if upper == 0 {
            return 0;
        }
        if upper >= self.x.len() {
            return self.x.len() - 1;
        }
        let lower = upper - 1;
        if position - self.x[lower] <= self.x[upper] - position {
            lower
        } else {
            upper
        }
    }

    /// Linear interpolation of the intensity at `position`, clamped to the
    /// boundary samples outside the domain.
    pub fn interpolate(&self, position: f64) -> f64 {
        let upper = self.x.partition_point(|&xi| xi < position);
        if upper == 0 {
            return self.y[0];
        }
        if upper >= self.x.len() {
            return self.y[self.y.len() - 1];
        }
        let lower = upper - 1;
        let t = (position - self.x[lower]) / (self.x[upper] - self.x[lower]);
        self.y[lower] + t * (self.y[upper] - self.y[lower])
    }
}

// ---------------------------------------------------------------------------
// SpectralDataset – every spectrum read from one file
// ---------------------------------------------------------------------------

/// All spectra parsed from one input file.
#[derive(Debug, Clone)]
pub struct SpectralDataset {
    /// All spectra, in file order.
    pub spectra: Vec<Spectrum>,
    /// Entries of `spectra` that could not be read, with the reason. Their
    /// slot holds an empty spectrum carrying only what was recoverable.
    pub rejected: BTreeMap<usize, String>,
}

impl SpectralDataset {
    /// Wrap the loaded spectra, normalising every axis to ascending order.
    pub fn from_spectra(mut spectra: Vec<Spectrum>) -> Self {
        for sp in &mut spectra {
            sp.ensure_ascending();
        }
        SpectralDataset {
            spectra,
            rejected: BTreeMap::new(),
        }
    }

    pub fn with_rejected(mut self, rejected: BTreeMap<usize, String>) -> Self {
        self.rejected = rejected;
        self
    }

    /// Why spectrum `index` could not be read, if it could not.
    pub fn rejection(&self, index: usize) -> Option<&str> {
        self.rejected.get(&index).map(String::as_str)
    }

    /// Number of spectra.
    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    /// Whether the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }

    /// True when the file held more than one spectrum or carried coordinates.
    pub fn is_map(&self) -> bool {
        self.spectra.len() > 1 || self.spectra.iter().any(|s| !s.coordinates.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Spectrum {
        Spectrum::new(vec![0.0, 1.0, 2.0, 3.0], vec![0.0, 10.0, 20.0, 30.0])
    }

    #[test]
    fn test_nearest_index() {
        let sp = ramp();
        assert_eq!(sp.nearest_index(-5.0), 0);
        assert_eq!(sp.nearest_index(1.4), 1);
        assert_eq!(sp.nearest_index(1.6), 2);
        assert_eq!(sp.nearest_index(1.5), 1);
        assert_eq!(sp.nearest_index(99.0), 3);
    }

    #[test]
    fn test_interpolate() {
        let sp = ramp();
        assert!((sp.interpolate(1.25) - 12.5).abs() < 1e-12);
        assert_eq!(sp.interpolate(-1.0), 0.0);
        assert_eq!(sp.interpolate(10.0), 30.0);
    }

    #[test]
    fn test_validate_rejects_bad_axes() {
        let sp = Spectrum::new(vec![0.0, 1.0, 1.0], vec![1.0, 2.0, 3.0]);
        assert_eq!(sp.validate(), Err(SpectrumError::NotIncreasing(2)));

        let sp = Spectrum::new(vec![0.0, 1.0], vec![1.0]);
        assert!(matches!(sp.validate(), Err(SpectrumError::LengthMismatch { .. })));

        let sp = Spectrum::new(vec![0.0, 1.0], vec![1.0, f64::NAN]);
        assert_eq!(sp.validate(), Err(SpectrumError::NonFinite(1)));

        assert!(ramp().validate().is_ok());
    }

    #[test]
    fn test_descending_axis_is_reversed() {
        let sp = Spectrum::new(vec![3.0, 2.0, 1.0], vec![30.0, 20.0, 10.0]);
        let ds = SpectralDataset::from_spectra(vec![sp]);
        assert_eq!(ds.spectra[0].x, vec![1.0, 2.0, 3.0]);
        assert_eq!(ds.spectra[0].y, vec![10.0, 20.0, 30.0]);
        assert!(!ds.is_map());
    }
}
