use serde::{Deserialize, Serialize};

use super::cell::CellError;
use crate::data::model::Spectrum;

/// Where the local baseline under a peak is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakBaseline {
    /// `n` samples either side of the sample nearest the peak.
    Samples(usize),
    /// Flanks at `position - left` and `position + right` (wavenumber units),
    /// each snapped to the nearest sample.
    Offsets { left: f64, right: f64 },
}

impl Default for PeakBaseline {
    fn default() -> Self {
        PeakBaseline::Samples(3)
    }
}

/// How the raw intensity at the peak position is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakSampling {
    #[default]
    Nearest,
    Interpolate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakSettings {
    pub baseline: PeakBaseline,
    pub sampling: PeakSampling,
    /// Report the tallest point above the baseline inside the flank window
    /// instead of the value at the requested position.
    pub refine_to_local_max: bool,
}

impl PeakSettings {
    pub fn validate(&self) -> Result<(), String> {
        match self.baseline {
            PeakBaseline::Samples(0) => Err("peak baseline needs at least 1 flank sample".into()),
            PeakBaseline::Offsets { left, right }
                if !(left > 0.0 && right > 0.0 && left.is_finite() && right.is_finite()) =>
            {
                Err(format!("peak baseline offsets must be positive, got {left} / {right}"))
            }
            _ => Ok(()),
        }
    }
}

/// Result of measuring one peak of one spectrum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakMeasurement {
    /// Wavenumber the intensity was read at.
    pub position: f64,
    pub raw: f64,
    /// Baseline value under `position`.
    pub baseline: f64,
    /// `raw - baseline`.
    pub corrected: f64,
    /// The requested position lay outside the spectrum.
    pub clamped: bool,
}

/// Measure the intensity at `position` on a validated spectrum.
pub fn measure_peak(
    spectrum: &Spectrum,
    position: f64,
    settings: &PeakSettings,
) -> Result<PeakMeasurement, CellError> {
    let (lo, hi) = spectrum.domain();
    let clamped = position < lo || position > hi;
    let position = position.clamp(lo, hi);

    let x = &spectrum.x;
    let y = &spectrum.y;
    let n = spectrum.len();
    let idx = spectrum.nearest_index(position);

    let (left, right) = match settings.baseline {
        PeakBaseline::Samples(h) => (idx.saturating_sub(h), (idx + h).min(n - 1)),
        PeakBaseline::Offsets { left, right } => (
            spectrum.nearest_index(position - left),
            spectrum.nearest_index(position + right),
        ),
    };
    if right <= left {
        return Err(CellError::TooFewSamples);
    }

    let slope = (y[right] - y[left]) / (x[right] - x[left]);
    let baseline_at = |xq: f64| y[left] + slope * (xq - x[left]);

    if settings.refine_to_local_max {
        let mut best = left;
        for k in left..=right {
            if y[k] - baseline_at(x[k]) > y[best] - baseline_at(x[best]) {
                best = k;
            }
        }
        let baseline = baseline_at(x[best]);
        return Ok(PeakMeasurement {
            position: x[best],
            raw: y[best],
            baseline,
            corrected: y[best] - baseline,
            clamped,
        });
    }

    let (at, raw) = match settings.sampling {
        PeakSampling::Nearest => (x[idx], y[idx]),
        PeakSampling::Interpolate => (position, spectrum.interpolate(position)),
    };
    let baseline = baseline_at(at);
    Ok(PeakMeasurement {
        position: at,
        raw,
        baseline,
        corrected: raw - baseline,
        clamped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Gaussian band at 1580 on a sloped background, 1 cm⁻¹ spacing.
    fn band() -> Spectrum {
        let x: Vec<f64> = (1500..=1660).map(|v| v as f64).collect();
        let y = x
            .iter()
            .map(|&xi| 100.0 * (-(xi - 1580.0).powi(2) / (2.0 * 4.0f64.powi(2))).exp() + 0.5 * xi)
            .collect();
        Spectrum::new(x, y)
    }

    #[test]
    fn test_nearest_sample_with_default_flanks() {
        let sp = band();
        let m = measure_peak(&sp, 1580.2, &PeakSettings::default()).unwrap();
        assert_eq!(m.position, 1580.0);
        assert!((m.raw - (100.0 + 790.0)).abs() < 1e-9);
        // flanks at 1577 / 1583 sit on the band shoulders, so part of it is lost
        assert!(m.corrected > 0.0 && m.corrected < 100.0);
        assert!(!m.clamped);
    }

    #[test]
    fn test_wide_offsets_recover_band_height() {
        let settings = PeakSettings {
            baseline: PeakBaseline::Offsets {
                left: 40.0,
                right: 40.0,
            },
            ..Default::default()
        };
        let m = measure_peak(&band(), 1580.0, &settings).unwrap();
        assert!((m.corrected - 100.0).abs() < 1e-6, "corrected = {}", m.corrected);
    }

    #[test]
    fn test_interpolated_sampling() {
        let sp = Spectrum::new(vec![0.0, 1.0, 2.0, 3.0, 4.0], vec![0.0, 0.0, 4.0, 0.0, 0.0]);
        let settings = PeakSettings {
            baseline: PeakBaseline::Samples(2),
            sampling: PeakSampling::Interpolate,
            ..Default::default()
        };
        let m = measure_peak(&sp, 1.5, &settings).unwrap();
        assert_eq!(m.position, 1.5);
        assert_eq!(m.raw, 2.0);
        assert_eq!(m.corrected, 2.0);
    }

    #[test]
    fn test_refine_moves_to_local_max() {
        let settings = PeakSettings {
            baseline: PeakBaseline::Samples(10),
            refine_to_local_max: true,
            ..Default::default()
        };
        let m = measure_peak(&band(), 1578.0, &settings).unwrap();
        assert_eq!(m.position, 1580.0);
    }

    #[test]
    fn test_outside_domain_is_clamped() {
        let m = measure_peak(&band(), 2000.0, &PeakSettings::default()).unwrap();
        assert!(m.clamped);
        assert_eq!(m.position, 1660.0);
        // baseline passes through the boundary sample itself
        assert!(m.corrected.abs() < 1e-9);
    }

    #[test]
    fn test_settings_validation() {
        assert!(PeakSettings::default().validate().is_ok());
        let bad = PeakSettings {
            baseline: PeakBaseline::Offsets {
                left: -1.0,
                right: 5.0,
            },
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
