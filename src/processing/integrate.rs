use serde::Serialize;

use super::cell::CellError;
use super::definition::Range;
use crate::data::model::Spectrum;

/// Result of integrating one range of one spectrum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaMeasurement {
    /// Trapezoidal area of the samples inside the range.
    pub raw: f64,
    /// Area under the straight line joining the first and last sample.
    pub baseline: f64,
    /// `raw - baseline`, clipped at zero when requested.
    pub area: f64,
    /// Wavenumbers of the first and last sample actually used.
    pub from: f64,
    pub to: f64,
    /// The range reached past the spectrum and was clamped to its ends.
    pub clamped: bool,
}

/// Composite trapezoidal rule over paired samples.
pub fn trapezoid(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xw, yw)| (xw[1] - xw[0]) * (yw[0] + yw[1]) * 0.5)
        .sum()
}

/// Integrate `range` over a validated spectrum with linear baseline removal.
///
/// Bounds that fall between samples are clipped to the nearest sample
/// inside the range; bounds beyond the spectrum are clamped to its first or
/// last sample and the measurement is flagged. A range holding fewer than
/// two samples has no area and measures zero at the nearest sample.
pub fn integrate(
    spectrum: &Spectrum,
    range: &Range,
    clip_negative: bool,
) -> Result<AreaMeasurement, CellError> {
    let (lo, hi) = spectrum.domain();
    if range.end < lo || range.start > hi {
        return Err(CellError::OutOfDomain);
    }
    let clamped = range.start < lo || range.end > hi;

    let x = &spectrum.x;
    let y = &spectrum.y;
    let first = x.partition_point(|&xi| xi < range.start);
    let last = x.partition_point(|&xi| xi <= range.end).saturating_sub(1);
    if first >= last {
        let at = x[spectrum.nearest_index((range.start.max(lo) + range.end.min(hi)) * 0.5)];
        return Ok(AreaMeasurement {
            raw: 0.0,
            baseline: 0.0,
            area: 0.0,
            from: at,
            to: at,
            clamped,
        });
    }

    let raw = trapezoid(&x[first..=last], &y[first..=last]);
    let baseline = (y[first] + y[last]) * 0.5 * (x[last] - x[first]);
    let mut area = raw - baseline;
    if clip_negative && area < 0.0 {
        area = 0.0;
    }

    Ok(AreaMeasurement {
        raw,
        baseline,
        area,
        from: x[first],
        to: x[last],
        clamped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: f64, end: f64) -> Range {
        Range {
            label: "r".into(),
            start,
            end,
        }
    }

    /// Triangle of height 10 on [40, 60], sampled every 0.5 on [0, 100].
    fn triangle() -> Spectrum {
        let x: Vec<f64> = (0..=200).map(|i| i as f64 * 0.5).collect();
        let y = x
            .iter()
            .map(|&xi| (10.0 - (xi - 50.0).abs()).max(0.0))
            .collect();
        Spectrum::new(x, y)
    }

    #[test]
    fn test_triangle_area_is_analytic() {
        let m = integrate(&triangle(), &range(30.0, 70.0), true).unwrap();
        assert!((m.area - 100.0).abs() < 1e-9, "area = {}", m.area);
        assert_eq!(m.baseline, 0.0);
        assert!(!m.clamped);
    }

    #[test]
    fn test_flat_spectrum_corrects_to_zero() {
        let x: Vec<f64> = (0..50).map(|i| 100.0 + i as f64 * 1.7).collect();
        let sp = Spectrum::new(x.clone(), vec![42.0; x.len()]);
        for (a, b) in [(100.0, 150.0), (110.3, 111.1), (120.0, 183.3)] {
            let m = integrate(&sp, &range(a, b), false).unwrap();
            assert!(m.area.abs() < 1e-9, "range {a}..{b}: {}", m.area);
        }
    }

    #[test]
    fn test_sloped_background_is_removed() {
        // Linear background 2x + 5 plus the triangle
        let mut sp = triangle();
        for (yi, xi) in sp.y.iter_mut().zip(&sp.x) {
            *yi += 2.0 * xi + 5.0;
        }
        let m = integrate(&sp, &range(30.0, 70.0), true).unwrap();
        assert!((m.area - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_bounds_between_samples_clip_inward() {
        let m = integrate(&triangle(), &range(30.2, 69.9), true).unwrap();
        assert_eq!(m.from, 30.5);
        assert_eq!(m.to, 69.5);
    }

    #[test]
    fn test_out_of_domain_is_clamped_or_rejected() {
        let m = integrate(&triangle(), &range(-10.0, 70.0), true).unwrap();
        assert!(m.clamped);
        assert_eq!(m.from, 0.0);

        assert_eq!(
            integrate(&triangle(), &range(150.0, 200.0), true),
            Err(CellError::OutOfDomain)
        );
    }

    #[test]
    fn test_narrow_ranges_measure_zero() {
        // Between two samples: nothing inside
        let m = integrate(&triangle(), &range(10.2, 10.45), true).unwrap();
        assert_eq!(m.area, 0.0);
        assert_eq!(m.from, 10.5);
        assert_eq!(m.to, 10.5);

        // Exactly one sample inside
        let m = integrate(&triangle(), &range(49.8, 50.2), true).unwrap();
        assert_eq!((m.raw, m.baseline, m.area), (0.0, 0.0, 0.0));
        assert_eq!(m.from, 50.0);

        // Narrow range hanging over the last sample is still flagged
        let m = integrate(&triangle(), &range(99.9, 120.0), true).unwrap();
        assert!(m.clamped);
        assert_eq!(m.area, 0.0);
    }

    #[test]
    fn test_negative_area_clipping() {
        // A dip below the chord
        let sp = Spectrum::new(vec![0.0, 1.0, 2.0], vec![1.0, 0.0, 1.0]);
        let clipped = integrate(&sp, &range(0.0, 2.0), true).unwrap();
        assert_eq!(clipped.area, 0.0);
        let signed = integrate(&sp, &range(0.0, 2.0), false).unwrap();
        assert!((signed.area + 1.0).abs() < 1e-12);
    }
}
