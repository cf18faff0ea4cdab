//! Range / peak / formula definitions and their textual forms.
//!
//! * ranges:   `1300,1400; G=1550,1620`
//! * peaks:    `1350; G=1580`
//! * formulas: `D/G; ratio=[1300-1400]/(#1+#2)`
//!
//! Entries are `;`-separated, an optional `label=` prefix names an entry,
//! blank entries are ignored.

use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use super::formula::{Expr, FormulaError, is_identifier};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpecError {
    #[error("range '{entry}': {reason}")]
    Range { entry: String, reason: String },

    #[error("peak '{entry}': {reason}")]
    Peak { entry: String, reason: String },

    #[error("formula '{entry}': {source}")]
    Formula {
        entry: String,
        #[source]
        source: FormulaError,
    },

    #[error("invalid label '{0}' (use letters, digits and '_', not starting with a digit)")]
    InvalidLabel(String),

    #[error("label '{0}' is used twice")]
    DuplicateLabel(String),

    #[error("invalid setting: {0}")]
    Setting(String),
}

/// A wavenumber interval to integrate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Range {
    pub label: String,
    pub start: f64,
    pub end: f64,
}

/// A wavenumber at which intensity is measured.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Peak {
    pub label: String,
    pub position: f64,
}

/// Which computed values a formula can see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaScope {
    /// Spectral Math: range areas and range ratios.
    Areas,
    /// Peak Spectral Math: peak intensities and peak ratios.
    Peaks,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    pub label: String,
    pub source: String,
    pub scope: FormulaScope,
    pub expr: Expr,
}

/// Everything the user asked to compute, validated up front.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisSpec {
    pub ranges: Vec<Range>,
    pub peaks: Vec<Peak>,
    pub spectral_math: Vec<Formula>,
    pub peak_spectral_math: Vec<Formula>,
}

impl AnalysisSpec {
    /// Parse all four text fields; the first malformed entry aborts.
    pub fn parse(
        ranges: &str,
        peaks: &str,
        spectral_math: &str,
        peak_spectral_math: &str,
    ) -> Result<Self, SpecError> {
        Ok(AnalysisSpec {
            ranges: parse_ranges(ranges)?,
            peaks: parse_peaks(peaks)?,
            spectral_math: parse_formulas(spectral_math, FormulaScope::Areas)?,
            peak_spectral_math: parse_formulas(peak_spectral_math, FormulaScope::Peaks)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty() && self.peaks.is_empty()
    }
}

/// Shortest decimal form: `1300` rather than `1300.0`.
pub fn format_number(v: f64) -> String {
    format!("{v}")
}

fn entries(text: &str) -> impl Iterator<Item = &str> {
    text.split(';').map(str::trim).filter(|e| !e.is_empty())
}

/// Split an optional `label=` prefix off an entry.
fn split_label(entry: &str) -> Result<(Option<String>, &str), SpecError> {
    match entry.split_once('=') {
        Some((label, body)) => {
            let label = label.trim();
            if !is_identifier(label) {
                return Err(SpecError::InvalidLabel(label.to_string()));
            }
            Ok((Some(label.to_string()), body.trim()))
        }
        None => Ok((None, entry)),
    }
}

fn check_unique<'a>(labels: impl Iterator<Item = &'a str>) -> Result<(), SpecError> {
    let mut seen = BTreeSet::new();
    for label in labels {
        if !seen.insert(label) {
            return Err(SpecError::DuplicateLabel(label.to_string()));
        }
    }
    Ok(())
}

fn parse_bound(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn parse_ranges(text: &str) -> Result<Vec<Range>, SpecError> {
    let mut ranges = Vec::new();
    for entry in entries(text) {
        let fail = |reason: &str| SpecError::Range {
            entry: entry.to_string(),
            reason: reason.to_string(),
        };
        let (label, body) = split_label(entry)?;
        let bounds: Vec<&str> = body.split(',').collect();
        let [start, end] = bounds.as_slice() else {
            return Err(fail("expected 'start,end'"));
        };
        let start = parse_bound(start).ok_or_else(|| fail("start is not a number"))?;
        let end = parse_bound(end).ok_or_else(|| fail("end is not a number"))?;
        if start >= end {
            return Err(fail("start must be below end"));
        }
        ranges.push(Range {
            label: label.unwrap_or_else(|| {
                format!("{}-{}", format_number(start), format_number(end))
            }),
            start,
            end,
        });
    }
    check_unique(ranges.iter().map(|r| r.label.as_str()))?;
    Ok(ranges)
}

pub fn parse_peaks(text: &str) -> Result<Vec<Peak>, SpecError> {
    let mut peaks = Vec::new();
    for entry in entries(text) {
        let (label, body) = split_label(entry)?;
        let position = parse_bound(body).ok_or_else(|| SpecError::Peak {
            entry: entry.to_string(),
            reason: "position is not a number".to_string(),
        })?;
        peaks.push(Peak {
            label: label.unwrap_or_else(|| format_number(position)),
            position,
        });
    }
    check_unique(peaks.iter().map(|p| p.label.as_str()))?;
    Ok(peaks)
}

pub fn parse_formulas(text: &str, scope: FormulaScope) -> Result<Vec<Formula>, SpecError> {
    let mut formulas = Vec::new();
    for entry in entries(text) {
        let (label, body) = split_label(entry)?;
        let expr = Expr::parse(body).map_err(|source| SpecError::Formula {
            entry: entry.to_string(),
            source,
        })?;
        formulas.push(Formula {
            label: label.unwrap_or_else(|| body.to_string()),
            source: body.to_string(),
            scope,
            expr,
        });
    }
    check_unique(formulas.iter().map(|f| f.label.as_str()))?;
    Ok(formulas)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges_and_peaks_from_text() {
        let spec = AnalysisSpec::parse("100,200;300,350", "1580;1600", "", "").unwrap();
        assert_eq!(spec.ranges.len(), 2);
        assert_eq!(spec.ranges[0].label, "100-200");
        assert_eq!(spec.ranges[1].start, 300.0);
        assert_eq!(spec.peaks.len(), 2);
        assert_eq!(spec.peaks[1].label, "1600");
        assert!(spec.spectral_math.is_empty());
    }

    #[test]
    fn test_labels_whitespace_and_blank_entries() {
        let ranges = parse_ranges(" D = 1300.5 , 1400 ;; G=1550,1620; ").unwrap();
        assert_eq!(ranges[0].label, "D");
        assert_eq!(ranges[0].start, 1300.5);
        assert_eq!(ranges[1].label, "G");

        let ranges = parse_ranges("1300.5,1400").unwrap();
        assert_eq!(ranges[0].label, "1300.5-1400");
    }

    #[test]
    fn test_malformed_entries_are_named() {
        let err = parse_ranges("100,200;300").unwrap_err();
        assert_eq!(
            err,
            SpecError::Range {
                entry: "300".into(),
                reason: "expected 'start,end'".into()
            }
        );
        assert!(matches!(parse_ranges("200,100"), Err(SpecError::Range { .. })));
        assert!(matches!(parse_ranges("a,100"), Err(SpecError::Range { .. })));
        assert!(matches!(parse_peaks("1580;x"), Err(SpecError::Peak { entry, .. }) if entry == "x"));
        assert!(matches!(parse_peaks("1 2=5"), Err(SpecError::InvalidLabel(_))));
        assert_eq!(
            parse_peaks("1580;1580").unwrap_err(),
            SpecError::DuplicateLabel("1580".into())
        );
    }

    #[test]
    fn test_formulas_keep_scope_and_label() {
        let f = parse_formulas("D/G; ratio = #1/(#1+#2)", FormulaScope::Peaks).unwrap();
        assert_eq!(f[0].label, "D/G");
        assert_eq!(f[1].label, "ratio");
        assert_eq!(f[1].source, "#1/(#1+#2)");
        assert_eq!(f[1].scope, FormulaScope::Peaks);

        let err = parse_formulas("D/G; 1 +", FormulaScope::Areas).unwrap_err();
        assert!(matches!(err, SpecError::Formula { entry, .. } if entry == "1 +"));
    }
}
