use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::cell::{CellError, CellValue};
use super::definition::{AnalysisSpec, Formula, SpecError};
use super::formula::{Namespace, VarRef};
use super::integrate::{AreaMeasurement, integrate};
use super::peaks::{PeakMeasurement, PeakSettings, measure_peak};
use super::ratios::{RatioPair, divide, ratio_pairs};
use crate::data::model::{MetadataValue, Spectrum};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Numeric policy knobs. Every field has a default so a session file only
/// lists what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    pub peak: PeakSettings,
    pub clip_negative_areas: bool,
    pub include_inverse_ratios: bool,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            peak: PeakSettings::default(),
            clip_negative_areas: true,
            include_inverse_ratios: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Result rows
// ---------------------------------------------------------------------------

/// Identifies the spectrum a row belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectrumId {
    pub file: String,
    /// 1-based position inside the file.
    pub index: usize,
    pub coordinates: Vec<f64>,
}

impl SpectrumId {
    pub fn new(file: impl Into<String>, index: usize) -> Self {
        SpectrumId {
            file: file.into(),
            index,
            coordinates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum RowStatus {
    Ok,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaResult {
    pub label: String,
    pub measurement: Result<AreaMeasurement, CellError>,
}

impl AreaResult {
    pub fn area(&self) -> CellValue {
        self.measurement.as_ref().map(|m| m.area).map_err(Clone::clone)
    }

    pub fn clamped(&self) -> bool {
        self.measurement.as_ref().is_ok_and(|m| m.clamped)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakResult {
    pub label: String,
    pub measurement: Result<PeakMeasurement, CellError>,
}

impl PeakResult {
    pub fn raw(&self) -> CellValue {
        self.measurement.as_ref().map(|m| m.raw).map_err(Clone::clone)
    }

    pub fn corrected(&self) -> CellValue {
        self.measurement.as_ref().map(|m| m.corrected).map_err(Clone::clone)
    }

    pub fn clamped(&self) -> bool {
        self.measurement.as_ref().is_ok_and(|m| m.clamped)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabeledValue {
    pub label: String,
    pub value: CellValue,
}

/// Everything computed for one spectrum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub id: SpectrumId,
    pub status: RowStatus,
    pub areas: Vec<AreaResult>,
    pub peaks: Vec<PeakResult>,
    pub ratios: Vec<LabeledValue>,
    pub peak_ratios: Vec<LabeledValue>,
    pub spectral_math: Vec<LabeledValue>,
    pub peak_spectral_math: Vec<LabeledValue>,
    pub metadata: BTreeMap<String, MetadataValue>,
}

fn find<'a>(values: &'a [LabeledValue], label: &str) -> Option<&'a CellValue> {
    values.iter().find(|v| v.label == label).map(|v| &v.value)
}

impl ResultRow {
    fn failed(id: SpectrumId, reason: String) -> Self {
        ResultRow {
            id,
            status: RowStatus::Failed(reason),
            areas: Vec::new(),
            peaks: Vec::new(),
            ratios: Vec::new(),
            peak_ratios: Vec::new(),
            spectral_math: Vec::new(),
            peak_spectral_math: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == RowStatus::Ok
    }

    pub fn area(&self, label: &str) -> Option<&AreaResult> {
        self.areas.iter().find(|a| a.label == label)
    }

    pub fn peak(&self, label: &str) -> Option<&PeakResult> {
        self.peaks.iter().find(|p| p.label == label)
    }

    pub fn ratio(&self, label: &str) -> Option<&CellValue> {
        find(&self.ratios, label)
    }

    pub fn peak_ratio(&self, label: &str) -> Option<&CellValue> {
        find(&self.peak_ratios, label)
    }

    pub fn spectral_math(&self, label: &str) -> Option<&CellValue> {
        find(&self.spectral_math, label)
    }

    pub fn peak_spectral_math(&self, label: &str) -> Option<&CellValue> {
        find(&self.peak_spectral_math, label)
    }

    /// Labels of ranges and peaks that were clamped to the spectrum's ends.
    pub fn clamped_labels(&self) -> Vec<&str> {
        let areas = self.areas.iter().filter(|a| a.clamped()).map(|a| a.label.as_str());
        let peaks = self.peaks.iter().filter(|p| p.clamped()).map(|p| p.label.as_str());
        areas.chain(peaks).collect()
    }
}

/// Column labels of every result group, in output order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportColumns {
    pub ranges: Vec<String>,
    pub peaks: Vec<String>,
    pub ratios: Vec<String>,
    pub peak_ratios: Vec<String>,
    pub spectral_math: Vec<String>,
    pub peak_spectral_math: Vec<String>,
}

// ---------------------------------------------------------------------------
// Formula namespace
// ---------------------------------------------------------------------------

/// Values a formula may reference: the scope's primary values (addressable by
/// label or `#n`) and its ratios (by label).
struct Scope<'a> {
    primary: &'a [(&'a str, CellValue)],
    ratios: &'a [LabeledValue],
}

impl Namespace for Scope<'_> {
    fn lookup(&self, var: &VarRef) -> Option<CellValue> {
        match var {
            VarRef::Position(n) => self.primary.get(n - 1).map(|(_, v)| v.clone()),
            VarRef::Label(label) => self
                .primary
                .iter()
                .find(|(l, _)| *l == label)
                .map(|(_, v)| v.clone())
                .or_else(|| find(self.ratios, label).cloned()),
        }
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Turns spectra into result rows for a fixed analysis.
#[derive(Debug, Clone)]
pub struct SpectrumProcessor {
    spec: AnalysisSpec,
    settings: ProcessingSettings,
    range_ratios: Vec<RatioPair>,
    peak_ratios: Vec<RatioPair>,
}

impl SpectrumProcessor {
    pub fn new(spec: AnalysisSpec, settings: ProcessingSettings) -> Result<Self, SpecError> {
        settings.peak.validate().map_err(SpecError::Setting)?;

        let range_labels: Vec<String> = spec.ranges.iter().map(|r| r.label.clone()).collect();
        let peak_labels: Vec<String> = spec.peaks.iter().map(|p| p.label.clone()).collect();
        let range_ratios = ratio_pairs(&range_labels, settings.include_inverse_ratios);
        let peak_ratios = ratio_pairs(&peak_labels, settings.include_inverse_ratios);

        let processor = SpectrumProcessor {
            spec,
            settings,
            range_ratios,
            peak_ratios,
        };
        for (formula, var) in processor.unresolved_references() {
            log::warn!("formula '{}': '{var}' matches no value, cells will read #NAME?", formula.label);
        }
        Ok(processor)
    }

    /// Formula variables that no range, peak or ratio of their scope provides.
    pub fn unresolved_references(&self) -> Vec<(&Formula, &VarRef)> {
        let known = |primary: Vec<&str>, ratios: &[RatioPair], var: &VarRef| match var {
            VarRef::Position(n) => (1..=primary.len()).contains(n),
            VarRef::Label(label) => {
                primary.contains(&label.as_str()) || ratios.iter().any(|r| &r.label == label)
            }
        };
        let range_labels = || self.spec.ranges.iter().map(|r| r.label.as_str()).collect();
        let peak_labels = || self.spec.peaks.iter().map(|p| p.label.as_str()).collect();

        let mut out = Vec::new();
        for formula in &self.spec.spectral_math {
            for var in formula.expr.variables() {
                if !known(range_labels(), &self.range_ratios, var) {
                    out.push((formula, var));
                }
            }
        }
        for formula in &self.spec.peak_spectral_math {
            for var in formula.expr.variables() {
                if !known(peak_labels(), &self.peak_ratios, var) {
                    out.push((formula, var));
                }
            }
        }
        out
    }

    pub fn spec(&self) -> &AnalysisSpec {
        &self.spec
    }

    pub fn settings(&self) -> &ProcessingSettings {
        &self.settings
    }

    pub fn columns(&self) -> ReportColumns {
        let labels = |formulas: &[Formula]| -> Vec<String> {
            formulas.iter().map(|f| f.label.clone()).collect()
        };
        ReportColumns {
            ranges: self.spec.ranges.iter().map(|r| r.label.clone()).collect(),
            peaks: self.spec.peaks.iter().map(|p| p.label.clone()).collect(),
            ratios: self.range_ratios.iter().map(|r| r.label.clone()).collect(),
            peak_ratios: self.peak_ratios.iter().map(|r| r.label.clone()).collect(),
            spectral_math: labels(&self.spec.spectral_math),
            peak_spectral_math: labels(&self.spec.peak_spectral_math),
        }
    }

    /// Row marking a spectrum that could not be read.
    pub fn failed_row(&self, id: SpectrumId, reason: impl Into<String>) -> ResultRow {
        ResultRow::failed(id, reason.into())
    }

    /// Process one spectrum. Problems end up in the row, never as a panic.
    pub fn process(&self, mut id: SpectrumId, spectrum: &Spectrum) -> ResultRow {
        if id.coordinates.is_empty() {
            id.coordinates = spectrum.coordinates.clone();
        }
        if let Err(e) = spectrum.validate() {
            log::warn!("{} #{}: invalid spectrum: {e}", id.file, id.index);
            return ResultRow::failed(id, e.to_string());
        }

        let areas: Vec<AreaResult> = self
            .spec
            .ranges
            .iter()
            .map(|range| AreaResult {
                label: range.label.clone(),
                measurement: integrate(spectrum, range, self.settings.clip_negative_areas),
            })
            .collect();
        let peaks: Vec<PeakResult> = self
            .spec
            .peaks
            .iter()
            .map(|peak| PeakResult {
                label: peak.label.clone(),
                measurement: measure_peak(spectrum, peak.position, &self.settings.peak),
            })
            .collect();

        let any_in_domain = areas
            .iter()
            .any(|a| a.measurement != Err(CellError::OutOfDomain))
            || peaks.iter().any(|p| !p.clamped());
        if !self.spec.is_empty() && !any_in_domain {
            let (lo, hi) = spectrum.domain();
            log::warn!("{} #{}: no range or peak inside {lo}..{hi}", id.file, id.index);
            let mut row =
                ResultRow::failed(id, format!("no range or peak overlaps {lo}..{hi}"));
            row.metadata = spectrum.metadata.clone();
            return row;
        }

        let area_values: Vec<(&str, CellValue)> =
            areas.iter().map(|a| (a.label.as_str(), a.area())).collect();
        let peak_values: Vec<(&str, CellValue)> =
            peaks.iter().map(|p| (p.label.as_str(), p.corrected())).collect();

        let ratios = apply_ratios(&self.range_ratios, &area_values);
        let peak_ratios = apply_ratios(&self.peak_ratios, &peak_values);

        let spectral_math = evaluate_all(
            &self.spec.spectral_math,
            &Scope {
                primary: &area_values,
                ratios: &ratios,
            },
        );
        let peak_spectral_math = evaluate_all(
            &self.spec.peak_spectral_math,
            &Scope {
                primary: &peak_values,
                ratios: &peak_ratios,
            },
        );

        let row = ResultRow {
            id,
            status: RowStatus::Ok,
            areas,
            peaks,
            ratios,
            peak_ratios,
            spectral_math,
            peak_spectral_math,
            metadata: spectrum.metadata.clone(),
        };
        let clamped = row.clamped_labels();
        if !clamped.is_empty() {
            log::warn!(
                "{} #{}: clamped to spectrum ends: {}",
                row.id.file,
                row.id.index,
                clamped.join(", ")
            );
        }
        log::debug!("{} #{}: processed", row.id.file, row.id.index);
        row
    }
}

fn apply_ratios(pairs: &[RatioPair], values: &[(&str, CellValue)]) -> Vec<LabeledValue> {
    pairs
        .iter()
        .map(|pair| LabeledValue {
            label: pair.label.clone(),
            value: divide(values, pair),
        })
        .collect()
}

fn evaluate_all(formulas: &[Formula], scope: &Scope<'_>) -> Vec<LabeledValue> {
    formulas
        .iter()
        .map(|f| LabeledValue {
            label: f.label.clone(),
            value: f.expr.evaluate(scope),
        })
        .collect()
}
