use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::batch::{BatchRunner, Report};
use crate::data::loader;
use crate::processing::{AnalysisSpec, ProcessingSettings, SpecError, SpectrumProcessor};

// ---------------------------------------------------------------------------
// Session – everything one run needs, independent of any front-end
// ---------------------------------------------------------------------------

/// A processing session, usually read from a JSON file:
///
/// ```json
/// {
///   "folder": "spectra",
///   "recursive": true,
///   "ranges": "D=1300,1400; G=1550,1620",
///   "peaks": "1350; 1580",
///   "spectral_math": "D/(D+G)",
///   "settings": { "peak": { "baseline": { "samples": 5 } } },
///   "output": "results"
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    /// Folder scanned for supported files (ignored when `files` is given).
    pub folder: Option<PathBuf>,
    /// Explicit input files, processed in the given order.
    pub files: Vec<PathBuf>,
    /// Also scan sub-folders of `folder`.
    pub recursive: bool,

    pub ranges: String,
    pub peaks: String,
    pub spectral_math: String,
    pub peak_spectral_math: String,

    pub settings: ProcessingSettings,

    /// Directory the report sheets are written to.
    pub output: Option<PathBuf>,
}

impl Session {
    /// Read a session file. Relative paths are taken relative to the file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading session file {}", path.display()))?;
        let mut session: Session = serde_json::from_str(&text)
            .with_context(|| format!("parsing session file {}", path.display()))?;

        if let Some(base) = path.parent() {
            session.resolve_paths(base);
        }
        Ok(session)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        self.folder.iter_mut().for_each(resolve);
        self.files.iter_mut().for_each(resolve);
        self.output.iter_mut().for_each(resolve);
    }

    /// Parse the range / peak / formula text into a ready processor.
    pub fn processor(&self) -> Result<SpectrumProcessor, SpecError> {
        let spec = AnalysisSpec::parse(
            &self.ranges,
            &self.peaks,
            &self.spectral_math,
            &self.peak_spectral_math,
        )?;
        SpectrumProcessor::new(spec, self.settings.clone())
    }

    /// The files this session covers, in processing order.
    pub fn input_paths(&self) -> Result<Vec<PathBuf>> {
        if !self.files.is_empty() {
            return Ok(self.files.clone());
        }
        match &self.folder {
            Some(folder) if folder.is_dir() => loader::collect_inputs(folder, self.recursive),
            Some(folder) => bail!("input folder {} does not exist", folder.display()),
            None => bail!("session lists neither 'files' nor 'folder'"),
        }
    }

    /// Validate the definitions, then process every input.
    pub fn run(&self) -> Result<Report> {
        let processor = self.processor().context("invalid analysis definition")?;
        if processor.spec().is_empty() {
            bail!("no ranges or peaks defined");
        }

        let inputs = self.input_paths()?;
        if inputs.is_empty() {
            bail!("no spectra found to process");
        }
        log::info!(
            "Processing {} file(s): {} range(s), {} peak(s)",
            inputs.len(),
            processor.spec().ranges.len(),
            processor.spec().peaks.len()
        );

        Ok(BatchRunner::new(&processor).run(&inputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let session: Session = serde_json::from_str(r#"{ "ranges": "100,200" }"#).unwrap();
        assert_eq!(session.ranges, "100,200");
        assert!(session.files.is_empty());
        assert!(session.settings.clip_negative_areas);
    }

    #[test]
    fn test_nested_settings() {
        let json = r#"{
            "settings": {
                "peak": { "baseline": { "offsets": { "left": 20, "right": 25 } },
                          "sampling": "interpolate" },
                "include_inverse_ratios": true
            }
        }"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert!(session.settings.include_inverse_ratios);
        assert_eq!(
            session.settings.peak.baseline,
            crate::processing::peaks::PeakBaseline::Offsets {
                left: 20.0,
                right: 25.0
            }
        );
    }

    #[test]
    fn test_relative_paths_resolved() {
        let mut session = Session {
            folder: Some(PathBuf::from("spectra")),
            output: Some(PathBuf::from("/abs/out")),
            ..Default::default()
        };
        session.resolve_paths(Path::new("/data/project"));
        assert_eq!(session.folder, Some(PathBuf::from("/data/project/spectra")));
        assert_eq!(session.output, Some(PathBuf::from("/abs/out")));
    }

    #[test]
    fn test_spec_errors_stop_before_processing() {
        let session = Session {
            ranges: "100,200;oops".into(),
            folder: Some(PathBuf::from("/nonexistent")),
            ..Default::default()
        };
        let err = session.run().unwrap_err();
        assert!(format!("{err:#}").contains("oops"));
    }

    #[test]
    fn test_missing_inputs() {
        let session = Session {
            ranges: "100,200".into(),
            ..Default::default()
        };
        assert!(session.input_paths().is_err());
    }
}
