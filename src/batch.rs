use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::data::loader;
use crate::data::model::SpectralDataset;
use crate::processing::processor::ReportColumns;
use crate::processing::{ResultRow, SpectrumId, SpectrumProcessor};

/// Output of one run: column layout plus one row per spectrum.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub columns: ReportColumns,
    pub rows: Vec<ResultRow>,
    /// The run stopped early because the cancel flag was raised.
    pub cancelled: bool,
}

impl Report {
    pub fn failed_rows(&self) -> usize {
        self.rows.iter().filter(|r| !r.is_ok()).count()
    }
}

/// Drives loader → processor over a list of files, one spectrum at a time.
pub struct BatchRunner<'a> {
    processor: &'a SpectrumProcessor,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> BatchRunner<'a> {
    pub fn new(processor: &'a SpectrumProcessor) -> Self {
        BatchRunner {
            processor,
            cancel: None,
        }
    }

    /// Check `flag` between spectra and stop once it is set.
    pub fn with_cancel(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(|f| f.load(Ordering::Relaxed))
    }

    /// Load and process every file. Unreadable files become failed rows.
    pub fn run(&self, inputs: &[PathBuf]) -> Report {
        let mut report = Report {
            columns: self.processor.columns(),
            rows: Vec::new(),
            cancelled: false,
        };

        for path in inputs {
            let name = display_name(path);
            match loader::load_file(path) {
                Ok(dataset) => {
                    log::info!(
                        "Loaded {} spectra from {name}{}",
                        dataset.len(),
                        if dataset.is_map() { " (map)" } else { "" }
                    );
                    if !self.process_dataset(&name, &dataset, &mut report.rows) {
                        report.cancelled = true;
                        break;
                    }
                }
                Err(e) => {
                    log::error!("Failed to load {}: {e:#}", path.display());
                    report
                        .rows
                        .push(self.processor.failed_row(SpectrumId::new(name, 1), format!("{e:#}")));
                }
            }
        }

        if report.cancelled {
            log::warn!("Run cancelled after {} rows", report.rows.len());
        }
        report
    }

    /// Append one row per spectrum of `dataset`; entries the loader rejected
    /// become failed rows. Returns `false` if cancelled.
    pub fn process_dataset(
        &self,
        file: &str,
        dataset: &SpectralDataset,
        rows: &mut Vec<ResultRow>,
    ) -> bool {
        for (i, spectrum) in dataset.spectra.iter().enumerate() {
            if self.cancelled() {
                return false;
            }
            let id = SpectrumId::new(file, i + 1);
            let row = match dataset.rejection(i) {
                Some(reason) => {
                    let id = SpectrumId {
                        coordinates: spectrum.coordinates.clone(),
                        ..id
                    };
                    self.processor.failed_row(id, reason)
                }
                None => self.processor.process(id, spectrum),
            };
            rows.push(row);
        }
        true
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::Spectrum;
    use crate::processing::{AnalysisSpec, ProcessingSettings, RowStatus};

    fn processor() -> SpectrumProcessor {
        let spec = AnalysisSpec::parse("0,2", "", "", "").unwrap();
        SpectrumProcessor::new(spec, ProcessingSettings::default()).unwrap()
    }

    fn dataset(n: usize) -> SpectralDataset {
        let sp = Spectrum::new(vec![0.0, 1.0, 2.0], vec![0.0, 1.0, 0.0]);
        SpectralDataset::from_spectra(vec![sp; n])
    }

    #[test]
    fn test_rows_are_numbered_per_file() {
        let p = processor();
        let mut rows = Vec::new();
        assert!(BatchRunner::new(&p).process_dataset("map.txt", &dataset(3), &mut rows));
        let indices: Vec<usize> = rows.iter().map(|r| r.id.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn test_cancel_flag_stops_between_spectra() {
        let p = processor();
        let flag = AtomicBool::new(true);
        let mut rows = Vec::new();
        let finished = BatchRunner::new(&p)
            .with_cancel(&flag)
            .process_dataset("map.txt", &dataset(3), &mut rows);
        assert!(!finished);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_rejected_map_row_fails_alone() {
        let p = processor();
        let text = "0 1 2\n0 0 0 1 0\n0 1 0 x 0\n1 0 0 2 0\n";
        let ds = loader::parse_text(text).unwrap();
        let mut rows = Vec::new();
        assert!(BatchRunner::new(&p).process_dataset("map.txt", &ds, &mut rows));

        assert_eq!(rows.len(), 3);
        assert!(rows[0].is_ok() && rows[2].is_ok());
        assert_eq!(rows[1].id.index, 2);
        assert_eq!(rows[1].id.coordinates, vec![0.0, 1.0]);
        assert!(matches!(&rows[1].status, RowStatus::Failed(r) if r.contains("line 3")));
        assert_eq!(rows[2].area("0-2").unwrap().area(), Ok(2.0));
    }

    #[test]
    fn test_missing_file_becomes_failed_row() {
        let p = processor();
        let report = BatchRunner::new(&p).run(&[PathBuf::from("/nonexistent/spectrum.txt")]);
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.failed_rows(), 1);
        assert_eq!(report.rows[0].id.file, "spectrum.txt");
        assert!(!report.cancelled);
    }
}
