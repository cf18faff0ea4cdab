use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::batch::Report;
use crate::processing::cell::format_cell;
use crate::processing::processor::ReportColumns;
use crate::processing::{ResultRow, RowStatus};

const COORDINATE_HEADERS: [&str; 3] = ["X_Coordinate", "Y_Coordinate", "Z_Coordinate"];
const INDEX_HEADERS: [&str; 4] = ["Filename", "Spectrum #", "Status", "Clamped"];

/// One output table, written as `<name>.csv`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: &'static str,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Index columns shared by every sheet
// ---------------------------------------------------------------------------

struct IndexLayout {
    spectrum_number: bool,
    coordinates: usize,
    /// (metadata key, column header)
    metadata: Vec<(String, String)>,
}

impl IndexLayout {
    /// Metadata keys that would repeat an existing header get a suffix.
    fn new(rows: &[ResultRow], taken: &BTreeSet<String>) -> Self {
        let keys: BTreeSet<&String> = rows.iter().flat_map(|r| r.metadata.keys()).collect();
        let metadata = keys
            .into_iter()
            .map(|key| {
                let header = if taken.contains(key) {
                    format!("{key} (metadata)")
                } else {
                    key.clone()
                };
                (key.clone(), header)
            })
            .collect();
        IndexLayout {
            // "Spectrum #" only carries information for multi-spectrum files.
            spectrum_number: rows.iter().any(|r| r.id.index != 1),
            coordinates: rows
                .iter()
                .map(|r| r.id.coordinates.len())
                .max()
                .unwrap_or(0)
                .min(COORDINATE_HEADERS.len()),
            metadata,
        }
    }

    fn headers(&self) -> Vec<String> {
        let mut headers = vec!["Filename".to_string()];
        if self.spectrum_number {
            headers.push("Spectrum #".to_string());
        }
        headers.extend(COORDINATE_HEADERS[..self.coordinates].iter().map(|h| h.to_string()));
        headers.extend(self.metadata.iter().map(|(_, header)| header.clone()));
        headers.push("Status".to_string());
        headers
    }

    fn cells(&self, row: &ResultRow) -> Vec<String> {
        let mut cells = vec![row.id.file.clone()];
        if self.spectrum_number {
            cells.push(row.id.index.to_string());
        }
        for i in 0..self.coordinates {
            cells.push(row.id.coordinates.get(i).map(f64::to_string).unwrap_or_default());
        }
        for (key, _) in &self.metadata {
            cells.push(row.metadata.get(key).map(|v| v.to_string()).unwrap_or_default());
        }
        cells.push(match &row.status {
            RowStatus::Ok => "ok".to_string(),
            RowStatus::Failed(reason) => format!("failed: {reason}"),
        });
        cells
    }
}

// ---------------------------------------------------------------------------
// Sheet assembly
// ---------------------------------------------------------------------------

fn sheet(
    name: &'static str,
    report: &Report,
    layout: &IndexLayout,
    value_headers: Vec<String>,
    values: impl Fn(&ResultRow) -> Vec<String>,
) -> Sheet {
    let width = value_headers.len();
    let mut headers = layout.headers();
    headers.extend(value_headers);

    let rows = report
        .rows
        .iter()
        .map(|row| {
            let mut cells = layout.cells(row);
            if row.is_ok() {
                cells.extend(values(row));
            } else {
                cells.extend(std::iter::repeat(String::new()).take(width));
            }
            cells
        })
        .collect();

    Sheet {
        name,
        headers,
        rows,
    }
}

fn peak_headers(label: &str) -> [String; 2] {
    [format!("{label} (raw)"), format!("{label} (corrected)")]
}

/// Every header the sheets use besides metadata.
fn reserved_headers(cols: &ReportColumns) -> BTreeSet<String> {
    let mut taken: BTreeSet<String> = INDEX_HEADERS
        .iter()
        .chain(&COORDINATE_HEADERS)
        .map(|h| h.to_string())
        .collect();
    taken.extend(cols.peaks.iter().flat_map(|l| peak_headers(l)));
    for labels in [
        &cols.ranges,
        &cols.ratios,
        &cols.peak_ratios,
        &cols.spectral_math,
        &cols.peak_spectral_math,
    ] {
        taken.extend(labels.iter().cloned());
    }
    taken
}

fn labeled_cells(labels: &[String], lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
    labels
        .iter()
        .map(|label| lookup(label).unwrap_or_default())
        .collect()
}

/// Lay the report out as the six result sheets. Sheets without value
/// columns are left out.
pub fn build_sheets(report: &Report) -> Vec<Sheet> {
    let cols = &report.columns;
    let layout = IndexLayout::new(&report.rows, &reserved_headers(cols));
    let mut sheets = Vec::new();

    if !cols.ranges.is_empty() {
        let mut headers = cols.ranges.clone();
        headers.push("Clamped".to_string());
        sheets.push(sheet("Integration", report, &layout, headers, |row| {
            let mut cells = labeled_cells(&cols.ranges, |l| {
                row.area(l).map(|a| format_cell(&a.area()))
            });
            let clamped: Vec<&str> = row
                .areas
                .iter()
                .filter(|a| a.clamped())
                .map(|a| a.label.as_str())
                .collect();
            cells.push(clamped.join("; "));
            cells
        }));
    }

    if !cols.peaks.is_empty() {
        let mut headers: Vec<String> = cols
            .peaks
            .iter()
            .flat_map(|l| peak_headers(l))
            .collect();
        headers.push("Clamped".to_string());
        sheets.push(sheet("Peaks", report, &layout, headers, |row| {
            let mut cells: Vec<String> = cols
                .peaks
                .iter()
                .flat_map(|l| match row.peak(l) {
                    Some(p) => [format_cell(&p.raw()), format_cell(&p.corrected())],
                    None => [String::new(), String::new()],
                })
                .collect();
            let clamped: Vec<&str> = row
                .peaks
                .iter()
                .filter(|p| p.clamped())
                .map(|p| p.label.as_str())
                .collect();
            cells.push(clamped.join("; "));
            cells
        }));
    }

    let simple: [(&'static str, &Vec<String>, fn(&ResultRow, &str) -> Option<String>); 4] = [
        ("Ratios", &cols.ratios, |row, l| row.ratio(l).map(format_cell)),
        ("Peak Ratios", &cols.peak_ratios, |row, l| row.peak_ratio(l).map(format_cell)),
        ("Spectral Math", &cols.spectral_math, |row, l| {
            row.spectral_math(l).map(format_cell)
        }),
        ("Peak Spectral Math", &cols.peak_spectral_math, |row, l| {
            row.peak_spectral_math(l).map(format_cell)
        }),
    ];
    for (name, labels, lookup) in simple {
        if labels.is_empty() {
            continue;
        }
        sheets.push(sheet(name, report, &layout, labels.clone(), |row| {
            labeled_cells(labels, |l| lookup(row, l))
        }));
    }

    sheets
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Write every sheet as CSV plus the full `report.json` into `dir`.
pub fn write_report(report: &Report, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating output folder {}", dir.display()))?;

    let mut written = Vec::new();
    for sheet in build_sheets(report) {
        let path = dir.join(format!("{}.csv", sheet.name));
        write_sheet(&sheet, &path).with_context(|| format!("writing {}", path.display()))?;
        log::info!("Wrote sheet '{}' ({} rows)", sheet.name, sheet.rows.len());
        written.push(path);
    }

    let json_path = dir.join("report.json");
    let file = File::create(&json_path)
        .with_context(|| format!("creating {}", json_path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)
        .with_context(|| format!("writing {}", json_path.display()))?;
    written.push(json_path);

    Ok(written)
}

fn write_sheet(sheet: &Sheet, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&sheet.headers)?;
    for row in &sheet.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}
