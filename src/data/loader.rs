use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{
    Array, AsArray, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    LargeListArray, ListArray, StringArray,
};
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{MetadataValue, SpectralDataset, Spectrum};
use super::spc;

/// Extensions recognised when scanning a folder for inputs.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "dat", "spc", "csv", "json", "parquet", "pq"];

/// Metadata columns that are lifted into map coordinates instead.
const COORDINATE_COLUMNS: [&str; 3] = ["x_coordinate", "y_coordinate", "z_coordinate"];

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load every spectrum in a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.txt` / `.dat` – two-column `wavenumber intensity`, or a map file whose
///   first line holds the wavenumbers and whose rows are
///   `coord… intensity…`
/// * `.spc`          – Galactic SPC, new little-endian layout
/// * `.parquet`      – `x` and `y` list columns, other columns as metadata
/// * `.json`         – `[{ "x": [...], "y": [...], ...meta }, ...]`
/// * `.csv`          – columns `x` and `y` containing semicolon-separated floats
pub fn load_file(path: &Path) -> Result<SpectralDataset> {
    let ext = extension_of(path);

    let dataset = match ext.as_str() {
        "txt" | "dat" => load_text(path)?,
        "spc" => {
            let bytes = std::fs::read(path).context("reading SPC file")?;
            SpectralDataset::from_spectra(spc::parse(&bytes)?)
        }
        "parquet" | "pq" => load_parquet(path)?,
        "json" => load_json(path)?,
        "csv" => load_csv(path)?,
        other => bail!("Unsupported file extension: .{other}"),
    };

    if dataset.is_empty() {
        bail!("{} contains no spectra", path.display());
    }
    Ok(dataset)
}

/// Collect the supported files of a folder, sorted by path.
pub fn collect_inputs(folder: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    visit(folder, recursive, &mut found)?;
    found.sort();
    Ok(found)
}

fn visit(dir: &Path, recursive: bool, found: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))?;
    for entry in entries {
        let path = entry.context("reading directory entry")?.path();
        if path.is_dir() {
            if recursive {
                visit(&path, recursive, found)?;
            }
        } else if SUPPORTED_EXTENSIONS.contains(&extension_of(&path).as_str()) {
            found.push(path);
        }
    }
    Ok(())
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// Plain-text loader (single spectrum or map)
// ---------------------------------------------------------------------------

fn load_text(path: &Path) -> Result<SpectralDataset> {
    let text = std::fs::read_to_string(path).context("reading text file")?;
    parse_text(&text)
}

/// Parse a whitespace (or comma) separated text spectrum.
///
/// A first data line with more than two numbers marks a map file.
pub fn parse_text(text: &str) -> Result<SpectralDataset> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'))
        .peekable();

    // A non-numeric first line is a column header.
    if let Some((_, first)) = lines.peek() {
        if parse_numbers(first, 0).is_err() {
            lines.next();
        }
    }

    let Some((first_no, first)) = lines.next() else {
        bail!("no numeric data found");
    };
    let header = parse_numbers(first, first_no)?;

    if header.len() > 2 {
        return parse_map(header, lines);
    }
    if header.len() != 2 {
        bail!("line {first_no}: expected 2 columns, found {}", header.len());
    }

    let mut x = vec![header[0]];
    let mut y = vec![header[1]];
    for (line_no, line) in lines {
        let values = parse_numbers(line, line_no)?;
        if values.len() != 2 {
            bail!("line {line_no}: expected 2 columns, found {}", values.len());
        }
        x.push(values[0]);
        y.push(values[1]);
    }
    Ok(SpectralDataset::from_spectra(vec![Spectrum::new(x, y)]))
}

fn parse_map<'a>(
    wavenumbers: Vec<f64>,
    rows: impl Iterator<Item = (usize, &'a str)>,
) -> Result<SpectralDataset> {
    let mut spectra = Vec::new();
    let mut rejected = BTreeMap::new();
    for (line_no, line) in rows {
        match parse_map_row(&wavenumbers, line, line_no) {
            Ok(spectrum) => spectra.push(spectrum),
            Err(e) => {
                log::warn!("skipping map row: {e:#}");
                rejected.insert(spectra.len(), format!("{e:#}"));
                spectra.push(Spectrum::default().with_coordinates(leading_numbers(line)));
            }
        }
    }
    if spectra.is_empty() {
        bail!("map file has a wavenumber header but no spectra");
    }
    Ok(SpectralDataset::from_spectra(spectra).with_rejected(rejected))
}

fn parse_map_row(wavenumbers: &[f64], line: &str, line_no: usize) -> Result<Spectrum> {
    let values = parse_numbers(line, line_no)?;
    let Some(n_coords) = values.len().checked_sub(wavenumbers.len()) else {
        bail!(
            "line {line_no}: {} values but the header lists {} wavenumbers",
            values.len(),
            wavenumbers.len()
        );
    };
    if n_coords > COORDINATE_COLUMNS.len() {
        bail!("line {line_no}: {n_coords} leading coordinate columns, at most 3 supported");
    }
    let (coords, intensities) = values.split_at(n_coords);
    Ok(Spectrum::new(wavenumbers.to_vec(), intensities.to_vec()).with_coordinates(coords.to_vec()))
}

/// Best-effort coordinates of a broken map row: its first two numeric tokens.
fn leading_numbers(line: &str) -> Vec<f64> {
    line.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|tok| !tok.is_empty())
        .take(2)
        .map_while(|tok| tok.parse().ok())
        .collect()
}

fn parse_numbers(line: &str, line_no: usize) -> Result<Vec<f64>> {
    line.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|tok| !tok.is_empty())
        .map(|tok| {
            tok.parse::<f64>()
                .with_context(|| format!("line {line_no}: '{tok}' is not a number"))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Metadata helpers shared by the tabular loaders
// ---------------------------------------------------------------------------

/// Move `X_Coordinate`-style metadata into the spectrum's coordinates.
fn lift_coordinates(spectrum: &mut Spectrum) {
    let mut coords = Vec::new();
    for name in COORDINATE_COLUMNS {
        let key = spectrum
            .metadata
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned();
        let value = key.and_then(|k| spectrum.metadata.remove(&k));
        match value {
            Some(MetadataValue::Float(v)) => coords.push(v),
            Some(MetadataValue::Integer(v)) => coords.push(v as f64),
            Some(other) => {
                log::warn!("ignoring non-numeric coordinate {name} = {other}");
                break;
            }
            None => break,
        }
    }
    spectrum.coordinates = coords;
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Records-oriented JSON (`df.to_json(orient='records')`):
///
/// ```json
/// [ { "x": [100.0, 101.0, ...], "y": [0.12, 0.14, ...], "sample": "A" } ]
/// ```
fn load_json(path: &Path) -> Result<SpectralDataset> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root.as_array().context("Expected top-level JSON array")?;

    let mut spectra = Vec::with_capacity(records.len());
    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;

        let mut spectrum = Spectrum::new(
            json_array_to_f64(obj.get("x"), i, "x")?,
            json_array_to_f64(obj.get("y"), i, "y")?,
        );
        spectrum.metadata = obj
            .iter()
            .filter(|(key, _)| *key != "x" && *key != "y")
            .map(|(key, val)| (key.clone(), json_to_metadata(val)))
            .collect();
        lift_coordinates(&mut spectrum);
        spectra.push(spectrum);
    }

    Ok(SpectralDataset::from_spectra(spectra))
}

fn json_array_to_f64(val: Option<&JsonValue>, row: usize, col: &str) -> Result<Vec<f64>> {
    let arr = val
        .and_then(|v| v.as_array())
        .with_context(|| format!("Row {row}: missing or invalid '{col}' array"))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| {
            v.as_f64()
                .with_context(|| format!("Row {row}, {col}[{j}]: not a number"))
        })
        .collect()
}

fn json_to_metadata(val: &JsonValue) -> MetadataValue {
    match val {
        JsonValue::String(s) => MetadataValue::String(s.clone()),
        JsonValue::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => MetadataValue::Integer(i),
            (None, Some(f)) => MetadataValue::Float(f),
            _ => MetadataValue::String(n.to_string()),
        },
        JsonValue::Bool(b) => MetadataValue::Bool(*b),
        JsonValue::Null => MetadataValue::Null,
        other => MetadataValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// Header row with column names; `x` and `y` hold semicolon-separated
/// floats, every other column is metadata.
fn load_csv(path: &Path) -> Result<SpectralDataset> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers = reader.headers().context("reading CSV headers")?.clone();

    let x_idx = headers
        .iter()
        .position(|h| h == "x")
        .context("CSV missing 'x' column")?;
    let y_idx = headers
        .iter()
        .position(|h| h == "y")
        .context("CSV missing 'y' column")?;

    let mut spectra = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;

        let mut spectrum = Spectrum::new(
            parse_semicolon_floats(record.get(x_idx).unwrap_or(""), row_no, "x")?,
            parse_semicolon_floats(record.get(y_idx).unwrap_or(""), row_no, "y")?,
        );
        spectrum.metadata = headers
            .iter()
            .zip(record.iter())
            .enumerate()
            .filter(|(col_idx, _)| *col_idx != x_idx && *col_idx != y_idx)
            .map(|(_, (name, value))| (name.to_string(), guess_metadata_type(value)))
            .collect();
        lift_coordinates(&mut spectrum);
        spectra.push(spectrum);
    }

    Ok(SpectralDataset::from_spectra(spectra))
}

fn parse_semicolon_floats(s: &str, row: usize, col: &str) -> Result<Vec<f64>> {
    s.split(';')
        .enumerate()
        .map(|(j, tok)| {
            tok.trim()
                .parse::<f64>()
                .with_context(|| format!("Row {row}, {col}[{j}]: '{tok}' is not a number"))
        })
        .collect()
}

fn guess_metadata_type(s: &str) -> MetadataValue {
    if s.is_empty() {
        return MetadataValue::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return MetadataValue::Integer(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return MetadataValue::Float(f);
    }
    match s {
        "true" => MetadataValue::Bool(true),
        "false" => MetadataValue::Bool(false),
        _ => MetadataValue::String(s.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet dataset: `x` / `y` as List<Float64|Float32> (or LargeList),
/// any other column as metadata. Written by both Pandas and Polars.
fn load_parquet(path: &Path) -> Result<SpectralDataset> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?
        .build()
        .context("building parquet reader")?;

    let mut spectra = Vec::new();
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();

        let x_idx = schema
            .index_of("x")
            .map_err(|_| anyhow::anyhow!("Parquet file missing 'x' column"))?;
        let y_idx = schema
            .index_of("y")
            .map_err(|_| anyhow::anyhow!("Parquet file missing 'y' column"))?;

        let meta_cols: Vec<(usize, String)> = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != x_idx && *i != y_idx)
            .map(|(i, f)| (i, f.name().clone()))
            .collect();

        for row in 0..batch.num_rows() {
            let x = extract_f64_list(batch.column(x_idx), row)
                .with_context(|| format!("Row {row}: failed to read 'x'"))?;
            let y = extract_f64_list(batch.column(y_idx), row)
                .with_context(|| format!("Row {row}: failed to read 'y'"))?;

            let mut spectrum = Spectrum::new(x, y);
            spectrum.metadata = meta_cols
                .iter()
                .map(|(col_idx, name)| {
                    (name.clone(), extract_metadata_value(batch.column(*col_idx), row))
                })
                .collect::<BTreeMap<_, _>>();
            lift_coordinates(&mut spectrum);
            spectra.push(spectrum);
        }
    }

    Ok(SpectralDataset::from_spectra(spectra))
}

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    let values_array = match col.data_type() {
        DataType::List(_) => col
            .as_any()
            .downcast_ref::<ListArray>()
            .context("expected ListArray")?
            .value(row),
        DataType::LargeList(_) => col
            .as_any()
            .downcast_ref::<LargeListArray>()
            .context("expected LargeListArray")?
            .value(row),
        other => bail!("Expected List or LargeList column, got {other:?}"),
    };

    // Nulls become NaN so the spectrum fails validation instead of shifting.
    if let Some(arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(arr.iter().map(|v| v.map_or(f64::NAN, f64::from)).collect())
    } else {
        bail!(
            "List inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        )
    }
}

/// Extract a single metadata value from an Arrow column at a given row.
fn extract_metadata_value(col: &Arc<dyn Array>, row: usize) -> MetadataValue {
    if col.is_null(row) {
        return MetadataValue::Null;
    }
    let any = col.as_any();
    match col.data_type() {
        DataType::Utf8 => match any.downcast_ref::<StringArray>() {
            Some(s) => MetadataValue::String(s.value(row).to_string()),
            None => MetadataValue::Null,
        },
        DataType::LargeUtf8 => {
            MetadataValue::String(col.as_string::<i64>().value(row).to_string())
        }
        DataType::Int32 => any
            .downcast_ref::<Int32Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Integer(a.value(row) as i64)),
        DataType::Int64 => any
            .downcast_ref::<Int64Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Integer(a.value(row))),
        DataType::Float32 => any
            .downcast_ref::<Float32Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Float(a.value(row) as f64)),
        DataType::Float64 => any
            .downcast_ref::<Float64Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Float(a.value(row))),
        DataType::Boolean => any
            .downcast_ref::<BooleanArray>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Bool(a.value(row))),
        other => MetadataValue::String(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_column_text() {
        let text = "# exported\nwavenumber intensity\n1000 5.0\n999 6.0\n998\t7.0\n";
        let ds = parse_text(text).unwrap();
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.spectra[0].x, vec![998.0, 999.0, 1000.0]);
        assert_eq!(ds.spectra[0].y, vec![7.0, 6.0, 5.0]);
        assert!(!ds.is_map());
    }

    #[test]
    fn test_map_text_with_coordinates() {
        let text = "100 200 300\n0 0 1 2 3\n0 1 4 5 6\n";
        let ds = parse_text(text).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.spectra[1].coordinates, vec![0.0, 1.0]);
        assert_eq!(ds.spectra[1].y, vec![4.0, 5.0, 6.0]);
        assert!(ds.is_map());
    }

    #[test]
    fn test_map_without_coordinates() {
        let ds = parse_text("1 2 3\n4 5 6\n").unwrap();
        assert!(ds.spectra[0].coordinates.is_empty());
        assert_eq!(ds.spectra[0].y, vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_bad_text_reports_line() {
        let err = parse_text("1 2\n3 oops\n").unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));

    }

    #[test]
    fn test_bad_map_row_is_rejected_alone() {
        let text = "100 200 300\n0 0 1 2 3\n0 1 4 oops 6\n1 0 7 8 9\n";
        let ds = parse_text(text).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.rejected.len(), 1);
        assert!(ds.rejection(1).unwrap().contains("line 3"));
        assert_eq!(ds.spectra[1].coordinates, vec![0.0, 1.0]);
        assert!(ds.spectra[1].validate().is_err());
        assert_eq!(ds.rejection(2), None);
        assert_eq!(ds.spectra[2].y, vec![7.0, 8.0, 9.0]);

        let ds = parse_text("1 2 3\n4 5\n").unwrap();
        assert!(ds.rejection(0).unwrap().contains("wavenumbers"));
    }

    #[test]
    fn test_metadata_guess() {
        assert_eq!(guess_metadata_type("3"), MetadataValue::Integer(3));
        assert_eq!(guess_metadata_type("0.5"), MetadataValue::Float(0.5));
        assert_eq!(guess_metadata_type("true"), MetadataValue::Bool(true));
        assert_eq!(guess_metadata_type(""), MetadataValue::Null);
    }

    #[test]
    fn test_coordinates_lifted_from_metadata() {
        let mut sp = Spectrum::new(vec![1.0, 2.0], vec![1.0, 2.0]);
        sp.metadata.insert("X_Coordinate".into(), MetadataValue::Float(1.5));
        sp.metadata.insert("y_coordinate".into(), MetadataValue::Integer(2));
        sp.metadata.insert("sample".into(), MetadataValue::String("A".into()));
        lift_coordinates(&mut sp);
        assert_eq!(sp.coordinates, vec![1.5, 2.0]);
        assert_eq!(sp.metadata.len(), 1);
    }
}
