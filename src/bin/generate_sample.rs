//! Writes synthetic Raman spectra (D / G / 2D bands of carbon on a sloped
//! fluorescence background) plus a ready-to-run `session.json`.
//!
//! `cargo run --bin generate_sample -- [OUTPUT_DIR]`

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Array, Float64Builder, ListBuilder, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use raman_integration::Session;

/// (centre, width σ, amplitude)
type Band = (f64, f64, f64);

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

fn generate_spectrum(
    wavenumbers: &[f64],
    bands: &[Band],
    background: (f64, f64),
    noise_level: f64,
    rng: &mut SimpleRng,
) -> Vec<f64> {
    wavenumbers
        .iter()
        .map(|&wn| {
            let signal: f64 = bands
                .iter()
                .map(|&(mu, sigma, amp)| gaussian(wn, mu, sigma, amp))
                .sum();
            signal + background.0 + background.1 * wn + rng.gauss(0.0, noise_level)
        })
        .collect()
}

/// Carbon bands scaled by a disorder factor: more disorder, stronger D.
fn carbon_bands(disorder: f64) -> Vec<Band> {
    vec![
        (1350.0, 25.0, 400.0 * disorder),
        (1580.0, 15.0, 600.0),
        (2700.0, 35.0, 300.0 * (1.5 - disorder).max(0.1)),
    ]
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// Two-column text file, high → low wavenumber as most instruments export.
fn write_single(path: &Path, wavenumbers: &[f64], intensities: &[f64]) -> Result<()> {
    let mut text = String::new();
    for (wn, y) in wavenumbers.iter().zip(intensities).rev() {
        writeln!(text, "{wn:.1}\t{y:.4}")?;
    }
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

/// Map file: wavenumber header line, then `x y intensities…` per pixel.
fn write_map(path: &Path, wavenumbers: &[f64], rng: &mut SimpleRng) -> Result<()> {
    let mut text = String::new();
    let header: Vec<String> = wavenumbers.iter().map(|wn| format!("{wn:.1}")).collect();
    writeln!(text, "{}", header.join(" "))?;
    for row in 0..3 {
        for col in 0..3 {
            let disorder = 0.2 + 0.15 * (row * 3 + col) as f64;
            let y = generate_spectrum(
                wavenumbers,
                &carbon_bands(disorder),
                (50.0, 0.01),
                3.0,
                rng,
            );
            let values: Vec<String> = y.iter().map(|v| format!("{v:.4}")).collect();
            writeln!(text, "{} {} {}", col as f64 * 10.0, row as f64 * 10.0, values.join(" "))?;
        }
    }
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

fn write_parquet(path: &Path, wavenumbers: &[f64], rng: &mut SimpleRng) -> Result<usize> {
    let samples = ["graphite", "graphene_oxide", "soot"];
    let disorders = [0.1, 0.9, 1.3];
    let powers = [1.0, 5.0];

    let mut x_builder = ListBuilder::new(Float64Builder::new());
    let mut y_builder = ListBuilder::new(Float64Builder::new());
    let mut all_sample = Vec::new();
    let mut all_power = Vec::new();

    for (sample, &disorder) in samples.iter().zip(&disorders) {
        for &power in &powers {
            let bands: Vec<Band> = carbon_bands(disorder)
                .into_iter()
                .map(|(mu, sigma, amp)| (mu, sigma, amp * power / 5.0))
                .collect();
            let y = generate_spectrum(wavenumbers, &bands, (20.0 * power, 0.005), 2.0, rng);

            x_builder.values().append_slice(wavenumbers);
            x_builder.append(true);
            y_builder.values().append_slice(&y);
            y_builder.append(true);
            all_sample.push(*sample);
            all_power.push(power);
        }
    }

    let item = || Arc::new(Field::new("item", DataType::Float64, true));
    let schema = Arc::new(Schema::new(vec![
        Field::new("x", DataType::List(item()), false),
        Field::new("y", DataType::List(item()), false),
        Field::new("sample", DataType::Utf8, false),
        Field::new("laser_power_mw", DataType::Float64, false),
    ]));

    let n_rows = all_sample.len();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(x_builder.finish()),
            Arc::new(y_builder.finish()),
            Arc::new(StringArray::from(all_sample)),
            Arc::new(Float64Array::from(all_power)),
        ],
    )
    .context("building record batch")?;

    let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(n_rows)
}

fn main() -> Result<()> {
    env_logger::init();

    let out = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sample_data"));
    std::fs::create_dir_all(&out).with_context(|| format!("creating {}", out.display()))?;

    let mut rng = SimpleRng::new(42);

    // Wavenumbers: 100 → 3200 cm⁻¹, step 2
    let wavenumbers: Vec<f64> = (0..=1550).map(|i| 100.0 + i as f64 * 2.0).collect();

    for (i, disorder) in [0.2, 0.6, 1.0].into_iter().enumerate() {
        let y = generate_spectrum(&wavenumbers, &carbon_bands(disorder), (100.0, 0.02), 4.0, &mut rng);
        write_single(&out.join(format!("single_{:02}.txt", i + 1)), &wavenumbers, &y)?;
    }
    write_map(&out.join("map.txt"), &wavenumbers, &mut rng)?;
    let n_parquet = write_parquet(&out.join("dataset.parquet"), &wavenumbers, &mut rng)?;

    let files = ["single_01.txt", "single_02.txt", "single_03.txt", "map.txt", "dataset.parquet"];
    let session = Session {
        files: files.iter().map(PathBuf::from).collect(),
        ranges: "D=1250,1450; G=1500,1650; G2=2550,2850".into(),
        peaks: "D=1350; G=1580".into(),
        spectral_math: "D/(D+G); [D/G] * G2".into(),
        peak_spectral_math: "D/G".into(),
        output: Some(PathBuf::from("results")),
        ..Default::default()
    };
    let session_path = out.join("session.json");
    std::fs::write(&session_path, serde_json::to_string_pretty(&session)?)
        .with_context(|| format!("writing {}", session_path.display()))?;

    println!(
        "Wrote 3 single spectra, a 3×3 map and {n_parquet} parquet spectra to {}",
        out.display()
    );
    println!("Run: raman-integration {}", session_path.display());
    Ok(())
}
