use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use raman_integration::{Session, export};

const USAGE: &str = "usage: raman-integration <session.json> [--out DIR]";

struct Args {
    session: PathBuf,
    out: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut session = None;
    let mut out = None;
    let mut args = std::env::args_os().skip(1);
    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("-h" | "--help") => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            Some("-o" | "--out") => {
                out = Some(PathBuf::from(args.next().context("--out needs a folder")?));
            }
            _ if session.is_none() => session = Some(PathBuf::from(arg)),
            _ => bail!("unexpected argument {arg:?}\n{USAGE}"),
        }
    }
    Ok(Args {
        session: session.context(USAGE)?,
        out,
    })
}

fn run() -> Result<()> {
    let args = parse_args()?;
    let session = Session::from_file(&args.session)?;
    let report = session.run()?;

    let out = args
        .out
        .or_else(|| session.output.clone())
        .unwrap_or_else(|| PathBuf::from("results"));
    let written = export::write_report(&report, &out)?;

    println!(
        "{} spectra processed ({} failed), {} files written to {}",
        report.rows.len(),
        report.failed_rows(),
        written.len(),
        out.display()
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
