//! Command-line front-end: opens a legacy spectrum file and prints a
//! one-line summary per spectrum, or a single spectrum by scan number.

use std::process::ExitCode;

use clap::Parser;
use log::error;

use mzlegacy::io::SpectrumReader;

/// Read an mzXML, mzData, MGF or `_dta.txt` file and summarize its spectra.
#[derive(Parser, Debug)]
#[command(name = "mzlegacy", version, about)]
struct Cli {
    /// Path to the spectrum file.
    path: String,

    /// Print only the spectrum with this scan number instead of every
    /// spectrum in the file.
    #[arg(long)]
    scan: Option<i64>,
}

fn summarize(spectrum: &mzlegacy::Spectrum) {
    println!(
        "scan={:<8} ms_level={} peaks={:<6} tic={:<12.1} base_peak_mz={:.4}",
        spectrum.scan_number,
        spectrum.ms_level,
        spectrum.peaks_count(),
        spectrum.total_ion_current,
        spectrum.base_peak_mz,
    );
}

fn run() -> Result<(), mzlegacy::ReaderError> {
    let cli = Cli::parse();
    let mut reader = SpectrumReader::open_file(&cli.path)?;

    if let Some(scan_number) = cli.scan {
        let spectrum = reader.get_spectrum_by_scan_number(scan_number)?;
        summarize(&spectrum);
        return Ok(());
    }

    while let Some(spectrum) = reader.read_next_spectrum()? {
        summarize(&spectrum);
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
