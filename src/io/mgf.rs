//! Sequential MGF parser (C4): `BEGIN IONS`/`END IONS` blocks driving the
//! state machine described in spec.md §4.4.

use std::io::BufRead;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::TextParseError;
use crate::io::dta::parse_title;
use crate::mass;
use crate::progress::{fraction, AbortFlag, ProgressObserver, PROGRESS_LINE_INTERVAL};
use crate::spectrum::{MsMsTextDetails, Spectrum, SpectrumDetails};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum MgfState {
    Start,
    Between,
    ScanHeaders,
    Peaks,
}

lazy_static! {
    static ref PEAK_SEPARATOR: Regex = Regex::new(r"\t|\s+").unwrap();
    static ref MSMS_COMMENT_RE: Regex =
        Regex::new(r"(?i)^#+\s*MSMS:\s*(\d+)(?:-(\d+))?((?:/\d+)*)").unwrap();
    static ref CHARGE_TOKEN_RE: Regex = Regex::new(r"\d+").unwrap();
}

const MAX_CHARGES: usize = MsMsTextDetails::MAX_CHARGES;

struct PendingRecord {
    details: MsMsTextDetails,
    parent_ion_mz: f64,
    parent_ion_intensity: f64,
    scan_number: i64,
    scan_number_end: i64,
    scan_count: i32,
    scan_number_from_comment: bool,
}

impl Default for PendingRecord {
    fn default() -> Self {
        Self {
            details: MsMsTextDetails::default(),
            parent_ion_mz: 0.0,
            parent_ion_intensity: 0.0,
            scan_number: 0,
            scan_number_end: 0,
            scan_count: 1,
            scan_number_from_comment: false,
        }
    }
}

/// Sequential MGF reader over any buffered byte source.
pub struct MgfReader<R: BufRead> {
    source: R,
    state: MgfState,
    saved_scan: i64,
    pub abort: AbortFlag,
    pub observer: Option<Box<dyn ProgressObserver>>,
    pub total_bytes: u64,
    bytes_consumed: u64,
    lines_since_progress: usize,
}

impl<R: BufRead> MgfReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            state: MgfState::Start,
            saved_scan: 0,
            abort: AbortFlag::new(),
            observer: None,
            total_bytes: 0,
            bytes_consumed: 0,
            lines_since_progress: 0,
        }
    }

    fn maybe_emit_progress(&mut self) {
        self.lines_since_progress += 1;
        if self.lines_since_progress >= PROGRESS_LINE_INTERVAL {
            self.lines_since_progress = 0;
            if let Some(observer) = &self.observer {
                observer.on_progress(fraction(self.bytes_consumed, self.total_bytes));
            }
        }
    }

    fn next_raw_line(&mut self) -> Result<Option<String>, TextParseError> {
        let mut buf = String::new();
        let n = self.source.read_line(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        self.bytes_consumed += n as u64;
        self.maybe_emit_progress();
        while buf.ends_with('\n') || buf.ends_with('\r') {
            buf.pop();
        }
        Ok(Some(buf))
    }

    /// Read the next spectrum, or `None` at end of input.
    pub fn read_next_spectrum(&mut self) -> Result<Option<Spectrum>, TextParseError> {
        let mut record = PendingRecord::default();
        let mut mz_list = Vec::new();
        let mut intensity_list = Vec::new();
        let mut saw_any_ions_block = false;

        loop {
            if self.abort.is_set() {
                return Ok(None);
            }
            let Some(line) = self.next_raw_line()? else {
                if self.state == MgfState::Peaks || self.state == MgfState::ScanHeaders {
                    // Truncated file: still emit what was accumulated.
                    break;
                }
                return Ok(None);
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                if self.state == MgfState::Peaks {
                    break;
                }
                continue;
            }

            match self.state {
                MgfState::Start | MgfState::Between => {
                    if trimmed == "BEGIN IONS" {
                        self.state = MgfState::ScanHeaders;
                        saw_any_ions_block = true;
                    } else if let Some(caps) = MSMS_COMMENT_RE.captures(trimmed) {
                        apply_msms_comment(&caps, &mut record);
                    }
                    // Other comment/header noise between records is ignored.
                }
                MgfState::ScanHeaders => {
                    if starts_peak_line(trimmed) {
                        parse_peak_line(trimmed, &mut mz_list, &mut intensity_list)?;
                        self.state = MgfState::Peaks;
                    } else if trimmed == "END IONS" {
                        self.state = MgfState::Between;
                        break;
                    } else if let Some((key, value)) = trimmed.split_once('=') {
                        self.apply_header(key, value, &mut record);
                    } else {
                        return Err(TextParseError::MalformedHeader(trimmed.to_string()));
                    }
                }
                MgfState::Peaks => {
                    if starts_peak_line(trimmed) {
                        parse_peak_line(trimmed, &mut mz_list, &mut intensity_list)?;
                    } else if trimmed == "END IONS" {
                        self.state = MgfState::Between;
                        break;
                    } else {
                        return Err(TextParseError::MalformedPeakLine(trimmed.to_string()));
                    }
                }
            }
        }

        if !saw_any_ions_block && mz_list.is_empty() && record.scan_number == 0 {
            return Ok(None);
        }

        if !record.scan_number_from_comment && record.scan_number == 0 {
            if let Some(parsed) = parse_title(&record.details.spectrum_title) {
                record.scan_number = parsed.scan_start;
                record.scan_number_end = parsed.scan_end;
            }
        }

        if record.scan_number == 0 {
            self.saved_scan += 1;
            record.scan_number = self.saved_scan;
            record.scan_number_end = self.saved_scan;
        } else {
            self.saved_scan = record.scan_number;
        }

        let charge = record.details.parent_ion_charges.first().copied().unwrap_or(1);
        record.details.parent_ion_mh = mass::mz_to_mh(record.parent_ion_mz, charge);

        let mut spectrum = Spectrum::new();
        spectrum.ms_level = 2;
        spectrum.scan_number = record.scan_number;
        spectrum.scan_number_end = if record.scan_number_end != 0 {
            record.scan_number_end
        } else {
            record.scan_number
        };
        spectrum.scan_count = record.scan_count;
        spectrum.parent_ion_mz = record.parent_ion_mz;
        spectrum.parent_ion_intensity = record.parent_ion_intensity;
        spectrum.mz_list = mz_list;
        spectrum.intensity_list = intensity_list;
        spectrum.details = SpectrumDetails::MsMsText(record.details);
        spectrum.validate();

        Ok(Some(spectrum))
    }

    fn apply_header(&mut self, key: &str, value: &str, record: &mut PendingRecord) {
        match key {
            "TITLE" => {
                record.details.spectrum_title = value.to_string();
                record.details.spectrum_title_with_comment_chars = value.to_string();
            }
            "PEPMASS" => {
                let mut parts = value.split_whitespace();
                record.parent_ion_mz = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0.0);
                // Intensity is present in some exports but reproduced as
                // ignored per the original parser's behavior.
            }
            "CHARGE" => {
                record.details.charge_is_2_and_3_plus = value.contains("and");
                for token in CHARGE_TOKEN_RE.find_iter(value) {
                    if let Ok(z) = token.as_str().parse::<i32>() {
                        record.details.push_charge(z);
                    }
                    if record.details.parent_ion_charges.len() >= MAX_CHARGES {
                        break;
                    }
                }
                record.details.parent_ion_charge_count =
                    record.details.parent_ion_charges.len() as i32;
            }
            _ => {}
        }
    }
}

fn starts_peak_line(line: &str) -> bool {
    line.chars()
        .next()
        .map(|c| c.is_ascii_digit() || c == '-' || c == '+' || c == '.')
        .unwrap_or(false)
}

fn parse_peak_line(
    line: &str,
    mz_list: &mut Vec<f64>,
    intensity_list: &mut Vec<f64>,
) -> Result<(), TextParseError> {
    let mut tokens = PEAK_SEPARATOR.split(line).filter(|t| !t.is_empty());
    let mz: f64 = tokens
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| TextParseError::MalformedPeakLine(line.to_string()))?;
    let intensity: f64 = tokens
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| TextParseError::MalformedPeakLine(line.to_string()))?;
    mz_list.push(mz);
    intensity_list.push(intensity);
    Ok(())
}

fn apply_msms_comment(caps: &regex::Captures<'_>, record: &mut PendingRecord) {
    let Some(start) = caps.get(1).and_then(|m| m.as_str().parse::<i64>().ok()) else {
        return;
    };
    record.scan_number = start;
    record.scan_number_from_comment = true;
    record.scan_number_end = caps
        .get(2)
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .unwrap_or(start);
    let extra = caps.get(3).map(|m| m.as_str()).unwrap_or("");
    record.scan_count = 1 + extra.matches('/').count() as i32;
}

impl<R: BufRead> Iterator for MgfReader<R> {
    type Item = Spectrum;

    fn next(&mut self) -> Option<Spectrum> {
        self.read_next_spectrum().ok().flatten()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn reader_for(text: &str) -> MgfReader<Cursor<Vec<u8>>> {
        MgfReader::new(Cursor::new(text.as_bytes().to_vec()))
    }

    #[test]
    fn test_basic_mgf_spectrum() {
        let text = "BEGIN IONS\nTITLE=Foo.42.42.2.dta\nPEPMASS=400.0 1e5\nCHARGE=2+\n100.0 10\n200.0 20\nEND IONS\n";
        let mut r = reader_for(text);
        let spec = r.read_next_spectrum().unwrap().unwrap();
        assert_eq!(spec.scan_number, 42);
        assert_eq!(spec.parent_ion_mz, 400.0);
        assert_eq!(spec.peaks_count(), 2);
        if let SpectrumDetails::MsMsText(details) = &spec.details {
            assert_eq!(details.parent_ion_charges, vec![2]);
            assert!((details.parent_ion_mh - 798.992_72).abs() < 1e-5);
        } else {
            panic!("expected MS/MS text details");
        }
        assert!(r.read_next_spectrum().unwrap().is_none());
    }

    #[test]
    fn test_multi_charge_and_synthesized_scan() {
        let text = "BEGIN IONS\nPEPMASS=500.0\nCHARGE=2+ and 3+\n50.0 1\nEND IONS\n\
            BEGIN IONS\nPEPMASS=600.0\nCHARGE=1+\n60.0 1\nEND IONS\n";
        let mut r = reader_for(text);
        let first = r.read_next_spectrum().unwrap().unwrap();
        assert_eq!(first.scan_number, 1);
        if let SpectrumDetails::MsMsText(details) = &first.details {
            assert_eq!(details.parent_ion_charges, vec![2, 3]);
            assert!(details.charge_is_2_and_3_plus);
        }
        let second = r.read_next_spectrum().unwrap().unwrap();
        assert_eq!(second.scan_number, 2);
    }

    #[test]
    fn test_msms_comment_scan_range() {
        let text = "###MSMS: 10-12/3\nBEGIN IONS\nPEPMASS=300.0\nCHARGE=1+\n10.0 1\nEND IONS\n";
        let mut r = reader_for(text);
        let spec = r.read_next_spectrum().unwrap().unwrap();
        assert_eq!(spec.scan_number, 10);
        assert_eq!(spec.scan_number_end, 12);
        assert_eq!(spec.scan_count, 2);
    }
}
