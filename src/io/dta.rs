//! Sequential DTA parser (C4): records separated by `=`-prefixed title
//! lines, a parent-ion line, then whitespace-separated peak lines. See
//! spec.md §4.4 for the state machine and the charge-2/3 fusion policy.

use std::io::BufRead;

use lazy_static::lazy_static;
use log::warn;
use regex::Regex;

use crate::error::TextParseError;
use crate::mass;
use crate::progress::{fraction, AbortFlag, ProgressObserver, PROGRESS_LINE_INTERVAL};
use crate::spectrum::{MsMsTextDetails, Spectrum, SpectrumDetails};

lazy_static! {
    static ref TITLE_RE: Regex = Regex::new(r"(?i)(.*)\.(\d+)\.(\d+)\.(\d+)\.dta").unwrap();
    static ref QUOTED_RE: Regex = Regex::new("\"([^\"]*)\"").unwrap();
}

pub(crate) struct ParsedTitle {
    pub(crate) scan_start: i64,
    pub(crate) scan_end: i64,
    pub(crate) charge: i32,
    cleaned_prefix: String,
}

pub(crate) fn parse_title(line: &str) -> Option<ParsedTitle> {
    let caps = TITLE_RE.captures(line)?;
    Some(ParsedTitle {
        scan_start: caps[2].parse().ok()?,
        scan_end: caps[3].parse().ok()?,
        charge: caps[4].parse().ok()?,
        cleaned_prefix: format!("{}.{}.{}", &caps[1], &caps[2], &caps[3]),
    })
}

fn extract_quoted(line: &str) -> String {
    QUOTED_RE
        .captures(line)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| line.trim_matches(|c: char| c == '=' || c.is_whitespace()).to_string())
}

/// Sequential DTA reader over any buffered byte source. Records are
/// separated by comment lines beginning with `=`.
pub struct DtaReader<R: BufRead> {
    source: R,
    /// Single-slot pushback buffer for a header line peeked during the
    /// fusion check but not consumed.
    lookahead: Option<String>,
    pub combine_identical_spectra: bool,
    pub abort: AbortFlag,
    pub observer: Option<Box<dyn ProgressObserver>>,
    pub total_bytes: u64,
    bytes_consumed: u64,
    lines_since_progress: usize,
}

impl<R: BufRead> DtaReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            lookahead: None,
            combine_identical_spectra: true,
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

    fn next_line(&mut self) -> Result<Option<String>, TextParseError> {
        if self.abort.is_set() {
            return Ok(None);
        }
        if let Some(line) = self.lookahead.take() {
            return Ok(Some(line));
        }
        self.next_raw_line()
    }

    fn push_back(&mut self, line: String) {
        debug_assert!(self.lookahead.is_none(), "lookahead buffer must hold at most one line");
        self.lookahead = Some(line);
    }

    /// Consume a record's parent-ion line and peak lines without keeping
    /// any of it, used when fusing a duplicate charge record.
    fn discard_record_body(&mut self) -> Result<(), TextParseError> {
        self.next_line()?; // parent-ion line, discarded
        loop {
            match self.next_line()? {
                None => break,
                Some(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        break;
                    }
                    if trimmed.starts_with('=') {
                        self.push_back(line);
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Read the next fused spectrum, or `None` at end of input.
    pub fn read_next_spectrum(&mut self) -> Result<Option<Spectrum>, TextParseError> {
        let header = loop {
            match self.next_line()? {
                None => return Ok(None),
                Some(line) => {
                    if line.trim().starts_with('=') {
                        break line;
                    }
                    // Stray non-header, non-blank text between records is
                    // tolerated rather than treated as fatal.
                }
            }
        };

        let parsed = parse_title(&header).ok_or_else(|| {
            TextParseError::MalformedHeader(header.clone())
        })?;

        let parent_line = self
            .next_line()?
            .ok_or_else(|| TextParseError::MalformedHeader("missing parent-ion line".to_string()))?;
        let mut parent_tokens = parent_line.split_whitespace();
        let mh: f64 = parent_tokens
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| TextParseError::MalformedHeader(parent_line.clone()))?;
        let charge: i32 = parent_tokens
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| TextParseError::MalformedHeader(parent_line.clone()))?;

        let mut details = MsMsTextDetails::default();
        details.parent_ion_line_text = parent_line;
        details.parent_ion_mh = mh;
        details.spectrum_title = extract_quoted(&header);
        details.spectrum_title_with_comment_chars = header.clone();
        details.push_charge(charge);
        details.parent_ion_charge_count = 1;

        let mut spectrum = Spectrum::new();
        spectrum.ms_level = 2;
        spectrum.scan_number = parsed.scan_start;
        spectrum.scan_number_end = parsed.scan_end;
        spectrum.scan_count = 1;

        self.read_peak_lines(&mut spectrum)?;

        if self.combine_identical_spectra && charge == 2 {
            self.try_fuse(&parsed, &mut details, &mut spectrum)?;
        }

        spectrum.details = SpectrumDetails::MsMsText(details);
        spectrum.finalize_parent_ion_charge();
        spectrum.validate();
        Ok(Some(spectrum))
    }

    fn read_peak_lines(&mut self, spectrum: &mut Spectrum) -> Result<(), TextParseError> {
        loop {
            match self.next_line()? {
                None => break,
                Some(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        break;
                    }
                    if trimmed.starts_with('=') {
                        self.push_back(line);
                        break;
                    }
                    let mut tokens = trimmed.split_whitespace();
                    let mz: f64 = tokens
                        .next()
                        .and_then(|t| t.parse().ok())
                        .ok_or_else(|| TextParseError::MalformedPeakLine(line.clone()))?;
                    let intensity: f64 = tokens
                        .next()
                        .and_then(|t| t.parse().ok())
                        .ok_or_else(|| TextParseError::MalformedPeakLine(line.clone()))?;
                    spectrum.push_peak(mz, intensity);
                }
            }
        }
        Ok(())
    }

    /// If the next header describes the same spectrum at charge 3,
    /// absorb it: the duplicate record's peaks are discarded even when
    /// they differ from the first (a known quirk of the original, kept
    /// deliberately).
    fn try_fuse(
        &mut self,
        first: &ParsedTitle,
        details: &mut MsMsTextDetails,
        spectrum: &mut Spectrum,
    ) -> Result<(), TextParseError> {
        let Some(next_header) = self.next_line()? else {
            return Ok(());
        };
        if !next_header.trim().starts_with('=') {
            self.push_back(next_header);
            return Ok(());
        }
        let Some(next_parsed) = parse_title(&next_header) else {
            self.push_back(next_header);
            return Ok(());
        };
        if next_parsed.charge == 3 && next_parsed.cleaned_prefix == first.cleaned_prefix {
            warn!(
                "fusing DTA charge 2/3 records for {} without verifying peak equality",
                first.cleaned_prefix
            );
            self.discard_record_body()?;
            details.push_charge(3);
            details.parent_ion_charge_count = 2;
            details.charge_is_2_and_3_plus = true;
            spectrum.scan_count = 2;
        } else {
            self.push_back(next_header);
        }
        Ok(())
    }
}

impl<R: BufRead> Iterator for DtaReader<R> {
    type Item = Spectrum;

    fn next(&mut self) -> Option<Spectrum> {
        self.read_next_spectrum().ok().flatten()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn reader_for(text: &str) -> DtaReader<Cursor<Vec<u8>>> {
        DtaReader::new(Cursor::new(text.as_bytes().to_vec()))
    }

    #[test]
    fn test_basic_dta_spectrum() {
        let text = "===  \"Sample.100.100.2.dta\" ===\n1523.47 2\n200.1 500\n300.2 1000\n\n";
        let mut r = reader_for(text);
        let spec = r.read_next_spectrum().unwrap().unwrap();
        assert_eq!(spec.scan_number, 100);
        assert_eq!(spec.ms_level, 2);
        assert_eq!(spec.total_ion_current, 1500.0);
        assert_eq!(spec.base_peak_mz, 300.2);
        if let SpectrumDetails::MsMsText(details) = &spec.details {
            assert_eq!(details.parent_ion_mh, 1523.47);
        } else {
            panic!("expected MS/MS text details");
        }
        assert!((spec.parent_ion_mz - 762.238_64).abs() < 1e-5);
        assert!(r.read_next_spectrum().unwrap().is_none());
    }

    #[test]
    fn test_charge_2_3_fusion() {
        let text = concat!(
            "=== \"X.5.5.2.dta\" ===\n",
            "1000.0 2\n",
            "100.0 10\n",
            "\n",
            "=== \"X.5.5.3.dta\" ===\n",
            "1000.0 3\n",
            "100.0 10\n",
            "\n",
        );
        let mut r = reader_for(text);
        let spec = r.read_next_spectrum().unwrap().unwrap();
        if let SpectrumDetails::MsMsText(details) = &spec.details {
            assert_eq!(details.parent_ion_charges, vec![2, 3]);
            assert!(details.charge_is_2_and_3_plus);
            assert_eq!(details.parent_ion_charge_count, 2);
        } else {
            panic!("expected MS/MS text details");
        }
        assert_eq!(spec.scan_count, 2);
        assert!(r.read_next_spectrum().unwrap().is_none());
    }

    #[test]
    fn test_fusion_discards_differing_peaks() {
        let text = concat!(
            "=== \"Y.1.1.2.dta\" ===\n",
            "500.0 2\n",
            "50.0 5\n",
            "\n",
            "=== \"Y.1.1.3.dta\" ===\n",
            "500.0 3\n",
            "999.0 999\n",
            "\n",
        );
        let mut r = reader_for(text);
        let spec = r.read_next_spectrum().unwrap().unwrap();
        // The first record's peaks survive; the differing second record's
        // peaks are discarded per the known fusion quirk.
        assert_eq!(spec.mz_list, vec![50.0]);
    }

    #[test]
    fn test_no_fusion_without_matching_charge_three() {
        let text = concat!(
            "=== \"Z.1.1.2.dta\" ===\n",
            "500.0 2\n",
            "50.0 5\n",
            "\n",
            "=== \"Z.2.2.2.dta\" ===\n",
            "600.0 2\n",
            "60.0 6\n",
            "\n",
        );
        let mut r = reader_for(text);
        let first = r.read_next_spectrum().unwrap().unwrap();
        if let SpectrumDetails::MsMsText(details) = &first.details {
            assert_eq!(details.parent_ion_charges, vec![2]);
            assert!(!details.charge_is_2_and_3_plus);
        }
        let second = r.read_next_spectrum().unwrap().unwrap();
        assert_eq!(second.scan_number, 2);
    }
}
