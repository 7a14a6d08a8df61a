//! Sequential mzXML parser (C5). A pull-style SAX reader over `quick_xml`
//! driving the state machine described in spec.md §4.3: `<msRun>`,
//! nested `<scan>`, `<precursorMz>`, `<peaks>`.

use std::collections::{HashMap, VecDeque};
use std::io::BufRead;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::codec::{self, Endian};
use crate::error::XmlParseError;
use crate::io::xml_common::{attributes, local_name, next_event, ParentStack};
use crate::progress::{fraction, AbortFlag, ProgressObserver, PROGRESS_LINE_INTERVAL};
use crate::spectrum::{
    CompressionType, MzXmlDetails, PeakPairOrder, Polarity, ScanType, Spectrum, SpectrumDetails,
};

/// Parses an ISO-8601 duration of the form `PT123.4S` into seconds.
fn parse_pt_seconds(value: &str) -> Option<f64> {
    let rest = value.strip_prefix("PT")?;
    let rest = rest.strip_suffix('S')?;
    rest.parse::<f64>().ok()
}

fn parse_peak_pair_order(value: &str) -> PeakPairOrder {
    match value {
        "m/z-int" => PeakPairOrder::MzIntensity,
        "int-m/z" => PeakPairOrder::IntensityMz,
        "m/z" => PeakPairOrder::MzOnly,
        "intensity" => PeakPairOrder::IntensityOnly,
        "S/N" => PeakPairOrder::SignalToNoise,
        "charge" => PeakPairOrder::Charge,
        "m/z ruler" => PeakPairOrder::MzRuler,
        "TOF" => PeakPairOrder::Tof,
        _ => PeakPairOrder::MzIntensity,
    }
}

struct InProgressScan {
    spectrum: Spectrum,
    depth: usize,
}

/// Sequential mzXML reader over any buffered byte source.
pub struct MzXmlReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    depth: usize,
    stack: ParentStack,
    total_scan_count: i32,
    scan_stack: Vec<InProgressScan>,
    pending: VecDeque<Spectrum>,
    pub skip_binary_data: bool,
    in_precursor_mz: bool,
    precursor_attrs: HashMap<String, String>,
    precursor_text: String,
    in_peaks: bool,
    peaks_attrs: HashMap<String, String>,
    peaks_text: String,
    events_since_progress: usize,
    pub abort: AbortFlag,
    pub observer: Option<Box<dyn ProgressObserver>>,
    pub total_bytes: u64,
    source_text: Option<String>,
}

impl<R: BufRead> MzXmlReader<R> {
    pub fn new(inner: R) -> Self {
        let mut reader = Reader::from_reader(inner);
        reader.config_mut().trim_text(true);
        Self {
            reader,
            buf: Vec::with_capacity(8 * 1024),
            depth: 0,
            stack: ParentStack::new(),
            total_scan_count: 0,
            scan_stack: Vec::new(),
            pending: VecDeque::new(),
            skip_binary_data: false,
            in_precursor_mz: false,
            precursor_attrs: HashMap::new(),
            precursor_text: String::new(),
            in_peaks: false,
            peaks_attrs: HashMap::new(),
            peaks_text: String::new(),
            events_since_progress: 0,
            abort: AbortFlag::new(),
            observer: None,
            total_bytes: 0,
            source_text: None,
        }
    }

    /// Attach the full decoded document text, letting malformed-XML errors
    /// report a real line/column instead of a bare byte offset. Used by
    /// the indexed XML accessor, which already holds the whole document
    /// in memory for its one-shot re-parse.
    pub fn with_source_text(mut self, text: String) -> Self {
        self.source_text = Some(text);
        self
    }

    pub fn total_scan_count(&self) -> i32 {
        self.total_scan_count
    }

    fn maybe_emit_progress(&mut self) {
        self.events_since_progress += 1;
        if self.events_since_progress >= PROGRESS_LINE_INTERVAL {
            self.events_since_progress = 0;
            if let Some(observer) = &self.observer {
                observer.on_progress(fraction(self.reader.buffer_position(), self.total_bytes));
            }
        }
    }

    /// Read the next complete spectrum. Returns `Ok(None)` at end of
    /// document. A malformed element surfaces an error but leaves the
    /// reader positioned to attempt recovery at the next `<scan>`.
    pub fn read_next_spectrum(&mut self) -> Result<Option<Spectrum>, XmlParseError> {
        if let Some(spec) = self.pending.pop_front() {
            return Ok(Some(spec));
        }

        loop {
            if self.abort.is_set() {
                return Ok(None);
            }
            self.buf.clear();
            let event = next_event(&mut self.reader, &mut self.buf, self.source_text.as_deref())?;
            self.maybe_emit_progress();

            match event {
                Event::Eof => return Ok(None),
                Event::Start(start) => {
                    let name = local_name(&start);
                    let attrs = attributes(&start);
                    self.depth += 1;
                    self.stack.push(&name, self.depth);
                    self.handle_start(&name, &attrs)?;
                }
                Event::Empty(start) => {
                    let name = local_name(&start);
                    let attrs = attributes(&start);
                    self.depth += 1;
                    self.stack.push(&name, self.depth);
                    self.handle_start(&name, &attrs)?;
                    self.handle_end(&name)?;
                    self.stack.pop_to(self.depth);
                    self.depth -= 1;
                }
                Event::Text(text) => {
                    let decoded = text.unescape().unwrap_or_default().into_owned();
                    if self.in_precursor_mz {
                        self.precursor_text.push_str(&decoded);
                    } else if self.in_peaks {
                        self.peaks_text.push_str(&decoded);
                    }
                }
                Event::End(end) => {
                    let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                    self.handle_end(&name)?;
                    self.stack.pop_to(self.depth);
                    self.depth -= 1;
                }
                _ => {}
            }

            if let Some(spec) = self.pending.pop_front() {
                return Ok(Some(spec));
            }
        }
    }

    fn handle_start(
        &mut self,
        name: &str,
        attrs: &HashMap<String, String>,
    ) -> Result<(), XmlParseError> {
        match name {
            "msRun" => {
                if let Some(v) = attrs.get("scanCount") {
                    self.total_scan_count = v.parse().unwrap_or(0);
                }
            }
            "scan" => {
                let mut spectrum = Spectrum::new();
                let mut details = MzXmlDetails::default();
                if let Some(v) = attrs.get("num") {
                    spectrum.scan_number = v.parse().unwrap_or(0);
                }
                if let Some(v) = attrs.get("msLevel") {
                    spectrum.ms_level = v.parse().unwrap_or(1);
                }
                if let Some(v) = attrs.get("peaksCount") {
                    let _count: usize = v.parse().unwrap_or(0);
                }
                if let Some(v) = attrs.get("retentionTime") {
                    if let Some(seconds) = parse_pt_seconds(v) {
                        spectrum.retention_time_minutes = seconds / 60.0;
                    }
                }
                if let Some(v) = attrs.get("centroided") {
                    spectrum.centroided = v == "1" || v.eq_ignore_ascii_case("true");
                }
                if let Some(v) = attrs.get("polarity") {
                    spectrum.polarity = match v {
                        "+" | "Positive" => Polarity::Positive,
                        "-" | "Negative" => Polarity::Negative,
                        _ => Polarity::Unknown,
                    };
                }
                if let Some(v) = attrs.get("collisionEnergy") {
                    details.collision_energy = v.parse().unwrap_or(0.0);
                }
                if let Some(v) = attrs.get("scanType") {
                    details.scan_type = match v {
                        "zoom" => ScanType::Zoom,
                        "SIM" => ScanType::Sim,
                        "SRM" => ScanType::Srm,
                        "CRM" => ScanType::Crm,
                        "Q1" => ScanType::Q1,
                        "Q3" => ScanType::Q3,
                        "MRM" => ScanType::Mrm,
                        _ => ScanType::Full,
                    };
                }
                if let Some(v) = attrs.get("filterLine") {
                    details.filter_line = v.clone();
                }
                if let Some(v) = attrs.get("startMz") {
                    details.start_mz = v.parse().unwrap_or(0.0);
                }
                if let Some(v) = attrs.get("endMz") {
                    details.end_mz = v.parse().unwrap_or(0.0);
                }
                spectrum.details = SpectrumDetails::MzXml(details);
                self.scan_stack.push(InProgressScan {
                    spectrum,
                    depth: self.depth,
                });
            }
            "precursorMz" => {
                self.in_precursor_mz = true;
                self.precursor_attrs = attrs.clone();
                self.precursor_text.clear();
            }
            "peaks" => {
                self.in_peaks = true;
                self.peaks_attrs = attrs.clone();
                self.peaks_text.clear();
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_end(&mut self, name: &str) -> Result<(), XmlParseError> {
        match name {
            "precursorMz" => {
                self.in_precursor_mz = false;
                if let Some(top) = self.scan_stack.last_mut() {
                    let SpectrumDetails::MzXml(details) = &mut top.spectrum.details else {
                        return Ok(());
                    };
                    if let Some(v) = self.precursor_attrs.get("precursorScanNum") {
                        details.precursor_scan_number = v.parse().unwrap_or(0);
                    }
                    if let Some(v) = self.precursor_attrs.get("precursorIntensity") {
                        top.spectrum.parent_ion_intensity = v.parse().unwrap_or(0.0);
                    }
                    if let Some(v) = self.precursor_attrs.get("activationMethod") {
                        details.activation_method = v.clone();
                    }
                    if let Some(v) = self.precursor_attrs.get("precursorCharge") {
                        details.parent_ion_charge = v.parse().unwrap_or(0);
                    }
                    top.spectrum.parent_ion_mz = self.precursor_text.trim().parse().unwrap_or(0.0);
                }
            }
            "peaks" => {
                self.in_peaks = false;
                if let Some(top) = self.scan_stack.last_mut() {
                    self.apply_peaks(top)?;
                }
            }
            "scan" => {
                if let Some(pos) = self
                    .scan_stack
                    .iter()
                    .rposition(|s| s.depth == self.depth)
                {
                    let mut finished = self.scan_stack.remove(pos);
                    finished.spectrum.validate();
                    self.pending.push_back(finished.spectrum);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn apply_peaks(&self, scan: &mut InProgressScan) -> Result<(), XmlParseError> {
        let SpectrumDetails::MzXml(details) = &mut scan.spectrum.details else {
            return Ok(());
        };

        let precision: i32 = self
            .peaks_attrs
            .get("precision")
            .and_then(|v| v.parse().ok())
            .unwrap_or(32);
        details.numeric_precision = precision;

        let network = self
            .peaks_attrs
            .get("byteOrder")
            .map(|v| v == "network")
            .unwrap_or(true);
        details.peaks_byte_order_network = network;
        let endian = if network {
            Endian::BigEndian
        } else {
            Endian::LittleEndian
        };

        let pair_order_text = self
            .peaks_attrs
            .get("pairOrder")
            .or_else(|| self.peaks_attrs.get("contentType"))
            .cloned()
            .unwrap_or_else(|| "m/z-int".to_string());
        details.peaks_pair_order = parse_peak_pair_order(&pair_order_text);

        let compressed = self
            .peaks_attrs
            .get("compressionType")
            .map(|v| v == "zlib")
            .unwrap_or(false);
        details.compression_type = if compressed {
            CompressionType::Zlib
        } else {
            CompressionType::None
        };
        if let Some(v) = self.peaks_attrs.get("compressedLen") {
            details.compressed_length = v.parse().unwrap_or(0);
        }

        if self.skip_binary_data || self.peaks_text.trim().is_empty() {
            return Ok(());
        }

        let values: Vec<f64> = if precision == 64 {
            codec::decode::<f64>(&self.peaks_text, compressed, endian)?
        } else {
            codec::decode::<f32>(&self.peaks_text, compressed, endian)?
                .into_iter()
                .map(|v| v as f64)
                .collect()
        };

        match details.peaks_pair_order {
            PeakPairOrder::IntensityMz => {
                for pair in values.chunks_exact(2) {
                    scan.spectrum.push_peak(pair[1], pair[0]);
                }
            }
            _ => {
                for pair in values.chunks_exact(2) {
                    scan.spectrum.push_peak(pair[0], pair[1]);
                }
            }
        }
        Ok(())
    }
}

impl<R: BufRead> Iterator for MzXmlReader<R> {
    type Item = Spectrum;

    fn next(&mut self) -> Option<Spectrum> {
        self.read_next_spectrum().ok().flatten()
    }
}
