//! Sequential mzData parser (C5): `<spectrum>`, `cvParam`-driven metadata,
//! and the dual `mzArrayBinary`/`intenArrayBinary` payloads described in
//! spec.md §4.3. Unlike mzXML, mzData payloads default to little-endian
//! and carry no compression flag.

use std::collections::VecDeque;
use std::io::BufRead;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::codec::{self, Endian};
use crate::error::XmlParseError;
use crate::io::xml_common::{attributes, local_name, next_event, ParentStack};
use crate::progress::{fraction, AbortFlag, ProgressObserver, PROGRESS_LINE_INTERVAL};
use crate::spectrum::{MzDataDetails, Polarity, Spectrum, SpectrumDetails};

struct InProgressSpectrum {
    spectrum: Spectrum,
    depth: usize,
    in_mz_array: bool,
    in_inten_array: bool,
    mz_precision: i32,
    mz_endian: Endian,
    inten_precision: i32,
    inten_endian: Endian,
    data_text: String,
}

impl InProgressSpectrum {
    fn new(depth: usize) -> Self {
        let mut spectrum = Spectrum::new();
        spectrum.details = SpectrumDetails::MzData(MzDataDetails::default());
        Self {
            spectrum,
            depth,
            in_mz_array: false,
            in_inten_array: false,
            mz_precision: 32,
            mz_endian: Endian::LittleEndian,
            inten_precision: 32,
            inten_endian: Endian::LittleEndian,
            data_text: String::new(),
        }
    }
}

fn parse_endian(value: Option<&String>) -> Endian {
    match value.map(String::as_str) {
        Some("big") => Endian::BigEndian,
        _ => Endian::LittleEndian,
    }
}

/// Sequential mzData reader over any buffered byte source.
pub struct MzDataReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    depth: usize,
    stack: ParentStack,
    current: Option<InProgressSpectrum>,
    pending: VecDeque<Spectrum>,
    pub skip_binary_data: bool,
    events_since_progress: usize,
    pub abort: AbortFlag,
    pub observer: Option<Box<dyn ProgressObserver>>,
    pub total_bytes: u64,
    source_text: Option<String>,
}

impl<R: BufRead> MzDataReader<R> {
    pub fn new(inner: R) -> Self {
        let mut reader = Reader::from_reader(inner);
        reader.config_mut().trim_text(true);
        Self {
            reader,
            buf: Vec::with_capacity(8 * 1024),
            depth: 0,
            stack: ParentStack::new(),
            current: None,
            pending: VecDeque::new(),
            skip_binary_data: false,
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

    fn maybe_emit_progress(&mut self) {
        self.events_since_progress += 1;
        if self.events_since_progress >= PROGRESS_LINE_INTERVAL {
            self.events_since_progress = 0;
            if let Some(observer) = &self.observer {
                observer.on_progress(fraction(self.reader.buffer_position(), self.total_bytes));
            }
        }
    }

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
                    if let Some(cur) = &mut self.current {
                        if cur.in_mz_array || cur.in_inten_array {
                            let decoded = text.unescape().unwrap_or_default();
                            cur.data_text.push_str(&decoded);
                        }
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
        attrs: &std::collections::HashMap<String, String>,
    ) -> Result<(), XmlParseError> {
        match name {
            "spectrum" => {
                self.current = Some(InProgressSpectrum::new(self.depth));
                if let Some(v) = attrs.get("id") {
                    if let Some(cur) = &mut self.current {
                        cur.spectrum.scan_number = v.parse().unwrap_or(0);
                    }
                }
            }
            "acqSpecification" => {
                if let (Some(v), Some(cur)) = (attrs.get("spectrumType"), &mut self.current) {
                    cur.spectrum.spectrum_type = if v == "continuous" {
                        crate::spectrum::SpectrumType::Continuous
                    } else {
                        crate::spectrum::SpectrumType::Discrete
                    };
                }
            }
            "spectrumDesc" => {}
            "spectrumSettings" => {}
            "spectrumInstrument" | "acqInstrument" => {
                if let Some(cur) = &mut self.current {
                    if let Some(v) = attrs.get("msLevel") {
                        cur.spectrum.ms_level = v.parse().unwrap_or(1);
                    }
                    if let Some(v) = attrs.get("mzRangeStart") {
                        cur.spectrum.mz_range_start = v.parse().unwrap_or(0.0);
                    }
                    if let Some(v) = attrs.get("mzRangeStop") {
                        cur.spectrum.mz_range_end = v.parse().unwrap_or(0.0);
                    }
                }
            }
            "cvParam" => self.apply_cv_param(attrs),
            "precursor" => {
                if let (Some(v), Some(cur)) = (attrs.get("msLevel"), &mut self.current) {
                    if let SpectrumDetails::MzData(details) = &mut cur.spectrum.details {
                        details.parent_ion_spectrum_ms_level = v.parse().unwrap_or(0);
                    }
                }
                if let (Some(v), Some(cur)) = (attrs.get("spectrumRef"), &mut self.current) {
                    if let SpectrumDetails::MzData(details) = &mut cur.spectrum.details {
                        details.parent_ion_spectrum_id = v.parse().unwrap_or(0);
                    }
                }
            }
            "mzArrayBinary" => {
                if let Some(cur) = &mut self.current {
                    cur.in_mz_array = true;
                }
            }
            "intenArrayBinary" => {
                if let Some(cur) = &mut self.current {
                    cur.in_inten_array = true;
                }
            }
            "data" => {
                if let Some(cur) = &mut self.current {
                    cur.data_text.clear();
                    let precision: i32 = attrs
                        .get("precision")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(32);
                    let endian = parse_endian(attrs.get("endian"));
                    if cur.in_mz_array {
                        cur.mz_precision = precision;
                        cur.mz_endian = endian;
                    } else if cur.in_inten_array {
                        cur.inten_precision = precision;
                        cur.inten_endian = endian;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn apply_cv_param(&mut self, attrs: &std::collections::HashMap<String, String>) {
        let Some(cur) = &mut self.current else {
            return;
        };
        let name = attrs.get("name").map(String::as_str).unwrap_or("");
        let value = attrs.get("value").map(String::as_str).unwrap_or("");

        let in_activation = self.stack.contains("activation");
        let in_ion_selection = self.stack.contains("ionSelection");

        if in_activation {
            let SpectrumDetails::MzData(details) = &mut cur.spectrum.details else {
                return;
            };
            match name {
                "CollisionEnergy" => details.collision_energy = value.parse().unwrap_or(0.0),
                "CollisionEnergyUnits" => details.collision_energy_units = value.to_string(),
                "Method" | "CollisionMethod" => details.collision_method = value.to_string(),
                _ => {}
            }
            return;
        }

        if in_ion_selection {
            match name {
                "MassToChargeRatio" | "mz" => {
                    cur.spectrum.parent_ion_mz = value.parse().unwrap_or(0.0);
                }
                "ChargeState" => {
                    if let SpectrumDetails::MzData(details) = &mut cur.spectrum.details {
                        details.parent_ion_charge = value.parse().unwrap_or(0);
                    }
                }
                "Intensity" => {
                    cur.spectrum.parent_ion_intensity = value.parse().unwrap_or(0.0);
                }
                _ => {}
            }
            return;
        }

        match name {
            "TimeInMinutes" => cur.spectrum.retention_time_minutes = value.parse().unwrap_or(0.0),
            "TimeInSeconds" => {
                cur.spectrum.retention_time_minutes = value.parse::<f64>().unwrap_or(0.0) / 60.0
            }
            "Polarity" => {
                cur.spectrum.polarity = match value {
                    "Positive" | "+" => Polarity::Positive,
                    "Negative" | "-" => Polarity::Negative,
                    _ => Polarity::Unknown,
                };
            }
            "ScanMode" => {
                if let SpectrumDetails::MzData(details) = &mut cur.spectrum.details {
                    details.scan_mode = value.to_string();
                }
            }
            _ => {}
        }
    }

    fn handle_end(&mut self, name: &str) -> Result<(), XmlParseError> {
        match name {
            "mzArrayBinary" => {
                if let Some(cur) = &mut self.current {
                    cur.in_mz_array = false;
                }
            }
            "intenArrayBinary" => {
                if let Some(cur) = &mut self.current {
                    cur.in_inten_array = false;
                }
            }
            "data" => {
                self.apply_data()?;
            }
            "spectrum" => {
                if let Some(mut cur) = self.current.take() {
                    cur.spectrum.validate();
                    self.pending.push_back(cur.spectrum);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn apply_data(&mut self) -> Result<(), XmlParseError> {
        let Some(cur) = &mut self.current else {
            return Ok(());
        };
        if self.skip_binary_data {
            cur.data_text.clear();
            return Ok(());
        }
        if cur.data_text.trim().is_empty() {
            return Ok(());
        }

        // Determine which array this `<data>` belonged to by checking the
        // flag that was still set when the element opened; `data_text`
        // has already been cleared for the other array by this point
        // since both arrays write to the same scratch buffer sequentially.
        if cur.in_mz_array {
            let values: Vec<f64> = if cur.mz_precision == 64 {
                codec::decode::<f64>(&cur.data_text, false, cur.mz_endian)?
            } else {
                codec::decode::<f32>(&cur.data_text, false, cur.mz_endian)?
                    .into_iter()
                    .map(|v| v as f64)
                    .collect()
            };
            cur.spectrum.mz_list = values;
        } else if cur.in_inten_array {
            let values: Vec<f64> = if cur.inten_precision == 64 {
                codec::decode::<f64>(&cur.data_text, false, cur.inten_endian)?
            } else {
                codec::decode::<f32>(&cur.data_text, false, cur.inten_endian)?
                    .into_iter()
                    .map(|v| v as f64)
                    .collect()
            };
            cur.spectrum.intensity_list = values;
        }
        cur.data_text.clear();
        Ok(())
    }
}

impl<R: BufRead> Iterator for MzDataReader<R> {
    type Item = Spectrum;

    fn next(&mut self) -> Option<Spectrum> {
        self.read_next_spectrum().ok().flatten()
    }
}
