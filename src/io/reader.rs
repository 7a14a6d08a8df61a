//! Reader façade (C7): dispatches to the right parser by file extension
//! and presents one uniform surface — sequential iteration plus
//! scan-number/index random access — regardless of which format backs it.
//!
//! mzXML and mzData get genuine random access via the [`IndexedXmlAccessor`]
//! (C6). DTA and MGF are inherently sequential (spec.md §4.4 has no indexed
//! variant for them), so random access there is served from a growing cache:
//! spectra are read forward and cached as encountered, and a lookup that
//! misses the cache keeps reading until it's found or the source is
//! exhausted.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::ReaderError;
use crate::io::dta::DtaReader;
use crate::io::indexed_xml::{IndexedXmlAccessor, XmlFormat};
use crate::io::mgf::MgfReader;
use crate::spectrum::Spectrum;

enum Backend {
    Indexed(IndexedXmlAccessor, usize),
    Dta(DtaReader<BufReader<File>>, Vec<Spectrum>, bool),
    Mgf(MgfReader<BufReader<File>>, Vec<Spectrum>, bool),
}

/// Format-agnostic spectrum reader, opened by file path.
pub struct SpectrumReader {
    path: PathBuf,
    backend: Option<Backend>,
}

fn has_suffix_ci(name: &str, suffix: &str) -> bool {
    name.len() >= suffix.len() && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

impl SpectrumReader {
    /// Open `path`, choosing a parser from its file extension:
    /// `.mgf`, `_dta.txt`, `.mzxml`, `.mzdata` (case-insensitive).
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self, ReaderError> {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        let backend = if has_suffix_ci(name, ".mgf") {
            let file = File::open(&path)?;
            Backend::Mgf(MgfReader::new(BufReader::new(file)), Vec::new(), false)
        } else if has_suffix_ci(name, "_dta.txt") {
            let file = File::open(&path)?;
            Backend::Dta(DtaReader::new(BufReader::new(file)), Vec::new(), false)
        } else if has_suffix_ci(name, ".mzxml") {
            Backend::Indexed(IndexedXmlAccessor::open(&path, XmlFormat::MzXml)?, 0)
        } else if has_suffix_ci(name, ".mzdata") {
            Backend::Indexed(IndexedXmlAccessor::open(&path, XmlFormat::MzData)?, 0)
        } else {
            return Err(ReaderError::UnrecognizedExtension(path));
        };

        Ok(Self {
            path,
            backend: Some(backend),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backend(&self) -> Result<&Backend, ReaderError> {
        self.backend.as_ref().ok_or(ReaderError::FileNotOpen)
    }

    fn backend_mut(&mut self) -> Result<&mut Backend, ReaderError> {
        self.backend.as_mut().ok_or(ReaderError::FileNotOpen)
    }

    /// Releases the underlying resources: the raw file handle first, then
    /// any buffered reader or parser state built on top of it. Calling this
    /// more than once is harmless — later calls simply find nothing left to
    /// release.
    pub fn close_file(&mut self) {
        self.backend = None;
    }

    /// Read the next spectrum in file order, or `None` at end of input.
    pub fn read_next_spectrum(&mut self) -> Result<Option<Spectrum>, ReaderError> {
        match self.backend_mut()? {
            Backend::Indexed(accessor, cursor) => {
                if *cursor >= accessor.len() {
                    return Ok(None);
                }
                let spectrum = accessor.get_spectrum_by_index(*cursor)?;
                *cursor += 1;
                Ok(Some(spectrum))
            }
            Backend::Dta(reader, cache, exhausted) => {
                if *exhausted {
                    return Ok(None);
                }
                match reader.read_next_spectrum()? {
                    Some(spec) => {
                        cache.push(spec.clone());
                        Ok(Some(spec))
                    }
                    None => {
                        *exhausted = true;
                        Ok(None)
                    }
                }
            }
            Backend::Mgf(reader, cache, exhausted) => {
                if *exhausted {
                    return Ok(None);
                }
                match reader.read_next_spectrum()? {
                    Some(spec) => {
                        cache.push(spec.clone());
                        Ok(Some(spec))
                    }
                    None => {
                        *exhausted = true;
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Random access by scan number. For the sequential formats this
    /// reads forward through any not-yet-cached spectra looking for a
    /// match.
    pub fn get_spectrum_by_scan_number(&mut self, scan_number: i64) -> Result<Spectrum, ReaderError> {
        if let Backend::Indexed(accessor, _) = self.backend()? {
            return accessor.get_spectrum_by_scan_number(scan_number);
        }

        if let Some(found) = self
            .cache_slice()?
            .iter()
            .find(|s| s.scan_number == scan_number)
        {
            return Ok(found.clone());
        }
        loop {
            match self.read_next_spectrum()? {
                Some(spec) if spec.scan_number == scan_number => return Ok(spec),
                Some(_) => continue,
                None => return Err(ReaderError::InvalidScanNumber(scan_number)),
            }
        }
    }

    /// Random access by zero-based ordinal position in the file.
    pub fn get_spectrum_by_index(&mut self, index: usize) -> Result<Spectrum, ReaderError> {
        if let Backend::Indexed(accessor, _) = self.backend()? {
            return accessor.get_spectrum_by_index(index);
        }

        while self.cache_slice()?.len() <= index {
            if self.read_next_spectrum()?.is_none() {
                return Err(ReaderError::InvalidSpectrumIndex(index));
            }
        }
        Ok(self.cache_slice()?[index].clone())
    }

    /// The accumulated sequential-format cache; errors if called on an
    /// indexed backend (callers always check that variant first) or once
    /// the file has been closed.
    fn cache_slice(&self) -> Result<&[Spectrum], ReaderError> {
        match self.backend()? {
            Backend::Dta(_, cache, _) | Backend::Mgf(_, cache, _) => Ok(cache),
            Backend::Indexed(..) => unreachable!("cache_slice is only called for sequential backends"),
        }
    }

    /// All scan numbers seen so far. For the indexed formats this is the
    /// complete list (the whole file was scanned on open); for the
    /// sequential formats it reflects only what has been read or cached
    /// up to this call, so callers that want the full list should drain
    /// the reader first via [`Self::read_next_spectrum`]. Empty once the
    /// file has been closed.
    pub fn get_scan_number_list(&self) -> Vec<i64> {
        match &self.backend {
            Some(Backend::Indexed(accessor, _)) => accessor.get_scan_number_list(),
            Some(Backend::Dta(_, cache, _)) | Some(Backend::Mgf(_, cache, _)) => {
                cache.iter().map(|s| s.scan_number).collect()
            }
            None => Vec::new(),
        }
    }

    /// Number of spectra currently cached / indexed. Zero once the file has
    /// been closed.
    pub fn cached_spectrum_count(&self) -> usize {
        match &self.backend {
            Some(Backend::Indexed(accessor, _)) => accessor.len(),
            Some(Backend::Dta(_, cache, _)) | Some(Backend::Mgf(_, cache, _)) => cache.len(),
            None => 0,
        }
    }
}

impl Iterator for SpectrumReader {
    type Item = Spectrum;

    fn next(&mut self) -> Option<Spectrum> {
        self.read_next_spectrum().ok().flatten()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_dispatch_by_extension_mgf() {
        let mut path = std::env::temp_dir();
        path.push(format!("mzlegacy_test_{}.mgf", std::process::id()));
        {
            let mut f = File::create(&path).unwrap();
            writeln!(f, "BEGIN IONS").unwrap();
            writeln!(f, "TITLE=Foo.1.1.2.dta").unwrap();
            writeln!(f, "PEPMASS=400.0").unwrap();
            writeln!(f, "CHARGE=2+").unwrap();
            writeln!(f, "100.0 10").unwrap();
            writeln!(f, "END IONS").unwrap();
        }

        let mut reader = SpectrumReader::open_file(&path).unwrap();
        let first = reader.read_next_spectrum().unwrap().unwrap();
        assert_eq!(first.scan_number, 1);
        assert!(reader.read_next_spectrum().unwrap().is_none());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_unrecognized_extension() {
        let mut path = std::env::temp_dir();
        path.push(format!("mzlegacy_test_{}.unknown", std::process::id()));
        File::create(&path).unwrap();
        let result = SpectrumReader::open_file(&path);
        assert!(matches!(result, Err(ReaderError::UnrecognizedExtension(_))));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_dta_random_access_by_scan_number() {
        let mut path = std::env::temp_dir();
        path.push(format!("mzlegacy_test_{}_dta.txt", std::process::id()));
        {
            let mut f = File::create(&path).unwrap();
            writeln!(f, "=== \"A.1.1.2.dta\" ===").unwrap();
            writeln!(f, "500.0 2").unwrap();
            writeln!(f, "10.0 1").unwrap();
            writeln!(f).unwrap();
            writeln!(f, "=== \"A.2.2.2.dta\" ===").unwrap();
            writeln!(f, "600.0 2").unwrap();
            writeln!(f, "20.0 1").unwrap();
            writeln!(f).unwrap();
        }

        let mut reader = SpectrumReader::open_file(&path).unwrap();
        let second = reader.get_spectrum_by_scan_number(2).unwrap();
        assert_eq!(second.scan_number, 2);
        assert_eq!(reader.cached_spectrum_count(), 2);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_close_file_is_idempotent_and_invalidates_access() {
        let mut path = std::env::temp_dir();
        path.push(format!("mzlegacy_test_{}_close.mgf", std::process::id()));
        {
            let mut f = File::create(&path).unwrap();
            writeln!(f, "BEGIN IONS").unwrap();
            writeln!(f, "TITLE=Foo.1.1.2.dta").unwrap();
            writeln!(f, "PEPMASS=400.0").unwrap();
            writeln!(f, "END IONS").unwrap();
        }

        let mut reader = SpectrumReader::open_file(&path).unwrap();
        reader.read_next_spectrum().unwrap();
        reader.close_file();
        reader.close_file();

        assert!(matches!(
            reader.read_next_spectrum(),
            Err(ReaderError::FileNotOpen)
        ));
        assert!(matches!(
            reader.get_spectrum_by_index(0),
            Err(ReaderError::FileNotOpen)
        ));
        assert_eq!(reader.cached_spectrum_count(), 0);
        assert!(reader.get_scan_number_list().is_empty());

        std::fs::remove_file(&path).ok();
    }
}

/// End-to-end scenarios S1-S6, exercising the façade the way a caller
/// would rather than unit-testing individual parsers.
#[cfg(test)]
mod scenarios {
    use super::*;
    use crate::codec::{self, Endian};
    use crate::spectrum::SpectrumDetails;
    use std::fs;

    fn write_temp(name: &str, contents: &[u8]) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("mzlegacy_e2e_{}_{name}", std::process::id()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn s1_dta_basic_spectrum() {
        let path = write_temp(
            "s1_dta.txt",
            b"===  \"Sample.100.100.2.dta\" ===\n1523.47 2\n200.1 500\n300.2 1000\n\n",
        );
        let mut reader = SpectrumReader::open_file(&path).unwrap();
        let spec = reader.read_next_spectrum().unwrap().unwrap();

        assert_eq!(spec.scan_number, 100);
        assert_eq!(spec.ms_level, 2);
        assert_eq!(spec.mz_list, vec![200.1, 300.2]);
        assert_eq!(spec.intensity_list, vec![500.0, 1000.0]);
        assert_eq!(spec.total_ion_current, 1500.0);
        assert_eq!(spec.base_peak_mz, 300.2);
        assert!((spec.parent_ion_mz - 762.238_64).abs() < 1e-5);

        if let SpectrumDetails::MsMsText(details) = &spec.details {
            assert_eq!(details.parent_ion_mh, 1523.47);
        } else {
            panic!("expected MS/MS text details");
        }

        assert!(reader.read_next_spectrum().unwrap().is_none());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn s2_dta_charge_fusion() {
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
        let path = write_temp("s2_dta.txt", text.as_bytes());
        let mut reader = SpectrumReader::open_file(&path).unwrap();
        let spec = reader.read_next_spectrum().unwrap().unwrap();

        if let SpectrumDetails::MsMsText(details) = &spec.details {
            assert_eq!(details.parent_ion_charges, vec![2, 3]);
            assert!(details.charge_is_2_and_3_plus);
        } else {
            panic!("expected MS/MS text details");
        }
        assert!(reader.read_next_spectrum().unwrap().is_none());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn s3_mgf_basic_spectrum() {
        let text = "BEGIN IONS\nTITLE=Foo.42.42.2.dta\nPEPMASS=400.0 1e5\nCHARGE=2+\n100.0 10\n200.0 20\nEND IONS\n";
        let path = write_temp("s3.mgf", text.as_bytes());
        let mut reader = SpectrumReader::open_file(&path).unwrap();
        let spec = reader.read_next_spectrum().unwrap().unwrap();

        assert_eq!(spec.scan_number, 42);
        assert_eq!(spec.parent_ion_mz, 400.0);
        assert_eq!(spec.peaks_count(), 2);
        if let SpectrumDetails::MsMsText(details) = &spec.details {
            assert_eq!(details.parent_ion_charges, vec![2]);
            assert!((details.parent_ion_mh - 798.992_72).abs() < 1e-5);
        } else {
            panic!("expected MS/MS text details");
        }
        fs::remove_file(&path).ok();
    }

    fn s4_mzxml_bytes() -> Vec<u8> {
        let values = [100.0f32, 500.0, 200.0, 1000.0];
        let payload = codec::encode(&values, Endian::BigEndian, false);
        format!(
            r#"<?xml version="1.0"?>
<mzXML>
<msRun scanCount="2">
<scan num="1" msLevel="1" peaksCount="2">
<peaks precision="32" byteOrder="network" pairOrder="m/z-int">{payload}</peaks>
</scan>
<scan num="2" msLevel="1" peaksCount="2">
<peaks precision="32" byteOrder="network" pairOrder="m/z-int">{payload}</peaks>
</scan>
</msRun>
</mzXML>"#
        )
        .into_bytes()
    }

    #[test]
    fn s4_mzxml_streaming_two_scans() {
        let path = write_temp("s4.mzxml", &s4_mzxml_bytes());
        let mut reader = SpectrumReader::open_file(&path).unwrap();

        let first = reader.read_next_spectrum().unwrap().unwrap();
        assert_eq!(first.scan_number, 1);
        assert_eq!(first.mz_list, vec![100.0, 200.0]);
        assert_eq!(first.intensity_list, vec![500.0, 1000.0]);

        let second = reader.read_next_spectrum().unwrap().unwrap();
        assert_eq!(second.scan_number, 2);
        assert_eq!(second.mz_list, vec![100.0, 200.0]);
        assert_eq!(second.intensity_list, vec![500.0, 1000.0]);

        assert!(reader.read_next_spectrum().unwrap().is_none());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn s5_mzxml_indexed_matches_streaming() {
        let path = write_temp("s5.mzxml", &s4_mzxml_bytes());

        let mut streaming = SpectrumReader::open_file(&path).unwrap();
        streaming.read_next_spectrum().unwrap().unwrap();
        let streamed_second = streaming.read_next_spectrum().unwrap().unwrap();

        let mut indexed = SpectrumReader::open_file(&path).unwrap();
        let direct_second = indexed.get_spectrum_by_scan_number(2).unwrap();

        assert_eq!(streamed_second.scan_number, direct_second.scan_number);
        assert_eq!(streamed_second.mz_list, direct_second.mz_list);
        assert_eq!(streamed_second.intensity_list, direct_second.intensity_list);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn s6_mzdata_little_endian_dual_payloads() {
        let mz = codec::encode(&[250.0f32, 260.0], Endian::LittleEndian, false);
        let inten = codec::encode(&[7.0f32, 9.0], Endian::LittleEndian, false);
        let text = format!(
            r#"<?xml version="1.0"?>
<mzData version="1.05">
<spectrumList count="1">
<spectrum id="1">
<spectrumDesc>
<spectrumSettings>
<acqSpecification spectrumType="discrete">
<acquisition acqNumber="1"/>
</acqSpecification>
<spectrumInstrument msLevel="1"/>
</spectrumSettings>
</spectrumDesc>
<mzArrayBinary>
<data precision="32" endian="little" length="2">{mz}</data>
</mzArrayBinary>
<intenArrayBinary>
<data precision="32" endian="little" length="2">{inten}</data>
</intenArrayBinary>
</spectrum>
</spectrumList>
</mzData>"#
        );
        let path = write_temp("s6.mzdata", text.as_bytes());
        let mut reader = SpectrumReader::open_file(&path).unwrap();
        let spec = reader.read_next_spectrum().unwrap().unwrap();

        assert_eq!(spec.mz_list, vec![250.0, 260.0]);
        assert_eq!(spec.intensity_list, vec![7.0, 9.0]);

        fs::remove_file(&path).ok();
    }
}
