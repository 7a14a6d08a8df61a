//! `mzlegacy` reads the legacy mass spectrometry file formats that predate
//! mzML: mzXML, mzData, DTA (`_dta.txt`) and MGF.
//!
//! The library currently supports reading:
//!   1. MGF files using [`MgfReader`] in [`mzlegacy::io::mgf`](crate::io::mgf)
//!   2. `_dta.txt` files using [`DtaReader`] in [`mzlegacy::io::dta`](crate::io::dta)
//!   3. mzXML files, sequentially via [`MzXmlReader`] in [`mzlegacy::io::mzxml`](crate::io::mzxml)
//!      or with random access via [`IndexedXmlAccessor`] in [`mzlegacy::io::indexed_xml`](crate::io::indexed_xml)
//!   4. mzData files, the same way via [`MzDataReader`] in [`mzlegacy::io::mzdata_xml`](crate::io::mzdata_xml)
//!
//! Format dispatch by file extension is handled by [`SpectrumReader`] in
//! [`mzlegacy::io::reader`](crate::io::reader).
//!
//! # Example
//! ```no_run
//! use mzlegacy::io::SpectrumReader;
//!
//! let mut reader = SpectrumReader::open_file("./test/data/small.mzXML").unwrap();
//! while let Some(spectrum) = reader.read_next_spectrum().unwrap() {
//!     println!("Scan {} => BP {}", spectrum.scan_number, spectrum.base_peak_mz);
//! }
//! ```

pub mod codec;
pub mod error;
pub mod io;
pub mod mass;
pub mod progress;
pub mod spectrum;
pub mod text_reader;

pub use error::ReaderError;
pub use io::SpectrumReader;
pub use spectrum::Spectrum;
