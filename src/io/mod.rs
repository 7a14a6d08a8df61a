//! Format-specific I/O: sequential parsers (C4/C5), the indexed XML
//! accessor (C6), and the reader façade (C7) that dispatches between them.

pub mod dta;
pub mod indexed_xml;
pub mod mgf;
pub mod mzdata_xml;
pub mod mzxml;
pub mod offset_index;
pub mod reader;
pub mod xml_common;

pub use dta::DtaReader;
pub use indexed_xml::{IndexedXmlAccessor, XmlFormat};
pub use mgf::MgfReader;
pub use mzdata_xml::MzDataReader;
pub use mzxml::MzXmlReader;
pub use reader::SpectrumReader;
