//! Spectrum record (C3): a generic mass spectrum plus format-specific
//! extensions, and the validator that fixes up derived fields.

use crate::mass::HMASS;

/// Where a spectrum sits in its acquisition lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    #[default]
    Initialized,
    DataDefined,
    Validated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpectrumType {
    #[default]
    Discrete,
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Polarity {
    #[default]
    Unknown,
    Positive,
    Negative,
}

/// The generic spectrum record, common to every supported format. See
/// spec.md §3 for the field-by-field invariants.
#[derive(Debug, Clone, Default)]
pub struct Spectrum {
    pub spectrum_id: i64,
    pub scan_number: i64,
    pub scan_count: i32,
    pub scan_number_end: i64,
    pub spectrum_type: SpectrumType,
    pub spectrum_combination_method: String,
    pub ms_level: i32,
    pub centroided: bool,
    pub polarity: Polarity,
    pub retention_time_minutes: f64,
    pub mz_range_start: f64,
    pub mz_range_end: f64,
    pub base_peak_mz: f64,
    pub base_peak_intensity: f64,
    pub total_ion_current: f64,
    pub parent_ion_mz: f64,
    pub parent_ion_intensity: f64,
    pub mz_list: Vec<f64>,
    pub intensity_list: Vec<f64>,
    pub lifecycle: Lifecycle,
    pub details: SpectrumDetails,
}

/// Format-specific extension fields, tagged by which parser produced the
/// spectrum.
#[derive(Debug, Clone)]
pub enum SpectrumDetails {
    None,
    MsMsText(MsMsTextDetails),
    MzXml(MzXmlDetails),
    MzData(MzDataDetails),
}

impl Default for SpectrumDetails {
    fn default() -> Self {
        SpectrumDetails::None
    }
}

/// Extension fields shared by the two line-oriented MS/MS text formats
/// (DTA, MGF).
#[derive(Debug, Clone, Default)]
pub struct MsMsTextDetails {
    pub parent_ion_line_text: String,
    pub parent_ion_mh: f64,
    pub parent_ion_charge_count: i32,
    pub parent_ion_charges: Vec<i32>,
    pub charge_is_2_and_3_plus: bool,
    pub spectrum_title: String,
    pub spectrum_title_with_comment_chars: String,
}

impl MsMsTextDetails {
    pub const MAX_CHARGES: usize = 5;

    pub fn push_charge(&mut self, charge: i32) {
        if self.parent_ion_charges.len() < Self::MAX_CHARGES {
            self.parent_ion_charges.push(charge);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanType {
    #[default]
    Full,
    Zoom,
    Sim,
    Srm,
    Crm,
    Q1,
    Q3,
    Mrm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeakPairOrder {
    #[default]
    MzIntensity,
    IntensityMz,
    MzOnly,
    IntensityOnly,
    SignalToNoise,
    Charge,
    MzRuler,
    Tof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionType {
    #[default]
    None,
    Zlib,
}

/// Extension fields for mzXML spectra.
#[derive(Debug, Clone, Default)]
pub struct MzXmlDetails {
    pub collision_energy: f64,
    pub scan_type: ScanType,
    pub filter_line: String,
    pub start_mz: f64,
    pub end_mz: f64,
    pub numeric_precision: i32,
    pub peaks_byte_order_network: bool,
    pub peaks_pair_order: PeakPairOrder,
    pub compression_type: CompressionType,
    pub compressed_length: i32,
    pub activation_method: String,
    pub isolation_window: f64,
    pub parent_ion_charge: i32,
    pub precursor_scan_number: i64,
}

/// Extension fields for mzData spectra.
#[derive(Debug, Clone, Default)]
pub struct MzDataDetails {
    pub collision_energy: f64,
    pub collision_energy_units: String,
    pub collision_method: String,
    pub scan_mode: String,
    pub parent_ion_charge: i32,
    pub parent_ion_spectrum_ms_level: i32,
    pub parent_ion_spectrum_id: i64,
}

impl Spectrum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finalize a `DataDefined` spectrum: compute total ion current, base
    /// peak, m/z range, and default `spectrum_id`, per spec.md §3.
    pub fn validate(&mut self) {
        debug_assert_eq!(self.mz_list.len(), self.intensity_list.len());

        self.total_ion_current = self.intensity_list.iter().sum();

        // A forward scan, not max_by, so the first occurrence wins ties
        // per spec.md's base-peak invariant.
        if !self.intensity_list.is_empty() {
            let mut best_idx = 0usize;
            let mut best_val = self.intensity_list[0];
            for (i, &v) in self.intensity_list.iter().enumerate().skip(1) {
                if v > best_val {
                    best_val = v;
                    best_idx = i;
                }
            }
            self.base_peak_intensity = best_val;
            self.base_peak_mz = self.mz_list[best_idx];

            let (mut lo, mut hi) = (self.mz_list[0], self.mz_list[0]);
            for &mz in &self.mz_list {
                if mz < lo {
                    lo = mz;
                }
                if mz > hi {
                    hi = mz;
                }
            }
            self.mz_range_start = lo;
            self.mz_range_end = hi;
        }

        if self.spectrum_id == 0 && self.scan_number != 0 {
            self.spectrum_id = self.scan_number;
        }

        self.lifecycle = Lifecycle::Validated;
    }

    pub fn peaks_count(&self) -> usize {
        self.mz_list.len()
    }

    pub fn push_peak(&mut self, mz: f64, intensity: f64) {
        self.mz_list.push(mz);
        self.intensity_list.push(intensity);
    }

    /// Apply the MS/MS text parent-ion invariant from spec.md §3: if the
    /// lowest recorded charge is <= 1, force charge 1 and m/z = MH;
    /// otherwise convolute.
    pub fn finalize_parent_ion_charge(&mut self) {
        let SpectrumDetails::MsMsText(details) = &mut self.details else {
            return;
        };
        let mh = details.parent_ion_mh;
        let first_charge = details.parent_ion_charges.first().copied().unwrap_or(0);
        if first_charge <= 1 {
            details.parent_ion_charges = vec![1];
            details.parent_ion_charge_count = 1;
            self.parent_ion_mz = mh;
        } else {
            self.parent_ion_mz = (mh + (first_charge - 1) as f64 * HMASS) / first_charge as f64;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_validate_computes_tic_and_base_peak() {
        let mut s = Spectrum::new();
        s.scan_number = 100;
        s.push_peak(200.1, 500.0);
        s.push_peak(300.2, 1000.0);
        s.validate();

        assert_eq!(s.total_ion_current, 1500.0);
        assert_eq!(s.base_peak_mz, 300.2);
        assert_eq!(s.base_peak_intensity, 1000.0);
        assert_eq!(s.mz_range_start, 200.1);
        assert_eq!(s.mz_range_end, 300.2);
        assert_eq!(s.spectrum_id, 100);
        assert_eq!(s.lifecycle, Lifecycle::Validated);
    }

    #[test]
    fn test_base_peak_first_occurrence_wins_on_tie() {
        let mut s = Spectrum::new();
        s.push_peak(100.0, 5.0);
        s.push_peak(200.0, 10.0);
        s.push_peak(300.0, 10.0);
        s.validate();
        assert_eq!(s.base_peak_mz, 200.0);
    }

    #[test]
    fn test_spectrum_id_not_overwritten_when_nonzero() {
        let mut s = Spectrum::new();
        s.scan_number = 5;
        s.spectrum_id = 99;
        s.validate();
        assert_eq!(s.spectrum_id, 99);
    }

    #[test]
    fn test_finalize_parent_ion_charge_one() {
        let mut s = Spectrum::new();
        let mut details = MsMsTextDetails::default();
        details.parent_ion_mh = 1000.0;
        details.parent_ion_charges = vec![1];
        s.details = SpectrumDetails::MsMsText(details);
        s.finalize_parent_ion_charge();
        assert_eq!(s.parent_ion_mz, 1000.0);
    }

    #[test]
    fn test_finalize_parent_ion_charge_two() {
        let mut s = Spectrum::new();
        let mut details = MsMsTextDetails::default();
        details.parent_ion_mh = 1523.47;
        details.parent_ion_charges = vec![2];
        s.details = SpectrumDetails::MsMsText(details);
        s.finalize_parent_ion_charge();
        assert!((s.parent_ion_mz - 762.238_64).abs() < 1e-5);
    }
}
