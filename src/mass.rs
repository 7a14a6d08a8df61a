//! Parent-ion mass convolution between protonated mass (`MH`) and `m/z`.

/// Mass of a proton, as used by the original DTA/MGF convention.
pub const HMASS: f64 = 1.00727649;

/// Convert a protonated mass `mh` at `from_charge` into the equivalent
/// value at `to_charge`.
///
/// With `from_charge == 1`, this computes `m/z` at `to_charge` from `MH`.
/// With `to_charge == 1`, this computes `MH` from `m/z` at `from_charge`.
#[inline]
pub fn convolute(mh: f64, from_charge: i32, to_charge: i32) -> f64 {
    let base = mh * from_charge as f64 - (from_charge - 1) as f64 * HMASS;
    (base + (to_charge - 1) as f64 * HMASS) / to_charge as f64
}

/// `m/z = (MH + (z - 1) * HMASS) / z`, the forward convolution used when
/// emitting a parent ion m/z from a protonated mass and charge.
#[inline]
pub fn mh_to_mz(mh: f64, charge: i32) -> f64 {
    if charge <= 1 {
        mh
    } else {
        (mh + (charge - 1) as f64 * HMASS) / charge as f64
    }
}

/// The inverse of [`mh_to_mz`]: reconstruct `MH` given an observed `m/z`
/// and charge, as MGF export does.
#[inline]
pub fn mz_to_mh(mz: f64, charge: i32) -> f64 {
    if charge <= 1 {
        mz
    } else {
        mz * charge as f64 - (charge - 1) as f64 * HMASS
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mass_round_trip() {
        for z in 1..=8 {
            for mh in [500.0, 1000.0, 1523.47, 2500.333] {
                let mz = mh_to_mz(mh, z);
                let back = mz_to_mh(mz, z);
                assert!(
                    (back - mh).abs() < 1e-6,
                    "round trip failed for mh={mh}, z={z}: back={back}"
                );
            }
        }
    }

    #[test]
    fn test_convolute_identity() {
        for z in 1..=8 {
            for mh in [500.0, 1523.47] {
                let mz = convolute(mh, 1, z);
                let back = convolute(mz, z, 1);
                assert!((back - mh).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_known_values() {
        // S1 scenario from the spec.
        let mz = mh_to_mz(1523.47, 2);
        assert!((mz - 762.238_64).abs() < 1e-5, "got {mz}");

        // S3 scenario from the spec.
        let mh = mz_to_mh(400.0, 2);
        assert!((mh - 798.992_72).abs() < 1e-5, "got {mh}");
    }

    #[test]
    fn test_charge_one_is_identity() {
        assert_eq!(mh_to_mz(1000.0, 1), 1000.0);
        assert_eq!(mz_to_mh(1000.0, 1), 1000.0);
        assert_eq!(mh_to_mz(1000.0, 0), 1000.0);
    }
}
