//! Coordinate math for the jog handler: sidereal time and the
//! equatorial/horizontal transform pair.
//!
//! The two transforms are exact inverses of each other (rotation about the
//! east axis), so a jog offset applied in horizontal coordinates converts
//! back to equatorial without drift.

use std::f64::consts::{FRAC_PI_2, TAU};

/// Julian date for a unix-epoch millisecond timestamp.
pub fn julian_date(unix_ms: i64) -> f64 {
    unix_ms as f64 / 86_400_000.0 + 2_440_587.5
}

/// Local mean sidereal time in radians for an observer longitude (radians,
/// east positive).
pub fn local_sidereal_time(jd: f64, longitude: f64) -> f64 {
    let gmst_deg = 280.460_618_37 + 360.985_647_366_29 * (jd - 2_451_545.0);
    (gmst_deg.to_radians() + longitude).rem_euclid(TAU)
}

/// Normalize a right ascension to `[0, 2π)`.
pub fn normalize_ra(ra: f64) -> f64 {
    ra.rem_euclid(TAU)
}

/// Clamp a declination to `[-π/2, π/2]`.
pub fn clamp_dec(dec: f64) -> f64 {
    dec.clamp(-FRAC_PI_2, FRAC_PI_2)
}

/// (ra, dec) -> (alt, az).  Azimuth is measured from south, westward
/// positive; all angles in radians.
pub fn equatorial_to_horizontal(ra: f64, dec: f64, latitude: f64, lst: f64) -> (f64, f64) {
    let hour_angle = lst - ra;
    let xe = dec.cos() * hour_angle.cos();
    let ye = dec.cos() * hour_angle.sin();
    let ze = dec.sin();

    let xh = xe * latitude.sin() - ze * latitude.cos();
    let yh = ye;
    let zh = xe * latitude.cos() + ze * latitude.sin();

    (zh.asin(), yh.atan2(xh))
}

/// (alt, az) -> (ra, dec), inverse of [`equatorial_to_horizontal`].
pub fn horizontal_to_equatorial(alt: f64, az: f64, latitude: f64, lst: f64) -> (f64, f64) {
    let xh = alt.cos() * az.cos();
    let yh = alt.cos() * az.sin();
    let zh = alt.sin();

    let xe = xh * latitude.sin() + zh * latitude.cos();
    let ye = yh;
    let ze = -xh * latitude.cos() + zh * latitude.sin();

    let hour_angle = ye.atan2(xe);
    (normalize_ra(lst - hour_angle), ze.asin())
}

/// Map a signed jog rate index to arcseconds per second:
/// negative rates are `-(1 << |r|)`, non-negative are `(1 << r) - 1`.
pub fn jog_rate_arcsec(rate: i64) -> i64 {
    let rate = rate.clamp(-30, 30);
    if rate < 0 {
        -(1_i64 << (-rate))
    } else {
        (1_i64 << rate) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LATITUDE: f64 = 0.5907141501744784;
    const LONGITUDE: f64 = -2.065392832281757;

    #[test]
    fn transform_pair_round_trips() {
        let jd = julian_date(1_746_484_225_000);
        let lst = local_sidereal_time(jd, LONGITUDE);

        for &(ra, dec) in &[
            (3.83883, 0.973655),
            (0.1, -0.5),
            (6.2, 0.0),
            (1.0, 1.2),
        ] {
            let (alt, az) = equatorial_to_horizontal(ra, dec, LATITUDE, lst);
            let (ra2, dec2) = horizontal_to_equatorial(alt, az, LATITUDE, lst);
            assert!((normalize_ra(ra) - ra2).abs() < 1e-9, "ra {ra} -> {ra2}");
            assert!((dec - dec2).abs() < 1e-9, "dec {dec} -> {dec2}");
        }
    }

    #[test]
    fn pole_pointing_is_stable() {
        let jd = julian_date(1_746_484_225_000);
        let lst = local_sidereal_time(jd, LONGITUDE);
        let (alt, _) = equatorial_to_horizontal(0.0, FRAC_PI_2, LATITUDE, lst);
        // The celestial pole sits at the observer's latitude.
        assert!((alt - LATITUDE).abs() < 1e-9);
    }

    #[test]
    fn sidereal_time_advances_faster_than_solar() {
        let t0 = 1_746_484_225_000;
        let lst0 = local_sidereal_time(julian_date(t0), 0.0);
        let lst1 = local_sidereal_time(julian_date(t0 + 86_400_000), 0.0);
        // One solar day advances sidereal time by ~3m56s ≈ 0.01720 rad.
        let delta = (lst1 - lst0).rem_euclid(TAU);
        assert!((delta - 0.01720).abs() < 1e-3, "delta {delta}");
    }

    #[test]
    fn jog_rates_match_the_device_mapping() {
        assert_eq!(jog_rate_arcsec(0), 0);
        assert_eq!(jog_rate_arcsec(1), 1);
        assert_eq!(jog_rate_arcsec(4), 15);
        assert_eq!(jog_rate_arcsec(9), 511);
        assert_eq!(jog_rate_arcsec(-1), -2);
        assert_eq!(jog_rate_arcsec(-4), -16);
        assert_eq!(jog_rate_arcsec(-9), -512);
    }

    #[test]
    fn normalization_bounds_hold() {
        assert!((normalize_ra(-0.1) - (TAU - 0.1)).abs() < 1e-12);
        assert!((normalize_ra(TAU + 0.25) - 0.25).abs() < 1e-12);
        assert_eq!(clamp_dec(2.0), FRAC_PI_2);
        assert_eq!(clamp_dec(-2.0), -FRAC_PI_2);
    }
}
