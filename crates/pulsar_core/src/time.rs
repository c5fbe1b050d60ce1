use crate::precision::{Dd, ParseDdError};
use hifitime::{Epoch, TimeScale, Unit as TimeUnit};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const SECS_PER_DAY: f64 = 86400.0;

/// Serde form of a [`TimeScale`]: its abbreviation, read back case-insensitively.
mod scale_serde {
    use hifitime::TimeScale;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(scale: &TimeScale, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(scale)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TimeScale, D::Error> {
        let name = String::deserialize(deserializer)?;
        match name.to_ascii_uppercase().as_str() {
            "TDB" => Ok(TimeScale::TDB),
            "TT" => Ok(TimeScale::TT),
            "TAI" => Ok(TimeScale::TAI),
            "UTC" => Ok(TimeScale::UTC),
            _ => Err(D::Error::custom(format!("unsupported time scale {name}"))),
        }
    }
}

/// Modified Julian Date held in double-double days, tagged with its time scale.
///
/// At MJD ~5e4 the representable step is below 1e-27 days, so differences of
/// two `Mjd`s keep far more than nanosecond resolution. The scale tag is
/// hifitime's; the days stay double-double because an `Epoch` rounds to
/// nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mjd {
    days: Dd,
    #[serde(with = "scale_serde")]
    scale: TimeScale,
}

impl Mjd {
    pub fn new(days: Dd, scale: TimeScale) -> Self {
        Self { days, scale }
    }

    pub fn tdb(days: Dd) -> Self {
        Self::new(days, TimeScale::TDB)
    }

    /// Parses an MJD decimal string such as `"55000.000000123456789"` at full precision.
    pub fn parse(text: &str, scale: TimeScale) -> Result<Self, ParseDdError> {
        Ok(Self::new(text.parse()?, scale))
    }

    pub fn days(&self) -> Dd {
        self.days
    }

    pub fn scale(&self) -> TimeScale {
        self.scale
    }

    /// `self - other` in days. Both epochs are expected on the same scale.
    pub fn days_since(&self, other: &Mjd) -> Dd {
        debug_assert_eq!(self.scale, other.scale, "epoch time scales differ");
        self.days - other.days
    }

    pub fn seconds_since(&self, other: &Mjd) -> Dd {
        self.days_since(other) * SECS_PER_DAY
    }

    pub fn add_seconds(&self, seconds: Dd) -> Mjd {
        Self::new(self.days + seconds / SECS_PER_DAY, self.scale)
    }

    /// Approximate value for plotting and display.
    pub fn to_f64(&self) -> f64 {
        self.days.to_f64()
    }
}

impl fmt::Display for Mjd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let decimals = f.precision().unwrap_or(15);
        write!(f, "{:.*} ({})", decimals, self.days, self.scale)
    }
}

/// Calendar position of an MJD read as a UTC date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalendarDate {
    pub year: i32,
    /// Days since January 1st 00:00, so January 1st noon is 0.5.
    pub day_of_year: f64,
    pub decimal_year: f64,
}

impl CalendarDate {
    pub fn from_mjd_utc(mjd: f64) -> Self {
        let epoch = Epoch::from_mjd_utc(mjd);
        let year = epoch.to_gregorian_utc().0;
        let start = Epoch::from_gregorian_utc_at_midnight(year, 1, 1);
        let next = Epoch::from_gregorian_utc_at_midnight(year + 1, 1, 1);
        let day_of_year = (epoch - start).to_unit(TimeUnit::Day);
        let year_length = (next - start).to_unit(TimeUnit::Day);
        Self {
            year,
            day_of_year,
            decimal_year: f64::from(year) + day_of_year / year_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn parse_keeps_nanosecond_offsets() {
        let a = Mjd::parse("55000.0", TimeScale::TDB).unwrap();
        // One nanosecond after a, expressed in days.
        let b = Mjd::parse("55000.0000000000000115740740740740741", TimeScale::TDB).unwrap();
        let dt = b.seconds_since(&a).to_f64();
        assert_relative_eq!(dt, 1e-9, max_relative = 1e-9);
    }

    #[test]
    fn add_seconds_inverts_seconds_since() {
        let start = Mjd::parse("53005.123456789", TimeScale::TDB).unwrap();
        let later = start.add_seconds(Dd::from_f64(86400.0 * 3.5));
        assert_relative_eq!(later.days_since(&start).to_f64(), 3.5, max_relative = 1e-25);
        let back = later.add_seconds(Dd::from_f64(-86400.0 * 3.5));
        assert!(back.days_since(&start).abs().to_f64() < 1e-25);
    }

    #[test]
    fn display_includes_scale() {
        let epoch = Mjd::tdb(Dd::from_f64(55000.5));
        assert_eq!(format!("{epoch:.3}"), "55000.500 (TDB)");
    }

    #[test]
    fn scale_serializes_by_abbreviation() {
        let epoch = Mjd::new(Dd::from_f64(55000.5), TimeScale::UTC);
        let json = serde_json::to_value(epoch).unwrap();
        assert_eq!(json["scale"], "UTC");
        let back: Mjd = serde_json::from_value(json).unwrap();
        assert_eq!(back, epoch);

        let mut lower = serde_json::to_value(Mjd::tdb(Dd::ONE)).unwrap();
        lower["scale"] = "tdb".into();
        assert_eq!(serde_json::from_value::<Mjd>(lower).unwrap().scale(), TimeScale::TDB);

        let mut unknown = serde_json::to_value(Mjd::tdb(Dd::ONE)).unwrap();
        unknown["scale"] = "xyz".into();
        assert!(serde_json::from_value::<Mjd>(unknown).is_err());
    }

    #[test]
    fn calendar_date_of_mid_year_mjd() {
        // MJD 55197 is 2010-01-01, so 55197.5 is noon on the first day.
        let noon = CalendarDate::from_mjd_utc(55197.5);
        assert_eq!(noon.year, 2010);
        assert_abs_diff_eq!(noon.day_of_year, 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(noon.decimal_year, 2010.0 + 0.5 / 365.0, epsilon = 1e-8);

        // 2012 is a leap year: MJD 55927 is 2012-01-01, +200.25 days. The
        // June 2012 leap second shifts the elapsed time by ~1e-5 days.
        let leap = CalendarDate::from_mjd_utc(55927.0 + 200.25);
        assert_eq!(leap.year, 2012);
        assert_abs_diff_eq!(leap.day_of_year, 200.25, epsilon = 1e-4);
        assert_abs_diff_eq!(leap.decimal_year, 2012.0 + 200.25 / 366.0, epsilon = 1e-6);
    }
}
