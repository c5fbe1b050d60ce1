use crate::residuals::{Residuals, TimeUnit};
use crate::session::Pulsar;
use crate::time::CalendarDate;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Quantities the residual viewer can put on either axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AxisKind {
    PreFit,
    PostFit,
    Mjd,
    Year,
    Serial,
    DayOfYear,
    Frequency,
    ToaError,
    RoundedMjd,
}

impl AxisKind {
    pub const ALL: [AxisKind; 9] = [
        AxisKind::PreFit,
        AxisKind::PostFit,
        AxisKind::Mjd,
        AxisKind::Year,
        AxisKind::Serial,
        AxisKind::DayOfYear,
        AxisKind::Frequency,
        AxisKind::ToaError,
        AxisKind::RoundedMjd,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AxisKind::PreFit => "pre-fit",
            AxisKind::PostFit => "post-fit",
            AxisKind::Mjd => "mjd",
            AxisKind::Year => "year",
            AxisKind::Serial => "serial",
            AxisKind::DayOfYear => "day of year",
            AxisKind::Frequency => "frequency",
            AxisKind::ToaError => "TOA error",
            AxisKind::RoundedMjd => "rounded MJD",
        }
    }
}

impl fmt::Display for AxisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AxisKind {
    type Err = String;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        AxisKind::ALL
            .into_iter()
            .find(|kind| kind.label().eq_ignore_ascii_case(label.trim()))
            .ok_or_else(|| format!("Unknown axis: {label}"))
    }
}

/// One axis worth of plot data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisData {
    pub values: Vec<f64>,
    pub errors: Option<Vec<f64>>,
    pub unit: String,
}

impl AxisData {
    fn new(values: Vec<f64>, errors: Option<Vec<f64>>, unit: &str) -> Self {
        Self {
            values,
            errors,
            unit: unit.to_string(),
        }
    }
}

fn residual_axis(resids: &Residuals, errors_us: Vec<f64>) -> AxisData {
    AxisData::new(
        resids.time_resids_in(TimeUnit::Microsecond),
        Some(errors_us),
        TimeUnit::Microsecond.label(),
    )
}

/// Calendar quantity per TOA, reading each MJD as a UTC date.
fn calendar(pulsar: &Pulsar, field: impl Fn(CalendarDate) -> f64) -> Vec<f64> {
    pulsar
        .all_toas()
        .mjds_f64()
        .into_iter()
        .map(|mjd| field(CalendarDate::from_mjd_utc(mjd)))
        .collect()
}

/// Values of `kind` for every TOA of the session.
///
/// Residual axes are in microseconds. Asking for post-fit residuals before a
/// fit returns the pre-fit residuals.
pub fn axis_data(pulsar: &Pulsar, kind: AxisKind) -> AxisData {
    let toas = pulsar.all_toas();
    match kind {
        AxisKind::PreFit => residual_axis(pulsar.prefit_resids(), toas.errors_us()),
        AxisKind::PostFit => match pulsar.postfit_resids() {
            Some(resids) => residual_axis(resids, toas.errors_us()),
            None => {
                warn!("Pulsar has not been fitted yet! Giving pre-fit residuals");
                residual_axis(pulsar.prefit_resids(), toas.errors_us())
            }
        },
        AxisKind::Mjd => AxisData::new(
            toas.mjds_f64(),
            Some(toas.errors_us()),
            "d",
        ),
        AxisKind::Year => AxisData::new(calendar(pulsar, |date| date.decimal_year), None, "yr"),
        AxisKind::Serial => AxisData::new((0..toas.len()).map(|i| i as f64).collect(), None, ""),
        AxisKind::DayOfYear => AxisData::new(calendar(pulsar, |date| date.day_of_year), None, "d"),
        AxisKind::Frequency => AxisData::new(toas.freqs_mhz(), None, "MHz"),
        AxisKind::ToaError => AxisData::new(toas.errors_us(), None, "us"),
        AxisKind::RoundedMjd => AxisData::new(
            toas.tdbld()
                .into_iter()
                .map(|mjd| (mjd + 0.5).floor().to_f64())
                .collect(),
            Some(toas.errors_us().iter().map(|e| e * 1e-6 / 86400.0).collect()),
            "d",
        ),
    }
}
