use crate::error::TimingError;
use crate::model::TimingModel;
use crate::precision::Dd;
use crate::toas::Toas;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Display unit for time residuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    Second,
    Millisecond,
    Microsecond,
}

impl TimeUnit {
    /// Picks the unit for residuals spanning `[min, max]` seconds: seconds above
    /// 0.2 s, milliseconds above 0.2 ms, microseconds otherwise.
    pub fn for_span(min: f64, max: f64) -> Self {
        let span = max - min;
        if span > 0.2 {
            TimeUnit::Second
        } else if span > 0.2e-3 {
            TimeUnit::Millisecond
        } else {
            TimeUnit::Microsecond
        }
    }

    /// Multiplier taking seconds to this unit.
    pub fn per_second(self) -> f64 {
        match self {
            TimeUnit::Second => 1.0,
            TimeUnit::Millisecond => 1e3,
            TimeUnit::Microsecond => 1e6,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TimeUnit::Second => "s",
            TimeUnit::Millisecond => "ms",
            TimeUnit::Microsecond => "us",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How model phase is matched to whole pulses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackMode {
    /// Each TOA belongs to the pulse nearest its model phase.
    Nearest,
    /// Each TOA belongs to its assigned pulse number plus any phase wraps.
    PulseNumbers,
}

impl TrackMode {
    /// Pulse numbers are used once every TOA carries one.
    pub fn for_toas(toas: &Toas) -> Self {
        if toas.has_pulse_numbers() {
            TrackMode::PulseNumbers
        } else {
            TrackMode::Nearest
        }
    }
}

/// Timing residuals of a set of TOAs against a model.
///
/// In [`TrackMode::Nearest`] phase residuals are the distance to the nearest
/// integer pulse, so they lie in `[-0.5, 0.5]` cycles before mean removal. With
/// pulse numbers they may span any number of turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Residuals {
    track_mode: TrackMode,
    phase_resids: Vec<f64>,
    time_resids: Vec<f64>,
    errors_s: Vec<f64>,
    subtract_mean: bool,
}

impl Residuals {
    pub fn compute(model: &TimingModel, toas: &Toas, subtract_mean: bool) -> Result<Self, TimingError> {
        if toas.is_empty() {
            return Err(TimingError::EmptyToas);
        }
        let phase = model.phase(toas)?;
        let track_mode = TrackMode::for_toas(toas);
        let mut phase_resids: Vec<f64> = phase
            .iter()
            .zip(toas.iter())
            .map(|(&cycles, toa)| {
                let wrapped = cycles + Dd::from_i64(toa.delta_pulse_number);
                match (track_mode, toa.pulse_number) {
                    (TrackMode::PulseNumbers, Some(pulse)) => (wrapped - pulse).to_f64(),
                    _ => wrapped.frac_to_nearest().to_f64(),
                }
            })
            .collect();
        let errors_s: Vec<f64> = toas.errors_us().iter().map(|e| e * 1e-6).collect();

        if subtract_mean {
            let mean = weighted_mean(&phase_resids, &errors_s);
            for r in &mut phase_resids {
                *r -= mean;
            }
        }

        let freq = model.spin_frequency(toas)?;
        let time_resids = phase_resids
            .iter()
            .zip(&freq)
            .map(|(r, f)| r / f.to_f64())
            .collect();

        Ok(Self {
            track_mode,
            phase_resids,
            time_resids,
            errors_s,
            subtract_mean,
        })
    }

    pub fn len(&self) -> usize {
        self.phase_resids.len()
    }

    pub fn track_mode(&self) -> TrackMode {
        self.track_mode
    }

    pub fn is_empty(&self) -> bool {
        self.phase_resids.is_empty()
    }

    /// Residuals in cycles.
    pub fn phase_resids(&self) -> &[f64] {
        &self.phase_resids
    }

    /// Residuals in seconds.
    pub fn time_resids(&self) -> &[f64] {
        &self.time_resids
    }

    pub fn time_resids_in(&self, unit: TimeUnit) -> Vec<f64> {
        let scale = unit.per_second();
        self.time_resids.iter().map(|r| r * scale).collect()
    }

    pub fn errors_s(&self) -> &[f64] {
        &self.errors_s
    }

    /// Display unit suited to the spread of the time residuals.
    pub fn display_unit(&self) -> TimeUnit {
        let (min, max) = self
            .time_resids
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| (lo.min(r), hi.max(r)));
        TimeUnit::for_span(min, max)
    }

    pub fn chi2(&self) -> f64 {
        self.time_resids
            .iter()
            .zip(&self.errors_s)
            .map(|(r, e)| (r / e).powi(2))
            .sum()
    }

    /// Degrees of freedom before any fitted parameters: one is spent on the mean
    /// when it was removed.
    pub fn dof(&self) -> usize {
        self.len().saturating_sub(usize::from(self.subtract_mean))
    }

    pub fn reduced_chi2(&self) -> f64 {
        self.chi2() / self.dof().max(1) as f64
    }

    /// Weighted RMS of the time residuals in seconds.
    pub fn rms_weighted(&self) -> f64 {
        let weights = weights(&self.errors_s);
        let total: f64 = weights.iter().sum();
        let sum_sq: f64 = self
            .time_resids
            .iter()
            .zip(&weights)
            .map(|(r, w)| w * r * r)
            .sum();
        (sum_sq / total).sqrt()
    }
}

/// `1/sigma^2`, or uniform weights when any uncertainty is non-positive.
fn weights(errors: &[f64]) -> Vec<f64> {
    if errors.iter().any(|&e| e <= 0.0) {
        vec![1.0; errors.len()]
    } else {
        errors.iter().map(|e| 1.0 / (e * e)).collect()
    }
}

fn weighted_mean(values: &[f64], errors: &[f64]) -> f64 {
    let weights = weights(errors);
    let total: f64 = weights.iter().sum();
    values.iter().zip(&weights).map(|(v, w)| v * w).sum::<f64>() / total
}
