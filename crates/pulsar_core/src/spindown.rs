//! Polynomial spin-down phase model.
//!
//! Phase is the Taylor series of the rotation rate about `PEPOCH`,
//!
//! ```text
//! phase(t) = F0 dt + F1 dt^2 / 2 + ... + FN dt^(N+1) / (N+1)!,   dt = t - PEPOCH
//! ```
//!
//! referred to zero at `TZRMJD`. Every time difference and every Horner step runs
//! in double-double arithmetic: a decade of timing at 100 Hz accumulates ~3e10
//! cycles, and plain `f64` would leave only ~1e-6 cycles of resolution.

use crate::error::TimingError;
use crate::params::{MjdParam, ParamId, SpinTerms, Unit};
use crate::precision::{taylor_horner, Dd};
use crate::time::Mjd;
use crate::toas::Toas;
use crate::traits::{PhaseComponent, PhaseDerivative};
use hifitime::TimeScale;
use log::{debug, info};
use std::cell::OnceCell;
use std::collections::BTreeMap;

const MODEL_NAME: &str = "Spindown";

/// Derivative dispatch entry: the position of a spin term in the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SpinDerivative {
    order: u32,
}

#[derive(Debug, Clone, PartialEq)]
struct SpinLayout {
    num_spin_terms: usize,
    derivatives: BTreeMap<ParamId, SpinDerivative>,
}

/// Spin-down timing model for an isolated pulsar.
///
/// The phase-zero reference time is resolved once: either from an explicit
/// `TZRMJD` or, on first evaluation, from the first TOA minus its delay. It then
/// stays fixed until [`Spindown::set_tzrmjd`] or [`Spindown::reset_reference_time`]
/// is called. The cache uses a `OnceCell`, so a `Spindown` cannot be shared
/// across threads; clone one model per thread instead.
#[derive(Debug, Clone)]
pub struct Spindown {
    terms: SpinTerms,
    pepoch: MjdParam,
    tzrmjd: MjdParam,
    reference: OnceCell<Mjd>,
    layout: Option<SpinLayout>,
}

impl Default for Spindown {
    fn default() -> Self {
        Self::new()
    }
}

impl Spindown {
    pub fn new() -> Self {
        Self {
            terms: SpinTerms::new(),
            pepoch: MjdParam::new(ParamId::Pepoch, TimeScale::TDB),
            tzrmjd: MjdParam::new(ParamId::Tzrmjd, TimeScale::TDB),
            reference: OnceCell::new(),
            layout: None,
        }
    }

    pub fn spin_terms(&self) -> &SpinTerms {
        &self.terms
    }

    /// Sets `F{order}`. Adding a new order invalidates `setup`.
    pub fn set_spin_term(&mut self, order: u32, value: Dd) {
        if self.terms.insert(order, value) {
            self.layout = None;
        }
    }

    pub fn remove_spin_term(&mut self, order: u32) -> Option<Dd> {
        let removed = self.terms.remove(order).map(|term| term.value);
        if removed.is_some() {
            self.layout = None;
        }
        removed
    }

    pub fn f0(&self) -> Option<Dd> {
        self.terms.get(0).map(|term| term.value)
    }

    pub fn pepoch(&self) -> Option<Mjd> {
        self.pepoch.value
    }

    pub fn set_pepoch(&mut self, epoch: Option<Mjd>) {
        self.pepoch.value = epoch;
    }

    /// The phase-zero reference in use: the explicit `TZRMJD`, or the default
    /// resolved by the first evaluation.
    pub fn tzrmjd(&self) -> Option<Mjd> {
        self.tzrmjd.value.or_else(|| self.reference.get().copied())
    }

    /// Sets `TZRMJD` explicitly, replacing any cached reference time.
    pub fn set_tzrmjd(&mut self, epoch: Option<Mjd>) {
        self.tzrmjd.value = epoch;
        self.reset_reference_time();
    }

    /// Drops a defaulted reference time so the next evaluation resolves it again.
    /// An explicit `TZRMJD` is kept.
    pub fn reset_reference_time(&mut self) {
        self.reference = self.tzrmjd.value.map(OnceCell::from).unwrap_or_default();
    }

    /// Number of terms `F0..FN` recorded by the last successful setup.
    pub fn num_spin_terms(&self) -> Option<usize> {
        self.layout.as_ref().map(|layout| layout.num_spin_terms)
    }

    /// `[F0, F1, ..., FN]`.
    pub fn get_spin_terms(&self) -> Vec<Dd> {
        self.terms.values()
    }

    pub fn setup(&mut self) -> Result<(), TimingError> {
        if self.terms.get(0).is_none() {
            return Err(TimingError::missing(MODEL_NAME, "F0"));
        }
        if let Some(order) = self.terms.first_gap() {
            return Err(TimingError::missing(MODEL_NAME, ParamId::F(order).to_string()));
        }
        if let Some(term) = self.terms.iter().find(|term| !term.value.is_finite()) {
            return Err(TimingError::InvalidValue {
                param: term.id().to_string(),
                value: term.value.to_string(),
            });
        }
        self.check_pepoch()?;
        self.pepoch.check_scale()?;
        self.tzrmjd.check_scale()?;

        let derivatives = self
            .terms
            .iter()
            .map(|term| (term.id(), SpinDerivative { order: term.order }))
            .collect();
        let num_spin_terms = self.terms.len();
        debug!("{MODEL_NAME} setup: {num_spin_terms} spin terms");
        self.layout = Some(SpinLayout {
            num_spin_terms,
            derivatives,
        });
        Ok(())
    }

    fn check_pepoch(&self) -> Result<(), TimingError> {
        if self.terms.any_derivative_nonzero() && self.pepoch.value.is_none() {
            return Err(TimingError::missing_because(
                MODEL_NAME,
                "PEPOCH",
                "PEPOCH is required if F1 or higher are set",
            ));
        }
        Ok(())
    }

    fn layout(&self) -> Result<&SpinLayout, TimingError> {
        self.layout.as_ref().ok_or_else(|| TimingError::NotSetUp {
            model: MODEL_NAME.to_string(),
        })
    }

    fn reference_time(&self, toas: &Toas, delay: &[f64]) -> Result<Mjd, TimingError> {
        if let Some(epoch) = self.reference.get() {
            return Ok(*epoch);
        }
        let first = toas.get(0).ok_or(TimingError::EmptyToas)?;
        let epoch = first.tdb.add_seconds(Dd::from_f64(-delay[0]));
        info!("{MODEL_NAME}: TZRMJD not set, using first TOA {epoch}");
        Ok(*self.reference.get_or_init(|| epoch))
    }

    /// Times since `PEPOCH` in seconds for every TOA, plus the offset of `TZRMJD`
    /// from `PEPOCH`, i.e. `(dt_tzrmjd - dt_pepoch, -dt_pepoch)`.
    fn time_offsets(&self, toas: &Toas, delay: &[f64]) -> Result<(Vec<Dd>, Dd), TimingError> {
        TimingError::check_len("delay", toas.len(), delay.len())?;
        let tzr = self.reference_time(toas, delay)?;
        let dt_pepoch = match self.pepoch.value {
            Some(pepoch) => pepoch.seconds_since(&tzr),
            None => Dd::ZERO,
        };
        let offsets = toas
            .iter()
            .zip(delay)
            .map(|(toa, &d)| toa.tdb.seconds_since(&tzr) - d - dt_pepoch)
            .collect();
        Ok((offsets, -dt_pepoch))
    }

    fn evaluate(coeffs: &[Dd], offsets: &[Dd], origin: Dd) -> Vec<Dd> {
        let at_origin = taylor_horner(origin, coeffs);
        offsets
            .iter()
            .map(|&dt| taylor_horner(dt, coeffs) - at_origin)
            .collect()
    }

    /// Pulse phase in cycles for every TOA, zero at `TZRMJD`.
    pub fn phase(&self, toas: &Toas, delay: &[f64]) -> Result<Vec<Dd>, TimingError> {
        self.layout()?;
        self.check_pepoch()?;
        // Leading zero is the constant phase term.
        let coeffs: Vec<Dd> = std::iter::once(Dd::ZERO)
            .chain(self.terms.values())
            .collect();
        let (offsets, origin) = self.time_offsets(toas, delay)?;
        Ok(Self::evaluate(&coeffs, &offsets, origin))
    }

    /// `d(phase)/d(F{k})` for every TOA, in `s^(k+1)`.
    pub fn d_phase_d_param(
        &self,
        toas: &Toas,
        param: ParamId,
        delay: &[f64],
    ) -> Result<PhaseDerivative, TimingError> {
        let layout = self.layout()?;
        let entry = layout
            .derivatives
            .get(&param)
            .ok_or_else(|| TimingError::UnknownParameter(param.to_string()))?;
        let mut coeffs = vec![Dd::ZERO; layout.num_spin_terms + 1];
        coeffs[entry.order as usize + 1] = Dd::ONE;
        let (offsets, origin) = self.time_offsets(toas, delay)?;
        Ok(PhaseDerivative {
            param,
            values: Self::evaluate(&coeffs, &offsets, origin),
            unit: Unit::spin_term(entry.order).inverse(),
        })
    }

    /// Instantaneous spin frequency `F0 + F1 dt + F2 dt^2 / 2 + ...` in Hz at every TOA.
    pub fn spin_frequency(&self, toas: &Toas, delay: &[f64]) -> Result<Vec<Dd>, TimingError> {
        self.layout()?;
        let coeffs = self.terms.values();
        let (offsets, _) = self.time_offsets(toas, delay)?;
        Ok(offsets
            .iter()
            .map(|&dt| taylor_horner(dt, &coeffs))
            .collect())
    }

    fn spin_order(&self, param: ParamId) -> Result<u32, TimingError> {
        match param {
            ParamId::F(order) if self.terms.get(order).is_some() => Ok(order),
            _ => Err(TimingError::UnknownParameter(param.to_string())),
        }
    }
}

impl PhaseComponent for Spindown {
    fn name(&self) -> &'static str {
        MODEL_NAME
    }

    fn setup(&mut self) -> Result<(), TimingError> {
        Spindown::setup(self)
    }

    fn phase(&self, toas: &Toas, delay: &[f64], _f0: Dd) -> Result<Vec<Dd>, TimingError> {
        Spindown::phase(self, toas, delay)
    }

    fn deriv_params(&self) -> Vec<ParamId> {
        self.layout
            .as_ref()
            .map(|layout| layout.derivatives.keys().copied().collect())
            .unwrap_or_default()
    }

    fn d_phase_d_param(
        &self,
        toas: &Toas,
        param: ParamId,
        delay: &[f64],
        _f0: Dd,
    ) -> Result<PhaseDerivative, TimingError> {
        Spindown::d_phase_d_param(self, toas, param, delay)
    }

    fn params(&self) -> Vec<ParamId> {
        self.terms
            .iter()
            .map(|term| term.id())
            .chain([ParamId::Pepoch, ParamId::Tzrmjd])
            .collect()
    }

    fn param_value(&self, param: ParamId) -> Option<Dd> {
        match param {
            ParamId::F(order) => self.terms.get(order).map(|term| term.value),
            ParamId::Pepoch => self.pepoch.value.map(|epoch| epoch.days()),
            ParamId::Tzrmjd => self.tzrmjd().map(|epoch| epoch.days()),
            ParamId::Jump(_) => None,
        }
    }

    /// Updates an existing parameter. Spin terms keep the validated layout, so a
    /// fitter may change values freely; a derivative turning nonzero still needs PEPOCH.
    fn set_param_value(&mut self, param: ParamId, value: Dd) -> Result<(), TimingError> {
        match param {
            ParamId::F(_) => {
                let order = self.spin_order(param)?;
                if !value.is_finite() {
                    return Err(TimingError::InvalidValue {
                        param: param.to_string(),
                        value: value.to_string(),
                    });
                }
                if order > 0 && value != Dd::ZERO && self.pepoch.value.is_none() {
                    return Err(TimingError::missing_because(
                        MODEL_NAME,
                        "PEPOCH",
                        "PEPOCH is required if F1 or higher are set",
                    ));
                }
                self.terms.insert(order, value);
            }
            ParamId::Pepoch => self.set_pepoch(Some(Mjd::tdb(value))),
            ParamId::Tzrmjd => self.set_tzrmjd(Some(Mjd::tdb(value))),
            ParamId::Jump(_) => return Err(TimingError::UnknownParameter(param.to_string())),
        }
        Ok(())
    }

    fn is_frozen(&self, param: ParamId) -> Option<bool> {
        match param {
            ParamId::F(order) => self.terms.get(order).map(|term| term.frozen),
            ParamId::Pepoch | ParamId::Tzrmjd => Some(true),
            ParamId::Jump(_) => None,
        }
    }

    fn set_frozen(&mut self, param: ParamId, frozen: bool) -> Result<(), TimingError> {
        match param {
            ParamId::F(order) => {
                let term = self
                    .terms
                    .get_mut(order)
                    .ok_or_else(|| TimingError::UnknownParameter(param.to_string()))?;
                term.frozen = frozen;
                Ok(())
            }
            ParamId::Pepoch | ParamId::Tzrmjd if frozen => Ok(()),
            ParamId::Pepoch | ParamId::Tzrmjd => Err(TimingError::InvalidValue {
                param: param.to_string(),
                value: "epochs cannot be fitted".to_string(),
            }),
            ParamId::Jump(_) => Err(TimingError::UnknownParameter(param.to_string())),
        }
    }

    fn uncertainty(&self, param: ParamId) -> Option<f64> {
        match param {
            ParamId::F(order) => self.terms.get(order).and_then(|term| term.uncertainty),
            ParamId::Pepoch | ParamId::Tzrmjd | ParamId::Jump(_) => None,
        }
    }

    fn set_uncertainty(&mut self, param: ParamId, sigma: f64) -> Result<(), TimingError> {
        let order = self.spin_order(param)?;
        if let Some(term) = self.terms.get_mut(order) {
            term.uncertainty = Some(sigma);
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn PhaseComponent> {
        Box::new(self.clone())
    }
}
