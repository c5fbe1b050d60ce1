use crate::config::ModelConfig;
use crate::error::TimingError;
use crate::jump::{Jump, PhaseJump};
use crate::params::ParamId;
use crate::precision::Dd;
use crate::spindown::Spindown;
use crate::time::Mjd;
use crate::toas::Toas;
use crate::traits::{DelayComponent, PhaseComponent, PhaseDerivative};
use hifitime::TimeScale;

/// A pulsar timing model: the spin-down phase, phase jumps, and any additional
/// phase and delay components.
///
/// Phase is the sum over phase components, each evaluated at the emission time
/// implied by the summed delay. Parameter access and derivatives are routed to
/// whichever component owns the parameter.
#[derive(Debug, Clone)]
pub struct TimingModel {
    pub name: String,
    pub spindown: Spindown,
    pub jumps: PhaseJump,
    pub phase_components: Vec<Box<dyn PhaseComponent>>,
    pub delay_components: Vec<Box<dyn DelayComponent>>,
}

impl TimingModel {
    pub fn new(name: impl Into<String>, spindown: Spindown) -> Self {
        Self {
            name: name.into(),
            spindown,
            jumps: PhaseJump::new(),
            phase_components: Vec::new(),
            delay_components: Vec::new(),
        }
    }

    /// Builds an (unvalidated) model from a serde document. Call [`TimingModel::setup`]
    /// before evaluating it.
    pub fn from_config(config: &ModelConfig) -> Result<Self, TimingError> {
        let mut spindown = Spindown::new();
        for term in &config.spin_terms {
            let id = ParamId::F(term.order);
            let value: Dd = term.value.parse().map_err(|_| TimingError::InvalidValue {
                param: id.to_string(),
                value: term.value.clone(),
            })?;
            spindown.set_spin_term(term.order, value);
            PhaseComponent::set_frozen(&mut spindown, id, !term.fit)?;
        }
        spindown.set_pepoch(parse_epoch(ParamId::Pepoch, config.pepoch.as_deref())?);
        spindown.set_tzrmjd(parse_epoch(ParamId::Tzrmjd, config.tzrmjd.as_deref())?);

        let mut model = Self::new(config.name.clone(), spindown);
        for jump in &config.jumps {
            let id = ParamId::Jump(jump.number);
            let value: Dd = jump.value.parse().map_err(|_| TimingError::InvalidValue {
                param: id.to_string(),
                value: jump.value.clone(),
            })?;
            if jump.number == 0 {
                return Err(TimingError::InvalidValue {
                    param: id.to_string(),
                    value: "jumps are numbered from 1".to_string(),
                });
            }
            model.jumps.insert(Jump {
                number: jump.number,
                value,
                frozen: !jump.fit,
                uncertainty: None,
                toas: jump.toas.iter().copied().collect(),
            });
        }
        Ok(model)
    }

    pub fn add_phase_component(&mut self, component: Box<dyn PhaseComponent>) {
        self.phase_components.push(component);
    }

    pub fn add_delay_component(&mut self, component: Box<dyn DelayComponent>) {
        self.delay_components.push(component);
    }

    /// Phase components: spin-down, then jumps, then any others.
    pub fn components(&self) -> impl Iterator<Item = &dyn PhaseComponent> + '_ {
        [&self.spindown as &dyn PhaseComponent, &self.jumps as &dyn PhaseComponent]
            .into_iter()
            .chain(self.phase_components.iter().map(|c| c.as_ref() as &dyn PhaseComponent))
    }

    pub fn has_jumps(&self) -> bool {
        !self.jumps.is_empty()
    }

    fn owner(&self, param: ParamId) -> Result<&dyn PhaseComponent, TimingError> {
        self.components()
            .find(|c| c.params().contains(&param))
            .ok_or_else(|| TimingError::UnknownParameter(param.to_string()))
    }

    fn owner_mut(&mut self, param: ParamId) -> Result<&mut (dyn PhaseComponent + 'static), TimingError> {
        if PhaseComponent::params(&self.spindown).contains(&param) {
            return Ok(&mut self.spindown);
        }
        if PhaseComponent::params(&self.jumps).contains(&param) {
            return Ok(&mut self.jumps);
        }
        match self
            .phase_components
            .iter_mut()
            .find(|c| c.params().contains(&param))
        {
            Some(component) => Ok(component.as_mut()),
            None => Err(TimingError::UnknownParameter(param.to_string())),
        }
    }

    pub fn setup(&mut self) -> Result<(), TimingError> {
        self.spindown.setup()?;
        self.jumps.setup()?;
        for component in &mut self.phase_components {
            component.setup()?;
        }
        Ok(())
    }

    /// Total delay in seconds per TOA; zeros when no delay component is present.
    pub fn delay(&self, toas: &Toas) -> Result<Vec<f64>, TimingError> {
        let mut total = vec![0.0; toas.len()];
        for component in &self.delay_components {
            let delay = component.delay(toas)?;
            TimingError::check_len("delay", toas.len(), delay.len())?;
            for (sum, d) in total.iter_mut().zip(delay) {
                *sum += d;
            }
        }
        Ok(total)
    }

    fn f0(&self) -> Result<Dd, TimingError> {
        self.spindown
            .f0()
            .ok_or_else(|| TimingError::missing(self.spindown.name(), "F0"))
    }

    pub fn phase(&self, toas: &Toas) -> Result<Vec<Dd>, TimingError> {
        let delay = self.delay(toas)?;
        let f0 = self.f0()?;
        let mut total = vec![Dd::ZERO; toas.len()];
        for component in self.components() {
            for (sum, phase) in total.iter_mut().zip(component.phase(toas, &delay, f0)?) {
                *sum += phase;
            }
        }
        Ok(total)
    }

    pub fn d_phase_d_param(&self, toas: &Toas, param: ParamId) -> Result<PhaseDerivative, TimingError> {
        let component = self
            .components()
            .find(|c| c.deriv_params().contains(&param))
            .ok_or_else(|| TimingError::UnknownParameter(param.to_string()))?;
        let delay = self.delay(toas)?;
        component.d_phase_d_param(toas, param, &delay, self.f0()?)
    }

    /// Instantaneous spin frequency in Hz at every TOA.
    pub fn spin_frequency(&self, toas: &Toas) -> Result<Vec<Dd>, TimingError> {
        let delay = self.delay(toas)?;
        self.spindown.spin_frequency(toas, &delay)
    }

    pub fn params(&self) -> Vec<ParamId> {
        self.components().flat_map(|c| c.params()).collect()
    }

    /// Unfrozen parameters with a registered phase derivative, in component order.
    pub fn free_params(&self) -> Vec<ParamId> {
        self.components()
            .flat_map(|c| {
                c.deriv_params()
                    .into_iter()
                    .filter(move |&p| c.is_frozen(p) == Some(false))
            })
            .collect()
    }

    pub fn param_value(&self, param: ParamId) -> Option<Dd> {
        self.owner(param).ok().and_then(|c| c.param_value(param))
    }

    pub fn set_param_value(&mut self, param: ParamId, value: Dd) -> Result<(), TimingError> {
        self.owner_mut(param)?.set_param_value(param, value)
    }

    pub fn is_frozen(&self, param: ParamId) -> Option<bool> {
        self.owner(param).ok().and_then(|c| c.is_frozen(param))
    }

    pub fn set_frozen(&mut self, param: ParamId, frozen: bool) -> Result<(), TimingError> {
        self.owner_mut(param)?.set_frozen(param, frozen)
    }

    pub fn uncertainty(&self, param: ParamId) -> Option<f64> {
        self.owner(param).ok().and_then(|c| c.uncertainty(param))
    }

    pub fn set_uncertainty(&mut self, param: ParamId, sigma: f64) -> Result<(), TimingError> {
        self.owner_mut(param)?.set_uncertainty(param, sigma)
    }
}

fn parse_epoch(param: ParamId, text: Option<&str>) -> Result<Option<Mjd>, TimingError> {
    text.map(|mjd| {
        Mjd::parse(mjd, TimeScale::TDB).map_err(|_| TimingError::InvalidValue {
            param: param.to_string(),
            value: mjd.to_string(),
        })
    })
    .transpose()
}
