use crate::error::TimingError;
use crate::params::{ParamId, Unit};
use crate::precision::Dd;
use crate::toas::Toas;
use std::fmt::Debug;

/// Partial derivative of pulse phase with respect to one parameter, per TOA.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseDerivative {
    pub param: ParamId,
    pub values: Vec<Dd>,
    /// Inverse of the parameter's unit (phase is dimensionless).
    pub unit: Unit,
}

/// A model component contributing pulse phase.
///
/// Components register the parameters they can differentiate during `setup`;
/// a fitter asks for `d_phase_d_param` generically without knowing the component.
pub trait PhaseComponent: Debug {
    fn name(&self) -> &'static str;

    /// Validates parameters and (re)builds derivative dispatch.
    fn setup(&mut self) -> Result<(), TimingError>;

    /// Phase in cycles for every TOA. `delay` is in seconds, one value per TOA;
    /// `f0` is the model's spin frequency in Hz, for components that convert
    /// time offsets to phase.
    fn phase(&self, toas: &Toas, delay: &[f64], f0: Dd) -> Result<Vec<Dd>, TimingError>;

    /// Parameters with a registered phase derivative.
    fn deriv_params(&self) -> Vec<ParamId>;

    fn d_phase_d_param(
        &self,
        toas: &Toas,
        param: ParamId,
        delay: &[f64],
        f0: Dd,
    ) -> Result<PhaseDerivative, TimingError>;

    /// Every parameter owned by the component.
    fn params(&self) -> Vec<ParamId>;

    fn param_value(&self, param: ParamId) -> Option<Dd>;

    fn set_param_value(&mut self, param: ParamId, value: Dd) -> Result<(), TimingError>;

    fn is_frozen(&self, param: ParamId) -> Option<bool>;

    fn set_frozen(&mut self, param: ParamId, frozen: bool) -> Result<(), TimingError>;

    fn uncertainty(&self, param: ParamId) -> Option<f64>;

    fn set_uncertainty(&mut self, param: ParamId, sigma: f64) -> Result<(), TimingError>;

    fn clone_box(&self) -> Box<dyn PhaseComponent>;
}

impl Clone for Box<dyn PhaseComponent> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// A model component contributing a propagation or clock delay in seconds.
pub trait DelayComponent: Debug {
    fn name(&self) -> &'static str;

    fn delay(&self, toas: &Toas) -> Result<Vec<f64>, TimingError>;

    fn clone_box(&self) -> Box<dyn DelayComponent>;
}

impl Clone for Box<dyn DelayComponent> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
