//! Phase jumps: arbitrary time offsets between sets of TOAs.
//!
//! A `JUMPn` shifts every TOA it covers by a constant number of seconds, which
//! enters the phase as `JUMPn * F0`. TOAs are tracked by their stable index so a
//! jump keeps covering the same arrivals after others are deleted or stashed.

use crate::error::TimingError;
use crate::params::{ParamId, Unit};
use crate::precision::Dd;
use crate::toas::Toas;
use crate::traits::{PhaseComponent, PhaseDerivative};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const MODEL_NAME: &str = "PhaseJump";

/// One `JUMPn` and the TOAs it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jump {
    pub number: u32,
    /// Offset in seconds.
    pub value: Dd,
    pub frozen: bool,
    pub uncertainty: Option<f64>,
    pub toas: BTreeSet<usize>,
}

impl Jump {
    pub fn id(&self) -> ParamId {
        ParamId::Jump(self.number)
    }

    fn covers(&self, index: usize) -> bool {
        self.toas.contains(&index)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseJump {
    jumps: BTreeMap<u32, Jump>,
}

impl PhaseJump {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.jumps.is_empty()
    }

    pub fn get(&self, number: u32) -> Option<&Jump> {
        self.jumps.get(&number)
    }

    /// Adds a free, zero-valued jump over `toas` under the next unused number.
    pub fn add(&mut self, toas: BTreeSet<usize>) -> ParamId {
        let number = self.jumps.keys().next_back().map_or(1, |last| last + 1);
        debug!("{MODEL_NAME}: JUMP{number} covers {} TOAs", toas.len());
        self.jumps.insert(
            number,
            Jump {
                number,
                value: Dd::ZERO,
                frozen: false,
                uncertainty: None,
                toas,
            },
        );
        ParamId::Jump(number)
    }

    /// Inserts or replaces a fully specified jump.
    pub fn insert(&mut self, jump: Jump) {
        self.jumps.insert(jump.number, jump);
    }

    pub fn remove(&mut self, number: u32) -> Option<Jump> {
        self.jumps.remove(&number)
    }

    /// The jump covering exactly `toas`, if any.
    pub fn find_exact(&self, toas: &BTreeSet<usize>) -> Option<u32> {
        self.jumps
            .values()
            .find(|jump| &jump.toas == toas)
            .map(|jump| jump.number)
    }

    /// Per row of `toas`: whether any jump covers it.
    pub fn jumped(&self, toas: &Toas) -> Vec<bool> {
        toas.iter()
            .map(|toa| self.jumps.values().any(|jump| jump.covers(toa.index)))
            .collect()
    }

    fn jump(&self, param: ParamId) -> Result<&Jump, TimingError> {
        let jump = match param {
            ParamId::Jump(number) => self.jumps.get(&number),
            _ => None,
        };
        jump.ok_or_else(|| TimingError::UnknownParameter(param.to_string()))
    }

    fn jump_mut(&mut self, param: ParamId) -> Result<&mut Jump, TimingError> {
        let jump = match param {
            ParamId::Jump(number) => self.jumps.get_mut(&number),
            _ => None,
        };
        jump.ok_or_else(|| TimingError::UnknownParameter(param.to_string()))
    }
}

impl PhaseComponent for PhaseJump {
    fn name(&self) -> &'static str {
        MODEL_NAME
    }

    fn setup(&mut self) -> Result<(), TimingError> {
        match self.jumps.values().find(|jump| !jump.value.is_finite()) {
            Some(jump) => Err(TimingError::InvalidValue {
                param: jump.id().to_string(),
                value: jump.value.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn phase(&self, toas: &Toas, delay: &[f64], f0: Dd) -> Result<Vec<Dd>, TimingError> {
        TimingError::check_len("delay", toas.len(), delay.len())?;
        Ok(toas
            .iter()
            .map(|toa| {
                let offset = self
                    .jumps
                    .values()
                    .filter(|jump| jump.covers(toa.index))
                    .fold(Dd::ZERO, |sum, jump| sum + jump.value);
                offset * f0
            })
            .collect())
    }

    fn deriv_params(&self) -> Vec<ParamId> {
        self.jumps.values().map(Jump::id).collect()
    }

    /// `d(phase)/d(JUMPn)` is `F0` on the covered TOAs and zero elsewhere.
    fn d_phase_d_param(
        &self,
        toas: &Toas,
        param: ParamId,
        delay: &[f64],
        f0: Dd,
    ) -> Result<PhaseDerivative, TimingError> {
        TimingError::check_len("delay", toas.len(), delay.len())?;
        let jump = self.jump(param)?;
        let values = toas
            .iter()
            .map(|toa| if jump.covers(toa.index) { f0 } else { Dd::ZERO })
            .collect();
        Ok(PhaseDerivative {
            param,
            values,
            unit: Unit::HERTZ,
        })
    }

    fn params(&self) -> Vec<ParamId> {
        self.deriv_params()
    }

    fn param_value(&self, param: ParamId) -> Option<Dd> {
        self.jump(param).ok().map(|jump| jump.value)
    }

    fn set_param_value(&mut self, param: ParamId, value: Dd) -> Result<(), TimingError> {
        if !value.is_finite() {
            return Err(TimingError::InvalidValue {
                param: param.to_string(),
                value: value.to_string(),
            });
        }
        self.jump_mut(param)?.value = value;
        Ok(())
    }

    fn is_frozen(&self, param: ParamId) -> Option<bool> {
        self.jump(param).ok().map(|jump| jump.frozen)
    }

    fn set_frozen(&mut self, param: ParamId, frozen: bool) -> Result<(), TimingError> {
        self.jump_mut(param)?.frozen = frozen;
        Ok(())
    }

    fn uncertainty(&self, param: ParamId) -> Option<f64> {
        self.jump(param).ok().and_then(|jump| jump.uncertainty)
    }

    fn set_uncertainty(&mut self, param: ParamId, sigma: f64) -> Result<(), TimingError> {
        self.jump_mut(param)?.uncertainty = Some(sigma);
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn PhaseComponent> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Mjd;
    use approx::assert_relative_eq;

    fn toas(n: usize) -> Toas {
        let times: Vec<Mjd> = (0..n)
            .map(|i| Mjd::tdb(Dd::from_f64(55000.0 + i as f64)))
            .collect();
        Toas::from_times(&times, 1.0)
    }

    fn set(indices: &[usize]) -> BTreeSet<usize> {
        indices.iter().copied().collect()
    }

    #[test]
    fn add_numbers_jumps_after_the_highest() {
        let mut jumps = PhaseJump::new();
        assert_eq!(jumps.add(set(&[0])), ParamId::Jump(1));
        assert_eq!(jumps.add(set(&[1])), ParamId::Jump(2));
        jumps.remove(1);
        assert_eq!(jumps.add(set(&[2])), ParamId::Jump(3));
        assert_eq!(jumps.deriv_params(), vec![ParamId::Jump(2), ParamId::Jump(3)]);
        assert_eq!(jumps.is_frozen(ParamId::Jump(3)), Some(false));
        assert_eq!(jumps.find_exact(&set(&[1])), Some(2));
        assert_eq!(jumps.find_exact(&set(&[1, 2])), None);
    }

    #[test]
    fn phase_is_offset_times_f0_on_covered_toas() {
        let mut jumps = PhaseJump::new();
        let first = jumps.add(set(&[1, 2]));
        let second = jumps.add(set(&[2]));
        jumps.set_param_value(first, Dd::from_f64(1e-3)).unwrap();
        jumps.set_param_value(second, Dd::from_f64(-4e-3)).unwrap();

        let toas = toas(3);
        let phase = jumps.phase(&toas, &[0.0; 3], Dd::from_f64(100.0)).unwrap();
        assert_eq!(phase[0], Dd::ZERO);
        assert_relative_eq!(phase[1].to_f64(), 0.1, max_relative = 1e-15);
        assert_relative_eq!(phase[2].to_f64(), -0.3, max_relative = 1e-15);
        assert_eq!(jumps.jumped(&toas), vec![false, true, true]);
    }

    #[test]
    fn derivative_is_f0_in_hertz() {
        let mut jumps = PhaseJump::new();
        let id = jumps.add(set(&[0, 2]));
        let toas = toas(3).select(&[false, true, true]).unwrap();
        let derivative = jumps
            .d_phase_d_param(&toas, id, &[0.0, 0.0], Dd::from_f64(50.0))
            .unwrap();
        assert_eq!(derivative.unit, Unit::HERTZ);
        assert_eq!(derivative.values, vec![Dd::ZERO, Dd::from_f64(50.0)]);
        assert!(matches!(
            jumps.d_phase_d_param(&toas, ParamId::Jump(9), &[0.0, 0.0], Dd::ONE),
            Err(TimingError::UnknownParameter(_))
        ));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let mut jumps = PhaseJump::new();
        let id = jumps.add(set(&[0]));
        assert!(jumps.set_param_value(id, Dd::from_f64(f64::NAN)).is_err());
        jumps.insert(Jump {
            number: 1,
            value: Dd::from_f64(f64::INFINITY),
            frozen: true,
            uncertainty: None,
            toas: set(&[0]),
        });
        assert!(matches!(
            jumps.setup(),
            Err(TimingError::InvalidValue { ref param, .. }) if param == "JUMP1"
        ));
    }
}
