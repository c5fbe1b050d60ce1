use crate::error::TimingError;
use crate::toas::Toas;
use crate::traits::DelayComponent;
use std::collections::BTreeMap;

/// Delay already computed upstream (clock corrections, propagation, binary motion),
/// stored in seconds per TOA and looked up by the TOA's stable index.
///
/// Keying by index keeps the lookup correct after TOAs are masked or deleted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrecomputedDelay {
    seconds: BTreeMap<usize, f64>,
}

impl PrecomputedDelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pairs `seconds[i]` with the TOA at position `i` of `toas`.
    pub fn from_toas(toas: &Toas, seconds: &[f64]) -> Result<Self, TimingError> {
        TimingError::check_len("delay", toas.len(), seconds.len())?;
        Ok(Self {
            seconds: toas.indices().into_iter().zip(seconds.iter().copied()).collect(),
        })
    }

    pub fn insert(&mut self, index: usize, seconds: f64) {
        self.seconds.insert(index, seconds);
    }

    pub fn len(&self) -> usize {
        self.seconds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seconds.is_empty()
    }
}

impl DelayComponent for PrecomputedDelay {
    fn name(&self) -> &'static str {
        "PrecomputedDelay"
    }

    fn delay(&self, toas: &Toas) -> Result<Vec<f64>, TimingError> {
        toas.iter()
            .map(|toa| {
                self.seconds
                    .get(&toa.index)
                    .copied()
                    .ok_or_else(|| TimingError::InvalidValue {
                        param: "delay".to_string(),
                        value: format!("no delay for TOA {}", toa.index),
                    })
            })
            .collect()
    }

    fn clone_box(&self) -> Box<dyn DelayComponent> {
        Box::new(self.clone())
    }
}
