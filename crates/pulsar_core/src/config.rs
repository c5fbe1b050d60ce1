//! Serde documents describing a timing model.
//!
//! High-precision values travel as decimal strings so that nothing is lost to
//! an intermediate `f64` on the way in from JSON.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpinTermConfig {
    pub order: u32,
    pub value: String,
    /// Free in the fit when true.
    #[serde(default)]
    pub fit: bool,
}

/// A `JUMPn` over TOAs named by stable index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JumpConfig {
    pub number: u32,
    /// Offset in seconds as a decimal string.
    pub value: String,
    #[serde(default)]
    pub fit: bool,
    pub toas: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub spin_terms: Vec<SpinTermConfig>,
    /// TDB MJD as a decimal string.
    #[serde(default)]
    pub pepoch: Option<String>,
    #[serde(default)]
    pub tzrmjd: Option<String>,
    #[serde(default)]
    pub jumps: Vec<JumpConfig>,
}

impl ModelConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spin_terms: Vec::new(),
            pepoch: None,
            tzrmjd: None,
            jumps: Vec::new(),
        }
    }

    pub fn with_spin_term(mut self, order: u32, value: impl Into<String>, fit: bool) -> Self {
        self.spin_terms.push(SpinTermConfig {
            order,
            value: value.into(),
            fit,
        });
        self
    }

    pub fn with_pepoch(mut self, mjd: impl Into<String>) -> Self {
        self.pepoch = Some(mjd.into());
        self
    }

    pub fn with_tzrmjd(mut self, mjd: impl Into<String>) -> Self {
        self.tzrmjd = Some(mjd.into());
        self
    }

    pub fn with_jump(mut self, number: u32, seconds: impl Into<String>, fit: bool, toas: &[usize]) -> Self {
        self.jumps.push(JumpConfig {
            number,
            value: seconds.into(),
            fit,
            toas: toas.to_vec(),
        });
        self
    }
}
