use crate::error::TimingError;
use crate::precision::Dd;
use crate::time::Mjd;
use hifitime::TimeScale;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Typed identifier for a timing model parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParamId {
    /// Spin frequency (order 0) or its `n`-th time derivative.
    F(u32),
    Pepoch,
    Tzrmjd,
    /// Time offset applied to one set of TOAs, numbered from 1.
    Jump(u32),
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamId::F(order) => write!(f, "F{order}"),
            ParamId::Pepoch => f.write_str("PEPOCH"),
            ParamId::Tzrmjd => f.write_str("TZRMJD"),
            ParamId::Jump(number) => write!(f, "JUMP{number}"),
        }
    }
}

impl FromStr for ParamId {
    type Err = TimingError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let trimmed = name.trim();
        if trimmed.eq_ignore_ascii_case("PEPOCH") {
            return Ok(ParamId::Pepoch);
        }
        if trimmed.eq_ignore_ascii_case("TZRMJD") {
            return Ok(ParamId::Tzrmjd);
        }
        let numbered = |prefix: &str| {
            let head = trimmed.get(..prefix.len())?;
            let digits = &trimmed[prefix.len()..];
            if !head.eq_ignore_ascii_case(prefix)
                || digits.is_empty()
                || !digits.bytes().all(|b| b.is_ascii_digit())
            {
                return None;
            }
            digits.parse::<u32>().ok()
        };
        numbered("JUMP")
            .filter(|&number| number > 0)
            .map(ParamId::Jump)
            .or_else(|| numbered("F").map(ParamId::F))
            .ok_or_else(|| TimingError::UnknownParameter(name.to_string()))
    }
}

/// Physical unit expressed as an integer power of seconds.
///
/// `s^-1` prints as `Hz` and `s^-(n+1)` as `Hz/s^n`, which covers every spin
/// term and the inverse units of their phase derivatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Unit {
    seconds_power: i32,
}

impl Unit {
    pub const DIMENSIONLESS: Unit = Unit { seconds_power: 0 };
    pub const SECOND: Unit = Unit { seconds_power: 1 };
    pub const HERTZ: Unit = Unit { seconds_power: -1 };

    /// Unit of the spin term `F{order}`: `Hz/s^order`.
    pub fn spin_term(order: u32) -> Unit {
        Unit {
            seconds_power: -(order as i32) - 1,
        }
    }

    pub fn inverse(self) -> Unit {
        Unit {
            seconds_power: -self.seconds_power,
        }
    }

    pub fn seconds_power(self) -> i32 {
        self.seconds_power
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.seconds_power {
            0 => Ok(()),
            1 => f.write_str("s"),
            -1 => f.write_str("Hz"),
            p if p > 1 => write!(f, "s^{p}"),
            p => write!(f, "Hz/s^{}", -p - 1),
        }
    }
}

/// One member of the `F` prefix family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpinTerm {
    pub order: u32,
    pub value: Dd,
    /// Frozen terms are held fixed by the fitter.
    pub frozen: bool,
    pub uncertainty: Option<f64>,
}

impl SpinTerm {
    pub fn new(order: u32, value: Dd) -> Self {
        Self {
            order,
            value,
            frozen: true,
            uncertainty: None,
        }
    }

    pub fn id(&self) -> ParamId {
        ParamId::F(self.order)
    }

    pub fn unit(&self) -> Unit {
        Unit::spin_term(self.order)
    }
}

/// An epoch-valued parameter pinned to one time scale.
#[derive(Debug, Clone, PartialEq)]
pub struct MjdParam {
    pub id: ParamId,
    pub value: Option<Mjd>,
    pub time_scale: TimeScale,
}

impl MjdParam {
    pub fn new(id: ParamId, time_scale: TimeScale) -> Self {
        Self {
            id,
            value: None,
            time_scale,
        }
    }

    pub fn check_scale(&self) -> Result<(), TimingError> {
        match self.value {
            Some(epoch) if epoch.scale() != self.time_scale => Err(TimingError::TimeScaleMismatch {
                param: self.id.to_string(),
                expected: self.time_scale,
                found: epoch.scale(),
            }),
            _ => Ok(()),
        }
    }
}

/// The spin-frequency prefix family `F0, F1, ..., FN`, stored sparsely by order.
///
/// Orders may be inserted in any sequence; [`SpinTerms::first_gap`] reports
/// whether the set is contiguous.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpinTerms {
    terms: BTreeMap<u32, SpinTerm>,
}

impl SpinTerms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the value of `F{order}`, keeping fit flags of an existing term.
    pub fn insert(&mut self, order: u32, value: Dd) -> bool {
        match self.terms.get_mut(&order) {
            Some(term) => {
                term.value = value;
                false
            }
            None => {
                self.terms.insert(order, SpinTerm::new(order, value));
                true
            }
        }
    }

    pub fn remove(&mut self, order: u32) -> Option<SpinTerm> {
        self.terms.remove(&order)
    }

    pub fn get(&self, order: u32) -> Option<&SpinTerm> {
        self.terms.get(&order)
    }

    pub fn get_mut(&mut self, order: u32) -> Option<&mut SpinTerm> {
        self.terms.get_mut(&order)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpinTerm> {
        self.terms.values()
    }

    /// Orders present in the derivative part of the family (F1 and up).
    pub fn derivative_orders(&self) -> impl Iterator<Item = u32> + '_ {
        self.terms.keys().copied().filter(|&order| order > 0)
    }

    /// Lowest derivative order missing below the highest one present.
    pub fn first_gap(&self) -> Option<u32> {
        let mut expected = 1;
        for order in self.derivative_orders() {
            if order != expected {
                return Some(expected);
            }
            expected += 1;
        }
        None
    }

    pub fn any_derivative_nonzero(&self) -> bool {
        self.terms
            .values()
            .any(|term| term.order > 0 && term.value != Dd::ZERO)
    }

    /// Values `[F0, F1, ..., FN]` in order.
    pub fn values(&self) -> Vec<Dd> {
        self.terms.values().map(|term| term.value).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_id_round_trips_through_names() {
        for id in [
            ParamId::F(0),
            ParamId::F(12),
            ParamId::Pepoch,
            ParamId::Tzrmjd,
            ParamId::Jump(3),
        ] {
            let parsed: ParamId = id.to_string().parse().unwrap();
            assert_eq!(parsed, id);
        }
        assert_eq!("f2".parse::<ParamId>().unwrap(), ParamId::F(2));
        assert!("F".parse::<ParamId>().is_err());
        assert!("F1x".parse::<ParamId>().is_err());
        assert!("RAJ".parse::<ParamId>().is_err());
        assert_eq!("jump12".parse::<ParamId>().unwrap(), ParamId::Jump(12));
        assert!("JUMP".parse::<ParamId>().is_err());
        assert!("JUMP0".parse::<ParamId>().is_err());
        assert!("JUMPx".parse::<ParamId>().is_err());
    }

    #[test]
    fn epoch_scale_mismatch_is_reported() {
        let mut pepoch = MjdParam::new(ParamId::Pepoch, TimeScale::TDB);
        assert!(pepoch.check_scale().is_ok());
        pepoch.value = Some(Mjd::new(Dd::from_f64(55000.0), TimeScale::UTC));
        let err = pepoch.check_scale().unwrap_err();
        assert_eq!(err.to_string(), "PEPOCH must be on the TDB time scale, found UTC");
    }

    #[test]
    fn spin_units_follow_order() {
        assert_eq!(Unit::spin_term(0).to_string(), "Hz");
        assert_eq!(Unit::spin_term(1).to_string(), "Hz/s^1");
        assert_eq!(Unit::spin_term(3).to_string(), "Hz/s^3");
        assert_eq!(Unit::spin_term(0).inverse(), Unit::SECOND);
        assert_eq!(Unit::spin_term(2).inverse().to_string(), "s^3");
        assert_eq!(Unit::DIMENSIONLESS.to_string(), "");
    }

    #[test]
    fn first_gap_names_lowest_missing_order() {
        let mut terms = SpinTerms::new();
        terms.insert(0, Dd::from_f64(100.0));
        assert_eq!(terms.first_gap(), None);
        terms.insert(2, Dd::from_f64(1e-25));
        terms.insert(4, Dd::from_f64(1e-40));
        assert_eq!(terms.first_gap(), Some(1));
        terms.insert(1, Dd::from_f64(-1e-15));
        assert_eq!(terms.first_gap(), Some(3));
        terms.insert(3, Dd::ZERO);
        assert_eq!(terms.first_gap(), None);
    }

    #[test]
    fn insert_keeps_fit_flags() {
        let mut terms = SpinTerms::new();
        assert!(terms.insert(0, Dd::from_f64(1.0)));
        terms.get_mut(0).unwrap().frozen = false;
        assert!(!terms.insert(0, Dd::from_f64(2.0)));
        let f0 = terms.get(0).unwrap();
        assert!(!f0.frozen);
        assert_eq!(f0.value, Dd::from_f64(2.0));
    }
}
