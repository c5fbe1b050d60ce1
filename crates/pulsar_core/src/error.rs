use hifitime::TimeScale;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimingError {
    /// A required parameter is absent at setup. Fatal until the caller supplies it.
    #[error("{model}: missing parameter {param}{}", reason_suffix(.reason))]
    MissingParameter {
        model: String,
        param: String,
        reason: Option<String>,
    },
    #[error("length mismatch for {what}: expected {expected}, found {found}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{model} has not been set up")]
    NotSetUp { model: String },
    #[error("unknown parameter {0}")]
    UnknownParameter(String),
    #[error("invalid value for {param}: {value}")]
    InvalidValue { param: String, value: String },
    #[error("TOA table is empty")]
    EmptyToas,
    #[error("{param} must be on the {expected} time scale, found {found}")]
    TimeScaleMismatch {
        param: String,
        expected: TimeScale,
        found: TimeScale,
    },
}

impl TimingError {
    pub fn missing(model: &str, param: impl Into<String>) -> Self {
        TimingError::MissingParameter {
            model: model.to_string(),
            param: param.into(),
            reason: None,
        }
    }

    pub fn missing_because(model: &str, param: impl Into<String>, reason: impl Into<String>) -> Self {
        TimingError::MissingParameter {
            model: model.to_string(),
            param: param.into(),
            reason: Some(reason.into()),
        }
    }

    pub(crate) fn check_len(what: &'static str, expected: usize, found: usize) -> Result<(), Self> {
        if expected == found {
            Ok(())
        } else {
            Err(TimingError::LengthMismatch {
                what,
                expected,
                found,
            })
        }
    }
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|text| format!(" ({text})"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_parameter_message_includes_reason() {
        let plain = TimingError::missing("Spindown", "F0");
        assert_eq!(plain.to_string(), "Spindown: missing parameter F0");

        let with_reason = TimingError::missing_because(
            "Spindown",
            "PEPOCH",
            "PEPOCH is required if F1 or higher are set",
        );
        assert_eq!(
            with_reason.to_string(),
            "Spindown: missing parameter PEPOCH (PEPOCH is required if F1 or higher are set)"
        );
    }

    #[test]
    fn check_len_reports_both_sizes() {
        assert!(TimingError::check_len("delay", 3, 3).is_ok());
        let err = TimingError::check_len("delay", 3, 2).unwrap_err();
        assert_eq!(err.to_string(), "length mismatch for delay: expected 3, found 2");
    }
}
