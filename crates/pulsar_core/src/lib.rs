pub mod config;
pub mod delay;
pub mod error;
pub mod fitter;
pub mod jump;
pub mod model;
pub mod params;
pub mod plot;
pub mod precision;
pub mod residuals;
pub mod session;
pub mod spindown;
pub mod time;
pub mod toas;
/// The `pulsar_core` crate is the numerical engine behind the pulsar timing viewer.
/// Pulse phase is carried in double-double precision (`Dd`) end to end so that
/// multi-year, multi-billion-cycle phase counts keep sub-nanosecond resolution.
///
/// Key components:
/// - **Precision**: `Dd` double-double arithmetic, `Mjd` timestamps, generic Taylor/Horner evaluation.
/// - **Traits**: `PhaseComponent` and `DelayComponent`, the plug-in seams of a timing model.
/// - **Spindown**: the polynomial spin-down phase model with per-parameter derivatives.
/// - **Jumps**: `PhaseJump` time offsets between sets of TOAs.
/// - **Fitting**: residuals, a weighted least-squares fitter, and the interactive `Pulsar` session.
pub mod traits;
