//! WASM bindings for the pulsar timing core: a `WasmPulsar` session that a
//! browser residual viewer drives: fitting with revert and reset, TOA deletion
//! and stashing, jumps, phase wraps, and axis data.

mod plot;
mod pulsar;

pub use pulsar::WasmPulsar;
