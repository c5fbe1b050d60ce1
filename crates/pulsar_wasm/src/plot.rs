//! Plot axis data for the residual viewer.

use crate::pulsar::WasmPulsar;
use pulsar_core::plot::{axis_data, AxisKind};
use serde_wasm_bindgen::to_value;
use wasm_bindgen::prelude::*;

pub(crate) fn parse_axis(label: &str) -> Result<AxisKind, String> {
    label.parse::<AxisKind>()
}

#[wasm_bindgen]
impl WasmPulsar {
    /// Labels accepted by [`WasmPulsar::axis_data`], in menu order.
    pub fn axis_labels() -> Vec<String> {
        AxisKind::ALL
            .iter()
            .map(|kind| kind.label().to_string())
            .collect()
    }

    /// `{ values, errors, unit }` for the axis named `label`, e.g. `"post-fit"` or `"mjd"`.
    pub fn axis_data(&self, label: &str) -> Result<JsValue, JsValue> {
        let kind = parse_axis(label).map_err(|e| JsValue::from_str(&e))?;
        to_value(&axis_data(&self.pulsar, kind))
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }
}
