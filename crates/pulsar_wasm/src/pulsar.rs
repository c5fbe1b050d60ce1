//! Session wrapper exposed to the browser residual viewer.

use anyhow::Context;
use js_sys::{Float64Array, Uint8Array};
use pulsar_core::config::ModelConfig;
use pulsar_core::model::TimingModel;
use pulsar_core::params::ParamId;
use pulsar_core::residuals::{TimeUnit, TrackMode};
use pulsar_core::session::Pulsar;
use pulsar_core::toas::{ToaRecord, Toas};
use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct WasmPulsar {
    pub(crate) pulsar: Pulsar,
}

#[derive(Serialize)]
struct CorrelationMatrix {
    params: Vec<String>,
    matrix: Vec<Vec<f64>>,
}

pub(crate) fn build_pulsar(config: &ModelConfig, records: &[ToaRecord]) -> anyhow::Result<Pulsar> {
    let model = TimingModel::from_config(config)
        .with_context(|| format!("Invalid timing model {}.", config.name))?;
    let toas = Toas::from_records(records).context("Invalid TOA table.")?;
    Pulsar::new(model, toas)
}

/// Reads a byte mask from JS: nonzero entries are set. An empty mask means no TOA is set.
pub(crate) fn mask_from_bytes(bytes: &[u8], ntoas: usize) -> Result<Vec<bool>, String> {
    if bytes.is_empty() {
        return Ok(vec![false; ntoas]);
    }
    if bytes.len() != ntoas {
        return Err(format!(
            "TOA mask has {} entries, expected {}.",
            bytes.len(),
            ntoas
        ));
    }
    Ok(bytes.iter().map(|&b| b != 0).collect())
}

pub(crate) fn parse_param(name: &str) -> Result<ParamId, String> {
    name.parse::<ParamId>().map_err(|err| err.to_string())
}

pub(crate) fn to_js(err: anyhow::Error) -> JsValue {
    JsValue::from_str(&format!("{err:#}"))
}

fn serialized<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    to_value(value).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

/// Stashes the masked TOAs, or brings stashed TOAs back. Returns whether TOAs
/// are stashed afterwards.
pub(crate) fn toggle_stash(pulsar: &mut Pulsar, mask: &[bool]) -> anyhow::Result<bool> {
    if pulsar.is_stashed() {
        pulsar.unstash_toas()?;
    } else {
        pulsar.stash_toas(mask)?;
    }
    Ok(pulsar.is_stashed())
}

#[wasm_bindgen]
impl WasmPulsar {
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue, toas: JsValue) -> Result<WasmPulsar, JsValue> {
        console_error_panic_hook::set_once();

        let config: ModelConfig = from_value(config)
            .map_err(|e| JsValue::from_str(&format!("Invalid model config: {}", e)))?;
        let records: Vec<ToaRecord> = from_value(toas)
            .map_err(|e| JsValue::from_str(&format!("Invalid TOA records: {}", e)))?;
        let pulsar = build_pulsar(&config, &records).map_err(to_js)?;
        Ok(WasmPulsar { pulsar })
    }

    pub fn name(&self) -> String {
        self.pulsar.name().to_string()
    }

    pub fn ntoas(&self) -> usize {
        self.pulsar.all_toas().len()
    }

    pub fn fitted(&self) -> bool {
        self.pulsar.fitted()
    }

    pub fn prefit_residuals_us(&self) -> Float64Array {
        let resids = self
            .pulsar
            .prefit_resids()
            .time_resids_in(TimeUnit::Microsecond);
        Float64Array::from(resids.as_slice())
    }

    /// Post-fit residuals, or `undefined` before the first fit.
    pub fn postfit_residuals_us(&self) -> Option<Float64Array> {
        self.pulsar.postfit_resids().map(|resids| {
            let values = resids.time_resids_in(TimeUnit::Microsecond);
            Float64Array::from(values.as_slice())
        })
    }

    /// Fits the TOAs flagged in `selected` (all of them when empty or all zero)
    /// and returns the fit summary.
    pub fn fit(&mut self, selected: &[u8]) -> Result<JsValue, JsValue> {
        let mask = mask_from_bytes(selected, self.ntoas()).map_err(|e| JsValue::from_str(&e))?;
        let summary = self.pulsar.fit(&mask).map_err(to_js)?;
        serialized(summary)
    }

    pub fn fit_summary(&self) -> Result<JsValue, JsValue> {
        serialized(&self.pulsar.fit_summary())
    }

    pub fn revert(&mut self) -> bool {
        self.pulsar.revert()
    }

    pub fn reset(&mut self) {
        self.pulsar.reset();
    }

    pub fn select(&mut self, mask: &[u8]) -> Result<(), JsValue> {
        let mask = mask_from_bytes(mask, self.ntoas()).map_err(|e| JsValue::from_str(&e))?;
        self.pulsar.select(&mask).map_err(to_js)
    }

    pub fn unselect(&mut self) {
        self.pulsar.unselect();
    }

    pub fn delete_toas(&mut self, mask: &[u8]) -> Result<(), JsValue> {
        let mask = mask_from_bytes(mask, self.ntoas()).map_err(|e| JsValue::from_str(&e))?;
        self.pulsar.delete_toas(&mask).map_err(to_js)
    }

    /// Adds `wraps` turns to the masked TOAs' pulse numbers.
    pub fn add_phase_wrap(&mut self, mask: &[u8], wraps: i32) -> Result<(), JsValue> {
        let mask = mask_from_bytes(mask, self.ntoas()).map_err(|e| JsValue::from_str(&e))?;
        self.pulsar
            .add_phase_wrap(&mask, i64::from(wraps))
            .map_err(to_js)
    }

    /// True once phase wraps have switched residuals to pulse-number tracking.
    pub fn uses_pulse_numbers(&self) -> bool {
        self.pulsar.prefit_resids().track_mode() == TrackMode::PulseNumbers
    }

    /// Wraps every TOA later than the selection; false when nothing is selected.
    pub fn wrap_later_than_selection(&mut self, wraps: i32) -> Result<bool, JsValue> {
        self.pulsar
            .wrap_later_than_selection(i64::from(wraps))
            .map_err(to_js)
    }

    /// Stashes the masked TOAs or restores stashed ones. Returns whether TOAs
    /// are stashed afterwards.
    pub fn toggle_stash(&mut self, mask: &[u8]) -> Result<bool, JsValue> {
        let mask = mask_from_bytes(mask, self.ntoas()).map_err(|e| JsValue::from_str(&e))?;
        toggle_stash(&mut self.pulsar, &mask).map_err(to_js)
    }

    /// Jumps the masked TOAs, or removes their jump. Returns `{ Added: "JUMP1" }`
    /// or `{ Removed: "JUMP1" }`.
    pub fn toggle_jump(&mut self, mask: &[u8]) -> Result<JsValue, JsValue> {
        let mask = mask_from_bytes(mask, self.ntoas()).map_err(|e| JsValue::from_str(&e))?;
        let toggle = self.pulsar.toggle_jump(&mask).map_err(to_js)?;
        serialized(&toggle)
    }

    /// Jumps every TOA group with no selected or jumped TOA; returns the new jump names.
    pub fn jump_other_groups(&mut self) -> Result<Vec<String>, JsValue> {
        let added = self.pulsar.jump_other_groups().map_err(to_js)?;
        Ok(added.iter().map(|id| id.to_string()).collect())
    }

    /// One byte per TOA, 1 where a jump covers it.
    pub fn jumped(&self) -> Uint8Array {
        let bytes: Vec<u8> = self.pulsar.jumped().iter().map(|&j| u8::from(j)).collect();
        Uint8Array::from(bytes.as_slice())
    }

    /// `{ params, matrix }` for the last fit, or `undefined` before any fit.
    pub fn correlation_matrix(&self) -> Result<JsValue, JsValue> {
        let Some(summary) = self.pulsar.fit_summary() else {
            return Ok(JsValue::UNDEFINED);
        };
        let params: Vec<String> = summary.updates.iter().map(|u| u.param.to_string()).collect();
        serialized(&CorrelationMatrix {
            params,
            matrix: summary.correlation(),
        })
    }

    /// `{ start_mjd, end_mjd, count }` for the `ndays` window holding the most TOAs.
    pub fn highest_density_range(&self, ndays: f64) -> Result<JsValue, JsValue> {
        serialized(&self.pulsar.all_toas().highest_density_range(ndays))
    }

    pub fn set_frozen(&mut self, param: &str, frozen: bool) -> Result<(), JsValue> {
        let id = parse_param(param).map_err(|e| JsValue::from_str(&e))?;
        self.pulsar.set_frozen(id, frozen).map_err(to_js)
    }

    pub fn free_params(&self) -> Vec<String> {
        self.pulsar
            .prefit_model()
            .free_params()
            .iter()
            .map(|id| id.to_string())
            .collect()
    }

    /// Value of a parameter in the current best model (post-fit when fitted).
    pub fn param_value(&self, param: &str) -> Result<f64, JsValue> {
        let id = parse_param(param).map_err(|e| JsValue::from_str(&e))?;
        self.pulsar
            .current_model()
            .param_value(id)
            .map(|value| value.to_f64())
            .ok_or_else(|| JsValue::from_str(&format!("Parameter {} is not set.", id)))
    }

    pub fn param_uncertainty(&self, param: &str) -> Result<Option<f64>, JsValue> {
        let id = parse_param(param).map_err(|e| JsValue::from_str(&e))?;
        Ok(self.pulsar.current_model().uncertainty(id))
    }
}
