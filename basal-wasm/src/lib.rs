//! Framework-neutral WASM <-> JavaScript bridge.

use basal_core::{BasalError, DeliveryType, ReconcileConfig};
use serde::{Deserialize, Serialize};
use serde_wasm_bindgen::{from_value, Serializer};
use wasm_bindgen::prelude::*;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsReconcileConfig {
    #[serde(default)]
    priority: Option<Vec<String>>,
    #[serde(default)]
    max_resolution_steps: Option<usize>,
}

impl From<JsReconcileConfig> for ReconcileConfig {
    fn from(cfg: JsReconcileConfig) -> Self {
        let mut base = ReconcileConfig::default();
        if let Some(priority) = cfg.priority {
            base.priority = priority.into_iter().map(DeliveryType::from).collect();
        }
        if let Some(steps) = cfg.max_resolution_steps {
            base.max_resolution_steps = steps;
        }
        base
    }
}

/// Reconcile an array of basal records into actual and undelivered timelines.
#[wasm_bindgen]
pub fn reconcile_segments(records: JsValue, config: Option<JsValue>) -> Result<JsValue, JsValue> {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    let records = read_records(records)?;

    let cfg = match config {
        Some(js_cfg) => {
            let cfg: JsReconcileConfig = from_value(js_cfg)
                .map_err(|err| JsValue::from_str(&format!("Could not read config: {err}")))?;
            ReconcileConfig::from(cfg)
        }
        None => ReconcileConfig::default(),
    };

    let reconciliation = basal_segments::reconcile_value(&records, &cfg)
        .map_err(|err| JsValue::from_str(&format_basal_error(err)))?;

    write_result(&reconciliation)
}

/// Split scheduled basals around temps, case by case.
#[wasm_bindgen]
pub fn split_segments(records: JsValue) -> Result<JsValue, JsValue> {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    let records = read_records(records)?;
    let split = basal_segments::split_value(&records)
        .map_err(|err| JsValue::from_str(&format_basal_error(err)))?;

    write_result(&split)
}

fn read_records(records: JsValue) -> Result<serde_json::Value, JsValue> {
    from_value::<serde_json::Value>(records)
        .map_err(|err| JsValue::from_str(&format!("Could not read JSON records: {err}")))
}

fn write_result<T: Serialize>(result: &T) -> Result<JsValue, JsValue> {
    // Maps (undelivered by delivery type) become plain objects, not JS `Map`s.
    let serializer = Serializer::json_compatible();
    result
        .serialize(&serializer)
        .map_err(|err| JsValue::from_str(&format!("Could not serialize result: {err}")))
}

fn format_basal_error(err: BasalError) -> String {
    format!("Basal error: {err}")
}
