//! Output Expression Engine (C6): evaluates each configured output's
//! `source` expression against the cycle's device readings.
//!
//! The grammar is the practical subset actually exercised by fleet
//! drivers — dotted/bracketed path navigation, arithmetic, comparison,
//! and the ternary conditional — not the full JSONata language (§4.6).

mod eval;
mod lexer;
mod parser;

use std::collections::HashMap;

use edge_model::config::OutputSpec;
use edge_model::readout::DeviceReading;
use edge_model::value::Value;

pub use eval::EvalError;

/// The per-cycle view an output expression is evaluated against: every
/// device's readings, keyed by device id, reachable as `devices.<id>.<var>`.
pub struct Context<'a> {
    pub devices: &'a HashMap<String, DeviceReading>,
}

/// Evaluate every configured output against `ctx`, returning
/// `(device_id, field, value)` triples. An expression that evaluates to
/// null/undefined, or that fails to parse or typecast, is silently
/// dropped — it contributes nothing to the readout rather than aborting
/// the whole cycle (§4.6).
pub fn evaluate_outputs(outputs: &[OutputSpec], ctx: &Context, calc_device_id: &str) -> Vec<(String, String, Value)> {
    let mut results = Vec::new();
    for out in outputs {
        match evaluate_one(out, ctx, calc_device_id) {
            Ok(Some((device_id, value))) => results.push((device_id, out.field.clone(), value)),
            Ok(None) => {}
            Err(e) => tracing::warn!(source = %out.source, error = %e, "output expression failed"),
        }
    }
    results
}

fn evaluate_one(out: &OutputSpec, ctx: &Context, calc_device_id: &str) -> Result<Option<(String, Value)>, EvalError> {
    let ast = parser::parse(&out.source)?;
    let result = eval::eval(&ast, ctx)?;
    let Some(value) = eval::typecast(result, out.typecast.as_deref()) else {
        return Ok(None);
    };
    let device_id = out.device.clone().unwrap_or_else(|| calc_device_id.to_string());
    Ok(Some((device_id, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_model::readout::DeviceReading;
    use std::collections::HashMap;

    fn ctx_with(device: &str, var: &str, value: Value) -> HashMap<String, DeviceReading> {
        let mut dr = DeviceReading::new(device);
        dr.fields.insert(var.to_string(), value);
        let mut devices = HashMap::new();
        devices.insert(device.to_string(), dr);
        devices
    }

    #[test]
    fn path_navigation_reads_a_device_field() {
        let devices = ctx_with("meter1", "ac_power", Value::Int(500));
        let ctx = Context { devices: &devices };
        let out = OutputSpec { source: "devices.meter1.ac_power".into(), field: "power".into(), device: None, typecast: None };
        let results = evaluate_outputs(&[out], &ctx, "_calc");
        assert_eq!(results, vec![("_calc".to_string(), "power".to_string(), Value::Float(500.0))]);
    }

    #[test]
    fn ternary_picks_branch_by_comparison() {
        let devices = ctx_with("meter1", "ac_power", Value::Int(500));
        let ctx = Context { devices: &devices };
        let out = OutputSpec {
            source: "devices.meter1.ac_power > 100 ? 1 : 0".into(),
            field: "flag".into(),
            device: Some("meter1".into()),
            typecast: Some("int".into()),
        };
        let results = evaluate_outputs(&[out], &ctx, "_calc");
        assert_eq!(results, vec![("meter1".to_string(), "flag".to_string(), Value::Int(1))]);
    }

    #[test]
    fn missing_path_drops_the_output_silently() {
        let devices = ctx_with("meter1", "ac_power", Value::Int(500));
        let ctx = Context { devices: &devices };
        let out = OutputSpec { source: "devices.meter2.ac_power".into(), field: "power".into(), device: None, typecast: None };
        assert!(evaluate_outputs(&[out], &ctx, "_calc").is_empty());
    }

    #[test]
    fn arithmetic_across_two_devices() {
        let mut dr1 = DeviceReading::new("pv1");
        dr1.fields.insert("p".into(), Value::Float(100.0));
        let mut dr2 = DeviceReading::new("pv2");
        dr2.fields.insert("p".into(), Value::Float(250.0));
        let mut devices = HashMap::new();
        devices.insert("pv1".to_string(), dr1);
        devices.insert("pv2".to_string(), dr2);
        let ctx = Context { devices: &devices };
        let out = OutputSpec { source: "devices.pv1.p + devices.pv2.p".into(), field: "total".into(), device: None, typecast: None };
        let results = evaluate_outputs(&[out], &ctx, "_calc");
        assert_eq!(results, vec![("_calc".to_string(), "total".to_string(), Value::Float(350.0))]);
    }
}
