//! Configuration units (charms) of an NS: their records under
//! `_admin.deployed.VCA`, naming, status aggregation during deployment and
//! primitive execution.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::connectors::{PrimitiveStatus, UnitStatusEvent, VcaConnector};
use crate::errors::{LcmError, LcmResult, VcaError};
use crate::utils::json::{deep_array, scalar_text, str_of, truncate_chars};

pub const STATUS_ACTIVE: &str = "active";

/// One entry of `_admin.deployed.VCA`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployedUnit {
    #[serde(rename = "member-vnf-index", default)]
    pub member_vnf_index: Option<String>,
    #[serde(default)]
    pub vdu_id: Option<String>,
    #[serde(default)]
    pub vdu_name: Option<String>,
    #[serde(default)]
    pub vdu_count_index: Option<u64>,
    pub model: String,
    pub application: String,
    #[serde(rename = "operational-status", default)]
    pub operational_status: String,
    #[serde(rename = "detailed-status", default)]
    pub detailed_status: String,
    #[serde(default)]
    pub charm: String,
    #[serde(default)]
    pub native: bool,
}

impl DeployedUnit {
    pub fn is_active(&self) -> bool {
        self.operational_status == STATUS_ACTIVE
    }
}

/// Units recorded on an NS record; removed units are `None`
pub fn deployed_units(nsr: &Value) -> Vec<Option<DeployedUnit>> {
    deep_array(nsr, "_admin.deployed.VCA")
        .iter()
        .map(|entry| serde_json::from_value(entry.clone()).ok())
        .collect()
}

/// Application-safe name: digits become letters, other non-letters `-`,
/// runs of `-` collapse
pub fn format_application_name(parts: &[&str]) -> String {
    let mut name = String::new();
    for c in parts.join("-").chars() {
        let mapped = match c {
            '0'..='9' => (b'a' + (c as u8 - b'0')) as char,
            c if c.is_ascii_alphabetic() => c.to_ascii_lowercase(),
            _ => '-',
        };
        if mapped == '-' && name.ends_with('-') {
            continue;
        }
        name.push(mapped);
    }
    name
}

/// Two-letter suffix for the n-th unit of an NS
pub fn index_letters(index: usize) -> String {
    let first = (b'a' + ((index / 26) % 26) as u8) as char;
    let second = (b'a' + (index % 26) as u8) as char;
    format!("{first}{second}")
}

/// Application name of a unit, unique within the NS model
pub fn application_name(ns_name: &str, vnf_index: &str, vdu_id: &str, unit_index: usize) -> String {
    let base = format_application_name(&[ns_name, vnf_index, vdu_id]);
    format!("{}-{}", truncate_chars(&base, 47), index_letters(unit_index))
}

/// Resolve the parameters of a primitive invocation. Explicit `params`
/// win; otherwise the descriptor's `value` or `default-value` is used, where
/// `<name>` is looked up in `instantiation_params`. Structured values are
/// passed as JSON text and a `!!yaml ` prefix is stripped.
pub fn map_primitive_params(
    primitive_desc: &Value,
    params: &Map<String, Value>,
    instantiation_params: &Map<String, Value>,
) -> LcmResult<Map<String, Value>> {
    let primitive = str_of(primitive_desc, "name").unwrap_or_default();
    let mut calculated = Map::new();
    for parameter in deep_array(primitive_desc, "parameter") {
        let name = str_of(parameter, "name").unwrap_or_default();
        let mut value = if let Some(given) = params.get(name) {
            given.clone()
        } else if let Some(default) = parameter.get("value").or_else(|| parameter.get("default-value")) {
            match default.as_str() {
                Some(text) if text.starts_with('<') && text.ends_with('>') && text.len() >= 2 => {
                    instantiation_params
                        .get(&text[1..text.len() - 1])
                        .cloned()
                        .ok_or_else(|| {
                            LcmError::domain(format!(
                                "Parameter {text} needed to execute primitive {primitive} not provided"
                            ))
                        })?
                }
                _ => default.clone(),
            }
        } else {
            return Err(LcmError::domain(format!(
                "Parameter {name} needed to execute primitive {primitive} not provided"
            )));
        };

        value = match value {
            Value::Object(_) | Value::Array(_) => json!(value.to_string()),
            Value::String(text) => match text.strip_prefix("!!yaml ") {
                Some(stripped) => json!(stripped),
                None => Value::String(text),
            },
            other => other,
        };
        calculated.insert(name.to_string(), value);
    }
    Ok(calculated)
}

/// `initial-config-primitive` entries with their parameters resolved
pub fn initial_config_primitives(
    configuration: &Value,
    instantiation_params: &Map<String, Value>,
) -> LcmResult<Vec<Value>> {
    let mut primitives: Vec<&Value> = deep_array(configuration, "initial-config-primitive")
        .iter()
        .collect();
    primitives.sort_by_key(|p| p.get("seq").and_then(Value::as_u64).unwrap_or(0));
    primitives
        .into_iter()
        .map(|primitive| {
            let params = map_primitive_params(primitive, &Map::new(), instantiation_params)?;
            Ok(json!({
                "name": str_of(primitive, "name").unwrap_or_default(),
                "parameters": params,
            }))
        })
        .collect()
}

/// Aggregate state of the units being deployed
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregate {
    AllActive,
    /// Some unit stayed in error or blocked past the grace period
    Failed(String),
    /// Still converging; carries a `configuring: ...` summary
    Pending(String),
}

#[derive(Debug, Clone)]
struct Tracked {
    member_vnf_index: Option<String>,
    vdu_id: Option<String>,
    model: String,
    application: String,
    status: String,
    detail: String,
    first_error: Option<Instant>,
}

/// Status of deploying units as reported by the connector
#[derive(Debug, Clone)]
pub struct UnitTracker {
    units: Vec<Tracked>,
    grace: Duration,
}

impl UnitTracker {
    pub fn new(units: &[DeployedUnit], grace: Duration) -> Self {
        let units = units
            .iter()
            .map(|unit| Tracked {
                member_vnf_index: unit.member_vnf_index.clone(),
                vdu_id: unit.vdu_id.clone(),
                model: unit.model.clone(),
                application: unit.application.clone(),
                status: unit.operational_status.clone(),
                detail: unit.detailed_status.clone(),
                first_error: None,
            })
            .collect();
        Self { units, grace }
    }

    /// Record an event; returns the index of the unit it belongs to
    pub fn apply(&mut self, event: &UnitStatusEvent) -> Option<usize> {
        let index = self
            .units
            .iter()
            .position(|u| u.model == event.model && u.application == event.application)?;
        self.mark(index, &event.status, &event.message);
        Some(index)
    }

    pub fn mark(&mut self, index: usize, status: &str, detail: &str) {
        if let Some(unit) = self.units.get_mut(index) {
            unit.status = status.to_string();
            unit.detail = detail.to_string();
        }
    }

    pub fn evaluate(&mut self, now: Instant) -> Aggregate {
        let mut counts: IndexMap<String, usize> = IndexMap::new();
        let mut errors = Vec::new();
        let mut all_active = true;
        for unit in &mut self.units {
            *counts.entry(unit.status.clone()).or_default() += 1;
            if unit.status == STATUS_ACTIVE {
                unit.first_error = None;
                continue;
            }
            all_active = false;
            if unit.status != "error" && unit.status != "blocked" {
                unit.first_error = None;
                continue;
            }
            let since = *unit.first_error.get_or_insert(now);
            if now.duration_since(since) >= self.grace {
                errors.push(format!(
                    "member_vnf_index={} vdu_id={} {}: {}",
                    unit.member_vnf_index.as_deref().unwrap_or("None"),
                    unit.vdu_id.as_deref().unwrap_or("None"),
                    unit.status,
                    unit.detail
                ));
            }
        }

        if all_active {
            Aggregate::AllActive
        } else if !errors.is_empty() {
            Aggregate::Failed(format!("fail configuring {}", errors.join(";")))
        } else {
            let summary: Vec<String> = counts
                .iter()
                .map(|(status, n)| format!("{status}: {n}"))
                .collect();
            Aggregate::Pending(format!("configuring: {}", summary.join(", ")))
        }
    }
}

fn show<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "None".to_string(), |v| v.to_string())
}

/// Deployed unit serving a primitive target. The unit must be active.
pub fn find_unit<'a>(
    units: &'a [Option<DeployedUnit>],
    member_vnf_index: Option<&str>,
    vdu_id: Option<&str>,
    vdu_name: Option<&str>,
    vdu_count_index: Option<u64>,
) -> LcmResult<&'a DeployedUnit> {
    let unit = units
        .iter()
        .flatten()
        .find(|unit| {
            unit.member_vnf_index.as_deref() == member_vnf_index
                && unit.vdu_id.as_deref() == vdu_id
                && vdu_name.map_or(true, |name| unit.vdu_name.as_deref() == Some(name))
                && vdu_count_index.map_or(true, |count| unit.vdu_count_index == Some(count))
        })
        .ok_or_else(|| {
            LcmError::domain(format!(
                "charm for member_vnf_index={} vdu_id={} vdu_name={} vdu_count_index={} is not deployed",
                show(member_vnf_index),
                show(vdu_id),
                show(vdu_name),
                show(vdu_count_index)
            ))
        })?;
    if !unit.is_active() {
        return Err(LcmError::domain(format!(
            "charm for member_vnf_index={} vdu_id={} operational_status={} not 'active'",
            show(member_vnf_index),
            show(vdu_id),
            unit.operational_status
        )));
    }
    Ok(unit)
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveOutcome {
    Completed(String),
    Failed(String),
    TimedOut(String),
}

/// Timing of one primitive execution
#[derive(Debug, Clone, Copy)]
pub struct PrimitivePolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub retries: u32,
    pub retry_interval: Duration,
}

fn output_text(output: &Value) -> String {
    match output.get("output") {
        Some(text) => scalar_text(text).unwrap_or_else(|| text.to_string()),
        None => scalar_text(output).unwrap_or_else(|| output.to_string()),
    }
}

/// Run a primitive on a unit and poll it to completion, retrying failed
/// attempts. `policy.timeout` bounds every attempt together, connector calls
/// included. Connector failures other than a failed primitive propagate.
pub async fn execute_primitive(
    vca: &dyn VcaConnector,
    unit: &DeployedUnit,
    primitive: &str,
    params: &Map<String, Value>,
    policy: PrimitivePolicy,
) -> LcmResult<PrimitiveOutcome> {
    let deadline = Instant::now() + policy.timeout;
    let attempts = run_attempts(vca, unit, primitive, params, policy, deadline);
    match tokio::time::timeout_at(deadline, attempts).await {
        Ok(outcome) => outcome,
        Err(_) => Ok(timed_out(policy)),
    }
}

fn timed_out(policy: PrimitivePolicy) -> PrimitiveOutcome {
    PrimitiveOutcome::TimedOut(format!(
        "no result after {} seconds",
        policy.timeout.as_secs()
    ))
}

async fn run_attempts(
    vca: &dyn VcaConnector,
    unit: &DeployedUnit,
    primitive: &str,
    params: &Map<String, Value>,
    policy: PrimitivePolicy,
    deadline: Instant,
) -> LcmResult<PrimitiveOutcome> {
    let mut attempts_left = policy.retries;
    loop {
        let primitive_id = match vca
            .execute_primitive(&unit.model, &unit.application, primitive, params)
            .await
        {
            Ok(id) => id,
            Err(VcaError::PrimitiveFailed(message)) => return Ok(PrimitiveOutcome::Failed(message)),
            Err(e) => return Err(e.into()),
        };
        debug!(application = %unit.application, primitive, primitive_id = %primitive_id, "Primitive started");

        let status = loop {
            let status = vca.primitive_status(&unit.model, &primitive_id).await?;
            if status.is_finished() {
                break status;
            }
            tokio::time::sleep(policy.poll_interval).await;
        };

        let output = vca.primitive_output(&unit.model, &primitive_id).await?;
        if status == PrimitiveStatus::Completed {
            return Ok(PrimitiveOutcome::Completed(output_text(&output)));
        }
        if attempts_left == 0 {
            return Ok(PrimitiveOutcome::Failed(output_text(&output)));
        }
        if Instant::now() + policy.retry_interval >= deadline {
            return Ok(timed_out(policy));
        }
        attempts_left -= 1;
        tokio::time::sleep(policy.retry_interval).await;
    }
}
