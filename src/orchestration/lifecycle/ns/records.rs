//! Reconciliation of NS and VNF records with what the resource orchestrator
//! reports, and VDU record bookkeeping for scaling.

use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::database::UpdateMap;
use crate::errors::{LcmError, LcmResult};
use crate::utils::json::{scalar_text, str_of};

/// Result of syncing VNF records against an ACTIVE orchestrator ns
#[derive(Debug, Clone, PartialEq)]
pub enum VnfrSync {
    /// Every record found its counterpart: `(vnfr _id, update)` pairs
    Ready(Vec<(String, UpdateMap)>),
    /// The VIM has not reported a management address yet; poll again
    NoManagementIp(String),
}

fn items<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn text(value: &Value, key: &str) -> String {
    value.get(key).and_then(scalar_text).unwrap_or_default()
}

fn set(target: &mut Value, key: &str, value: Value) {
    if let Some(map) = target.as_object_mut() {
        map.insert(key.to_string(), value);
    }
}

/// First address of a `;` separated list
fn first_address(addresses: &str) -> &str {
    addresses.split(';').next().unwrap_or(addresses)
}

fn address_of(value: &Value, key: &str) -> Value {
    match str_of(value, key).filter(|s| !s.is_empty()) {
        Some(addresses) => json!(first_address(addresses)),
        None => Value::Null,
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

fn count_index(vdur: &Value) -> u64 {
    vdur.get("count-index").and_then(Value::as_u64).unwrap_or(0)
}

/// Copy addresses, VIM ids and statuses from an orchestrator ns descriptor
/// into the VNF records (keyed by member-vnf-index). The in-memory records
/// are updated as well.
pub fn sync_vnfrs(vnfrs: &mut IndexMap<String, Value>, ns_desc: &Value) -> LcmResult<VnfrSync> {
    let mut updates = Vec::with_capacity(vnfrs.len());
    for (index, vnfr) in vnfrs.iter_mut() {
        let vnf_ro = items(ns_desc, "vnfs")
            .iter()
            .find(|vnf| text(vnf, "member_vnf_index") == *index)
            .ok_or_else(|| {
                LcmError::domain(format!(
                    "ns_update_vnfr: Not found member_vnf_index={index} at RO info"
                ))
            })?;

        let mut update = UpdateMap::new();
        match str_of(vnf_ro, "ip_address").filter(|s| !s.is_empty()) {
            Some(addresses) => {
                let ip = json!(first_address(addresses));
                set(vnfr, "ip-address", ip.clone());
                update.insert("ip-address".into(), ip);
            }
            None if is_blank(vnfr.get("ip-address")) => {
                return Ok(VnfrSync::NoManagementIp(format!(
                    "ns member_vnf_index '{index}' has no IP address"
                )));
            }
            None => {}
        }

        let vdur_count = items(vnfr, "vdur").len();
        for vdu_index in 0..vdur_count {
            let mut vdur = vnfr["vdur"][vdu_index].clone();
            if !is_blank(vdur.get("pdu-type")) {
                continue;
            }
            let vdu_id = text(&vdur, "vdu-id-ref");
            let nth = count_index(&vdur);
            let vm = items(vnf_ro, "vms")
                .iter()
                .filter(|vm| str_of(vm, "vdu_osm_id") == Some(vdu_id.as_str()))
                .nth(nth as usize)
                .ok_or_else(|| {
                    LcmError::domain(format!(
                        "ns_update_vnfr: Not found member_vnf_index={index} vdur={vdu_id} count_index={nth} at RO info"
                    ))
                })?;

            set(&mut vdur, "vim-id", vm.get("vim_vm_id").cloned().unwrap_or(Value::Null));
            set(&mut vdur, "ip-address", address_of(vm, "ip_address"));
            set(&mut vdur, "name", vm.get("vim_name").cloned().unwrap_or(Value::Null));
            set(&mut vdur, "status", vm.get("status").cloned().unwrap_or(Value::Null));
            set(
                &mut vdur,
                "status-detailed",
                vm.get("error_msg").cloned().unwrap_or(Value::Null),
            );
            if let Some(Value::Array(interfaces)) = vdur.get_mut("interfaces") {
                for iface in interfaces.iter_mut() {
                    let name = text(iface, "name");
                    let iface_ro = items(vm, "interfaces")
                        .iter()
                        .find(|candidate| str_of(candidate, "internal_name") == Some(name.as_str()))
                        .ok_or_else(|| {
                            LcmError::domain(format!(
                                "ns_update_vnfr: Not found member_vnf_index={index} vdur={vdu_id} interface={name} at RO info"
                            ))
                        })?;
                    set(iface, "ip-address", iface_ro.get("ip_address").cloned().unwrap_or(Value::Null));
                    set(iface, "mac-address", iface_ro.get("mac_address").cloned().unwrap_or(Value::Null));
                }
            }
            update.insert(format!("vdur.{vdu_index}"), vdur.clone());
            vnfr["vdur"][vdu_index] = vdur;
        }

        let vld_count = items(vnfr, "vld").len();
        for vld_index in 0..vld_count {
            let mut vld = vnfr["vld"][vld_index].clone();
            let vld_id = text(&vld, "id");
            let net = items(ns_desc, "nets")
                .iter()
                .find(|net| {
                    str_of(net, "vnf_net_osm_id") == Some(vld_id.as_str())
                        && text(net, "member_vnf_index") == *index
                })
                .ok_or_else(|| {
                    LcmError::domain(format!(
                        "ns_update_vnfr: Not found member_vnf_index={index} vld={vld_id} at RO info"
                    ))
                })?;
            copy_net_status(&mut vld, net);
            update.insert(format!("vld.{vld_index}"), vld.clone());
            vnfr["vld"][vld_index] = vld;
        }

        updates.push((text(vnfr, "_id"), update));
    }
    Ok(VnfrSync::Ready(updates))
}

fn copy_net_status(vld: &mut Value, net: &Value) {
    set(vld, "vim-id", net.get("vim_net_id").cloned().unwrap_or(Value::Null));
    set(vld, "name", net.get("vim_name").cloned().unwrap_or(Value::Null));
    set(vld, "status", net.get("status").cloned().unwrap_or(Value::Null));
    set(
        vld,
        "status-detailed",
        net.get("error_msg").cloned().unwrap_or(Value::Null),
    );
}

/// Copy network ids and statuses into the NS record's virtual links
pub fn sync_nsr(nsr: &Value, ns_desc: &Value) -> LcmResult<UpdateMap> {
    let mut update = UpdateMap::new();
    for (vld_index, vld) in items(nsr, "vld").iter().enumerate() {
        let vld_id = text(vld, "id");
        let net = items(ns_desc, "nets")
            .iter()
            .find(|net| str_of(net, "ns_net_osm_id") == Some(vld_id.as_str()))
            .ok_or_else(|| {
                LcmError::domain(format!("ns_update_nsr: Not found vld={vld_id} at RO info"))
            })?;
        let mut vld = vld.clone();
        copy_net_status(&mut vld, net);
        update.insert(format!("vld.{vld_index}"), vld);
    }
    Ok(update)
}

/// VDU records after scaling: for every VDU id in `create`, that many
/// copies of its last record are inserted after it with increasing
/// `count-index`; for every id in `delete`, that many of its last records
/// are removed. A VDU with no record to copy or remove is an error.
pub fn scale_vdurs(
    vnfr: &Value,
    create: &IndexMap<String, u64>,
    delete: &IndexMap<String, u64>,
) -> LcmResult<Vec<Value>> {
    let mut vdurs = items(vnfr, "vdur").to_vec();
    let mut create = create.clone();
    let mut delete = delete.clone();
    create.retain(|_, n| *n > 0);
    delete.retain(|_, n| *n > 0);

    let mut position = vdurs.len();
    while position > 0 {
        position -= 1;
        if !is_blank(vdurs[position].get("pdu-type")) {
            continue;
        }
        let vdu_id = text(&vdurs[position], "vdu-id-ref");
        if let Some(copies) = create.shift_remove(&vdu_id) {
            let mut template = vdurs[position].clone();
            for offset in 0..copies {
                template = new_instance_of(&template);
                vdurs.insert(position + 1 + offset as usize, template.clone());
            }
        }
        if let Some(pending) = delete.get_mut(&vdu_id) {
            vdurs.remove(position);
            *pending -= 1;
            if *pending == 0 {
                delete.shift_remove(&vdu_id);
            }
        }
    }

    if !create.is_empty() || !delete.is_empty() {
        let pending: Vec<&String> = create.keys().chain(delete.keys()).collect();
        return Err(LcmError::domain(format!(
            "Error scaling VNFR {}: no existing vdur for {pending:?}. Scaled to 0?",
            text(vnfr, "_id")
        )));
    }
    Ok(vdurs)
}

/// Copy of a VDU record for a new instance: fresh id, next count-index and
/// no VIM-assigned data
fn new_instance_of(vdur: &Value) -> Value {
    let mut copy = vdur.clone();
    set(&mut copy, "_id", json!(uuid::Uuid::new_v4().to_string()));
    set(&mut copy, "count-index", json!(count_index(vdur) + 1));
    for key in ["ip-address", "vim-id", "name", "status", "status-detailed"] {
        set(&mut copy, key, Value::Null);
    }
    if let Some(Value::Array(interfaces)) = copy.get_mut("interfaces") {
        for iface in interfaces.iter_mut() {
            set(iface, "ip-address", Value::Null);
            set(iface, "mac-address", Value::Null);
        }
    }
    copy
}
