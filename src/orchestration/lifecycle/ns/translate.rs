//! Translation of descriptors and instantiation parameters into the
//! resource orchestrator's model.
//!
//! Everything here is synchronous. VIM and WIM accounts referenced by the
//! parameters are read beforehand into an [`AccountDirectory`].

use serde_json::{json, Map, Value};
use std::collections::HashMap;

use crate::constants::{account_state, collections};
use crate::database::{DocumentStore, Filter};
use crate::errors::{DbError, LcmError, LcmResult};
use crate::utils::json::{deep_get, deep_str, scalar_text, str_of};

/// Accounts referenced by one instantiation, keyed by account id. A `None`
/// entry records an account that does not exist.
#[derive(Debug, Default, Clone)]
pub struct AccountDirectory {
    vims: HashMap<String, Option<Value>>,
    wims: HashMap<String, Option<Value>>,
}

impl AccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vim(mut self, id: &str, doc: Value) -> Self {
        self.vims.insert(id.to_string(), Some(doc));
        self
    }

    pub fn with_wim(mut self, id: &str, doc: Value) -> Self {
        self.wims.insert(id.to_string(), Some(doc));
        self
    }

    /// Read every VIM and WIM account named in `ns_params`
    pub async fn load(db: &dyn DocumentStore, ns_params: &Value) -> LcmResult<Self> {
        let mut directory = Self::new();
        for id in referenced_vims(ns_params) {
            let doc = db
                .get_one(collections::VIM_ACCOUNTS, &Filter::by_id(&id))
                .await?;
            directory.vims.insert(id, doc);
        }
        for id in referenced_wims(ns_params) {
            let doc = db
                .get_one(collections::WIM_ACCOUNTS, &Filter::by_id(&id))
                .await?;
            directory.wims.insert(id, doc);
        }
        Ok(directory)
    }

    fn vim_ro_id(&self, vim_id: &str) -> LcmResult<String> {
        let doc = self
            .vims
            .get(vim_id)
            .and_then(Option::as_ref)
            .ok_or_else(|| DbError::not_found(collections::VIM_ACCOUNTS, vim_id))?;
        let state = deep_str(doc, "_admin.operationalState").unwrap_or("");
        if state != account_state::ENABLED {
            return Err(LcmError::domain(format!(
                "VIM={vim_id} is not available. operationalState={state}"
            )));
        }
        deep_str(doc, "_admin.deployed.RO")
            .map(str::to_string)
            .ok_or_else(|| LcmError::domain(format!("VIM={vim_id} is not deployed at RO")))
    }

    /// WIM references may be an account id or a literal passed through as is
    /// (`false` disables WIM selection)
    fn wim_ro_id(&self, wim: &Value) -> LcmResult<Value> {
        let Some(wim_id) = wim.as_str() else {
            return Ok(wim.clone());
        };
        let doc = self
            .wims
            .get(wim_id)
            .and_then(Option::as_ref)
            .ok_or_else(|| DbError::not_found(collections::WIM_ACCOUNTS, wim_id))?;
        let state = deep_str(doc, "_admin.operationalState").unwrap_or("");
        if state != account_state::ENABLED {
            return Err(LcmError::domain(format!(
                "WIM={wim_id} is not available. operationalState={state}"
            )));
        }
        Ok(deep_get(doc, "_admin.deployed.RO-account")
            .cloned()
            .unwrap_or(Value::Null))
    }
}

fn iter<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn text(value: &Value, key: &str) -> String {
    value.get(key).and_then(scalar_text).unwrap_or_default()
}

/// VIM account ids named anywhere in the instantiation parameters
pub fn referenced_vims(ns_params: &Value) -> Vec<String> {
    let mut ids = Vec::new();
    let mut push = |id: &str| {
        if !ids.iter().any(|known| known == id) {
            ids.push(id.to_string());
        }
    };
    if let Some(id) = str_of(ns_params, "vimAccountId") {
        push(id);
    }
    for vnf in iter(ns_params, "vnf") {
        if let Some(id) = str_of(vnf, "vimAccountId") {
            push(id);
        }
    }
    for vld in iter(ns_params, "vld") {
        for key in ["vim-network-name", "vim-network-id"] {
            if let Some(Value::Object(per_vim)) = vld.get(key) {
                for id in per_vim.keys() {
                    push(id);
                }
            }
        }
    }
    ids
}

pub fn referenced_wims(ns_params: &Value) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    let candidates = std::iter::once(ns_params.get("wimAccountId"))
        .chain(iter(ns_params, "vld").iter().map(|vld| vld.get("wimAccountId")));
    for id in candidates.flatten().filter_map(Value::as_str) {
        if !ids.iter().any(|known| known == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

/// Set `value` at `path`, creating intermediate objects
fn populate(root: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut cursor = root;
    for key in parents {
        let slot = cursor
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(map) = slot else {
            return;
        };
        cursor = map;
    }
    cursor.insert(last.to_string(), value);
}

/// Rename IP-profile fields to the orchestrator's vocabulary
pub fn ip_profile_to_ro(profile: &Value) -> Value {
    let mut ro = profile.as_object().cloned().unwrap_or_default();
    if let Some(dns) = ro.remove("dns-server") {
        let addresses = match dns {
            Value::Array(servers) => Value::Array(
                servers
                    .iter()
                    .filter_map(|server| server.get("address").cloned())
                    .collect(),
            ),
            other => other,
        };
        ro.insert("dns-address".into(), addresses);
    }
    let version = match ro.get("ip-version").and_then(Value::as_str) {
        Some("ipv4") => Some("IPv4"),
        Some("ipv6") => Some("IPv6"),
        _ => None,
    };
    if let Some(version) = version {
        ro.insert("ip-version".into(), json!(version));
    }
    if let Some(dhcp) = ro.remove("dhcp-params") {
        ro.insert("dhcp".into(), dhcp);
    }
    Value::Object(ro)
}

/// Render `{{ name }}` placeholders of a cloud-init template. Every
/// placeholder must be provided in `params`.
pub fn render_cloud_init(
    template: &str,
    params: Option<&Map<String, Value>>,
    vnfd_id: &str,
    vdu_id: &str,
) -> LcmResult<String> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        let name = rest[start + 2..start + 2 + len].trim();
        let value = params.and_then(|p| p.get(name)).ok_or_else(|| {
            LcmError::domain(format!(
                "Variable '{name}' defined at vnfd[id={vnfd_id}]:vdu[id={vdu_id}]:cloud-init/cloud-init-file, \
                 must be provided in the instantiation parameters inside the 'additionalParamsForVnf' block"
            ))
        })?;
        rendered.push_str(&rest[..start]);
        rendered.push_str(&scalar_text(value).unwrap_or_else(|| value.to_string()));
        rest = &rest[start + 2 + len + 2..];
    }
    rendered.push_str(rest);
    Ok(rendered)
}

/// Copy of a VNF descriptor as registered at the orchestrator: management
/// sections removed, id replaced and cloud-init rendered
pub fn vnfd_to_ro(
    vnfd: &Value,
    new_id: &str,
    additional_params: Option<&Value>,
) -> LcmResult<Value> {
    let mut ro = vnfd.as_object().cloned().unwrap_or_default();
    for key in [
        "_id",
        "_admin",
        "vnf-configuration",
        "monitoring-param",
        "scaling-group-descriptor",
    ] {
        ro.remove(key);
    }
    ro.insert("id".into(), json!(new_id));

    let vnfd_id = text(vnfd, "id");
    let params = additional_params.and_then(Value::as_object);
    if let Some(Value::Array(vdus)) = ro.get_mut("vdu") {
        for vdu in vdus.iter_mut() {
            let vdu_id = text(vdu, "id");
            let Some(template) = vdu.get("cloud-init").and_then(Value::as_str) else {
                continue;
            };
            let rendered = render_cloud_init(template, params, &vnfd_id, &vdu_id)?;
            if let Some(vdu) = vdu.as_object_mut() {
                vdu.insert("cloud-init".into(), json!(rendered));
            }
        }
    }
    Ok(Value::Object(ro))
}

/// Copy of an NS descriptor whose VNF references point at the registered
/// VNF descriptors (`member-vnf-index -> orchestrator descriptor id`)
pub fn nsd_to_ro(nsd: &Value, new_id: &str, vnfd_ro_ids: &HashMap<String, String>) -> Value {
    let mut ro = nsd.as_object().cloned().unwrap_or_default();
    ro.remove("_id");
    ro.remove("_admin");
    ro.insert("id".into(), json!(new_id));

    if let Some(Value::Array(members)) = ro.get_mut("constituent-vnfd") {
        for member in members.iter_mut() {
            let index = text(member, "member-vnf-index");
            if let (Some(ro_id), Some(member)) = (vnfd_ro_ids.get(&index), member.as_object_mut())
            {
                member.insert("vnfd-id-ref".into(), json!(ro_id));
            }
        }
    }
    if let Some(Value::Array(vlds)) = ro.get_mut("vld") {
        for vld in vlds.iter_mut() {
            let Some(Value::Array(cps)) = vld.get_mut("vnfd-connection-point-ref") else {
                continue;
            };
            for cp in cps.iter_mut() {
                let index = text(cp, "member-vnf-index-ref");
                if let (Some(ro_id), Some(cp)) = (vnfd_ro_ids.get(&index), cp.as_object_mut()) {
                    cp.insert("vnfd-id-ref".into(), json!(ro_id));
                }
            }
        }
    }
    Value::Object(ro)
}

fn vnfd_of_member<'a>(
    nsd: &Value,
    vnfds: &'a HashMap<String, Value>,
    member_index: &str,
) -> Option<&'a Value> {
    iter(nsd, "constituent-vnfd")
        .iter()
        .find(|member| text(member, "member-vnf-index") == member_index)
        .and_then(|member| str_of(member, "vnfd-id-ref"))
        .and_then(|vnfd_ref| vnfds.get(vnfd_ref))
}

fn ssh_required(configuration: &Value) -> bool {
    deep_get(configuration, "config-access.ssh-access.required")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// VDUs of a descriptor that need the configuration units' public keys
fn vdus_needing_access(vnfd: &Value) -> Vec<String> {
    let mut needed = Vec::new();
    let mut mgmt_cp: Option<String> = None;
    if let Some(config) = vnfd.get("vnf-configuration") {
        if ssh_required(config) {
            if let Some(vdu_id) = deep_str(vnfd, "mgmt-interface.vdu-id") {
                needed.push(vdu_id.to_string());
            } else if let Some(cp) = deep_str(vnfd, "mgmt-interface.cp") {
                mgmt_cp = Some(cp.to_string());
            }
        }
    }
    for vdu in iter(vnfd, "vdu") {
        if let Some(config) = vdu.get("vdu-configuration") {
            if ssh_required(config) {
                needed.push(text(vdu, "id"));
            }
        } else if let Some(cp) = mgmt_cp.as_deref() {
            let owns_cp = iter(vdu, "interface")
                .iter()
                .any(|iface| str_of(iface, "external-connection-point-ref") == Some(cp));
            if owns_cp {
                needed.push(text(vdu, "id"));
                mgmt_cp = None;
            }
        }
    }
    needed
}

/// Build the orchestrator's instantiation parameters. `vnfds` is keyed by
/// descriptor id (the NSD's `vnfd-id-ref`). Returns `Null` without params.
pub fn ns_params_to_ro(
    ns_params: &Value,
    nsd: &Value,
    vnfds: &HashMap<String, Value>,
    public_keys: &[String],
    accounts: &AccountDirectory,
) -> LcmResult<Value> {
    if ns_params.as_object().map_or(true, Map::is_empty) {
        return Ok(Value::Null);
    }
    let vim_id = str_of(ns_params, "vimAccountId")
        .ok_or_else(|| LcmError::domain("Invalid instantiate parameter: missing vimAccountId"))?;
    let mut ro = Map::new();
    ro.insert("datacenter".into(), json!(accounts.vim_ro_id(vim_id)?));
    ro.insert(
        "wim_account".into(),
        accounts.wim_ro_id(ns_params.get("wimAccountId").unwrap_or(&Value::Null))?,
    );

    for (vnfd_ref, vnfd) in vnfds {
        let needed = vdus_needing_access(vnfd);
        if needed.is_empty() {
            continue;
        }
        for member in iter(nsd, "constituent-vnfd") {
            if str_of(member, "vnfd-id-ref") != Some(vnfd_ref.as_str()) {
                continue;
            }
            let index = text(member, "member-vnf-index");
            for vdu in &needed {
                populate(
                    &mut ro,
                    &["vnfs", &index, "vdus", vdu, "mgmt_keys"],
                    json!(public_keys),
                );
            }
        }
    }

    if let Some(image) = ns_params.get("vduImage").filter(|v| !v.is_null()) {
        ro.insert("vduImage".into(), image.clone());
    }
    if let Some(keys) = ns_params.get("ssh_keys").filter(|v| !v.is_null()) {
        ro.insert("cloud-config".into(), json!({ "key-pairs": keys }));
    }

    for vnf_params in iter(ns_params, "vnf") {
        vnf_params_to_ro(&mut ro, vnf_params, nsd, vnfds, accounts)?;
    }
    for vld_params in iter(ns_params, "vld") {
        vld_params_to_ro(&mut ro, vld_params, nsd, vnfds, accounts)?;
    }
    Ok(Value::Object(ro))
}

fn vnf_params_to_ro(
    ro: &mut Map<String, Value>,
    vnf_params: &Value,
    nsd: &Value,
    vnfds: &HashMap<String, Value>,
    accounts: &AccountDirectory,
) -> LcmResult<()> {
    let index = text(vnf_params, "member-vnf-index");
    let vnfd = vnfd_of_member(nsd, vnfds, &index).ok_or_else(|| {
        LcmError::domain(format!(
            "Invalid instantiate parameter vnf:member-vnf-index={index} is not present at nsd:constituent-vnfd"
        ))
    })?;
    if let Some(vim) = str_of(vnf_params, "vimAccountId") {
        populate(ro, &["vnfs", &index, "datacenter"], json!(accounts.vim_ro_id(vim)?));
    }

    for vdu_params in iter(vnf_params, "vdu") {
        let vdu_id = text(vdu_params, "id");
        for volume in iter(vdu_params, "volume") {
            if let Some(vim_volume) = volume.get("vim-volume-id").filter(|v| !v.is_null()) {
                let name = text(volume, "name");
                populate(
                    ro,
                    &["vnfs", &index, "vdus", &vdu_id, "devices", &name, "vim_id"],
                    vim_volume.clone(),
                );
            }
        }
        for iface in iter(vdu_params, "interface") {
            let name = text(iface, "name");
            for (param, ro_key) in [
                ("ip-address", "ip_address"),
                ("mac-address", "mac_address"),
                ("floating-ip-required", "floating-ip"),
            ] {
                if let Some(value) = iface.get(param).filter(|v| is_set(v)) {
                    populate(
                        ro,
                        &["vnfs", &index, "vdus", &vdu_id, "interfaces", &name, ro_key],
                        value.clone(),
                    );
                }
            }
        }
    }

    for ivld in iter(vnf_params, "internal-vld") {
        let name = text(ivld, "name");
        for key in ["vim-network-name", "vim-network-id", "provider-network"] {
            if let Some(value) = ivld.get(key).filter(|v| is_set(v)) {
                populate(ro, &["vnfs", &index, "networks", &name, key], value.clone());
            }
        }
        if let Some(profile) = ivld.get("ip-profile").filter(|v| is_set(v)) {
            populate(
                ro,
                &["vnfs", &index, "networks", &name, "ip-profile"],
                ip_profile_to_ro(profile),
            );
        }
        for icp in iter(ivld, "internal-connection-point") {
            let id_ref = text(icp, "id-ref");
            let found = iter(vnfd, "vdu").iter().find_map(|vdu| {
                iter(vdu, "interface")
                    .iter()
                    .find(|iface| {
                        str_of(iface, "internal-connection-point-ref") == Some(id_ref.as_str())
                    })
                    .map(|iface| (text(vdu, "id"), text(iface, "name")))
            });
            let Some((vdu_id, iface_name)) = found else {
                return Err(LcmError::domain(format!(
                    "Invalid instantiate parameter vnf:member-vnf-index[{index}]:internal-vld:id-ref:{id_ref} \
                     is not present at vnfd:internal-connection-point"
                )));
            };
            for (param, ro_key) in [("ip-address", "ip_address"), ("mac-address", "mac_address")] {
                if let Some(value) = icp.get(param).filter(|v| is_set(v)) {
                    populate(
                        ro,
                        &["vnfs", &index, "vdus", &vdu_id, "interfaces", &iface_name, ro_key],
                        value.clone(),
                    );
                }
            }
        }
    }
    Ok(())
}

fn vld_params_to_ro(
    ro: &mut Map<String, Value>,
    vld_params: &Value,
    nsd: &Value,
    vnfds: &HashMap<String, Value>,
    accounts: &AccountDirectory,
) -> LcmResult<()> {
    let name = text(vld_params, "name");
    if let Some(profile) = vld_params.get("ip-profile") {
        populate(ro, &["networks", &name, "ip-profile"], ip_profile_to_ro(profile));
    }
    if let Some(provider) = vld_params.get("provider-network").filter(|v| is_set(v)) {
        populate(ro, &["networks", &name, "provider-network"], provider.clone());
    }
    if let Some(wim) = vld_params.get("wimAccountId").filter(|v| !v.is_null()) {
        populate(ro, &["networks", &name, "wim_account"], accounts.wim_ro_id(wim)?);
    }
    for key in ["vim-network-name", "vim-network-id"] {
        let sites = match vld_params.get(key) {
            Some(Value::Object(per_vim)) => per_vim
                .iter()
                .map(|(vim, net)| {
                    Ok(json!({ "netmap-use": net, "datacenter": accounts.vim_ro_id(vim)? }))
                })
                .collect::<LcmResult<Vec<_>>>()?,
            Some(net) if is_set(net) => vec![json!({ "netmap-use": net })],
            _ => continue,
        };
        populate(ro, &["networks", &name, "sites"], Value::Array(sites));
    }

    for cp in iter(vld_params, "vnfd-connection-point-ref") {
        let index = text(cp, "member-vnf-index-ref");
        let cp_ref = text(cp, "vnfd-connection-point-ref");
        let vnfd = vnfd_of_member(nsd, vnfds, &index).ok_or_else(|| {
            LcmError::domain(format!(
                "Invalid instantiate parameter vld:vnfd-connection-point-ref:member-vnf-index-ref={index} \
                 is not present at nsd:constituent-vnfd"
            ))
        })?;
        let found = iter(vnfd, "vdu").iter().find_map(|vdu| {
            iter(vdu, "interface")
                .iter()
                .find(|iface| {
                    str_of(iface, "external-connection-point-ref") == Some(cp_ref.as_str())
                })
                .map(|iface| (text(vdu, "id"), text(iface, "name")))
        });
        let Some((vdu_id, iface_name)) = found else {
            return Err(LcmError::domain(format!(
                "Invalid instantiate parameter vld:vnfd-connection-point-ref:member-vnf-index-ref={index}:\
                 vnfd-connection-point-ref={cp_ref} is not present at vnfd={}",
                text(vnfd, "id")
            )));
        };
        for (param, ro_key) in [("ip-address", "ip_address"), ("mac-address", "mac_address")] {
            if let Some(value) = cp.get(param).filter(|v| is_set(v)) {
                populate(
                    ro,
                    &["vnfs", &index, "vdus", &vdu_id, "interfaces", &iface_name, ro_key],
                    value.clone(),
                );
            }
        }
    }
    Ok(())
}

/// Present and truthy in the loose sense descriptors use
fn is_set(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Number(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vnfd() -> Value {
        json!({
            "_id": "vnfd-uuid",
            "id": "hackfest-vnf",
            "_admin": {"storage": {}},
            "vnf-configuration": {
                "juju": {"charm": "simple"},
                "config-access": {"ssh-access": {"required": true}}
            },
            "mgmt-interface": {"cp": "vnf-mgmt"},
            "scaling-group-descriptor": [],
            "vdu": [{
                "id": "mgmtVM",
                "cloud-init": "#cloud-config\npassword: {{ password }}\n",
                "interface": [
                    {"name": "eth0", "external-connection-point-ref": "vnf-mgmt"},
                    {"name": "eth1", "internal-connection-point-ref": "data-cp"}
                ]
            }]
        })
    }

    fn nsd() -> Value {
        json!({
            "_id": "nsd-uuid",
            "id": "hackfest-ns",
            "constituent-vnfd": [
                {"member-vnf-index": "1", "vnfd-id-ref": "hackfest-vnf"},
                {"member-vnf-index": "2", "vnfd-id-ref": "hackfest-vnf"}
            ],
            "vld": [{
                "id": "mgmtnet",
                "vnfd-connection-point-ref": [
                    {"member-vnf-index-ref": "1", "vnfd-connection-point-ref": "vnf-mgmt"},
                    {"member-vnf-index-ref": "2", "vnfd-connection-point-ref": "vnf-mgmt"}
                ]
            }]
        })
    }

    fn accounts() -> AccountDirectory {
        AccountDirectory::new().with_vim(
            "vim-1",
            json!({"_admin": {"operationalState": "ENABLED", "deployed": {"RO": "ro-vim-1"}}}),
        )
    }

    fn vnfds() -> HashMap<String, Value> {
        HashMap::from([("hackfest-vnf".to_string(), vnfd())])
    }

    #[test]
    fn vnfd_copy_drops_management_sections_and_renders_cloud_init() {
        let params = json!({"password": "osm4u"});
        let ro = vnfd_to_ro(&vnfd(), "nsr.0.1", Some(&params)).expect("translated");
        assert_eq!(ro["id"], "nsr.0.1");
        assert!(ro.get("_admin").is_none());
        assert!(ro.get("vnf-configuration").is_none());
        assert!(ro.get("scaling-group-descriptor").is_none());
        assert_eq!(ro["vdu"][0]["cloud-init"], "#cloud-config\npassword: osm4u\n");
    }

    #[test]
    fn missing_cloud_init_variable_is_reported() {
        let err = vnfd_to_ro(&vnfd(), "x", None).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Variable 'password' defined at vnfd[id=hackfest-vnf]:vdu[id=mgmtVM]"));
    }

    #[test]
    fn nsd_copy_points_at_registered_vnfds() {
        let ids = HashMap::from([
            ("1".to_string(), "nsr.0.1".to_string()),
            ("2".to_string(), "nsr.1.2".to_string()),
        ]);
        let ro = nsd_to_ro(&nsd(), "nsr.2.hackfest-ns", &ids);
        assert_eq!(ro["id"], "nsr.2.hackfest-ns");
        assert!(ro.get("_id").is_none());
        assert_eq!(ro["constituent-vnfd"][1]["vnfd-id-ref"], "nsr.1.2");
        assert_eq!(ro["vld"][0]["vnfd-connection-point-ref"][0]["vnfd-id-ref"], "nsr.0.1");
    }

    #[test]
    fn ip_profile_is_renamed() {
        let ro = ip_profile_to_ro(&json!({
            "ip-version": "ipv4",
            "dns-server": [{"address": "8.8.8.8"}, {"address": "1.1.1.1"}],
            "dhcp-params": {"enabled": true}
        }));
        assert_eq!(ro["ip-version"], "IPv4");
        assert_eq!(ro["dns-address"], json!(["8.8.8.8", "1.1.1.1"]));
        assert_eq!(ro["dhcp"], json!({"enabled": true}));
        assert!(ro.get("dhcp-params").is_none());
    }

    #[test]
    fn params_map_accounts_keys_and_addresses() {
        let params = json!({
            "vimAccountId": "vim-1",
            "ssh_keys": ["ssh-rsa AAA"],
            "vld": [{
                "name": "mgmtnet",
                "vim-network-name": "mgmt",
                "vnfd-connection-point-ref": [{
                    "member-vnf-index-ref": "2",
                    "vnfd-connection-point-ref": "vnf-mgmt",
                    "ip-address": "10.0.0.12"
                }]
            }]
        });
        let keys = vec!["vca-key".to_string()];
        let ro = ns_params_to_ro(&params, &nsd(), &vnfds(), &keys, &accounts()).expect("params");
        assert_eq!(ro["datacenter"], "ro-vim-1");
        assert_eq!(ro["wim_account"], Value::Null);
        assert_eq!(ro["cloud-config"]["key-pairs"], json!(["ssh-rsa AAA"]));
        assert_eq!(ro["vnfs"]["1"]["vdus"]["mgmtVM"]["mgmt_keys"], json!(["vca-key"]));
        assert_eq!(ro["networks"]["mgmtnet"]["sites"], json!([{"netmap-use": "mgmt"}]));
        assert_eq!(
            ro["vnfs"]["2"]["vdus"]["mgmtVM"]["interfaces"]["eth0"]["ip_address"],
            "10.0.0.12"
        );
    }

    #[test]
    fn disabled_vim_is_rejected() {
        let accounts = AccountDirectory::new().with_vim(
            "vim-1",
            json!({"_admin": {"operationalState": "ERROR"}}),
        );
        let err = ns_params_to_ro(&json!({"vimAccountId": "vim-1"}), &nsd(), &vnfds(), &[], &accounts)
            .unwrap_err();
        assert_eq!(err.to_string(), "VIM=vim-1 is not available. operationalState=ERROR");
    }

    #[test]
    fn unknown_member_index_is_rejected() {
        let params = json!({"vimAccountId": "vim-1", "vnf": [{"member-vnf-index": "9"}]});
        let err = ns_params_to_ro(&params, &nsd(), &vnfds(), &[], &accounts()).unwrap_err();
        assert!(err.to_string().contains("member-vnf-index=9 is not present"));
    }

    #[test]
    fn referenced_accounts_are_collected_once() {
        let params = json!({
            "vimAccountId": "a",
            "vnf": [{"vimAccountId": "b"}, {"vimAccountId": "a"}],
            "vld": [{"vim-network-name": {"c": "net"}, "wimAccountId": "w"}]
        });
        assert_eq!(referenced_vims(&params), vec!["a", "b", "c"]);
        assert_eq!(referenced_wims(&params), vec!["w"]);
    }
}
