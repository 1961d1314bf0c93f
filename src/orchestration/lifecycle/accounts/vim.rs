use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{schema_version, strip_bookkeeping, AccountLcm};
use crate::connectors::RoItem;
use crate::constants::{collections, ResourceKind};
use crate::database::Filter;
use crate::errors::{LcmError, LcmResult};
use crate::orchestration::lifecycle::operation::OpProgress;
use crate::registry::HaOpType;
use crate::utils::json::{deep_str, str_of};

/// `config` fields of a VIM account stored encrypted
const ENCRYPTED_CONFIG_FIELDS: [&str; 4] = [
    "admin_password",
    "nsx_password",
    "vcenter_password",
    "vrops_password",
];

impl AccountLcm {
    /// Orchestrator id of the SDN controller a VIM refers to, waiting for
    /// any operation still running on that controller
    async fn vim_sdn_controller(&self, vim: &Value, progress: &mut OpProgress) -> LcmResult<Option<String>> {
        let Some(sdn_id) = deep_str(vim, "config.sdn-controller") else {
            return Ok(None);
        };
        progress.step(format!("Waiting for sdn-controller={sdn_id}"));
        self.ctx
            .ha
            .waitfor_related_ha(ResourceKind::Sdn, HaOpType::Any, Some(sdn_id))
            .await?;
        let sdn = self
            .ctx
            .db
            .get_required(collections::SDNS, &Filter::by_id(sdn_id))
            .await?;
        deep_str(&sdn, "_admin.deployed.RO")
            .map(|id| Some(id.to_string()))
            .ok_or_else(|| {
                LcmError::domain(format!(
                    "sdn-controller={sdn_id} is not available. Not deployed at RO"
                ))
            })
    }

    /// VIM descriptor for the orchestrator: bookkeeping and credentials
    /// removed, `vim_type` renamed to `type`
    fn vim_descriptor(vim: &Value, ro_sdn_id: Option<&str>) -> Value {
        let mut desc = strip_bookkeeping(vim, &["vim_tenant_name", "vim_user", "vim_password"]);
        if let Some(vim_type) = desc.remove("vim_type") {
            desc.insert("type".into(), vim_type);
        }
        if let (Some(ro_sdn_id), Some(config)) = (
            ro_sdn_id,
            desc.get_mut("config").and_then(Value::as_object_mut),
        ) {
            config.insert("sdn-controller".into(), json!(ro_sdn_id));
        }
        Value::Object(desc)
    }

    /// Tenant credentials for the orchestrator, secrets decrypted
    fn vim_account_descriptor(
        &self,
        vim_id: &str,
        vim: &Value,
        schema: Option<&str>,
    ) -> LcmResult<Value> {
        let mut desc = Map::new();
        for (key, ro_key) in [
            ("vim_tenant_name", "vim_tenant_name"),
            ("vim_user", "vim_username"),
            ("vim_password", "vim_password"),
        ] {
            if let Some(value) = vim.get(key) {
                desc.insert(ro_key.into(), value.clone());
            }
        }
        self.decrypt_field(&mut desc, "vim_password", schema, vim_id)?;

        if let Some(mut config) = vim.get("config").and_then(Value::as_object).cloned() {
            config.remove("sdn-controller");
            config.remove("sdn-port-mapping");
            for field in ENCRYPTED_CONFIG_FIELDS {
                self.decrypt_field(&mut config, field, schema, vim_id)?;
            }
            if !config.is_empty() {
                desc.insert("config".into(), Value::Object(config));
            }
        }
        Ok(Value::Object(desc))
    }

    pub(super) async fn vim_create(&self, vim_id: &str, progress: &mut OpProgress) -> LcmResult<()> {
        let vim = self.load_account(ResourceKind::Vim, vim_id, progress).await?;
        let ro_sdn_id = self.vim_sdn_controller(&vim, progress).await?;

        progress.step("Creating vim at RO");
        let created = self
            .ctx
            .ro
            .create(RoItem::Vim, Self::vim_descriptor(&vim, ro_sdn_id.as_deref()))
            .await?;
        let ro_vim_id = str_of(&created, "uuid").unwrap_or_default().to_string();
        progress.set_resource("_admin.deployed.RO", ro_vim_id.clone());
        self.write_account(ResourceKind::Vim, vim_id, progress).await?;
        debug!(vim_id, ro_vim_id = %ro_vim_id, "vim created at RO");

        progress.step("Creating vim_account at RO");
        let account = self.vim_account_descriptor(vim_id, &vim, schema_version(&vim))?;
        let attached = self
            .ctx
            .ro
            .attach(RoItem::VimAccount, &ro_vim_id, account)
            .await?;
        progress.set_resource(
            "_admin.deployed.RO-account",
            str_of(&attached, "uuid").unwrap_or_default(),
        );
        Self::enable(progress);
        info!(vim_id, "vim account enabled");
        Ok(())
    }

    /// Push the edited fields to the orchestrator. A VIM never deployed
    /// there only changes state.
    pub(super) async fn vim_edit(
        &self,
        vim_id: &str,
        content: &Value,
        progress: &mut OpProgress,
    ) -> LcmResult<()> {
        let vim = self.load_account(ResourceKind::Vim, vim_id, progress).await?;
        if let Some(ro_vim_id) = deep_str(&vim, "_admin.deployed.RO") {
            let ro_sdn_id = if deep_str(content, "config.sdn-controller").is_some() {
                self.vim_sdn_controller(content, progress).await?
            } else {
                None
            };

            progress.step("Editing vim at RO");
            let desc = Self::vim_descriptor(content, ro_sdn_id.as_deref());
            if desc.as_object().is_some_and(|fields| !fields.is_empty()) {
                self.ctx.ro.edit(RoItem::Vim, ro_vim_id, desc).await?;
            }

            progress.step("Editing vim_account at RO");
            let account = self.vim_account_descriptor(vim_id, content, schema_version(&vim))?;
            if account.as_object().is_some_and(|fields| !fields.is_empty()) {
                self.ctx.ro.edit(RoItem::VimAccount, ro_vim_id, account).await?;
            }
        }
        Self::enable(progress);
        Ok(())
    }

    pub(super) async fn vim_delete(&self, vim_id: &str, progress: &mut OpProgress) -> LcmResult<()> {
        let vim = self.load_account(ResourceKind::Vim, vim_id, progress).await?;
        if let Some(ro_vim_id) = deep_str(&vim, "_admin.deployed.RO") {
            progress.step("Detaching vim_account from RO");
            match self.ctx.ro.detach(RoItem::VimAccount, ro_vim_id).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => debug!(vim_id, "vim_account already detached"),
                Err(e) => return Err(e.into()),
            }
            progress.step("Deleting vim from RO");
            match self.ctx.ro.delete(RoItem::Vim, ro_vim_id).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => debug!(vim_id, "vim already deleted"),
                Err(e) => return Err(e.into()),
            }
        }
        self.remove_account(ResourceKind::Vim, vim_id, progress).await
    }
}
