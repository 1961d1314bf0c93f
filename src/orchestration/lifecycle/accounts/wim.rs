use serde_json::{Map, Value};
use tracing::debug;

use super::{schema_version, strip_bookkeeping, AccountLcm};
use crate::connectors::RoItem;
use crate::constants::ResourceKind;
use crate::errors::LcmResult;
use crate::orchestration::lifecycle::operation::OpProgress;
use crate::utils::json::{deep_str, str_of};

impl AccountLcm {
    fn wim_descriptor(wim: &Value) -> Value {
        let mut desc = strip_bookkeeping(wim, &["wim_user", "wim_password"]);
        if let Some(wim_type) = desc.remove("wim_type") {
            desc.insert("type".into(), wim_type);
        }
        Value::Object(desc)
    }

    fn wim_account_descriptor(
        &self,
        wim_id: &str,
        wim: &Value,
        schema: Option<&str>,
    ) -> LcmResult<Value> {
        let mut desc = Map::new();
        for (key, ro_key) in [("name", "name"), ("wim_user", "user"), ("wim_password", "password")] {
            if let Some(value) = wim.get(key) {
                desc.insert(ro_key.into(), value.clone());
            }
        }
        self.decrypt_field(&mut desc, "password", schema, wim_id)?;
        if let Some(mut config) = wim.get("config").and_then(Value::as_object).cloned() {
            config.remove("wim_port_mapping");
            if !config.is_empty() {
                desc.insert("config".into(), Value::Object(config));
            }
        }
        Ok(Value::Object(desc))
    }

    pub(super) async fn wim_create(&self, wim_id: &str, progress: &mut OpProgress) -> LcmResult<()> {
        let wim = self.load_account(ResourceKind::Wim, wim_id, progress).await?;

        progress.step("Creating wim at RO");
        let created = self
            .ctx
            .ro
            .create(RoItem::Wim, Self::wim_descriptor(&wim))
            .await?;
        let ro_wim_id = str_of(&created, "uuid").unwrap_or_default().to_string();
        progress.set_resource("_admin.deployed.RO", ro_wim_id.clone());
        self.write_account(ResourceKind::Wim, wim_id, progress).await?;

        progress.step("Creating wim_account at RO");
        let account = self.wim_account_descriptor(wim_id, &wim, schema_version(&wim))?;
        let attached = self
            .ctx
            .ro
            .attach(RoItem::WimAccount, &ro_wim_id, account)
            .await?;
        progress.set_resource(
            "_admin.deployed.RO-account",
            str_of(&attached, "uuid").unwrap_or_default(),
        );
        Self::enable(progress);
        Ok(())
    }

    pub(super) async fn wim_edit(
        &self,
        wim_id: &str,
        content: &Value,
        progress: &mut OpProgress,
    ) -> LcmResult<()> {
        let wim = self.load_account(ResourceKind::Wim, wim_id, progress).await?;
        if let Some(ro_wim_id) = deep_str(&wim, "_admin.deployed.RO") {
            progress.step("Editing wim at RO");
            let desc = Self::wim_descriptor(content);
            if desc.as_object().is_some_and(|fields| !fields.is_empty()) {
                self.ctx.ro.edit(RoItem::Wim, ro_wim_id, desc).await?;
            }
            progress.step("Editing wim_account at RO");
            let account = self.wim_account_descriptor(wim_id, content, schema_version(&wim))?;
            if account.as_object().is_some_and(|fields| !fields.is_empty()) {
                self.ctx.ro.edit(RoItem::WimAccount, ro_wim_id, account).await?;
            }
        }
        Self::enable(progress);
        Ok(())
    }

    pub(super) async fn wim_delete(&self, wim_id: &str, progress: &mut OpProgress) -> LcmResult<()> {
        let wim = self.load_account(ResourceKind::Wim, wim_id, progress).await?;
        if let Some(ro_wim_id) = deep_str(&wim, "_admin.deployed.RO") {
            progress.step("Detaching wim_account from RO");
            match self.ctx.ro.detach(RoItem::WimAccount, ro_wim_id).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => debug!(wim_id, "wim_account already detached"),
                Err(e) => return Err(e.into()),
            }
            progress.step("Deleting wim from RO");
            match self.ctx.ro.delete(RoItem::Wim, ro_wim_id).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => debug!(wim_id, "wim already deleted"),
                Err(e) => return Err(e.into()),
            }
        }
        self.remove_account(ResourceKind::Wim, wim_id, progress).await
    }
}
