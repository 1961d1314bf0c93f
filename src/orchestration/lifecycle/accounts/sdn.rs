use serde_json::Value;
use tracing::debug;

use super::{schema_version, strip_bookkeeping, AccountLcm};
use crate::connectors::RoItem;
use crate::constants::ResourceKind;
use crate::errors::LcmResult;
use crate::orchestration::lifecycle::operation::OpProgress;
use crate::utils::json::{deep_str, str_of};

impl AccountLcm {
    fn sdn_descriptor(&self, sdn_id: &str, sdn: &Value, schema: Option<&str>) -> LcmResult<Value> {
        let mut desc = strip_bookkeeping(sdn, &["description"]);
        self.decrypt_field(&mut desc, "password", schema, sdn_id)?;
        Ok(Value::Object(desc))
    }

    pub(super) async fn sdn_create(&self, sdn_id: &str, progress: &mut OpProgress) -> LcmResult<()> {
        let sdn = self.load_account(ResourceKind::Sdn, sdn_id, progress).await?;
        progress.step("Creating sdn at RO");
        let desc = self.sdn_descriptor(sdn_id, &sdn, schema_version(&sdn))?;
        let created = self.ctx.ro.create(RoItem::Sdn, desc).await?;
        progress.set_resource(
            "_admin.deployed.RO",
            str_of(&created, "uuid").unwrap_or_default(),
        );
        Self::enable(progress);
        Ok(())
    }

    pub(super) async fn sdn_edit(
        &self,
        sdn_id: &str,
        content: &Value,
        progress: &mut OpProgress,
    ) -> LcmResult<()> {
        let sdn = self.load_account(ResourceKind::Sdn, sdn_id, progress).await?;
        if let Some(ro_sdn_id) = deep_str(&sdn, "_admin.deployed.RO") {
            progress.step("Editing sdn at RO");
            let desc = self.sdn_descriptor(sdn_id, content, schema_version(&sdn))?;
            if desc.as_object().is_some_and(|fields| !fields.is_empty()) {
                self.ctx.ro.edit(RoItem::Sdn, ro_sdn_id, desc).await?;
            }
        }
        Self::enable(progress);
        Ok(())
    }

    pub(super) async fn sdn_delete(&self, sdn_id: &str, progress: &mut OpProgress) -> LcmResult<()> {
        let sdn = self.load_account(ResourceKind::Sdn, sdn_id, progress).await?;
        if let Some(ro_sdn_id) = deep_str(&sdn, "_admin.deployed.RO") {
            progress.step("Deleting sdn from RO");
            match self.ctx.ro.delete(RoItem::Sdn, ro_sdn_id).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => debug!(sdn_id, "sdn already deleted"),
                Err(e) => return Err(e.into()),
            }
        }
        self.remove_account(ResourceKind::Sdn, sdn_id, progress).await
    }
}
