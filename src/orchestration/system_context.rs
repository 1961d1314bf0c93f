//! Shared dependencies of the dispatcher and the lifecycle engines.

use std::sync::Arc;
use tracing::info;

use crate::config::LcmConfig;
use crate::connectors::{K8sConnector, RoClient, VcaConnector};
use crate::database::{DocumentStore, PostgresStore, SecretCipher};
use crate::errors::{LcmError, LcmResult};
use crate::messaging::{MessageBus, PgmqBus};
use crate::registry::{HaCoordinator, TaskRegistry};

/// Dependency injection container built once per process
///
/// Holds:
/// - configuration and this worker's identity
/// - the document store and message bus
/// - the external collaborators (RO, VCA, K8s)
/// - the task registry and HA coordinator
pub struct SystemContext {
    pub worker_id: String,
    pub config: Arc<LcmConfig>,
    pub db: Arc<dyn DocumentStore>,
    pub bus: Arc<dyn MessageBus>,
    pub ro: Arc<dyn RoClient>,
    pub vca: Arc<dyn VcaConnector>,
    pub k8s: Arc<dyn K8sConnector>,
    pub tasks: Arc<TaskRegistry>,
    pub ha: HaCoordinator,
}

impl std::fmt::Debug for SystemContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemContext")
            .field("worker_id", &self.worker_id)
            .field("db", &"Arc<dyn DocumentStore>")
            .field("bus", &"Arc<dyn MessageBus>")
            .field("ro", &"Arc<dyn RoClient>")
            .field("vca", &"Arc<dyn VcaConnector>")
            .field("k8s", &"Arc<dyn K8sConnector>")
            .field("tasks", &"Arc<TaskRegistry>")
            .finish()
    }
}

impl SystemContext {
    pub fn new(
        config: LcmConfig,
        db: Arc<dyn DocumentStore>,
        bus: Arc<dyn MessageBus>,
        ro: Arc<dyn RoClient>,
        vca: Arc<dyn VcaConnector>,
        k8s: Arc<dyn K8sConnector>,
    ) -> Self {
        let worker_id = config
            .global
            .worker_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let ha = HaCoordinator::new(
            db.clone(),
            worker_id.clone(),
            config.intervals.ha_related(),
            config.timeouts.related_tasks(),
        );
        info!(worker_id = %worker_id, "System context initialized");
        Self {
            worker_id,
            config: Arc::new(config),
            db,
            bus,
            ro,
            vca,
            k8s,
            tasks: Arc::new(TaskRegistry::new()),
            ha,
        }
    }

    /// Build a context backed by PostgreSQL: JSONB documents and pgmq queues
    /// on one shared pool
    pub async fn with_postgres(
        mut config: LcmConfig,
        ro: Arc<dyn RoClient>,
        vca: Arc<dyn VcaConnector>,
        k8s: Arc<dyn K8sConnector>,
    ) -> LcmResult<Self> {
        let worker_id = config
            .global
            .worker_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone();
        let cipher = SecretCipher::new(config.database.secret_key.as_deref());
        let store = PostgresStore::connect(
            &config.database.url,
            config.database.max_connections,
            cipher,
        )
        .await
        .map_err(LcmError::from)?;
        let bus = PgmqBus::new_with_pool(
            store.pool().clone(),
            worker_id,
            config.message.visibility_timeout_seconds,
        )
        .await;
        Ok(Self::new(
            config,
            Arc::new(store),
            Arc::new(bus),
            ro,
            vca,
            k8s,
        ))
    }
}
