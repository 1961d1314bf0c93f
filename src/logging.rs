//! # Structured Logging Module
//!
//! Installs the global tracing subscriber once per process and provides the
//! structured lines emitted when lifecycle operations reach a terminal state.

use chrono::Utc;
use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::constants::{OperationState, ResourceKind};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging. `RUST_LOG` wins over the configured level.
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

        let layer = if config.json {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(std::io::stdout().is_terminal())
                .with_filter(filter)
                .boxed()
        };

        // Embedders may already own the global subscriber
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            pid = std::process::id(),
            level = %config.level,
            json = config.json,
            "Structured logging initialized"
        );
    });
}

/// Log the terminal outcome of one lifecycle operation
pub fn log_operation(
    kind: ResourceKind,
    command: &str,
    resource_id: &str,
    operation_id: Option<&str>,
    state: OperationState,
    details: Option<&str>,
) {
    if state.is_failure() {
        tracing::warn!(
            topic = %kind,
            command = %command,
            resource_id = %resource_id,
            operation_id = operation_id,
            operation_state = %state,
            details = details,
            timestamp = %Utc::now().to_rfc3339(),
            "LCM_OPERATION"
        );
    } else {
        tracing::info!(
            topic = %kind,
            command = %command,
            resource_id = %resource_id,
            operation_id = operation_id,
            operation_state = %state,
            details = details,
            timestamp = %Utc::now().to_rfc3339(),
            "LCM_OPERATION"
        );
    }
}
