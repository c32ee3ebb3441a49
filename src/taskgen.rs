//! The instancing engine. Each (task, token) pair has a cached generated
//! instance that is Absent, Stale or Fresh; staleness is decided by
//! comparing the generation-timestamp sidecar against the generation
//! config's mtime. Regeneration is an idempotent overwrite, so concurrent
//! requests for the same token may race safely.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info};
use tokio::task::spawn_blocking;
use tokio::time::timeout;

use crate::generators::GeneratorRegistry;
use crate::hierarchy;
use crate::models::{Task, TaskId};
use crate::store::ContentStore;
use crate::util::api_util::{
    log_server_error, APIError, ERROR_GENERATION, ERROR_GENERATION_PANIC,
    ERROR_GENERATION_TIMEOUT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Absent,
    Stale,
    Fresh,
}

pub struct InstancingEngine {
    store: Arc<ContentStore>,
    registry: Arc<GeneratorRegistry>,
    generator_timeout: Duration,
}

impl InstancingEngine {
    pub fn new(
        store: Arc<ContentStore>,
        registry: Arc<GeneratorRegistry>,
        generator_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            generator_timeout,
        }
    }

    /// Cache state for one (task, token). Missing artifacts of any kind —
    /// instance, sidecar, or the config file itself — read as Absent,
    /// never as an error.
    pub async fn instance_state(
        &self,
        task_id: TaskId,
        token: &str,
    ) -> Result<InstanceState, APIError> {
        let Some(stamp) = self.store.instance_stamp(task_id, token).await? else {
            return Ok(InstanceState::Absent);
        };
        if !self.store.instance_exists(task_id, token).await {
            return Ok(InstanceState::Absent);
        }
        let Some(config_mtime) = self.store.gen_config_mtime(task_id).await? else {
            return Ok(InstanceState::Absent);
        };
        if stamp < config_mtime {
            Ok(InstanceState::Stale)
        } else {
            Ok(InstanceState::Fresh)
        }
    }

    /// Serves the team-specific task, generating it first when the cache
    /// is Absent or Stale. Ensuring the config is a side effect: the first
    /// request for a task materializes its inherited generation config.
    pub async fn get_generated_task(
        &self,
        task_id: TaskId,
        token: &str,
    ) -> Result<Task, APIError> {
        let task = self.store.read_task(task_id).await?;
        hierarchy::ensure_generation_config(&self.store, &task).await?;

        if self.instance_state(task_id, token).await? == InstanceState::Fresh {
            if let Some(instance) = self.store.read_instance(task_id, token).await? {
                debug!("Serving cached instance of task {task_id} for token {token}");
                return Ok(instance);
            }
            // Instance vanished between the state check and the read.
        }
        self.generate(task_id, token).await
    }

    /// Runs the task's generator and publishes the result. The generator
    /// is blocking, third-party code: it runs off the async worker threads
    /// and under a timeout, and a failure is fatal for this request only —
    /// nothing half-written becomes observable.
    pub async fn generate(&self, task_id: TaskId, token: &str) -> Result<Task, APIError> {
        let raw = self.store.read_task(task_id).await?;
        let config = hierarchy::ensure_generation_config(&self.store, &raw).await?;
        let (generator, params) = self
            .registry
            .resolve(&config)
            .map_err(|e| log_server_error(e, "taskgen", ERROR_GENERATION))?;

        info!(
            "Generating task {task_id} for token {token} with generator {:?}",
            generator.name()
        );
        let token_owned = token.to_string();
        let handle = spawn_blocking(move || generator.generate(raw, &token_owned, &params));
        let generated = timeout(self.generator_timeout, handle)
            .await
            .map_err(|e| log_server_error(e, "taskgen", ERROR_GENERATION_TIMEOUT))?
            .map_err(|e| log_server_error(e, "taskgen", ERROR_GENERATION_PANIC))?
            .map_err(|e| log_server_error(e, "taskgen", ERROR_GENERATION))?;

        let stamp = Utc::now().timestamp();
        self.store
            .write_instance(task_id, token, &generated, stamp)
            .await?;
        Ok(generated)
    }
}
