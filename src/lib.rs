pub mod api;
pub mod util;

pub mod generators;
pub mod hierarchy;
pub mod models;
pub mod store;
pub mod taskgen;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::warn;

use crate::generators::GeneratorRegistry;
use crate::store::ContentStore;
use crate::taskgen::InstancingEngine;
use crate::util::cache::Cache;

pub const TASK_SEED_LENGTH: usize = 16;
pub const TEAM_SEED_LENGTH: usize = 28;
pub const GLOBAL_SEED_LENGTH: usize = 32;
pub const TOKEN_LENGTH: usize = 56;
pub const HINT_HEXID_LENGTH: usize = 32;

/// Runtime configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub presets_dir: PathBuf,
    pub min_submission_interval: Duration,
    pub generator_timeout: Duration,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            data_dir: env_or("DATA_DIR", "db").into(),
            presets_dir: env_or("GEN_PRESETS_DIR", "presets/gen").into(),
            min_submission_interval: Duration::from_secs(env_secs(
                "MIN_SUBMISSION_INTERVAL",
                30,
            )),
            generator_timeout: Duration::from_secs(env_secs("GENERATOR_TIMEOUT", 60)),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_secs(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring unparsable {name}={raw:?}, using {default}");
            default
        }),
        Err(_) => default,
    }
}

/// Shared application state: the content store, the instancing engine over
/// it, and the read caches. One per process.
pub struct App {
    pub settings: Settings,
    pub store: Arc<ContentStore>,
    pub engine: InstancingEngine,
    pub cache: Cache,
}

impl App {
    pub fn new(settings: Settings, registry: GeneratorRegistry) -> Self {
        let store = Arc::new(ContentStore::new(
            settings.data_dir.clone(),
            settings.presets_dir.clone(),
        ));
        let engine = InstancingEngine::new(
            Arc::clone(&store),
            Arc::new(registry),
            settings.generator_timeout,
        );
        let cache = Cache::new(Arc::clone(&store));
        Self {
            settings,
            store,
            engine,
            cache,
        }
    }
}

pub trait Ext<R>: Sized {
    fn tap_mut(mut self, f: impl FnOnce(&mut Self) -> R) -> Self {
        f(&mut self);
        self
    }

    fn tap(self, f: impl FnOnce(&Self) -> R) -> Self {
        f(&self);
        self
    }
}

impl<T, R> Ext<R> for T {}
