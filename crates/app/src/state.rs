//! Service state: resolved configuration plus the opened document store

use std::path::PathBuf;
use std::sync::Arc;

use directories::ProjectDirs;
use santa_core::{Config, DocumentStore, MemoryStore, Result, SqliteStore, StoreBackend};

use crate::Args;

/// Config file looked up when `--config` is not given
const CONFIG_FILE: &str = "santa.toml";

pub struct ServiceState {
    pub config: Config,
    pub store: Arc<dyn DocumentStore>,
}

impl ServiceState {
    pub fn new(args: &Args) -> Result<Self> {
        let config = resolve_config(args)?;
        let store = open_store(&config)?;
        Ok(Self { config, store })
    }
}

/// File config (explicit, or the default location if present) with CLI overrides on top
pub fn resolve_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => {
                tracing::info!(path = %path.display(), "Using default config file");
                Config::load(&path)?
            }
            None => Config::default(),
        },
    };

    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.memory {
        config.store.backend = StoreBackend::Memory;
    }

    Ok(config)
}

fn default_config_path() -> Option<PathBuf> {
    let dirs = ProjectDirs::from("dev", "onyx", "secret-santa")?;
    Some(dirs.config_dir().join(CONFIG_FILE))
}

pub fn open_store(config: &Config) -> Result<Arc<dyn DocumentStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; rooms are lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Sqlite => {
            let db_path = config.database_path()?;

            // Ensure parent directory exists
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            tracing::info!(path = %db_path.display(), "Opening room database");
            Ok(Arc::new(SqliteStore::open(&db_path)?))
        }
    }
}
