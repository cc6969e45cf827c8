use crate::environment::Environment;
use crate::store::Store;
use statline_core::{Result, ServerConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// Registry of live environments, one per tenant.
///
/// Each environment sits behind its own mutex so ingest, commit and process
/// operations on one tenant never interleave, while tenants proceed in
/// parallel.
pub struct Environments {
    config: Arc<ServerConfig>,
    store: Arc<dyn Store>,
    envs: RwLock<HashMap<String, Arc<Mutex<Environment>>>>,
}

impl Environments {
    pub fn new(config: Arc<ServerConfig>, store: Arc<dyn Store>) -> Self {
        Self {
            config,
            store,
            envs: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Returns the environment of `tenant`, creating it from the last stored
    /// snapshot on first access.
    pub async fn get_or_create(&self, tenant: &str) -> Result<Arc<Mutex<Environment>>> {
        if let Some(env) = self.get(tenant).await {
            return Ok(env);
        }

        let initial = self.store.load_status(tenant).await?;
        let env = Environment::new(tenant, &self.config, initial)?;

        let mut envs = self.envs.write().await;
        // a concurrent first access may have won the race
        let env = envs
            .entry(tenant.to_string())
            .or_insert_with(|| {
                info!("Created environment for tenant '{}'", tenant);
                Arc::new(Mutex::new(env))
            })
            .clone();
        Ok(env)
    }

    pub async fn get(&self, tenant: &str) -> Option<Arc<Mutex<Environment>>> {
        self.envs.read().await.get(tenant).cloned()
    }

    pub async fn all(&self) -> Vec<Arc<Mutex<Environment>>> {
        self.envs.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.envs.read().await.len()
    }
}
