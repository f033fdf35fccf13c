use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::api::cookies::SessionCookieBuilder;
use crate::config::StaticConfig;
use crate::storage::{SessionStore, StorageFactory};
use crate::tracking::{AttributionEngine, TrackerSettings};

pub struct StartupContext {
    pub store: Arc<dyn SessionStore>,
    pub engine: Arc<AttributionEngine>,
    pub cookies: SessionCookieBuilder,
}

/// 创建存储后端与归因引擎
pub async fn prepare_engine(
    config: &StaticConfig,
) -> Result<(Arc<dyn SessionStore>, Arc<AttributionEngine>)> {
    let store = StorageFactory::create(&config.storage)
        .await
        .context("Failed to create session storage")?;

    let settings = TrackerSettings::from_config(config);
    if settings.cache_expiration.is_none() {
        warn!("tracking.cache_expiration is 0: sessions never expire");
    }
    debug!(
        "Tracker settings: session key '{}', cache key '{}', expiration {:?}",
        settings.session_key, settings.cache_key, settings.cache_expiration
    );

    let engine = Arc::new(AttributionEngine::new(store.clone(), settings));
    Ok((store, engine))
}

/// 准备服务器启动的上下文
pub async fn prepare_server_startup(config: &StaticConfig) -> Result<StartupContext> {
    let start_time = std::time::Instant::now();
    debug!("Starting pre-startup processing...");

    let (store, engine) = prepare_engine(config).await?;
    let cookies = SessionCookieBuilder::from_config(&config.cookie);

    info!(
        "Pre-startup processing completed in {:?} (storage: {})",
        start_time.elapsed(),
        store.backend_name()
    );

    Ok(StartupContext {
        store,
        engine,
        cookies,
    })
}
