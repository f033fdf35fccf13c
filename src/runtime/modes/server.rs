//! Server mode
//!
//! Starts the HTTP collector with the collect and health routes.

use actix_web::{
    App, HttpServer,
    middleware::{Compress, DefaultHeaders},
    web,
};
use anyhow::Result;
use tracing::warn;

use crate::api::services::{AppStartTime, CollectState, collect_routes, health_routes};
use crate::runtime::lifetime;

/// 采集请求体上限
const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Run the HTTP server
///
/// **Note**: Configuration and logging must be initialized before calling this function
pub async fn run_server() -> Result<()> {
    let app_start_time = AppStartTime::now();
    let config = crate::config::get_config();

    let startup = lifetime::startup::prepare_server_startup(&config)
        .await
        .map_err(|e| {
            tracing::error!("Server startup failed: {}", e);
            e
        })?;

    let store = startup.store.clone();
    let collect_state = web::Data::new(
        CollectState::new(startup.engine.clone(), startup.cookies.clone())
            .with_trusted_proxies(config.server.trusted_proxies.clone()),
    );

    if config.server.trusted_proxies.is_empty() {
        warn!(
            "Client IP: Auto-detect mode enabled. \
             Connections from private IPs will use X-Forwarded-For. \
             To disable, configure server.trusted_proxies explicitly."
        );
    } else {
        warn!(
            "Client IP: Explicit trusted proxies configured: {:?}",
            config.server.trusted_proxies
        );
    }

    let cpu_count = config.server.cpu_count.clamp(1, 32);
    warn!("Using {} CPU cores for the server", cpu_count);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Compress::default())
            .wrap(DefaultHeaders::new().add(("Connection", "keep-alive")))
            .app_data(collect_state.clone())
            .app_data(web::Data::new(store.clone()))
            .app_data(web::Data::new(app_start_time.clone()))
            .app_data(web::PayloadConfig::new(MAX_PAYLOAD_BYTES))
            .service(collect_routes())
            .service(health_routes())
    })
    .keep_alive(std::time::Duration::from_secs(30))
    .client_request_timeout(std::time::Duration::from_millis(5000))
    .client_disconnect_timeout(std::time::Duration::from_millis(1000))
    .workers(cpu_count);

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    warn!("Starting collector at http://{}", bind_address);
    let server = server.bind(bind_address)?.run();

    tokio::select! {
        res = server => {
            res?;
        }
        _ = lifetime::shutdown::listen_for_shutdown() => {
            warn!("Graceful shutdown complete");
        }
    }

    Ok(())
}
