use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_web::{HttpResponse, Responder, web};
use serde::Serialize;
use tracing::{error, trace};

use crate::storage::SessionStore;

// 应用启动时间结构体
#[derive(Clone, Debug)]
pub struct AppStartTime {
    pub start_datetime: chrono::DateTime<chrono::Utc>,
}

impl AppStartTime {
    pub fn now() -> Self {
        Self {
            start_datetime: chrono::Utc::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        (chrono::Utc::now() - self.start_datetime)
            .num_seconds()
            .max(0) as u64
    }
}

/// 就绪检查中存储 ping 的超时时间
pub const READINESS_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub backend: &'static str,
    pub uptime: u64,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct HealthService;

impl HealthService {
    // 活跃性检查，进程存活即可
    pub async fn liveness_check() -> impl Responder {
        trace!("Received liveness check request");

        HttpResponse::Ok()
            .append_header(("Content-Type", "text/plain"))
            .body("OK")
    }

    /// 就绪检查：存储后端必须在超时内响应
    pub async fn readiness_check(
        store: web::Data<Arc<dyn SessionStore>>,
        app_start_time: web::Data<AppStartTime>,
    ) -> impl Responder {
        let start_time = Instant::now();
        trace!("Received readiness check request");

        let error = match tokio::time::timeout(READINESS_TIMEOUT, store.ping()).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                error!("Storage readiness check failed: {}", e);
                Some(e.format_simple())
            }
            Err(_) => {
                error!("Storage readiness check timeout");
                Some("timeout".to_string())
            }
        };

        let is_ready = error.is_none();
        let body = ReadinessResponse {
            status: if is_ready { "ready" } else { "unavailable" },
            backend: store.backend_name(),
            uptime: app_start_time.uptime_seconds(),
            response_time_ms: start_time.elapsed().as_millis() as u64,
            error,
        };

        if is_ready {
            HttpResponse::Ok().json(body)
        } else {
            HttpResponse::ServiceUnavailable().json(body)
        }
    }
}

/// Health 路由配置
pub fn health_routes() -> actix_web::Scope {
    web::scope("/health")
        .route("/live", web::get().to(HealthService::liveness_check))
        .route("/live", web::head().to(HealthService::liveness_check))
        .route("/ready", web::get().to(HealthService::readiness_check))
        .route("/ready", web::head().to(HealthService::readiness_check))
}
