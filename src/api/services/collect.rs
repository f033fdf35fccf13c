//! 采集端点
//!
//! 浏览器端脚本通过 `/collect` 上报页面访问，参数协议：
//!
//! | 参数 | 含义 |
//! |---|---|
//! | `url` / `urlref` | 当前页面 / 来源页面 |
//! | `sid` | 站点 ID |
//! | `ces` | 会话过期秒数 |
//! | `apnd` `ignr` `fattr` `cmpst` | 逗号分隔的参数列表 |
//! | `<session_key>` / `link_<session_key>` | 会话 ID / 需要关联的旧会话 ID |
//! | `snew` | 新会话标记 |
//! | `uid` | 已知用户 ID |
//! | `cdata` | JSON 对象形式的自定义字段 |
//! | `send_image` / `send_js` | 响应格式 |

use std::sync::Arc;

use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse, Responder, web};
use tracing::{debug, trace, warn};

use crate::api::cookies::SessionCookieBuilder;
use crate::errors::CalibanError;
use crate::tracking::classifier::link_param_name;
use crate::tracking::{AttributionEngine, RequestContext, TrackOutcome, TrackingOptions};
use crate::utils::ip::extract_client_ip;
use crate::utils::{QueryParams, parse_bool_flag, split_list};

/// 1x1 透明 GIF
pub const TRANSPARENT_GIF: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00, 0x00, 0x00,
    0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

/// 保存失败或参数校验失败时附带的响应头
pub const ERROR_HEADER: &str = "X-Caliban-Error";

const NO_CACHE: &str = "no-cache, no-store, max-age=0, must-revalidate";
const EXPIRED_DATE: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// 采集端点共享状态
pub struct CollectState {
    pub engine: Arc<AttributionEngine>,
    pub cookies: SessionCookieBuilder,
    pub trusted_proxies: Vec<String>,
}

impl CollectState {
    pub fn new(engine: Arc<AttributionEngine>, cookies: SessionCookieBuilder) -> Self {
        Self {
            engine,
            cookies,
            trusted_proxies: Vec::new(),
        }
    }

    pub fn with_trusted_proxies(mut self, proxies: Vec<String>) -> Self {
        self.trusted_proxies = proxies;
        self
    }
}

/// 响应格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectResponse {
    Image,
    Script,
    Text,
}

impl CollectResponse {
    fn from_params(params: &QueryParams) -> Self {
        if params.get("send_image").is_some() {
            CollectResponse::Image
        } else if params.get("send_js").is_some() {
            CollectResponse::Script
        } else {
            CollectResponse::Text
        }
    }
}

/// 将上报参数转换为引擎选项
///
/// 返回的错误只用于反馈给调用方，请求仍然会被处理。
pub fn parse_tracker_params(
    params: &QueryParams,
    session_key: &str,
) -> (TrackingOptions, Vec<CalibanError>) {
    let mut opts = TrackingOptions::new();
    let mut errors = Vec::new();

    opts.property_id = params.get("sid").map(str::to_string);

    if let Some(raw) = params.get("ces") {
        match TrackingOptions::parse_cache_expiration(raw) {
            Ok(seconds) => opts.cache_expiration = Some(seconds),
            Err(e) => {
                warn!("Rejected cache expiration override: {}", e);
                errors.push(e);
            }
        }
    }

    if let Some(raw) = params.get("apnd") {
        opts.append_params = split_list(raw);
    }
    if let Some(raw) = params.get("ignr") {
        opts.ignore_params = split_list(raw);
    }
    if let Some(raw) = params.get("fattr") {
        opts.first_attribution_params = split_list(raw);
    }
    if let Some(raw) = params.get("cmpst") {
        opts.campaign_start_params = split_list(raw);
    }

    if let Some(id) = params.get(session_key) {
        opts = opts.session_id(id);
    }
    if let Some(raw) = params.get(&link_param_name(session_key)) {
        opts.linked_session_ids = split_list(raw);
    }

    if let Some(raw) = params.get_raw("snew") {
        opts.new_session = parse_bool_flag(raw);
    }

    if let Some(uid) = params.get("uid") {
        opts = opts.user_id(uid);
    }

    // 格式错误的自定义数据直接忽略
    if let Some(raw) = params.get("cdata") {
        match TrackingOptions::parse_custom_data(raw) {
            Ok(map) => opts.custom_data = map,
            Err(e) => debug!("Ignoring custom data: {}", e),
        }
    }

    (opts, errors)
}

/// 构建被跟踪页面的请求上下文
///
/// 采集请求本身不是被跟踪的页面：URL 优先取 `url` 参数，否则取 Referer。
pub fn build_context(
    params: &QueryParams,
    req: &HttpRequest,
    trusted_proxies: &[String],
) -> RequestContext {
    let url = params
        .get("url")
        .map(str::to_string)
        .or_else(|| {
            req.headers()
                .get(header::REFERER)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_default();

    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    let cookies: Vec<(String, String)> = req
        .cookies()
        .map(|jar| {
            jar.iter()
                .map(|c| (c.name().to_string(), c.value().to_string()))
                .collect()
        })
        .unwrap_or_default();

    RequestContext::new(url)
        .with_referrer(params.get("urlref").unwrap_or_default())
        .with_client_ip(extract_client_ip(req, trusted_proxies))
        .with_user_agent(user_agent)
        .with_cookies(cookies)
}

/// 请求体：表单或 JSON 对象
fn parse_body(body: &[u8]) -> QueryParams {
    let Ok(text) = std::str::from_utf8(body) else {
        return QueryParams::new();
    };
    let text = text.trim();
    if text.is_empty() {
        return QueryParams::new();
    }

    if text.starts_with('{') {
        return match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(text) {
            Ok(map) => map
                .into_iter()
                .filter_map(|(k, v)| match v {
                    serde_json::Value::String(s) => Some((k, s)),
                    serde_json::Value::Null => None,
                    other => Some((k, other.to_string())),
                })
                .collect(),
            Err(e) => {
                debug!("Ignoring malformed JSON body: {}", e);
                QueryParams::new()
            }
        };
    }

    QueryParams::parse(text)
}

/// 响应头只能包含可见 ASCII
fn header_safe(message: &str) -> String {
    message
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '?' })
        .collect()
}

pub struct CollectService;

impl CollectService {
    pub async fn collect(
        req: HttpRequest,
        body: web::Bytes,
        state: web::Data<CollectState>,
    ) -> impl Responder {
        let mut params = QueryParams::parse(req.query_string());
        params.extend(parse_body(&body));
        trace!("Collect request with {} params", params.len());

        let session_key = state.engine.settings().session_key.clone();
        let (opts, mut errors) = parse_tracker_params(&params, &session_key);
        let ctx = build_context(&params, &req, &state.trusted_proxies);

        let outcome = state.engine.track(&ctx, &opts).await;
        if !outcome.saved {
            errors.extend(outcome.errors.iter().cloned());
        }

        Self::respond(
            CollectResponse::from_params(&params),
            &outcome,
            &state.cookies,
            errors.first(),
        )
    }

    fn respond(
        kind: CollectResponse,
        outcome: &TrackOutcome,
        cookies: &SessionCookieBuilder,
        error: Option<&CalibanError>,
    ) -> HttpResponse {
        let mut builder = HttpResponse::Ok();
        builder.cookie(cookies.build(&outcome.cookie));
        if let Some(e) = error {
            builder.insert_header((ERROR_HEADER, header_safe(&e.format_simple())));
        }

        match kind {
            CollectResponse::Image => builder
                .insert_header((header::CACHE_CONTROL, NO_CACHE))
                .insert_header((header::EXPIRES, EXPIRED_DATE))
                .content_type("image/gif")
                .body(TRANSPARENT_GIF.to_vec()),
            CollectResponse::Script => {
                let script = format!(
                    "window._cbn.push(['setSessionData', {}]);\nwindow._cbn.push(['addFormData']);\n",
                    outcome.to_json()
                );
                builder
                    .insert_header((header::CACHE_CONTROL, NO_CACHE))
                    .content_type("application/javascript")
                    .body(script)
            }
            CollectResponse::Text => builder.content_type("text/plain").body("OK"),
        }
    }
}

/// 采集路由配置
pub fn collect_routes() -> actix_web::Scope {
    web::scope("/collect")
        .route("", web::get().to(CollectService::collect))
        .route("", web::post().to(CollectService::collect))
}
