//! 会话归因引擎
//!
//! 单次请求的处理流程：
//!
//! ```text
//! ResolvingId → LoadingPrior → ClassifyingParams → (LandingBranch) → ContinuationBranch → Persisting
//!                                                                                          ↓
//!                                                                              Persisted / Failed
//! ```
//!
//! 引擎不持有任何跨请求的可变状态，唯一的共享状态是外部存储。
//! 所有可恢复的失败（读取失败、数据损坏、写入失败）都不会以 `Err` 形式离开 [`AttributionEngine::track`]。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, error, trace, warn};

use super::classifier::{GAUID_PARAM, ParamClassifier, UTM_DEFAULTS};
use super::clock::{Clock, SystemClock};
use super::context::RequestContext;
use super::identity::{generate_anonymous_user_id, generate_session_id};
use super::options::TrackingOptions;
use super::record::{SessionRecord, keys};
use crate::config::StaticConfig;
use crate::errors::{CalibanError, Result};
use crate::storage::SessionStore;

/// 调试快照的存储上下文前缀
pub const DEBUG_CONTEXT_PREFIX: &str = "__debug__";

/// 旧版浏览器脚本会把缺失的关联 ID 序列化成这些字符串
const NULLISH_IDS: [&str; 2] = ["null", "undefined"];

/// 引擎运行参数，由调用方显式构造并注入
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub session_key: String,
    pub cache_key: String,
    /// `None` 表示会话永不过期
    pub cache_expiration: Option<u64>,
    pub debug: bool,
    pub append_params: Vec<String>,
    pub ignore_params: Vec<String>,
    pub first_attribution_params: Vec<String>,
    pub campaign_start_params: Vec<String>,
    /// 单次存储调用的最长等待时间
    pub storage_timeout: Duration,
}

impl TrackerSettings {
    pub fn from_config(config: &StaticConfig) -> Self {
        let tracking = &config.tracking;
        Self {
            session_key: tracking.session_key.clone(),
            cache_key: tracking.cache_key.clone(),
            cache_expiration: ttl_from_seconds(tracking.cache_expiration),
            debug: tracking.debug,
            append_params: tracking.append_params.clone(),
            ignore_params: tracking.ignore_params.clone(),
            first_attribution_params: tracking.first_attribution_params.clone(),
            campaign_start_params: tracking.campaign_start_params.clone(),
            storage_timeout: Duration::from_millis(config.storage.timeout_ms),
        }
    }

    /// 调试快照使用的存储上下文
    pub fn debug_context(&self) -> String {
        format!("{}{}", DEBUG_CONTEXT_PREFIX, self.cache_key)
    }
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self::from_config(&StaticConfig::default())
    }
}

/// 0 秒表示永不过期
fn ttl_from_seconds(seconds: u64) -> Option<u64> {
    (seconds > 0).then_some(seconds)
}

/// 单次请求经过的处理阶段（不持久化）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TrackState {
    ResolvingId,
    LoadingPrior,
    ClassifyingParams,
    LandingBranch,
    ContinuationBranch,
    Persisting,
    Persisted,
    Failed,
}

/// 会话 ID 的来源，按优先级排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IdSource {
    /// 调用方显式传入
    Explicit,
    /// URL query 中的会话参数
    Url,
    /// 会话 Cookie（新会话时不使用）
    Cookie,
    Generated,
}

/// 传输层需要写回的会话 Cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    /// `None` 表示会话永不过期，由传输层决定实际的 Max-Age
    pub max_age: Option<u64>,
}

/// [`AttributionEngine::track`] 的结果
#[derive(Debug, Clone)]
pub struct TrackOutcome {
    pub session_id: String,
    pub id_source: IdSource,
    pub record: SessionRecord,
    pub is_new_session: bool,
    pub is_landing_page: bool,
    /// 主记录是否写入成功
    pub saved: bool,
    /// 终态：`Persisted` 或 `Failed`
    pub state: TrackState,
    pub cookie: SessionCookie,
    /// 处理过程中被恢复的错误
    pub errors: Vec<CalibanError>,
}

impl TrackOutcome {
    pub fn to_json(&self) -> String {
        self.record.to_json()
    }

    /// 第一个应当反馈给调用方的错误
    pub fn first_error(&self) -> Option<&CalibanError> {
        self.errors.first()
    }
}

/// 会话归因引擎
pub struct AttributionEngine {
    store: Arc<dyn SessionStore>,
    settings: TrackerSettings,
    clock: Arc<dyn Clock>,
}

/// 单次请求的中间结果
struct Resolution {
    session_id: String,
    id_source: IdSource,
    is_new_session: bool,
    is_landing_page: bool,
}

impl AttributionEngine {
    pub fn new(store: Arc<dyn SessionStore>, settings: TrackerSettings) -> Self {
        Self {
            store,
            settings,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// 读取已保存的会话，不存在或损坏时返回 `None`
    pub async fn load_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        self.load_record(session_id, &self.settings.cache_key).await
    }

    /// 读取调试快照
    pub async fn load_debug_snapshot(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        self.load_record(session_id, &self.settings.debug_context())
            .await
    }

    async fn load_record(&self, session_id: &str, context: &str) -> Result<Option<SessionRecord>> {
        let raw = self.bounded(self.store.load(session_id, context)).await?;
        Ok(raw
            .map(|raw| SessionRecord::from_prior_or_empty(Some(&raw)))
            .filter(|record| !record.is_empty()))
    }

    /// 处理一次请求并持久化会话
    pub async fn track(&self, ctx: &RequestContext, opts: &TrackingOptions) -> TrackOutcome {
        let now = self.clock.now();
        let mut errors = Vec::new();

        let classifier = self.classifier(opts);
        let ttl = self.effective_ttl(opts);

        // ResolvingId
        let resolution = self.resolve(ctx, opts, &classifier);
        trace!(
            "[{}] session {} from {} (new: {}, landing: {})",
            TrackState::ResolvingId,
            resolution.session_id,
            resolution.id_source,
            resolution.is_new_session,
            resolution.is_landing_page
        );

        // LoadingPrior
        let mut record = self.load_prior(&resolution, &mut errors).await;

        // ClassifyingParams
        let remainder: Vec<String> = classifier
            .remainder(ctx.query())
            .into_iter()
            .map(str::to_string)
            .collect();
        trace!(
            "[{}] last attribution params: {:?}",
            TrackState::ClassifyingParams,
            remainder
        );

        // LandingBranch
        let mut linked_ids = Vec::new();
        if resolution.is_landing_page {
            let linked = if resolution.is_new_session {
                linked_ids = self.linked_candidates(ctx, opts, &resolution.session_id);
                self.load_linked(&linked_ids, now, ttl, &mut errors).await
            } else {
                Vec::new()
            };
            self.apply_landing(&mut record, ctx, opts, &classifier, &resolution, &linked, now);
        }

        // ContinuationBranch
        self.apply_continuation(&mut record, ctx, opts, &remainder, &resolution, now);

        // Persisting
        let saved = self.persist(&resolution.session_id, &record, ttl, &mut errors).await;

        if self.settings.debug {
            let snapshot = self.debug_snapshot(
                ctx,
                opts,
                &classifier,
                &resolution,
                &remainder,
                &linked_ids,
            );
            self.persist_debug(&resolution.session_id, &snapshot, ttl).await;
        }

        let state = if saved {
            TrackState::Persisted
        } else {
            TrackState::Failed
        };
        debug!(
            "Session {} tracked: {} (landing: {}, fields: {})",
            resolution.session_id,
            state,
            resolution.is_landing_page,
            record.len()
        );

        TrackOutcome {
            cookie: SessionCookie {
                name: self.settings.session_key.clone(),
                value: resolution.session_id.clone(),
                max_age: ttl,
            },
            session_id: resolution.session_id,
            id_source: resolution.id_source,
            record,
            is_new_session: resolution.is_new_session,
            is_landing_page: resolution.is_landing_page,
            saved,
            state,
            errors,
        }
    }

    /// 配置列表与单次请求列表取并集
    fn classifier(&self, opts: &TrackingOptions) -> ParamClassifier {
        ParamClassifier::new(&self.settings.session_key)
            .with_first_attribution(&self.settings.first_attribution_params)
            .with_first_attribution(&opts.first_attribution_params)
            .with_ignore(&self.settings.ignore_params)
            .with_ignore(&opts.ignore_params)
            .with_campaign_start(&self.settings.campaign_start_params)
            .with_campaign_start(&opts.campaign_start_params)
    }

    fn effective_ttl(&self, opts: &TrackingOptions) -> Option<u64> {
        match opts.cache_expiration {
            Some(seconds) => ttl_from_seconds(seconds),
            None => self.settings.cache_expiration,
        }
    }

    fn resolve(
        &self,
        ctx: &RequestContext,
        opts: &TrackingOptions,
        classifier: &ParamClassifier,
    ) -> Resolution {
        let key = self.settings.session_key.as_str();

        let campaign_match = classifier.campaign_start_match(ctx.query());
        if let Some(param) = campaign_match {
            debug!("Campaign start parameter '{}' forces a new session", param);
        }
        let is_new_session = opts.new_session || campaign_match.is_some();

        let url_id = ctx.query_value(key);
        let cookie_id = ctx.cookie_value(key);
        let is_landing_page = url_id.is_none() && (cookie_id.is_none() || is_new_session);

        let (session_id, id_source) = if let Some(id) = opts.session_id.as_deref() {
            (id.to_string(), IdSource::Explicit)
        } else if let Some(id) = url_id {
            (id.to_string(), IdSource::Url)
        } else if let Some(id) = cookie_id.filter(|_| !is_new_session) {
            (id.to_string(), IdSource::Cookie)
        } else {
            (generate_session_id(), IdSource::Generated)
        };

        Resolution {
            session_id,
            id_source,
            is_new_session,
            is_landing_page,
        }
    }

    /// 新生成的 ID 不可能有历史记录；新会话的落地请求从空记录开始
    async fn load_prior(
        &self,
        resolution: &Resolution,
        errors: &mut Vec<CalibanError>,
    ) -> SessionRecord {
        if resolution.id_source == IdSource::Generated
            || (resolution.is_landing_page && resolution.is_new_session)
        {
            trace!("[{}] skipped for fresh session", TrackState::LoadingPrior);
            return SessionRecord::new();
        }

        match self
            .bounded(self.store.load(&resolution.session_id, &self.settings.cache_key))
            .await
        {
            Ok(raw) => SessionRecord::from_prior_or_empty(raw.as_deref()),
            Err(e) => {
                warn!(
                    "Failed to load session {}, continuing with empty state: {}",
                    resolution.session_id, e
                );
                errors.push(e);
                SessionRecord::new()
            }
        }
    }

    /// 显式关联 ID + 当前 Cookie 中被新会话替换的 ID，去重且排除当前会话
    fn linked_candidates(
        &self,
        ctx: &RequestContext,
        opts: &TrackingOptions,
        session_id: &str,
    ) -> Vec<String> {
        let cookie_id = ctx.cookie_value(&self.settings.session_key);

        let mut candidates: Vec<String> = Vec::new();
        for id in opts
            .linked_session_ids
            .iter()
            .map(|s| s.trim())
            .chain(cookie_id)
        {
            if id.is_empty() || NULLISH_IDS.contains(&id) || id == session_id {
                continue;
            }
            if !candidates.iter().any(|c| c == id) {
                candidates.push(id.to_string());
            }
        }
        candidates
    }

    /// 读取关联会话，只保留仍在有效期内的记录
    ///
    /// 有效期边界包含在内：`updated_at >= now - ttl`。
    async fn load_linked(
        &self,
        ids: &[String],
        now: i64,
        ttl: Option<u64>,
        errors: &mut Vec<CalibanError>,
    ) -> Vec<SessionRecord> {
        let mut linked = Vec::new();
        for id in ids {
            let raw = match self
                .bounded(self.store.load(id, &self.settings.cache_key))
                .await
            {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Failed to load linked session {}: {}", id, e);
                    errors.push(e);
                    continue;
                }
            };

            let record = SessionRecord::from_prior_or_empty(raw.as_deref());
            if record.is_empty() {
                trace!("Linked session {} not found", id);
                continue;
            }

            let fresh = match ttl {
                None => true,
                Some(ttl) => {
                    let oldest = now.saturating_sub(i64::try_from(ttl).unwrap_or(i64::MAX));
                    record.updated_at().is_some_and(|updated| updated >= oldest)
                }
            };
            if !fresh {
                debug!("Linked session {} expired, not attached", id);
                continue;
            }

            let mut snapshot = record.without_linked_sessions();
            snapshot.set_if_absent(keys::ID, id.as_str());
            linked.push(snapshot);
        }
        linked
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_landing(
        &self,
        record: &mut SessionRecord,
        ctx: &RequestContext,
        opts: &TrackingOptions,
        classifier: &ParamClassifier,
        resolution: &Resolution,
        linked: &[SessionRecord],
        now: i64,
    ) {
        trace!("[{}] session {}", TrackState::LandingBranch, resolution.session_id);

        record.set_if_absent(keys::ID, resolution.session_id.as_str());
        record.set_if_absent(keys::CREATED_AT, now);
        record.set_if_absent(keys::REFERRER, ctx.referrer());
        record.set_if_absent(keys::LANDING_URI, ctx.url());

        // gauid：客户端值 → 第一个关联会话 → 新生成
        if !record.contains(keys::GAUID) {
            let gauid = ctx
                .client_value(GAUID_PARAM)
                .map(str::to_string)
                .or_else(|| linked.iter().find_map(|l| l.get_string(keys::GAUID)))
                .unwrap_or_else(|| generate_anonymous_user_id(now));
            record.set_if_absent(keys::GAUID, gauid);
        }

        for (utm_key, default) in UTM_DEFAULTS {
            if !classifier.is_ignored(utm_key) {
                record.set_if_absent(utm_key, ctx.client_value_or(utm_key, default));
            }
        }

        for param in classifier.first_attribution_params() {
            if classifier.is_reserved(param) {
                continue;
            }
            if let Some(value) = ctx.client_value(param) {
                record.set_if_absent(param, value);
            }
        }

        if !linked.is_empty() {
            record.merge_append(
                keys::LINKED_SESSIONS,
                linked.iter().map(SessionRecord::to_value).collect(),
            );
        }

        for (key, value) in &opts.custom_data {
            if keys::PROTECTED.contains(&key.as_str()) {
                debug!("Custom data key '{}' is protected, skipped", key);
                continue;
            }
            record.set_if_absent(key, value.clone());
        }
    }

    fn apply_continuation(
        &self,
        record: &mut SessionRecord,
        ctx: &RequestContext,
        opts: &TrackingOptions,
        remainder: &[String],
        resolution: &Resolution,
        now: i64,
    ) {
        trace!(
            "[{}] session {}",
            TrackState::ContinuationBranch,
            resolution.session_id
        );

        record.set_if_absent(keys::ID, resolution.session_id.as_str());

        if let Some(ip) = ctx.client_ip() {
            record.set_always(keys::IP, ip);
        }
        if let Some(ua) = ctx.user_agent() {
            record.set_always(keys::USER_AGENT, ua);
        }
        record.set_always(keys::LAST_URI, ctx.url());

        // 历史记录可能缺少 created_at（例如由旧版本写入）
        record.set_if_absent(keys::CREATED_AT, now);
        let created_at = record.created_at().unwrap_or(now);
        let updated_at = now.max(created_at);
        record.set_always(keys::UPDATED_AT, updated_at);
        record.set_always(keys::DURATION, updated_at - created_at);

        for key in remainder {
            if let Some(value) = ctx.client_value(key) {
                record.set_always(key, value);
            }
        }

        if let Some(uid) = opts.user_id.as_deref() {
            record.set_always(keys::USER_ID, uid);
        }
    }

    async fn persist(
        &self,
        session_id: &str,
        record: &SessionRecord,
        ttl: Option<u64>,
        errors: &mut Vec<CalibanError>,
    ) -> bool {
        trace!("[{}] session {}", TrackState::Persisting, session_id);
        let payload = record.to_json();
        match self
            .bounded(
                self.store
                    .save(session_id, &self.settings.cache_key, &payload, ttl),
            )
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                error!("Store refused to save session {}", session_id);
                errors.push(CalibanError::storage_operation(format!(
                    "store refused to save session {}",
                    session_id
                )));
                false
            }
            Err(e) => {
                error!("Failed to save session {}: {}", session_id, e);
                errors.push(e);
                false
            }
        }
    }

    /// 调试快照写入失败不影响主记录
    async fn persist_debug(&self, session_id: &str, snapshot: &SessionRecord, ttl: Option<u64>) {
        let context = self.settings.debug_context();
        let result = self
            .bounded(
                self.store
                    .save(session_id, &context, &snapshot.to_json(), ttl),
            )
            .await;
        if let Err(e) = result {
            debug!("Debug snapshot for {} not saved: {}", session_id, e);
        }
    }

    fn debug_snapshot(
        &self,
        ctx: &RequestContext,
        opts: &TrackingOptions,
        classifier: &ParamClassifier,
        resolution: &Resolution,
        remainder: &[String],
        linked_ids: &[String],
    ) -> SessionRecord {
        let key = self.settings.session_key.as_str();
        let snapshot = json!({
            "_id": resolution.session_id,
            "session_reference_key": key,
            "id_source": resolution.id_source,
            "cookied_session_id": ctx.cookie_value(key),
            "property_id": opts.property_id,
            "uri": ctx.url(),
            "referrer": ctx.referrer(),
            "is_new_session": resolution.is_new_session,
            "is_session_landing_page": resolution.is_landing_page,
            "no_session_in_url": ctx.query_value(key).is_none(),
            "no_cookie_or_new": ctx.cookie_value(key).is_none() || resolution.is_new_session,
            "campaign_start_match": classifier.campaign_start_match(ctx.query()),
            "ignore_params": classifier.ignore_params(),
            "append_params": self.append_params(opts),
            "first_attribution_params": classifier.first_attribution_params(),
            "campaign_start_params": classifier.campaign_start_params(),
            "last_attribution_params": remainder,
            "linked_session_ids": linked_ids,
            "client_query_vars": ctx.query().to_json_map(),
            "cookies": ctx.cookie_names(),
        });

        match snapshot {
            Value::Object(map) => SessionRecord::from_map(map),
            _ => SessionRecord::from_map(Map::new()),
        }
    }

    /// 链接装饰参数：配置与单次请求合并
    pub fn append_params(&self, opts: &TrackingOptions) -> Vec<String> {
        let mut params = self.settings.append_params.clone();
        for param in &opts.append_params {
            if !params.contains(param) {
                params.push(param.clone());
            }
        }
        params
    }

    /// 为存储调用加上超时，超时视为连接失败
    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.settings.storage_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CalibanError::storage_connection(format!(
                "storage call timed out after {}ms",
                self.settings.storage_timeout.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySessionStore;
    use crate::tracking::clock::FixedClock;

    fn engine() -> AttributionEngine {
        AttributionEngine::new(
            Arc::new(MemorySessionStore::new(100)),
            TrackerSettings::default(),
        )
        .with_clock(Arc::new(FixedClock::new(1_000)))
    }

    #[test]
    fn test_ttl_zero_means_never_expire() {
        assert_eq!(ttl_from_seconds(0), None);
        assert_eq!(ttl_from_seconds(30), Some(30));

        let engine = engine();
        let opts = TrackingOptions::new().cache_expiration(0);
        assert_eq!(engine.effective_ttl(&opts), None);
        assert_eq!(engine.effective_ttl(&TrackingOptions::new()), Some(7200));
    }

    #[test]
    fn test_resolution_precedence() {
        let engine = engine();
        let classifier = engine.classifier(&TrackingOptions::new());

        let ctx = RequestContext::new("https://a.example/?_cbnsid=url")
            .with_cookie("_cbnsid", "cookie");
        let explicit =
            engine.resolve(&ctx, &TrackingOptions::new().session_id("given"), &classifier);
        assert_eq!(explicit.session_id, "given");
        assert_eq!(explicit.id_source, IdSource::Explicit);

        let from_url = engine.resolve(&ctx, &TrackingOptions::new(), &classifier);
        assert_eq!(from_url.session_id, "url");
        assert!(!from_url.is_landing_page);

        let ctx = RequestContext::new("https://a.example/").with_cookie("_cbnsid", "cookie");
        let from_cookie = engine.resolve(&ctx, &TrackingOptions::new(), &classifier);
        assert_eq!(from_cookie.id_source, IdSource::Cookie);
        assert!(!from_cookie.is_landing_page);

        // 新会话不使用 Cookie 中的 ID
        let fresh = engine.resolve(&ctx, &TrackingOptions::new().new_session(true), &classifier);
        assert_eq!(fresh.id_source, IdSource::Generated);
        assert!(fresh.is_landing_page);
    }

    #[test]
    fn test_linked_candidates_filtering() {
        let engine = engine();
        let ctx = RequestContext::new("https://a.example/").with_cookie("_cbnsid", "old");
        let opts = TrackingOptions::new()
            .link_session("null")
            .link_session("")
            .link_session("older")
            .link_session("old")
            .link_session("current")
            .link_session("undefined");
        assert_eq!(
            engine.linked_candidates(&ctx, &opts, "current"),
            vec!["older".to_string(), "old".to_string()]
        );
    }

    #[test]
    fn test_append_params_union() {
        let engine = AttributionEngine::new(
            Arc::new(MemorySessionStore::new(10)),
            TrackerSettings {
                append_params: vec!["ref".to_string()],
                ..TrackerSettings::default()
            },
        );
        let mut opts = TrackingOptions::new();
        opts.append_params = vec!["ref".to_string(), "aff".to_string()];
        assert_eq!(engine.append_params(&opts), vec!["ref", "aff"]);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(TrackState::LandingBranch.to_string(), "landing_branch");
        assert_eq!(IdSource::Generated.as_ref(), "generated");
    }
}
