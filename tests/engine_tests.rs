//! Attribution engine tests
//!
//! End-to-end behaviour of `AttributionEngine::track` against an in-memory store
//! with a controllable clock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use caliban::errors::{CalibanError, Result};
use caliban::storage::{MemorySessionStore, SessionStore};
use caliban::tracking::{
    AttributionEngine, FixedClock, IdSource, RequestContext, SessionRecord, TrackState,
    TrackerSettings, TrackingOptions,
};

// =============================================================================
// Test Setup
// =============================================================================

const T0: i64 = 1_700_000_000;

struct Harness {
    store: Arc<MemorySessionStore>,
    clock: Arc<FixedClock>,
    engine: AttributionEngine,
}

fn harness_with(settings: TrackerSettings) -> Harness {
    let store = Arc::new(MemorySessionStore::new(1_000));
    let clock = Arc::new(FixedClock::new(T0));
    let engine = AttributionEngine::new(store.clone(), settings).with_clock(clock.clone());
    Harness {
        store,
        clock,
        engine,
    }
}

fn harness() -> Harness {
    harness_with(TrackerSettings::default())
}

fn page(query: &str) -> RequestContext {
    RequestContext::new(format!("https://shop.example/landing?{}", query))
        .with_referrer("https://www.google.com/")
        .with_client_ip(Some("203.0.113.7".to_string()))
        .with_user_agent(Some("Mozilla/5.0 (test)".to_string()))
}

fn str_field(record: &SessionRecord, key: &str) -> Option<String> {
    record.get_string(key)
}

/// 读写都失败的存储
struct FailingStore;

#[async_trait]
impl SessionStore for FailingStore {
    async fn load(&self, _id: &str, _context: &str) -> Result<Option<String>> {
        Err(CalibanError::storage_connection("connection refused"))
    }

    async fn save(
        &self,
        _id: &str,
        _context: &str,
        _value: &str,
        _ttl_secs: Option<u64>,
    ) -> Result<bool> {
        Err(CalibanError::storage_connection("connection refused"))
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

/// 响应很慢的存储
struct SlowStore;

#[async_trait]
impl SessionStore for SlowStore {
    async fn load(&self, _id: &str, _context: &str) -> Result<Option<String>> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(None)
    }

    async fn save(
        &self,
        _id: &str,
        _context: &str,
        _value: &str,
        _ttl_secs: Option<u64>,
    ) -> Result<bool> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(true)
    }

    fn backend_name(&self) -> &'static str {
        "slow"
    }
}

// =============================================================================
// Landing vs continuation
// =============================================================================

#[tokio::test]
async fn test_google_then_bing_scenario() {
    let h = harness();

    let first = h
        .engine
        .track(
            &page("utm_source=google&utm_medium=cpc&gclid=abc"),
            &TrackingOptions::new(),
        )
        .await;

    assert!(first.is_landing_page);
    assert!(first.saved);
    assert_eq!(first.state, TrackState::Persisted);
    assert_eq!(first.id_source, IdSource::Generated);
    assert_eq!(first.session_id.len(), 20);

    let record = &first.record;
    assert_eq!(record.id(), Some(first.session_id.clone()));
    assert_eq!(str_field(record, "utm_source").as_deref(), Some("google"));
    assert_eq!(str_field(record, "utm_medium").as_deref(), Some("cpc"));
    assert_eq!(str_field(record, "utm_campaign").as_deref(), Some("(not set)"));
    assert_eq!(str_field(record, "utm_content").as_deref(), Some("(not set)"));
    assert_eq!(str_field(record, "utm_term").as_deref(), Some("(not set)"));
    assert_eq!(str_field(record, "gclid").as_deref(), Some("abc"));
    assert!(str_field(record, "gauid").unwrap().starts_with(&format!("a_{}", T0)));
    assert_eq!(
        str_field(record, "referrer").as_deref(),
        Some("https://www.google.com/")
    );

    h.clock.advance(60);
    let second = h
        .engine
        .track(
            &page("utm_source=bing").with_cookie("_cbnsid", first.session_id.clone()),
            &TrackingOptions::new(),
        )
        .await;

    assert!(!second.is_landing_page);
    assert_eq!(second.id_source, IdSource::Cookie);
    assert_eq!(second.session_id, first.session_id);
    assert_eq!(str_field(&second.record, "utm_source").as_deref(), Some("google"));
    assert_eq!(second.record.duration(), Some(60));

    let stored = h
        .engine
        .load_session(&first.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, second.record);
}

#[tokio::test]
async fn test_landing_fields_never_change_within_session() {
    let h = harness();
    let first = h
        .engine
        .track(
            &page("utm_source=newsletter&utm_term=shoes&promo=spring"),
            &TrackingOptions::new().first_attribution(["promo"]),
        )
        .await;
    let landing_uri = str_field(&first.record, "landing_uri");
    let gauid = str_field(&first.record, "gauid");

    for (i, query) in [
        "utm_source=facebook&utm_term=boots&promo=summer",
        "utm_medium=social&promo=autumn",
        "utm_content=banner",
    ]
    .iter()
    .enumerate()
    {
        h.clock.advance(10);
        let next = h
            .engine
            .track(
                &RequestContext::new(format!("https://shop.example/p{}?{}", i, query))
                    .with_cookie("_cbnsid", first.session_id.clone()),
                &TrackingOptions::new().first_attribution(["promo"]),
            )
            .await;

        assert!(!next.is_landing_page);
        assert_eq!(str_field(&next.record, "utm_source").as_deref(), Some("newsletter"));
        assert_eq!(str_field(&next.record, "utm_term").as_deref(), Some("shoes"));
        assert_eq!(str_field(&next.record, "utm_medium").as_deref(), Some("(none)"));
        assert_eq!(str_field(&next.record, "utm_content").as_deref(), Some("(not set)"));
        assert_eq!(str_field(&next.record, "promo").as_deref(), Some("spring"));
        assert_eq!(str_field(&next.record, "landing_uri"), landing_uri);
        assert_eq!(str_field(&next.record, "gauid"), gauid);
        assert_eq!(
            str_field(&next.record, "last_uri"),
            Some(format!("https://shop.example/p{}?{}", i, query))
        );
    }
}

#[tokio::test]
async fn test_remainder_params_update_every_request() {
    let h = harness();
    let first = h
        .engine
        .track(&page("src=newsletter&fbclid=zzz"), &TrackingOptions::new().ignore(["fbclid"]))
        .await;
    assert_eq!(str_field(&first.record, "src").as_deref(), Some("newsletter"));
    assert!(!first.record.contains("fbclid"));

    let second = h
        .engine
        .track(
            &page("src=ads&seats=3").with_cookie("_cbnsid", first.session_id.clone()),
            &TrackingOptions::new(),
        )
        .await;
    assert_eq!(str_field(&second.record, "src").as_deref(), Some("ads"));
    // 数字字符串按数字存储
    assert_eq!(second.record.get("seats"), Some(&json!(3)));
    // 会话参数本身不会被当作归因数据
    assert!(!second.record.contains("_cbnsid"));
}

#[tokio::test]
async fn test_page_params_cannot_overwrite_record_fields() {
    let h = harness();
    let first = h.engine.track(&page("utm_source=google"), &TrackingOptions::new()).await;
    let landing_uri = str_field(&first.record, "landing_uri");
    let referrer = str_field(&first.record, "referrer");

    h.clock.advance(30);
    let second = h
        .engine
        .track(
            &page(
                "id=hijacked&created_at=9999999999&updated_at=1&duration=-5\
                 &linked_sessions=x&referrer=evil&landing_uri=evil&ip=6.6.6.6&ua=bot&src=ok",
            )
            .with_cookie("_cbnsid", first.session_id.clone()),
            &TrackingOptions::new(),
        )
        .await;
    assert!(!second.is_landing_page);

    let stored = h
        .engine
        .load_session(&first.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.id(), Some(first.session_id.clone()));
    assert_eq!(stored.created_at(), Some(T0));
    assert_eq!(stored.updated_at(), Some(T0 + 30));
    assert_eq!(stored.duration(), Some(30));
    assert!(!stored.contains("linked_sessions"));
    assert_eq!(str_field(&stored, "referrer"), referrer);
    assert_eq!(str_field(&stored, "landing_uri"), landing_uri);
    assert_eq!(str_field(&stored, "ip").as_deref(), Some("203.0.113.7"));
    assert_eq!(str_field(&stored, "ua").as_deref(), Some("Mozilla/5.0 (test)"));
    assert_eq!(str_field(&stored, "src").as_deref(), Some("ok"));
}

#[tokio::test]
async fn test_ignored_utm_is_not_defaulted() {
    let h = harness();
    let outcome = h
        .engine
        .track(&page(""), &TrackingOptions::new().ignore(["utm_term"]))
        .await;
    assert_eq!(str_field(&outcome.record, "utm_source").as_deref(), Some("(direct)"));
    assert!(!outcome.record.contains("utm_term"));
}

#[tokio::test]
async fn test_session_id_in_url_continues_session() {
    let h = harness();
    let first = h.engine.track(&page("utm_source=partner"), &TrackingOptions::new()).await;

    // 跨域跳转：会话 ID 通过 URL 传递，没有 Cookie
    h.clock.advance(5);
    let ctx = RequestContext::new(format!(
        "https://other.example/checkout?_cbnsid={}",
        first.session_id
    ));
    let second = h.engine.track(&ctx, &TrackingOptions::new()).await;

    assert!(!second.is_landing_page);
    assert_eq!(second.id_source, IdSource::Url);
    assert_eq!(str_field(&second.record, "utm_source").as_deref(), Some("partner"));
    assert_eq!(second.record.duration(), Some(5));
}

#[tokio::test]
async fn test_explicit_session_id_from_browser() {
    let h = harness();
    let outcome = h
        .engine
        .track(
            &page("utm_source=google"),
            &TrackingOptions::new().session_id("b0a1c2d3e4f5a6b7c8d9").new_session(true),
        )
        .await;
    assert_eq!(outcome.id_source, IdSource::Explicit);
    assert_eq!(outcome.session_id, "b0a1c2d3e4f5a6b7c8d9");
    assert!(outcome.is_landing_page);
    assert!(outcome.is_new_session);
    assert_eq!(outcome.cookie.value, "b0a1c2d3e4f5a6b7c8d9");
    assert_eq!(outcome.cookie.name, "_cbnsid");
}

// =============================================================================
// New sessions and linked sessions
// =============================================================================

#[tokio::test]
async fn test_campaign_start_forces_new_session_despite_cookie() {
    let h = harness();
    let first = h
        .engine
        .track(&page("utm_source=google&gauid=GA1.2.3"), &TrackingOptions::new())
        .await;

    h.clock.advance(120);
    let second = h
        .engine
        .track(
            &page("utm_source=mail&utm_campaign=spring")
                .with_cookie("_cbnsid", first.session_id.clone()),
            &TrackingOptions::new(),
        )
        .await;

    assert!(second.is_new_session);
    assert!(second.is_landing_page);
    assert_eq!(second.id_source, IdSource::Generated);
    assert_ne!(second.session_id, first.session_id);
    assert_eq!(str_field(&second.record, "utm_source").as_deref(), Some("mail"));
    assert_eq!(str_field(&second.record, "utm_campaign").as_deref(), Some("spring"));
    assert_eq!(second.record.created_at(), Some(T0 + 120));

    // 被替换的会话自动关联，并继承 gauid
    let linked = second.record.linked_sessions();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].id(), Some(first.session_id.clone()));
    assert_eq!(str_field(&second.record, "gauid").as_deref(), Some("GA1.2.3"));
}

#[tokio::test]
async fn test_linked_session_freshness_boundary() {
    let h = harness();
    let ttl = 3_600u64;
    let now = T0;

    h.store
        .save(
            "edge",
            "cbn",
            &json!({"id": "edge", "updated_at": now - ttl as i64, "gauid": "a_edge"}).to_string(),
            None,
        )
        .await
        .unwrap();
    h.store
        .save(
            "stale",
            "cbn",
            &json!({"id": "stale", "updated_at": now - ttl as i64 - 1, "gauid": "a_stale"})
                .to_string(),
            None,
        )
        .await
        .unwrap();

    let outcome = h
        .engine
        .track(
            &page(""),
            &TrackingOptions::new()
                .new_session(true)
                .cache_expiration(ttl)
                .link_session("stale")
                .link_session("edge"),
        )
        .await;

    let linked: Vec<_> = outcome
        .record
        .linked_sessions()
        .into_iter()
        .filter_map(|r| r.id())
        .collect();
    assert_eq!(linked, vec!["edge".to_string()]);
    // 第一个有效的关联会话提供 gauid
    assert_eq!(str_field(&outcome.record, "gauid").as_deref(), Some("a_edge"));
}

#[tokio::test]
async fn test_linked_sessions_are_flattened() {
    let h = harness();
    h.store
        .save(
            "parent",
            "cbn",
            &json!({
                "id": "parent",
                "updated_at": T0,
                "linked_sessions": [{"id": "grandparent", "updated_at": T0 - 10}]
            })
            .to_string(),
            None,
        )
        .await
        .unwrap();

    let outcome = h
        .engine
        .track(
            &page(""),
            &TrackingOptions::new().new_session(true).link_session("parent"),
        )
        .await;

    let linked = outcome.record.linked_sessions();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].id().as_deref(), Some("parent"));
    assert!(!linked[0].contains("linked_sessions"));
}

#[tokio::test]
async fn test_linked_sessions_ignored_without_new_session() {
    let h = harness();
    h.store
        .save("old", "cbn", &json!({"id": "old", "updated_at": T0}).to_string(), None)
        .await
        .unwrap();

    let outcome = h
        .engine
        .track(&page(""), &TrackingOptions::new().link_session("old"))
        .await;
    assert!(outcome.record.linked_sessions().is_empty());
}

// =============================================================================
// Record invariants
// =============================================================================

#[tokio::test]
async fn test_duration_never_negative() {
    let h = harness();
    let first = h.engine.track(&page(""), &TrackingOptions::new()).await;

    // 时钟回拨
    h.clock.set(T0 - 500);
    let second = h
        .engine
        .track(
            &page("").with_cookie("_cbnsid", first.session_id.clone()),
            &TrackingOptions::new(),
        )
        .await;

    let created = second.record.created_at().unwrap();
    let updated = second.record.updated_at().unwrap();
    assert!(updated >= created);
    assert_eq!(second.record.duration(), Some(0));
}

#[tokio::test]
async fn test_malformed_stored_value_starts_empty() {
    let h = harness();
    h.store.insert_raw("broken", "cbn", "not-json-not-hex").await;

    let outcome = h
        .engine
        .track(
            &page("src=x").with_cookie("_cbnsid", "broken"),
            &TrackingOptions::new(),
        )
        .await;

    assert!(outcome.saved);
    assert!(!outcome.is_landing_page);
    assert_eq!(outcome.session_id, "broken");
    assert_eq!(outcome.record.id().as_deref(), Some("broken"));
    assert_eq!(outcome.record.created_at(), Some(T0));
    assert_eq!(outcome.record.duration(), Some(0));
    assert!(!outcome.record.contains("utm_source"));
}

#[tokio::test]
async fn test_hex_encoded_prior_is_accepted() {
    let h = harness();
    let prior = json!({"id": "hexed", "created_at": T0 - 30, "utm_source": "legacy"}).to_string();
    h.store.insert_raw("hexed", "cbn", &hex::encode(prior)).await;

    let outcome = h
        .engine
        .track(&page("").with_cookie("_cbnsid", "hexed"), &TrackingOptions::new())
        .await;
    assert_eq!(str_field(&outcome.record, "utm_source").as_deref(), Some("legacy"));
    assert_eq!(outcome.record.duration(), Some(30));
}

#[tokio::test]
async fn test_custom_data_and_user_id() {
    let h = harness();
    let first = h
        .engine
        .track(
            &page(""),
            &TrackingOptions::new()
                .custom("plan", "pro")
                .custom("id", "hijack")
                .custom("empty", "")
                .user_id("u-1"),
        )
        .await;
    assert_eq!(str_field(&first.record, "plan").as_deref(), Some("pro"));
    assert_eq!(first.record.id(), Some(first.session_id.clone()));
    assert!(!first.record.contains("empty"));
    assert_eq!(str_field(&first.record, "uid").as_deref(), Some("u-1"));

    let second = h
        .engine
        .track(
            &page("").with_cookie("_cbnsid", first.session_id.clone()),
            &TrackingOptions::new().custom("plan", "basic").user_id("u-2"),
        )
        .await;
    assert_eq!(str_field(&second.record, "plan").as_deref(), Some("pro"));
    assert_eq!(str_field(&second.record, "uid").as_deref(), Some("u-2"));
}

#[test]
fn test_record_round_trip() {
    let mut record = SessionRecord::new();
    record.set_always("id", "abc");
    record.set_always("created_at", 1_700_000_000i64);
    record.set_always("ratio", 0.25);
    record.set_always("utm_source", "google");
    record.merge_append(
        "linked_sessions",
        vec![json!({"id": "old", "updated_at": 1_699_999_000i64, "gauid": "a_1"})],
    );

    let json = record.to_json();
    assert_eq!(SessionRecord::parse_stored(&json).unwrap(), record);
    assert_eq!(SessionRecord::parse_stored(&hex::encode(&json)).unwrap(), record);
    assert_eq!(record.created_at(), Some(1_700_000_000));
}

// =============================================================================
// Storage failures
// =============================================================================

#[tokio::test]
async fn test_failing_store_reports_unsaved() {
    let engine = AttributionEngine::new(Arc::new(FailingStore), TrackerSettings::default())
        .with_clock(Arc::new(FixedClock::new(T0)));

    let outcome = engine
        .track(
            &page("utm_source=google").with_cookie("_cbnsid", "known"),
            &TrackingOptions::new(),
        )
        .await;

    assert!(!outcome.saved);
    assert_eq!(outcome.state, TrackState::Failed);
    // 读取失败按空记录处理，仍然返回完整的当前记录
    assert_eq!(outcome.record.id().as_deref(), Some("known"));
    assert_eq!(outcome.errors.len(), 2);
    assert!(outcome.errors.iter().all(CalibanError::is_transient));
}

#[tokio::test]
async fn test_slow_store_times_out() {
    let settings = TrackerSettings {
        storage_timeout: Duration::from_millis(50),
        ..TrackerSettings::default()
    };
    let engine = AttributionEngine::new(Arc::new(SlowStore), settings);

    let outcome = engine
        .track(&page("").with_cookie("_cbnsid", "slow"), &TrackingOptions::new())
        .await;
    assert!(!outcome.saved);
    assert!(matches!(
        outcome.first_error(),
        Some(CalibanError::StorageConnection(_))
    ));
}

// =============================================================================
// Expiration and debug snapshot
// =============================================================================

#[tokio::test]
async fn test_zero_expiration_never_expires() {
    let h = harness();
    let outcome = h
        .engine
        .track(&page(""), &TrackingOptions::new().cache_expiration(0))
        .await;
    assert!(outcome.saved);
    assert_eq!(outcome.cookie.max_age, None);

    let default = h.engine.track(&page(""), &TrackingOptions::new()).await;
    assert_eq!(default.cookie.max_age, Some(7200));
}

#[tokio::test]
async fn test_debug_snapshot_saved_separately() {
    let h = harness_with(TrackerSettings {
        debug: true,
        ..TrackerSettings::default()
    });
    let outcome = h
        .engine
        .track(
            &page("utm_source=google&src=x").with_cookie("theme", "dark"),
            &TrackingOptions {
                property_id: Some("site-9".to_string()),
                ..TrackingOptions::new()
            },
        )
        .await;

    let snapshot = h
        .engine
        .load_debug_snapshot(&outcome.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.get_string("_id"), Some(outcome.session_id.clone()));
    assert_eq!(snapshot.get_string("property_id").as_deref(), Some("site-9"));
    assert_eq!(snapshot.get("is_session_landing_page"), Some(&json!(true)));
    assert_eq!(snapshot.get("last_attribution_params"), Some(&json!(["src"])));
    assert_eq!(snapshot.get("cookies"), Some(&json!(["theme"])));

    // 主记录不受影响
    let stored = h.engine.load_session(&outcome.session_id).await.unwrap().unwrap();
    assert!(!stored.contains("_id"));
}
