//! Integration tests for the resolution engine
//!
//! Every source is served by a local mock HTTP server:
//! - Partial source failure and warnings
//! - Cache freshness at the TTL boundary
//! - Aggregator ordering, thresholds and authentication failures
//! - Batch matching and its fallback path
//! - Cancellation with partial results
//! - OFAC CSV, EU spreadsheet and UN XML end to end

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use httpmock::prelude::*;
use sanction_watch::cache::{
    CacheEntry, CacheStore, FileCacheStore, FixedClock, MemoryCacheStore,
};
use sanction_watch::model::{Dataset, Row};
use sanction_watch::sources::catalog::{default_sources, ofac, PayloadFormat};
use sanction_watch::{
    CancelToken, DeclaredType, EngineConfig, EntityQuery, EntityType, MatchType, ResolutionEngine,
    SourceSpec,
};
use tracing_subscriber::EnvFilter;

// =========================================================================
// TEST INFRASTRUCTURE
// =========================================================================

const OFAC_CSV: &str = concat!(
    "36,\"AEROCARIBBEAN AIRLINES\",-0- ,\"CUBA\",-0- ,-0- ,-0- ,-0- ,-0- ,-0- ,-0- ,-0- \n",
    "15036,\"OCEAN STAR\",\"vessel\",\"IRAN\",-0- ,\"9HXY\",\"Crude Oil Tanker\",-0- ,-0- ,\"Panama\",-0- ,\"IMO 9811000\"\n",
    "15037,\"BLUE MARLIN\",\"vessel\",\"IRAN\",-0- ,-0- ,\"Bulk Carrier\",-0- ,-0- ,\"Togo\",-0- ,-0- \n",
    "15038,\"OCEAN WIND\",\"vessel\",\"DPRK3\",-0- ,-0- ,-0- ,-0- ,-0- ,-0- ,-0- ,-0- \n",
    "20001,\"SMITH, John\",\"individual\",\"SDGT\",-0- ,-0- ,-0- ,-0- ,-0- ,-0- ,-0- ,-0- \n",
);

const UN_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<CONSOLIDATED_LIST>
  <INDIVIDUALS>
    <INDIVIDUAL>
      <DATAID>6908555</DATAID>
      <FIRST_NAME>RI</FIRST_NAME>
      <SECOND_NAME>WON HO</SECOND_NAME>
      <UN_LIST_TYPE>DPRK</UN_LIST_TYPE>
      <REFERENCE_NUMBER>KPi.033</REFERENCE_NUMBER>
    </INDIVIDUAL>
  </INDIVIDUALS>
  <ENTITIES/>
</CONSOLIDATED_LIST>"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 20, 12, 0, 0).unwrap()
}

/// Default sources re-pointed at the mock server, e.g. OFAC -> /ofac
fn mock_sources(server: &MockServer, ids: &[&str]) -> Vec<SourceSpec> {
    default_sources()
        .into_iter()
        .filter(|s| ids.contains(&s.id.as_str()))
        .map(|mut s| {
            s.url = server.url(format!("/{}", s.id.to_lowercase()));
            s
        })
        .collect()
}

fn base_config(sources: Vec<SourceSpec>) -> EngineConfig {
    EngineConfig::default()
        .with_sources(sources)
        .with_request_delay(Duration::ZERO)
        .with_retries(1, Duration::from_millis(1))
}

fn engine_at(
    config: EngineConfig,
    cache: Arc<dyn CacheStore>,
    now: DateTime<Utc>,
) -> ResolutionEngine {
    ResolutionEngine::with_parts(config, cache, Arc::new(FixedClock(now))).unwrap()
}

fn eu_workbook() -> Vec<u8> {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "Name of vessel").unwrap();
    sheet.write_string(0, 1, "IMO number").unwrap();
    sheet.write_string(1, 0, "ANDREA").unwrap();
    sheet.write_string(1, 1, "9236353").unwrap();
    sheet.write_string(2, 0, "OCEAN STAR").unwrap();
    sheet.write_string(2, 1, "9811000").unwrap();
    workbook.save_to_buffer().unwrap()
}

// =========================================================================
// PARTIAL FAILURE
// =========================================================================

#[tokio::test]
async fn test_three_sources_down_one_up() {
    init_tracing();
    let server = MockServer::start_async().await;
    let ofac_mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/ofac");
            then.status(200).body(OFAC_CSV);
        })
        .await;
    let mut down = Vec::new();
    for path in ["/uk", "/eu", "/un"] {
        down.push(
            server
                .mock_async(|when, then| {
                    when.method(GET).path(path);
                    then.status(503);
                })
                .await,
        );
    }

    let config = base_config(mock_sources(&server, &["OFAC", "UK", "EU", "UN"]));
    let engine = engine_at(config, Arc::new(MemoryCacheStore::new()), t0());

    let resolution = engine
        .resolve_query(
            &EntityQuery::new("Ocean Star", DeclaredType::Vessel),
            &CancelToken::new(),
        )
        .await;

    assert_eq!(resolution.matches.len(), 1);
    let m = &resolution.matches[0];
    assert_eq!(m.source_id, "OFAC");
    assert_eq!(m.matched_name, "OCEAN STAR");
    assert_eq!(m.match_type, MatchType::Exact);
    assert_eq!(m.raw_details["id"], serde_json::json!("15036"));
    assert_eq!(m.observed_at, t0());

    let warned: Vec<_> = resolution
        .warnings
        .iter()
        .map(|w| w.source_id.as_str())
        .collect();
    assert_eq!(warned, vec!["UK", "EU", "UN"]);

    ofac_mock.assert_calls_async(1).await;
    for mock in &down {
        mock.assert_calls_async(2).await;
    }
}

#[tokio::test]
async fn test_ofac_keeps_every_sdn_row() {
    init_tracing();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/ofac");
            then.status(200).body(OFAC_CSV);
        })
        .await;

    let engine = engine_at(
        base_config(mock_sources(&server, &["OFAC"])),
        Arc::new(MemoryCacheStore::new()),
        t0(),
    );

    let person = engine.resolve("John Smith", DeclaredType::Person).await;
    assert_eq!(person.len(), 1);
    assert_eq!(person[0].source_id, "OFAC");
    assert_eq!(person[0].raw_details["id"], serde_json::json!("20001"));

    let company = engine.resolve("Aerocaribbean Airlines", DeclaredType::Company).await;
    assert_eq!(company.len(), 1);
    assert_eq!(company[0].raw_details["id"], serde_json::json!("36"));

    let report = engine.refresh_sources(false).await;
    assert_eq!(report[0].source_name, "US Office of Foreign Assets Control");
    assert_eq!(report[0].rows, 5);
    assert!(report[0].from_cache);
}

// =========================================================================
// CACHE
// =========================================================================

#[tokio::test]
async fn test_cache_ttl_boundary() {
    init_tracing();
    let server = MockServer::start_async().await;
    let ofac_mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/ofac");
            then.status(200).body(OFAC_CSV);
        })
        .await;

    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
    let cached_row = Row::from([
        ("id".to_string(), "1".to_string()),
        ("name".to_string(), "CACHED VESSEL".to_string()),
    ]);
    cache
        .put(&CacheEntry::new("OFAC", t0(), Dataset::new(vec![cached_row])))
        .unwrap();

    let ttl = Duration::from_secs(24 * 3600);
    let config = base_config(mock_sources(&server, &["OFAC"])).with_cache_ttl(ttl);

    let just_fresh = t0() + chrono::Duration::seconds(24 * 3600 - 1);
    let engine = engine_at(config.clone(), cache.clone(), just_fresh);
    let matches = engine.resolve("Cached Vessel", DeclaredType::Vessel).await;
    assert_eq!(matches.len(), 1);
    ofac_mock.assert_calls_async(0).await;

    let just_stale = t0() + chrono::Duration::seconds(24 * 3600 + 1);
    let engine = engine_at(config, cache.clone(), just_stale);
    let matches = engine.resolve("Cached Vessel", DeclaredType::Vessel).await;
    assert!(matches.is_empty());
    ofac_mock.assert_calls_async(1).await;

    let entry = cache.get("OFAC").unwrap();
    assert_eq!(entry.fetched_at, just_stale);
    assert_eq!(entry.dataset.len(), 3);
}

#[tokio::test]
async fn test_corrupt_cache_file_is_refetched() {
    init_tracing();
    let server = MockServer::start_async().await;
    let ofac_mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/ofac");
            then.status(200).body(OFAC_CSV);
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = FileCacheStore::new(dir.path()).unwrap();
    std::fs::write(store.path_for("OFAC"), b"{\"source_id\": \"OFAC\", truncated").unwrap();

    let engine = engine_at(
        base_config(mock_sources(&server, &["OFAC"])),
        Arc::new(store.clone()),
        t0(),
    );
    let matches = engine.resolve("Blue Marlin", DeclaredType::Auto).await;

    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].entity_type, EntityType::Person);
    ofac_mock.assert_calls_async(1).await;
    assert_eq!(store.get("OFAC").unwrap().dataset.len(), 3);

    let status = engine.cache_status();
    assert!(status[0].fresh);
    assert_eq!(status[0].fetched_at, Some(t0()));
    assert_eq!(engine.clear_cache().unwrap(), 1);
    assert!(!store.path_for("OFAC").exists());
}

// =========================================================================
// AGGREGATOR
// =========================================================================

#[tokio::test]
async fn test_aggregator_order_dedup_and_thresholds() {
    init_tracing();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/search/sanctions")
                .query_param("topics", "sanction")
                .header("Authorization", "ApiKey secret");
            then.status(200).json_body(serde_json::json!({
                "results": [
                    {"id": "NK-1", "caption": "OCEAN STAR", "schema": "Vessel", "score": 0.95},
                    {"id": "NK-2", "caption": "OCEAN STARS", "schema": "Vessel", "score": 0.75}
                ]
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/search/default");
            then.status(200).json_body(serde_json::json!({
                "results": [
                    {"id": "NK-1", "caption": "OCEAN STAR", "schema": "Vessel", "score": 0.95},
                    {"id": "NK-3", "caption": "STAR OF THE OCEAN", "schema": "Vessel", "score": 0.5}
                ]
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/ofac");
            then.status(200).body(OFAC_CSV);
        })
        .await;

    let config = base_config(mock_sources(&server, &["OFAC"]))
        .with_api_key("secret")
        .with_aggregator_url(server.base_url());
    let engine = engine_at(config, Arc::new(MemoryCacheStore::new()), t0());

    let matches = engine.resolve("Ocean Star", DeclaredType::Vessel).await;
    let summary: Vec<_> = matches
        .iter()
        .map(|m| (m.source_id.as_str(), m.matched_name.as_str(), m.match_type))
        .collect();

    // OCEAN WIND scores 0.5 against the OFAC list and is filtered out
    assert_eq!(
        summary,
        vec![
            ("OpenSanctions", "OCEAN STAR", MatchType::Exact),
            ("OpenSanctions", "OCEAN STARS", MatchType::Partial),
            ("OpenSanctions", "STAR OF THE OCEAN", MatchType::Fuzzy),
            ("OFAC", "OCEAN STAR", MatchType::Exact),
        ]
    );
    assert_eq!(
        matches[0].source_reference_url,
        "https://www.opensanctions.org/entities/NK-1"
    );
    assert_eq!(matches[2].confidence, 0.5);
}

#[tokio::test]
async fn test_aggregator_unauthorized_skips_remaining_datasets() {
    init_tracing();
    let server = MockServer::start_async().await;
    let sanctions = server
        .mock_async(|when, then| {
            when.method(GET).path("/search/sanctions");
            then.status(401);
        })
        .await;
    let default = server
        .mock_async(|when, then| {
            when.method(GET).path("/search/default");
            then.status(200).json_body(serde_json::json!({"results": []}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/ofac");
            then.status(200).body(OFAC_CSV);
        })
        .await;

    let config = base_config(mock_sources(&server, &["OFAC"]))
        .with_api_key("wrong")
        .with_aggregator_url(server.base_url());
    let engine = engine_at(config, Arc::new(MemoryCacheStore::new()), t0());

    let resolution = engine
        .resolve_query(
            &EntityQuery::new("Ocean Star", DeclaredType::Vessel),
            &CancelToken::new(),
        )
        .await;

    sanctions.assert_calls_async(1).await;
    default.assert_calls_async(0).await;
    assert_eq!(resolution.matches.len(), 1);
    assert_eq!(resolution.matches[0].source_id, "OFAC");
    assert_eq!(resolution.warnings.len(), 1);
    assert_eq!(resolution.warnings[0].source_id, "OpenSanctions");
    assert!(resolution.warnings[0].message.contains("401"));
}

// =========================================================================
// BATCH
// =========================================================================

#[tokio::test]
async fn test_batch_uses_single_match_call() {
    init_tracing();
    let server = MockServer::start_async().await;
    let match_mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/match/sanctions");
            then.status(200).json_body(serde_json::json!({
                "responses": {
                    "entity_0": {"results": [
                        {"id": "NK-1", "caption": "OCEAN STAR", "score": 0.97},
                        {"id": "NK-1", "caption": "OCEAN STAR", "score": 0.97}
                    ]},
                    "entity_1": {"results": []}
                }
            }));
        })
        .await;
    let ofac_mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/ofac");
            then.status(200).body(OFAC_CSV);
        })
        .await;

    let config = base_config(mock_sources(&server, &["OFAC"]))
        .with_api_key("secret")
        .with_aggregator_url(server.base_url());
    let engine = engine_at(config, Arc::new(MemoryCacheStore::new()), t0());

    let results = engine
        .resolve_batch(&[
            EntityQuery::new("Ocean Star", DeclaredType::Vessel),
            EntityQuery::auto("  "),
            EntityQuery::auto("John Smith"),
        ])
        .await;

    match_mock.assert_calls_async(1).await;
    ofac_mock.assert_calls_async(0).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results["Ocean Star"].len(), 1);
    assert_eq!(results["Ocean Star"][0].match_type, MatchType::Exact);
    assert!(results["John Smith"].is_empty());
}

#[tokio::test]
async fn test_batch_falls_back_to_individual_resolution() {
    init_tracing();
    let server = MockServer::start_async().await;
    let match_mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/match/sanctions");
            then.status(500);
        })
        .await;
    for path in ["/search/sanctions", "/search/default"] {
        server
            .mock_async(|when, then| {
                when.method(GET).path(path);
                then.status(500);
            })
            .await;
    }
    let ofac_mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/ofac");
            then.status(200).body(OFAC_CSV);
        })
        .await;

    let config = base_config(mock_sources(&server, &["OFAC"]))
        .with_api_key("secret")
        .with_aggregator_url(server.base_url())
        .with_retries(0, Duration::from_millis(1));
    let engine = engine_at(config, Arc::new(MemoryCacheStore::new()), t0());

    let results = engine
        .resolve_batch(&[
            EntityQuery::auto("Ocean Star"),
            EntityQuery::auto("Unknown Trading Ltd"),
        ])
        .await;

    match_mock.assert_calls_async(1).await;
    ofac_mock.assert_calls_async(1).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results["Ocean Star"].len(), 1);
    assert_eq!(results["Ocean Star"][0].source_id, "OFAC");
    assert!(results["Unknown Trading Ltd"].is_empty());
}

#[tokio::test]
async fn test_batch_without_aggregator_resolves_each_entity() {
    init_tracing();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/ofac");
            then.status(200).body(OFAC_CSV);
        })
        .await;

    let engine = engine_at(
        base_config(mock_sources(&server, &["OFAC"])),
        Arc::new(MemoryCacheStore::new()),
        t0(),
    );

    let results = engine
        .resolve_batch(&[EntityQuery::auto("Blue Marlin"), EntityQuery::auto("Ocean Wind")])
        .await;
    assert_eq!(results["Blue Marlin"].len(), 1);
    assert_eq!(results["Ocean Wind"].len(), 1);
}

// =========================================================================
// CANCELLATION
// =========================================================================

#[tokio::test]
async fn test_cancellation_keeps_completed_sources() {
    init_tracing();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/ofac");
            then.status(200).body(OFAC_CSV);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/un");
            then.status(200).body(UN_XML).delay(Duration::from_secs(5));
        })
        .await;

    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
    let engine = engine_at(
        base_config(mock_sources(&server, &["OFAC", "UN"])),
        cache.clone(),
        t0(),
    );

    let started = std::time::Instant::now();
    let resolution = engine
        .resolve_query(
            &EntityQuery::new("Ocean Star", DeclaredType::Vessel),
            &CancelToken::with_timeout(Duration::from_millis(300)),
        )
        .await;

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(resolution.matches.len(), 1);
    assert_eq!(resolution.matches[0].source_id, "OFAC");
    assert_eq!(resolution.warnings.len(), 1);
    assert_eq!(resolution.warnings[0].source_id, "UN");
    assert!(resolution.warnings[0].message.contains("cancelled"));
    assert!(cache.get("UN").is_none());
}

// =========================================================================
// PAYLOAD FORMATS
// =========================================================================

#[tokio::test]
async fn test_eu_spreadsheet_and_un_xml_sources() {
    init_tracing();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/eu");
            then.status(200).body(eu_workbook());
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/un");
            then.status(200).body(UN_XML);
        })
        .await;

    let engine = engine_at(
        base_config(mock_sources(&server, &["EU", "UN"])),
        Arc::new(MemoryCacheStore::new()),
        t0(),
    );

    let vessel = engine.resolve("Andrea", DeclaredType::Vessel).await;
    assert_eq!(vessel.len(), 1);
    assert_eq!(vessel[0].source_id, "EU");
    assert_eq!(vessel[0].raw_details["id"], serde_json::json!("9236353"));

    let person = engine.resolve("Ri Won Ho", DeclaredType::Auto).await;
    assert_eq!(person.len(), 1);
    assert_eq!(person[0].source_id, "UN");
    assert_eq!(person[0].entity_type, EntityType::Person);
    assert_eq!(person[0].raw_details["un_list_type"], serde_json::json!("DPRK"));
}

#[tokio::test]
async fn test_html_page_degrades_to_warning() {
    init_tracing();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/uk");
            then.status(200)
                .header("content-type", "text/html")
                .body("<!DOCTYPE html><html><body>The UK Sanctions List</body></html>");
        })
        .await;

    let engine = engine_at(
        base_config(mock_sources(&server, &["UK"])),
        Arc::new(MemoryCacheStore::new()),
        t0(),
    );

    let resolution = engine
        .resolve_query(&EntityQuery::auto("Ocean Star"), &CancelToken::new())
        .await;
    assert!(resolution.matches.is_empty());
    assert_eq!(resolution.warnings[0].source_id, "UK");
    assert!(resolution.warnings[0].message.contains("markup"));
}

// =========================================================================
// MAINTENANCE
// =========================================================================

#[tokio::test]
async fn test_check_connections_reports_each_source() {
    init_tracing();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/catalog");
            then.status(200)
                .json_body(serde_json::json!({"datasets": [{"name": "sanctions"}]}));
        })
        .await;
    let ofac_mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/ofac");
            then.status(200).body(OFAC_CSV);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/un");
            then.status(404);
        })
        .await;

    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
    cache
        .put(&CacheEntry::new("OFAC", t0(), Dataset::empty()))
        .unwrap();

    let config = base_config(mock_sources(&server, &["OFAC", "UN"]))
        .with_api_key("secret")
        .with_aggregator_url(server.base_url());
    let engine = engine_at(config, cache, t0());

    let reports = engine.check_connections().await;
    let summary: Vec<_> = reports
        .iter()
        .map(|r| (r.source_id.as_str(), r.ok, r.records))
        .collect();
    assert_eq!(
        summary,
        vec![("OpenSanctions", true, 1), ("OFAC", true, 5), ("UN", false, 0)]
    );
    ofac_mock.assert_calls_async(1).await;

    assert_eq!(engine.dataset_catalog().await[0].name, "sanctions");
}

#[test]
fn test_engine_rejects_missing_source_url() {
    let mut spec = ofac();
    spec.url = "   ".to_string();
    let config = EngineConfig::default().with_sources(vec![
        spec,
        SourceSpec::new("X", "X", "https://example.org/x.csv", PayloadFormat::Csv { columns: None }),
    ]);
    let err = ResolutionEngine::with_parts(
        config,
        Arc::new(MemoryCacheStore::new()),
        Arc::new(FixedClock(t0())),
    )
    .err()
    .unwrap();
    assert!(err.to_string().contains("OFAC"));
}
