//! HTTP接口端到端测试：不依赖真实LTM与推理引擎，
//! 直接向Pool存储注入状态

use axum_test::TestServer;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use llm_gateway_scheduler::app::AppState;
use llm_gateway_scheduler::router::create_app_router;
use llm_gateway_scheduler::score::{Algorithm, ScoreParams};
use llm_gateway_scheduler::store::models::{
    METRIC_CACHE_USAGE, METRIC_RUNNING_REQ, METRIC_WAITING_QUEUE,
};
use llm_gateway_scheduler::store::{
    EngineType, FallbackSettings, MetricsEndpoint, Pool, PoolMember, PoolState, PoolStore,
};

struct MemberSpec {
    ip: &'static str,
    port: u16,
    score: f64,
    waiting: Option<f64>,
    cache: Option<f64>,
    running: Option<f64>,
}

fn member(spec: &MemberSpec) -> PoolMember {
    let mut member = PoolMember::new(spec.ip, spec.port);
    member.score = spec.score;
    let mut metrics = HashMap::new();
    if let Some(v) = spec.waiting {
        metrics.insert(METRIC_WAITING_QUEUE.to_string(), v);
    }
    if let Some(v) = spec.cache {
        metrics.insert(METRIC_CACHE_USAGE.to_string(), v);
    }
    if let Some(v) = spec.running {
        metrics.insert(METRIC_RUNNING_REQ.to_string(), v);
    }
    member.metrics = metrics;
    member
}

fn seed_pool(
    store: &PoolStore,
    name: &str,
    partition: &str,
    fallback: FallbackSettings,
    members: Vec<PoolMember>,
) {
    store.insert(Arc::new(Pool::new(
        name,
        partition,
        PoolState {
            engine_type: EngineType::Vllm,
            members,
            algorithm: Algorithm::S1,
            params: ScoreParams::default(),
            fallback,
            metrics_endpoint: MetricsEndpoint::default(),
            consecutive_failures: 0,
        },
    )));
}

fn server_with_store() -> (TestServer, Arc<PoolStore>) {
    let store = Arc::new(PoolStore::new());
    let state = AppState::new(store.clone());
    let app = create_app_router().with_state(state);
    (TestServer::new(app).unwrap(), store)
}

fn select_body(pool: &str, partition: &str, members: &[&str]) -> Value {
    json!({
        "pool_name": pool,
        "partition": partition,
        "members": members,
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let (server, _store) = server_with_store();
    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_select_malformed_body_is_400() {
    let (server, _store) = server_with_store();

    let response = server
        .post("/scheduler/select")
        .json(&json!({"pool_name": "p"}))
        .await;
    assert_eq!(response.status_code().as_u16(), 400);

    let response = server
        .post("/scheduler/select")
        .json(&select_body("", "Common", &["10.0.0.1:8000"]))
        .await;
    assert_eq!(response.status_code().as_u16(), 400);

    let response = server
        .post("/scheduler/select")
        .json(&select_body("p", "Common", &[]))
        .await;
    assert_eq!(response.status_code().as_u16(), 400);
}

#[tokio::test]
async fn test_select_unknown_pool_returns_none() {
    let (server, _store) = server_with_store();
    let response = server
        .post("/scheduler/select")
        .json(&select_body("ghost", "Common", &["10.0.0.1:8000"]))
        .await;
    response.assert_status_ok();
    assert_eq!(response.text(), "none");
}

#[tokio::test]
async fn test_select_disjoint_candidates_returns_none() {
    let (server, store) = server_with_store();
    seed_pool(
        &store,
        "llm-pool",
        "Common",
        FallbackSettings::default(),
        vec![member(&MemberSpec {
            ip: "10.0.0.1",
            port: 8000,
            score: 0.9,
            waiting: Some(1.0),
            cache: Some(0.2),
            running: None,
        })],
    );

    let response = server
        .post("/scheduler/select")
        .json(&select_body("llm-pool", "Common", &["10.9.9.9:8000"]))
        .await;
    response.assert_status_ok();
    assert_eq!(response.text(), "none");
}

#[tokio::test]
async fn test_select_returns_member_from_candidates() {
    let (server, store) = server_with_store();
    seed_pool(
        &store,
        "llm-pool",
        "Common",
        FallbackSettings::default(),
        vec![
            member(&MemberSpec {
                ip: "10.0.0.1",
                port: 8000,
                score: 0.7,
                waiting: Some(1.0),
                cache: Some(0.2),
                running: None,
            }),
            member(&MemberSpec {
                ip: "10.0.0.2",
                port: 8000,
                score: 0.3,
                waiting: Some(3.0),
                cache: Some(0.5),
                running: None,
            }),
        ],
    );

    let response = server
        .post("/scheduler/select")
        .json(&select_body(
            "llm-pool",
            "Common",
            &["10.0.0.1:8000", "10.0.0.2:8000"],
        ))
        .await;
    response.assert_status_ok();
    let selected = response.text();
    assert!(selected == "10.0.0.1:8000" || selected == "10.0.0.2:8000");
}

#[tokio::test]
async fn test_pool_fallback_gates_every_select() {
    let (server, store) = server_with_store();
    seed_pool(
        &store,
        "fallback-pool",
        "Common",
        FallbackSettings {
            pool_fallback: true,
            ..FallbackSettings::default()
        },
        vec![member(&MemberSpec {
            ip: "10.0.0.1",
            port: 8000,
            score: 0.9,
            waiting: Some(1.0),
            cache: Some(0.2),
            running: None,
        })],
    );

    for _ in 0..10 {
        let response = server
            .post("/scheduler/select")
            .json(&select_body("fallback-pool", "Common", &["10.0.0.1:8000"]))
            .await;
        response.assert_status_ok();
        assert_eq!(response.text(), "fallback");
    }

    // fallback开启时状态接口依然正常上报指标与分值
    let response = server.get("/pools/fallback-pool/Common/status").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["members"][0]["score"], 0.9);
}

#[tokio::test]
async fn test_pool_status_endpoints() {
    let (server, store) = server_with_store();
    seed_pool(
        &store,
        "llm-pool",
        "Prod",
        FallbackSettings::default(),
        vec![member(&MemberSpec {
            ip: "10.0.0.1",
            port: 8000,
            score: 0.5,
            waiting: Some(2.0),
            cache: Some(0.3),
            running: Some(4.0),
        })],
    );

    let response = server.get("/pools/llm-pool/Prod/status").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["name"], "llm-pool");
    assert_eq!(body["partition"], "Prod");
    assert_eq!(body["engine_type"], "vllm");
    assert_eq!(body["member_count"], 1);
    assert_eq!(body["members"][0]["ip"], "10.0.0.1");
    assert_eq!(body["members"][0]["port"], 8000);
    assert_eq!(body["members"][0]["status"], "ready");
    assert_eq!(body["members"][0]["metrics"][METRIC_WAITING_QUEUE], 2.0);

    let response = server.get("/pools/ghost/Prod/status").await;
    assert_eq!(response.status_code().as_u16(), 404);

    let response = server.get("/pools/status").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["pools"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_threshold_eviction_always_selects_below_threshold() {
    // 阈值作用在原始waiting_queue上：超阈值成员1000次都不被选中
    let (server, store) = server_with_store();
    seed_pool(
        &store,
        "llm-pool",
        "Common",
        FallbackSettings {
            pool_fallback: false,
            member_running_req_threshold: None,
            member_waiting_queue_threshold: Some(10.0),
        },
        vec![
            member(&MemberSpec {
                ip: "10.0.0.1",
                port: 8000,
                score: 0.9,
                waiting: Some(20.0),
                cache: Some(0.1),
                running: None,
            }),
            member(&MemberSpec {
                ip: "10.0.0.2",
                port: 8000,
                score: 0.1,
                waiting: Some(5.0),
                cache: Some(0.4),
                running: None,
            }),
        ],
    );

    let response = server
        .post("/pools/llm-pool/Common/simulate")
        .add_query_param("iterations", 1000)
        .json(&select_body(
            "llm-pool",
            "Common",
            &["10.0.0.1:8000", "10.0.0.2:8000"],
        ))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["iterations"], 1000);
    assert_eq!(body["results"]["10.0.0.2:8000"], 1000);
    assert!(body["results"].get("10.0.0.1:8000").is_none());
}

#[tokio::test]
async fn test_missing_metrics_member_kept_by_threshold_but_unselectable() {
    // 无指标成员不被阈值过滤（保守策略），但0分使其不可选
    let (server, store) = server_with_store();
    seed_pool(
        &store,
        "llm-pool",
        "Common",
        FallbackSettings {
            pool_fallback: false,
            member_running_req_threshold: Some(5.0),
            member_waiting_queue_threshold: None,
        },
        vec![
            member(&MemberSpec {
                ip: "10.0.0.1",
                port: 8000,
                score: 0.5,
                waiting: Some(1.0),
                cache: Some(0.2),
                running: Some(2.0),
            }),
            member(&MemberSpec {
                ip: "10.0.0.2",
                port: 8000,
                score: 0.25,
                waiting: Some(2.0),
                cache: Some(0.4),
                running: Some(3.0),
            }),
            // Z：从未上报过指标
            member(&MemberSpec {
                ip: "10.0.0.3",
                port: 8000,
                score: 0.0,
                waiting: None,
                cache: None,
                running: None,
            }),
        ],
    );

    let candidates = ["10.0.0.1:8000", "10.0.0.2:8000", "10.0.0.3:8000"];
    let response = server
        .post("/pools/llm-pool/Common/simulate")
        .add_query_param("iterations", 1000)
        .json(&select_body("llm-pool", "Common", &candidates))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();

    assert!(body["results"].get("10.0.0.3:8000").is_none());
    let x = body["results"]["10.0.0.1:8000"].as_u64().unwrap_or(0);
    let y = body["results"]["10.0.0.2:8000"].as_u64().unwrap_or(0);
    assert_eq!(x + y, 1000);
    // X分值是Y的两倍，选中次数应明显占优
    assert!(x > y);
}

#[tokio::test]
async fn test_analyze_reports_excellent_for_stable_distribution() {
    // 0.6/0.3/0.1的分布在10000次抽取下应达到Excellent
    let (server, store) = server_with_store();
    seed_pool(
        &store,
        "llm-pool",
        "Common",
        FallbackSettings::default(),
        vec![
            member(&MemberSpec {
                ip: "10.0.0.1",
                port: 8000,
                score: 0.6,
                waiting: Some(1.0),
                cache: Some(0.1),
                running: None,
            }),
            member(&MemberSpec {
                ip: "10.0.0.2",
                port: 8000,
                score: 0.3,
                waiting: Some(2.0),
                cache: Some(0.3),
                running: None,
            }),
            member(&MemberSpec {
                ip: "10.0.0.3",
                port: 8000,
                score: 0.1,
                waiting: Some(4.0),
                cache: Some(0.7),
                running: None,
            }),
        ],
    );

    let candidates = ["10.0.0.1:8000", "10.0.0.2:8000", "10.0.0.3:8000"];
    let response = server
        .post("/pools/llm-pool/Common/analyze")
        .add_query_param("iterations", 10000)
        .json(&select_body("llm-pool", "Common", &candidates))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();

    assert_eq!(body["overall_statistics"]["total_iterations"], 10000);
    assert_eq!(body["overall_statistics"]["successful_selections"], 10000);
    assert_eq!(body["quality_assessment"]["quality_grade"], "Excellent");

    let member_a = &body["members"]["10.0.0.1:8000"];
    let theoretical = member_a["theoretical_probability"].as_f64().unwrap();
    assert!((theoretical - 0.6).abs() < 1e-9);

    // 10000次抽取，3σ范围内收敛
    let count = member_a["selection_count"].as_u64().unwrap() as f64;
    assert!((count - 6000.0).abs() <= 150.0);
}

#[tokio::test]
async fn test_analyze_unknown_pool_reports_error_without_5xx() {
    let (server, _store) = server_with_store();
    let response = server
        .post("/pools/ghost/Common/analyze")
        .json(&select_body("ghost", "Common", &["10.0.0.1:8000"]))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn test_simulate_counts_sum_to_iterations() {
    let (server, store) = server_with_store();
    seed_pool(
        &store,
        "llm-pool",
        "Common",
        FallbackSettings::default(),
        vec![
            member(&MemberSpec {
                ip: "10.0.0.1",
                port: 8000,
                score: 0.5,
                waiting: Some(1.0),
                cache: Some(0.1),
                running: None,
            }),
            member(&MemberSpec {
                ip: "10.0.0.2",
                port: 8000,
                score: 0.5,
                waiting: Some(1.0),
                cache: Some(0.1),
                running: None,
            }),
        ],
    );

    let response = server
        .post("/pools/llm-pool/Common/simulate")
        .add_query_param("iterations", 500)
        .json(&select_body(
            "llm-pool",
            "Common",
            &["10.0.0.1:8000", "10.0.0.2:8000"],
        ))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    let total: u64 = body["results"]
        .as_object()
        .unwrap()
        .values()
        .map(|v| v.as_u64().unwrap())
        .sum();
    assert_eq!(total, 500);
}
