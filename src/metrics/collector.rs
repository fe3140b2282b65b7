//! 指标采集器：并发抓取成员的Prometheus端点并回写快照

use anyhow::Result;
use reqwest::Client;
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::prometheus::{has_required_metrics, parse_engine_metrics};
use crate::error::SchedulerError;
use crate::store::models::{EngineType, MemberStatus};
use crate::store::{MetricsEndpoint, Pool};

/// 单Pool内成员抓取的默认并发上限
pub const DEFAULT_SCRAPE_CONCURRENCY: usize = 64;

/// 指标采集器。采集请求的并发度由信号量约束；
/// 成员级in-flight保护避免调度错位时对同一端点发出重复请求。
pub struct MetricsCollector {
    client: Client,
    permits: Arc<Semaphore>,
    in_flight: Arc<StdMutex<HashSet<String>>>,
}

impl MetricsCollector {
    pub fn new(max_concurrent_scrapes: usize) -> Result<Self> {
        // 引擎侧常见自签名证书，跳过校验；超时逐请求指定
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(max_concurrent_scrapes.max(1))),
            in_flight: Arc::new(StdMutex::new(HashSet::new())),
        })
    }

    /// 采集一个Pool全部成员的指标并触发重算。
    /// 上一轮tick未结束时直接跳过（tick skipping而非排队）。
    pub async fn collect_pool(&self, pool: Arc<Pool>) {
        let Ok(_tick_guard) = pool.scrape_guard.try_lock() else {
            debug!(pool = %pool.key(), "previous metrics tick still running, skipping");
            return;
        };

        let (endpoint, engine_type, member_keys) = {
            let state = pool.state().await;
            let keys: Vec<(String, String, u16)> = state
                .members
                .iter()
                .map(|m| (m.key(), m.ip.clone(), m.port))
                .collect();
            (state.metrics_endpoint.clone(), state.engine_type, keys)
        };

        if member_keys.is_empty() {
            debug!(pool = %pool.key(), "pool has no members, skipping metrics collection");
            return;
        }

        let mut handles = Vec::with_capacity(member_keys.len());
        for (member_key, ip, port) in member_keys {
            let guard_key = format!("{}|{}", pool.key(), member_key);
            {
                let mut in_flight = self.in_flight.lock().expect("in-flight set lock poisoned");
                if !in_flight.insert(guard_key.clone()) {
                    debug!(member = %member_key, "scrape already in flight, skipping");
                    continue;
                }
            }

            let client = self.client.clone();
            let permits = self.permits.clone();
            let in_flight = self.in_flight.clone();
            let endpoint = endpoint.clone();
            let pool = pool.clone();

            handles.push(tokio::spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };

                let port_override = endpoint.port;
                let url = format!(
                    "{}://{}:{}{}",
                    endpoint.schema,
                    ip,
                    port_override.unwrap_or(port),
                    endpoint.path
                );
                let result = match scrape_member(&client, &url, &endpoint, engine_type).await {
                    Ok(metrics) => Ok(metrics),
                    Err(e) => {
                        warn!(member = %member_key, "{}", e);
                        Err(match e {
                            SchedulerError::MetricsParse(_) => MemberStatus::ParseError,
                            _ => MemberStatus::Unreachable,
                        })
                    }
                };
                pool.record_scrape_result(&member_key, result).await;

                in_flight
                    .lock()
                    .expect("in-flight set lock poisoned")
                    .remove(&guard_key);
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(pool = %pool.key(), "scrape task panicked: {}", e);
            }
        }

        // 本Pool本轮采集完毕，立即重算分值
        pool.rescore().await;
    }
}

/// 抓取单个成员的指标端点。失败以错误种类返回，
/// 由调用方折算成状态降级，绝不向tick外传播。
async fn scrape_member(
    client: &Client,
    url: &str,
    endpoint: &MetricsEndpoint,
    engine_type: EngineType,
) -> crate::error::Result<std::collections::HashMap<String, f64>> {
    let mut request = client.get(url).timeout(endpoint.timeout);

    if let Some(api_key) = &endpoint.api_key {
        request = request.bearer_auth(api_key);
    } else if let Some(username) = &endpoint.username {
        request = request.basic_auth(username, endpoint.password.as_deref());
    }

    let response = request.send().await?;

    if !response.status().is_success() {
        return Err(SchedulerError::MetricsFetch(format!(
            "{url}: HTTP {}",
            response.status()
        )));
    }

    let body = response
        .text()
        .await
        .map_err(|e| SchedulerError::MetricsFetch(format!("{url}: failed to read body: {e}")))?;

    let metrics = parse_engine_metrics(&body, engine_type);
    if !has_required_metrics(&metrics) {
        return Err(SchedulerError::MetricsParse(format!(
            "{url}: body missing required gauges"
        )));
    }

    debug!(url, ?metrics, "scraped member metrics");
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::{Algorithm, ScoreParams};
    use crate::store::{FallbackSettings, PoolState};

    fn empty_pool() -> Arc<Pool> {
        Arc::new(Pool::new(
            "llm-pool",
            "Common",
            PoolState {
                engine_type: EngineType::Vllm,
                members: Vec::new(),
                algorithm: Algorithm::S1,
                params: ScoreParams::default(),
                fallback: FallbackSettings::default(),
                metrics_endpoint: MetricsEndpoint::default(),
                consecutive_failures: 0,
            },
        ))
    }

    #[tokio::test]
    async fn test_collect_empty_pool_is_noop() {
        let collector = MetricsCollector::new(4).unwrap();
        collector.collect_pool(empty_pool()).await;
    }

    #[tokio::test]
    async fn test_tick_skipped_when_guard_held() {
        let collector = MetricsCollector::new(4).unwrap();
        let pool = empty_pool();

        let _held = pool.scrape_guard.lock().await;
        // try_lock失败 → 本轮直接返回而不是排队
        collector.collect_pool(pool.clone()).await;
    }
}
