//! 成员拉取器：周期性将LTM权威成员列表同步进Pool存储

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::client::LtmClient;
use crate::config::{AppConfig, ModeConfig, PoolConfig};
use crate::error::SchedulerError;
use crate::store::{Pool, PoolStore};

/// 连续严重失败达到该次数后，认为Pool已在LTM侧删除并清出内存
pub const FETCH_FAILURE_THRESHOLD: u32 = 5;

/// 成员拉取器。拉取失败保留既有成员集合：过期的成员数据
/// 优于没有成员数据。
#[derive(Clone)]
pub struct MembershipFetcher {
    client: Arc<LtmClient>,
    store: Arc<PoolStore>,
}

impl MembershipFetcher {
    pub fn new(client: Arc<LtmClient>, store: Arc<PoolStore>) -> Self {
        Self { client, store }
    }

    /// 拉取配置中全部Pool的成员，Pool间并发执行
    pub async fn fetch_all(&self, config: &AppConfig) {
        let mut handles: Vec<(String, JoinHandle<()>)> = Vec::with_capacity(config.pools.len());

        for pool_config in &config.pools {
            let fetcher = self.clone();
            let pool_config = pool_config.clone();
            let mode = config.resolve_mode(&pool_config).clone();

            let label = format!("{}/{}", pool_config.partition, pool_config.name);
            handles.push((
                label,
                tokio::spawn(async move {
                    fetcher.fetch_pool(&pool_config, &mode).await;
                }),
            ));
        }

        for (pool, handle) in handles {
            if let Err(e) = handle.await {
                error!(pool = %pool, "pool fetch task panicked: {}", e);
            }
        }
    }

    /// 拉取单个Pool并同步成员。同一Pool的拉取不重叠：
    /// 上一轮仍在途时跳过本轮。
    pub async fn fetch_pool(&self, pool_config: &PoolConfig, mode: &ModeConfig) {
        let existing = self.store.get(&pool_config.partition, &pool_config.name);

        let guard_holder = existing.clone();
        let _fetch_guard = match guard_holder.as_ref() {
            Some(pool) => match pool.fetch_guard.try_lock() {
                Ok(guard) => Some(guard),
                Err(_) => {
                    debug!(pool = %pool.key(), "previous membership fetch still in flight, skipping");
                    return;
                }
            },
            None => None,
        };

        match self
            .client
            .get_pool_members(&pool_config.name, &pool_config.partition)
            .await
        {
            Ok(members) => {
                let pool = match existing {
                    Some(pool) => pool,
                    None => {
                        let state = match pool_config.to_pool_state(mode) {
                            Ok(state) => state,
                            Err(e) => {
                                error!(pool = %pool_config.name, "cannot build pool state: {}", e);
                                return;
                            }
                        };
                        let created = self.store.insert(Arc::new(Pool::new(
                            &pool_config.name,
                            &pool_config.partition,
                            state,
                        )));
                        info!(pool = %created.key(), "created pool on first successful fetch");
                        created
                    }
                };

                let stats = pool.reconcile_members(members).await;
                info!(
                    pool = %pool.key(),
                    preserved = stats.preserved,
                    added = stats.added,
                    removed = stats.removed,
                    total = stats.total,
                    "pool membership synchronized"
                );
            }
            Err(e) => self.handle_fetch_failure(pool_config, e).await,
        }
    }

    /// 拉取失败处理：保留既有成员；严重失败计数累积到阈值后
    /// 认为Pool已被删除，从内存清理。
    pub(crate) async fn handle_fetch_failure(&self, pool_config: &PoolConfig, error: SchedulerError) {
        let serious = error.is_serious_fetch_failure();
        error!(
            pool = %pool_config.name,
            partition = %pool_config.partition,
            serious,
            "failed to fetch pool members: {}",
            error
        );

        if !serious {
            info!(
                pool = %pool_config.name,
                "temporary fetch issue, previous membership retained and not counted"
            );
            return;
        }

        let Some(pool) = self.store.get(&pool_config.partition, &pool_config.name) else {
            return;
        };

        let failures = {
            let mut state = pool.state_mut().await;
            state.consecutive_failures += 1;
            state.consecutive_failures
        };

        warn!(
            pool = %pool.key(),
            failures,
            threshold = FETCH_FAILURE_THRESHOLD,
            "pool fetch serious failure counted"
        );

        if failures >= FETCH_FAILURE_THRESHOLD {
            warn!(
                pool = %pool.key(),
                "consecutive serious failures reached threshold, pool likely deleted upstream, cleaning from memory"
            );
            self.store.remove(&pool_config.partition, &pool_config.name);
        }
    }
}
