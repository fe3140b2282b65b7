//! 共享内存状态：Pool注册表、Pool与成员模型

pub mod models;
pub mod pool;

pub use models::{EngineType, MemberStatus, PoolMember};
pub use pool::{
    pool_key, CandidateSnapshot, FallbackSettings, MetricsEndpoint, Pool, PoolState,
    PoolStatusView, ReconcileStats, SelectSnapshot,
};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// 进程级Pool注册表。注册表自身用轻量读写锁保护（临界区仅做
/// map操作），Pool内部状态由各Pool自己的锁管理，跨Pool操作互不阻塞。
#[derive(Debug, Default)]
pub struct PoolStore {
    pools: RwLock<HashMap<String, Arc<Pool>>>,
}

impl PoolStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, partition: &str, name: &str) -> Option<Arc<Pool>> {
        self.pools
            .read()
            .expect("pool registry lock poisoned")
            .get(&pool_key(partition, name))
            .cloned()
    }

    pub fn contains(&self, partition: &str, name: &str) -> bool {
        self.pools
            .read()
            .expect("pool registry lock poisoned")
            .contains_key(&pool_key(partition, name))
    }

    /// 注册新Pool；已存在时返回现有实例（身份不可变）
    pub fn insert(&self, pool: Arc<Pool>) -> Arc<Pool> {
        let mut pools = self.pools.write().expect("pool registry lock poisoned");
        let key = pool.key();
        pools.entry(key).or_insert(pool).clone()
    }

    pub fn remove(&self, partition: &str, name: &str) -> Option<Arc<Pool>> {
        let removed = self
            .pools
            .write()
            .expect("pool registry lock poisoned")
            .remove(&pool_key(partition, name));
        if removed.is_some() {
            info!(pool = %pool_key(partition, name), "pool removed from registry");
        }
        removed
    }

    pub fn all(&self) -> Vec<Arc<Pool>> {
        self.pools
            .read()
            .expect("pool registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pools
            .read()
            .expect("pool registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
