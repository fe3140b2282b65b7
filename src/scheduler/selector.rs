//! 加权随机选择器

use rand::Rng;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::store::models::parse_member_key;
use crate::store::{PoolStore, SelectSnapshot};

/// 一次选择的结果，对外渲染为 "ip:port" / "none" / "fallback"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Member(String),
    NoneAvailable,
    Fallback,
}

impl Selection {
    pub fn as_response_text(&self) -> &str {
        match self {
            Selection::Member(key) => key,
            Selection::NoneAvailable => "none",
            Selection::Fallback => "fallback",
        }
    }
}

/// 调度器：按Pool的冻结快照执行过滤与加权随机抽取。
/// 上游数据问题一律以NoneAvailable收敛，绝不向调用方抛错。
pub struct Scheduler {
    store: Arc<PoolStore>,
}

impl Scheduler {
    pub fn new(store: Arc<PoolStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<PoolStore> {
        &self.store
    }

    /// 为候选列表选出最优成员
    pub async fn select(
        &self,
        pool_name: &str,
        partition: &str,
        candidates: &[String],
    ) -> Selection {
        let Some(snapshot) = self.freeze(pool_name, partition, candidates).await else {
            return Selection::NoneAvailable;
        };
        select_from_snapshot(&snapshot)
    }

    /// 冻结一次选择所需的全部状态。Pool不存在时返回None。
    pub(crate) async fn freeze(
        &self,
        pool_name: &str,
        partition: &str,
        candidates: &[String],
    ) -> Option<SelectSnapshot> {
        let Some(pool) = self.store.get(partition, pool_name) else {
            warn!(pool = pool_name, partition, "pool not found");
            return None;
        };

        // 候选全部非法时交集为空，由后续流水线收敛为none；
        // fallback门不依赖候选解析结果
        let parsed = parse_candidates(candidates);
        if parsed.is_empty() {
            warn!(pool = pool_name, "candidate member list is empty or malformed");
        }

        Some(pool.select_snapshot(&parsed).await)
    }
}

/// 解析候选成员列表，非法条目跳过并告警
pub(crate) fn parse_candidates(candidates: &[String]) -> Vec<(String, u16)> {
    let mut parsed = Vec::with_capacity(candidates.len());
    for raw in candidates {
        match parse_member_key(raw) {
            Some(member) => parsed.push(member),
            None => warn!(member = %raw, "invalid candidate member format, skipped"),
        }
    }
    parsed
}

/// 对冻结快照执行完整的选择流水线
pub fn select_from_snapshot(snapshot: &SelectSnapshot) -> Selection {
    // Pool级fallback门：不打分、不抽取
    if snapshot.pool_fallback {
        return Selection::Fallback;
    }

    let eligible = eligible_candidates(snapshot);
    if eligible.is_empty() {
        debug!("no eligible candidate after filtering");
        return Selection::NoneAvailable;
    }

    match weighted_draw(&eligible) {
        Some(key) => Selection::Member(key.to_string()),
        None => Selection::NoneAvailable,
    }
}

/// 阈值过滤与零分剔除。
/// 阈值作用在原始指标上；被阈值检查的指标缺失时保守地保留该成员。
pub fn eligible_candidates(snapshot: &SelectSnapshot) -> Vec<(String, f64)> {
    snapshot
        .candidates
        .iter()
        .filter(|candidate| {
            if let (Some(threshold), Some(running)) = (
                snapshot.member_running_req_threshold,
                candidate.running_req,
            ) {
                if running > threshold {
                    debug!(
                        member = %candidate.key,
                        running, threshold, "member dropped by running_req threshold"
                    );
                    return false;
                }
            }
            if let (Some(threshold), Some(waiting)) = (
                snapshot.member_waiting_queue_threshold,
                candidate.waiting_queue,
            ) {
                if waiting > threshold {
                    debug!(
                        member = %candidate.key,
                        waiting, threshold, "member dropped by waiting_queue threshold"
                    );
                    return false;
                }
            }
            true
        })
        .filter(|candidate| candidate.score > 0.0)
        .map(|candidate| (candidate.key.clone(), candidate.score))
        .collect()
}

/// 加权随机抽取：u ~ Uniform(0, S)，取前缀和首次覆盖u的成员。
/// 线程本地PRNG，进程启动时由操作系统熵源播种。
pub fn weighted_draw(candidates: &[(String, f64)]) -> Option<&str> {
    if candidates.is_empty() {
        return None;
    }
    if candidates.len() == 1 {
        return Some(candidates[0].0.as_str());
    }

    let total: f64 = candidates.iter().map(|(_, score)| score).sum();
    if total <= 0.0 {
        return None;
    }

    let mut rng = rand::thread_rng();
    let point = rng.gen_range(0.0..total);

    let mut cumulative = 0.0;
    for (key, score) in candidates {
        cumulative += score;
        if cumulative >= point {
            return Some(key.as_str());
        }
    }

    // 浮点累加误差兜底
    candidates.last().map(|(key, _)| key.as_str())
}
