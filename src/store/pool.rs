use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::models::{MemberStatus, PoolMember};
use crate::score::{calculate_pool_scores, Algorithm, ScoreParams};
use crate::store::models::EngineType;

/// Pool级fallback与成员阈值过滤配置
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FallbackSettings {
    pub pool_fallback: bool,
    pub member_running_req_threshold: Option<f64>,
    pub member_waiting_queue_threshold: Option<f64>,
}

/// 指标采集端点模板（按Pool配置）
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsEndpoint {
    pub schema: String,
    /// 配置了固定端口时所有成员都用它，否则用成员自身端口
    pub port: Option<u16>,
    pub path: String,
    pub timeout: Duration,
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for MetricsEndpoint {
    fn default() -> Self {
        Self {
            schema: "http".to_string(),
            port: None,
            path: "/metrics".to_string(),
            timeout: Duration::from_secs(3),
            api_key: None,
            username: None,
            password: None,
        }
    }
}

/// Pool的可变内部状态，持有者为Pool自身的读写锁
#[derive(Debug)]
pub struct PoolState {
    pub engine_type: EngineType,
    pub members: Vec<PoolMember>,
    pub algorithm: Algorithm,
    pub params: ScoreParams,
    pub fallback: FallbackSettings,
    pub metrics_endpoint: MetricsEndpoint,
    /// LTM拉取连续严重失败计数
    pub consecutive_failures: u32,
}

/// Pool：(name, partition)全局唯一。成员、指标、分值等可变状态
/// 集中在内部读写锁之下；同一Pool的成员同步、指标写入、打分互斥，
/// 读侧（选择器、状态查询）互不阻塞。
#[derive(Debug)]
pub struct Pool {
    name: String,
    partition: String,
    state: RwLock<PoolState>,
    /// 成员拉取的防重入保护：上一轮未结束时跳过本轮
    pub(crate) fetch_guard: Mutex<()>,
    /// 指标采集tick的防重入保护
    pub(crate) scrape_guard: Mutex<()>,
}

/// 成员同步的增量统计
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub preserved: usize,
    pub added: usize,
    pub removed: usize,
    pub total: usize,
}

/// 选择器使用的冻结候选快照
#[derive(Debug, Clone)]
pub struct CandidateSnapshot {
    pub key: String,
    pub score: f64,
    pub waiting_queue: Option<f64>,
    pub running_req: Option<f64>,
}

/// 一次选择所需的全部冻结状态
#[derive(Debug, Clone)]
pub struct SelectSnapshot {
    pub pool_fallback: bool,
    pub member_running_req_threshold: Option<f64>,
    pub member_waiting_queue_threshold: Option<f64>,
    pub candidates: Vec<CandidateSnapshot>,
}

/// 状态接口的成员视图
#[derive(Debug, Clone, Serialize)]
pub struct MemberStatusView {
    pub ip: String,
    pub port: u16,
    pub score: f64,
    /// 占全池分值的百分比
    pub percent: f64,
    pub metrics: HashMap<String, f64>,
    pub status: MemberStatus,
    pub last_metrics_update: Option<DateTime<Utc>>,
    pub last_score_update: Option<DateTime<Utc>>,
}

/// 状态接口的Pool视图
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatusView {
    pub name: String,
    pub partition: String,
    pub engine_type: String,
    pub member_count: usize,
    pub members: Vec<MemberStatusView>,
}

impl Pool {
    pub fn new(name: impl Into<String>, partition: impl Into<String>, state: PoolState) -> Self {
        Self {
            name: name.into(),
            partition: partition.into(),
            state: RwLock::new(state),
            fetch_guard: Mutex::new(()),
            scrape_guard: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn key(&self) -> String {
        pool_key(&self.partition, &self.name)
    }

    pub async fn state(&self) -> tokio::sync::RwLockReadGuard<'_, PoolState> {
        self.state.read().await
    }

    pub async fn state_mut(&self) -> tokio::sync::RwLockWriteGuard<'_, PoolState> {
        self.state.write().await
    }

    /// 按LTM返回的权威成员列表同步本地成员。
    /// 留存成员保持指标、分值、状态与时间戳；新成员以Ready加入、
    /// 指标为空、分值为0；消失的成员被移除。同步后立即重算分值。
    pub async fn reconcile_members(&self, authoritative: Vec<(String, u16)>) -> ReconcileStats {
        let mut state = self.state.write().await;

        let mut existing: HashMap<String, PoolMember> = state
            .members
            .drain(..)
            .map(|member| (member.key(), member))
            .collect();

        let old_count = existing.len();
        let mut preserved = 0usize;
        let mut updated: Vec<PoolMember> = Vec::with_capacity(authoritative.len());

        for (ip, port) in authoritative {
            let key = format!("{ip}:{port}");
            if let Some(member) = existing.remove(&key) {
                preserved += 1;
                updated.push(member);
            } else {
                updated.push(PoolMember::new(ip, port));
            }
        }

        let stats = ReconcileStats {
            preserved,
            added: updated.len() - preserved,
            removed: old_count - preserved,
            total: updated.len(),
        };

        state.members = updated;
        state.consecutive_failures = 0;

        let algorithm = state.algorithm;
        let params = state.params.clone();
        calculate_pool_scores(&mut state.members, algorithm, &params);

        debug!(
            pool = %self.key(),
            preserved = stats.preserved,
            added = stats.added,
            removed = stats.removed,
            "pool members reconciled"
        );
        stats
    }

    /// 记录一次成员指标采集结果。
    /// 成功时替换快照并置Ready；失败时保留上一份快照、仅改状态，
    /// 下一次重算会将其分值归零。
    pub async fn record_scrape_result(
        &self,
        member_key: &str,
        result: Result<HashMap<String, f64>, MemberStatus>,
    ) {
        let mut state = self.state.write().await;
        let Some(member) = state.members.iter_mut().find(|m| m.key() == member_key) else {
            // 成员可能在采集期间被同步移除，丢弃结果
            debug!(member = member_key, "scrape result for departed member discarded");
            return;
        };

        match result {
            Ok(snapshot) => {
                member.metrics = snapshot;
                member.status = MemberStatus::Ready;
                member.last_metrics_update = Some(Utc::now());
            }
            Err(status) => {
                member.status = status;
            }
        }
    }

    /// 全量重算本Pool成员的score
    pub async fn rescore(&self) {
        let mut state = self.state.write().await;
        let algorithm = state.algorithm;
        let params = state.params.clone();
        calculate_pool_scores(&mut state.members, algorithm, &params);
    }

    /// 热更新可变配置。Pool身份与成员/指标状态不受影响。
    pub async fn apply_settings(
        &self,
        engine_type: EngineType,
        algorithm: Algorithm,
        params: ScoreParams,
        fallback: FallbackSettings,
        metrics_endpoint: MetricsEndpoint,
    ) {
        let mut state = self.state.write().await;
        if state.engine_type != engine_type {
            info!(pool = %self.key(), engine = engine_type.as_str(), "pool engine_type updated");
            state.engine_type = engine_type;
        }
        if state.algorithm != algorithm || state.params != params {
            info!(pool = %self.key(), algorithm = algorithm.name(), "pool scoring mode updated");
            state.algorithm = algorithm;
            state.params = params.clone();
            calculate_pool_scores(&mut state.members, algorithm, &params);
        }
        state.fallback = fallback;
        state.metrics_endpoint = metrics_endpoint;
    }

    /// 为一次选择冻结所需状态：候选交集、阈值与fallback开关。
    /// 读锁内只做拷贝，释放后再执行抽签。
    pub async fn select_snapshot(&self, candidates: &[(String, u16)]) -> SelectSnapshot {
        let state = self.state.read().await;

        let requested: std::collections::HashSet<String> = candidates
            .iter()
            .map(|(ip, port)| format!("{ip}:{port}"))
            .collect();

        let snapshot = state
            .members
            .iter()
            .filter(|member| requested.contains(&member.key()))
            .map(|member| CandidateSnapshot {
                key: member.key(),
                score: member.score,
                waiting_queue: member
                    .metrics
                    .get(super::models::METRIC_WAITING_QUEUE)
                    .copied(),
                running_req: member.metrics.get(super::models::METRIC_RUNNING_REQ).copied(),
            })
            .collect();

        SelectSnapshot {
            pool_fallback: state.fallback.pool_fallback,
            member_running_req_threshold: state.fallback.member_running_req_threshold,
            member_waiting_queue_threshold: state.fallback.member_waiting_queue_threshold,
            candidates: snapshot,
        }
    }

    /// 状态接口快照
    pub async fn status_view(&self) -> PoolStatusView {
        let state = self.state.read().await;
        let total_score: f64 = state.members.iter().map(|m| m.score).sum();

        let members = state
            .members
            .iter()
            .map(|member| MemberStatusView {
                ip: member.ip.clone(),
                port: member.port,
                score: member.score,
                percent: if total_score > 0.0 {
                    (member.score / total_score * 10000.0).round() / 100.0
                } else {
                    0.0
                },
                metrics: member.metrics.clone(),
                status: member.status,
                last_metrics_update: member.last_metrics_update,
                last_score_update: member.last_score_update,
            })
            .collect();

        PoolStatusView {
            name: self.name.clone(),
            partition: self.partition.clone(),
            engine_type: state.engine_type.as_str().to_string(),
            member_count: state.members.len(),
            members,
        }
    }
}

/// 全局注册表键："<partition>/<name>"
pub fn pool_key(partition: &str, name: &str) -> String {
    format!("{partition}/{name}")
}
