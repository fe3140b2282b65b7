use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::metrics::DEFAULT_SCRAPE_CONCURRENCY;
use crate::score::{Algorithm, ScoreParams};
use crate::store::models::EngineType;
use crate::store::{FallbackSettings, MetricsEndpoint, PoolState};

/// 应用总配置（YAML根结构）
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    pub f5: F5Config,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default = "default_modes")]
    pub modes: Vec<ModeConfig>,
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GlobalConfig {
    /// 配置文件轮询间隔（秒）
    pub interval: u64,
    pub api_host: String,
    pub api_port: u16,
    pub log_level: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            interval: 60,
            api_host: "0.0.0.0".to_string(),
            api_port: 8080,
            log_level: "INFO".to_string(),
        }
    }
}

/// LTM控制面连接配置
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct F5Config {
    pub host: String,
    #[serde(default = "default_f5_port")]
    pub port: u16,
    #[serde(default = "default_f5_username")]
    pub username: String,
    /// 密码所在环境变量名
    #[serde(default)]
    pub password_env: String,
    /// 加载期由password_env解析得到，不出现在配置文件中
    #[serde(skip)]
    pub password: String,
}

fn default_f5_port() -> u16 {
    443
}

fn default_f5_username() -> String {
    "admin".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Pool成员拉取间隔（秒）
    pub pool_fetch_interval: u64,
    /// 指标采集间隔（毫秒）
    pub metrics_fetch_interval: u64,
    /// 单Pool内成员抓取并发上限
    pub scrape_concurrency: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            pool_fetch_interval: 10,
            metrics_fetch_interval: 1000,
            scrape_concurrency: DEFAULT_SCRAPE_CONCURRENCY,
        }
    }
}

/// 算法模式配置
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ModeConfig {
    pub name: String,
    pub w_a: f64,
    pub w_b: f64,
    pub w_g: f64,
    /// 动态waiting权重算法专用：权重过渡中心点
    pub transition_point: f64,
    /// 动态waiting权重算法专用：过渡陡峭度
    pub steepness: f64,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            name: "s1".to_string(),
            w_a: 0.5,
            w_b: 0.5,
            w_g: 0.0,
            transition_point: 30.0,
            steepness: 1.0,
        }
    }
}

fn default_modes() -> Vec<ModeConfig> {
    vec![ModeConfig::default()]
}

impl ModeConfig {
    pub fn algorithm(&self) -> Option<Algorithm> {
        Algorithm::from_name(&self.name)
    }

    pub fn score_params(&self) -> ScoreParams {
        ScoreParams {
            w_a: self.w_a,
            w_b: self.w_b,
            w_g: self.w_g,
            transition_point: self.transition_point,
            steepness: self.steepness,
        }
    }
}

/// Pool的fallback与阈值过滤配置
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FallbackConfig {
    pub pool_fallback: bool,
    pub member_running_req_threshold: Option<f64>,
    pub member_waiting_queue_threshold: Option<f64>,
}

/// Pool的指标端点配置
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    pub schema: String,
    /// 配置后覆盖成员自身端口
    pub port: Option<u16>,
    pub path: String,
    /// HTTP超时（秒）
    pub timeout: u64,
    #[serde(rename = "APIkey")]
    pub api_key: Option<String>,
    pub metric_user: Option<String>,
    pub metric_pwd_env: Option<String>,
    /// 加载期由metric_pwd_env解析得到
    #[serde(skip)]
    pub metric_password: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            schema: "http".to_string(),
            port: None,
            path: "/metrics".to_string(),
            timeout: 3,
            api_key: None,
            metric_user: None,
            metric_pwd_env: None,
            metric_password: None,
        }
    }
}

/// 单个Pool配置
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PoolConfig {
    pub name: String,
    #[serde(default = "default_partition")]
    pub partition: String,
    pub engine_type: String,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// 指定使用modes中的哪一个算法模式，缺省用第一个
    #[serde(default)]
    pub mode_name: Option<String>,
}

fn default_partition() -> String {
    "Common".to_string()
}

impl AppConfig {
    /// 启动与热加载共用的配置校验。
    /// 校验失败在启动期是致命错误，热加载期保留旧配置。
    pub fn validate(&self) -> Result<()> {
        if self.f5.host.is_empty() {
            bail!("missing required configuration item: f5.host");
        }
        if self.pools.is_empty() {
            bail!("at least one pool must be configured");
        }
        if self.global.interval == 0 {
            bail!("global.interval must be greater than 0");
        }
        if self.scheduler.pool_fetch_interval == 0 {
            bail!("scheduler.pool_fetch_interval must be greater than 0");
        }
        if self.scheduler.metrics_fetch_interval == 0 {
            bail!("scheduler.metrics_fetch_interval must be greater than 0");
        }
        if self.modes.is_empty() {
            bail!("at least one mode must be configured");
        }

        for mode in &self.modes {
            let Some(algorithm) = mode.algorithm() else {
                bail!(
                    "unsupported algorithm mode: {} (supported: {})",
                    mode.name,
                    Algorithm::ALL_NAMES.join(", ")
                );
            };
            if mode.w_a < 0.0 || mode.w_b < 0.0 || mode.w_g < 0.0 {
                bail!("mode {} has negative weight", mode.name);
            }
            // 动态waiting算法的专用参数必须有效
            if matches!(algorithm, Algorithm::S1DynamicWaiting | Algorithm::S2DynamicWaiting)
                && (mode.transition_point <= 0.0 || mode.steepness <= 0.0)
            {
                bail!(
                    "mode {} requires positive transition_point and steepness",
                    mode.name
                );
            }
        }

        let mut seen = std::collections::HashSet::new();
        for pool in &self.pools {
            if pool.name.is_empty() {
                bail!("pool configuration missing name field");
            }
            if EngineType::from_name(&pool.engine_type).is_none() {
                bail!("pool {} has unsupported engine_type: {}", pool.name, pool.engine_type);
            }
            if !seen.insert((pool.partition.clone(), pool.name.clone())) {
                bail!("duplicate pool: {}/{}", pool.partition, pool.name);
            }
            if let Some(mode_name) = &pool.mode_name {
                if !self.modes.iter().any(|m| &m.name == mode_name) {
                    bail!("pool {} references unknown mode_name: {}", pool.name, mode_name);
                }
            }
            if pool.metrics.timeout == 0 {
                bail!("pool {} metrics.timeout must be greater than 0", pool.name);
            }
        }

        Ok(())
    }

    /// 解析某Pool实际使用的算法模式
    pub fn resolve_mode(&self, pool: &PoolConfig) -> &ModeConfig {
        if let Some(mode_name) = &pool.mode_name {
            if let Some(mode) = self.modes.iter().find(|m| &m.name == mode_name) {
                return mode;
            }
        }
        &self.modes[0]
    }
}

impl PoolConfig {
    pub fn engine(&self) -> Option<EngineType> {
        EngineType::from_name(&self.engine_type)
    }

    pub fn fallback_settings(&self) -> FallbackSettings {
        FallbackSettings {
            pool_fallback: self.fallback.pool_fallback,
            member_running_req_threshold: self.fallback.member_running_req_threshold,
            member_waiting_queue_threshold: self.fallback.member_waiting_queue_threshold,
        }
    }

    pub fn metrics_endpoint(&self) -> MetricsEndpoint {
        MetricsEndpoint {
            schema: self.metrics.schema.clone(),
            port: self.metrics.port,
            path: self.metrics.path.clone(),
            timeout: Duration::from_secs(self.metrics.timeout),
            api_key: self.metrics.api_key.clone(),
            username: self.metrics.metric_user.clone(),
            password: self.metrics.metric_password.clone(),
        }
    }

    /// 由配置构造Pool初始状态（成员为空，等待首次拉取）
    pub fn to_pool_state(&self, mode: &ModeConfig) -> Result<PoolState> {
        let Some(engine_type) = self.engine() else {
            bail!("pool {} has unsupported engine_type: {}", self.name, self.engine_type);
        };
        let Some(algorithm) = mode.algorithm() else {
            bail!("unsupported algorithm mode: {}", mode.name);
        };

        Ok(PoolState {
            engine_type,
            members: Vec::new(),
            algorithm,
            params: mode.score_params(),
            fallback: self.fallback_settings(),
            metrics_endpoint: self.metrics_endpoint(),
            consecutive_failures: 0,
        })
    }
}
