use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 语义指标名：等待队列长度
pub const METRIC_WAITING_QUEUE: &str = "waiting_queue";
/// 语义指标名：KV缓存占用率（0-1）
pub const METRIC_CACHE_USAGE: &str = "cache_usage";
/// 语义指标名：正在解码的请求数
pub const METRIC_RUNNING_REQ: &str = "running_req";

/// 推理引擎类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    Vllm,
    Sglang,
}

impl EngineType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "vllm" => Some(EngineType::Vllm),
            "sglang" => Some(EngineType::Sglang),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineType::Vllm => "vllm",
            EngineType::Sglang => "sglang",
        }
    }

    /// 引擎暴露的Prometheus指标名到语义指标的固定映射表。
    /// 指标行形如 `sglang:token_usage{model_name="..."} 0.28`
    pub fn metric_names(&self) -> EngineMetricNames {
        match self {
            EngineType::Vllm => EngineMetricNames {
                waiting_queue: "vllm:num_requests_waiting",
                cache_usage: "vllm:gpu_cache_usage_perc",
                running_req: "vllm:num_requests_running",
            },
            EngineType::Sglang => EngineMetricNames {
                waiting_queue: "sglang:num_queue_reqs",
                cache_usage: "sglang:token_usage",
                running_req: "sglang:num_running_reqs",
            },
        }
    }
}

/// 某一引擎的关键指标名集合
#[derive(Debug, Clone, Copy)]
pub struct EngineMetricNames {
    pub waiting_queue: &'static str,
    pub cache_usage: &'static str,
    pub running_req: &'static str,
}

/// 成员指标采集状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    /// 最近一次采集成功
    Ready,
    /// 采集请求失败（超时/非2xx）
    Unreachable,
    /// 响应无法解析出关键指标
    ParseError,
}

/// Pool成员，池内以 (ip, port) 唯一标识
#[derive(Debug, Clone)]
pub struct PoolMember {
    pub ip: String,
    pub port: u16,
    /// 原始指标快照，按语义名存储
    pub metrics: HashMap<String, f64>,
    /// 派生分值，0表示不可选
    pub score: f64,
    pub status: MemberStatus,
    pub last_metrics_update: Option<DateTime<Utc>>,
    pub last_score_update: Option<DateTime<Utc>>,
}

impl PoolMember {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            metrics: HashMap::new(),
            score: 0.0,
            status: MemberStatus::Ready,
            last_metrics_update: None,
            last_score_update: None,
        }
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// 构造该成员的指标采集URI，metrics_port配置存在时优先于成员端口
    pub fn metric_uri(&self, schema: &str, path: &str, metrics_port: Option<u16>) -> String {
        let port = metrics_port.unwrap_or(self.port);
        format!("{}://{}:{}{}", schema, self.ip, port, path)
    }
}

/// 解析 "ip:port" 形式的成员标识，IPv6地址取最后一个冒号后的端口
pub fn parse_member_key(raw: &str) -> Option<(String, u16)> {
    let (ip, port_str) = raw.rsplit_once(':')?;
    if ip.is_empty() {
        return None;
    }
    let port: u16 = port_str.parse().ok()?;
    Some((ip.to_string(), port))
}
