use thiserror::Error;

// 调度器统一错误类型定义
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("LTM认证失败: {0}")]
    LtmAuth(String),

    #[error("LTM API错误: 状态码 {status:?}, {message}")]
    LtmApi {
        message: String,
        status: Option<u16>,
    },

    #[error("指标采集失败: {0}")]
    MetricsFetch(String),

    #[error("指标解析失败: {0}")]
    MetricsParse(String),

    #[error("HTTP请求失败: {0}")]
    Request(#[from] reqwest::Error),
}

impl SchedulerError {
    pub fn ltm_api(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::LtmApi {
            message: message.into(),
            status,
        }
    }

    /// LTM拉取失败的严重性判定：严重失败计入连续失败计数，
    /// 临时性失败（认证、服务端抖动）不计入
    pub fn is_serious_fetch_failure(&self) -> bool {
        match self {
            // Pool在LTM侧已被删除
            SchedulerError::LtmApi {
                status: Some(404), ..
            } => true,
            // 认证问题不是Pool本身的问题
            SchedulerError::LtmApi {
                status: Some(401) | Some(403),
                ..
            } => false,
            // 服务端错误可能是临时的
            SchedulerError::LtmApi {
                status: Some(s), ..
            } if *s >= 500 => false,
            SchedulerError::LtmApi { .. } => true,
            SchedulerError::LtmAuth(_) => false,
            // 超时可能意味着严重问题，其他网络错误按临时处理
            SchedulerError::Request(e) => e.is_timeout(),
            _ => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
