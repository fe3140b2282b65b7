use anyhow::{Context, Result};
use std::path::Path;
use tracing::warn;

use super::model::AppConfig;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/scheduler-config.yaml";

/// 读取并解析YAML配置，解析密钥环境变量后做完整校验。
/// 启动期的任何失败都是致命错误；热加载期由调用方决定保留旧配置。
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    parse_config(&raw)
}

/// 从YAML文本解析配置（便于测试与热加载复用）
pub fn parse_config(raw: &str) -> Result<AppConfig> {
    let mut config: AppConfig =
        serde_yaml::from_str(raw).context("configuration file format error")?;
    resolve_secrets(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// 解析password_env / metric_pwd_env指向的环境变量。
/// 必需密钥缺失按配置错误处理。
fn resolve_secrets(config: &mut AppConfig) -> Result<()> {
    if config.f5.password_env.is_empty() {
        anyhow::bail!("missing required configuration item: f5.password_env");
    }
    config.f5.password = std::env::var(&config.f5.password_env).with_context(|| {
        format!(
            "environment variable {} (f5.password_env) is not set",
            config.f5.password_env
        )
    })?;

    for pool in &mut config.pools {
        if let Some(user) = &pool.metrics.metric_user {
            let Some(env_name) = &pool.metrics.metric_pwd_env else {
                anyhow::bail!(
                    "pool {} sets metric_user {} but no metric_pwd_env",
                    pool.name,
                    user
                );
            };
            let password = std::env::var(env_name).with_context(|| {
                format!(
                    "environment variable {} (pool {} metric_pwd_env) is not set",
                    env_name, pool.name
                )
            })?;
            pool.metrics.metric_password = Some(password);
        } else if pool.metrics.metric_pwd_env.is_some() {
            warn!(
                pool = %pool.name,
                "metric_pwd_env configured without metric_user, ignored"
            );
        }
    }

    Ok(())
}
