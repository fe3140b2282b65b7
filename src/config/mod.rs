//! 配置：YAML模型、加载与热加载探测

pub mod loader;
pub mod model;
pub mod watcher;

pub use loader::{load_config, parse_config, DEFAULT_CONFIG_PATH};
pub use model::{
    AppConfig, F5Config, FallbackConfig, GlobalConfig, MetricsConfig, ModeConfig, PoolConfig,
    SchedulerSettings,
};
pub use watcher::ConfigWatcher;
