//! 指标采集：Prometheus文本解析与并发抓取

pub mod collector;
pub mod prometheus;

pub use collector::{MetricsCollector, DEFAULT_SCRAPE_CONCURRENCY};
