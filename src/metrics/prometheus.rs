//! Prometheus文本格式的最小解析器。
//! 只提取引擎映射表指定的数值gauge，不引入完整的exposition解析依赖。

use std::collections::HashMap;

use crate::store::models::{
    EngineType, METRIC_CACHE_USAGE, METRIC_RUNNING_REQ, METRIC_WAITING_QUEUE,
};

/// 从exposition文本中提取指定指标的全部样本值。
/// 兼容带标签（`name{...} value`）与裸指标（`name value`）两种行，
/// 跳过 `# HELP` / `# TYPE` 等注释行，忽略可选的时间戳列。
pub fn extract_metric_values(text: &str, metric_name: &str) -> Vec<f64> {
    let mut values = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(value) = parse_sample_line(line, metric_name) {
            values.push(value);
        }
    }

    values
}

/// 匹配单行样本。指标名必须完整匹配（后随 `{` 或空白），
/// 避免命中更长的同前缀指标。
fn parse_sample_line(line: &str, metric_name: &str) -> Option<f64> {
    let rest = line.strip_prefix(metric_name)?;

    let rest = if let Some(labeled) = rest.strip_prefix('{') {
        let close = labeled.find('}')?;
        &labeled[close + 1..]
    } else {
        rest
    };

    if !rest.starts_with(|c: char| c.is_ascii_whitespace()) {
        return None;
    }

    let value = rest.split_ascii_whitespace().next()?;
    value.parse::<f64>().ok()
}

/// 多标签序列的聚合方式：算术平均
fn aggregate(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// 按引擎映射表解析出语义指标。缺失的指标不写入结果map，
/// 由调用侧决定是否构成解析失败。
pub fn parse_engine_metrics(text: &str, engine: EngineType) -> HashMap<String, f64> {
    let names = engine.metric_names();
    let mut metrics = HashMap::new();

    let waiting = extract_metric_values(text, names.waiting_queue);
    if !waiting.is_empty() {
        metrics.insert(METRIC_WAITING_QUEUE.to_string(), aggregate(&waiting));
    }

    let cache = extract_metric_values(text, names.cache_usage);
    if !cache.is_empty() {
        metrics.insert(METRIC_CACHE_USAGE.to_string(), aggregate(&cache));
    }

    let running = extract_metric_values(text, names.running_req);
    if !running.is_empty() {
        metrics.insert(METRIC_RUNNING_REQ.to_string(), aggregate(&running));
    }

    metrics
}

/// 语义指标是否满足最低要求（waiting_queue与cache_usage缺一不可，
/// running_req按需由打分算法检查）
pub fn has_required_metrics(metrics: &HashMap<String, f64>) -> bool {
    metrics.contains_key(METRIC_WAITING_QUEUE) && metrics.contains_key(METRIC_CACHE_USAGE)
}
