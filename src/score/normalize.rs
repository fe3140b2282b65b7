//! 归一化原语。所有函数输出“负载方向”的归一化值（越大越忙），
//! 由上层组合时取 `1 - norm` 反转为“越小越好”。

/// 除零保护用的最小量
pub const EPSILON: f64 = 1e-9;

/// 对数归一化的log2输入窗口半径，即 [-2, +2]
const LOG_WINDOW: f64 = 2.0;

/// 对数归一化的零值保护量
const LOG_DELTA: f64 = 1e-3;

/// 自适应分布归一化中tanh的陡峭度系数
const TANH_K: f64 = 1.0;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// 总体标准差
pub fn stddev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Min-Max归一化。退化场景（单成员或全部相等）归一化为0，
/// 即全体视为同等空闲。
pub fn min_max(values: &[f64]) -> Vec<f64> {
    if values.len() <= 1 {
        return vec![0.0; values.len()];
    }
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max - min < EPSILON {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - min) / (max - min)).collect()
}

/// 分母带ε的Min-Max变体，避免精确二值化
pub fn min_max_eps(values: &[f64]) -> Vec<f64> {
    if values.len() <= 1 {
        return vec![0.0; values.len()];
    }
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    values
        .iter()
        .map(|v| (v - min) / (max - min + EPSILON))
        .collect()
}

/// 平方非线性：对“越小越好”项取平方放大区分度。
/// 以负载方向表达为 `1 - (1 - minmax)^2`，组合层取 `1 - norm` 后
/// 恰好得到平方后的项。
pub fn squared(values: &[f64]) -> Vec<f64> {
    min_max_eps(values)
        .into_iter()
        .map(|n| 1.0 - (1.0 - n).powi(2))
        .collect()
}

/// 精确对数归一化到 [lo, hi]。
/// ratio = (x+δ)/(mean+δ)，r = log2(ratio) 截断到 [-2, +2] 后线性映射。
/// 相对均值的倍数差异被保留为刻度信息，避免Min-Max在两节点时的{0,1}坍缩。
pub fn precise_log(values: &[f64], lo: f64, hi: f64) -> Vec<f64> {
    let m = mean(values);
    values
        .iter()
        .map(|v| {
            let ratio = (v + LOG_DELTA) / (m + LOG_DELTA);
            let r = ratio.log2().clamp(-LOG_WINDOW, LOG_WINDOW);
            let t = (r + LOG_WINDOW) / (2.0 * LOG_WINDOW);
            lo + (hi - lo) * t
        })
        .collect()
}

/// 比例归一化，仅两节点场景：x_i / (x_i + x_j)。
/// 其他规模回退到Min-Max。
pub fn ratio_weight(values: &[f64]) -> Vec<f64> {
    if values.len() != 2 {
        return min_max(values);
    }
    let total = values[0] + values[1];
    if total < EPSILON {
        return vec![0.5, 0.5];
    }
    vec![values[0] / total, values[1] / total]
}

/// 自适应分布归一化：z分数经tanh压缩后仿射平移到[0,1]。
/// stddev为0时全体返回0.5（中性分布）。
pub fn adaptive_distribution(values: &[f64]) -> Vec<f64> {
    let sd = stddev(values);
    if sd < EPSILON {
        return vec![0.5; values.len()];
    }
    let m = mean(values);
    values
        .iter()
        .map(|v| {
            let z = (v - m) / sd;
            ((TANH_K * z).tanh() + 1.0) / 2.0
        })
        .collect()
}

/// 平滑归一化：Min-Max后线性压缩到[0.2, 0.8]，避免极端权重
pub fn smoothed(values: &[f64]) -> Vec<f64> {
    min_max(values)
        .into_iter()
        .map(|n| 0.2 + 0.6 * n)
        .collect()
}
