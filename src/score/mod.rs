//! 打分引擎：封闭算法族、权重自适应策略与分值合成

pub mod engine;
pub mod normalize;

pub use engine::calculate_pool_scores;

use normalize::EPSILON;

/// CV自适应权重中基础权重与CV权重的混合系数
const CV_BLEND_ALPHA: f64 = 0.5;

/// 封闭算法族。两指标族使用 waiting_queue 与 cache_usage，
/// 三指标族追加 running_req。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    S1,
    S1Enhanced,
    S1Adaptive,
    S1Ratio,
    S1Precise,
    S1Nonlinear,
    S1Balanced,
    S1AdaptiveDistribution,
    S1Advanced,
    S1DynamicWaiting,
    S2,
    S2Enhanced,
    S2Nonlinear,
    S2Adaptive,
    S2Advanced,
    S2DynamicWaiting,
}

/// 单指标归一化方式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Norm {
    /// 直接使用原始值（cache_usage本身已在0-1）
    Raw,
    MinMax,
    MinMaxEps,
    Squared,
    PreciseLog { lo: f64, hi: f64 },
    RatioWeight,
    AdaptiveDist,
    Smoothed,
}

/// 权重确定策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightStrategy {
    Fixed,
    CvAdaptive,
    WaitingProgressive,
}

/// 算法的归一化与权重组合描述
#[derive(Debug, Clone, Copy)]
pub struct AlgorithmProfile {
    pub waiting: Norm,
    pub cache: Norm,
    pub running: Option<Norm>,
    pub weights: WeightStrategy,
}

/// 算法参数，来自配置中的mode定义
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreParams {
    pub w_a: f64,
    pub w_b: f64,
    pub w_g: f64,
    pub transition_point: f64,
    pub steepness: f64,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            w_a: 0.5,
            w_b: 0.5,
            w_g: 0.0,
            transition_point: 30.0,
            steepness: 1.0,
        }
    }
}

impl Algorithm {
    pub const ALL_NAMES: [&'static str; 16] = [
        "s1",
        "s1_enhanced",
        "s1_adaptive",
        "s1_ratio",
        "s1_precise",
        "s1_nonlinear",
        "s1_balanced",
        "s1_adaptive_distribution",
        "s1_advanced",
        "s1_dynamic_waiting",
        "s2",
        "s2_enhanced",
        "s2_nonlinear",
        "s2_adaptive",
        "s2_advanced",
        "s2_dynamic_waiting",
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "s1" => Some(Algorithm::S1),
            "s1_enhanced" => Some(Algorithm::S1Enhanced),
            "s1_adaptive" => Some(Algorithm::S1Adaptive),
            "s1_ratio" => Some(Algorithm::S1Ratio),
            "s1_precise" => Some(Algorithm::S1Precise),
            "s1_nonlinear" => Some(Algorithm::S1Nonlinear),
            "s1_balanced" => Some(Algorithm::S1Balanced),
            "s1_adaptive_distribution" => Some(Algorithm::S1AdaptiveDistribution),
            "s1_advanced" => Some(Algorithm::S1Advanced),
            "s1_dynamic_waiting" => Some(Algorithm::S1DynamicWaiting),
            "s2" => Some(Algorithm::S2),
            "s2_enhanced" => Some(Algorithm::S2Enhanced),
            "s2_nonlinear" => Some(Algorithm::S2Nonlinear),
            "s2_adaptive" => Some(Algorithm::S2Adaptive),
            "s2_advanced" => Some(Algorithm::S2Advanced),
            "s2_dynamic_waiting" => Some(Algorithm::S2DynamicWaiting),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::S1 => "s1",
            Algorithm::S1Enhanced => "s1_enhanced",
            Algorithm::S1Adaptive => "s1_adaptive",
            Algorithm::S1Ratio => "s1_ratio",
            Algorithm::S1Precise => "s1_precise",
            Algorithm::S1Nonlinear => "s1_nonlinear",
            Algorithm::S1Balanced => "s1_balanced",
            Algorithm::S1AdaptiveDistribution => "s1_adaptive_distribution",
            Algorithm::S1Advanced => "s1_advanced",
            Algorithm::S1DynamicWaiting => "s1_dynamic_waiting",
            Algorithm::S2 => "s2",
            Algorithm::S2Enhanced => "s2_enhanced",
            Algorithm::S2Nonlinear => "s2_nonlinear",
            Algorithm::S2Adaptive => "s2_adaptive",
            Algorithm::S2Advanced => "s2_advanced",
            Algorithm::S2DynamicWaiting => "s2_dynamic_waiting",
        }
    }

    /// 三指标族需要running_req指标
    pub fn uses_running_req(&self) -> bool {
        self.profile().running.is_some()
    }

    /// 算法到归一化/权重组合的静态映射表
    pub fn profile(&self) -> AlgorithmProfile {
        use Norm::*;
        use WeightStrategy::*;

        match self {
            Algorithm::S1 => AlgorithmProfile {
                waiting: MinMax,
                cache: Raw,
                running: None,
                weights: Fixed,
            },
            Algorithm::S1Enhanced => AlgorithmProfile {
                waiting: MinMax,
                cache: PreciseLog { lo: 0.2, hi: 1.0 },
                running: None,
                weights: Fixed,
            },
            Algorithm::S1Adaptive => AlgorithmProfile {
                waiting: MinMax,
                cache: MinMax,
                running: None,
                weights: CvAdaptive,
            },
            Algorithm::S1Ratio => AlgorithmProfile {
                waiting: Raw,
                cache: RatioWeight,
                running: None,
                weights: Fixed,
            },
            Algorithm::S1Precise => AlgorithmProfile {
                waiting: Raw,
                cache: Raw,
                running: None,
                weights: Fixed,
            },
            Algorithm::S1Nonlinear => AlgorithmProfile {
                waiting: MinMaxEps,
                cache: Squared,
                running: None,
                weights: Fixed,
            },
            Algorithm::S1Balanced => AlgorithmProfile {
                waiting: Smoothed,
                cache: Smoothed,
                running: None,
                weights: Fixed,
            },
            Algorithm::S1AdaptiveDistribution => AlgorithmProfile {
                waiting: AdaptiveDist,
                cache: AdaptiveDist,
                running: None,
                weights: Fixed,
            },
            Algorithm::S1Advanced => AlgorithmProfile {
                waiting: AdaptiveDist,
                cache: AdaptiveDist,
                running: None,
                weights: CvAdaptive,
            },
            Algorithm::S1DynamicWaiting => AlgorithmProfile {
                waiting: AdaptiveDist,
                cache: AdaptiveDist,
                running: None,
                weights: WaitingProgressive,
            },
            Algorithm::S2 => AlgorithmProfile {
                waiting: MinMax,
                cache: Raw,
                running: Some(MinMax),
                weights: Fixed,
            },
            Algorithm::S2Enhanced => AlgorithmProfile {
                waiting: MinMax,
                cache: PreciseLog { lo: 0.2, hi: 1.0 },
                running: Some(PreciseLog { lo: 0.15, hi: 0.95 }),
                weights: Fixed,
            },
            Algorithm::S2Nonlinear => AlgorithmProfile {
                waiting: Squared,
                cache: Squared,
                running: Some(Squared),
                weights: Fixed,
            },
            Algorithm::S2Adaptive => AlgorithmProfile {
                waiting: MinMax,
                cache: MinMax,
                running: Some(MinMax),
                weights: CvAdaptive,
            },
            Algorithm::S2Advanced => AlgorithmProfile {
                waiting: AdaptiveDist,
                cache: AdaptiveDist,
                running: Some(AdaptiveDist),
                weights: CvAdaptive,
            },
            Algorithm::S2DynamicWaiting => AlgorithmProfile {
                waiting: AdaptiveDist,
                cache: AdaptiveDist,
                running: Some(AdaptiveDist),
                weights: WaitingProgressive,
            },
        }
    }
}

/// 应用某一归一化方式到指标向量
pub fn apply_norm(norm: Norm, values: &[f64]) -> Vec<f64> {
    match norm {
        Norm::Raw => values.to_vec(),
        Norm::MinMax => normalize::min_max(values),
        Norm::MinMaxEps => normalize::min_max_eps(values),
        Norm::Squared => normalize::squared(values),
        Norm::PreciseLog { lo, hi } => normalize::precise_log(values, lo, hi),
        Norm::RatioWeight => normalize::ratio_weight(values),
        Norm::AdaptiveDist => normalize::adaptive_distribution(values),
        Norm::Smoothed => normalize::smoothed(values),
    }
}

/// CV自适应权重：各指标跨节点变异系数越大，获得的权重越高。
/// 归一化后与基础权重按α混合，再归一化到和为1。
/// 全部CV接近0时退回基础权重。
pub fn cv_adaptive_weights(base: &[f64], metric_vectors: &[&[f64]]) -> Vec<f64> {
    debug_assert_eq!(base.len(), metric_vectors.len());

    let cvs: Vec<f64> = metric_vectors
        .iter()
        .map(|values| {
            let m = normalize::mean(values);
            normalize::stddev(values) / m.abs().max(EPSILON)
        })
        .collect();

    let cv_total: f64 = cvs.iter().sum();
    if cv_total < EPSILON {
        return base.to_vec();
    }

    let blended: Vec<f64> = base
        .iter()
        .zip(cvs.iter())
        .map(|(w, cv)| CV_BLEND_ALPHA * w + (1.0 - CV_BLEND_ALPHA) * (cv / cv_total))
        .collect();

    let total: f64 = blended.iter().sum();
    if total < EPSILON {
        return base.to_vec();
    }
    blended.into_iter().map(|w| w / total).collect()
}

/// 等待队列渐进式权重：随池内最大等待队列升高，waiting轴权重平滑
/// 提升（0.2x → 2.5x），cache与running轴相应压低。结果不归一化，
/// 分值仅作为选择器的非归一化权重使用。
pub fn waiting_progressive_weights(
    params: &ScoreParams,
    max_waiting: f64,
    three_metric: bool,
) -> (f64, f64, f64) {
    let intensity = (max_waiting * params.steepness / params.transition_point.max(EPSILON)).tanh();

    let w_a = params.w_a * (0.2 + 2.3 * intensity);
    let w_b = params.w_b * (1.8 - 1.5 * intensity);
    let w_g = if three_metric {
        params.w_g * (1.4 - 0.8 * intensity)
    } else {
        0.0
    };
    (w_a, w_b, w_g)
}
