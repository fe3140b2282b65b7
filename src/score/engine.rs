//! 分值合成：按池的算法配置对成员批量重算score

use chrono::Utc;
use tracing::debug;

use super::{
    apply_norm, cv_adaptive_weights, waiting_progressive_weights, Algorithm, ScoreParams,
    WeightStrategy,
};
use crate::store::models::{
    MemberStatus, PoolMember, METRIC_CACHE_USAGE, METRIC_RUNNING_REQ, METRIC_WAITING_QUEUE,
};

/// 重算一组成员的score。
///
/// 状态非Ready或缺少算法所需指标的成员直接得0分（由选择器过滤），
/// 其余成员按算法的归一化与权重策略合成，结果截断到[0,1]，
/// NaN/Inf按0处理。纯内存计算，不做任何I/O。
pub fn calculate_pool_scores(members: &mut [PoolMember], algorithm: Algorithm, params: &ScoreParams) {
    if members.is_empty() {
        return;
    }

    let now = Utc::now();
    let profile = algorithm.profile();
    let needs_running = profile.running.is_some();

    // 收集可参与打分的成员及其指标向量
    let mut eligible: Vec<usize> = Vec::new();
    let mut waiting_values: Vec<f64> = Vec::new();
    let mut cache_values: Vec<f64> = Vec::new();
    let mut running_values: Vec<f64> = Vec::new();

    for (i, member) in members.iter().enumerate() {
        if member.status != MemberStatus::Ready {
            continue;
        }
        let waiting = member.metrics.get(METRIC_WAITING_QUEUE).copied();
        let cache = member.metrics.get(METRIC_CACHE_USAGE).copied();
        let running = member.metrics.get(METRIC_RUNNING_REQ).copied();

        let (Some(waiting), Some(cache)) = (waiting, cache) else {
            continue;
        };
        if needs_running && running.is_none() {
            continue;
        }

        eligible.push(i);
        waiting_values.push(waiting);
        cache_values.push(cache);
        if needs_running {
            running_values.push(running.unwrap_or(0.0));
        }
    }

    // 先统一清零，未入选者保持0分
    for member in members.iter_mut() {
        member.score = 0.0;
        member.last_score_update = Some(now);
    }

    if eligible.is_empty() {
        debug!(
            algorithm = algorithm.name(),
            "no member eligible for scoring, all scores forced to 0"
        );
        return;
    }

    // 权重策略
    let (w_a, w_b, w_g) = match profile.weights {
        WeightStrategy::Fixed => (params.w_a, params.w_b, params.w_g),
        WeightStrategy::CvAdaptive => {
            if needs_running {
                let base = [params.w_a, params.w_b, params.w_g];
                let weights = cv_adaptive_weights(
                    &base,
                    &[&waiting_values, &cache_values, &running_values],
                );
                (weights[0], weights[1], weights[2])
            } else {
                let base = [params.w_a, params.w_b];
                let weights = cv_adaptive_weights(&base, &[&waiting_values, &cache_values]);
                (weights[0], weights[1], 0.0)
            }
        }
        WeightStrategy::WaitingProgressive => {
            let max_waiting = waiting_values.iter().cloned().fold(0.0_f64, f64::max);
            waiting_progressive_weights(params, max_waiting, needs_running)
        }
    };

    // 归一化到负载方向后，按 1-norm 反转合成
    let waiting_norm = apply_norm(profile.waiting, &waiting_values);
    let cache_norm = apply_norm(profile.cache, &cache_values);
    let running_norm = profile
        .running
        .map(|norm| apply_norm(norm, &running_values))
        .unwrap_or_default();

    for (j, &i) in eligible.iter().enumerate() {
        let mut score = w_a * (1.0 - waiting_norm[j]) + w_b * (1.0 - cache_norm[j]);
        if needs_running {
            score += w_g * (1.0 - running_norm[j]);
        }
        if !score.is_finite() {
            score = 0.0;
        }
        members[i].score = score.clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn member_with_metrics(
        ip: &str,
        waiting: Option<f64>,
        cache: Option<f64>,
        running: Option<f64>,
    ) -> PoolMember {
        let mut member = PoolMember::new(ip, 8000);
        let mut metrics = HashMap::new();
        if let Some(v) = waiting {
            metrics.insert(METRIC_WAITING_QUEUE.to_string(), v);
        }
        if let Some(v) = cache {
            metrics.insert(METRIC_CACHE_USAGE.to_string(), v);
        }
        if let Some(v) = running {
            metrics.insert(METRIC_RUNNING_REQ.to_string(), v);
        }
        member.metrics = metrics;
        member
    }

    fn two_metric_params(w_a: f64, w_b: f64) -> ScoreParams {
        ScoreParams {
            w_a,
            w_b,
            w_g: 0.0,
            ..ScoreParams::default()
        }
    }

    #[test]
    fn test_s1_composition() {
        let mut members = vec![
            member_with_metrics("10.0.0.1", Some(0.0), Some(0.2), None),
            member_with_metrics("10.0.0.2", Some(10.0), Some(0.8), None),
        ];
        calculate_pool_scores(&mut members, Algorithm::S1, &two_metric_params(0.5, 0.5));

        // s1: score = w_a*(1-minmax(q)) + w_b*(1-c_raw)
        assert!((members[0].score - 0.9).abs() < 1e-9);
        assert!((members[1].score - 0.1).abs() < 1e-9);
        assert!(members[0].last_score_update.is_some());
    }

    #[test]
    fn test_s2_composition() {
        let mut members = vec![
            member_with_metrics("10.0.0.1", Some(0.0), Some(0.2), Some(0.0)),
            member_with_metrics("10.0.0.2", Some(10.0), Some(0.8), Some(4.0)),
        ];
        let params = ScoreParams {
            w_a: 0.4,
            w_b: 0.3,
            w_g: 0.3,
            ..ScoreParams::default()
        };
        calculate_pool_scores(&mut members, Algorithm::S2, &params);

        // 空闲节点在三个指标上都占优
        assert!((members[0].score - (0.4 + 0.3 * 0.8 + 0.3)).abs() < 1e-9);
        assert!((members[1].score - 0.3 * 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_missing_metric_scores_zero() {
        let mut members = vec![
            member_with_metrics("10.0.0.1", Some(1.0), Some(0.5), None),
            // cache缺失
            member_with_metrics("10.0.0.2", Some(1.0), None, None),
        ];
        calculate_pool_scores(&mut members, Algorithm::S1, &two_metric_params(0.5, 0.5));
        assert_eq!(members[1].score, 0.0);
        assert!(members[0].score > 0.0);
    }

    #[test]
    fn test_s2_requires_running_req() {
        let mut members = vec![
            member_with_metrics("10.0.0.1", Some(1.0), Some(0.5), Some(2.0)),
            member_with_metrics("10.0.0.2", Some(1.0), Some(0.5), None),
        ];
        let params = ScoreParams {
            w_a: 0.4,
            w_b: 0.3,
            w_g: 0.3,
            ..ScoreParams::default()
        };
        calculate_pool_scores(&mut members, Algorithm::S2, &params);
        assert_eq!(members[1].score, 0.0);
        assert!(members[0].score > 0.0);
    }

    #[test]
    fn test_non_ready_member_scores_zero() {
        let mut members = vec![
            member_with_metrics("10.0.0.1", Some(0.0), Some(0.1), None),
            member_with_metrics("10.0.0.2", Some(0.0), Some(0.1), None),
        ];
        members[1].status = MemberStatus::Unreachable;
        members[1].score = 0.7;

        calculate_pool_scores(&mut members, Algorithm::S1, &two_metric_params(0.5, 0.5));
        assert_eq!(members[1].score, 0.0);
        assert!(members[0].score > 0.0);
    }

    #[test]
    fn test_s1_precise_clamps_raw_overload() {
        // s1_precise直接用原始值，等待队列大于1时被截断到0分下界
        let mut members = vec![
            member_with_metrics("10.0.0.1", Some(5.0), Some(0.9), None),
            member_with_metrics("10.0.0.2", Some(0.0), Some(0.1), None),
        ];
        calculate_pool_scores(&mut members, Algorithm::S1Precise, &two_metric_params(0.5, 0.5));
        assert_eq!(members[0].score, 0.0);
        assert!((members[1].score - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_s1_ratio_two_nodes() {
        let mut members = vec![
            member_with_metrics("10.0.0.1", Some(0.0), Some(0.3), None),
            member_with_metrics("10.0.0.2", Some(0.0), Some(0.1), None),
        ];
        calculate_pool_scores(&mut members, Algorithm::S1Ratio, &two_metric_params(0.1, 0.9));

        // cache比例 0.75/0.25，低占用节点得高分
        assert!((members[0].score - (0.1 + 0.9 * 0.25)).abs() < 1e-9);
        assert!((members[1].score - (0.1 + 0.9 * 0.75)).abs() < 1e-9);
    }

    #[test]
    fn test_adaptive_distribution_flat_pool_uniform() {
        let mut members = vec![
            member_with_metrics("10.0.0.1", Some(3.0), Some(0.4), None),
            member_with_metrics("10.0.0.2", Some(3.0), Some(0.4), None),
            member_with_metrics("10.0.0.3", Some(3.0), Some(0.4), None),
        ];
        calculate_pool_scores(
            &mut members,
            Algorithm::S1AdaptiveDistribution,
            &two_metric_params(0.5, 0.5),
        );

        // stddev=0 → 全员0.5中性归一化 → 等分
        for member in &members {
            assert!((member.score - 0.5).abs() < 1e-9);
        }
    }

    #[test]
    fn test_dynamic_waiting_shifts_dominance() {
        let params = ScoreParams {
            w_a: 0.4,
            w_b: 0.3,
            w_g: 0.3,
            transition_point: 30.0,
            steepness: 1.0,
        };

        // 高压场景：成员1等待60、成员2等待0，cache反向（成员1更空）
        let mut pressured = vec![
            member_with_metrics("10.0.0.1", Some(60.0), Some(0.1), Some(5.0)),
            member_with_metrics("10.0.0.2", Some(0.0), Some(0.9), Some(5.0)),
        ];
        calculate_pool_scores(&mut pressured, Algorithm::S2DynamicWaiting, &params);

        // intensity≈0.964时waiting权重≈0.97，waiting轴主导，空队列成员胜出
        assert!(pressured[1].score > pressured[0].score);

        // 无压力场景：等待全0，cache差异主导
        let mut idle = vec![
            member_with_metrics("10.0.0.1", Some(0.0), Some(0.1), Some(5.0)),
            member_with_metrics("10.0.0.2", Some(0.0), Some(0.9), Some(5.0)),
        ];
        calculate_pool_scores(&mut idle, Algorithm::S2DynamicWaiting, &params);
        assert!(idle[0].score > idle[1].score);
    }

    #[test]
    fn test_scores_stay_in_unit_interval() {
        // waiting-progressive权重不归一化，组合可能超过1，必须被截断
        let params = ScoreParams {
            w_a: 0.9,
            w_b: 0.9,
            w_g: 0.0,
            transition_point: 30.0,
            steepness: 1.0,
        };
        let mut members = vec![
            member_with_metrics("10.0.0.1", Some(0.0), Some(0.1), None),
            member_with_metrics("10.0.0.2", Some(50.0), Some(0.9), None),
        ];
        calculate_pool_scores(&mut members, Algorithm::S1DynamicWaiting, &params);
        for member in &members {
            assert!(member.score >= 0.0 && member.score <= 1.0);
        }
    }

    #[test]
    fn test_empty_and_all_ineligible() {
        let mut empty: Vec<PoolMember> = vec![];
        calculate_pool_scores(&mut empty, Algorithm::S1, &ScoreParams::default());

        let mut no_metrics = vec![PoolMember::new("10.0.0.1", 8000)];
        no_metrics[0].score = 0.4;
        calculate_pool_scores(&mut no_metrics, Algorithm::S1, &ScoreParams::default());
        assert_eq!(no_metrics[0].score, 0.0);
    }
}
