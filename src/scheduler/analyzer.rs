//! 选择质量分析：对冻结分值快照做模拟抽取与偏差统计

use serde::Serialize;
use std::collections::HashMap;

use super::selector::{eligible_candidates, weighted_draw, Scheduler, Selection};

/// 模拟抽取结果
#[derive(Debug, Clone, Serialize)]
pub struct SimulationResult {
    pub results: HashMap<String, u64>,
    pub iterations: u64,
}

/// 单成员偏差分析
#[derive(Debug, Clone, Serialize)]
pub struct MemberAnalysis {
    /// 理论概率（0-1）
    pub theoretical_probability: f64,
    /// 实测概率（0-1）
    pub actual_probability: f64,
    pub selection_count: u64,
    /// 绝对偏差（百分点）
    pub deviation: f64,
    /// 相对偏差（%）
    pub deviation_percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverallStatistics {
    pub total_iterations: u64,
    pub successful_selections: u64,
    /// 成功率（%）
    pub success_rate: f64,
    /// 以下偏差统计均为百分点
    pub mean_absolute_deviation: f64,
    pub max_absolute_deviation: f64,
    pub min_absolute_deviation: f64,
    pub std_deviation: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityAssessment {
    pub quality_grade: String,
    pub quality_score: f64,
    pub is_acceptable: bool,
    pub recommendations: Vec<String>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolInfo {
    pub name: String,
    pub partition: String,
    pub member_count: usize,
    pub total_score: f64,
}

/// 完整分析报告
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub pool_info: PoolInfo,
    pub members: HashMap<String, MemberAnalysis>,
    pub overall_statistics: OverallStatistics,
    pub quality_assessment: QualityAssessment,
}

impl Scheduler {
    /// 模拟N次选择。分值快照在进入时冻结一次，
    /// 期间的指标更新不影响本次模拟。
    pub async fn simulate(
        &self,
        pool_name: &str,
        partition: &str,
        candidates: &[String],
        iterations: u64,
    ) -> SimulationResult {
        let mut results: HashMap<String, u64> = HashMap::new();

        let Some(snapshot) = self.freeze(pool_name, partition, candidates).await else {
            return SimulationResult {
                results,
                iterations,
            };
        };

        if snapshot.pool_fallback {
            results.insert(Selection::Fallback.as_response_text().to_string(), iterations);
            return SimulationResult {
                results,
                iterations,
            };
        }

        let eligible = eligible_candidates(&snapshot);
        for _ in 0..iterations {
            if let Some(selected) = weighted_draw(&eligible) {
                *results.entry(selected.to_string()).or_insert(0) += 1;
            }
        }

        SimulationResult {
            results,
            iterations,
        }
    }

    /// 对冻结分值执行N次独立抽取并给出理论/实测分布的偏差报告
    pub async fn analyze(
        &self,
        pool_name: &str,
        partition: &str,
        candidates: &[String],
        iterations: u64,
    ) -> Result<AnalysisReport, String> {
        let Some(snapshot) = self.freeze(pool_name, partition, candidates).await else {
            return Err(format!("pool not found or no valid candidates: {partition}/{pool_name}"));
        };
        if snapshot.pool_fallback {
            return Err(format!("pool {partition}/{pool_name} is in fallback mode"));
        }

        let eligible = eligible_candidates(&snapshot);
        if eligible.is_empty() {
            return Err("no valid intersection members".to_string());
        }

        let total_score: f64 = eligible.iter().map(|(_, score)| score).sum();

        // 理论分布
        let theoretical: HashMap<String, f64> = eligible
            .iter()
            .map(|(key, score)| (key.clone(), score / total_score))
            .collect();

        // 实测分布
        let mut counts: HashMap<String, u64> = HashMap::new();
        let mut successful = 0u64;
        for _ in 0..iterations {
            if let Some(selected) = weighted_draw(&eligible) {
                *counts.entry(selected.to_string()).or_insert(0) += 1;
                successful += 1;
            }
        }

        let mut members = HashMap::new();
        let mut deviations_pp: Vec<f64> = Vec::with_capacity(eligible.len());

        for (key, theory) in &theoretical {
            let count = counts.get(key).copied().unwrap_or(0);
            let actual = if successful > 0 {
                count as f64 / successful as f64
            } else {
                0.0
            };
            let deviation_pp = (actual - theory).abs() * 100.0;
            let relative = if *theory > 0.0 {
                deviation_pp / (theory * 100.0) * 100.0
            } else {
                0.0
            };
            deviations_pp.push(deviation_pp);

            members.insert(
                key.clone(),
                MemberAnalysis {
                    theoretical_probability: round4(*theory),
                    actual_probability: round4(actual),
                    selection_count: count,
                    deviation: round4(deviation_pp),
                    deviation_percentage: round4(relative),
                },
            );
        }

        let mean_dev = mean(&deviations_pp);
        let max_dev = deviations_pp.iter().cloned().fold(0.0_f64, f64::max);
        let min_dev = deviations_pp
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min)
            .min(max_dev);
        let std_dev = sample_stddev(&deviations_pp);
        let success_rate = if iterations > 0 {
            successful as f64 / iterations as f64 * 100.0
        } else {
            0.0
        };

        let overall = OverallStatistics {
            total_iterations: iterations,
            successful_selections: successful,
            success_rate: round4(success_rate),
            mean_absolute_deviation: round4(mean_dev),
            max_absolute_deviation: round4(max_dev),
            min_absolute_deviation: round4(min_dev),
            std_deviation: round4(std_dev),
        };
        let quality = assess_quality(&overall);

        Ok(AnalysisReport {
            pool_info: PoolInfo {
                name: pool_name.to_string(),
                partition: partition.to_string(),
                member_count: eligible.len(),
                total_score: round6(total_score),
            },
            members,
            overall_statistics: overall,
            quality_assessment: quality,
        })
    }
}

/// 按发布的分级表评估选择质量
fn assess_quality(stats: &OverallStatistics) -> QualityAssessment {
    let mean_dev = stats.mean_absolute_deviation;
    let max_dev = stats.max_absolute_deviation;
    let success_rate = stats.success_rate;

    let (quality_grade, quality_score) = if mean_dev < 1.0 && max_dev < 2.0 && success_rate > 99.0 {
        ("Excellent", (95.0 + (5.0 - mean_dev)).min(100.0))
    } else if mean_dev < 2.0 && max_dev < 5.0 && success_rate > 95.0 {
        ("Good", 80.0 + (15.0 - mean_dev * 3.0).max(0.0))
    } else if mean_dev < 5.0 && max_dev < 10.0 && success_rate > 90.0 {
        ("Average", 60.0 + (20.0 - mean_dev * 4.0).max(0.0))
    } else {
        ("Needs-Optimization", (60.0 - mean_dev * 5.0).max(0.0))
    };

    let mut recommendations = Vec::new();
    if mean_dev > 3.0 {
        recommendations.push("Consider increasing test iterations for more stable results".to_string());
    }
    if max_dev > 8.0 {
        recommendations.push("Check if score value distribution is too extreme".to_string());
    }
    if success_rate < 95.0 {
        recommendations.push("Check system for concurrency or other abnormal issues".to_string());
    }
    if stats.std_deviation > 2.0 {
        recommendations.push("Large deviation fluctuation, check algorithm stability".to_string());
    }

    QualityAssessment {
        quality_grade: quality_grade.to_string(),
        quality_score: round2(quality_score),
        is_acceptable: matches!(quality_grade, "Excellent" | "Good"),
        recommendations,
        summary: format!(
            "Mean deviation {mean_dev}%, max deviation {max_dev}%, quality grade: {quality_grade}"
        ),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round4(value: f64) -> f64 {
    (value * 10000.0).round() / 10000.0
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(mean_dev: f64, max_dev: f64, success_rate: f64) -> OverallStatistics {
        OverallStatistics {
            total_iterations: 10_000,
            successful_selections: 10_000,
            success_rate,
            mean_absolute_deviation: mean_dev,
            max_absolute_deviation: max_dev,
            min_absolute_deviation: 0.0,
            std_deviation: 0.5,
        }
    }

    #[test]
    fn test_quality_grades() {
        assert_eq!(assess_quality(&stats(0.4, 1.0, 100.0)).quality_grade, "Excellent");
        assert_eq!(assess_quality(&stats(1.5, 4.0, 98.0)).quality_grade, "Good");
        assert_eq!(assess_quality(&stats(4.0, 9.0, 92.0)).quality_grade, "Average");
        assert_eq!(
            assess_quality(&stats(6.0, 15.0, 80.0)).quality_grade,
            "Needs-Optimization"
        );
    }

    #[test]
    fn test_quality_acceptability() {
        assert!(assess_quality(&stats(0.4, 1.0, 100.0)).is_acceptable);
        assert!(assess_quality(&stats(1.5, 4.0, 98.0)).is_acceptable);
        assert!(!assess_quality(&stats(4.0, 9.0, 92.0)).is_acceptable);
    }

    #[test]
    fn test_recommendations_triggered() {
        let assessment = assess_quality(&OverallStatistics {
            total_iterations: 100,
            successful_selections: 80,
            success_rate: 80.0,
            mean_absolute_deviation: 4.0,
            max_absolute_deviation: 9.0,
            min_absolute_deviation: 1.0,
            std_deviation: 3.0,
        });
        assert_eq!(assessment.recommendations.len(), 4);
    }

    #[test]
    fn test_sample_stddev() {
        assert_eq!(sample_stddev(&[1.0]), 0.0);
        assert!((sample_stddev(&[1.0, 3.0]) - std::f64::consts::SQRT_2).abs() < 1e-9);
    }
}
