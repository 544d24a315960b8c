//! ロールアウト窓全体の損失。
//!
//! 物理量ごとに正規化スケールで割ってから二乗誤差を取るので、温度 (~10^3 K) と
//! 質量分率 (~10^-2) のように桁の違う量を同じ重み付き和にまとめても安定です。

use crate::config::{LossConfig, StepWeighting};
use crate::error::{ConfigError, HybridError, HybridResult};
use crate::field::FieldState;
use crate::normalization::NormStats;
use burn::prelude::Backend;
use burn::tensor::Tensor;

/// 窓全体の損失と、その内訳（ステップ重み付き、物理量の重みは掛けない）。
#[derive(Debug, Clone)]
pub struct WindowLoss<B: Backend> {
    pub total: Tensor<B, 1>,
    pub temperature: Tensor<B, 1>,
    pub mass_fraction: Tensor<B, 1>,
    pub velocity: Tensor<B, 1>,
}

/// 予測列と正解列を比べる損失集約器。
#[derive(Debug, Clone)]
pub struct LossAggregator {
    config: LossConfig,
}

impl LossAggregator {
    pub fn new(config: LossConfig) -> Self {
        Self { config }
    }

    /// 長さ `m` の窓に対するステップごとの重み（和は 1）。
    ///
    /// 幾何重みは最大の項を 1 とした比 `ratio^(i - i_max)` で作るので、極端な比でも
    /// オーバーフローしません（小さすぎる項は 0 になります）。
    pub fn step_weights(&self, m: usize) -> Vec<f64> {
        let raw: Vec<f64> = match self.config.step_weighting {
            StepWeighting::Uniform => vec![1.0; m],
            StepWeighting::Geometric { ratio } => {
                let largest = if ratio >= 1.0 { m.saturating_sub(1) } else { 0 };
                (0..m).map(|i| ratio.powf(i as f64 - largest as f64)).collect()
            }
        };
        let sum: f64 = raw.iter().sum();
        raw.into_iter().map(|w| w / sum).collect()
    }

    /// 物理量の重みを和が 1 になるよう正規化した `(T, Yf, u)`。
    fn field_weights(&self) -> [f64; 3] {
        let w = &self.config.weights;
        let sum = w.temperature + w.mass_fraction + w.velocity;
        [w.temperature / sum, w.mass_fraction / sum, w.velocity / sum]
    }

    /// 予測列 `predicted[i]` と正解列 `truth[i]` の重み付き正規化二乗誤差。
    pub fn forward<B: Backend>(
        &self,
        predicted: &[FieldState<B>],
        truth: &[FieldState<B>],
        stats: &NormStats,
    ) -> HybridResult<WindowLoss<B>> {
        if predicted.len() != truth.len() {
            return Err(HybridError::shape_mismatch([truth.len()], [predicted.len()]));
        }
        let first = predicted
            .first()
            .ok_or_else(|| ConfigError::invalid_value("rollout_steps", "空の窓には損失を定義できません"))?;

        let device = first.device();
        let scale = stats.scale_tensor::<B>(&device);
        let [w_t, w_y, w_u] = self.field_weights();

        let mut temperature = Tensor::<B, 1>::zeros([1], &device);
        let mut mass_fraction = Tensor::<B, 1>::zeros([1], &device);
        let mut velocity = Tensor::<B, 1>::zeros([1], &device);

        for ((pred, gt), weight) in predicted.iter().zip(truth).zip(self.step_weights(predicted.len())) {
            let expected = gt.to_channels().dims();
            let actual = pred.to_channels().dims();
            if expected != actual {
                return Err(HybridError::shape_mismatch(expected, actual));
            }
            let [b, _, h, w] = actual;
            let err = ((pred.to_channels() - gt.to_channels()) / scale.clone()).powf_scalar(2.0);

            let t = err.clone().slice([0..b, 0..1, 0..h, 0..w]).mean();
            let y = err.clone().slice([0..b, 1..2, 0..h, 0..w]).mean();
            let u = err.slice([0..b, 2..4, 0..h, 0..w]).mean();

            temperature = temperature + t.mul_scalar(weight);
            mass_fraction = mass_fraction + y.mul_scalar(weight);
            velocity = velocity + u.mul_scalar(weight);
        }

        let total = temperature.clone().mul_scalar(w_t)
            + mass_fraction.clone().mul_scalar(w_y)
            + velocity.clone().mul_scalar(w_u);
        Ok(WindowLoss {
            total,
            temperature,
            mass_fraction,
            velocity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LossWeights;
    use crate::field::FieldFrame;
    use crate::normalization::FieldStats;
    use burn::backend::NdArray;
    use burn::tensor::ElementConversion;

    type TestBackend = NdArray<f32>;

    fn state(t: f32, y: f32, u: [f32; 2]) -> FieldState<TestBackend> {
        let frame = FieldFrame::uniform([4, 4], t, y, u);
        FieldState::from_frames(&[&frame], &Default::default()).unwrap()
    }

    fn scalar(t: Tensor<TestBackend, 1>) -> f64 {
        t.into_scalar().elem()
    }

    #[test]
    fn identical_sequences_give_zero() {
        let seq = vec![state(900.0, 0.05, [0.1, 6.0]), state(950.0, 0.04, [0.2, 6.5])];
        let stats = NormStats::identity();
        let loss = LossAggregator::new(LossConfig::default())
            .forward(&seq, &seq.clone(), &stats)
            .unwrap();
        assert_eq!(scalar(loss.total), 0.0);
    }

    #[test]
    fn errors_are_measured_in_normalized_units() {
        let stats = NormStats {
            temperature: FieldStats { mean: 1000.0, std: 100.0 },
            mass_fraction: FieldStats { mean: 0.0, std: 0.01 },
            ..NormStats::identity()
        };
        let pred = vec![state(1200.0, 0.0, [0.0, 0.0])];
        let truth = vec![state(1000.0, 0.0, [0.0, 0.0])];
        let config = LossConfig {
            weights: LossWeights {
                temperature: 1.0,
                mass_fraction: 0.0,
                velocity: 0.0,
            },
            ..LossConfig::default()
        };
        let loss = LossAggregator::new(config).forward(&pred, &truth, &stats).unwrap();
        // (200 / 100)^2
        assert!((scalar(loss.total) - 4.0).abs() < 1e-5);
        assert!((scalar(loss.temperature) - 4.0).abs() < 1e-5);
        assert_eq!(scalar(loss.mass_fraction), 0.0);
    }

    #[test]
    fn geometric_weights_emphasise_late_steps() {
        let config = LossConfig {
            step_weighting: StepWeighting::Geometric { ratio: 2.0 },
            ..LossConfig::default()
        };
        let weights = LossAggregator::new(config).step_weights(3);
        assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((weights[0] - 1.0 / 7.0).abs() < 1e-12);
        assert!((weights[2] - 4.0 / 7.0).abs() < 1e-12);

        let uniform = LossAggregator::new(LossConfig::default()).step_weights(4);
        assert_eq!(uniform, vec![0.25; 4]);
    }

    #[test]
    fn extreme_ratios_give_finite_weights() {
        for ratio in [1e12, 1e-12, 1e300] {
            let config = LossConfig {
                step_weighting: StepWeighting::Geometric { ratio },
                ..LossConfig::default()
            };
            config.validate().unwrap();
            let weights = LossAggregator::new(config).step_weights(32);
            assert!(weights.iter().all(|w| w.is_finite() && *w >= 0.0), "ratio {ratio}: {weights:?}");
            assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }

        let steep = LossConfig {
            step_weighting: StepWeighting::Geometric { ratio: 1e12 },
            ..LossConfig::default()
        };
        let weights = LossAggregator::new(steep).step_weights(32);
        assert!((weights[31] - 1.0).abs() < 1e-9);
        assert_eq!(weights[0], 0.0);
    }

    #[test]
    fn only_later_step_errors_count_with_steep_weights() {
        let stats = NormStats::identity();
        let truth = vec![state(0.0, 0.0, [0.0, 0.0]), state(0.0, 0.0, [0.0, 0.0])];
        let pred = vec![state(0.0, 0.0, [0.0, 0.0]), state(0.0, 0.0, [3.0, 3.0])];
        let config = LossConfig {
            weights: LossWeights {
                temperature: 0.0,
                mass_fraction: 0.0,
                velocity: 1.0,
            },
            step_weighting: StepWeighting::Geometric { ratio: 3.0 },
        };
        let loss = LossAggregator::new(config).forward(&pred, &truth, &stats).unwrap();
        // 重み 3/4 × 9
        assert!((scalar(loss.total) - 6.75).abs() < 1e-5);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let stats = NormStats::identity();
        let a = vec![state(0.0, 0.0, [0.0, 0.0])];
        let b = vec![state(0.0, 0.0, [0.0, 0.0]); 2];
        let aggregator = LossAggregator::new(LossConfig::default());
        assert!(aggregator.forward(&a, &b, &stats).is_err());
        assert!(aggregator.forward::<TestBackend>(&[], &[], &stats).is_err());
    }
}
