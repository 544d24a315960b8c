//! 物理量ごとの正規化統計量。
//!
//! 学習開始時に学習データ全体から一度だけ計算し、以後は凍結します。
//! チェックポイントには重みと必ず対で保存され、ウォームスタートと推論では
//! 再計算せずにそのまま読み戻します。

use crate::error::HybridResult;
use crate::field::{FIELD_CHANNELS, FieldFrame, FieldState, tensor_from_vec};
use burn::prelude::Backend;
use burn::tensor::Tensor;
use ndarray::Axis;
use serde::{Deserialize, Serialize};

/// 1 チャネル分の平均と標準偏差。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldStats {
    pub mean: f64,
    pub std: f64,
}

impl FieldStats {
    /// 値の列から母平均・母標準偏差を求めます。空の列は `(0, 0)` になります。
    pub fn from_values(values: impl IntoIterator<Item = f32>) -> Self {
        // Welford 法
        let mut n = 0u64;
        let mut mean = 0.0f64;
        let mut m2 = 0.0f64;
        for v in values {
            n += 1;
            let x = v as f64;
            let delta = x - mean;
            mean += delta / n as f64;
            m2 += delta * (x - mean);
        }
        let std = if n == 0 { 0.0 } else { (m2 / n as f64).sqrt() };
        Self { mean, std }
    }

    /// 割り算に使うスケール。一定値の場（標準偏差 0）では 1 を返します。
    pub fn scale(&self) -> f64 {
        if self.std.is_finite() && self.std > f32::EPSILON as f64 {
            self.std
        } else {
            1.0
        }
    }
}

/// 4 チャネル (T, Yf, ux, uy) の統計量。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormStats {
    pub temperature: FieldStats,
    pub mass_fraction: FieldStats,
    pub velocity_x: FieldStats,
    pub velocity_y: FieldStats,
}

impl NormStats {
    /// 変換を行わない統計量（平均 0、スケール 1）。
    pub fn identity() -> Self {
        let unit = FieldStats { mean: 0.0, std: 1.0 };
        Self {
            temperature: unit,
            mass_fraction: unit,
            velocity_x: unit,
            velocity_y: unit,
        }
    }

    /// 学習フレーム全体からチャネルごとの統計量を計算します。
    pub fn from_frames<'a>(frames: impl IntoIterator<Item = &'a FieldFrame> + Clone) -> Self {
        let frames_t = frames.clone();
        let frames_y = frames.clone();
        let frames_ux = frames.clone();
        Self {
            temperature: FieldStats::from_values(frames_t.into_iter().flat_map(|f| f.temperature.iter().copied())),
            mass_fraction: FieldStats::from_values(
                frames_y.into_iter().flat_map(|f| f.mass_fraction.iter().copied()),
            ),
            velocity_x: FieldStats::from_values(
                frames_ux
                    .into_iter()
                    .flat_map(|f| f.velocity.index_axis(Axis(0), 0).into_iter().copied()),
            ),
            velocity_y: FieldStats::from_values(
                frames
                    .into_iter()
                    .flat_map(|f| f.velocity.index_axis(Axis(0), 1).into_iter().copied()),
            ),
        }
    }

    /// チャネル順の一覧。
    pub fn channels(&self) -> [FieldStats; FIELD_CHANNELS] {
        [self.temperature, self.mass_fraction, self.velocity_x, self.velocity_y]
    }

    fn channel_tensors<B: Backend>(&self, device: &B::Device) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let stats = self.channels();
        let means = stats.iter().map(|s| s.mean as f32).collect();
        let scales = stats.iter().map(|s| s.scale() as f32).collect();
        (
            tensor_from_vec(means, [1, FIELD_CHANNELS, 1, 1], device),
            tensor_from_vec(scales, [1, FIELD_CHANNELS, 1, 1], device),
        )
    }

    /// チャネルごとのスケール `[1, 4, 1, 1]`。
    pub fn scale_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 4> {
        self.channel_tensors::<B>(device).1
    }

    /// 物理単位の場を `(x - mean) / scale` で正規化し、`[batch, 4, H, W]` で返します。
    pub fn normalize<B: Backend>(&self, state: &FieldState<B>) -> Tensor<B, 4> {
        let (mean, scale) = self.channel_tensors::<B>(&state.device());
        (state.to_channels() - mean) / scale
    }

    /// 正規化された絶対値を物理単位へ戻します。
    pub fn denormalize<B: Backend>(&self, normalized: Tensor<B, 4>) -> HybridResult<FieldState<B>> {
        let (mean, scale) = self.channel_tensors::<B>(&normalized.device());
        FieldState::from_channels(normalized * scale + mean)
    }

    /// 正規化された補正量（差分）を物理単位へ戻します。差分なので平均は足しません。
    pub fn denormalize_delta<B: Backend>(&self, delta: Tensor<B, 4>) -> HybridResult<FieldState<B>> {
        let (_, scale) = self.channel_tensors::<B>(&delta.device());
        FieldState::from_channels(delta * scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::tensor_to_vec;
    use burn::backend::NdArray;
    use ndarray::{Array2, Array3};

    type TestBackend = NdArray<f32>;

    #[test]
    fn stats_match_population_moments() {
        let stats = FieldStats::from_values([1.0, 2.0, 3.0, 4.0]);
        assert!((stats.mean - 2.5).abs() < 1e-12);
        assert!((stats.std - 1.25f64.sqrt()).abs() < 1e-12);
        assert_eq!(stats.scale(), stats.std);
    }

    #[test]
    fn constant_fields_fall_back_to_unit_scale() {
        let frames: Vec<FieldFrame> = (0..3).map(|_| FieldFrame::uniform([8, 8], 800.0, 0.05, [0.0, 6.0])).collect();
        let stats = NormStats::from_frames(frames.iter());
        assert_eq!(stats.temperature.std, 0.0);
        assert_eq!(stats.temperature.scale(), 1.0);
        assert_eq!(stats.velocity_x.scale(), 1.0);

        let device = Default::default();
        let state = FieldState::<TestBackend>::from_frames(&[&frames[0]], &device).unwrap();
        let normalized = tensor_to_vec(&stats.normalize(&state)).unwrap();
        assert!(normalized.iter().all(|v| v.is_finite() && v.abs() < 1e-3));
    }

    #[test]
    fn velocity_components_are_tracked_separately() {
        let frame = FieldFrame {
            temperature: Array2::zeros((2, 2)),
            mass_fraction: Array2::zeros((2, 2)),
            velocity: Array3::from_shape_fn((2, 2, 2), |(c, i, _)| if c == 0 { i as f32 } else { 10.0 }),
        };
        let stats = NormStats::from_frames([&frame]);
        assert!((stats.velocity_x.mean - 0.5).abs() < 1e-12);
        assert!((stats.velocity_x.std - 0.5).abs() < 1e-12);
        assert!((stats.velocity_y.mean - 10.0).abs() < 1e-12);
        assert_eq!(stats.velocity_y.std, 0.0);
    }

    #[test]
    fn normalize_then_denormalize_recovers_fields() {
        let device = Default::default();
        let frame = FieldFrame {
            temperature: Array2::from_shape_fn((4, 4), |(i, j)| 800.0 + (i * 4 + j) as f32 * 50.0),
            mass_fraction: Array2::from_shape_fn((4, 4), |(i, _)| 0.01 * i as f32),
            velocity: Array3::from_shape_fn((2, 4, 4), |(c, i, j)| (c + i + j) as f32),
        };
        let stats = NormStats::from_frames([&frame]);
        let state = FieldState::<TestBackend>::from_frames(&[&frame], &device).unwrap();
        let back = stats.denormalize(stats.normalize(&state)).unwrap().to_frames().unwrap().remove(0);
        for (a, b) in back.temperature.iter().zip(frame.temperature.iter()) {
            assert!((a - b).abs() < 1e-2);
        }
        for (a, b) in back.velocity.iter().zip(frame.velocity.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn delta_denormalization_ignores_mean() {
        let device = Default::default();
        let stats = NormStats {
            temperature: FieldStats { mean: 1000.0, std: 200.0 },
            ..NormStats::identity()
        };
        let delta = Tensor::<TestBackend, 4>::ones([1, FIELD_CHANNELS, 2, 2], &device);
        let state = stats.denormalize_delta(delta).unwrap();
        let t = tensor_to_vec(&state.temperature).unwrap();
        assert!(t.iter().all(|&v| (v - 200.0).abs() < 1e-4));
        let y = tensor_to_vec(&state.mass_fraction).unwrap();
        assert!(y.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }
}
