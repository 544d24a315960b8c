//! 1 時刻分の場（温度・燃料質量分率・速度）と、ロールアウト中に固定される励起条件。
//!
//! デバイス側の [`FieldState`] はバッチ次元を持つ `burn` テンソルで、
//! ホスト側の [`FieldFrame`] は `ndarray` の配列です。どちらも不変値として扱い、
//! 各ステップは新しい値を返します。

use crate::error::{HybridError, HybridResult};
use burn::prelude::Backend;
use burn::tensor::{Tensor, TensorData};
use ndarray::{Array1, Array2, Array3};
use serde::{Deserialize, Serialize};

/// 場のチャネル数 (T, Yf, ux, uy)。
pub const FIELD_CHANNELS: usize = 4;

/// デバイス上の場のバッチ。
///
/// * `temperature`, `mass_fraction`: `[batch, 1, H, W]`
/// * `velocity`: `[batch, 2, H, W]`（チャネル 0 が横方向 `ux`、1 が流れ方向 `uy`）
#[derive(Debug, Clone)]
pub struct FieldState<B: Backend> {
    pub temperature: Tensor<B, 4>,
    pub mass_fraction: Tensor<B, 4>,
    pub velocity: Tensor<B, 4>,
}

impl<B: Backend> FieldState<B> {
    /// 形状を検証して場を組み立てます。
    pub fn new(
        temperature: Tensor<B, 4>,
        mass_fraction: Tensor<B, 4>,
        velocity: Tensor<B, 4>,
    ) -> HybridResult<Self> {
        let [batch, _, height, width] = temperature.dims();
        let scalar = [batch, 1, height, width];
        let vector = [batch, 2, height, width];
        if temperature.dims() != scalar {
            return Err(HybridError::shape_mismatch(scalar, temperature.dims()));
        }
        if mass_fraction.dims() != scalar {
            return Err(HybridError::shape_mismatch(scalar, mass_fraction.dims()));
        }
        if velocity.dims() != vector {
            return Err(HybridError::shape_mismatch(vector, velocity.dims()));
        }
        Ok(Self {
            temperature,
            mass_fraction,
            velocity,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.temperature.dims()[0]
    }

    /// `[H, W]`
    pub fn grid(&self) -> [usize; 2] {
        let [_, _, h, w] = self.temperature.dims();
        [h, w]
    }

    pub fn device(&self) -> B::Device {
        self.temperature.device()
    }

    /// 横方向速度 `[batch, 1, H, W]`
    pub fn velocity_x(&self) -> Tensor<B, 4> {
        let [b, _, h, w] = self.velocity.dims();
        self.velocity.clone().slice([0..b, 0..1, 0..h, 0..w])
    }

    /// 流れ方向速度 `[batch, 1, H, W]`
    pub fn velocity_y(&self) -> Tensor<B, 4> {
        let [b, _, h, w] = self.velocity.dims();
        self.velocity.clone().slice([0..b, 1..2, 0..h, 0..w])
    }

    /// 要素ごとの和を新しい場として返します。
    pub fn add(&self, delta: &FieldState<B>) -> FieldState<B> {
        FieldState {
            temperature: self.temperature.clone() + delta.temperature.clone(),
            mass_fraction: self.mass_fraction.clone() + delta.mass_fraction.clone(),
            velocity: self.velocity.clone() + delta.velocity.clone(),
        }
    }

    /// チャネル順 (T, Yf, ux, uy) で `[batch, 4, H, W]` に積み重ねます。
    pub fn to_channels(&self) -> Tensor<B, 4> {
        Tensor::cat(
            vec![
                self.temperature.clone(),
                self.mass_fraction.clone(),
                self.velocity.clone(),
            ],
            1,
        )
    }

    /// [`FieldState::to_channels`] の逆変換。
    pub fn from_channels(channels: Tensor<B, 4>) -> HybridResult<Self> {
        let [b, c, h, w] = channels.dims();
        if c != FIELD_CHANNELS {
            return Err(HybridError::shape_mismatch([b, FIELD_CHANNELS, h, w], [b, c, h, w]));
        }
        Self::new(
            channels.clone().slice([0..b, 0..1, 0..h, 0..w]),
            channels.clone().slice([0..b, 1..2, 0..h, 0..w]),
            channels.slice([0..b, 2..4, 0..h, 0..w]),
        )
    }

    /// ホスト側のフレームをバッチとしてデバイスへ転送します。
    pub fn from_frames(frames: &[&FieldFrame], device: &B::Device) -> HybridResult<Self> {
        let first = frames
            .first()
            .ok_or(HybridError::IndexOutOfBounds { index: 0, len: 0 })?;
        let [h, w] = first.grid();
        let batch = frames.len();

        let mut temperature = Vec::with_capacity(batch * h * w);
        let mut mass_fraction = Vec::with_capacity(batch * h * w);
        let mut velocity = Vec::with_capacity(batch * 2 * h * w);
        for frame in frames {
            frame.check_grid([h, w])?;
            temperature.extend(frame.temperature.iter().copied());
            mass_fraction.extend(frame.mass_fraction.iter().copied());
            velocity.extend(frame.velocity.iter().copied());
        }

        Self::new(
            tensor_from_vec(temperature, [batch, 1, h, w], device),
            tensor_from_vec(mass_fraction, [batch, 1, h, w], device),
            tensor_from_vec(velocity, [batch, 2, h, w], device),
        )
    }

    /// デバイス上の値をサンプルごとのフレームとして取り出します。
    pub fn to_frames(&self) -> HybridResult<Vec<FieldFrame>> {
        let batch = self.batch_size();
        let [h, w] = self.grid();
        let temperature = tensor_to_vec(&self.temperature)?;
        let mass_fraction = tensor_to_vec(&self.mass_fraction)?;
        let velocity = tensor_to_vec(&self.velocity)?;

        let n = h * w;
        (0..batch)
            .map(|i| {
                Ok(FieldFrame {
                    temperature: Array2::from_shape_vec((h, w), temperature[i * n..(i + 1) * n].to_vec())
                        .map_err(|e| HybridError::Data(e.to_string()))?,
                    mass_fraction: Array2::from_shape_vec((h, w), mass_fraction[i * n..(i + 1) * n].to_vec())
                        .map_err(|e| HybridError::Data(e.to_string()))?,
                    velocity: Array3::from_shape_vec((2, h, w), velocity[i * 2 * n..(i + 1) * 2 * n].to_vec())
                        .map_err(|e| HybridError::Data(e.to_string()))?,
                })
            })
            .collect()
    }
}

/// ホスト側の 1 サンプル 1 時刻分の場。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFrame {
    /// `[H, W]`
    pub temperature: Array2<f32>,
    /// `[H, W]`
    pub mass_fraction: Array2<f32>,
    /// `[2, H, W]`
    pub velocity: Array3<f32>,
}

impl FieldFrame {
    /// 一様な値で埋めたフレーム。
    pub fn uniform(grid: [usize; 2], temperature: f32, mass_fraction: f32, velocity: [f32; 2]) -> Self {
        let [h, w] = grid;
        let mut v = Array3::zeros((2, h, w));
        v.index_axis_mut(ndarray::Axis(0), 0).fill(velocity[0]);
        v.index_axis_mut(ndarray::Axis(0), 1).fill(velocity[1]);
        Self {
            temperature: Array2::from_elem((h, w), temperature),
            mass_fraction: Array2::from_elem((h, w), mass_fraction),
            velocity: v,
        }
    }

    pub fn grid(&self) -> [usize; 2] {
        let (h, w) = self.temperature.dim();
        [h, w]
    }

    fn check_grid(&self, grid: [usize; 2]) -> HybridResult<()> {
        let [h, w] = grid;
        if self.temperature.dim() != (h, w) {
            let (th, tw) = self.temperature.dim();
            return Err(HybridError::shape_mismatch([h, w], [th, tw]));
        }
        if self.mass_fraction.dim() != (h, w) {
            let (yh, yw) = self.mass_fraction.dim();
            return Err(HybridError::shape_mismatch([h, w], [yh, yw]));
        }
        if self.velocity.dim() != (2, h, w) {
            let (c, vh, vw) = self.velocity.dim();
            return Err(HybridError::shape_mismatch([2, h, w], [c, vh, vw]));
        }
        Ok(())
    }
}

/// 流入口の速度プロファイル（励起条件）のバッチ `[batch, W]`。
///
/// 1 回のロールアウトの間は固定です。
#[derive(Debug, Clone)]
pub struct Excitation<B: Backend> {
    profile: Tensor<B, 2>,
}

impl<B: Backend> Excitation<B> {
    pub fn new(profile: Tensor<B, 2>) -> Self {
        Self { profile }
    }

    /// ホスト側のプロファイル列をバッチにします。
    pub fn from_profiles(profiles: &[&Array1<f32>], device: &B::Device) -> HybridResult<Self> {
        let first = profiles
            .first()
            .ok_or(HybridError::IndexOutOfBounds { index: 0, len: 0 })?;
        let width = first.len();
        let mut values = Vec::with_capacity(profiles.len() * width);
        for profile in profiles {
            if profile.len() != width {
                return Err(HybridError::shape_mismatch([width], [profile.len()]));
            }
            values.extend(profile.iter().copied());
        }
        let data = TensorData::new(values, [profiles.len(), width]).convert::<B::FloatElem>();
        Ok(Self::new(Tensor::from_data(data, device)))
    }

    pub fn profile(&self) -> Tensor<B, 2> {
        self.profile.clone()
    }

    pub fn batch_size(&self) -> usize {
        self.profile.dims()[0]
    }

    pub fn width(&self) -> usize {
        self.profile.dims()[1]
    }

    /// 流入口 1 行分 `[batch, 1, 1, W]`。
    pub fn inlet_row(&self) -> Tensor<B, 4> {
        let [b, w] = self.profile.dims();
        self.profile.clone().reshape([b, 1, 1, w])
    }

    /// ネットワークの補助入力として全行に複製した `[batch, 1, H, W]`。
    pub fn aux_channel(&self, height: usize) -> Tensor<B, 4> {
        self.inlet_row().repeat_dim(2, height)
    }

    /// 場のバッチと整合しているかを確認します。
    pub fn check_matches(&self, state: &FieldState<B>) -> HybridResult<()> {
        let [_, w] = state.grid();
        let expected = [state.batch_size(), w];
        if self.profile.dims() != expected {
            return Err(HybridError::shape_mismatch(expected, self.profile.dims()));
        }
        Ok(())
    }
}

pub(crate) fn tensor_from_vec<B: Backend, const D: usize>(
    values: Vec<f32>,
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, D> {
    let data = TensorData::new(values, shape).convert::<B::FloatElem>();
    Tensor::from_data(data, device)
}

pub(crate) fn tensor_to_vec<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> HybridResult<Vec<f32>> {
    tensor
        .to_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| HybridError::Data(format!("{e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn ramp_frame(grid: [usize; 2], offset: f32) -> FieldFrame {
        let [h, w] = grid;
        FieldFrame {
            temperature: Array2::from_shape_fn((h, w), |(i, j)| offset + (i * w + j) as f32),
            mass_fraction: Array2::from_shape_fn((h, w), |(i, j)| offset * 0.01 + (i + j) as f32 * 0.001),
            velocity: Array3::from_shape_fn((2, h, w), |(c, i, j)| offset + c as f32 * 10.0 + (i * j) as f32),
        }
    }

    #[test]
    fn frames_survive_device_transfer() {
        let device = Default::default();
        let a = ramp_frame([4, 6], 0.0);
        let b = ramp_frame([4, 6], 100.0);
        let state = FieldState::<TestBackend>::from_frames(&[&a, &b], &device).unwrap();
        assert_eq!(state.batch_size(), 2);
        assert_eq!(state.grid(), [4, 6]);
        let back = state.to_frames().unwrap();
        assert_eq!(back, vec![a, b]);
    }

    #[test]
    fn channel_split_is_inverse_of_stack() {
        let device = Default::default();
        let frame = ramp_frame([4, 4], 3.0);
        let state = FieldState::<TestBackend>::from_frames(&[&frame], &device).unwrap();
        let channels = state.to_channels();
        assert_eq!(channels.dims(), [1, FIELD_CHANNELS, 4, 4]);
        let split = FieldState::from_channels(channels).unwrap();
        assert_eq!(split.to_frames().unwrap()[0], frame);
    }

    #[test]
    fn mismatched_grids_are_rejected() {
        let device = Default::default();
        let a = ramp_frame([4, 4], 0.0);
        let b = ramp_frame([4, 6], 0.0);
        let err = FieldState::<TestBackend>::from_frames(&[&a, &b], &device).unwrap_err();
        assert!(matches!(err, HybridError::ShapeMismatch { .. }));

        let t = Tensor::<TestBackend, 4>::zeros([1, 1, 4, 4], &device);
        let v = Tensor::<TestBackend, 4>::zeros([1, 1, 4, 4], &device);
        assert!(FieldState::new(t.clone(), t, v).is_err());
    }

    #[test]
    fn add_returns_new_state() {
        let device = Default::default();
        let frame = FieldFrame::uniform([4, 4], 1.0, 0.5, [0.0, 2.0]);
        let state = FieldState::<TestBackend>::from_frames(&[&frame], &device).unwrap();
        let sum = state.add(&state);
        let doubled = sum.to_frames().unwrap().remove(0);
        assert_eq!(doubled, FieldFrame::uniform([4, 4], 2.0, 1.0, [0.0, 4.0]));
        assert_eq!(state.to_frames().unwrap()[0], frame);
    }

    #[test]
    fn excitation_broadcasts_over_rows() {
        let device = Default::default();
        let profile = Array1::from(vec![0.1f32, -0.2, 0.3]);
        let exc = Excitation::<TestBackend>::from_profiles(&[&profile], &device).unwrap();
        let aux = exc.aux_channel(5);
        assert_eq!(aux.dims(), [1, 1, 5, 3]);
        let values = tensor_to_vec(&aux).unwrap();
        for row in values.chunks(3) {
            assert_eq!(row, &[0.1, -0.2, 0.3]);
        }
    }

    #[test]
    fn excitation_rows_stay_per_condition() {
        let device = Default::default();
        let first = Array1::from(vec![1.0f32, 2.0]);
        let second = Array1::from(vec![-1.0f32, -2.0]);
        let exc = Excitation::<TestBackend>::from_profiles(&[&first, &second], &device).unwrap();
        let aux = exc.aux_channel(3);
        assert_eq!(aux.dims(), [2, 1, 3, 2]);
        let values = tensor_to_vec(&aux).unwrap();
        assert_eq!(&values[..6], &[1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
        assert_eq!(&values[6..], &[-1.0, -2.0, -1.0, -2.0, -1.0, -2.0]);
    }
}
