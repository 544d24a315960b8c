//! 正解時系列（励起条件ごとのフレーム列）とミニバッチの切り出し。
//!
//! 実データの読み込みはこのクレートの範囲外で、ここでは参照ソルバーで
//! 正解時系列を作る [`SyntheticBunsen`] を用意しています。

use crate::config::{DatasetConfig, GridConfig, SolverConfig};
use crate::error::{HybridError, HybridResult};
use crate::field::{Excitation, FieldFrame, FieldState};
use crate::physics::{PhysicsStep, ReactiveSolver};
use burn::prelude::Backend;
use ndarray::Array1;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::f32::consts::TAU;
use tracing::debug;

/// 1 つの励起条件に対する正解時系列。
#[derive(Debug, Clone)]
pub struct Trajectory {
    /// 流入口プロファイル `[W]`
    pub excitation: Array1<f32>,
    /// 時刻順のフレーム
    pub frames: Vec<FieldFrame>,
}

/// ロールアウト 1 回分の切り出し。`targets[i]` は `initial` から `i + 1` ステップ後。
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    pub excitation: &'a Array1<f32>,
    pub initial: &'a FieldFrame,
    pub targets: &'a [FieldFrame],
}

/// デバイスへ転送済みのミニバッチ。
#[derive(Debug, Clone)]
pub struct Batch<B: Backend> {
    pub initial: FieldState<B>,
    /// 長さ `m`
    pub targets: Vec<FieldState<B>>,
    pub excitation: Excitation<B>,
}

impl<B: Backend> Batch<B> {
    pub fn from_windows(windows: &[Window<'_>], device: &B::Device) -> HybridResult<Self> {
        let first = windows
            .first()
            .ok_or(HybridError::IndexOutOfBounds { index: 0, len: 0 })?;
        let m = first.targets.len();

        let initials: Vec<&FieldFrame> = windows.iter().map(|w| w.initial).collect();
        let profiles: Vec<&Array1<f32>> = windows.iter().map(|w| w.excitation).collect();
        let mut targets = Vec::with_capacity(m);
        for i in 0..m {
            let frames = windows
                .iter()
                .map(|w| w.targets.get(i).ok_or(HybridError::IndexOutOfBounds { index: i, len: w.targets.len() }))
                .collect::<HybridResult<Vec<_>>>()?;
            targets.push(FieldState::from_frames(&frames, device)?);
        }

        Ok(Self {
            initial: FieldState::from_frames(&initials, device)?,
            targets,
            excitation: Excitation::from_profiles(&profiles, device)?,
        })
    }
}

/// 同じグリッド上の正解時系列の集合。
#[derive(Debug, Clone)]
pub struct TrajectorySet {
    trajectories: Vec<Trajectory>,
}

impl TrajectorySet {
    /// すべての時系列が同じグリッドと励起幅を持つことを確認して作ります。
    pub fn new(trajectories: Vec<Trajectory>) -> HybridResult<Self> {
        let grid = trajectories
            .first()
            .and_then(|t| t.frames.first())
            .map(FieldFrame::grid)
            .ok_or(HybridError::IndexOutOfBounds { index: 0, len: 0 })?;
        for t in &trajectories {
            if t.excitation.len() != grid[1] {
                return Err(HybridError::shape_mismatch([grid[1]], [t.excitation.len()]));
            }
            if let Some(frame) = t.frames.iter().find(|f| f.grid() != grid) {
                return Err(HybridError::shape_mismatch(grid, frame.grid()));
            }
        }
        Ok(Self { trajectories })
    }

    pub fn len(&self) -> usize {
        self.trajectories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectories.is_empty()
    }

    pub fn grid(&self) -> [usize; 2] {
        self.trajectories[0].frames[0].grid()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trajectory> {
        self.trajectories.iter()
    }

    pub fn get(&self, index: usize) -> HybridResult<&Trajectory> {
        self.trajectories.get(index).ok_or(HybridError::IndexOutOfBounds {
            index,
            len: self.trajectories.len(),
        })
    }

    /// すべてのフレーム（正規化統計量の計算用）。
    pub fn frames(&self) -> impl Iterator<Item = &FieldFrame> + Clone {
        self.trajectories.iter().flat_map(|t| t.frames.iter())
    }

    /// 時系列 `trajectory` の `start` から長さ `m` の窓を切り出します。
    pub fn window(&self, trajectory: usize, start: usize, m: usize) -> HybridResult<Window<'_>> {
        let t = self.get(trajectory)?;
        let end = start + m;
        if end >= t.frames.len() {
            return Err(HybridError::IndexOutOfBounds {
                index: end,
                len: t.frames.len(),
            });
        }
        Ok(Window {
            excitation: &t.excitation,
            initial: &t.frames[start],
            targets: &t.frames[start + 1..=end],
        })
    }

    /// 時系列と開始時刻を一様に選んだ `batch_size` 個の窓をミニバッチにします。
    pub fn sample_batch<B: Backend, R: Rng>(
        &self,
        rng: &mut R,
        batch_size: usize,
        m: usize,
        device: &B::Device,
    ) -> HybridResult<Batch<B>> {
        let windows = (0..batch_size)
            .map(|_| {
                let trajectory = rng.random_range(0..self.len());
                let frames = self.trajectories[trajectory].frames.len();
                if frames <= m {
                    return Err(HybridError::IndexOutOfBounds { index: m, len: frames });
                }
                let start = rng.random_range(0..frames - m);
                self.window(trajectory, start, m)
            })
            .collect::<HybridResult<Vec<_>>>()?;
        Batch::from_windows(&windows, device)
    }
}

/// 参照ソルバーで Bunsen 火炎の正解時系列を作る生成器。
#[derive(Debug, Clone)]
pub struct SyntheticBunsen {
    grid: GridConfig,
    solver: SolverConfig,
    config: DatasetConfig,
}

impl SyntheticBunsen {
    pub fn new(grid: GridConfig, solver: SolverConfig, config: DatasetConfig) -> Self {
        Self {
            grid,
            solver,
            config,
        }
    }

    /// 低温の流入側と高温の上半分からなる初期状態。
    pub fn initial_frame(&self) -> FieldFrame {
        let [h, w] = self.grid.dims();
        let mut frame = FieldFrame::uniform([h, w], 800.0, 0.0, [0.0, 0.0]);
        for i in h / 2..h {
            for j in 0..w {
                frame.temperature[[i, j]] = 2000.0;
            }
        }
        frame
    }

    /// `[-1, 1]` に収まる滑らかな励起プロファイルを `n` 個作ります。
    pub fn excitation_profiles(&self, n: usize, seed: u64) -> Vec<Array1<f32>> {
        let w = self.grid.width;
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let modes: Vec<(f32, f32)> = (1..=3)
                    .map(|k| (rng.random_range(-1.0f32..1.0) / k as f32, rng.random_range(0.0..TAU)))
                    .collect();
                let profile = Array1::from_shape_fn(w, |j| {
                    let x = j as f32 / w as f32;
                    modes
                        .iter()
                        .enumerate()
                        .map(|(k, &(amp, phase))| amp * (TAU * (k + 1) as f32 * x + phase).sin())
                        .sum::<f32>()
                });
                let peak = profile.iter().fold(0.0f32, |m, v| m.max(v.abs()));
                if peak > 0.0 { profile / peak } else { profile }
            })
            .collect()
    }

    /// 学習用の時系列。
    pub fn train_set<B: Backend>(&self, device: &B::Device) -> HybridResult<TrajectorySet> {
        let profiles = self.excitation_profiles(self.config.train_conditions, self.config.seed);
        self.generate::<B>(profiles, device)
    }

    /// 学習用とは別の乱数系列から作るテスト用の時系列。
    pub fn test_set<B: Backend>(&self, device: &B::Device) -> HybridResult<TrajectorySet> {
        let profiles = self.excitation_profiles(self.config.test_conditions, self.config.seed.wrapping_add(1_000_003));
        self.generate::<B>(profiles, device)
    }

    /// すべての条件を 1 つのバッチとしてまとめて時間発展させます。
    pub fn generate<B: Backend>(&self, profiles: Vec<Array1<f32>>, device: &B::Device) -> HybridResult<TrajectorySet> {
        let n = profiles.len();
        let initial = self.initial_frame();
        let initials = vec![&initial; n];
        let profile_refs: Vec<&Array1<f32>> = profiles.iter().collect();
        let excitation = Excitation::<B>::from_profiles(&profile_refs, device)?;
        let mut state = FieldState::<B>::from_frames(&initials, device)?;
        let solver = ReactiveSolver::<B>::new(self.solver.clone(), self.grid, device);

        for _ in 0..self.config.warmup_steps {
            state = solver.step(&state, &excitation);
        }

        let mut frames: Vec<Vec<FieldFrame>> = vec![Vec::with_capacity(self.config.frames); n];
        for step in 0..self.config.frames {
            if step > 0 {
                state = solver.step(&state, &excitation);
            }
            for (series, frame) in frames.iter_mut().zip(state.to_frames()?) {
                series.push(frame);
            }
        }
        debug!("合成データを生成しました: {} 条件 × {} フレーム", n, self.config.frames);

        TrajectorySet::new(
            profiles
                .into_iter()
                .zip(frames)
                .map(|(excitation, frames)| Trajectory { excitation, frames })
                .collect(),
        )
    }
}
