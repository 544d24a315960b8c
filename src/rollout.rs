//! 物理ステップと補正ネットワークの合成を `m` ステップ展開するロールアウト。
//!
//! 各ステップは
//!
//! ```text
//! raw       = PhysicsStep(prev, excitation)
//! corrected = raw + denormalize(Network(normalize(raw), excitation))
//! prev      = corrected
//! ```
//!
//! で、途中で計算グラフを切る操作は一切ありません。自動微分バックエンドでは
//! 窓全体の損失からすべての物理ステップとネットワーク呼び出しを通って
//! パラメータまで勾配が流れ、通常のバックエンドではそのまま推論になります。

use crate::error::{ConfigError, HybridError, HybridResult};
use crate::field::{Excitation, FieldState};
use crate::model::CorrectionNetwork;
use crate::normalization::NormStats;
use crate::physics::PhysicsStep;
use burn::prelude::Backend;
use burn::tensor::Tensor;

/// ソルバー・ネットワーク・正規化統計量を束ねたロールアウトエンジン。
pub struct Rollout<'a, B: Backend, P> {
    solver: &'a P,
    network: &'a CorrectionNetwork<B>,
    stats: &'a NormStats,
}

impl<'a, B: Backend, P: PhysicsStep<B>> Rollout<'a, B, P> {
    pub fn new(solver: &'a P, network: &'a CorrectionNetwork<B>, stats: &'a NormStats) -> Self {
        Self {
            solver,
            network,
            stats,
        }
    }

    /// 物理単位の `raw` に対する補正量（物理単位）を返します。
    pub fn correction(&self, raw: &FieldState<B>, excitation: &Excitation<B>) -> HybridResult<FieldState<B>> {
        let [h, _] = raw.grid();
        let input = Tensor::cat(vec![self.stats.normalize(raw), excitation.aux_channel(h)], 1);
        let delta = self.network.forward(input)?;
        self.stats.denormalize_delta(delta)
    }

    /// 1 ステップ進めます。
    pub fn step(&self, prev: &FieldState<B>, excitation: &Excitation<B>) -> HybridResult<FieldState<B>> {
        let raw = self.solver.step(prev, excitation);
        let delta = self.correction(&raw, excitation)?;
        Ok(raw.add(&delta))
    }

    /// `initial` から `steps` ステップ展開し、予測列（`initial` は含まない）を返します。
    pub fn run(
        &self,
        initial: &FieldState<B>,
        excitation: &Excitation<B>,
        steps: usize,
    ) -> HybridResult<Vec<FieldState<B>>> {
        if steps == 0 {
            return Err(ConfigError::invalid_value("rollout_steps", "1 以上が必要です").into());
        }
        if initial.grid() != self.network.grid() {
            return Err(HybridError::shape_mismatch(self.network.grid(), initial.grid()));
        }
        excitation.check_matches(initial)?;

        let mut states = Vec::with_capacity(steps);
        let mut prev = initial.clone();
        for _ in 0..steps {
            let next = self.step(&prev, excitation)?;
            states.push(next.clone());
            prev = next;
        }
        Ok(states)
    }
}
