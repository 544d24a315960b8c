//! 1 ステップ分の流体ソルバー。
//!
//! [`PhysicsStep`] はロールアウトから見た外部の協調者で、`burn` のテンソル演算
//! だけで書かれているため自動微分でそのまま逆伝播できます。境界条件はソルバーが
//! 所有し、毎ステップ同じものを適用し直します。
//!
//! * [`NonReactiveSolver`]: 学習ループに組み込む粗いソルバー（移流・拡散のみ）
//! * [`ReactiveSolver`]: 同じ輸送に一段総括反応を加えた参照ソルバー（正解データ生成用）

use crate::config::{GridConfig, ReactionConfig, SolverConfig};
use crate::field::{Excitation, FieldState, tensor_from_vec};
use burn::prelude::Backend;
use burn::tensor::Tensor;

/// 気体定数 [J/(mol K)]
const GAS_CONSTANT: f64 = 8.314;

/// 場を 1 時間ステップだけ進める微分可能な写像。
pub trait PhysicsStep<B: Backend> {
    /// `state` から次の時刻の場を新しく作って返します（入力は変更しません）。
    fn step(&self, state: &FieldState<B>, excitation: &Excitation<B>) -> FieldState<B>;
}

/// 非反応流ソルバー。
///
/// 境界条件のマスクは構築時のグリッドでデバイス上に一度だけ作ります。
#[derive(Debug, Clone)]
pub struct NonReactiveSolver<B: Backend> {
    config: SolverConfig,
    boundary: BunsenBoundary<B>,
}

impl<B: Backend> NonReactiveSolver<B> {
    pub fn new(config: SolverConfig, grid: GridConfig, device: &B::Device) -> Self {
        let boundary = BunsenBoundary::new(grid.dims(), &config, device);
        Self { config, boundary }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// 速度・温度・燃料の輸送（移流＋拡散）だけを行い、境界条件はまだ適用しません。
    fn transport(&self, state: &FieldState<B>) -> FieldState<B> {
        let c = &self.config;
        let ux = state.velocity_x();
        let uy = state.velocity_y();

        let ux_next = diffuse(advect(ux.clone(), &ux, &uy, c), c.viscosity, c);
        let uy_next = diffuse(advect(uy.clone(), &ux, &uy, c), c.viscosity, c);

        let temperature = diffuse(
            advect(state.temperature.clone(), &ux_next, &uy_next, c),
            c.diffusivity,
            c,
        );
        let mass_fraction = diffuse(
            advect(state.mass_fraction.clone(), &ux_next, &uy_next, c),
            c.diffusivity,
            c,
        );

        FieldState {
            temperature,
            mass_fraction,
            velocity: Tensor::cat(vec![ux_next, uy_next], 1),
        }
    }

    /// 境界条件を適用します。構築時と異なるグリッドの場には、その場でマスクを作ります。
    fn apply_boundary(&self, state: FieldState<B>, excitation: &Excitation<B>) -> FieldState<B> {
        let grid = state.grid();
        if grid == self.boundary.grid {
            self.boundary.apply(state, excitation)
        } else {
            BunsenBoundary::new(grid, &self.config, &state.device()).apply(state, excitation)
        }
    }
}

impl<B: Backend> PhysicsStep<B> for NonReactiveSolver<B> {
    fn step(&self, state: &FieldState<B>, excitation: &Excitation<B>) -> FieldState<B> {
        self.apply_boundary(self.transport(state), excitation)
    }
}

/// 反応項付きの参照ソルバー。
#[derive(Debug, Clone)]
pub struct ReactiveSolver<B: Backend> {
    transport: NonReactiveSolver<B>,
    reaction: ReactionConfig,
}

impl<B: Backend> ReactiveSolver<B> {
    pub fn new(config: SolverConfig, grid: GridConfig, device: &B::Device) -> Self {
        let reaction = config.reaction.clone();
        Self {
            transport: NonReactiveSolver::new(config, grid, device),
            reaction,
        }
    }

    /// 一段総括反応 `dYf/dt = -A exp(-E / (R T)) Yf` を 1 ステップ厳密に積分し、
    /// 消費した燃料に比例して温度を上げます。消費量は `Yf` を超えません。
    fn react(&self, state: FieldState<B>) -> FieldState<B> {
        let r = &self.reaction;
        let dt = self.transport.config.dt;

        let rate = state
            .temperature
            .clone()
            .clamp_min(1.0)
            .recip()
            .mul_scalar(-r.activation_energy / GAS_CONSTANT)
            .exp()
            .mul_scalar(r.pre_exponential * dt);
        let fuel = state.mass_fraction.clone().clamp_min(0.0);
        let consumed = fuel * (rate.neg().exp().neg().add_scalar(1.0));

        FieldState {
            temperature: state.temperature + consumed.clone().mul_scalar(r.temperature_rise()),
            mass_fraction: state.mass_fraction - consumed,
            velocity: state.velocity,
        }
    }
}

impl<B: Backend> PhysicsStep<B> for ReactiveSolver<B> {
    fn step(&self, state: &FieldState<B>, excitation: &Excitation<B>) -> FieldState<B> {
        let reacted = self.react(self.transport.transport(state));
        self.transport.apply_boundary(reacted, excitation)
    }
}

/// Bunsen 型バーナーの境界条件。
///
/// * 行 0（流入口）: `uy = |rd| * 4 + 6`, `ux = 0`, `T = inlet_temperature`, `Yf = Zf_max`
/// * 最上行: `T = top_temperature`
/// * 左右の壁（列 0 と W-1、行 H/4 以降）: `uy = 0`
///
/// 各量は `q * mask + value` の形で上書きします。
#[derive(Debug, Clone)]
struct BunsenBoundary<B: Backend> {
    grid: [usize; 2],
    temperature_mask: Tensor<B, 4>,
    temperature_value: Tensor<B, 4>,
    fuel_mask: Tensor<B, 4>,
    fuel_value: Tensor<B, 4>,
    ux_mask: Tensor<B, 4>,
    uy_mask: Tensor<B, 4>,
}

impl<B: Backend> BunsenBoundary<B> {
    fn new(grid: [usize; 2], config: &SolverConfig, device: &B::Device) -> Self {
        let [h, w] = grid;
        let wall_start = h / 4;
        let cell = |i: usize, j: usize| i * w + j;

        let mut temperature_mask = vec![1.0f32; h * w];
        let mut temperature_value = vec![0.0f32; h * w];
        let mut fuel_mask = vec![1.0f32; h * w];
        let mut fuel_value = vec![0.0f32; h * w];
        let mut ux_mask = vec![1.0f32; h * w];
        let mut uy_mask = vec![1.0f32; h * w];

        for j in 0..w {
            temperature_mask[cell(0, j)] = 0.0;
            temperature_value[cell(0, j)] = config.inlet_temperature as f32;
            temperature_mask[cell(h - 1, j)] = 0.0;
            temperature_value[cell(h - 1, j)] = config.top_temperature as f32;
            fuel_mask[cell(0, j)] = 0.0;
            fuel_value[cell(0, j)] = config.inlet_fuel_fraction() as f32;
            ux_mask[cell(0, j)] = 0.0;
            uy_mask[cell(0, j)] = 0.0;
        }
        for i in wall_start.max(1)..h {
            uy_mask[cell(i, 0)] = 0.0;
            uy_mask[cell(i, w - 1)] = 0.0;
        }

        let shape = [1, 1, h, w];
        Self {
            grid,
            temperature_mask: tensor_from_vec(temperature_mask, shape, device),
            temperature_value: tensor_from_vec(temperature_value, shape, device),
            fuel_mask: tensor_from_vec(fuel_mask, shape, device),
            fuel_value: tensor_from_vec(fuel_value, shape, device),
            ux_mask: tensor_from_vec(ux_mask, shape, device),
            uy_mask: tensor_from_vec(uy_mask, shape, device),
        }
    }

    fn apply(&self, state: FieldState<B>, excitation: &Excitation<B>) -> FieldState<B> {
        let [b, _, h, w] = state.temperature.dims();
        let device = state.device();

        let inlet = excitation.inlet_row().abs().mul_scalar(4.0).add_scalar(6.0);
        let uy_value = Tensor::cat(vec![inlet, Tensor::zeros([b, 1, h - 1, w], &device)], 2);

        let ux = state.velocity_x() * self.ux_mask.clone();
        let uy = state.velocity_y() * self.uy_mask.clone() + uy_value;

        FieldState {
            temperature: state.temperature * self.temperature_mask.clone() + self.temperature_value.clone(),
            mass_fraction: state.mass_fraction * self.fuel_mask.clone() + self.fuel_value.clone(),
            velocity: Tensor::cat(vec![ux, uy], 1),
        }
    }
}

/// 端の値を複製した 4 近傍 `(左, 右, 下, 上)`。
fn neighbours<B: Backend>(q: &Tensor<B, 4>) -> [Tensor<B, 4>; 4] {
    let [b, c, h, w] = q.dims();
    let cols = |r: std::ops::Range<usize>| q.clone().slice([0..b, 0..c, 0..h, r]);
    let rows = |r: std::ops::Range<usize>| q.clone().slice([0..b, 0..c, r, 0..w]);

    let left = Tensor::cat(vec![cols(0..1), cols(0..w - 1)], 3);
    let right = Tensor::cat(vec![cols(1..w), cols(w - 1..w)], 3);
    let down = Tensor::cat(vec![rows(0..1), rows(0..h - 1)], 2);
    let up = Tensor::cat(vec![rows(1..h), rows(h - 1..h)], 2);
    [left, right, down, up]
}

/// 一次風上差分による移流 `q - dt (u · ∇q)`。
fn advect<B: Backend>(q: Tensor<B, 4>, ux: &Tensor<B, 4>, uy: &Tensor<B, 4>, config: &SolverConfig) -> Tensor<B, 4> {
    let [left, right, down, up] = neighbours(&q);
    let ux_pos = ux.clone().clamp_min(0.0);
    let ux_neg = ux.clone() - ux_pos.clone();
    let uy_pos = uy.clone().clamp_min(0.0);
    let uy_neg = uy.clone() - uy_pos.clone();

    let flux = ux_pos * (q.clone() - left)
        + ux_neg * (right - q.clone())
        + uy_pos * (q.clone() - down)
        + uy_neg * (up - q.clone());
    q - flux.mul_scalar(config.dt / config.dx)
}

/// 5 点ラプラシアンによる陽的拡散 `q + dt ν ∇²q`。
fn diffuse<B: Backend>(q: Tensor<B, 4>, coefficient: f64, config: &SolverConfig) -> Tensor<B, 4> {
    if coefficient == 0.0 {
        return q;
    }
    let [left, right, down, up] = neighbours(&q);
    let laplacian = left + right + down + up - q.clone().mul_scalar(4.0);
    q + laplacian.mul_scalar(coefficient * config.dt / (config.dx * config.dx))
}
