//! 学習・推論の設定。
//!
//! すべての項目は既定値を持ち、JSON ファイルから部分的に上書きできます。
//! 未知のキーはエラーになります。読み込んだ後は必ず [`TrainingConfig::validate`]
//! を通してから使ってください。

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 計算グリッドの解像度。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridConfig {
    /// 行数（流れ方向、行 0 が流入口）
    pub height: usize,
    /// 列数
    pub width: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            height: 32,
            width: 32,
        }
    }
}

impl GridConfig {
    /// `[H, W]` として返します。
    pub fn dims(&self) -> [usize; 2] {
        [self.height, self.width]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // 4 行未満では壁（H/4 以降）と流入口が重なる
        if self.height < 4 {
            return Err(ConfigError::invalid_value("grid.height", "4 以上が必要です"));
        }
        if self.width < 3 {
            return Err(ConfigError::invalid_value("grid.width", "3 以上が必要です"));
        }
        Ok(())
    }
}

/// 非反応流ソルバー（および参照用の反応流ソルバー）のパラメータ。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverConfig {
    /// 時間刻み
    pub dt: f64,
    /// 格子間隔
    pub dx: f64,
    /// 動粘性係数
    pub viscosity: f64,
    /// 温度・化学種の拡散係数
    pub diffusivity: f64,
    /// 流入口の温度 [K]
    pub inlet_temperature: f64,
    /// 上端の温度 [K]
    pub top_temperature: f64,
    /// 当量比
    pub equivalence_ratio: f64,
    /// 参照ソルバーの反応パラメータ
    pub reaction: ReactionConfig,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            dt: 0.05,
            dx: 1.0,
            viscosity: 0.1,
            diffusivity: 0.1,
            inlet_temperature: 800.0,
            top_temperature: 2000.0,
            equivalence_ratio: 1.0,
            reaction: ReactionConfig::default(),
        }
    }
}

impl SolverConfig {
    /// 流入口での燃料質量分率 `Zf_max = 1 / (1 + 4 * 4.29 / eq)`。
    pub fn inlet_fuel_fraction(&self) -> f64 {
        1.0 / (1.0 + 4.0 * 4.29 / self.equivalence_ratio)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("solver.dt", self.dt),
            ("solver.dx", self.dx),
            ("solver.equivalence_ratio", self.equivalence_ratio),
        ] {
            if !(value > 0.0) || !value.is_finite() {
                return Err(ConfigError::invalid_value(field, format!("正の有限値が必要です ({value})")));
            }
        }
        for (field, value) in [
            ("solver.viscosity", self.viscosity),
            ("solver.diffusivity", self.diffusivity),
        ] {
            if !(value >= 0.0) || !value.is_finite() {
                return Err(ConfigError::invalid_value(field, format!("非負の有限値が必要です ({value})")));
            }
        }
        // 陽的拡散の安定条件
        let diffusion_number = self.viscosity.max(self.diffusivity) * self.dt / (self.dx * self.dx);
        if diffusion_number > 0.25 {
            return Err(ConfigError::invalid_value(
                "solver.dt",
                format!("拡散数 {diffusion_number:.3} が 0.25 を超えています"),
            ));
        }
        self.reaction.validate()
    }
}

/// 一段総括反応（メタン）の Arrhenius パラメータ。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReactionConfig {
    /// 頻度因子 A
    pub pre_exponential: f64,
    /// 活性化エネルギー E [J/mol]
    pub activation_energy: f64,
    /// 発熱量 hk [J/kg]
    pub heat_of_combustion: f64,
    /// 定圧比熱 cp [J/(kg K)]
    pub heat_capacity: f64,
}

impl Default for ReactionConfig {
    fn default() -> Self {
        Self {
            pre_exponential: 5.1e4,
            activation_energy: 93600.0,
            heat_of_combustion: 5.01e7,
            heat_capacity: 1450.0,
        }
    }
}

impl ReactionConfig {
    /// 燃料質量分率 1 を消費したときの温度上昇 `hk / cp` [K]。
    pub fn temperature_rise(&self) -> f64 {
        self.heat_of_combustion / self.heat_capacity
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.heat_capacity > 0.0) {
            return Err(ConfigError::invalid_value("solver.reaction.heat_capacity", "正の値が必要です"));
        }
        if !(self.pre_exponential >= 0.0) || !(self.activation_energy >= 0.0) {
            return Err(ConfigError::invalid_value(
                "solver.reaction",
                "頻度因子と活性化エネルギーは非負である必要があります",
            ));
        }
        Ok(())
    }
}

/// 補正ネットワーク（U-Net）の構成。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// 最上段のチャネル数。段を下るごとに 2 倍になります。
    pub base_channels: usize,
    /// ダウンサンプリング段数
    pub depth: usize,
    /// 出力層をゼロで初期化し、補正を恒等的に 0 から始める
    pub zero_init_head: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_channels: 16,
            depth: 2,
            zero_init_head: false,
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self, grid: &GridConfig) -> Result<(), ConfigError> {
        if self.base_channels == 0 {
            return Err(ConfigError::invalid_value("network.base_channels", "1 以上が必要です"));
        }
        if self.depth == 0 {
            return Err(ConfigError::invalid_value("network.depth", "1 以上が必要です"));
        }
        let factor = 1usize << self.depth;
        if grid.height % factor != 0 || grid.width % factor != 0 {
            return Err(ConfigError::invalid_value(
                "network.depth",
                format!(
                    "グリッド {}x{} は 2^{} = {} で割り切れる必要があります",
                    grid.height, grid.width, self.depth, factor
                ),
            ));
        }
        Ok(())
    }
}

/// 物理量ごとの損失の重み。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LossWeights {
    pub temperature: f64,
    pub mass_fraction: f64,
    pub velocity: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            mass_fraction: 1.0,
            velocity: 1.0,
        }
    }
}

/// ロールアウト窓内の各ステップへの重み付け。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepWeighting {
    /// すべてのステップを同じ重みにする
    #[default]
    Uniform,
    /// ステップ `i` の重みを `ratio^i` とする（窓全体で和が 1 になるよう正規化）
    Geometric { ratio: f64 },
}

/// 損失関数の構成。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct LossConfig {
    pub weights: LossWeights,
    pub step_weighting: StepWeighting,
}

impl LossConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.weights;
        for (field, value) in [
            ("loss.weights.temperature", w.temperature),
            ("loss.weights.mass_fraction", w.mass_fraction),
            ("loss.weights.velocity", w.velocity),
        ] {
            if !(value >= 0.0) || !value.is_finite() {
                return Err(ConfigError::invalid_value(field, format!("非負の有限値が必要です ({value})")));
            }
        }
        if w.temperature + w.mass_fraction + w.velocity <= 0.0 {
            return Err(ConfigError::invalid_value("loss.weights", "少なくとも 1 つは正である必要があります"));
        }
        if let StepWeighting::Geometric { ratio } = self.step_weighting {
            if !(ratio > 0.0) || !ratio.is_finite() {
                return Err(ConfigError::invalid_value(
                    "loss.step_weighting.ratio",
                    format!("正の有限値が必要です ({ratio})"),
                ));
            }
        }
        Ok(())
    }
}

/// 合成データセット（正解時系列）の構成。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetConfig {
    /// 学習用の励起条件の数
    pub train_conditions: usize,
    /// テスト用の励起条件の数
    pub test_conditions: usize,
    /// 1 条件あたりに記録するフレーム数
    pub frames: usize,
    /// 記録開始前に捨てる助走ステップ数
    pub warmup_steps: usize,
    /// 励起プロファイルを作る乱数シード（テスト側は別の系列を使う）
    pub seed: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            train_conditions: 12,
            test_conditions: 12,
            frames: 300,
            warmup_steps: 50,
            seed: 7,
        }
    }
}

/// 学習実行の全設定。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    pub grid: GridConfig,
    pub solver: SolverConfig,
    pub network: NetworkConfig,
    pub loss: LossConfig,
    pub dataset: DatasetConfig,
    /// ロールアウト窓の長さ m
    pub rollout_steps: usize,
    /// エポック数
    pub num_epochs: usize,
    /// 1 エポックあたりのミニバッチ数
    pub batches_per_epoch: usize,
    /// ミニバッチのサンプル数
    pub batch_size: usize,
    /// Adam の初期学習率
    pub learning_rate: f64,
    /// 学習率を `lr_gamma` 倍にするエポック
    pub lr_milestones: Vec<usize>,
    pub lr_gamma: f64,
    /// 何エポックごとにチェックポイントを保存するか
    pub checkpoint_every: usize,
    pub checkpoint_dir: PathBuf,
    /// 短い窓で学習済みのバンドル（ウォームスタート元）
    pub warm_start: Option<PathBuf>,
    /// ミニバッチ抽出の乱数シード
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            solver: SolverConfig::default(),
            network: NetworkConfig::default(),
            loss: LossConfig::default(),
            dataset: DatasetConfig::default(),
            rollout_steps: 2,
            num_epochs: 100,
            batches_per_epoch: 16,
            batch_size: 4,
            learning_rate: 1e-4,
            lr_milestones: vec![60, 85],
            lr_gamma: 0.1,
            checkpoint_every: 10,
            checkpoint_dir: PathBuf::from("checkpoints"),
            warm_start: None,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    /// JSON ファイルから読み込みます。省略したキーは既定値になります。
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// エポック `epoch`（1 始まり）で使う学習率。
    pub fn learning_rate_at(&self, epoch: usize) -> f64 {
        let passed = self.lr_milestones.iter().filter(|&&m| epoch > m).count();
        self.learning_rate * self.lr_gamma.powi(passed as i32)
    }

    /// すべての項目を検証します。
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grid.validate()?;
        self.solver.validate()?;
        self.network.validate(&self.grid)?;
        self.loss.validate()?;

        if self.rollout_steps == 0 {
            return Err(ConfigError::invalid_value("rollout_steps", "1 以上が必要です"));
        }
        if self.dataset.frames <= self.rollout_steps {
            return Err(ConfigError::invalid_value(
                "dataset.frames",
                format!(
                    "ロールアウト窓 m={} より多いフレームが必要です ({})",
                    self.rollout_steps, self.dataset.frames
                ),
            ));
        }
        if self.dataset.train_conditions == 0 {
            return Err(ConfigError::invalid_value("dataset.train_conditions", "1 以上が必要です"));
        }
        if self.num_epochs == 0 {
            return Err(ConfigError::invalid_value("num_epochs", "1 以上が必要です"));
        }
        if self.batches_per_epoch == 0 || self.batch_size == 0 {
            return Err(ConfigError::invalid_value(
                "batch_size",
                "batch_size と batches_per_epoch は 1 以上が必要です",
            ));
        }
        if !(self.learning_rate > 0.0) || !self.learning_rate.is_finite() {
            return Err(ConfigError::invalid_value(
                "learning_rate",
                format!("正の有限値が必要です ({})", self.learning_rate),
            ));
        }
        if !(self.lr_gamma > 0.0) || self.lr_gamma > 1.0 {
            return Err(ConfigError::invalid_value("lr_gamma", "(0, 1] の範囲が必要です"));
        }
        if self.checkpoint_every == 0 {
            return Err(ConfigError::invalid_value("checkpoint_every", "1 以上が必要です"));
        }
        Ok(())
    }
}
