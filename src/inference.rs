use crate::checkpoint::{Bundle, check_physics, load_bundle};
use crate::cli::InferArgs;
use crate::config::{DatasetConfig, TrainingConfig};
use crate::dataset::{SyntheticBunsen, TrajectorySet};
use crate::error::{ConfigError, HybridError, HybridResult};
use crate::field::{Excitation, FieldFrame, FieldState};
use crate::physics::{NonReactiveSolver, PhysicsStep};
use crate::rollout::Rollout;
use burn::backend::NdArray;
use burn::prelude::Backend;
use ndarray::{Array1, Array3, Array4, ArrayView, Axis, Dimension, RemoveAxis, stack};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::info;

type MyBackend = NdArray<f32>;

/// 1 条件分の予測時系列（ホスト側）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSeries {
    /// `[steps, H, W]`
    pub temperature: Array3<f32>,
    /// `[steps, H, W]`
    pub mass_fraction: Array3<f32>,
    /// `[steps, 2, H, W]`
    pub velocity: Array4<f32>,
}

/// 物理量ごとの RMSE。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesError {
    pub temperature: f64,
    pub mass_fraction: f64,
    pub velocity: f64,
}

fn stack_views<D>(views: Vec<ArrayView<'_, f32, D>>) -> HybridResult<ndarray::Array<f32, D::Larger>>
where
    D: Dimension,
    D::Larger: RemoveAxis,
{
    stack(Axis(0), &views).map_err(|e| HybridError::Data(e.to_string()))
}

fn rmse<D: Dimension>(a: &ndarray::Array<f32, D>, b: &ndarray::Array<f32, D>) -> HybridResult<f64> {
    if a.shape() != b.shape() {
        return Err(HybridError::shape_mismatch(b.shape(), a.shape()));
    }
    let n = a.len().max(1) as f64;
    let sum: f64 = a.iter().zip(b).map(|(&x, &y)| (x as f64 - y as f64).powi(2)).sum();
    Ok((sum / n).sqrt())
}

impl FieldSeries {
    /// 時刻順のフレームを積み重ねます。
    pub fn from_frames(frames: &[FieldFrame]) -> HybridResult<Self> {
        if frames.is_empty() {
            return Err(HybridError::Data("空の時系列は作れません".to_string()));
        }
        Ok(Self {
            temperature: stack_views(frames.iter().map(|f| f.temperature.view()).collect())?,
            mass_fraction: stack_views(frames.iter().map(|f| f.mass_fraction.view()).collect())?,
            velocity: stack_views(frames.iter().map(|f| f.velocity.view()).collect())?,
        })
    }

    pub fn steps(&self) -> usize {
        self.temperature.len_of(Axis(0))
    }

    /// 同じ長さの正解時系列との RMSE。
    pub fn rmse(&self, truth: &FieldSeries) -> HybridResult<SeriesError> {
        Ok(SeriesError {
            temperature: rmse(&self.temperature, &truth.temperature)?,
            mass_fraction: rmse(&self.mass_fraction, &truth.mass_fraction)?,
            velocity: rmse(&self.velocity, &truth.velocity)?,
        })
    }

    /// `dir/{temperature,mass_fraction,velocity}.json` に書き出します。
    pub fn write_json(&self, dir: &Path) -> HybridResult<()> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join("temperature.json"), serde_json::to_string(&self.temperature)?)?;
        std::fs::write(dir.join("mass_fraction.json"), serde_json::to_string(&self.mass_fraction)?)?;
        std::fs::write(dir.join("velocity.json"), serde_json::to_string(&self.velocity)?)?;
        Ok(())
    }
}

/// 学習済みバンドルで物理ステップと補正を長時間展開する推論器。
pub struct InferenceRunner<B: Backend, P> {
    bundle: Bundle<B>,
    solver: P,
    device: B::Device,
}

impl<B: Backend, P: PhysicsStep<B>> InferenceRunner<B, P> {
    pub fn new(bundle: Bundle<B>, solver: P, device: B::Device) -> Self {
        Self { bundle, solver, device }
    }

    pub fn bundle(&self) -> &Bundle<B> {
        &self.bundle
    }

    /// 各条件 `(initial[i], excitation[i])` から `steps` ステップ予測します。
    ///
    /// 返り値の `i` 番目は条件 `i` の時系列で、初期状態は含みません。
    pub fn predict(
        &self,
        initials: &[&FieldFrame],
        excitations: &[&Array1<f32>],
        steps: usize,
    ) -> HybridResult<Vec<FieldSeries>> {
        let initial = FieldState::<B>::from_frames(initials, &self.device)?;
        let excitation = Excitation::<B>::from_profiles(excitations, &self.device)?;
        let rollout = Rollout::new(&self.solver, &self.bundle.network, self.bundle.stats());
        let states = rollout.run(&initial, &excitation, steps)?;

        let mut per_condition: Vec<Vec<FieldFrame>> = vec![Vec::with_capacity(steps); initials.len()];
        for state in &states {
            for (series, frame) in per_condition.iter_mut().zip(state.to_frames()?) {
                series.push(frame);
            }
        }
        per_condition.iter().map(|frames| FieldSeries::from_frames(frames)).collect()
    }

    /// 時系列集合の各条件について、最初のフレームから予測します。
    pub fn predict_set(&self, set: &TrajectorySet, steps: usize) -> HybridResult<Vec<FieldSeries>> {
        let mut initials = Vec::with_capacity(set.len());
        for trajectory in set.iter() {
            initials.push(
                trajectory
                    .frames
                    .first()
                    .ok_or(HybridError::IndexOutOfBounds { index: 0, len: 0 })?,
            );
        }
        let excitations: Vec<&Array1<f32>> = set.iter().map(|t| &t.excitation).collect();
        self.predict(&initials, &excitations, steps)
    }
}

impl<B: Backend> InferenceRunner<B, NonReactiveSolver<B>> {
    /// バンドルを読み込み、学習時と同じ構成の粗いソルバーを作ります。
    pub fn open(dir: &Path, device: B::Device) -> HybridResult<Self> {
        let bundle = load_bundle::<B>(dir, &device)?;
        let solver = NonReactiveSolver::new(bundle.metadata.solver.clone(), bundle.metadata.grid, &device);
        Ok(Self::new(bundle, solver, device))
    }

    pub fn solver(&self) -> &NonReactiveSolver<B> {
        &self.solver
    }
}

/// `infer` サブコマンドを実行します。
///
/// グリッドとソルバーはバンドルに保存された構成を使います。`--config` を指定した場合、
/// その構成がバンドルと食い違えばエラーです（テスト条件の設定だけを読み取ります）。
pub fn run(args: &InferArgs) -> HybridResult<()> {
    let device = <MyBackend as Backend>::Device::default();
    if args.steps == 0 {
        return Err(ConfigError::invalid_value("steps", "1 以上が必要です").into());
    }

    info!("推論を実行します - バックエンド: NdArray (CPU)");
    let inference_start = Instant::now();

    info!("保存済みバンドルを '{}' からロード中...", args.checkpoint.display());
    let runner = InferenceRunner::<MyBackend, _>::open(&args.checkpoint, device.clone())?;
    let metadata = &runner.bundle().metadata;
    let grid = metadata.grid;

    let dataset = match &args.config {
        Some(path) => {
            let config = TrainingConfig::from_json(path)?;
            check_physics(metadata, &config.grid, &config.solver, &args.checkpoint)?;
            config.dataset
        }
        None => DatasetConfig::default(),
    };

    // 初期状態 + steps フレームの正解
    let dataset = DatasetConfig {
        frames: args.steps + 1,
        ..dataset
    };
    let test = SyntheticBunsen::new(grid, metadata.solver.clone(), dataset).test_set::<MyBackend>(&device)?;
    let predictions = runner.predict_set(&test, args.steps)?;

    for (index, (prediction, trajectory)) in predictions.iter().zip(test.iter()).enumerate() {
        let dir = args.output_dir.join(format!("condition_{index:02}"));
        prediction.write_json(&dir)?;
        let truth = FieldSeries::from_frames(&trajectory.frames[1..])?;
        let error = prediction.rmse(&truth)?;
        info!(
            "[条件 {:02}] RMSE: T {:.3} K, Yf {:.5}, u {:.4} -> '{}'",
            index,
            error.temperature,
            error.mass_fraction,
            error.velocity,
            dir.display()
        );
    }

    info!(
        "推論が完了しました。条件数: {}, ステップ数: {}, グリッド: {}x{}",
        predictions.len(),
        args.steps,
        grid.height,
        grid.width
    );
    info!("=> 推論時間: {:.2?}", inference_start.elapsed());
    Ok(())
}
