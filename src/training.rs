use crate::checkpoint::{BUNDLE_FORMAT_VERSION, BundleMetadata, load_warm_start, save_bundle};
use crate::cli::TrainArgs;
use crate::config::TrainingConfig;
use crate::dataset::{SyntheticBunsen, TrajectorySet};
use crate::error::{ConfigError, HybridError, HybridResult};
use crate::loss::LossAggregator;
use crate::model::CorrectionNetwork;
use crate::normalization::NormStats;
use crate::physics::{NonReactiveSolver, PhysicsStep};
use crate::rollout::Rollout;
use burn::backend::{Autodiff, NdArray};
use burn::module::{Module, ModuleVisitor, ParamId};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::{ElementConversion, Tensor};
use burn::tensor::backend::AutodiffBackend;
use plotters::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

type MyBackend = Autodiff<NdArray<f32>>;

/// 学習ドライバーの状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingPhase {
    /// ネットワークと統計量の準備
    Init,
    /// ミニバッチごとの更新
    EpochLoop,
    /// 重みと統計量の保存
    Checkpoint,
    /// エポック数の上限に到達
    Done,
}

/// 1 エポック分の指標。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub learning_rate: f64,
    pub loss: f64,
    pub temperature: f64,
    pub mass_fraction: f64,
    pub velocity: f64,
}

/// エポックループを通して受け渡す学習状態。
pub struct TrainingState<B: AutodiffBackend, O> {
    pub phase: TrainingPhase,
    pub network: CorrectionNetwork<B>,
    pub optimizer: O,
    /// 初期化時に決めたら以後変更しない
    pub stats: NormStats,
    /// 完了したエポック数
    pub epoch: usize,
    /// 完了したミニバッチ更新の総数
    pub global_step: usize,
    /// 直近のエポックで使った学習率
    pub learning_rate: f64,
    pub history: Vec<EpochRecord>,
}

/// 学習の結果。
pub struct TrainingOutcome<B: AutodiffBackend> {
    pub network: CorrectionNetwork<B>,
    pub stats: NormStats,
    pub history: Vec<EpochRecord>,
    /// 最終バンドルのディレクトリ
    pub final_bundle: PathBuf,
}

/// ロールアウト窓 `m` でハイブリッドモデルを学習するドライバー。
pub struct Trainer<B: AutodiffBackend, P> {
    config: TrainingConfig,
    solver: P,
    loss: LossAggregator,
    device: B::Device,
}

impl<B: AutodiffBackend, P: PhysicsStep<B>> Trainer<B, P> {
    /// 設定を検証してドライバーを作ります。
    pub fn new(config: TrainingConfig, solver: P, device: B::Device) -> HybridResult<Self> {
        config.validate()?;
        let loss = LossAggregator::new(config.loss.clone());
        Ok(Self {
            config,
            solver,
            loss,
            device,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// この窓長のチェックポイントを置くディレクトリ。
    pub fn run_dir(&self) -> PathBuf {
        self.config.checkpoint_dir.join(format!("m{}", self.config.rollout_steps))
    }

    /// Init: ネットワークを初期化（またはウォームスタート）し、統計量を決めます。
    pub fn init(
        &self,
        data: &TrajectorySet,
    ) -> HybridResult<TrainingState<B, impl Optimizer<CorrectionNetwork<B>, B> + use<B, P>>> {
        if data.is_empty() {
            return Err(ConfigError::invalid_value("dataset", "学習データが空です").into());
        }
        let grid = self.config.grid;
        if data.grid() != grid.dims() {
            return Err(HybridError::shape_mismatch(grid.dims(), data.grid()));
        }

        let (network, stats) = match &self.config.warm_start {
            Some(dir) => {
                let bundle =
                    load_warm_start::<B>(dir, &grid, &self.config.solver, &self.config.network, &self.device)?;
                let stats = bundle.metadata.stats;
                (bundle.network, stats)
            }
            None => {
                let stats = NormStats::from_frames(data.frames());
                info!(
                    "正規化統計量: T {:.1}±{:.1}, Yf {:.4}±{:.4}",
                    stats.temperature.mean,
                    stats.temperature.scale(),
                    stats.mass_fraction.mean,
                    stats.mass_fraction.scale()
                );
                (CorrectionNetwork::new(&self.config.network, &grid, &self.device), stats)
            }
        };

        Ok(TrainingState {
            phase: TrainingPhase::Init,
            network,
            optimizer: AdamConfig::new().init(),
            stats,
            epoch: 0,
            global_step: 0,
            learning_rate: self.config.learning_rate_at(1),
            history: Vec::new(),
        })
    }

    /// 状態機械 `Init → EpochLoop ⇄ Checkpoint → Done` を最後まで回します。
    pub fn run(&self, data: &TrajectorySet) -> HybridResult<TrainingOutcome<B>> {
        let mut state = self.init(data)?;
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let training_start = Instant::now();

        info!(
            "学習を開始します (m={}, {} エポック, パラメータ数 {})",
            self.config.rollout_steps,
            self.config.num_epochs,
            state.network.num_params(),
        );

        loop {
            let next = match state.phase {
                TrainingPhase::Init => TrainingPhase::EpochLoop,
                TrainingPhase::EpochLoop => {
                    state = self.train_epoch(state, data, &mut rng)?;
                    if state.epoch % self.config.checkpoint_every == 0 || state.epoch >= self.config.num_epochs {
                        TrainingPhase::Checkpoint
                    } else {
                        TrainingPhase::EpochLoop
                    }
                }
                TrainingPhase::Checkpoint => {
                    self.save_checkpoint(&state, &format!("epoch_{:04}", state.epoch))?;
                    if state.epoch >= self.config.num_epochs {
                        TrainingPhase::Done
                    } else {
                        TrainingPhase::EpochLoop
                    }
                }
                TrainingPhase::Done => break,
            };
            state.phase = next;
        }

        info!("学習が完了しました。");
        info!("=> 学習時間: {:.2?}", training_start.elapsed());

        let final_bundle = self.save_checkpoint(&state, "final")?;
        let run_dir = self.run_dir();
        std::fs::write(run_dir.join("history.json"), serde_json::to_string_pretty(&state.history)?)?;
        let graph = run_dir.join("loss_graph.png");
        // 描画の失敗（フォントがない環境など）で学習結果は捨てない
        match plot_loss_history(&state.history, &graph) {
            Ok(()) => info!("=> 損失グラフを '{}' に保存しました。", graph.display()),
            Err(e) => warn!("損失グラフを描画できませんでした: {e}"),
        }

        Ok(TrainingOutcome {
            network: state.network,
            stats: state.stats,
            history: state.history,
            final_bundle,
        })
    }

    /// EpochLoop: `batches_per_epoch` 回、ロールアウト→損失→逆伝播→更新を行います。
    fn train_epoch<O: Optimizer<CorrectionNetwork<B>, B>>(
        &self,
        mut state: TrainingState<B, O>,
        data: &TrajectorySet,
        rng: &mut StdRng,
    ) -> HybridResult<TrainingState<B, O>> {
        let epoch = state.epoch + 1;
        let m = self.config.rollout_steps;
        let lr = self.config.learning_rate_at(epoch);
        let n = self.config.batches_per_epoch as f64;
        let mut sums = [0.0f64; 4];

        for batch_index in 0..self.config.batches_per_epoch {
            let batch = data.sample_batch::<B, _>(rng, self.config.batch_size, m, &self.device)?;

            let loss = {
                let rollout = Rollout::new(&self.solver, &state.network, &state.stats);
                let predicted = rollout.run(&batch.initial, &batch.excitation, m)?;
                self.loss.forward(&predicted, &batch.targets, &state.stats)?
            };

            let value: f64 = loss.total.clone().into_scalar().elem();
            if !value.is_finite() {
                return Err(HybridError::Divergence {
                    epoch,
                    batch: batch_index,
                    loss: value,
                    non_finite_gradients: 0,
                });
            }
            let parts: [f64; 3] = [
                loss.temperature.clone().into_scalar().elem(),
                loss.mass_fraction.clone().into_scalar().elem(),
                loss.velocity.clone().into_scalar().elem(),
            ];

            // 順伝播・逆伝播がすべて終わってから 1 回だけパラメータを更新する
            let grads = loss.total.backward();
            let grads = GradientsParams::from_grads(grads, &state.network);
            let non_finite_gradients = count_non_finite_gradients(&state.network, &grads);
            if non_finite_gradients > 0 {
                return Err(HybridError::Divergence {
                    epoch,
                    batch: batch_index,
                    loss: value,
                    non_finite_gradients,
                });
            }
            state.network = state.optimizer.step(lr, state.network, grads);
            state.global_step += 1;

            debug!("[Epoch {} / Batch {}] Loss: {:.6}", epoch, batch_index, value);
            sums[0] += value;
            for (sum, part) in sums[1..].iter_mut().zip(parts) {
                *sum += part;
            }
        }

        let record = EpochRecord {
            epoch,
            learning_rate: lr,
            loss: sums[0] / n,
            temperature: sums[1] / n,
            mass_fraction: sums[2] / n,
            velocity: sums[3] / n,
        };
        info!(
            "[Epoch {}] Loss: {:.6} (T {:.6}, Yf {:.6}, u {:.6}), lr {:.2e}",
            record.epoch, record.loss, record.temperature, record.mass_fraction, record.velocity, record.learning_rate
        );
        state.history.push(record);
        state.epoch = epoch;
        state.learning_rate = lr;
        Ok(state)
    }

    /// Checkpoint: 重みと統計量を対で `run_dir()/label` に保存します。
    fn save_checkpoint<O>(&self, state: &TrainingState<B, O>, label: &str) -> HybridResult<PathBuf> {
        let dir = self.run_dir().join(label);
        let metadata = BundleMetadata {
            format_version: BUNDLE_FORMAT_VERSION,
            grid: self.config.grid,
            solver: self.config.solver.clone(),
            network: self.config.network,
            stats: state.stats,
            rollout_steps: self.config.rollout_steps,
            epoch: state.epoch,
        };
        save_bundle(&dir, &state.network, &metadata)?;
        Ok(dir)
    }
}

/// パラメータごとに勾配を取り出し、NaN / ±inf の要素を数えるビジター。
struct NonFiniteGradients<'a, B: AutodiffBackend> {
    grads: &'a GradientsParams,
    count: usize,
    backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for NonFiniteGradients<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            self.count += grad.into_data().iter::<f64>().filter(|g| !g.is_finite()).count();
        }
    }
}

fn count_non_finite_gradients<B: AutodiffBackend>(network: &CorrectionNetwork<B>, grads: &GradientsParams) -> usize {
    let mut visitor = NonFiniteGradients {
        grads,
        count: 0,
        backend: PhantomData,
    };
    network.visit(&mut visitor);
    visitor.count
}

/// 窓長を段階的に伸ばすカリキュラム学習。
///
/// 最初の段は `config.warm_start` に従い、以降の段は直前の段の最終バンドルから
/// ウォームスタートします（例: `[2, 32]`）。最後の段の結果を返します。
pub fn run_curriculum<B: AutodiffBackend, P: PhysicsStep<B> + Clone>(
    config: &TrainingConfig,
    stages: &[usize],
    solver: P,
    data: &TrajectorySet,
    device: B::Device,
) -> HybridResult<TrainingOutcome<B>> {
    let (&first, rest) = stages
        .split_first()
        .ok_or_else(|| ConfigError::invalid_value("curriculum", "少なくとも 1 段が必要です"))?;

    let mut stage_config = TrainingConfig {
        rollout_steps: first,
        ..config.clone()
    };
    let mut outcome = Trainer::new(stage_config.clone(), solver.clone(), device.clone())?.run(data)?;
    for &m in rest {
        info!("カリキュラム: m={} から m={} へ進みます。", stage_config.rollout_steps, m);
        stage_config = TrainingConfig {
            rollout_steps: m,
            warm_start: Some(outcome.final_bundle.clone()),
            ..stage_config
        };
        outcome = Trainer::new(stage_config.clone(), solver.clone(), device.clone())?.run(data)?;
    }
    Ok(outcome)
}

/// `train` サブコマンドを実行します。
pub fn run(args: &TrainArgs) -> HybridResult<()> {
    let device = Default::default();

    let mut config = match &args.config {
        Some(path) => {
            info!("設定を '{}' から読み込みます。", path.display());
            TrainingConfig::from_json(path)?
        }
        None => TrainingConfig::default(),
    };
    if let Some(m) = args.rollout_steps {
        config.rollout_steps = m;
    }
    if let Some(epochs) = args.epochs {
        config.num_epochs = epochs;
    }
    if let Some(dir) = &args.warm_start {
        config.warm_start = Some(dir.clone());
    }
    if let Some(dir) = &args.checkpoint_dir {
        config.checkpoint_dir = dir.clone();
    }
    config.validate()?;

    // --- データセットの準備 ---
    let generator = SyntheticBunsen::new(config.grid, config.solver.clone(), config.dataset.clone());
    let data = generator.train_set::<NdArray<f32>>(&device)?;
    info!(
        "学習データ: {} 条件 × {} フレーム ({}x{})",
        data.len(),
        config.dataset.frames,
        config.grid.height,
        config.grid.width
    );

    let solver = NonReactiveSolver::<MyBackend>::new(config.solver.clone(), config.grid, &device);
    let outcome = if args.curriculum.is_empty() {
        Trainer::<MyBackend, _>::new(config, solver, device)?.run(&data)?
    } else {
        run_curriculum::<MyBackend, _>(&config, &args.curriculum, solver, &data, device)?
    };
    info!("=> 最終モデルを '{}' に保存しました。", outcome.final_bundle.display());
    Ok(())
}

/// 学習過程の損失をグラフとして PNG ファイルに出力します。
fn plot_loss_history(history: &[EpochRecord], path: &Path) -> HybridResult<()> {
    draw_loss_history(history, path).map_err(|e| HybridError::Plot(e.to_string()))
}

fn draw_loss_history(history: &[EpochRecord], path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let log = |v: f64| v.max(1e-12).log10();
    let series: [(&str, RGBColor, Vec<f64>); 4] = [
        ("Total Loss", RED, history.iter().map(|r| log(r.loss)).collect()),
        ("Temperature", BLUE, history.iter().map(|r| log(r.temperature)).collect()),
        ("Mass Fraction", GREEN, history.iter().map(|r| log(r.mass_fraction)).collect()),
        ("Velocity", MAGENTA, history.iter().map(|r| log(r.velocity)).collect()),
    ];
    let values = series.iter().flat_map(|(_, _, v)| v.iter().copied());
    let max_log_loss = values.clone().fold(f64::MIN, f64::max).max(-11.5) + 0.5;
    let min_log_loss = values.fold(f64::MAX, f64::min).min(max_log_loss - 1.0) - 0.5;

    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Loss History", ("sans-serif", 40).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(1..history.len().max(2), min_log_loss..max_log_loss)?;
    chart
        .configure_mesh()
        .y_desc("Loss (log10 scale)")
        .x_desc("Epochs")
        .draw()?;
    for (label, color, values) in series {
        chart
            .draw_series(LineSeries::new(
                history.iter().map(|r| r.epoch).zip(values),
                &color,
            ))?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &color));
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::read_metadata;
    use crate::config::{DatasetConfig, GridConfig, NetworkConfig};
    use crate::field::{Excitation, FieldState};
    use burn::prelude::Backend;

    /// 値は変えずに、温度について傾きが無限大になる項を足してから `inner` を進めるソルバー。
    #[derive(Clone)]
    struct InfiniteSlope<P> {
        inner: P,
    }

    impl<B: Backend, P: PhysicsStep<B>> PhysicsStep<B> for InfiniteSlope<P> {
        fn step(&self, state: &FieldState<B>, excitation: &Excitation<B>) -> FieldState<B> {
            let t = state.temperature.clone();
            let kink = (t.clone() - t.clone().detach()).sqrt();
            let kinked = FieldState {
                temperature: t + kink,
                ..state.clone()
            };
            self.inner.step(&kinked, excitation)
        }
    }

    type TestBackend = Autodiff<NdArray<f32>>;

    fn small_config(dir: &Path) -> TrainingConfig {
        TrainingConfig {
            grid: GridConfig { height: 8, width: 8 },
            network: NetworkConfig {
                base_channels: 4,
                depth: 1,
                zero_init_head: true,
            },
            dataset: DatasetConfig {
                train_conditions: 2,
                test_conditions: 1,
                frames: 6,
                warmup_steps: 2,
                seed: 3,
            },
            rollout_steps: 2,
            num_epochs: 3,
            batches_per_epoch: 2,
            batch_size: 2,
            learning_rate: 1e-3,
            lr_milestones: vec![2],
            checkpoint_every: 2,
            checkpoint_dir: dir.to_path_buf(),
            ..TrainingConfig::default()
        }
    }

    fn train_data(config: &TrainingConfig) -> TrajectorySet {
        SyntheticBunsen::new(config.grid, config.solver.clone(), config.dataset.clone())
            .train_set::<NdArray<f32>>(&Default::default())
            .unwrap()
    }

    #[test]
    fn run_walks_all_phases_and_writes_bundles() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        let data = train_data(&config);
        let solver = NonReactiveSolver::<TestBackend>::new(config.solver.clone(), config.grid, &Default::default());
        let trainer = Trainer::<TestBackend, _>::new(config, solver, Default::default()).unwrap();
        let outcome = trainer.run(&data).unwrap();

        assert_eq!(outcome.history.len(), 3);
        assert!(outcome.history.iter().all(|r| r.loss.is_finite() && r.loss > 0.0));
        assert_eq!(outcome.history[0].learning_rate, 1e-3);
        assert!((outcome.history[2].learning_rate - 1e-4).abs() < 1e-12);

        let run_dir = dir.path().join("m2");
        assert!(run_dir.join("epoch_0002/network.mpk").exists());
        assert!(run_dir.join("epoch_0003/bundle.json").exists());
        assert!(run_dir.join("final/network.mpk").exists());
        assert!(run_dir.join("history.json").exists());
        assert_eq!(outcome.final_bundle, run_dir.join("final"));
        assert_eq!(outcome.stats, NormStats::from_frames(data.frames()));
    }

    #[test]
    fn training_updates_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        let data = train_data(&config);
        let solver = NonReactiveSolver::<TestBackend>::new(config.solver.clone(), config.grid, &Default::default());
        let trainer = Trainer::<TestBackend, _>::new(config, solver, Default::default()).unwrap();

        let initial = trainer.init(&data).unwrap();
        let before = crate::field::tensor_to_vec(&initial.network.head.weight.val()).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let state = trainer.train_epoch(initial, &data, &mut rng).unwrap();
        let after = crate::field::tensor_to_vec(&state.network.head.weight.val()).unwrap();

        assert_eq!(state.epoch, 1);
        assert_eq!(state.global_step, 2);
        assert_eq!(state.learning_rate, 1e-3);
        assert_ne!(before, after);
    }

    #[test]
    fn divergence_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        let data = train_data(&config);
        // 設定の検証を通った後で、ソルバーにだけ壊れた流入温度を渡す
        let mut broken = config.solver.clone();
        broken.inlet_temperature = f64::NAN;
        let solver = NonReactiveSolver::<TestBackend>::new(broken, config.grid, &Default::default());
        let trainer = Trainer::<TestBackend, _>::new(config, solver, Default::default()).unwrap();
        let err = trainer.run(&data).err().expect("発散は致命的であるべき");
        assert!(matches!(err, HybridError::Divergence { epoch: 1, batch: 0, .. }));
    }

    #[test]
    fn non_finite_gradient_on_last_batch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainingConfig {
            num_epochs: 1,
            batches_per_epoch: 1,
            checkpoint_every: 1,
            ..small_config(dir.path())
        };
        let data = train_data(&config);
        let solver = InfiniteSlope {
            inner: NonReactiveSolver::<TestBackend>::new(config.solver.clone(), config.grid, &Default::default()),
        };
        let trainer = Trainer::<TestBackend, _>::new(config, solver, Default::default()).unwrap();
        let err = trainer.run(&data).err().expect("無限大の勾配は致命的であるべき");
        match err {
            HybridError::Divergence {
                epoch,
                batch,
                loss,
                non_finite_gradients,
            } => {
                assert_eq!((epoch, batch), (1, 0));
                assert!(loss.is_finite());
                assert!(non_finite_gradients > 0);
            }
            other => panic!("Divergence を期待していました: {other:?}"),
        }
        // 壊れた重みは保存されない
        assert!(!dir.path().join("m2/epoch_0001").exists());
        assert!(!dir.path().join("m2/final").exists());
    }

    #[test]
    fn warm_start_reuses_stats_and_weights() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        let data = train_data(&config);
        let solver = NonReactiveSolver::<TestBackend>::new(config.solver.clone(), config.grid, &Default::default());
        let first = Trainer::<TestBackend, _>::new(config.clone(), solver.clone(), Default::default())
            .unwrap()
            .run(&data)
            .unwrap();

        // 統計量を変えるはずの別データでも、ウォームスタートでは保存値を使う
        let mut other_config = config.clone();
        other_config.dataset.seed = 99;
        let other = train_data(&other_config);

        let second_config = TrainingConfig {
            rollout_steps: 4,
            warm_start: Some(first.final_bundle.clone()),
            ..config
        };
        let trainer = Trainer::<TestBackend, _>::new(second_config, solver, Default::default()).unwrap();
        let state = trainer.init(&other).unwrap();
        assert_eq!(
            read_metadata(&first.final_bundle).unwrap().solver,
            trainer.config().solver
        );
        assert_eq!(state.stats, first.stats);
        assert_eq!(
            crate::field::tensor_to_vec(&state.network.head.weight.val()).unwrap(),
            crate::field::tensor_to_vec(&first.network.head.weight.val()).unwrap()
        );
    }

    #[test]
    fn warm_start_with_other_architecture_fails_before_training() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        let data = train_data(&config);
        let solver = NonReactiveSolver::<TestBackend>::new(config.solver.clone(), config.grid, &Default::default());
        let first = Trainer::<TestBackend, _>::new(config.clone(), solver.clone(), Default::default())
            .unwrap()
            .run(&data)
            .unwrap();

        let mut second = config;
        second.warm_start = Some(first.final_bundle);
        second.network.base_channels = 8;
        let trainer = Trainer::<TestBackend, _>::new(second, solver, Default::default()).unwrap();
        assert!(matches!(trainer.init(&data).err(), Some(HybridError::Checkpoint { .. })));
    }

    #[test]
    fn wrong_dataset_grid_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        let mut other = config.clone();
        other.grid = GridConfig { height: 16, width: 16 };
        let data = train_data(&other);
        let solver = NonReactiveSolver::<TestBackend>::new(config.solver.clone(), config.grid, &Default::default());
        let trainer = Trainer::<TestBackend, _>::new(config, solver, Default::default()).unwrap();
        assert!(matches!(trainer.init(&data).err(), Some(HybridError::ShapeMismatch { .. })));
    }
}
