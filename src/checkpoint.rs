//! 重みと正規化統計量を対にしたチェックポイントバンドルと、ウォームスタート。
//!
//! バンドルはディレクトリで、次の 2 ファイルからなります。
//!
//! * `network.mpk`: `NamedMpkFileRecorder`（フル精度）で保存した重み
//! * `bundle.json`: 書式バージョン・グリッド・ソルバーとネットワークの構成・統計量などのメタデータ
//!
//! 読み込み側では必ず両方を一緒に読み、統計量は再計算しません。補正は学習時の
//! ソルバーに合わせて学習されているので、推論でも保存されたソルバー構成を使います。

use crate::config::{GridConfig, NetworkConfig, SolverConfig};
use crate::error::{HybridError, HybridResult};
use crate::model::CorrectionNetwork;
use crate::normalization::NormStats;
use burn::module::Module;
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// 現在のバンドル書式。
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// 重みファイルの名前（拡張子 `.mpk` はレコーダーが付けます）。
const WEIGHTS_STEM: &str = "network";
const METADATA_FILE: &str = "bundle.json";

/// `bundle.json` の内容。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub format_version: u32,
    pub grid: GridConfig,
    /// 学習ループ内のソルバーの構成
    pub solver: SolverConfig,
    pub network: NetworkConfig,
    pub stats: NormStats,
    /// このバンドルを作った学習のロールアウト窓 m
    pub rollout_steps: usize,
    /// 保存時点のエポック
    pub epoch: usize,
}

/// 読み込んだバンドル。
#[derive(Debug, Clone)]
pub struct Bundle<B: Backend> {
    pub network: CorrectionNetwork<B>,
    pub metadata: BundleMetadata,
}

impl<B: Backend> Bundle<B> {
    pub fn stats(&self) -> &NormStats {
        &self.metadata.stats
    }
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

fn weights_file(dir: &Path) -> PathBuf {
    dir.join(format!("{WEIGHTS_STEM}.mpk"))
}

/// 重みとメタデータを `dir` に保存します。ディレクトリがなければ作ります。
pub fn save_bundle<B: Backend>(
    dir: &Path,
    network: &CorrectionNetwork<B>,
    metadata: &BundleMetadata,
) -> HybridResult<()> {
    std::fs::create_dir_all(dir)?;
    network.clone().save_file(dir.join(WEIGHTS_STEM), &recorder())?;
    std::fs::write(dir.join(METADATA_FILE), serde_json::to_string_pretty(metadata)?)?;
    info!("チェックポイントを '{}' に保存しました。", dir.display());
    Ok(())
}

/// `bundle.json` だけを読みます。
pub fn read_metadata(dir: &Path) -> HybridResult<BundleMetadata> {
    let path = dir.join(METADATA_FILE);
    if !path.exists() {
        return Err(HybridError::checkpoint("メタデータが見つかりません", path));
    }
    let metadata: BundleMetadata = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    if metadata.format_version != BUNDLE_FORMAT_VERSION {
        return Err(HybridError::checkpoint(
            format!(
                "未対応の書式バージョン {} (対応: {})",
                metadata.format_version, BUNDLE_FORMAT_VERSION
            ),
            path,
        ));
    }
    Ok(metadata)
}

/// バンドルのグリッドとソルバー構成が `grid` / `solver` と一致することを確認します。
pub fn check_physics(
    metadata: &BundleMetadata,
    grid: &GridConfig,
    solver: &SolverConfig,
    dir: &Path,
) -> HybridResult<()> {
    if metadata.grid != *grid {
        return Err(HybridError::checkpoint(
            format!(
                "グリッドが一致しません: 保存 {:?}, 現在 {:?}",
                metadata.grid.dims(),
                grid.dims()
            ),
            dir,
        ));
    }
    if metadata.solver != *solver {
        return Err(HybridError::checkpoint(
            format!("ソルバー構成が一致しません: 保存 {:?}, 現在 {:?}", metadata.solver, solver),
            dir,
        ));
    }
    Ok(())
}

/// バンドルを読み込み、保存時の構成で作ったネットワークに重みを載せます。
///
/// 推論のように期待する構成が決まっていない場合に使います。
pub fn load_bundle<B: Backend>(dir: &Path, device: &B::Device) -> HybridResult<Bundle<B>> {
    let metadata = read_metadata(dir)?;
    let weights = weights_file(dir);
    if !weights.exists() {
        return Err(HybridError::checkpoint("重みファイルが見つかりません", weights));
    }
    let network = CorrectionNetwork::<B>::new(&metadata.network, &metadata.grid, device).load_file(
        dir.join(WEIGHTS_STEM),
        &recorder(),
        device,
    )?;
    Ok(Bundle { network, metadata })
}

/// ウォームスタート: 短い窓で学習したバンドルを、これから学習する構成に合わせて読み込みます。
///
/// グリッド・ソルバー構成・ネットワーク構造（チャネル数・段数）のいずれかが一致しなければ、
/// 学習を始める前に失敗します。統計量は保存されたものをそのまま返します。
pub fn load_warm_start<B: Backend>(
    dir: &Path,
    grid: &GridConfig,
    solver: &SolverConfig,
    network: &NetworkConfig,
    device: &B::Device,
) -> HybridResult<Bundle<B>> {
    let metadata = read_metadata(dir)?;
    check_physics(&metadata, grid, solver, dir)?;
    if metadata.network.base_channels != network.base_channels || metadata.network.depth != network.depth {
        return Err(HybridError::checkpoint(
            format!(
                "ネットワーク構造が一致しません: 保存 (channels {}, depth {}), 現在 (channels {}, depth {})",
                metadata.network.base_channels, metadata.network.depth, network.base_channels, network.depth
            ),
            dir,
        ));
    }
    let bundle = load_bundle(dir, device)?;
    info!(
        "ウォームスタート: m={} / epoch {} のバンドル '{}' を読み込みました。",
        bundle.metadata.rollout_steps,
        bundle.metadata.epoch,
        dir.display()
    );
    Ok(bundle)
}
