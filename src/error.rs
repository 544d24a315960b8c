//! ハイブリッドソルバー全体で使うエラー型。
//!
//! 形状の不一致・数値発散・チェックポイントの欠落はすべて致命的で、
//! リトライせずに呼び出し元へ返します。

use std::path::PathBuf;
use thiserror::Error;

/// ライブラリ関数が返す `Result` の別名。
pub type HybridResult<T> = Result<T, HybridError>;

/// トップレベルのエラー型。
#[derive(Debug, Error)]
pub enum HybridError {
    /// 設定値の検証または読み込みに失敗した。
    #[error("設定エラー: {0}")]
    Config(#[from] ConfigError),

    /// テンソルの形状（グリッド・チャネル数・バッチ数）が一致しない。
    #[error("形状の不一致: 期待値 {expected:?}, 実際 {actual:?}")]
    ShapeMismatch {
        /// 期待した形状
        expected: Vec<usize>,
        /// 実際の形状
        actual: Vec<usize>,
    },

    /// 学習中に損失または勾配が有限値でなくなった。
    #[error("数値発散: epoch {epoch}, batch {batch} (損失 {loss}, 有限でない勾配要素 {non_finite_gradients})")]
    Divergence {
        /// 発散したエポック
        epoch: usize,
        /// エポック内のミニバッチ番号
        batch: usize,
        /// 観測された損失値
        loss: f64,
        /// NaN / ±inf だった勾配の要素数（損失が有限でない場合は 0）
        non_finite_gradients: usize,
    },

    /// チェックポイントが存在しない、または構成と一致しない。
    #[error("チェックポイントエラー: {message} (path: {path:?})")]
    Checkpoint {
        /// 内容
        message: String,
        /// 対象のパス
        path: PathBuf,
    },

    /// データセットの範囲外アクセス。
    #[error("インデックス {index} は長さ {len} の範囲外です")]
    IndexOutOfBounds {
        /// 要求されたインデックス
        index: usize,
        /// 有効な長さ
        len: usize,
    },

    /// burn のレコーダー（重みの保存・読み込み）のエラー。
    #[error("レコーダーエラー: {0}")]
    Recorder(#[from] burn::record::RecorderError),

    /// ファイル入出力エラー。
    #[error("I/O エラー: {0}")]
    Io(#[from] std::io::Error),

    /// JSON のシリアライズ／デシリアライズエラー。
    #[error("JSON エラー: {0}")]
    Json(#[from] serde_json::Error),

    /// テンソルデータをホスト側の配列へ変換できなかった。
    #[error("テンソルデータの変換に失敗しました: {0}")]
    Data(String),

    /// 損失グラフの描画に失敗した。
    #[error("グラフの描画に失敗しました: {0}")]
    Plot(String),
}

impl HybridError {
    /// [`HybridError::ShapeMismatch`] を作ります。
    pub fn shape_mismatch(expected: impl Into<Vec<usize>>, actual: impl Into<Vec<usize>>) -> Self {
        HybridError::ShapeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// [`HybridError::Checkpoint`] を作ります。
    pub fn checkpoint(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        HybridError::Checkpoint {
            message: message.into(),
            path: path.into(),
        }
    }
}

/// 設定値の検証エラー。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 値が許容範囲外。
    #[error("`{field}` の値が不正です: {reason}")]
    InvalidValue {
        /// フィールド名
        field: &'static str,
        /// 理由
        reason: String,
    },

    /// 設定ファイルを読めなかった。
    #[error("設定ファイル {path:?} を読み込めません: {source}")]
    FileRead {
        /// ファイルのパス
        path: PathBuf,
        /// 元の I/O エラー
        #[source]
        source: std::io::Error,
    },

    /// 設定ファイルの書式が不正。
    #[error("設定ファイル {path:?} の解析に失敗しました: {source}")]
    Parse {
        /// ファイルのパス
        path: PathBuf,
        /// 元の JSON エラー
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// [`ConfigError::InvalidValue`] を作ります。
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}
