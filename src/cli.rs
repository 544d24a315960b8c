use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// clapでコマンドラインの構造を定義します。
#[derive(Parser, Debug)]
#[command(author, version, about = "Hybrid solver-in-the-loop training for Bunsen flames with Burn", long_about = None)]
pub struct Cli {
    /// ログの詳細度（error, warn, info, debug, trace）
    #[arg(long, global = true, default_value = "info")]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Commands,
}

/// 実行するサブコマンドを定義します（train または infer）。
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 補正ネットワークをロールアウト学習し、チェックポイントを保存します
    Train(TrainArgs),
    /// 保存されたバンドルでテスト条件の長時間ロールアウトを実行します
    Infer(InferArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct TrainArgs {
    /// 学習設定の JSON ファイル
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// ロールアウト窓の長さ m
    #[arg(long)]
    pub rollout_steps: Option<usize>,

    /// 窓長を段階的に伸ばすカリキュラム（例: `2,32`）。指定時は --rollout-steps より優先
    #[arg(long, value_delimiter = ',')]
    pub curriculum: Vec<usize>,

    #[arg(long)]
    pub epochs: Option<usize>,

    /// ウォームスタートに使うバンドルのディレクトリ
    #[arg(long)]
    pub warm_start: Option<PathBuf>,

    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct InferArgs {
    /// 読み込むバンドルのディレクトリ
    #[arg(long)]
    pub checkpoint: PathBuf,

    /// 予測するステップ数
    #[arg(long, default_value_t = 300)]
    pub steps: usize,

    /// 予測結果の出力先
    #[arg(long, default_value = "predictions")]
    pub output_dir: PathBuf,

    /// ソルバーとテスト条件の設定に使う JSON ファイル
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_train_with_curriculum() {
        let cli = Cli::parse_from(["bunsen-hybrid", "--log-level", "debug", "train", "--curriculum", "2,32", "--epochs", "5"]);
        assert_eq!(cli.log_level, tracing::Level::DEBUG);
        match cli.command {
            Commands::Train(args) => {
                assert_eq!(args.curriculum, vec![2, 32]);
                assert_eq!(args.epochs, Some(5));
                assert!(args.warm_start.is_none());
            }
            Commands::Infer(_) => panic!("train を期待していました"),
        }
    }

    #[test]
    fn infer_defaults() {
        let cli = Cli::parse_from(["bunsen-hybrid", "infer", "--checkpoint", "checkpoints/m32/final"]);
        assert_eq!(cli.log_level, tracing::Level::INFO);
        match cli.command {
            Commands::Infer(args) => {
                assert_eq!(args.steps, 300);
                assert_eq!(args.output_dir, PathBuf::from("predictions"));
            }
            Commands::Train(_) => panic!("infer を期待していました"),
        }
    }

    #[test]
    fn infer_requires_checkpoint() {
        assert!(Cli::try_parse_from(["bunsen-hybrid", "infer"]).is_err());
    }
}
