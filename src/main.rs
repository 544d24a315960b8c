//! # Bunsen 火炎のハイブリッド学習プログラム
//!
//! 非反応ソルバーと U-Net 補正ネットワークを交互に適用するロールアウトを
//! `burn` の自動微分で学習し、保存したバンドルで長時間の推論を行います。
//!
//! ## 使い方
//!
//! ### 学習（m=2 から m=32 へのカリキュラム）
//! ```bash
//! cargo run --release -- train --curriculum 2,32
//! ```
//!
//! ### 推論
//! ```bash
//! cargo run --release -- infer --checkpoint checkpoints/m32/final
//! ```

use bunsen_hybrid::cli::{Cli, Commands};
use bunsen_hybrid::{inference, training};
use clap::Parser;
use std::process::ExitCode;
use tracing::error;

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .init();

    let result = match &cli.command {
        Commands::Train(args) => training::run(args),
        Commands::Infer(args) => inference::run(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
