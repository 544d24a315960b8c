//! # Bunsen 火炎のハイブリッド（ソルバー・イン・ザ・ループ）学習ライブラリ
//!
//! 粗い非反応ソルバー [`physics::NonReactiveSolver`] の 1 ステップごとに
//! U-Net [`model::CorrectionNetwork`] の補正を足し込み、その合成を `m` ステップ
//! 展開した窓全体の損失を、すべてのステップを通して逆伝播して学習します。
//!
//! * [`rollout`]: 物理ステップと補正の合成の展開
//! * [`loss`]: 窓全体の正規化二乗誤差
//! * [`training`]: 学習の状態機械とカリキュラム
//! * [`checkpoint`]: 重みと正規化統計量のバンドル、ウォームスタート
//! * [`inference`]: 学習済みバンドルによる長時間ロールアウト

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod field;
pub mod inference;
pub mod loss;
pub mod model;
pub mod normalization;
pub mod physics;
pub mod rollout;
pub mod training;
