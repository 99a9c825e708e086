//! Inception v3 の凍結グラフを特徴抽出器とした転移学習と推論
//!
//! - `pipeline`: 変換ステップの組み立て
//! - `ml`: 特徴抽出、線形分類器の学習・推論・評価
//! - `tensorflow`: 学習なしの直接推論
//! - `image_format`: 先頭バイトによる画像形式の判定

pub mod error;
pub mod logging;
pub mod backend;
pub mod paths;
pub mod image_format;
pub mod dataset;
pub mod pipeline;
pub mod model;
pub mod ml;
pub mod tensorflow;
pub mod report;

pub use error::{Error, Result};
