//! エラー型の定義

use std::path::PathBuf;
use thiserror::Error;

/// ライブラリ全体で使用するエラー型
#[derive(Error, Debug)]
pub enum Error {
    /// 必須のモデル／ラベルファイルが存在しない
    #[error("File not exists: {}", path.display())]
    MissingFile { path: PathBuf },

    /// 対応していない画像形式
    #[error("UnsupportedMediaType")]
    UnsupportedMediaType,

    /// パイプライン構成エラー
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// データセットエラー
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// モデルエラー
    #[error("Model error: {0}")]
    Model(String),

    /// 設定エラー
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// 凍結グラフの読み込み・実行エラー
    #[error("TensorFlow graph error: {0}")]
    Tract(#[from] tract_tensorflow::prelude::TractError),

    #[error("Download error: {0}")]
    Download(#[from] reqwest::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

pub type Result<T> = std::result::Result<T, Error>;
