//! 保存済みの分類器でTSVの画像を分類し、対数損失を表示する

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use image_classification_lib::backend::{device_for, InferenceBackend};
use image_classification_lib::logging::init_logging;
use image_classification_lib::ml::ModelEvaluator;
use image_classification_lib::model::{load_metadata, AppConfig};
use image_classification_lib::paths::{resolve_assets_path, AssetPaths};
use image_classification_lib::report::print_metadata_info;

#[derive(Parser, Debug)]
#[command(name = "predict", about = "Classify images with a trained classifier and report metrics")]
struct Args {
    /// アセットディレクトリ（省略時は実行ファイルの隣の assets）
    assets_path: Option<PathBuf>,

    /// デバッグログを出力する
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    if let Err(e) = init_logging(args.verbose) {
        eprintln!("{}", e);
    }

    let assets_path = resolve_assets_path(args.assets_path);
    if let Err(e) = run(&assets_path) {
        println!("Exception: {:#}", e);
    }
}

fn run(assets_path: &Path) -> Result<()> {
    let config = AppConfig::load_or_default(assets_path);
    let paths = AssetPaths::new(assets_path);
    let device = device_for(&config.device_type);

    match load_metadata(&paths.classifier_archive) {
        Ok(metadata) => print_metadata_info(&metadata),
        Err(e) => tracing::debug!("metadata unavailable: {}", e),
    }

    let evaluator = ModelEvaluator::new(&paths.tags_tsv, &paths.images_folder, &paths.classifier_archive);
    evaluator
        .evaluate::<InferenceBackend>(&device)
        .context("Evaluation failed")?;

    Ok(())
}
