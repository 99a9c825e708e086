//! Inception v3 の特徴量で画像分類器を学習し、アーカイブに保存する

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use image_classification_lib::backend::{backend_name, device_for, TrainingBackend};
use image_classification_lib::logging::init_logging;
use image_classification_lib::model::AppConfig;
use image_classification_lib::paths::{resolve_assets_path, AssetPaths};
use image_classification_lib::pipeline::{ImageNetSettings, LearningPipeline};
use image_classification_lib::report::console_write_header;

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train an image classifier on Inception v3 features")]
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

    console_write_header(&["Build model pipeline"]);
    println!("Images folder: {}", paths.images_folder.display());
    println!("Inception model location: {}", paths.inception_pb.display());
    println!("Training file: {}", paths.tags_tsv.display());
    println!(
        "Default parameters: image size=({},{}), image mean: {}, image scale: {}",
        ImageNetSettings::IMAGE_WIDTH,
        ImageNetSettings::IMAGE_HEIGHT,
        ImageNetSettings::MEAN,
        ImageNetSettings::SCALE
    );

    let pipeline = LearningPipeline::inception(&paths.tags_tsv, &paths.images_folder, &paths.inception_pb)
        .with_trainer_settings(config.training.clone());

    console_write_header(&["Training classification model"]);
    println!("Backend: {} ({})", backend_name(), config.device_type);
    let device = device_for(&config.device_type);
    let model = pipeline
        .train::<TrainingBackend>(&device)
        .context("Training failed")?;

    console_write_header(&["Save model to local file"]);
    model
        .write(&paths.classifier_archive)
        .with_context(|| format!("Saving {} failed", paths.classifier_archive.display()))?;
    println!("Model saved: {}", paths.classifier_archive.display());

    Ok(())
}
