//! CIFAR の凍結グラフで学習し、その場で1枚を分類する

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use image_classification_lib::backend::{device_for, TrainingBackend};
use image_classification_lib::dataset::ImageNetData;
use image_classification_lib::logging::init_logging;
use image_classification_lib::ml::{get_label, ImageNetDataProbability};
use image_classification_lib::model::AppConfig;
use image_classification_lib::paths::{resolve_assets_path, ScoringPaths};
use image_classification_lib::pipeline::LearningPipeline;
use image_classification_lib::report::console_write_header;

#[derive(Parser, Debug)]
#[command(name = "cifar_scoring", about = "Train on CIFAR model features and score one image")]
struct Args {
    /// アセットディレクトリ（省略時は実行ファイルの隣の assets）
    assets_path: Option<PathBuf>,

    /// 分類する画像（images フォルダ基準、省略時はサンプル画像）
    #[arg(long)]
    image: Option<PathBuf>,

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
    if let Err(e) = run(&assets_path, args.image) {
        println!("Exception: {:#}", e);
    }
}

fn run(assets_path: &Path, image: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load_or_default(assets_path);
    let paths = ScoringPaths::cifar(assets_path);
    let device = device_for(&config.device_type);

    console_write_header(&["Training classification model"]);
    println!("Model location: {}", paths.model_pb.display());
    println!("Training file: {}", paths.tags_tsv.display());

    let pipeline = LearningPipeline::cifar(&paths.tags_tsv, &paths.images_folder, &paths.model_pb)
        .with_trainer_settings(config.training.clone());
    let model = pipeline
        .train::<TrainingBackend>(&device)
        .context("Training failed")?;
    let labels = model.try_get_score_label_names().unwrap_or(&[]).to_vec();

    console_write_header(&["Test scoring"]);
    let image = image.unwrap_or(paths.probe_image);
    let prediction = model
        .predict(&ImageNetData::new(&image, None))
        .with_context(|| format!("Scoring {} failed", image.display()))?;
    let (label, probability) = get_label(&labels, &prediction.scores);
    ImageNetDataProbability {
        image_path: paths.images_folder.join(&image),
        label,
        probability,
    }
    .console_write_line();

    println!("End of process");
    Ok(())
}
