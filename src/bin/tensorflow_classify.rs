//! 事前学習済み Inception グラフで画像を直接分類し、タグを表示する

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use image_classification_lib::image_format::{is_valid_image, ImageFormat};
use image_classification_lib::logging::init_logging;
use image_classification_lib::model::AppConfig;
use image_classification_lib::paths::{resolve_assets_path, StandalonePaths};
use image_classification_lib::report::console_write_banner;
use image_classification_lib::tensorflow::{classify_image_tags, InceptionClassifier, PredictionSettings};

/// ImagesForInference 内の既定の画像
const DEFAULT_IMAGES: [&str; 4] = [
    "Jersey-Red.jpg",
    "mug-white.jpg",
    "t-shirt-dotnet-4.0.jpg",
    // Inception v3 では識別されない想定
    "green-frisbee.jpg",
];

#[derive(Parser, Debug)]
#[command(name = "tensorflow_classify", about = "Tag images with the pretrained Inception graph")]
struct Args {
    /// アセットディレクトリ（省略時は実行ファイルの隣の assets）
    assets_path: Option<PathBuf>,

    /// 分類する画像ファイル名（複数指定可、ImagesForInference 基準）
    #[arg(long = "image")]
    images: Vec<String>,

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
    let images = if args.images.is_empty() {
        DEFAULT_IMAGES.iter().map(|s| s.to_string()).collect()
    } else {
        args.images
    };

    if let Err(e) = run(&assets_path, &images) {
        println!("Exception: {:#}", e);
    }
}

fn run(assets_path: &Path, images: &[String]) -> Result<()> {
    let config = AppConfig::load_or_default(assets_path);
    let paths = StandalonePaths::new(assets_path);
    let settings = PredictionSettings::default().with_threshold(config.inference.threshold);
    let classifier = Arc::new(InceptionClassifier::new(&paths.models_folder, settings));
    let runtime = tokio::runtime::Runtime::new().context("Failed to start the async runtime")?;

    for file_name in images {
        let image_path = paths.images_folder.join(file_name);
        let image_bytes = std::fs::read(&image_path)
            .with_context(|| format!("Failed to read {}", image_path.display()))?;

        if !is_valid_image(&image_bytes) {
            tracing::debug!("{}: {}", file_name, ImageFormat::detect(&image_bytes));
            println!("Error: UnsupportedMediaType");
            std::process::exit(1);
        }

        match runtime.block_on(classify_image_tags(classifier.clone(), image_bytes)) {
            Ok(tags) => {
                console_write_banner(" ");
                println!("Image file {} is classified by TensorFlow model as the following tags: ", file_name);
                for tag in tags {
                    println!("Tag: {}", tag);
                }
                console_write_banner(" ");
            }
            Err(e) => println!("Caught Exception: {}", e),
        }
    }

    println!(" ");
    println!("======================= END OF PROCESS ========================");
    Ok(())
}
