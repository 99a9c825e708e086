//! 学習なしで事前学習済み Inception グラフを直接実行する推論
//!
//! モデルとラベルファイルがなければ inception5h.zip をダウンロードして展開し、
//! 画像1枚を分類して閾値以上のラベルを確率の降順で返します。

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zip::ZipArchive;

use crate::error::{Error, Result};
use crate::ml::features::FrozenGraph;

pub const INCEPTION5H_URL: &str =
    "https://storage.googleapis.com/download.tensorflow.org/models/inception5h.zip";
const INCEPTION5H_ZIP: &str = "inception5h.zip";

const IMAGE_WIDTH: u32 = 224;
const IMAGE_HEIGHT: u32 = 224;
const IMAGE_MEAN: f32 = 117.0;
const IMAGE_SCALE: f32 = 1.0;

/// 入力テンソル形状 [1, 高さ, 幅, 3]
pub const INPUT_SHAPE: [usize; 4] = [1, IMAGE_HEIGHT as usize, IMAGE_WIDTH as usize, 3];

/// 推論設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSettings {
    pub input_tensor_name: String,
    pub output_tensor_name: String,
    pub model_filename: String,
    pub labels_filename: String,
    pub threshold: f32,
}

impl Default for PredictionSettings {
    fn default() -> Self {
        Self {
            input_tensor_name: "input".to_string(),
            output_tensor_name: "output".to_string(),
            model_filename: "tensorflow_inception_graph.pb".to_string(),
            labels_filename: "imagenet_comp_graph_label_strings.txt".to_string(),
            threshold: 0.3,
        }
    }
}

impl PredictionSettings {
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }
}

/// ラベルと確率の組
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelConfidence {
    pub label: String,
    pub probability: f32,
}

/// モデルまたはラベルファイルがなければダウンロードして展開する
pub fn download_if_model_not_exists(models_folder: &Path, model_file: &str, labels_file: &str) -> Result<()> {
    if models_folder.join(model_file).exists() && models_folder.join(labels_file).exists() {
        return Ok(());
    }

    fs::create_dir_all(models_folder)?;
    let zip_path = models_folder.join(INCEPTION5H_ZIP);

    info!("Downloading {} ...", INCEPTION5H_URL);
    let bytes = reqwest::blocking::get(INCEPTION5H_URL)?
        .error_for_status()?
        .bytes()?;
    File::create(&zip_path)?.write_all(&bytes)?;

    info!("Extracting {} to {}", zip_path.display(), models_folder.display());
    let mut archive = ZipArchive::new(File::open(&zip_path)?)?;
    archive.extract(models_folder)?;
    fs::remove_file(&zip_path)?;

    Ok(())
}

fn require_file(path: PathBuf) -> Result<PathBuf> {
    if path.exists() {
        Ok(path)
    } else {
        Err(Error::MissingFile { path })
    }
}

/// 凍結グラフとラベル一覧（1行1ラベル）を読み込む
pub fn load_model_and_labels(
    models_folder: &Path,
    settings: &PredictionSettings,
) -> Result<(FrozenGraph, Vec<String>)> {
    download_if_model_not_exists(models_folder, &settings.model_filename, &settings.labels_filename)?;

    let model_file = require_file(models_folder.join(&settings.model_filename))?;
    let graph = FrozenGraph::from_bytes(
        &fs::read(&model_file)?,
        &settings.input_tensor_name,
        &[settings.output_tensor_name.clone()],
        INPUT_SHAPE,
    )?;

    let labels_file = require_file(models_folder.join(&settings.labels_filename))?;
    let labels: Vec<String> = fs::read_to_string(&labels_file)?
        .lines()
        .map(str::to_string)
        .collect();

    debug!("{} labels loaded from {}", labels.len(), labels_file.display());
    Ok((graph, labels))
}

/// エンコード済み画像を正規化済みの入力テンソル値に変換する
///
/// 3チャネルにデコード → f32 に変換 → 224x224 にバイリニア縮小 → `(v - 117) / 1`。
/// 戻り値は [`INPUT_SHAPE`] の順に並んだ値です。
pub fn load_image(bytes: &[u8]) -> Result<Vec<f32>> {
    // to_rgb32f は 0.0..=1.0 に正規化される
    let img = image::load_from_memory(bytes)?.to_rgb32f();
    let resized = image::imageops::resize(&img, IMAGE_WIDTH, IMAGE_HEIGHT, FilterType::Triangle);

    Ok(resized
        .into_raw()
        .into_iter()
        .map(|v| (v * 255.0 - IMAGE_MEAN) / IMAGE_SCALE)
        .collect())
}

/// グラフを1回実行し、ラベルと確率を添字で対応付ける
pub fn eval(graph: &FrozenGraph, image: &[f32], labels: &[String]) -> Result<Vec<LabelConfidence>> {
    let outputs = graph.run(image)?;
    let (_, probabilities) = outputs
        .into_iter()
        .next()
        .ok_or_else(|| Error::Model("Graph produced no output".to_string()))?;

    Ok(labels
        .iter()
        .zip(probabilities)
        .map(|(label, probability)| LabelConfidence {
            label: label.clone(),
            probability,
        })
        .collect())
}

/// 閾値以上を残し、確率の降順に並べる（同値は元の順序）
pub fn rank_labels(labels: Vec<LabelConfidence>, threshold: f32) -> Vec<LabelConfidence> {
    let mut ranked: Vec<LabelConfidence> = labels
        .into_iter()
        .filter(|c| c.probability >= threshold)
        .collect();
    ranked.sort_by(|a, b| b.probability.total_cmp(&a.probability));
    ranked
}

/// 画像分類器
pub trait Classifier: Send + Sync {
    fn classify_image(&self, image: &[u8]) -> Result<Vec<LabelConfidence>>;
}

/// inception5h グラフによる分類器
#[derive(Debug, Clone)]
pub struct InceptionClassifier {
    models_folder: PathBuf,
    settings: PredictionSettings,
}

impl InceptionClassifier {
    pub fn new(models_folder: &Path, settings: PredictionSettings) -> Self {
        Self {
            models_folder: models_folder.to_path_buf(),
            settings,
        }
    }
}

impl Classifier for InceptionClassifier {
    fn classify_image(&self, image: &[u8]) -> Result<Vec<LabelConfidence>> {
        let (graph, labels) = load_model_and_labels(&self.models_folder, &self.settings)?;
        let tensor = load_image(image)?;
        let results = eval(&graph, &tensor, &labels)?;
        Ok(rank_labels(results, self.settings.threshold))
    }
}

/// ブロッキングタスク上で分類を実行する
pub async fn classify_image_async<C>(classifier: Arc<C>, image: Vec<u8>) -> Result<Vec<LabelConfidence>>
where
    C: Classifier + 'static,
{
    tokio::task::spawn_blocking(move || classifier.classify_image(&image))
        .await
        .map_err(|e| Error::Model(format!("Classification task failed: {}", e)))?
}

/// ラベル名のみを確率の降順で返す
pub async fn classify_image_tags<C>(classifier: Arc<C>, image: Vec<u8>) -> Result<Vec<String>>
where
    C: Classifier + 'static,
{
    let mut results = classify_image_async(classifier, image).await?;
    results.sort_by(|a, b| b.probability.total_cmp(&a.probability));
    Ok(results.into_iter().map(|c| c.label).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn confidence(label: &str, probability: f32) -> LabelConfidence {
        LabelConfidence {
            label: label.to_string(),
            probability,
        }
    }

    #[test]
    fn test_rank_labels_threshold() {
        let ranked = rank_labels(
            vec![confidence("cat", 0.10), confidence("dog", 0.85), confidence("bird", 0.05)],
            0.3,
        );
        assert_eq!(ranked, vec![confidence("dog", 0.85)]);
    }

    #[test]
    fn test_rank_labels_keeps_equal_and_tie_order() {
        let ranked = rank_labels(
            vec![
                confidence("a", 0.3),
                confidence("b", 0.5),
                confidence("c", 0.5),
                confidence("d", 0.29),
            ],
            0.3,
        );
        let labels: Vec<&str> = ranked.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_rank_labels_empty() {
        assert!(rank_labels(Vec::new(), 0.3).is_empty());
    }

    fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_load_image_shape_and_mean() {
        let tensor = load_image(&png_bytes(10, 20, [117, 127, 17])).unwrap();

        assert_eq!(tensor.len(), INPUT_SHAPE.iter().product::<usize>());
        for (value, expected) in tensor[..3].iter().zip([0.0, 10.0, -100.0]) {
            assert!((value - expected).abs() < 1e-3);
        }
    }

    #[test]
    fn test_load_image_interpolates_in_float() {
        // 0 と 255 の2画素を横に引き伸ばすと中間値は整数に丸められない
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([0, 0, 0]));
        img.put_pixel(1, 0, Rgb([255, 255, 255]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        let tensor = load_image(&bytes).unwrap();
        let row: Vec<f32> = tensor[..IMAGE_WIDTH as usize * 3]
            .iter()
            .step_by(3)
            .map(|v| v + IMAGE_MEAN)
            .collect();

        assert!(row.iter().all(|v| (-1e-3..=255.0 + 1e-3).contains(v)));
        assert!(row.windows(2).all(|w| w[0] <= w[1] + 1e-3));
        assert!(row.iter().any(|v| (v - v.round()).abs() > 1e-3));
    }

    #[test]
    fn test_load_image_rejects_garbage() {
        assert!(matches!(load_image(b"not an image"), Err(Error::Image(_))));
    }

    #[test]
    fn test_download_skipped_when_files_exist() {
        let dir = tempfile::tempdir().unwrap();
        let settings = PredictionSettings::default();
        fs::write(dir.path().join(&settings.model_filename), b"pb").unwrap();
        fs::write(dir.path().join(&settings.labels_filename), b"dog\n").unwrap();

        download_if_model_not_exists(dir.path(), &settings.model_filename, &settings.labels_filename)
            .unwrap();
        assert!(!dir.path().join(INCEPTION5H_ZIP).exists());
    }

    struct FixedClassifier;

    impl Classifier for FixedClassifier {
        fn classify_image(&self, _image: &[u8]) -> Result<Vec<LabelConfidence>> {
            Ok(vec![confidence("mug", 0.4), confidence("jersey", 0.9)])
        }
    }

    #[tokio::test]
    async fn test_classify_image_tags_ordered() {
        let tags = classify_image_tags(Arc::new(FixedClassifier), Vec::new())
            .await
            .unwrap();
        assert_eq!(tags, vec!["jersey", "mug"]);
    }
}
