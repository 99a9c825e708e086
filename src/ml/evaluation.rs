//! 学習済みモデルの評価
//!
//! アーカイブを読み込み、TSVの全サンプルを分類して1行ずつ表示した後、
//! ラベル付きサンプルについて分類指標を計算します。

use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::{load_tsv, ImageNetData, LabelEncoder};
use crate::error::{Error, Result};
use crate::ml::prediction::PredictionModel;
use crate::ml::training::argmax;
use crate::report::console_write_header;

/// 対数損失で確率を下限クランプする値
pub const LOG_LOSS_EPSILON: f64 = 1e-15;

/// 1サンプルの分類結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageNetDataProbability {
    pub image_path: PathBuf,
    pub label: String,
    pub probability: f32,
}

impl ImageNetDataProbability {
    pub fn console_write_line(&self) {
        println!(
            "ImagePath: {} predicted as {} with probability {}",
            self.image_path.display(),
            self.label,
            self.probability
        );
    }
}

/// 最大確率のラベルと確率（同値なら先頭）
///
/// ラベル数と確率数が異なる場合は短い方までで対応付けます。
pub fn get_label(labels: &[String], probs: &[f32]) -> (String, f32) {
    let n = labels.len().min(probs.len());
    match argmax(&probs[..n]) {
        Some(i) => (labels[i].clone(), probs[i]),
        None => (String::new(), 0.0),
    }
}

/// 多クラス分類の評価指標
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    /// 正解率（全サンプル平均）
    pub accuracy_micro: f64,
    /// 正解率（クラスごとの平均）
    pub accuracy_macro: f64,
    pub log_loss: f64,
    /// 事前分布に対する対数損失の改善率
    pub log_loss_reduction: f64,
    /// ラベル順のクラス別対数損失（サンプルがないクラスは0）
    pub per_class_log_loss: Vec<f64>,
    pub num_samples: usize,
}

impl ClassificationMetrics {
    /// (正解キー, 確率) の組から指標を計算する
    pub fn compute(num_classes: usize, observations: &[(usize, Vec<f32>)]) -> Result<Self> {
        if observations.is_empty() {
            return Err(Error::Dataset("No labelled samples to evaluate".to_string()));
        }

        let mut class_count = vec![0usize; num_classes];
        let mut class_correct = vec![0usize; num_classes];
        let mut class_loss = vec![0.0f64; num_classes];
        let mut loss_sum = 0.0f64;
        let mut correct = 0usize;

        for (label, probs) in observations {
            let label = *label;
            if label >= num_classes {
                return Err(Error::Dataset(format!("Label key {} out of range", label)));
            }
            let p = probs.get(label).copied().unwrap_or(0.0) as f64;
            let loss = -p.max(LOG_LOSS_EPSILON).ln();

            loss_sum += loss;
            class_loss[label] += loss;
            class_count[label] += 1;
            if argmax(probs) == Some(label) {
                correct += 1;
                class_correct[label] += 1;
            }
        }

        let total = observations.len() as f64;
        let log_loss = loss_sum / total;

        // テストセットのラベル分布のエントロピー
        let prior_log_loss: f64 = class_count
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = c as f64 / total;
                -p * p.ln()
            })
            .sum();
        let log_loss_reduction = if prior_log_loss > 0.0 {
            (prior_log_loss - log_loss) / prior_log_loss
        } else {
            0.0
        };

        let present: Vec<usize> = (0..num_classes).filter(|&c| class_count[c] > 0).collect();
        let accuracy_macro = present
            .iter()
            .map(|&c| class_correct[c] as f64 / class_count[c] as f64)
            .sum::<f64>()
            / present.len() as f64;

        let per_class_log_loss = (0..num_classes)
            .map(|c| {
                if class_count[c] > 0 {
                    class_loss[c] / class_count[c] as f64
                } else {
                    0.0
                }
            })
            .collect();

        Ok(Self {
            accuracy_micro: correct as f64 / total,
            accuracy_macro,
            log_loss,
            log_loss_reduction,
            per_class_log_loss,
            num_samples: observations.len(),
        })
    }
}

/// 保存済みモデルを読み込み、TSVのサンプルで評価する
pub struct ModelEvaluator {
    data_location: PathBuf,
    images_folder: PathBuf,
    model_location: PathBuf,
}

impl ModelEvaluator {
    pub fn new(data_location: &Path, images_folder: &Path, model_location: &Path) -> Self {
        Self {
            data_location: data_location.to_path_buf(),
            images_folder: images_folder.to_path_buf(),
            model_location: model_location.to_path_buf(),
        }
    }

    pub fn evaluate<B: Backend>(&self, device: &B::Device) -> Result<ClassificationMetrics> {
        let model = self.load_model::<B>(device)?;
        let predictions = self.predict_data_using_model(&model)?;
        self.evaluate_model(&model, &predictions)
    }

    fn load_model<B: Backend>(&self, device: &B::Device) -> Result<PredictionModel<B>> {
        console_write_header(&["Read model"]);
        println!("Model location: {}", self.model_location.display());

        let mut model = PredictionModel::<B>::read(&self.model_location, device)?;
        model.set_image_folder(&self.images_folder);
        Ok(model)
    }

    /// 全サンプルを分類して1行ずつ表示する
    fn predict_data_using_model<B: Backend>(
        &self,
        model: &PredictionModel<B>,
    ) -> Result<Vec<(ImageNetData, Vec<f32>)>> {
        console_write_header(&["Classificate images"]);
        println!("Images folder: {}", self.images_folder.display());
        println!("Training file: {}", self.data_location.display());
        println!(" ");

        let labels = model.try_get_score_label_names().unwrap_or(&[]).to_vec();
        let samples = load_tsv(&self.data_location, false)?;

        let mut predictions = Vec::with_capacity(samples.len());
        for sample in samples {
            let scores = model.predict(&sample)?.scores;
            let (label, probability) = get_label(&labels, &scores);
            ImageNetDataProbability {
                image_path: self.images_folder.join(&sample.image_path),
                label,
                probability,
            }
            .console_write_line();
            predictions.push((sample, scores));
        }
        Ok(predictions)
    }

    fn evaluate_model<B: Backend>(
        &self,
        model: &PredictionModel<B>,
        predictions: &[(ImageNetData, Vec<f32>)],
    ) -> Result<ClassificationMetrics> {
        console_write_header(&["Metrics for Image Classification"]);

        let encoder = LabelEncoder::from_labels(
            model.try_get_score_label_names().unwrap_or(&[]).to_vec(),
        );

        let mut observations = Vec::with_capacity(predictions.len());
        for (sample, scores) in predictions {
            let Some(label) = sample.label.as_deref() else {
                continue;
            };
            match encoder.encode(label) {
                Some(key) => observations.push((key, scores.clone())),
                None => warn!(
                    "Skipping {}: label '{}' is unknown to the model",
                    sample.image_path.display(),
                    label
                ),
            }
        }

        let metrics = ClassificationMetrics::compute(encoder.len(), &observations)?;
        info!(
            "accuracy micro {:.3}, macro {:.3}, log-loss reduction {:.3}",
            metrics.accuracy_micro, metrics.accuracy_macro, metrics.log_loss_reduction
        );
        println!("Log Loss: {}", metrics.log_loss);
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<String> {
        vec!["cat".to_string(), "dog".to_string(), "bird".to_string()]
    }

    #[test]
    fn test_get_label_picks_max() {
        let (label, p) = get_label(&labels(), &[0.1, 0.85, 0.05]);
        assert_eq!(label, "dog");
        assert_eq!(p, 0.85);
    }

    #[test]
    fn test_get_label_tie_keeps_first() {
        let (label, _) = get_label(&labels(), &[0.4, 0.4, 0.2]);
        assert_eq!(label, "cat");
    }

    #[test]
    fn test_get_label_shorter_probabilities() {
        let (label, p) = get_label(&labels(), &[0.2, 0.8]);
        assert_eq!(label, "dog");
        assert_eq!(p, 0.8);

        let (label, p) = get_label(&[], &[1.0]);
        assert_eq!(label, "");
        assert_eq!(p, 0.0);
    }

    #[test]
    fn test_metrics_perfect_predictions() {
        let observations = vec![
            (0, vec![1.0, 0.0]),
            (1, vec![0.0, 1.0]),
        ];
        let metrics = ClassificationMetrics::compute(2, &observations).unwrap();

        assert_eq!(metrics.accuracy_micro, 1.0);
        assert_eq!(metrics.accuracy_macro, 1.0);
        assert!(metrics.log_loss < 1e-9);
        assert!((metrics.log_loss_reduction - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_zero_probability_is_clamped() {
        let observations = vec![(0, vec![0.0, 1.0])];
        let metrics = ClassificationMetrics::compute(2, &observations).unwrap();

        assert!((metrics.log_loss + LOG_LOSS_EPSILON.ln()).abs() < 1e-9);
        assert!(metrics.log_loss.is_finite());
        assert_eq!(metrics.accuracy_micro, 0.0);
    }

    #[test]
    fn test_metrics_micro_and_macro_differ() {
        // クラス0: 3件中3件正解、クラス1: 1件中0件正解
        let observations = vec![
            (0, vec![0.9, 0.1]),
            (0, vec![0.8, 0.2]),
            (0, vec![0.7, 0.3]),
            (1, vec![0.6, 0.4]),
        ];
        let metrics = ClassificationMetrics::compute(3, &observations).unwrap();

        assert!((metrics.accuracy_micro - 0.75).abs() < 1e-9);
        assert!((metrics.accuracy_macro - 0.5).abs() < 1e-9);
        assert_eq!(metrics.per_class_log_loss.len(), 3);
        assert!((metrics.per_class_log_loss[1] - (-(0.4f32 as f64).ln())).abs() < 1e-6);
        assert_eq!(metrics.per_class_log_loss[2], 0.0);
    }

    #[test]
    fn test_metrics_empty_is_error() {
        assert!(matches!(
            ClassificationMetrics::compute(2, &[]),
            Err(Error::Dataset(_))
        ));
    }
}
