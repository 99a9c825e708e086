//! パイプラインの学習
//!
//! 全サンプルを凍結グラフで特徴ベクトル化した後、その特徴ベクトル上で
//! 線形分類器を学習します。

use burn::{
    data::{dataloader::batcher::Batcher, dataloader::DataLoaderBuilder, dataset::Dataset},
    module::AutodiffModule,
    optim::{decay::WeightDecayConfig, AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::{load_tsv, require_labels, FeatureDataset, FeatureItem, LabelEncoder};
use crate::error::{Error, Result};
use crate::ml::features::FeatureExtractor;
use crate::ml::linear::{LinearClassifier, LinearClassifierConfig};
use crate::ml::prediction::PredictionModel;
use crate::pipeline::{LearningPipeline, LinearTrainerSettings};

/// バッチャー
#[derive(Clone)]
pub struct FeatureBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> FeatureBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct FeatureBatch<B: Backend> {
    pub features: Tensor<B, 2>,
    pub targets: Tensor<B, 1, Int>,
    pub labels: Vec<usize>,
}

impl<B: Backend> Batcher<B, FeatureItem, FeatureBatch<B>> for FeatureBatcher<B> {
    fn batch(&self, items: Vec<FeatureItem>, _device: &B::Device) -> FeatureBatch<B> {
        let batch_size = items.len();
        let num_features = items.first().map(|i| i.features.len()).unwrap_or(0);

        let mut all_features = Vec::with_capacity(batch_size * num_features);
        let mut targets_vec = Vec::with_capacity(batch_size);
        let mut labels = Vec::with_capacity(batch_size);

        for item in items {
            all_features.extend_from_slice(&item.features);
            targets_vec.push(item.label as i64);
            labels.push(item.label);
        }

        let features = Tensor::<B, 1>::from_floats(all_features.as_slice(), &self.device)
            .reshape([batch_size, num_features]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        FeatureBatch {
            features,
            targets,
            labels,
        }
    }
}

/// エポックごとの学習結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f32,
    pub train_accuracy: f32,
    pub valid_loss: f32,
    pub valid_accuracy: f32,
}

/// ロジットの行ごとの最大値がラベルと一致した数
fn count_correct<B: Backend>(output: Tensor<B, 2>, labels: &[usize]) -> Result<usize> {
    let [_, num_classes] = output.dims();
    let values = output
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| Error::Model(format!("Failed to read logits: {:?}", e)))?;

    Ok(values
        .chunks(num_classes.max(1))
        .zip(labels)
        .filter(|(row, label)| argmax(row) == Some(**label))
        .count())
}

/// 最大値の位置（同値なら先頭）
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// 特徴ベクトル上で線形分類器を学習する
pub fn train_linear_classifier<B: AutodiffBackend>(
    dataset: FeatureDataset,
    num_classes: usize,
    settings: &LinearTrainerSettings,
    device: &B::Device,
) -> Result<(LinearClassifier<B::InnerBackend>, Vec<EpochMetrics>)> {
    if dataset.is_empty() {
        return Err(Error::Dataset("No training samples".to_string()));
    }
    if num_classes == 0 {
        return Err(Error::Dataset("No labels to learn".to_string()));
    }

    let num_features = dataset.num_features();
    let (dataset_train, dataset_valid) = dataset.split(settings.train_ratio, settings.seed);
    let (train_len, valid_len) = (dataset_train.len(), dataset_valid.len());

    info!("学習データ: {} 件, 検証データ: {} 件", train_len, valid_len);
    info!(
        "モデル設定: {} 特徴 -> {} クラス, エポック数: {}, バッチサイズ: {}, 学習率: {}",
        num_features, num_classes, settings.num_epochs, settings.batch_size, settings.learning_rate
    );

    let dataloader_train = DataLoaderBuilder::new(FeatureBatcher::<B>::new(device.clone()))
        .batch_size(settings.batch_size.max(1))
        .shuffle(settings.seed)
        .num_workers(0)
        .build(dataset_train);

    let dataloader_valid =
        DataLoaderBuilder::new(FeatureBatcher::<B::InnerBackend>::new(device.clone()))
            .batch_size(settings.batch_size.max(1))
            .num_workers(0)
            .build(dataset_valid);

    let mut model = LinearClassifierConfig::new(num_features, num_classes).init::<B>(device);

    let weight_decay = if settings.l2_regularization > 0.0 {
        Some(WeightDecayConfig::new(settings.l2_regularization))
    } else {
        None
    };
    let mut optim = AdamConfig::new().with_weight_decay(weight_decay).init();

    let mut history = Vec::with_capacity(settings.num_epochs);

    for epoch in 1..=settings.num_epochs {
        let mut loss_sum = 0.0f32;
        let mut correct = 0usize;

        for batch in dataloader_train.iter() {
            let size = batch.labels.len() as f32;
            let item = model.forward_classification(batch.features, batch.targets);
            loss_sum += item.loss.clone().into_scalar().elem::<f32>() * size;
            correct += count_correct(item.output.clone(), &batch.labels)?;

            let grads = item.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(settings.learning_rate, model, grads);
        }

        let model_valid = model.valid();
        let mut valid_loss_sum = 0.0f32;
        let mut valid_correct = 0usize;

        for batch in dataloader_valid.iter() {
            let size = batch.labels.len() as f32;
            let item = model_valid.forward_classification(batch.features, batch.targets);
            valid_loss_sum += item.loss.into_scalar().elem::<f32>() * size;
            valid_correct += count_correct(item.output, &batch.labels)?;
        }

        let metrics = EpochMetrics {
            epoch,
            train_loss: loss_sum / train_len as f32,
            train_accuracy: correct as f32 / train_len as f32,
            valid_loss: valid_loss_sum / valid_len.max(1) as f32,
            valid_accuracy: valid_correct as f32 / valid_len.max(1) as f32,
        };

        debug!(
            "Epoch {}/{}: loss {:.4} acc {:.3} | valid loss {:.4} acc {:.3}",
            epoch,
            settings.num_epochs,
            metrics.train_loss,
            metrics.train_accuracy,
            metrics.valid_loss,
            metrics.valid_accuracy
        );
        history.push(metrics);
    }

    if let Some(last) = history.last() {
        info!(
            "学習完了: loss {:.4}, accuracy {:.3}",
            last.train_loss, last.train_accuracy
        );
    }

    Ok((model.valid(), history))
}

impl LearningPipeline {
    /// パイプラインを実行して分類モデルを学習する
    pub fn train<B: AutodiffBackend>(
        &self,
        device: &B::Device,
    ) -> Result<PredictionModel<B::InnerBackend>> {
        let compiled = self.compile()?;
        let settings = &compiled.feature_settings;

        info!(
            "Default parameters: image size=({},{}), image mean: {}, image scale: {}",
            settings.width, settings.height, settings.offset, settings.scale
        );

        let samples = load_tsv(&compiled.data_location, compiled.has_header)?;
        if samples.is_empty() {
            return Err(Error::Dataset(format!(
                "No training samples found in {}",
                compiled.data_location.display()
            )));
        }
        let labels = require_labels(&samples)?;
        let encoder = LabelEncoder::fit(labels.iter().copied());

        info!(
            "{} samples, {} labels: {}",
            samples.len(),
            encoder.len(),
            encoder.labels().join(", ")
        );

        let extractor = FeatureExtractor::load(settings.clone(), &compiled.model_file)?;

        let mut items = Vec::with_capacity(samples.len());
        for (sample, label) in samples.iter().zip(&labels) {
            let features = extractor.extract(sample)?;
            if let Some(first) = items.first().map(|i: &FeatureItem| i.features.len()) {
                if first != features.len() {
                    return Err(Error::Model(format!(
                        "Feature length mismatch for {}: {} (expected {})",
                        sample.image_path.display(),
                        features.len(),
                        first
                    )));
                }
            }
            let key = encoder
                .encode(label)
                .ok_or_else(|| Error::Dataset(format!("Unknown label '{}'", label)))?;
            items.push(FeatureItem {
                features,
                label: key,
            });
        }

        let (model, _) =
            train_linear_classifier::<B>(FeatureDataset::new(items), encoder.len(), &compiled.trainer, device)?;

        Ok(PredictionModel::new(extractor, model, encoder, device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TrainingBackend;

    /// 2次元の線形分離可能なデータ
    fn separable_items() -> Vec<FeatureItem> {
        let mut items = Vec::new();
        for i in 0..6 {
            let d = i as f32 * 0.1;
            items.push(FeatureItem {
                features: vec![2.0 + d, -1.0],
                label: 0,
            });
            items.push(FeatureItem {
                features: vec![-1.0, 2.0 + d],
                label: 1,
            });
            items.push(FeatureItem {
                features: vec![-2.0 - d, -2.0],
                label: 2,
            });
        }
        items
    }

    #[test]
    fn test_argmax_first_wins() {
        assert_eq!(argmax(&[0.1, 0.85, 0.05]), Some(1));
        assert_eq!(argmax(&[0.4, 0.4, 0.2]), Some(0));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_batcher_shapes() {
        let device = Default::default();
        let batcher = FeatureBatcher::<crate::backend::InferenceBackend>::new(device);
        let batch = batcher.batch(separable_items()[..4].to_vec(), &Default::default());

        assert_eq!(batch.features.dims(), [4, 2]);
        assert_eq!(batch.targets.dims(), [4]);
        assert_eq!(batch.labels, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_linear_classifier_learns_separable_data() {
        let device = Default::default();
        let settings = LinearTrainerSettings {
            num_epochs: 40,
            batch_size: 6,
            learning_rate: 0.1,
            ..Default::default()
        };

        let (_, history) = train_linear_classifier::<TrainingBackend>(
            FeatureDataset::new(separable_items()),
            3,
            &settings,
            &device,
        )
        .unwrap();

        assert_eq!(history.len(), 40);
        let first = &history[0];
        let last = history.last().unwrap();
        assert!(last.train_loss < first.train_loss);
        assert!(last.valid_accuracy > 0.99);
    }

    #[test]
    fn test_empty_dataset_is_rejected() {
        let device = Default::default();
        let result = train_linear_classifier::<TrainingBackend>(
            FeatureDataset::new(Vec::new()),
            2,
            &LinearTrainerSettings::default(),
            &device,
        );
        assert!(matches!(result, Err(Error::Dataset(_))));
    }
}
