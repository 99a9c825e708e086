//! 学習済みモデルによる推論

use std::path::Path;

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::{ImageNetData, LabelEncoder};
use crate::error::{Error, Result};
use crate::ml::features::FeatureExtractor;
use crate::ml::linear::{LinearClassifier, LinearClassifierConfig};
use crate::model::{load_model_archive, save_model_archive, ModelMetadata};
use crate::paths::delete_assets;

/// 1サンプルの推論結果（ラベル順の確率）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageNetPrediction {
    pub scores: Vec<f32>,
}

/// 特徴抽出器と線形分類器をまとめた学習済みモデル
pub struct PredictionModel<B: Backend> {
    extractor: FeatureExtractor,
    classifier: LinearClassifier<B>,
    labels: LabelEncoder,
    device: B::Device,
}

impl<B: Backend> PredictionModel<B> {
    pub fn new(
        extractor: FeatureExtractor,
        classifier: LinearClassifier<B>,
        labels: LabelEncoder,
        device: &B::Device,
    ) -> Self {
        Self {
            extractor,
            classifier,
            labels,
            device: device.clone(),
        }
    }

    /// スコアの並び順に対応するラベル名
    pub fn try_get_score_label_names(&self) -> Option<&[String]> {
        if self.labels.is_empty() {
            None
        } else {
            Some(self.labels.labels())
        }
    }

    /// サンプルの画像パスを解決するフォルダを差し替える
    pub fn set_image_folder(&mut self, folder: &Path) {
        self.extractor.set_image_folder(Some(folder.to_path_buf()));
    }

    /// 1サンプルを分類
    pub fn predict(&self, sample: &ImageNetData) -> Result<ImageNetPrediction> {
        let features = self.extractor.extract(sample)?;
        self.predict_features(&features)
    }

    /// 特徴ベクトルから確率を計算
    pub fn predict_features(&self, features: &[f32]) -> Result<ImageNetPrediction> {
        let tensor = Tensor::<B, 1>::from_floats(features, &self.device).reshape([1, features.len()]);
        let scores = self
            .classifier
            .probabilities(tensor)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| Error::Model(format!("推論結果の取得エラー: {:?}", e)))?;

        Ok(ImageNetPrediction { scores })
    }

    /// モデルをアーカイブに保存（既存ファイルは削除してから書き込む）
    pub fn write(&self, model_location: &Path) -> Result<()> {
        delete_assets(model_location)?;

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let model_binary = recorder
            .record(self.classifier.clone().into_record(), ())
            .map_err(|e| Error::Model(format!("モデル重みの書き込みエラー: {:?}", e)))?;

        let metadata = ModelMetadata::new(
            self.labels.labels().to_vec(),
            self.extractor.settings().clone(),
            self.classifier.num_features(),
        );

        save_model_archive(model_location, &metadata, &model_binary, self.extractor.graph_bytes())?;
        debug!("Model archive written: {}", model_location.display());
        Ok(())
    }

    /// アーカイブからモデルを読み込む
    pub fn read(model_location: &Path, device: &B::Device) -> Result<Self> {
        let archive = load_model_archive(model_location)?;
        let metadata = archive.metadata;

        let extractor = FeatureExtractor::from_bytes(metadata.feature_settings.clone(), archive.graph_bytes)?;

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(archive.model_binary, device)
            .map_err(|e| Error::Model(format!("モデル重みの読み込みエラー: {:?}", e)))?;

        let classifier = LinearClassifierConfig::new(metadata.num_features, metadata.num_classes())
            .init::<B>(device)
            .load_record(record);

        Ok(Self {
            extractor,
            classifier,
            labels: LabelEncoder::from_labels(metadata.label_names),
            device: device.clone(),
        })
    }
}
