//! 学習済みモデルのメタデータ
//!
//! tar.gz 内に metadata.json として保存されます。

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pipeline::FeatureSettings;

/// モデルメタデータ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// スコアの並び順に対応するラベル名
    /// 例: ["broccoli", "pizza", "teddy"]
    pub label_names: Vec<String>,

    /// 画像から特徴ベクトルを得る設定（画像サイズ、正規化、テンソル名）
    pub feature_settings: FeatureSettings,

    /// 特徴ベクトルの次元（線形分類器の入力次元）
    pub num_features: usize,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        label_names: Vec<String>,
        feature_settings: FeatureSettings,
        num_features: usize,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            label_names,
            feature_settings,
            num_features,
            trained_at,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.label_names.len()
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
