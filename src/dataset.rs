//! TSVのサンプル読み込みと学習用データセット

use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// 1件のサンプル（画像パスと正解ラベル）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageNetData {
    pub image_path: PathBuf,
    pub label: Option<String>,
}

impl ImageNetData {
    pub fn new<P: Into<PathBuf>>(image_path: P, label: Option<&str>) -> Self {
        Self {
            image_path: image_path.into(),
            label: label.map(str::to_string),
        }
    }

    /// TSVを読み込み、画像パスを画像フォルダ基準に解決する
    pub fn read_from_tsv(path: &Path, images_folder: &Path) -> Result<Vec<Self>> {
        Ok(load_tsv(path, false)?
            .into_iter()
            .map(|sample| ImageNetData {
                image_path: images_folder.join(&sample.image_path),
                label: sample.label,
            })
            .collect())
    }
}

/// タブ区切りファイルを読み込む
///
/// 列0: 画像パス、列1: ラベル（省略可）。3列目以降は無視します。
pub fn load_tsv(path: &Path, has_header: bool) -> Result<Vec<ImageNetData>> {
    if !path.exists() {
        return Err(Error::MissingFile {
            path: path.to_path_buf(),
        });
    }

    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(has_header)
        .flexible(true)
        .from_path(path)?;

    let mut samples = Vec::new();

    for result in reader.records() {
        let record = result?;

        let image_path = match record.get(0).map(str::trim) {
            Some(p) if !p.is_empty() => p,
            _ => continue, // 空行
        };

        let label = record
            .get(1)
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string);

        samples.push(ImageNetData {
            image_path: PathBuf::from(image_path),
            label,
        });
    }

    tracing::debug!("Loaded {} samples from {}", samples.len(), path.display());
    Ok(samples)
}

/// ラベル文字列を出現順の連番キーに変換する
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelEncoder {
    labels: Vec<String>,
}

impl LabelEncoder {
    /// ラベル列から辞書を作る（初出順）
    pub fn fit<'a, I>(labels: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut encoder = Self::default();
        for label in labels {
            if encoder.encode(label).is_none() {
                encoder.labels.push(label.to_string());
            }
        }
        encoder
    }

    pub fn from_labels(labels: Vec<String>) -> Self {
        Self { labels }
    }

    pub fn encode(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    pub fn decode(&self, key: usize) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// 特徴ベクトルとラベルキー
#[derive(Clone, Debug)]
pub struct FeatureItem {
    pub features: Vec<f32>,
    pub label: usize,
}

/// 特徴ベクトル化済みの学習データセット
pub struct FeatureDataset {
    items: Vec<FeatureItem>,
}

impl FeatureDataset {
    pub fn new(items: Vec<FeatureItem>) -> Self {
        Self { items }
    }

    /// 特徴次元（先頭サンプル基準）
    pub fn num_features(&self) -> usize {
        self.items.first().map(|item| item.features.len()).unwrap_or(0)
    }

    /// 学習用と検証用に分割
    ///
    /// `train_ratio` が1.0以上の場合は検証にも全データを使います。
    pub fn split(self, train_ratio: f32, seed: u64) -> (Self, Self) {
        use rand::seq::SliceRandom;
        use rand::SeedableRng;

        if train_ratio >= 1.0 {
            let valid = Self {
                items: self.items.clone(),
            };
            return (self, valid);
        }

        let mut items = self.items;
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        items.shuffle(&mut rng);

        let train_len = ((items.len() as f32 * train_ratio) as usize).max(1).min(items.len());
        let valid_items = items.split_off(train_len);

        (Self { items }, Self { items: valid_items })
    }
}

impl Dataset<FeatureItem> for FeatureDataset {
    fn get(&self, index: usize) -> Option<FeatureItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// 全サンプルにラベルがあることを確認してラベル列を返す
pub fn require_labels(samples: &[ImageNetData]) -> Result<Vec<&str>> {
    samples
        .iter()
        .map(|s| {
            s.label.as_deref().ok_or_else(|| {
                Error::Dataset(format!(
                    "Sample '{}' has no label",
                    s.image_path.display()
                ))
            })
        })
        .collect()
}
