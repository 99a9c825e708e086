//! アプリケーション設定管理モジュール
//!
//! 計算デバイスや学習設定などをJSON形式で保存・読み込みします。
//! 設定ファイルがなければ既定値で動作します。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::pipeline::LinearTrainerSettings;

/// 計算デバイスの種類
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// 学習なし推論の設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InferenceSettings {
    /// この確率以上のラベルのみ出力する
    pub threshold: f32,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self { threshold: 0.3 }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// 線形分類器の学習設定
    #[serde(default)]
    pub training: LinearTrainerSettings,
    /// 推論設定
    #[serde(default)]
    pub inference: InferenceSettings,
}

impl AppConfig {
    /// アセットディレクトリ内の設定ファイルのパス
    pub fn default_path(assets_path: &Path) -> PathBuf {
        assets_path.join("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 設定ファイルを読み込む、存在しない・壊れている場合はデフォルト設定を返す
    pub fn load_or_default(assets_path: &Path) -> Self {
        let path = Self::default_path(assets_path);
        if path.exists() {
            match Self::load(&path) {
                Ok(config) => {
                    tracing::info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            }
        } else {
            tracing::debug!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device_type, DeviceType::Cpu);
        assert_eq!(config.training.num_epochs, 50);
        assert_eq!(config.inference.threshold, 0.3);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            AppConfig::default_path(dir.path()),
            r#"{ "device_type": "Wgpu", "inference": { "threshold": 0.5 } }"#,
        )
        .unwrap();

        let config = AppConfig::load_or_default(dir.path());
        assert_eq!(config.device_type, DeviceType::Wgpu);
        assert_eq!(config.inference.threshold, 0.5);
        assert_eq!(config.training.batch_size, 8);
    }

    #[test]
    fn test_broken_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(AppConfig::default_path(dir.path()), "not json").unwrap();
        let config = AppConfig::load_or_default(dir.path());
        assert_eq!(config.training.seed, 42);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = AppConfig::default_path(dir.path());
        let mut config = AppConfig::default();
        config.training.num_epochs = 7;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.training.num_epochs, 7);
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }
}
