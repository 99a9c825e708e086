//! 入力データ・画像・モデルの配置場所

use std::path::{Path, PathBuf};

use crate::error::Result;

/// 実行ファイルの場所から決まるアセットディレクトリ
///
/// 引数でアセットディレクトリが渡されなかった場合に使用します。
pub fn default_assets_path() -> PathBuf {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    exe_dir.join("assets")
}

/// 引数のアセットディレクトリ、なければ既定の場所
///
/// 相対パスはカレントディレクトリ基準の絶対パスにします。
pub fn resolve_assets_path(arg: Option<PathBuf>) -> PathBuf {
    let path = arg.unwrap_or_else(default_assets_path);
    match std::path::absolute(&path) {
        Ok(absolute) => absolute,
        Err(_) => path,
    }
}

/// 学習・予測サンプルで使うファイル群
#[derive(Debug, Clone)]
pub struct AssetPaths {
    pub tags_tsv: PathBuf,
    pub images_folder: PathBuf,
    pub inception_pb: PathBuf,
    pub classifier_archive: PathBuf,
}

impl AssetPaths {
    pub fn new(assets_path: &Path) -> Self {
        let data = assets_path.join("inputs").join("data");
        Self {
            tags_tsv: data.join("tags.tsv"),
            images_folder: data,
            inception_pb: assets_path
                .join("inputs")
                .join("inception")
                .join("tensorflow_inception_graph.pb"),
            classifier_archive: assets_path.join("outputs").join("imageClassifier.tar.gz"),
        }
    }
}

/// 学習してその場で1枚を推論するサンプルのファイル群
#[derive(Debug, Clone)]
pub struct ScoringPaths {
    pub tags_tsv: PathBuf,
    pub images_folder: PathBuf,
    pub model_pb: PathBuf,
    /// 試しに分類する画像（images フォルダ基準）
    pub probe_image: PathBuf,
}

impl ScoringPaths {
    /// Inception v3 の採点サンプル
    pub fn inception(assets_path: &Path) -> Self {
        let root = assets_path.join("scoring");
        Self {
            tags_tsv: root.join("model").join("tags.tsv"),
            images_folder: root.join("images"),
            model_pb: root.join("model").join("tensorflow_inception_graph.pb"),
            probe_image: PathBuf::from("violin.jpg"),
        }
    }

    /// CIFAR モデルの採点サンプル
    pub fn cifar(assets_path: &Path) -> Self {
        let root = assets_path.join("cifar");
        Self {
            tags_tsv: root.join("tags").join("images.tsv"),
            images_folder: root.join("images"),
            model_pb: root.join("model").join("frozen_model.pb"),
            probe_image: PathBuf::from("banana.jpg"),
        }
    }
}

/// 学習なしの直接推論サンプルのフォルダ
#[derive(Debug, Clone)]
pub struct StandalonePaths {
    pub models_folder: PathBuf,
    pub images_folder: PathBuf,
}

impl StandalonePaths {
    pub fn new(assets_path: &Path) -> Self {
        Self {
            models_folder: assets_path.join("DNNModels"),
            images_folder: assets_path.join("ImagesForInference"),
        }
    }
}

/// 既存のファイル（またはディレクトリ）を削除する
pub fn delete_assets(path: &Path) -> Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)?;
    } else if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_layout() {
        let paths = AssetPaths::new(Path::new("/assets"));
        assert_eq!(paths.tags_tsv, PathBuf::from("/assets/inputs/data/tags.tsv"));
        assert_eq!(paths.images_folder, PathBuf::from("/assets/inputs/data"));
        assert_eq!(
            paths.inception_pb,
            PathBuf::from("/assets/inputs/inception/tensorflow_inception_graph.pb")
        );
        assert_eq!(
            paths.classifier_archive,
            PathBuf::from("/assets/outputs/imageClassifier.tar.gz")
        );
    }

    #[test]
    fn test_resolve_prefers_argument() {
        let resolved = resolve_assets_path(Some(PathBuf::from("/data/my_assets")));
        assert_eq!(resolved, PathBuf::from("/data/my_assets"));

        let fallback = resolve_assets_path(None);
        assert!(fallback.ends_with("assets"));
    }

    #[test]
    fn test_relative_argument_becomes_absolute() {
        let resolved = resolve_assets_path(Some(PathBuf::from("assets")));
        assert!(resolved.is_absolute());
        assert_eq!(resolved, std::env::current_dir().unwrap().join("assets"));
    }

    #[test]
    fn test_probe_image_is_relative_to_images_folder() {
        let paths = ScoringPaths::cifar(Path::new("assets"));
        assert_eq!(paths.images_folder, PathBuf::from("assets/cifar/images"));
        assert!(paths.probe_image.is_relative());
        assert_eq!(paths.probe_image.parent(), Some(Path::new("")));
    }

    #[test]
    fn test_delete_assets() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("old.tar.gz");
        std::fs::write(&file, b"old").unwrap();

        delete_assets(&file).unwrap();
        assert!(!file.exists());

        // 存在しないパスはエラーにならない
        delete_assets(&file).unwrap();
    }
}
