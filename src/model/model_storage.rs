//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（ラベル名、前処理設定など）
//! - model.bin       - 線形分類器の重み（バイナリ）
//! - graph.pb        - 特徴抽出に使う凍結グラフ

use std::fs::File;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};

use crate::error::{Error, Result};
use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";
const GRAPH_ENTRY: &str = "graph.pb";

/// アーカイブから読み込んだ内容
#[derive(Debug, Clone)]
pub struct ModelArchive {
    pub metadata: ModelMetadata,
    pub model_binary: Vec<u8>,
    pub graph_bytes: Vec<u8>,
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, bytes)?;
    Ok(())
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 親ディレクトリが存在しない場合は作成します。
pub fn save_model_archive(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
    graph_bytes: &[u8],
) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tar_gz_file = File::create(output_path)?;
    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;
    append_entry(&mut tar_builder, GRAPH_ENTRY, graph_bytes)?;

    // gzipストリームまで閉じる
    tar_builder.into_inner()?.finish()?;

    Ok(())
}

fn open_archive(tar_gz_path: &Path) -> Result<Archive<GzDecoder<File>>> {
    if !tar_gz_path.exists() {
        return Err(Error::MissingFile {
            path: tar_gz_path.to_path_buf(),
        });
    }
    let tar_gz_file = File::open(tar_gz_path)?;
    Ok(Archive::new(GzDecoder::new(tar_gz_file)))
}

/// Tar.gzからモデルメタデータのみを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let mut archive = open_archive(tar_gz_path)?;

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.to_str() == Some(METADATA_ENTRY) {
            let mut json_str = String::new();
            entry.read_to_string(&mut json_str)?;
            return ModelMetadata::from_json_string(&json_str);
        }
    }

    Err(Error::Model(format!("{} not found in tar.gz archive", METADATA_ENTRY)))
}

/// メタデータ・重み・凍結グラフを読み込む
pub fn load_model_archive(tar_gz_path: &Path) -> Result<ModelArchive> {
    let mut archive = open_archive(tar_gz_path)?;

    let mut metadata_opt: Option<ModelMetadata> = None;
    let mut model_binary_opt: Option<Vec<u8>> = None;
    let mut graph_opt: Option<Vec<u8>> = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().to_string();

        match path.as_str() {
            METADATA_ENTRY => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                metadata_opt = Some(ModelMetadata::from_json_string(&json_str)?);
            }
            MODEL_ENTRY => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                model_binary_opt = Some(buffer);
            }
            GRAPH_ENTRY => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                graph_opt = Some(buffer);
            }
            _ => {}
        }
    }

    match (metadata_opt, model_binary_opt, graph_opt) {
        (Some(metadata), Some(model_binary), Some(graph_bytes)) => Ok(ModelArchive {
            metadata,
            model_binary,
            graph_bytes,
        }),
        (None, _, _) => Err(Error::Model(format!("{} not found in tar.gz archive", METADATA_ENTRY))),
        (_, None, _) => Err(Error::Model(format!("{} not found in tar.gz archive", MODEL_ENTRY))),
        (_, _, None) => Err(Error::Model(format!("{} not found in tar.gz archive", GRAPH_ENTRY))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::LearningPipeline;

    fn metadata() -> ModelMetadata {
        let settings = LearningPipeline::inception(
            Path::new("tags.tsv"),
            Path::new("images"),
            Path::new("model.pb"),
        )
        .compile()
        .unwrap()
        .feature_settings;
        ModelMetadata::new(
            vec!["broccoli".to_string(), "pizza".to_string()],
            settings,
            1008,
        )
    }

    #[test]
    fn test_archive_contents_survive_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outputs").join("imageClassifier.tar.gz");

        save_model_archive(&path, &metadata(), &[1, 2, 3], b"graph").unwrap();
        assert!(path.exists());

        let loaded = load_model_archive(&path).unwrap();
        assert_eq!(loaded.metadata, metadata_with_time(&loaded.metadata));
        assert_eq!(loaded.model_binary, vec![1, 2, 3]);
        assert_eq!(loaded.graph_bytes, b"graph".to_vec());

        let only_metadata = load_metadata(&path).unwrap();
        assert_eq!(only_metadata.label_names, vec!["broccoli", "pizza"]);
        assert_eq!(only_metadata.num_classes(), 2);
    }

    fn metadata_with_time(loaded: &ModelMetadata) -> ModelMetadata {
        ModelMetadata {
            trained_at: loaded.trained_at.clone(),
            ..metadata()
        }
    }

    #[test]
    fn test_missing_archive() {
        let err = load_model_archive(Path::new("/nonexistent/imageClassifier.tar.gz")).unwrap_err();
        assert!(matches!(err, Error::MissingFile { .. }));
    }
}
