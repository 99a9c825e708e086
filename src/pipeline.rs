//! 学習パイプラインの構成
//!
//! 名前付きの変換ステップを順に並べたものです。各ステップは外部ライブラリ
//! （image / tract / burn）に渡す設定値のみを保持し、実行は
//! [`crate::ml::training`] で行います。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// 画像をネットワーク入力サイズに合わせる方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResizingKind {
    /// アスペクト比を保って拡縮し、中央を切り出す
    IsoCrop,
    /// アスペクト比を保って収め、余白を黒で埋める
    IsoPad,
    /// 縦横独立に引き伸ばす
    Fill,
}

/// 線形分類器の学習設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearTrainerSettings {
    pub num_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// L2正則化の強さ（重み減衰）
    pub l2_regularization: f32,
    /// 学習データの割合（1.0なら検証にも全データを使う）
    pub train_ratio: f32,
    pub seed: u64,
}

impl Default for LinearTrainerSettings {
    fn default() -> Self {
        Self {
            num_epochs: 50,
            batch_size: 8,
            learning_rate: 1e-2,
            l2_regularization: 1e-4,
            train_ratio: 1.0,
            seed: 42,
        }
    }
}

/// パイプラインの1ステップ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineStep {
    /// TSVデータ（列0: 画像パス, 列1: ラベル）
    TextLoader { path: PathBuf, has_header: bool },
    ImageLoader {
        input_column: String,
        output_column: String,
        image_folder: PathBuf,
    },
    ImageResizer {
        input_column: String,
        output_column: String,
        width: u32,
        height: u32,
        resizing: ResizingKind,
    },
    /// 画素値の取り出しと正規化: `(pixel - offset) * scale`
    ImagePixelExtractor {
        input_column: String,
        output_column: String,
        use_alpha: bool,
        /// true: (高さ, 幅, チャネル)、false: (チャネル, 高さ, 幅)
        interleave: bool,
        convert: bool,
        offset: f32,
        scale: f32,
    },
    /// 凍結グラフの実行（入力列名 = 入力テンソル名）
    TensorFlowScorer {
        model_file: PathBuf,
        input_columns: Vec<String>,
        output_columns: Vec<String>,
    },
    ColumnConcatenator {
        output_column: String,
        input_columns: Vec<String>,
    },
    TextToKeyConverter { column: String },
    LinearClassifier(LinearTrainerSettings),
}

impl PipelineStep {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineStep::TextLoader { .. } => "TextLoader",
            PipelineStep::ImageLoader { .. } => "ImageLoader",
            PipelineStep::ImageResizer { .. } => "ImageResizer",
            PipelineStep::ImagePixelExtractor { .. } => "ImagePixelExtractor",
            PipelineStep::TensorFlowScorer { .. } => "TensorFlowScorer",
            PipelineStep::ColumnConcatenator { .. } => "ColumnConcatenator",
            PipelineStep::TextToKeyConverter { .. } => "TextToKeyConverter",
            PipelineStep::LinearClassifier(_) => "LinearClassifier",
        }
    }

    /// 単一出力のスコアラー
    pub fn tensorflow_scorer(model_file: &Path, input: &str, output: &str) -> Self {
        PipelineStep::TensorFlowScorer {
            model_file: model_file.to_path_buf(),
            input_columns: vec![input.to_string()],
            output_columns: vec![output.to_string()],
        }
    }
}

/// ImageNet系モデルの前処理定数
pub struct ImageNetSettings;

impl ImageNetSettings {
    pub const IMAGE_HEIGHT: u32 = 224;
    pub const IMAGE_WIDTH: u32 = 224;
    pub const MEAN: f32 = 117.0;
    pub const SCALE: f32 = 1.0;
    pub const CHANNELS_LAST: bool = true;
}

/// Inception v3 グラフのテンソル名
pub struct InceptionSettings;

impl InceptionSettings {
    pub const INPUT_TENSOR_NAME: &'static str = "input";
    /// softmaxの1つ手前（softmax2_pre_activation）を特徴量として使う
    pub const OUTPUT_TENSOR_NAME: &'static str = "softmax2_pre_activation";
}

/// CIFAR モデルの設定
pub struct CifarSettings;

impl CifarSettings {
    pub const IMAGE_HEIGHT: u32 = 32;
    pub const IMAGE_WIDTH: u32 = 32;
    pub const INPUT_TENSOR_NAME: &'static str = "Input";
    pub const OUTPUT_TENSOR_NAME: &'static str = "Output";
}

pub const IMAGE_PATH_COLUMN: &str = "ImagePath";
pub const LABEL_COLUMN: &str = "Label";
pub const FEATURES_COLUMN: &str = "Features";

/// 順序付きの変換ステップ列
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningPipeline {
    steps: Vec<PipelineStep>,
}

impl LearningPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, step: PipelineStep) -> &mut Self {
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Inception v3 による転移学習パイプライン
    pub fn inception(data_location: &Path, images_folder: &Path, model_location: &Path) -> Self {
        let mut pipeline = Self::new();
        pipeline
            .add(PipelineStep::TextLoader {
                path: data_location.to_path_buf(),
                has_header: false,
            })
            .add(PipelineStep::ImageLoader {
                input_column: IMAGE_PATH_COLUMN.to_string(),
                output_column: "ImageReal".to_string(),
                image_folder: images_folder.to_path_buf(),
            })
            .add(PipelineStep::ImageResizer {
                input_column: "ImageReal".to_string(),
                output_column: "ImageCropped".to_string(),
                width: ImageNetSettings::IMAGE_WIDTH,
                height: ImageNetSettings::IMAGE_HEIGHT,
                resizing: ResizingKind::IsoCrop,
            })
            .add(PipelineStep::ImagePixelExtractor {
                input_column: "ImageCropped".to_string(),
                output_column: InceptionSettings::INPUT_TENSOR_NAME.to_string(),
                use_alpha: false,
                interleave: ImageNetSettings::CHANNELS_LAST,
                convert: true,
                offset: ImageNetSettings::MEAN,
                scale: ImageNetSettings::SCALE,
            })
            .add(PipelineStep::tensorflow_scorer(
                model_location,
                InceptionSettings::INPUT_TENSOR_NAME,
                InceptionSettings::OUTPUT_TENSOR_NAME,
            ))
            .add(PipelineStep::ColumnConcatenator {
                output_column: FEATURES_COLUMN.to_string(),
                input_columns: vec![InceptionSettings::OUTPUT_TENSOR_NAME.to_string()],
            })
            .add(PipelineStep::TextToKeyConverter {
                column: LABEL_COLUMN.to_string(),
            })
            .add(PipelineStep::LinearClassifier(LinearTrainerSettings::default()));
        pipeline
    }

    /// CIFAR (32x32) モデルによる転移学習パイプライン
    ///
    /// 画素値は正規化しません（offset 0, scale 1）。
    pub fn cifar(data_location: &Path, images_folder: &Path, model_location: &Path) -> Self {
        let mut pipeline = Self::new();
        pipeline
            .add(PipelineStep::TextLoader {
                path: data_location.to_path_buf(),
                has_header: false,
            })
            .add(PipelineStep::ImageLoader {
                input_column: IMAGE_PATH_COLUMN.to_string(),
                output_column: "ImageReal".to_string(),
                image_folder: images_folder.to_path_buf(),
            })
            .add(PipelineStep::ImageResizer {
                input_column: "ImageReal".to_string(),
                output_column: "ImageCropped".to_string(),
                width: CifarSettings::IMAGE_WIDTH,
                height: CifarSettings::IMAGE_HEIGHT,
                resizing: ResizingKind::IsoCrop,
            })
            .add(PipelineStep::ImagePixelExtractor {
                input_column: "ImageCropped".to_string(),
                output_column: CifarSettings::INPUT_TENSOR_NAME.to_string(),
                use_alpha: false,
                interleave: true,
                convert: true,
                offset: 0.0,
                scale: 1.0,
            })
            .add(PipelineStep::tensorflow_scorer(
                model_location,
                CifarSettings::INPUT_TENSOR_NAME,
                CifarSettings::OUTPUT_TENSOR_NAME,
            ))
            .add(PipelineStep::ColumnConcatenator {
                output_column: FEATURES_COLUMN.to_string(),
                input_columns: vec![CifarSettings::OUTPUT_TENSOR_NAME.to_string()],
            })
            .add(PipelineStep::TextToKeyConverter {
                column: LABEL_COLUMN.to_string(),
            })
            .add(PipelineStep::LinearClassifier(LinearTrainerSettings::default()));
        pipeline
    }

    /// 学習器の設定を差し替える（なければ末尾に追加）
    pub fn with_trainer_settings(mut self, settings: LinearTrainerSettings) -> Self {
        match self
            .steps
            .iter_mut()
            .find(|s| matches!(s, PipelineStep::LinearClassifier(_)))
        {
            Some(step) => *step = PipelineStep::LinearClassifier(settings),
            None => self.steps.push(PipelineStep::LinearClassifier(settings)),
        }
        self
    }

    /// 列の参照関係を解決して実行計画にする
    pub fn compile(&self) -> Result<CompiledPipeline> {
        let mut data: Option<(PathBuf, bool)> = None;
        let mut loader: Option<(String, PathBuf)> = None;
        let mut resizer: Option<(String, u32, u32, ResizingKind)> = None;
        let mut extractor: Option<PixelExtraction> = None;
        let mut scorer: Option<ScorerBinding> = None;
        let mut features: Option<Vec<String>> = None;
        let mut label_column: Option<String> = None;
        let mut trainer: Option<LinearTrainerSettings> = None;

        for step in &self.steps {
            match step {
                PipelineStep::TextLoader { path, has_header } => {
                    data = Some((path.clone(), *has_header));
                }
                PipelineStep::ImageLoader {
                    input_column,
                    output_column,
                    image_folder,
                } => {
                    if input_column != IMAGE_PATH_COLUMN {
                        return Err(unknown_column(step, input_column));
                    }
                    loader = Some((output_column.clone(), image_folder.clone()));
                }
                PipelineStep::ImageResizer {
                    input_column,
                    output_column,
                    width,
                    height,
                    resizing,
                } => {
                    let (loaded, _) = loader.as_ref().ok_or_else(|| missing("ImageLoader", step))?;
                    if input_column != loaded {
                        return Err(unknown_column(step, input_column));
                    }
                    resizer = Some((output_column.clone(), *width, *height, *resizing));
                }
                PipelineStep::ImagePixelExtractor {
                    input_column,
                    output_column,
                    use_alpha,
                    interleave,
                    convert,
                    offset,
                    scale,
                } => {
                    let (resized, width, height, resizing) =
                        resizer.as_ref().ok_or_else(|| missing("ImageResizer", step))?;
                    if input_column != resized {
                        return Err(unknown_column(step, input_column));
                    }
                    extractor = Some(PixelExtraction {
                        column: output_column.clone(),
                        width: *width,
                        height: *height,
                        resizing: *resizing,
                        use_alpha: *use_alpha,
                        interleave: *interleave,
                        convert: *convert,
                        offset: *offset,
                        scale: *scale,
                    });
                }
                PipelineStep::TensorFlowScorer {
                    model_file,
                    input_columns,
                    output_columns,
                } => {
                    let pixels = extractor
                        .as_ref()
                        .ok_or_else(|| missing("ImagePixelExtractor", step))?;
                    let input = match input_columns.as_slice() {
                        [single] if *single == pixels.column => single.clone(),
                        [single] => return Err(unknown_column(step, single)),
                        _ => {
                            return Err(Error::Pipeline(format!(
                                "{} expects exactly one input column, got {}",
                                step.name(),
                                input_columns.len()
                            )))
                        }
                    };
                    if output_columns.is_empty() {
                        return Err(Error::Pipeline(format!(
                            "{} has no output columns",
                            step.name()
                        )));
                    }
                    scorer = Some(ScorerBinding {
                        model_file: model_file.clone(),
                        input_tensor: input,
                        output_tensors: output_columns.clone(),
                    });
                }
                PipelineStep::ColumnConcatenator {
                    output_column,
                    input_columns,
                } => {
                    let bound = scorer
                        .as_ref()
                        .ok_or_else(|| missing("TensorFlowScorer", step))?;
                    if output_column != FEATURES_COLUMN {
                        return Err(unknown_column(step, output_column));
                    }
                    if let Some(col) = input_columns
                        .iter()
                        .find(|c| !bound.output_tensors.contains(c))
                    {
                        return Err(unknown_column(step, col));
                    }
                    features = Some(input_columns.clone());
                }
                PipelineStep::TextToKeyConverter { column } => {
                    if column != LABEL_COLUMN {
                        return Err(unknown_column(step, column));
                    }
                    label_column = Some(column.clone());
                }
                PipelineStep::LinearClassifier(settings) => {
                    if features.is_none() {
                        return Err(missing("ColumnConcatenator", step));
                    }
                    if label_column.is_none() {
                        return Err(missing("TextToKeyConverter", step));
                    }
                    trainer = Some(settings.clone());
                }
            }
        }

        let (data_location, has_header) =
            data.ok_or_else(|| Error::Pipeline("Pipeline has no TextLoader".to_string()))?;
        let (_, image_folder) =
            loader.ok_or_else(|| Error::Pipeline("Pipeline has no ImageLoader".to_string()))?;
        let pixels = extractor
            .ok_or_else(|| Error::Pipeline("Pipeline has no ImagePixelExtractor".to_string()))?;
        let scorer = scorer
            .ok_or_else(|| Error::Pipeline("Pipeline has no TensorFlowScorer".to_string()))?;
        let feature_columns = features
            .ok_or_else(|| Error::Pipeline("Pipeline has no ColumnConcatenator".to_string()))?;
        let trainer = trainer
            .ok_or_else(|| Error::Pipeline("Pipeline has no LinearClassifier".to_string()))?;

        Ok(CompiledPipeline {
            data_location,
            has_header,
            feature_settings: FeatureSettings {
                image_folder: Some(image_folder),
                width: pixels.width,
                height: pixels.height,
                resizing: pixels.resizing,
                use_alpha: pixels.use_alpha,
                interleave: pixels.interleave,
                convert: pixels.convert,
                offset: pixels.offset,
                scale: pixels.scale,
                input_tensor: scorer.input_tensor,
                output_tensors: scorer.output_tensors,
                feature_columns,
            },
            model_file: scorer.model_file,
            trainer,
        })
    }
}

struct PixelExtraction {
    column: String,
    width: u32,
    height: u32,
    resizing: ResizingKind,
    use_alpha: bool,
    interleave: bool,
    convert: bool,
    offset: f32,
    scale: f32,
}

struct ScorerBinding {
    model_file: PathBuf,
    input_tensor: String,
    output_tensors: Vec<String>,
}

fn missing(required: &str, step: &PipelineStep) -> Error {
    Error::Pipeline(format!("{} must come before {}", required, step.name()))
}

fn unknown_column(step: &PipelineStep, column: &str) -> Error {
    Error::Pipeline(format!("{}: unknown column '{}'", step.name(), column))
}

/// 画像から特徴ベクトルを得るまでの設定（モデルと共に保存される）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSettings {
    pub image_folder: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub resizing: ResizingKind,
    pub use_alpha: bool,
    pub interleave: bool,
    pub convert: bool,
    pub offset: f32,
    pub scale: f32,
    pub input_tensor: String,
    pub output_tensors: Vec<String>,
    /// Features 列に連結する出力テンソル（順序どおり）
    pub feature_columns: Vec<String>,
}

impl FeatureSettings {
    pub fn channels(&self) -> usize {
        if self.use_alpha {
            4
        } else {
            3
        }
    }

    /// グラフ入力テンソルの形状
    pub fn input_shape(&self) -> [usize; 4] {
        let (h, w, c) = (self.height as usize, self.width as usize, self.channels());
        if self.interleave {
            [1, h, w, c]
        } else {
            [1, c, h, w]
        }
    }
}

/// 列参照を解決済みのパイプライン
#[derive(Debug, Clone)]
pub struct CompiledPipeline {
    pub data_location: PathBuf,
    pub has_header: bool,
    pub feature_settings: FeatureSettings,
    pub model_file: PathBuf,
    pub trainer: LinearTrainerSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inception() -> LearningPipeline {
        LearningPipeline::inception(
            Path::new("tags.tsv"),
            Path::new("images"),
            Path::new("tensorflow_inception_graph.pb"),
        )
    }

    #[test]
    fn test_inception_step_order() {
        let names: Vec<&str> = inception().steps().iter().map(PipelineStep::name).collect();
        assert_eq!(
            names,
            vec![
                "TextLoader",
                "ImageLoader",
                "ImageResizer",
                "ImagePixelExtractor",
                "TensorFlowScorer",
                "ColumnConcatenator",
                "TextToKeyConverter",
                "LinearClassifier",
            ]
        );
    }

    #[test]
    fn test_compile_inception() {
        let compiled = inception().compile().unwrap();
        let settings = &compiled.feature_settings;

        assert_eq!(compiled.data_location, PathBuf::from("tags.tsv"));
        assert!(!compiled.has_header);
        assert_eq!(settings.input_shape(), [1, 224, 224, 3]);
        assert_eq!(settings.offset, 117.0);
        assert_eq!(settings.input_tensor, "input");
        assert_eq!(settings.output_tensors, vec!["softmax2_pre_activation"]);
        assert_eq!(settings.feature_columns, vec!["softmax2_pre_activation"]);
        assert_eq!(settings.image_folder, Some(PathBuf::from("images")));
    }

    #[test]
    fn test_compile_cifar() {
        let compiled = LearningPipeline::cifar(
            Path::new("images.tsv"),
            Path::new("images"),
            Path::new("frozen_model.pb"),
        )
        .compile()
        .unwrap();

        assert_eq!(compiled.feature_settings.input_shape(), [1, 32, 32, 3]);
        assert_eq!(compiled.feature_settings.input_tensor, "Input");
        assert_eq!(compiled.feature_settings.offset, 0.0);
    }

    #[test]
    fn test_planar_shape() {
        let mut settings = inception().compile().unwrap().feature_settings;
        settings.interleave = false;
        settings.use_alpha = true;
        assert_eq!(settings.input_shape(), [1, 4, 224, 224]);
    }

    #[test]
    fn test_mismatched_scorer_column_fails() {
        let mut pipeline = LearningPipeline::new();
        pipeline
            .add(PipelineStep::TextLoader {
                path: PathBuf::from("tags.tsv"),
                has_header: false,
            })
            .add(PipelineStep::ImageLoader {
                input_column: IMAGE_PATH_COLUMN.to_string(),
                output_column: "ImageReal".to_string(),
                image_folder: PathBuf::from("images"),
            })
            .add(PipelineStep::ImageResizer {
                input_column: "ImageReal".to_string(),
                output_column: "ImageCropped".to_string(),
                width: 32,
                height: 32,
                resizing: ResizingKind::Fill,
            })
            .add(PipelineStep::ImagePixelExtractor {
                input_column: "ImageCropped".to_string(),
                output_column: "input".to_string(),
                use_alpha: false,
                interleave: true,
                convert: true,
                offset: 0.0,
                scale: 1.0,
            })
            .add(PipelineStep::tensorflow_scorer(
                Path::new("model.pb"),
                "Input",
                "Output",
            ));

        let err = pipeline.compile().unwrap_err();
        assert!(err.to_string().contains("unknown column 'Input'"));
    }

    #[test]
    fn test_missing_trainer_fails() {
        let mut pipeline = inception();
        pipeline.steps.pop();
        let err = pipeline.compile().unwrap_err();
        assert!(err.to_string().contains("LinearClassifier"));
    }

    #[test]
    fn test_with_trainer_settings_replaces() {
        let settings = LinearTrainerSettings {
            num_epochs: 3,
            ..Default::default()
        };
        let pipeline = inception().with_trainer_settings(settings.clone());
        assert_eq!(pipeline.steps().len(), 8);
        assert_eq!(pipeline.compile().unwrap().trainer, settings);
    }
}
