//! 画像 → 特徴ベクトル
//!
//! 画像読み込み・リサイズ・画素抽出の後、凍結グラフ（TensorFlow .pb）を
//! 実行して指定した出力テンソルを連結します。

use std::io::Cursor;
use std::path::Path;

use image::{imageops::FilterType, DynamicImage, GenericImageView, RgbaImage};
use tract_tensorflow::prelude::*;

use crate::dataset::ImageNetData;
use crate::error::{Error, Result};
use crate::pipeline::{FeatureSettings, ResizingKind};

/// 画像をネットワーク入力サイズに変形する
pub fn resize_image(img: &DynamicImage, width: u32, height: u32, resizing: ResizingKind) -> DynamicImage {
    match resizing {
        ResizingKind::IsoCrop => img.resize_to_fill(width, height, FilterType::Triangle),
        ResizingKind::Fill => img.resize_exact(width, height, FilterType::Triangle),
        ResizingKind::IsoPad => {
            let fitted = img.resize(width, height, FilterType::Triangle);
            let (fw, fh) = fitted.dimensions();
            let mut canvas = RgbaImage::from_pixel(width, height, image::Rgba([0, 0, 0, 255]));
            let x = (width.saturating_sub(fw) / 2) as i64;
            let y = (height.saturating_sub(fh) / 2) as i64;
            image::imageops::overlay(&mut canvas, &fitted.to_rgba8(), x, y);
            DynamicImage::ImageRgba8(canvas)
        }
    }
}

/// 画素値を取り出して正規化する: `(pixel - offset) * scale`
///
/// チャネル順は R, G, B（`use_alpha` の場合は A, R, G, B）。
/// `interleave` なら (高さ, 幅, チャネル)、そうでなければ (チャネル, 高さ, 幅) の順で平坦化します。
pub fn extract_pixels(img: &DynamicImage, settings: &FeatureSettings) -> Vec<f32> {
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    let channel_order: &[usize] = if settings.use_alpha { &[3, 0, 1, 2] } else { &[0, 1, 2] };

    let normalize = |v: u8| -> f32 {
        if settings.convert {
            (v as f32 - settings.offset) * settings.scale
        } else {
            v as f32
        }
    };

    let mut data = Vec::with_capacity(channel_order.len() * (width * height) as usize);

    if settings.interleave {
        for y in 0..height {
            for x in 0..width {
                let pixel = rgba.get_pixel(x, y);
                for &c in channel_order {
                    data.push(normalize(pixel[c]));
                }
            }
        }
    } else {
        for &c in channel_order {
            for y in 0..height {
                for x in 0..width {
                    data.push(normalize(rgba.get_pixel(x, y)[c]));
                }
            }
        }
    }

    data
}

/// 読み込み済みの凍結グラフ
pub struct FrozenGraph {
    model: TypedModel,
    input_shape: [usize; 4],
    output_names: Vec<String>,
}

impl FrozenGraph {
    /// .pb のバイト列からグラフを構築する
    ///
    /// テンソル名が誤っている場合はここでエラーになります。
    pub fn from_bytes(
        bytes: &[u8],
        input_name: &str,
        output_names: &[String],
        input_shape: [usize; 4],
    ) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let model = tract_tensorflow::tensorflow()
            .model_for_read(&mut cursor)?
            .with_input_names([input_name])?
            .with_output_names(output_names)?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(
                    input_shape[0],
                    input_shape[1],
                    input_shape[2],
                    input_shape[3]
                )),
            )?
            .into_optimized()?;

        tracing::debug!(
            "Frozen graph ready: input '{}' {:?}, outputs {:?}",
            input_name,
            input_shape,
            output_names
        );

        Ok(Self {
            model,
            input_shape,
            output_names: output_names.to_vec(),
        })
    }

    /// 1回実行して出力テンソルを (名前, 平坦化した値) で返す
    ///
    /// 実行計画は呼び出しごとに作成し、終了時に破棄します。
    pub fn run(&self, input: &[f32]) -> Result<Vec<(String, Vec<f32>)>> {
        let tensor = Tensor::from_shape::<f32>(&self.input_shape, input)?;
        let plan = self.model.clone().into_runnable()?;
        let outputs = plan.run(tvec!(tensor.into()))?;

        if outputs.len() != self.output_names.len() {
            return Err(Error::Model(format!(
                "Graph produced {} outputs, expected {}",
                outputs.len(),
                self.output_names.len()
            )));
        }

        self.output_names
            .iter()
            .zip(outputs.iter())
            .map(|(name, value)| -> Result<(String, Vec<f32>)> {
                let values: Vec<f32> = value.to_array_view::<f32>()?.iter().copied().collect();
                Ok((name.clone(), values))
            })
            .collect()
    }
}

/// 画像ファイルから特徴ベクトルを作る
pub struct FeatureExtractor {
    settings: FeatureSettings,
    graph: FrozenGraph,
    graph_bytes: Vec<u8>,
}

impl FeatureExtractor {
    pub fn load(settings: FeatureSettings, model_file: &Path) -> Result<Self> {
        if !model_file.exists() {
            return Err(Error::MissingFile {
                path: model_file.to_path_buf(),
            });
        }
        let graph_bytes = std::fs::read(model_file)?;
        Self::from_bytes(settings, graph_bytes)
    }

    pub fn from_bytes(settings: FeatureSettings, graph_bytes: Vec<u8>) -> Result<Self> {
        let graph = FrozenGraph::from_bytes(
            &graph_bytes,
            &settings.input_tensor,
            &settings.output_tensors,
            settings.input_shape(),
        )?;

        Ok(Self {
            settings,
            graph,
            graph_bytes,
        })
    }

    pub fn settings(&self) -> &FeatureSettings {
        &self.settings
    }

    /// 画像フォルダを差し替える（学習時と別の場所で推論する場合）
    pub fn set_image_folder(&mut self, folder: Option<std::path::PathBuf>) {
        self.settings.image_folder = folder;
    }

    /// モデル保存用の凍結グラフのバイト列
    pub fn graph_bytes(&self) -> &[u8] {
        &self.graph_bytes
    }

    /// サンプルの画像パスを解決する（画像フォルダ基準）
    fn resolve(&self, sample: &ImageNetData) -> std::path::PathBuf {
        match &self.settings.image_folder {
            Some(folder) => folder.join(&sample.image_path),
            None => sample.image_path.clone(),
        }
    }

    /// 画像読み込み → リサイズ → 画素抽出 → グラフ実行 → 連結
    pub fn extract(&self, sample: &ImageNetData) -> Result<Vec<f32>> {
        let path = self.resolve(sample);
        let img = image::open(&path)?;
        self.extract_image(&img)
    }

    pub fn extract_image(&self, img: &DynamicImage) -> Result<Vec<f32>> {
        let s = &self.settings;
        let resized = resize_image(img, s.width, s.height, s.resizing);
        let pixels = extract_pixels(&resized, s);
        let outputs = self.graph.run(&pixels)?;
        concatenate(&outputs, &s.feature_columns)
    }
}

/// 名前付きの出力を指定順に連結する
pub fn concatenate(outputs: &[(String, Vec<f32>)], columns: &[String]) -> Result<Vec<f32>> {
    let mut features = Vec::new();
    for column in columns {
        let (_, values) = outputs
            .iter()
            .find(|(name, _)| name == column)
            .ok_or_else(|| Error::Pipeline(format!("Column '{}' was not produced", column)))?;
        features.extend_from_slice(values);
    }
    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::LearningPipeline;
    use image::{Rgb, RgbImage};

    fn settings(width: u32, height: u32) -> FeatureSettings {
        let mut settings = LearningPipeline::inception(
            Path::new("tags.tsv"),
            Path::new("images"),
            Path::new("model.pb"),
        )
        .compile()
        .unwrap()
        .feature_settings;
        settings.width = width;
        settings.height = height;
        settings
    }

    fn two_pixel_image() -> DynamicImage {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([117, 118, 119]));
        img.put_pixel(1, 0, Rgb([0, 10, 20]));
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_extract_interleaved_with_offset() {
        let data = extract_pixels(&two_pixel_image(), &settings(2, 1));
        assert_eq!(data, vec![0.0, 1.0, 2.0, -117.0, -107.0, -97.0]);
    }

    #[test]
    fn test_extract_planar() {
        let mut s = settings(2, 1);
        s.interleave = false;
        s.offset = 0.0;
        s.scale = 0.5;
        let data = extract_pixels(&two_pixel_image(), &s);
        assert_eq!(data, vec![58.5, 0.0, 59.0, 5.0, 59.5, 10.0]);
    }

    #[test]
    fn test_extract_with_alpha_first() {
        let mut s = settings(2, 1);
        s.use_alpha = true;
        s.convert = false;
        let data = extract_pixels(&two_pixel_image(), &s);
        assert_eq!(data.len(), 8);
        assert_eq!(&data[..4], &[255.0, 117.0, 118.0, 119.0]);
    }

    #[test]
    fn test_resize_kinds_hit_target_size() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(64, 32));
        for kind in [ResizingKind::IsoCrop, ResizingKind::IsoPad, ResizingKind::Fill] {
            let resized = resize_image(&img, 16, 16, kind);
            assert_eq!(resized.dimensions(), (16, 16), "{:?}", kind);
        }
    }

    #[test]
    fn test_concatenate_in_column_order() {
        let outputs = vec![
            ("a".to_string(), vec![1.0, 2.0]),
            ("b".to_string(), vec![3.0]),
        ];
        let features = concatenate(&outputs, &["b".to_string(), "a".to_string()]).unwrap();
        assert_eq!(features, vec![3.0, 1.0, 2.0]);

        assert!(concatenate(&outputs, &["c".to_string()]).is_err());
    }

    #[test]
    fn test_missing_graph_file() {
        let err = FeatureExtractor::load(settings(2, 1), Path::new("/nonexistent/model.pb"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::MissingFile { .. }));
    }
}
