//! 特徴ベクトル上の線形多クラス分類器
//!
//! 凍結グラフから得た特徴ベクトルを入力に、ラベルごとのスコアを出力する
//! 1層の全結合モデルです（softmax回帰）。

use burn::{
    config::Config,
    module::Module,
    nn::{loss::CrossEntropyLossConfig, Initializer, Linear, LinearConfig},
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};

/// モデル設定
#[derive(Config, Debug)]
pub struct LinearClassifierConfig {
    /// 特徴次元
    pub num_features: usize,
    /// 分類クラス数
    pub num_classes: usize,
}

impl LinearClassifierConfig {
    /// モデルを初期化
    ///
    /// 重みはゼロで初期化します（凸問題なので乱数シードに依存させない）。
    pub fn init<B: Backend>(&self, device: &B::Device) -> LinearClassifier<B> {
        tracing::debug!(
            "[Model] Linear: {} -> {}",
            self.num_features,
            self.num_classes
        );

        LinearClassifier {
            linear: LinearConfig::new(self.num_features, self.num_classes)
                .with_initializer(Initializer::Zeros)
                .init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct LinearClassifier<B: Backend> {
    linear: Linear<B>,
}

impl<B: Backend> LinearClassifier<B> {
    /// 順伝播
    ///
    /// - `features`: [batch_size, num_features]
    /// - 戻り値: クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        self.linear.forward(features)
    }

    /// 入力次元
    pub fn num_features(&self) -> usize {
        self.linear.weight.val().dims()[0]
    }

    /// クラスごとの確率 [batch_size, num_classes]
    pub fn probabilities(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        softmax(self.forward(features), 1)
    }

    /// 順伝播と損失計算（学習用）
    pub fn forward_classification(
        &self,
        features: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(features);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_zero_initialized_model_is_uniform() {
        let device = Default::default();
        let model = LinearClassifierConfig::new(4, 3).init::<TestBackend>(&device);

        let features = Tensor::<TestBackend, 1>::from_floats([1.0, 2.0, 3.0, 4.0], &device)
            .reshape([1, 4]);
        let probs = model
            .probabilities(features)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        assert_eq!(model.num_features(), 4);
        assert_eq!(probs.len(), 3);
        for p in probs {
            assert!((p - 1.0 / 3.0).abs() < 1e-5);
        }
    }
}
