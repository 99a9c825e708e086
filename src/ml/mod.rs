pub mod linear;
pub mod features;
pub mod training;
pub mod prediction;
pub mod evaluation;

pub use linear::{LinearClassifier, LinearClassifierConfig};
pub use features::{FeatureExtractor, FrozenGraph};
pub use training::{train_linear_classifier, EpochMetrics, FeatureBatch, FeatureBatcher};
pub use prediction::{ImageNetPrediction, PredictionModel};
pub use evaluation::{get_label, ClassificationMetrics, ImageNetDataProbability, ModelEvaluator};
