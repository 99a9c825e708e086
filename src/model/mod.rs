pub mod model_metadata;
pub mod model_storage;
pub mod config;

pub use model_metadata::ModelMetadata;
pub use model_storage::{save_model_archive, load_metadata, load_model_archive, ModelArchive};
pub use config::{AppConfig, DeviceType, InferenceSettings};
