//! 計算バックエンドの選択
//!
//! 既定はCPU (NdArray)。`wgpu` フィーチャ有効時はWGPUを使用します。

use burn::tensor::backend::Backend;

use crate::model::DeviceType;

#[cfg(not(feature = "wgpu"))]
pub type InferenceBackend = burn_ndarray::NdArray;

#[cfg(feature = "wgpu")]
pub type InferenceBackend = burn_wgpu::Wgpu;

/// 学習用（自動微分付き）バックエンド
pub type TrainingBackend = burn_autodiff::Autodiff<InferenceBackend>;

pub type Device = <InferenceBackend as Backend>::Device;

/// 設定のデバイス種別からデバイスを決定
#[cfg(not(feature = "wgpu"))]
pub fn device_for(device_type: &DeviceType) -> Device {
    if *device_type == DeviceType::Wgpu {
        tracing::warn!("wgpu feature is disabled, falling back to CPU (NdArray)");
    }
    burn_ndarray::NdArrayDevice::Cpu
}

#[cfg(feature = "wgpu")]
pub fn device_for(device_type: &DeviceType) -> Device {
    match device_type {
        DeviceType::Wgpu => burn_wgpu::WgpuDevice::DiscreteGpu(0),
        DeviceType::Cpu => burn_wgpu::WgpuDevice::Cpu,
    }
}

pub fn backend_name() -> &'static str {
    #[cfg(feature = "wgpu")]
    {
        "WGPU"
    }
    #[cfg(not(feature = "wgpu"))]
    {
        "CPU (NdArray)"
    }
}
