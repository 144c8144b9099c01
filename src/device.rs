use std::panic;

use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, NdArray, Wgpu},
    tensor::Tensor,
};
use clap::ValueEnum;
use tracing::{info, warn};

/// GPU backend, same element types as the wgpu examples.
pub type GpuBackend = Wgpu<f32, i32>;
/// CPU backend used when no adapter is available.
pub type CpuBackend = NdArray<f32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeviceKind {
    /// GPU when an adapter is found, else CPU
    Auto,
    Gpu,
    Cpu,
}

/// The compute device, decided once at startup.
#[derive(Debug, Clone)]
pub enum ResolvedDevice {
    Gpu(WgpuDevice),
    Cpu(NdArrayDevice),
}

impl ResolvedDevice {
    pub fn resolve(kind: DeviceKind) -> Self {
        Self::resolve_with(kind, gpu_available)
    }

    fn resolve_with(kind: DeviceKind, probe: impl FnOnce() -> bool) -> Self {
        match kind {
            DeviceKind::Cpu => Self::Cpu(NdArrayDevice::Cpu),
            DeviceKind::Auto | DeviceKind::Gpu => {
                if probe() {
                    Self::Gpu(WgpuDevice::default())
                } else {
                    if kind == DeviceKind::Gpu {
                        warn!("no usable GPU adapter, falling back to CPU");
                    } else {
                        info!("no usable GPU adapter, using CPU");
                    }
                    Self::Cpu(NdArrayDevice::Cpu)
                }
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Gpu(_) => "wgpu",
            Self::Cpu(_) => "ndarray (cpu)",
        }
    }
}

/// Runs a one-element tensor round trip on the default wgpu device. Adapter
/// setup failures surface as panics inside burn, so they are caught here.
fn gpu_available() -> bool {
    let hook = panic::take_hook();
    panic::set_hook(Box::new(|_| {}));

    let available = panic::catch_unwind(|| {
        Tensor::<GpuBackend, 1>::ones([1], &WgpuDevice::default()).into_data()
    })
    .is_ok();

    panic::set_hook(hook);
    available
}
