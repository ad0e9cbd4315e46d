use anyhow::{anyhow, Result};
use candle_core::Device;
use tracing::info;

use ragidx_core::config::DeviceKind;

/// Resolves the configured device. `Auto` prefers an accelerator compiled
/// into this build and falls back to the CPU.
pub fn select_device(kind: DeviceKind) -> Result<Device> {
    let device = match kind {
        DeviceKind::Cpu => Device::Cpu,
        DeviceKind::Metal => Device::new_metal(0)
            .map_err(|e| anyhow!("Failed to initialize Metal device: {}", e))?,
        DeviceKind::Cuda => Device::new_cuda(0)
            .map_err(|e| anyhow!("Failed to initialize CUDA device: {}", e))?,
        DeviceKind::Auto => auto_device(),
    };
    info!(device = device_label(&device), "selected compute device");
    Ok(device)
}

fn auto_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(dev) = Device::new_cuda(0) {
            return dev;
        }
    }
    #[cfg(feature = "metal")]
    {
        if let Ok(dev) = Device::new_metal(0) {
            return dev;
        }
    }
    Device::Cpu
}

pub fn device_label(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}
