// ============================================================
// Layer 6 — Device Selection
// ============================================================
// Parses the --device flag into a DeviceSpec. The application
// layer matches on it once and picks the Burn backend:
//
//   cpu    → Autodiff<NdArray>, NdArrayDevice::Cpu
//   gpu    → Autodiff<Wgpu>,    WgpuDevice::default()
//   gpu:N  → Autodiff<Wgpu>,    WgpuDevice::DiscreteGpu(N)
//
// Evaluation uses the same backends without Autodiff.

use std::{fmt, str::FromStr};

use burn::backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu};
use serde::{Deserialize, Serialize};

use crate::domain::error::FlowError;

pub type CpuBackend      = NdArray<f32>;
pub type GpuBackend      = Wgpu;
pub type CpuTrainBackend = Autodiff<CpuBackend>;
pub type GpuTrainBackend = Autodiff<GpuBackend>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceSpec {
    Cpu,
    /// `None` lets wgpu pick the default adapter
    Gpu(Option<usize>),
}

impl DeviceSpec {
    pub fn ndarray(&self) -> NdArrayDevice {
        NdArrayDevice::Cpu
    }

    pub fn wgpu(&self) -> WgpuDevice {
        match self {
            DeviceSpec::Gpu(Some(index)) => WgpuDevice::DiscreteGpu(*index),
            _                            => WgpuDevice::default(),
        }
    }
}

impl Default for DeviceSpec {
    fn default() -> Self {
        DeviceSpec::Gpu(None)
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Cpu            => write!(f, "cpu"),
            DeviceSpec::Gpu(None)      => write!(f, "gpu"),
            DeviceSpec::Gpu(Some(idx)) => write!(f, "gpu:{idx}"),
        }
    }
}

impl FromStr for DeviceSpec {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "cpu"          => return Ok(DeviceSpec::Cpu),
            "gpu" | "cuda" => return Ok(DeviceSpec::Gpu(None)),
            _              => {}
        }
        let index = lower
            .strip_prefix("gpu:")
            .or_else(|| lower.strip_prefix("cuda:"))
            .and_then(|n| n.parse::<usize>().ok());
        match index {
            Some(i) => Ok(DeviceSpec::Gpu(Some(i))),
            None    => Err(FlowError::config(
                "device",
                format!("'{s}' is not one of cpu, gpu, gpu:N"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device() {
        assert_eq!("cpu".parse::<DeviceSpec>().unwrap(), DeviceSpec::Cpu);
        assert_eq!("GPU".parse::<DeviceSpec>().unwrap(), DeviceSpec::Gpu(None));
        assert_eq!("gpu:1".parse::<DeviceSpec>().unwrap(), DeviceSpec::Gpu(Some(1)));
        assert_eq!("cuda:0".parse::<DeviceSpec>().unwrap(), DeviceSpec::Gpu(Some(0)));
    }

    #[test]
    fn test_reject_unknown_device() {
        let err = "tpu".parse::<DeviceSpec>().unwrap_err();
        assert!(err.is_config());
        assert!("gpu:x".parse::<DeviceSpec>().is_err());
    }

    #[test]
    fn test_display_round_trips() {
        for spec in [DeviceSpec::Cpu, DeviceSpec::Gpu(None), DeviceSpec::Gpu(Some(3))] {
            assert_eq!(spec.to_string().parse::<DeviceSpec>().unwrap(), spec);
        }
    }
}
