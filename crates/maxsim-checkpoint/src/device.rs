//! Compute device selection.
//!
//! The device is an explicit construction input, resolved exactly once and
//! never changed for the adapter's lifetime. There is no process-wide
//! default device: an absent accelerator index means CPU, and a CUDA
//! request that cannot be satisfied is an error, never a silent downgrade.

use std::fmt;

use candle_core::Device;

use crate::error::{CheckpointError, CheckpointResult};

/// Requested compute target for the model weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceRequest {
    /// Host CPU. The default when no accelerator index is given.
    #[default]
    Cpu,

    /// CUDA accelerator by ordinal index. Binding needs the crate built
    /// with the `cuda` feature so candle carries its CUDA backend.
    Cuda(usize),
}

impl DeviceRequest {
    /// Map an optional accelerator index onto a request.
    pub fn from_index(index: Option<usize>) -> Self {
        match index {
            Some(i) => DeviceRequest::Cuda(i),
            None => DeviceRequest::Cpu,
        }
    }

    /// True for accelerator targets.
    pub fn is_accelerator(&self) -> bool {
        matches!(self, DeviceRequest::Cuda(_))
    }

    /// Accelerator ordinal, if any.
    pub fn index(&self) -> Option<usize> {
        match self {
            DeviceRequest::Cpu => None,
            DeviceRequest::Cuda(i) => Some(*i),
        }
    }

    /// Resolve the request into a live candle device.
    ///
    /// # Errors
    /// Returns `CheckpointError::DeviceUnavailable` when the requested CUDA
    /// ordinal does not exist or the build lacks the `cuda` feature. A
    /// failed accelerator request never falls back to CPU.
    pub fn resolve(&self) -> CheckpointResult<Device> {
        match self {
            DeviceRequest::Cpu => {
                tracing::debug!("Using CPU device");
                Ok(Device::Cpu)
            }
            DeviceRequest::Cuda(index) => {
                let device = Device::new_cuda(*index).map_err(|e| {
                    CheckpointError::DeviceUnavailable {
                        request: self.to_string(),
                        message: e.to_string(),
                    }
                })?;
                tracing::info!(index = *index, "Initialized CUDA device");
                Ok(device)
            }
        }
    }
}

impl fmt::Display for DeviceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRequest::Cpu => write!(f, "cpu"),
            DeviceRequest::Cuda(index) => write!(f, "cuda:{}", index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_request_is_cpu() {
        assert_eq!(DeviceRequest::default(), DeviceRequest::Cpu);
    }

    #[test]
    fn test_from_index_none_is_cpu() {
        assert_eq!(DeviceRequest::from_index(None), DeviceRequest::Cpu);
    }

    #[test]
    fn test_from_index_some_is_cuda() {
        assert_eq!(DeviceRequest::from_index(Some(2)), DeviceRequest::Cuda(2));
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(DeviceRequest::Cpu.to_string(), "cpu");
        assert_eq!(DeviceRequest::Cuda(0).to_string(), "cuda:0");
        assert_eq!(DeviceRequest::Cuda(2).to_string(), "cuda:2");
    }

    #[test]
    fn test_index_accessor() {
        assert_eq!(DeviceRequest::Cpu.index(), None);
        assert_eq!(DeviceRequest::Cuda(3).index(), Some(3));
        assert!(!DeviceRequest::Cpu.is_accelerator());
        assert!(DeviceRequest::Cuda(0).is_accelerator());
    }

    #[test]
    fn test_resolve_cpu_yields_cpu_device() {
        let device = DeviceRequest::Cpu.resolve().unwrap();
        assert!(matches!(device, Device::Cpu));
    }

    #[test]
    fn test_resolve_cuda_binds_or_errors_never_falls_back() {
        // On hosts without the requested accelerator this must surface
        // DeviceUnavailable; it must never hand back a CPU device.
        match DeviceRequest::Cuda(2).resolve() {
            Ok(device) => assert!(device.is_cuda()),
            Err(CheckpointError::DeviceUnavailable { request, .. }) => {
                assert_eq!(request, "cuda:2");
            }
            Err(other) => panic!("expected DeviceUnavailable, got {:?}", other),
        }
    }
}
