//! Host accelerator discovery for the local backend.

use std::env::consts;

use cutout_kernel::{ComputeDevice, Device};

/// Operating system of the host machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OsClassification {
    MacOS,
    Windows,
    Linux,
    Other(String),
}

/// Accelerators found on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAccelerators {
    pub os: OsClassification,
    /// NVIDIA GPU reported by `nvidia-smi`.
    pub cuda: bool,
    /// AMD GPU reported by `rocm-smi`.
    pub rocm: bool,
    pub metal: bool,
}

impl HostAccelerators {
    pub fn cpu_only() -> Self {
        Self {
            os: current_os(),
            cuda: false,
            rocm: false,
            metal: false,
        }
    }

    /// Best device available, in order CUDA, ROCm, Metal, CPU.
    pub fn best(&self) -> ComputeDevice {
        if self.cuda {
            ComputeDevice::Cuda
        } else if self.rocm {
            ComputeDevice::Rocm
        } else if self.metal {
            ComputeDevice::Metal
        } else {
            ComputeDevice::Cpu
        }
    }

    /// Map a configured device onto this host.
    pub fn resolve(&self, requested: Device) -> Result<ComputeDevice, String> {
        match requested {
            Device::Auto => Ok(self.best()),
            Device::Cpu => Ok(ComputeDevice::Cpu),
            Device::Cuda if self.cuda => Ok(ComputeDevice::Cuda),
            Device::Cuda => Err("CUDA requested but no NVIDIA GPU was detected".to_string()),
        }
    }
}

fn current_os() -> OsClassification {
    match consts::OS {
        "macos" => OsClassification::MacOS,
        "windows" => OsClassification::Windows,
        "linux" => OsClassification::Linux,
        other => OsClassification::Other(other.to_string()),
    }
}

/// Probe the host. Spawns the vendor tools, so call it off the async executor.
pub fn detect_accelerators() -> HostAccelerators {
    let os = current_os();
    match os {
        // Metal is available on every Mac this runs on, Intel or Apple Silicon.
        OsClassification::MacOS => HostAccelerators {
            os,
            cuda: false,
            rocm: false,
            metal: true,
        },
        OsClassification::Windows | OsClassification::Linux => {
            let cuda = check_nvidia_gpu();
            let rocm = !cuda && check_amd_gpu();
            HostAccelerators {
                os,
                cuda,
                rocm,
                metal: false,
            }
        }
        OsClassification::Other(_) => HostAccelerators {
            os,
            cuda: false,
            rocm: false,
            metal: false,
        },
    }
}

/// `nvidia-smi` must list an actual device, not merely exist.
fn check_nvidia_gpu() -> bool {
    std::process::Command::new("nvidia-smi")
        .arg("--query-gpu=name")
        .arg("--format=csv,noheader")
        .output()
        .map(|output| output.status.success() && !output.stdout.is_empty())
        .unwrap_or(false)
}

fn check_amd_gpu() -> bool {
    std::process::Command::new("rocm-smi")
        .arg("--showid")
        .output()
        .map(|output| output.status.success() && !output.stdout.is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(cuda: bool, rocm: bool, metal: bool) -> HostAccelerators {
        HostAccelerators {
            os: OsClassification::Linux,
            cuda,
            rocm,
            metal,
        }
    }

    #[test]
    fn auto_prefers_cuda_then_rocm_then_metal() {
        assert_eq!(host(true, true, true).resolve(Device::Auto), Ok(ComputeDevice::Cuda));
        assert_eq!(host(false, true, true).resolve(Device::Auto), Ok(ComputeDevice::Rocm));
        assert_eq!(host(false, false, true).resolve(Device::Auto), Ok(ComputeDevice::Metal));
        assert_eq!(host(false, false, false).resolve(Device::Auto), Ok(ComputeDevice::Cpu));
    }

    #[test]
    fn explicit_cuda_without_gpu_is_an_error() {
        let err = host(false, true, false).resolve(Device::Cuda).unwrap_err();
        assert!(err.contains("CUDA"));
        assert_eq!(host(true, false, false).resolve(Device::Cuda), Ok(ComputeDevice::Cuda));
    }

    #[test]
    fn cpu_is_always_available() {
        assert_eq!(HostAccelerators::cpu_only().resolve(Device::Cpu), Ok(ComputeDevice::Cpu));
        assert_eq!(HostAccelerators::cpu_only().best(), ComputeDevice::Cpu);
    }

    #[test]
    fn detect_accelerators_matches_host_os() {
        let detected = detect_accelerators();
        assert_eq!(detected.os, current_os());
    }
}
