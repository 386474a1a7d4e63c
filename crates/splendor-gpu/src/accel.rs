//! Accelerator backend selection.
//!
//! Mirrors the native kernel entry points: each call takes packed slot data,
//! a parallel length array, an item count, and an output buffer, and returns
//! zero on success. Backend availability is decided once at startup; the
//! chosen tag drives all later dispatch.

use serde::Serialize;
use tracing::info;

/// Which accelerator, if any, the processor bound at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GpuType {
    None,
    Cuda,
    Opencl,
}

impl GpuType {
    pub fn is_available(self) -> bool {
        self != GpuType::None
    }
}

/// A bound accelerator backend.
///
/// All methods return the kernel status code: zero for success, non-zero for
/// failure (the caller falls back to the CPU path).
pub trait Accelerator: Send + Sync {
    fn gpu_type(&self) -> GpuType;
    fn device_count(&self) -> usize;

    fn process_hashes(&self, data: &[u8], lengths: &[u32], count: usize, out: &mut [u8]) -> i32;
    fn verify_signatures(
        &self,
        signatures: &[u8],
        messages: &[u8],
        keys: &[u8],
        count: usize,
        out: &mut [u8],
    ) -> i32;
    fn process_transactions(
        &self,
        data: &[u8],
        lengths: &[u32],
        count: usize,
        out: &mut [u8],
    ) -> i32;
}

/// Probe for an accelerator, trying the preferred backend first.
///
/// Returns `None` when neither backend initialises, in which case every batch
/// runs on the CPU implementations.
pub fn probe(prefer_cuda: bool) -> Option<Box<dyn Accelerator>> {
    let order: [fn() -> Option<Box<dyn Accelerator>>; 2] = if prefer_cuda {
        [probe_cuda, probe_opencl]
    } else {
        [probe_opencl, probe_cuda]
    };

    for attempt in order {
        if let Some(backend) = attempt() {
            info!(
                gpu_type = ?backend.gpu_type(),
                devices = backend.device_count(),
                "GPU acceleration enabled"
            );
            return Some(backend);
        }
    }
    None
}

#[cfg(feature = "cuda")]
fn probe_cuda() -> Option<Box<dyn Accelerator>> {
    cuda::CudaBackend::init().map(|b| Box::new(b) as Box<dyn Accelerator>)
}

#[cfg(not(feature = "cuda"))]
fn probe_cuda() -> Option<Box<dyn Accelerator>> {
    None
}

#[cfg(feature = "opencl")]
fn probe_opencl() -> Option<Box<dyn Accelerator>> {
    opencl::OpenClBackend::init().map(|b| Box::new(b) as Box<dyn Accelerator>)
}

#[cfg(not(feature = "opencl"))]
fn probe_opencl() -> Option<Box<dyn Accelerator>> {
    None
}

#[cfg(feature = "cuda")]
mod cuda {
    use super::{Accelerator, GpuType};
    use std::ffi::c_void;

    extern "C" {
        fn cuda_init_device() -> i32;
        fn cuda_process_hashes(
            hashes: *const c_void,
            lengths: *const c_void,
            count: i32,
            results: *mut c_void,
        ) -> i32;
        fn cuda_verify_signatures(
            sigs: *const c_void,
            msgs: *const c_void,
            keys: *const c_void,
            count: i32,
            results: *mut c_void,
        ) -> i32;
        fn cuda_process_transactions(
            txs: *const c_void,
            lengths: *const c_void,
            count: i32,
            results: *mut c_void,
        ) -> i32;
    }

    pub struct CudaBackend {
        devices: usize,
    }

    impl CudaBackend {
        pub fn init() -> Option<Self> {
            let devices = unsafe { cuda_init_device() };
            (devices > 0).then(|| Self { devices: devices as usize })
        }
    }

    impl Accelerator for CudaBackend {
        fn gpu_type(&self) -> GpuType {
            GpuType::Cuda
        }

        fn device_count(&self) -> usize {
            self.devices
        }

        fn process_hashes(
            &self,
            data: &[u8],
            lengths: &[u32],
            count: usize,
            out: &mut [u8],
        ) -> i32 {
            unsafe {
                cuda_process_hashes(
                    data.as_ptr() as *const c_void,
                    lengths.as_ptr() as *const c_void,
                    count as i32,
                    out.as_mut_ptr() as *mut c_void,
                )
            }
        }

        fn verify_signatures(
            &self,
            signatures: &[u8],
            messages: &[u8],
            keys: &[u8],
            count: usize,
            out: &mut [u8],
        ) -> i32 {
            unsafe {
                cuda_verify_signatures(
                    signatures.as_ptr() as *const c_void,
                    messages.as_ptr() as *const c_void,
                    keys.as_ptr() as *const c_void,
                    count as i32,
                    out.as_mut_ptr() as *mut c_void,
                )
            }
        }

        fn process_transactions(
            &self,
            data: &[u8],
            lengths: &[u32],
            count: usize,
            out: &mut [u8],
        ) -> i32 {
            unsafe {
                cuda_process_transactions(
                    data.as_ptr() as *const c_void,
                    lengths.as_ptr() as *const c_void,
                    count as i32,
                    out.as_mut_ptr() as *mut c_void,
                )
            }
        }
    }
}

#[cfg(feature = "opencl")]
mod opencl {
    use super::{Accelerator, GpuType};
    use std::ffi::c_void;

    extern "C" {
        fn initOpenCL() -> i32;
        fn processHashesOpenCL(
            hashes: *const c_void,
            lengths: *const c_void,
            count: i32,
            results: *mut c_void,
        ) -> i32;
        fn verifySignaturesOpenCL(
            signatures: *const c_void,
            messages: *const c_void,
            keys: *const c_void,
            count: i32,
            results: *mut c_void,
        ) -> i32;
        fn processTxBatchOpenCL(
            tx_data: *const c_void,
            lengths: *const c_void,
            count: i32,
            results: *mut c_void,
        ) -> i32;
    }

    pub struct OpenClBackend {
        devices: usize,
    }

    impl OpenClBackend {
        pub fn init() -> Option<Self> {
            let devices = unsafe { initOpenCL() };
            (devices > 0).then(|| Self { devices: devices as usize })
        }
    }

    impl Accelerator for OpenClBackend {
        fn gpu_type(&self) -> GpuType {
            GpuType::Opencl
        }

        fn device_count(&self) -> usize {
            self.devices
        }

        fn process_hashes(
            &self,
            data: &[u8],
            lengths: &[u32],
            count: usize,
            out: &mut [u8],
        ) -> i32 {
            unsafe {
                processHashesOpenCL(
                    data.as_ptr() as *const c_void,
                    lengths.as_ptr() as *const c_void,
                    count as i32,
                    out.as_mut_ptr() as *mut c_void,
                )
            }
        }

        fn verify_signatures(
            &self,
            signatures: &[u8],
            messages: &[u8],
            keys: &[u8],
            count: usize,
            out: &mut [u8],
        ) -> i32 {
            unsafe {
                verifySignaturesOpenCL(
                    signatures.as_ptr() as *const c_void,
                    messages.as_ptr() as *const c_void,
                    keys.as_ptr() as *const c_void,
                    count as i32,
                    out.as_mut_ptr() as *mut c_void,
                )
            }
        }

        fn process_transactions(
            &self,
            data: &[u8],
            lengths: &[u32],
            count: usize,
            out: &mut [u8],
        ) -> i32 {
            unsafe {
                processTxBatchOpenCL(
                    data.as_ptr() as *const c_void,
                    lengths.as_ptr() as *const c_void,
                    count as i32,
                    out.as_mut_ptr() as *mut c_void,
                )
            }
        }
    }
}
