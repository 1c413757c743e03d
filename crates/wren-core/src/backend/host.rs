use super::{check_scatter_args, Backend, IndexMap, Kernel};
use crate::device::Device;
use crate::dtype::DType;
use crate::error::Result;
use crate::storage::Storage;

/// Sequential kernels executed on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostBackend;

impl Backend for HostBackend {
    fn device(&self) -> Device {
        Device::Host
    }

    fn name(&self) -> &'static str {
        "host"
    }

    fn elementwise(
        &self,
        name: &str,
        len: usize,
        dtype: DType,
        kernel: &Kernel<'_>,
    ) -> Result<Storage> {
        tracing::trace!(kernel = name, len, "host launch");
        Ok(match dtype {
            DType::F32 => Storage::F32((0..len).map(|i| kernel(i) as f32).collect()),
            DType::F64 => Storage::F64((0..len).map(kernel).collect()),
            DType::I32 => Storage::I32((0..len).map(|i| kernel(i) as i32).collect()),
            DType::I64 => Storage::I64((0..len).map(|i| kernel(i) as i64).collect()),
        })
    }

    fn gather(
        &self,
        name: &str,
        input: &Storage,
        len: usize,
        index: &IndexMap<'_>,
    ) -> Result<Storage> {
        tracing::trace!(kernel = name, len, "host gather");
        Ok(match input {
            Storage::F32(v) => Storage::F32((0..len).map(|i| v[index(i)]).collect()),
            Storage::F64(v) => Storage::F64((0..len).map(|i| v[index(i)]).collect()),
            Storage::I32(v) => Storage::I32((0..len).map(|i| v[index(i)]).collect()),
            Storage::I64(v) => Storage::I64((0..len).map(|i| v[index(i)]).collect()),
        })
    }

    fn scatter_add_rows(
        &self,
        rows: usize,
        cols: usize,
        indices: &[i64],
        src: &Storage,
    ) -> Result<Storage> {
        check_scatter_args(rows, cols, indices, src)?;
        let values = src.as_f64();
        let mut out = vec![0.0f64; rows * cols];
        for (n, &k) in indices.iter().enumerate() {
            if k < 0 {
                continue;
            }
            let dst = k as usize * cols;
            for c in 0..cols {
                out[dst + c] += values[n * cols + c];
            }
        }
        Ok(Storage::from_f64_vec(out, src.dtype()))
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }
}
