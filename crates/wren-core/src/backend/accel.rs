use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;

use super::{check_scatter_args, Backend, IndexMap, Kernel};
use crate::device::Device;
use crate::dtype::DType;
use crate::error::Result;
use crate::storage::Storage;

/// Accelerator backend: every kernel is one data-parallel launch over the
/// rayon pool.
///
/// Launches are ticketed on a queue shared by all graphs in the process;
/// [`Backend::synchronize`] waits until every issued ticket has retired,
/// which is the fence the graph engine relies on before reading results.
#[derive(Debug)]
pub struct AccelBackend {
    issued: AtomicU64,
    retired: AtomicU64,
}

impl AccelBackend {
    pub const fn new() -> Self {
        AccelBackend {
            issued: AtomicU64::new(0),
            retired: AtomicU64::new(0),
        }
    }

    /// Number of kernels launched so far.
    pub fn launches(&self) -> u64 {
        self.issued.load(Ordering::Acquire)
    }

    fn launch<T>(&self, name: &str, len: usize, body: impl FnOnce() -> T) -> T {
        let ticket = self.issued.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(kernel = name, len, ticket, "accelerator launch");
        // Retires on drop, so a panicking kernel still releases the fence.
        let _retire = Retire(&self.retired);
        body()
    }
}

struct Retire<'a>(&'a AtomicU64);

impl Drop for Retire<'_> {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }
}

impl Default for AccelBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for AccelBackend {
    fn device(&self) -> Device {
        Device::Accelerator
    }

    fn name(&self) -> &'static str {
        "accelerator"
    }

    fn elementwise(
        &self,
        name: &str,
        len: usize,
        dtype: DType,
        kernel: &Kernel<'_>,
    ) -> Result<Storage> {
        Ok(self.launch(name, len, || match dtype {
            DType::F32 => Storage::F32((0..len).into_par_iter().map(|i| kernel(i) as f32).collect()),
            DType::F64 => Storage::F64((0..len).into_par_iter().map(kernel).collect()),
            DType::I32 => Storage::I32((0..len).into_par_iter().map(|i| kernel(i) as i32).collect()),
            DType::I64 => Storage::I64((0..len).into_par_iter().map(|i| kernel(i) as i64).collect()),
        }))
    }

    fn gather(
        &self,
        name: &str,
        input: &Storage,
        len: usize,
        index: &IndexMap<'_>,
    ) -> Result<Storage> {
        Ok(self.launch(name, len, || match input {
            Storage::F32(v) => Storage::F32((0..len).into_par_iter().map(|i| v[index(i)]).collect()),
            Storage::F64(v) => Storage::F64((0..len).into_par_iter().map(|i| v[index(i)]).collect()),
            Storage::I32(v) => Storage::I32((0..len).into_par_iter().map(|i| v[index(i)]).collect()),
            Storage::I64(v) => Storage::I64((0..len).into_par_iter().map(|i| v[index(i)]).collect()),
        }))
    }

    fn scatter_add_rows(
        &self,
        rows: usize,
        cols: usize,
        indices: &[i64],
        src: &Storage,
    ) -> Result<Storage> {
        check_scatter_args(rows, cols, indices, src)?;
        if rows == 0 || cols == 0 {
            return Ok(Storage::from_f64_vec(Vec::new(), src.dtype()));
        }
        let values = src.as_f64();
        let values = values.as_ref();

        // One column per task writes a transposed [cols, rows] buffer, so no
        // two tasks touch the same element.
        let transposed = self.launch("scatter_add_rows", rows * cols, || {
            let mut buf = vec![0.0f64; rows * cols];
            buf.par_chunks_mut(rows).enumerate().for_each(|(c, column)| {
                for (n, &k) in indices.iter().enumerate() {
                    if k >= 0 {
                        column[k as usize] += values[n * cols + c];
                    }
                }
            });
            buf
        });
        let transposed = transposed.as_slice();
        self.elementwise("scatter_add_rows_transpose", rows * cols, src.dtype(), &|i| {
            transposed[(i % cols) * rows + i / cols]
        })
    }

    fn synchronize(&self) -> Result<()> {
        let target = self.issued.load(Ordering::Acquire);
        while self.retired.load(Ordering::Acquire) < target {
            std::thread::yield_now();
        }
        tracing::trace!(retired = target, "accelerator synchronized");
        Ok(())
    }
}
