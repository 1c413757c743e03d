use std::fmt;

use crate::backend::{AccelBackend, Backend, HostBackend};

static HOST: HostBackend = HostBackend;
static ACCEL: AccelBackend = AccelBackend::new();

/// Placement tag carried by every [`crate::Array`].
///
/// The tag is the only thing dispatch looks at: each variant maps to one
/// process-wide [`Backend`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    /// Sequential kernels on the calling thread.
    #[default]
    Host,
    /// Data-parallel kernels launched on the rayon pool.
    Accelerator,
}

impl Device {
    /// The backend that executes kernels for this placement.
    pub fn backend(&self) -> &'static dyn Backend {
        match self {
            Device::Host => &HOST,
            Device::Accelerator => &ACCEL,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.backend().name())
    }
}
