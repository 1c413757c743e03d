use crate::array::Array;
use crate::backend::Backend;
use crate::device::Device;
use crate::error::{Error, Result};

/// The backend selected for one operator application.
///
/// Resolved from the placement tags of the inputs; every input must share
/// one placement. Functions receive it in `forward`/`backward` and may match
/// on [`Dispatch::device`] to choose a specialised kernel.
#[derive(Debug, Clone, Copy)]
pub struct Dispatch {
    label: &'static str,
    device: Device,
}

impl Dispatch {
    /// Select the backend for `inputs`. With no inputs, `fallback` is used.
    pub fn resolve(label: &'static str, inputs: &[Array], fallback: Device) -> Result<Self> {
        let device = match inputs.first() {
            Some(first) => first.device(),
            None => fallback,
        };
        if let Some(other) = inputs.iter().find(|a| a.device() != device) {
            return Err(Error::BackendMismatch {
                function: label.to_string(),
                expected: device,
                got: other.device(),
            });
        }
        Ok(Dispatch { label, device })
    }

    /// Dispatch for a known placement (used by gradient checks).
    pub fn on(label: &'static str, device: Device) -> Self {
        Dispatch { label, device }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn backend(&self) -> &'static dyn Backend {
        self.device.backend()
    }

    pub fn synchronize(&self) -> Result<()> {
        self.backend().synchronize()
    }

    /// Every array a kernel returns must live on the dispatch placement.
    pub fn check_placement<'a>(&self, arrays: impl IntoIterator<Item = &'a Array>) -> Result<()> {
        for a in arrays {
            if a.device() != self.device {
                return Err(Error::BackendMismatch {
                    function: self.label.to_string(),
                    expected: self.device,
                    got: a.device(),
                });
            }
        }
        Ok(())
    }
}
