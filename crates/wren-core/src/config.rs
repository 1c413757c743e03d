use crate::device::Device;

/// Per-graph behaviour switches.
///
/// ```
/// use wren_core::{Device, GraphConfig};
///
/// let config = GraphConfig::default()
///     .with_retain_grad(false)
///     .with_device(Device::Accelerator);
/// assert!(config.type_check);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct GraphConfig {
    /// Run each function's input checks before its kernels (default: true).
    pub type_check: bool,
    /// Keep gradients on intermediate Variables after backward (default: true).
    /// Leaves always keep theirs.
    pub retain_grad: bool,
    /// Placement used by functions that take no array inputs (default: Host).
    pub default_device: Device,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            type_check: true,
            retain_grad: true,
            default_device: Device::Host,
        }
    }
}

impl GraphConfig {
    pub fn with_type_check(mut self, type_check: bool) -> Self {
        self.type_check = type_check;
        self
    }

    pub fn with_retain_grad(mut self, retain_grad: bool) -> Self {
        self.retain_grad = retain_grad;
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.default_device = device;
        self
    }
}
