use std::fmt;

use tracing::debug;

use super::{
    error::Error,
    host::HostDevice,
    kernel::{KernelInput, Scored},
};
use crate::pipeline::config::{DevicePreference, KernelConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Gpu,
    Cpu,
}

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    /// Driver or API the device is reached through.
    pub platform: String,
    pub class: DeviceClass,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} ({:?})", self.platform, self.name, self.class)
    }
}

/// A device the reliability program can be built for.
pub trait ComputeDevice: Send {
    fn info(&self) -> &DeviceInfo;

    /// Compiles the reliability program for this device.
    fn build(&self, config: &KernelConfig) -> Result<Box<dyn Kernel + '_>, Error>;
}

/// A compiled reliability program.
pub trait Kernel {
    /// Runs the program over every input record and blocks until the device
    /// is idle. Returns the compacted passing set in slot order, which is
    /// not input order.
    fn run(&mut self, input: &KernelInput) -> Result<Vec<Scored>, Error>;
}

/// Source of candidate devices. Enumeration happens once per run, on the
/// accelerator worker.
pub trait DeviceCatalog: Send {
    fn enumerate(self) -> Vec<Box<dyn ComputeDevice>>;
}

impl DeviceCatalog for Vec<Box<dyn ComputeDevice>> {
    fn enumerate(self) -> Vec<Box<dyn ComputeDevice>> {
        self
    }
}

/// Devices visible to this process: wgpu adapters (with the `gpu` feature)
/// followed by the host device.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDevices {
    pub preference: DevicePreference,
}

impl SystemDevices {
    pub fn new(preference: DevicePreference) -> Self {
        Self { preference }
    }
}

impl DeviceCatalog for SystemDevices {
    fn enumerate(self) -> Vec<Box<dyn ComputeDevice>> {
        let mut devices = match self.preference {
            DevicePreference::HostOnly => Vec::new(),
            _ => gpu_devices(),
        };
        match self.preference {
            DevicePreference::GpuOnly => {
                devices.retain(|device| device.info().class == DeviceClass::Gpu)
            }
            _ => devices.push(Box::new(HostDevice::new())),
        }
        devices
    }
}

#[cfg(feature = "gpu")]
fn gpu_devices() -> Vec<Box<dyn ComputeDevice>> {
    super::gpu::enumerate()
        .into_iter()
        .map(|device| Box::new(device) as Box<dyn ComputeDevice>)
        .collect()
}

#[cfg(not(feature = "gpu"))]
fn gpu_devices() -> Vec<Box<dyn ComputeDevice>> {
    Vec::new()
}

/// Picks the first GPU-class device, falling back to the first CPU-class
/// one.
pub fn select_device(
    devices: Vec<Box<dyn ComputeDevice>>,
) -> Result<Box<dyn ComputeDevice>, Error> {
    for device in &devices {
        debug!(device = %device.info(), "found compute device");
    }
    let position = devices
        .iter()
        .position(|device| device.info().class == DeviceClass::Gpu)
        .or_else(|| {
            devices
                .iter()
                .position(|device| device.info().class == DeviceClass::Cpu)
        })
        .ok_or(Error::NoDevice)?;
    devices.into_iter().nth(position).ok_or(Error::NoDevice)
}
