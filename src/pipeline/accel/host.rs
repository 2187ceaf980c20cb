use std::{
    num::NonZeroUsize,
    sync::atomic::{AtomicI32, AtomicU32, Ordering},
    thread,
};

use tracing::trace;

use super::{
    device::{ComputeDevice, DeviceClass, DeviceInfo, Kernel},
    error::Error,
    kernel::{launch_groups, passes, reliability, KernelInput, Scored},
};
use crate::pipeline::config::KernelConfig;

/// CPU-class device that executes the reliability program on OS threads.
///
/// Lanes are laid out exactly as on the GPU: `groups * lane_group` lanes
/// stride over the records, and passing records claim an output slot from a
/// shared atomic counter. Each thread runs a share of the lanes.
pub struct HostDevice {
    info: DeviceInfo,
    threads: usize,
    max_groups: u32,
}

impl HostDevice {
    pub fn new() -> Self {
        let threads = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self::with_threads(threads)
    }

    pub fn with_threads(threads: usize) -> Self {
        Self {
            info: DeviceInfo {
                name: format!("{threads} host threads"),
                platform: "host".into(),
                class: DeviceClass::Cpu,
            },
            threads: threads.max(1),
            max_groups: u32::MAX,
        }
    }

    /// Caps the number of lane groups per launch, like a device's
    /// per-dimension dispatch limit.
    pub fn max_groups(mut self, max_groups: u32) -> Self {
        self.max_groups = max_groups.max(1);
        self
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeDevice for HostDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn build(&self, config: &KernelConfig) -> Result<Box<dyn Kernel + '_>, Error> {
        if config.lane_group == 0 {
            return Err(Error::Build("lane group size must be non-zero".into()));
        }
        Ok(Box::new(HostKernel {
            device: self,
            config: config.clone(),
        }))
    }
}

struct HostKernel<'a> {
    device: &'a HostDevice,
    config: KernelConfig,
}

impl Kernel for HostKernel<'_> {
    fn run(&mut self, input: &KernelInput) -> Result<Vec<Scored>, Error> {
        let count = input.len();
        if u32::try_from(count).is_err() {
            return Err(Error::TooManyRecords(count));
        }
        let groups = launch_groups(count, self.config.lane_group, self.device.max_groups);
        let lanes = groups as usize * self.config.lane_group as usize;
        if lanes == 0 {
            return Ok(Vec::new());
        }

        let counter = AtomicU32::new(0);
        let out_ids: Vec<AtomicI32> = (0..count).map(|_| AtomicI32::new(0)).collect();
        let out_reliability: Vec<AtomicU32> = (0..count).map(|_| AtomicU32::new(0)).collect();
        let threads = self.device.threads.min(lanes);
        trace!(groups, lanes, threads, "launching host kernel");

        let (counter, out_ids, out_reliability) = (&counter, &out_ids, &out_reliability);
        let (iterations, threshold) = (self.config.iterations, self.config.threshold);
        thread::scope(|scope| {
            for first_lane in 0..threads {
                scope.spawn(move || {
                    for lane in (first_lane..lanes).step_by(threads) {
                        for idx in (lane..count).step_by(lanes) {
                            let score =
                                reliability(input.uptimes[idx], input.loads[idx], iterations);
                            if passes(score, threshold) {
                                let slot = counter.fetch_add(1, Ordering::Relaxed) as usize;
                                out_reliability[slot].store(score.to_bits(), Ordering::Relaxed);
                                out_ids[slot].store(input.ids[idx], Ordering::Relaxed);
                            }
                        }
                    }
                });
            }
        });

        let passed = counter.load(Ordering::Relaxed) as usize;
        Ok((0..passed)
            .map(|slot| Scored {
                id: out_ids[slot].load(Ordering::Relaxed),
                reliability: f32::from_bits(out_reliability[slot].load(Ordering::Relaxed)),
            })
            .collect())
    }
}
