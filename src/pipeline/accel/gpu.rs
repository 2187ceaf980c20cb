//! wgpu-backed devices.
//!
//! Every adapter the wgpu instance can see is offered as a candidate; the
//! program is compiled per run and the compacted output is read back through
//! staging buffers once the queue has drained.

use std::sync::mpsc;

use futures::executor::block_on;
use tracing::{debug, warn};
use wgpu::util::DeviceExt;

use super::{
    device::{ComputeDevice, DeviceClass, DeviceInfo, Kernel},
    error::Error,
    kernel::{launch_groups, program_source, KernelInput, Scored, ENTRY_POINT},
};
use crate::pipeline::config::KernelConfig;

/// Uniform block of the reliability program (must match the WGSL layout).
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Params {
    count: u32,
    iterations: u32,
    threshold: f32,
    _pad: u32,
}

pub struct WgpuDevice {
    adapter: wgpu::Adapter,
    info: DeviceInfo,
    max_groups: u32,
}

impl WgpuDevice {
    pub fn limits(&self) -> wgpu::Limits {
        self.adapter.limits()
    }

    /// Caps the number of workgroups per dispatch below the adapter's own
    /// limit.
    pub fn max_groups(mut self, max_groups: u32) -> Self {
        self.max_groups = max_groups.max(1);
        self
    }
}

/// Lists every adapter that is either a GPU or a software/CPU rasterizer.
pub fn enumerate() -> Vec<WgpuDevice> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    instance
        .enumerate_adapters(wgpu::Backends::all())
        .into_iter()
        .filter_map(|adapter| {
            let info = adapter.get_info();
            let class = match info.device_type {
                wgpu::DeviceType::DiscreteGpu
                | wgpu::DeviceType::IntegratedGpu
                | wgpu::DeviceType::VirtualGpu => DeviceClass::Gpu,
                wgpu::DeviceType::Cpu => DeviceClass::Cpu,
                wgpu::DeviceType::Other => return None,
            };
            Some(WgpuDevice {
                info: DeviceInfo {
                    name: info.name.clone(),
                    platform: format!("wgpu/{:?}", info.backend),
                    class,
                },
                adapter,
                max_groups: u32::MAX,
            })
        })
        .collect()
}

impl ComputeDevice for WgpuDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn build(&self, config: &KernelConfig) -> Result<Box<dyn Kernel + '_>, Error> {
        let limits = self.adapter.limits();
        if config.lane_group == 0
            || config.lane_group > limits.max_compute_invocations_per_workgroup
            || config.lane_group > limits.max_compute_workgroup_size_x
        {
            return Err(Error::Build(format!(
                "lane group of {} is outside the device's workgroup limits",
                config.lane_group
            )));
        }

        let (device, queue) = block_on(self.adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("reliability device"),
                required_features: wgpu::Features::empty(),
                required_limits: limits.clone(),
            },
            None,
        ))
        .map_err(|e| Error::DeviceRequest(e.to_string()))?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("reliability program"),
            source: wgpu::ShaderSource::Wgsl(program_source(config.lane_group).into()),
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("reliability pipeline"),
            layout: None,
            module: &module,
            entry_point: ENTRY_POINT,
        });
        if let Some(error) = block_on(device.pop_error_scope()) {
            return Err(Error::Build(error.to_string()));
        }
        debug!(lane_group = config.lane_group, "reliability program built");

        Ok(Box::new(WgpuKernel {
            device,
            queue,
            pipeline,
            config: config.clone(),
            max_groups: limits.max_compute_workgroups_per_dimension.min(self.max_groups),
        }))
    }
}

struct WgpuKernel {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    config: KernelConfig,
    max_groups: u32,
}

impl WgpuKernel {
    fn storage(&self, label: &str, contents: &[u8]) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            })
    }

    fn staging(&self, label: &str, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Maps every staging buffer, waits for the device, and copies the
    /// contents out.
    fn read_back(&self, buffers: &[&wgpu::Buffer]) -> Result<Vec<Vec<u8>>, Error> {
        let (tx, rx) = mpsc::channel();
        for (index, buffer) in buffers.iter().enumerate() {
            let tx = tx.clone();
            buffer
                .slice(..)
                .map_async(wgpu::MapMode::Read, move |result| {
                    let _ = tx.send((index, result));
                });
        }
        drop(tx);
        self.device.poll(wgpu::Maintain::Wait);

        for _ in buffers {
            let (index, result) = rx
                .recv()
                .map_err(|e| Error::Transfer(format!("map callback lost: {e}")))?;
            result.map_err(|e| Error::Transfer(format!("buffer {index}: {e}")))?;
        }

        Ok(buffers
            .iter()
            .map(|buffer| {
                let bytes = buffer.slice(..).get_mapped_range().to_vec();
                buffer.unmap();
                bytes
            })
            .collect())
    }
}

impl Kernel for WgpuKernel {
    fn run(&mut self, input: &KernelInput) -> Result<Vec<Scored>, Error> {
        let count = input.len();
        let count_u32 = u32::try_from(count).map_err(|_| Error::TooManyRecords(count))?;
        let groups = launch_groups(count, self.config.lane_group, self.max_groups);
        if groups == 0 {
            return Ok(Vec::new());
        }
        let out_size = (count * std::mem::size_of::<i32>()) as u64;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let params = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("reliability params"),
                contents: bytemuck::bytes_of(&Params {
                    count: count_u32,
                    iterations: self.config.iterations,
                    threshold: self.config.threshold,
                    _pad: 0,
                }),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let uptimes = self.storage("uptimes", bytemuck::cast_slice(&input.uptimes));
        let loads = self.storage("loads", bytemuck::cast_slice(&input.loads));
        let ids = self.storage("ids", bytemuck::cast_slice(&input.ids));
        let out_reliability = self.storage("out reliability", &vec![0u8; out_size as usize]);
        let out_ids = self.storage("out ids", &vec![0u8; out_size as usize]);
        let counter = self.storage("counter", bytemuck::bytes_of(&0u32));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("reliability bind group"),
            layout: &self.pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: uptimes.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: loads.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: ids.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: out_reliability.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: out_ids.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: counter.as_entire_binding(),
                },
            ],
        });

        let counter_staging = self.staging("counter staging", 4);
        let reliability_staging = self.staging("reliability staging", out_size);
        let ids_staging = self.staging("ids staging", out_size);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("reliability encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("reliability pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups, 1, 1);
        }
        encoder.copy_buffer_to_buffer(&counter, 0, &counter_staging, 0, 4);
        encoder.copy_buffer_to_buffer(&out_reliability, 0, &reliability_staging, 0, out_size);
        encoder.copy_buffer_to_buffer(&out_ids, 0, &ids_staging, 0, out_size);
        self.queue.submit(std::iter::once(encoder.finish()));

        if let Some(error) = block_on(self.device.pop_error_scope()) {
            return Err(Error::Launch(error.to_string()));
        }

        let mut contents =
            self.read_back(&[&counter_staging, &reliability_staging, &ids_staging])?;
        let out_ids: Vec<i32> = bytemuck::pod_collect_to_vec(&contents.pop().unwrap_or_default());
        let out_reliability: Vec<f32> =
            bytemuck::pod_collect_to_vec(&contents.pop().unwrap_or_default());
        let counter: Vec<u32> = bytemuck::pod_collect_to_vec(&contents.pop().unwrap_or_default());

        let passed = counter.first().copied().unwrap_or(0) as usize;
        if passed > count {
            warn!(passed, count, "counter ran past the output buffers");
            return Err(Error::Transfer(format!(
                "counter reported {passed} results for {count} records"
            )));
        }
        Ok(out_ids
            .iter()
            .zip(&out_reliability)
            .take(passed)
            .map(|(&id, &reliability)| Scored { id, reliability })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use hashbrown::HashMap;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;
    use crate::pipeline::{
        accel::kernel::{passes, reliability},
        model::InputRecord,
    };

    /// Scores within this distance of the threshold may land on either side
    /// depending on the device's trig precision.
    const MARGIN: f32 = 0.05;

    fn adapter() -> Option<WgpuDevice> {
        let device = enumerate().into_iter().next();
        if device.is_none() {
            eprintln!("no wgpu adapter, skipping");
        }
        device
    }

    fn random_input(count: usize, seed: u64) -> KernelInput {
        let mut rng = StdRng::seed_from_u64(seed);
        let records: Vec<_> = (0..count as i32)
            .map(|id| InputRecord {
                id: id * 7 - 100,
                location: String::new(),
                uptime: rng.gen_range(0..200_000),
                load: rng.gen_range(0.0..4.0),
            })
            .collect();
        KernelInput::from_records(&records)
    }

    fn assert_matches_reference(input: &KernelInput, config: &KernelConfig, passed: &[Scored]) {
        let got: HashMap<i32, f32> = passed.iter().map(|s| (s.id, s.reliability)).collect();
        assert_eq!(got.len(), passed.len(), "an id was written twice");

        for idx in 0..input.len() {
            let id = input.ids[idx];
            let expected = reliability(input.uptimes[idx], input.loads[idx], config.iterations);
            if (expected - config.threshold).abs() < MARGIN {
                continue;
            }
            match got.get(&id) {
                Some(score) => {
                    assert!(passes(expected, config.threshold), "{id} passed on device only");
                    assert!((score - expected).abs() < MARGIN, "{id}: {score} vs {expected}");
                }
                None => assert!(!passes(expected, config.threshold), "{id} missing"),
            }
        }
    }

    #[test]
    fn compaction_matches_reference_scores() {
        let Some(device) = adapter() else { return };
        let config = KernelConfig::builder().iterations(200).lane_group(64).build();
        let input = random_input(1000, 11);

        let mut kernel = device.build(&config).unwrap();
        let passed = kernel.run(&input).unwrap();

        assert!(passed.len() <= input.len());
        assert_matches_reference(&input, &config, &passed);
    }

    #[test]
    fn capped_dispatch_strides_over_every_record() {
        let Some(device) = adapter() else { return };
        // 2 groups of 4 lanes for 37 records
        let device = device.max_groups(2);
        let config = KernelConfig::builder().iterations(0).lane_group(4).build();
        let input = random_input(37, 5);

        let mut kernel = device.build(&config).unwrap();
        let passed = kernel.run(&input).unwrap();

        let mut ids: Vec<_> = passed.iter().map(|s| s.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, input.ids);
        assert!(passed.iter().all(|s| s.reliability == 50.0));
    }

    #[test]
    fn oversize_lane_group_fails_to_build() {
        let Some(device) = adapter() else { return };
        let too_big = device.limits().max_compute_invocations_per_workgroup + 1;
        let config = KernelConfig::builder().lane_group(too_big).build();

        let result = device.build(&config);

        assert!(matches!(result, Err(Error::Build(_))));
        let zero = KernelConfig::builder().lane_group(0).build();
        assert!(matches!(device.build(&zero), Err(Error::Build(_))));
    }

    #[test]
    fn empty_input_reads_nothing_back() {
        let Some(device) = adapter() else { return };
        let config = KernelConfig::builder().iterations(10).lane_group(64).build();

        let mut kernel = device.build(&config).unwrap();

        assert!(kernel.run(&KernelInput::default()).unwrap().is_empty());
    }
}
