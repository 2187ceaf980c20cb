use std::{path::PathBuf, str::FromStr, time::Duration};

use typed_builder::TypedBuilder;

/// Where the sender pushes record frames (the pool's PULL socket).
pub const DEFAULT_PUSH_ADDR: &str = "tcp://127.0.0.1:5557";
/// Where the receiver binds for result frames (the pool's PUSH socket).
pub const DEFAULT_PULL_ADDR: &str = "tcp://127.0.0.1:5558";
pub const DEFAULT_INPUT_PATH: &str = "data/servers.json";
pub const DEFAULT_REPORT_PATH: &str = "results/output.txt";

pub const RELIABILITY_ITERATIONS: u32 = 4_000_000;
pub const LANE_GROUP_SIZE: u32 = 256;
pub const PASS_THRESHOLD: f32 = 50.0;

/// Which device classes the accelerator filter may pick from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// GPU if there is one, otherwise a CPU-class device.
    #[default]
    Auto,
    GpuOnly,
    HostOnly,
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "gpu" => Ok(Self::GpuOnly),
            "host" | "cpu" => Ok(Self::HostOnly),
            other => Err(format!("unknown device preference `{other}`")),
        }
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct KernelConfig {
    #[builder(default = RELIABILITY_ITERATIONS)]
    pub iterations: u32,
    /// Lanes per lane group (workgroup size on the GPU).
    #[builder(default = LANE_GROUP_SIZE)]
    pub lane_group: u32,
    #[builder(default = PASS_THRESHOLD)]
    pub threshold: f32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Connect attempts made before an outbound channel is given up on.
#[derive(Debug, Clone, TypedBuilder)]
pub struct ConnectRetry {
    #[builder(default = 30)]
    pub attempts: u32,
    #[builder(default = Duration::from_millis(100))]
    pub backoff: Duration,
}

impl Default for ConnectRetry {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct PipelineConfig {
    #[builder(setter(into))]
    pub input: PathBuf,
    #[builder(default = PathBuf::from(DEFAULT_REPORT_PATH), setter(into))]
    pub report: PathBuf,
    #[builder(default = DEFAULT_PUSH_ADDR.to_string(), setter(into))]
    pub push_addr: String,
    #[builder(default = DEFAULT_PULL_ADDR.to_string(), setter(into))]
    pub pull_addr: String,
    #[builder(default)]
    pub kernel: KernelConfig,
    #[builder(default)]
    pub device: DevicePreference,
    #[builder(default)]
    pub connect: ConnectRetry,
    /// Longest the receiver waits for any single frame. `None` waits for the
    /// sentinel indefinitely.
    #[builder(default, setter(strip_option))]
    pub receive_timeout: Option<Duration>,
}
