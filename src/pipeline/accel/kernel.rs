use libm::{cosf, fabsf, sinf};

use crate::pipeline::model::InputRecord;

/// Entry point name inside [`RELIABILITY_WGSL`].
pub const ENTRY_POINT: &str = "compute_reliability";

/// Placeholder replaced with the configured lane-group size before the
/// program is compiled; WGSL needs the workgroup size as a literal.
pub const LANE_GROUP_PLACEHOLDER: &str = "@LANE_GROUP@";

/// Scores every record, then appends the passing ones to `out_ids` and
/// `out_reliability` at the slot handed out by `counter`. Lanes stride over
/// the whole grid so any record count works with any dispatch size.
pub const RELIABILITY_WGSL: &str = r#"
struct Params {
    count: u32,
    iterations: u32,
    threshold: f32,
    _pad: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> uptimes: array<i32>;
@group(0) @binding(2) var<storage, read> loads: array<f32>;
@group(0) @binding(3) var<storage, read> ids: array<i32>;
@group(0) @binding(4) var<storage, read_write> out_reliability: array<f32>;
@group(0) @binding(5) var<storage, read_write> out_ids: array<i32>;
@group(0) @binding(6) var<storage, read_write> counter: atomic<u32>;

@compute @workgroup_size(@LANE_GROUP@)
fn compute_reliability(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>,
) {
    let stride = groups.x * @LANE_GROUP@u;
    var idx = gid.x;
    loop {
        if (idx >= params.count) {
            break;
        }

        let scaled_uptime = f32(uptimes[idx]) / 1000.0;
        let load = loads[idx];
        var reliability = 0.5;
        for (var i = 0u; i < params.iterations; i = i + 1u) {
            let fi = f32(i);
            let factor1 = sin(scaled_uptime * fi);
            let factor2 = cos(load * fi);
            reliability = abs(sin(reliability + factor1 - factor2));
        }
        reliability = reliability * 100.0;

        if (reliability >= params.threshold) {
            let slot = atomicAdd(&counter, 1u);
            out_reliability[slot] = reliability;
            out_ids[slot] = ids[idx];
        }

        idx = idx + stride;
    }
}
"#;

/// Returns the program source with the lane-group size filled in.
pub fn program_source(lane_group: u32) -> String {
    RELIABILITY_WGSL.replace(LANE_GROUP_PLACEHOLDER, &lane_group.to_string())
}

/// Single precision reliability score for one record, already scaled to
/// 0..=100.
pub fn reliability(uptime: i32, load: f32, iterations: u32) -> f32 {
    let scaled_uptime = uptime as f32 / 1000.0;
    let mut reliability = 0.5f32;
    for i in 0..iterations {
        let step = i as f32;
        let factor1 = sinf(scaled_uptime * step);
        let factor2 = cosf(load * step);
        reliability = fabsf(sinf(reliability + factor1 - factor2));
    }
    reliability * 100.0
}

pub fn passes(reliability: f32, threshold: f32) -> bool {
    reliability >= threshold
}

/// Number of lane groups to dispatch for `count` records. Capped at
/// `max_groups`; the grid-striding loop picks up whatever the cap leaves.
pub fn launch_groups(count: usize, lane_group: u32, max_groups: u32) -> u32 {
    if count == 0 || lane_group == 0 {
        return 0;
    }
    let groups = count.div_ceil(lane_group as usize);
    u32::try_from(groups)
        .unwrap_or(u32::MAX)
        .clamp(1, max_groups.max(1))
}

/// Column-major copy of the fields the kernel reads, in input order.
#[derive(Debug, Clone, Default)]
pub struct KernelInput {
    pub ids: Vec<i32>,
    pub uptimes: Vec<i32>,
    pub loads: Vec<f32>,
}

impl KernelInput {
    pub fn from_records(records: &[InputRecord]) -> Self {
        let mut input = Self {
            ids: Vec::with_capacity(records.len()),
            uptimes: Vec::with_capacity(records.len()),
            loads: Vec::with_capacity(records.len()),
        };
        for record in records {
            input.ids.push(record.id);
            input.uptimes.push(record.uptime);
            input.loads.push(record.load);
        }
        input
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// One entry of the compacted output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored {
    pub id: i32,
    pub reliability: f32,
}
