use std::time::Instant;

use tracing::{error, info, info_span};

use super::{config::KernelConfig, model::InputRecord, store::RecordStore, WorkerOutcome};

pub mod device;
pub mod error;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod host;
pub mod kernel;

pub use device::{
    select_device, ComputeDevice, DeviceCatalog, DeviceClass, DeviceInfo, Kernel, SystemDevices,
};
pub use error::Error;
pub use host::HostDevice;
pub use kernel::{reliability, KernelInput, Scored};

/// Accelerator filter worker. Selects a device, scores every record and
/// writes the passing ones into the store in one batch.
///
/// Nothing is written unless the whole run succeeds. Blocks the calling
/// thread until the device is idle, so run it on a blocking thread.
pub fn run_filter<C: DeviceCatalog>(
    records: &[InputRecord],
    store: &RecordStore,
    catalog: C,
    config: &KernelConfig,
) -> WorkerOutcome {
    let _guard = info_span!("accelerator").entered();
    match filter(records, store, catalog, config) {
        Ok(updated) => WorkerOutcome::Completed { processed: updated },
        Err(e) => {
            if e.is_build_failure() {
                error!(error = %e, "could not build reliability program");
            } else {
                error!(error = %e, "accelerator filter aborted");
            }
            WorkerOutcome::failed(e)
        }
    }
}

fn filter<C: DeviceCatalog>(
    records: &[InputRecord],
    store: &RecordStore,
    catalog: C,
    config: &KernelConfig,
) -> Result<usize, Error> {
    let device = select_device(catalog.enumerate())?;
    info!(device = %device.info(), "selected compute device");

    let mut kernel = device.build(config)?;
    let input = KernelInput::from_records(records);
    let started = Instant::now();
    let passed = kernel.run(&input)?;
    let elapsed_ms = started.elapsed().as_millis();

    let updated = store.apply_reliability(passed.iter().map(|s| (s.id, s.reliability)));
    info!(
        passed = passed.len(),
        total = records.len(),
        elapsed_ms,
        "accelerator filter finished"
    );
    Ok(updated)
}
