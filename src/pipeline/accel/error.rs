use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no compute device found")]
    NoDevice,
    #[error("kernel build failed: {0}")]
    Build(String),
    #[error("device request failed: {0}")]
    DeviceRequest(String),
    #[error("kernel launch failed: {0}")]
    Launch(String),
    #[error("result transfer failed: {0}")]
    Transfer(String),
    #[error("{0} records exceed the device index range")]
    TooManyRecords(usize),
}

impl Error {
    /// Build failures are reported separately from runtime failures in logs.
    pub fn is_build_failure(&self) -> bool {
        matches!(self, Error::Build(_))
    }
}
