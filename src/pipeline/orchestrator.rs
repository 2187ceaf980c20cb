use std::{io, sync::Arc, time::Instant};

use thiserror::Error;
use tokio::task::JoinError;
use tracing::{info, warn};

use super::{
    accel::{self, DeviceCatalog, SystemDevices},
    config::PipelineConfig,
    model::{load_records, InputRecord, LoadError},
    net::{receiver, sender, Transport, ZmqTransport},
    report::{write_report, Summary},
    store::RecordStore,
    WorkerOutcome,
};

/// Where a run is. Phases only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loaded,
    Running,
    Joined,
    Reported,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("loading records: {0}")]
    Load(#[from] LoadError),
    #[error("no records to process")]
    Empty,
    #[error("cannot {action} while {phase:?}")]
    OutOfOrder { phase: Phase, action: &'static str },
    #[error("writing report: {0}")]
    Report(#[from] io::Error),
}

/// How each worker finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcomes {
    pub accelerator: WorkerOutcome,
    pub sender: WorkerOutcome,
    pub receiver: WorkerOutcome,
}

/// Drives one run from loading to the written report.
pub struct Orchestrator {
    config: PipelineConfig,
    phase: Phase,
    records: Arc<Vec<InputRecord>>,
    store: RecordStore,
    outcomes: Option<Outcomes>,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            records: Arc::default(),
            store: RecordStore::default(),
            outcomes: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn outcomes(&self) -> Option<&Outcomes> {
        self.outcomes.as_ref()
    }

    /// Loads the configured input file.
    pub fn load(&mut self) -> Result<usize, PipelineError> {
        self.expect_phase(Phase::Idle, "load records")?;
        let records = load_records(&self.config.input)?;
        self.accept(records)
    }

    /// Takes an already loaded record set. An empty set is refused and the
    /// orchestrator stays idle.
    pub fn accept(&mut self, records: Vec<InputRecord>) -> Result<usize, PipelineError> {
        self.expect_phase(Phase::Idle, "load records")?;
        if records.is_empty() {
            return Err(PipelineError::Empty);
        }
        self.store = RecordStore::from_records(&records);
        self.records = Arc::new(records);
        self.phase = Phase::Loaded;
        info!(records = self.records.len(), "records loaded");
        Ok(self.records.len())
    }

    /// Runs the accelerator filter, sender and receiver side by side and
    /// waits for all three, whatever each of them returns.
    pub async fn run<C, T>(
        &mut self,
        catalog: C,
        transport: Arc<T>,
    ) -> Result<Outcomes, PipelineError>
    where
        C: DeviceCatalog + 'static,
        T: Transport + 'static,
    {
        self.expect_phase(Phase::Loaded, "start workers")?;
        self.phase = Phase::Running;
        let started = Instant::now();

        let accelerator = {
            let records = self.records.clone();
            let store = self.store.clone();
            let kernel = self.config.kernel.clone();
            tokio::task::spawn_blocking(move || {
                accel::run_filter(&records, &store, catalog, &kernel)
            })
        };
        let sender = {
            let records = self.records.clone();
            let transport = transport.clone();
            tokio::spawn(async move { sender::run(&records, transport.as_ref()).await })
        };
        let receiver = {
            let store = self.store.clone();
            let timeout = self.config.receive_timeout;
            tokio::spawn(async move { receiver::run(&store, transport.as_ref(), timeout).await })
        };

        let (accelerator, sender, receiver) = tokio::join!(accelerator, sender, receiver);
        let outcomes = Outcomes {
            accelerator: joined("accelerator", accelerator),
            sender: joined("sender", sender),
            receiver: joined("receiver", receiver),
        };
        self.phase = Phase::Joined;
        info!(
            accelerator = %outcomes.accelerator,
            sender = %outcomes.sender,
            receiver = %outcomes.receiver,
            elapsed_ms = started.elapsed().as_millis(),
            "workers joined"
        );

        self.outcomes = Some(outcomes.clone());
        Ok(outcomes)
    }

    /// Writes the report for a joined run.
    pub fn report(&mut self) -> Result<Summary, PipelineError> {
        self.expect_phase(Phase::Joined, "write report")?;
        let summary = write_report(&self.config.report, &self.records, &self.store)?;
        self.phase = Phase::Reported;
        info!(
            total = summary.total,
            accelerator = summary.accelerator,
            external = summary.external,
            both = summary.both,
            "run reported"
        );
        Ok(summary)
    }

    fn expect_phase(&self, phase: Phase, action: &'static str) -> Result<(), PipelineError> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(PipelineError::OutOfOrder {
                phase: self.phase,
                action,
            })
        }
    }
}

fn joined(worker: &str, result: Result<WorkerOutcome, JoinError>) -> WorkerOutcome {
    result.unwrap_or_else(|e| {
        warn!(worker, error = %e, "worker did not finish");
        WorkerOutcome::failed(format!("{worker} task: {e}"))
    })
}

/// A full run against the system's devices and a ZeroMQ worker pool.
pub async fn run_pipeline(config: PipelineConfig) -> Result<Summary, PipelineError> {
    let transport = Arc::new(ZmqTransport::new(
        &config.push_addr,
        &config.pull_addr,
        config.connect.clone(),
    ));
    let catalog = SystemDevices::new(config.device);

    let mut orchestrator = Orchestrator::new(config);
    orchestrator.load()?;
    orchestrator.run(catalog, transport).await?;
    orchestrator.report()
}
