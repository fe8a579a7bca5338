//! Drivers that run the simulation loop and inject events into it.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    controller::{ControllerError, ControllerStatus},
    simulation::Simulation,
};

mod fuzzer;
mod rng;

pub use fuzzer::{FuzzEvent, Fuzzer, FuzzerConfig};
pub use rng::SimulationRng;

/// A controller state change reported back to the driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncEvent {
    pub controller: String,
    pub status: ControllerStatus,
}

pub type SyncCallback = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

pub fn noop_sync_callback() -> SyncCallback {
    Arc::new(|_| {})
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error("invalid driver configuration: {0}")]
    InvalidConfig(String),
    #[error("{0}")]
    Failed(String),
}

pub trait ControlFlow: Send {
    fn name(&self) -> &str;

    /// Callback the simulation notifies about controller state changes.
    fn sync_callback(&self) -> SyncCallback;

    /// Drives the simulation until the run is over. Blocks the calling thread.
    fn simulate(&mut self, simulation: &mut Simulation) -> Result<(), DriverError>;
}

/// Builds a user supplied driver. Compared by name.
#[derive(Clone)]
pub struct DriverFactory {
    name: String,
    build: Arc<dyn Fn() -> Box<dyn ControlFlow> + Send + Sync>,
}

impl DriverFactory {
    pub fn new<F>(name: impl Into<String>, build: F) -> Self
    where
        F: Fn() -> Box<dyn ControlFlow> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            build: Arc::new(build),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instantiate(&self) -> Box<dyn ControlFlow> {
        (self.build)()
    }
}

impl fmt::Debug for DriverFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DriverFactory").field(&self.name).finish()
    }
}

impl PartialEq for DriverFactory {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// Which driver runs an experiment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlFlowSpec {
    Fuzzer(FuzzerConfig),
    /// Only available to experiments registered from code.
    #[serde(skip)]
    Custom(DriverFactory),
}

impl Default for ControlFlowSpec {
    fn default() -> Self {
        ControlFlowSpec::Fuzzer(FuzzerConfig::default())
    }
}

impl ControlFlowSpec {
    /// A fresh driver for one run.
    pub fn instantiate(&self) -> Box<dyn ControlFlow> {
        match self {
            ControlFlowSpec::Fuzzer(config) => Box::new(Fuzzer::new(config.clone())),
            ControlFlowSpec::Custom(factory) => factory.instantiate(),
        }
    }
}
