/// Experiment configuration, its resolution and the process-wide logger.
pub mod config;

/// Drivers running the simulation loop, including the default fuzzer.
pub mod control_flow;

/// External controller process management.
pub mod controller;

/// Dataplane trace loading.
pub mod dataplane;

/// Run sequencing and the cleanup guarantee.
pub mod orchestrator;

/// Forwarding fabric between simulated ports.
pub mod patch_panel;

pub mod run_state;

/// Signal triggered shutdown.
pub mod signals;

/// The simulation aggregate and its construction.
pub mod simulation;

/// Controller-visible state capture.
pub mod snapshot;

/// Network topology model.
pub mod topology;

/// Tracing and logging infrastructure.
#[cfg_attr(test, allow(dead_code))]
pub mod tracing;

pub use config::{ConfigResolver, ExperimentConfig};
pub use orchestrator::{Orchestrator, RunError};
pub use run_state::{Phase, RunState};
pub use simulation::{Simulation, SimulationBootstrapper};
