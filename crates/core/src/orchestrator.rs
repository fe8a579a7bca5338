//! Sequences a run: resolve the experiment, build the simulation, hand it to
//! the driver and clean up on every exit path.

use std::sync::Arc;

use crate::{
    config::{ConfigError, ConfigResolver, ConfigSource, LayeredSource},
    control_flow::DriverError,
    run_state::{Phase, RunState},
    simulation::{Bootstrap, ConstructionError, SimulationBootstrapper},
};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("resolution failed: {0}")]
    Resolution(#[from] ConfigError),
    #[error("construction failed: {0}")]
    Construction(#[from] ConstructionError),
    #[error("simulation run failed: {0}")]
    Run(#[from] DriverError),
}

impl RunError {
    /// Phase the run was in when it failed.
    pub fn phase(&self) -> Phase {
        match self {
            RunError::Resolution(_) => Phase::Resolving,
            RunError::Construction(_) => Phase::Building,
            RunError::Run(_) => Phase::Running,
        }
    }
}

pub struct Orchestrator<S = LayeredSource> {
    resolver: ConfigResolver<S>,
    state: Arc<RunState>,
}

impl<S: ConfigSource> Orchestrator<S> {
    pub fn new(resolver: ConfigResolver<S>, state: Arc<RunState>) -> Self {
        Self { resolver, state }
    }

    pub fn state(&self) -> &Arc<RunState> {
        &self.state
    }

    /// Runs the experiment named by `identifier` to completion.
    ///
    /// Once the simulation exists its cleanup runs before this returns,
    /// whether the driver finished, failed or panicked. When a termination
    /// signal tore the run down, whatever the driver hit afterwards is not a
    /// failure of the run and `Ok` is returned.
    pub fn run(&self, identifier: &str) -> Result<(), RunError> {
        match self.run_phases(identifier) {
            Err(err) if self.state.is_interrupted() => {
                tracing::debug!(phase = %err.phase(), %err, "Run stopped by signal");
                Ok(())
            }
            Err(err) => {
                tracing::error!(phase = %err.phase(), "{err}");
                Err(err)
            }
            Ok(()) => Ok(()),
        }
    }

    fn run_phases(&self, identifier: &str) -> Result<(), RunError> {
        self.state.advance(Phase::Resolving);
        let config = self
            .resolver
            .resolve(identifier)
            .map_err(|err| self.abort(err.into()))?;
        tracing::info!(%identifier, "Experiment config resolved");

        self.state.advance(Phase::Building);
        let Bootstrap {
            mut simulation,
            mut driver,
        } = SimulationBootstrapper::build(config).map_err(|err| self.abort(err.into()))?;
        self.state.attach(simulation.cleanup_handle());

        self.state.advance(Phase::Running);
        tracing::info!(driver = driver.name(), "Starting simulation");
        let outcome = driver.simulate(&mut simulation);

        self.state.advance(Phase::CleaningUp);
        simulation.clean_up();
        drop(simulation);
        self.state.advance(Phase::Terminated);

        Ok(outcome?)
    }

    fn abort(&self, err: RunError) -> RunError {
        self.state.advance(Phase::CleaningUp);
        self.state.advance(Phase::Terminated);
        err
    }
}
