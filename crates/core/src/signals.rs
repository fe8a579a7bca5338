//! Interrupt and termination handling.
//!
//! Listeners are registered before any other component runs. When a signal
//! arrives the simulation is cleaned up synchronously (if it was built) and
//! the process exits with [`SIGNAL_EXIT_CODE`].

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::run_state::RunState;

/// Exit code of a signal triggered shutdown.
pub const SIGNAL_EXIT_CODE: i32 = 0;

static GUARD_INSTALLED: AtomicBool = AtomicBool::new(false);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

impl Signal {
    pub fn name(self) -> &'static str {
        match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
        }
    }

    pub fn number(self) -> i32 {
        match self {
            Signal::Interrupt => 2,
            Signal::Terminate => 15,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.number())
    }
}

/// Reacts to a received signal and returns the exit code to terminate with.
///
/// Cleanup is idempotent: if the main path already cleaned up, or is doing so
/// right now, this waits for it and does not tear down a second time.
pub fn handle_signal(state: &RunState, signal: Signal) -> i32 {
    state.interrupt();
    match state.cleanup_handle() {
        Some(handle) => {
            let performed = handle.clean_up();
            tracing::warn!(%signal, performed_cleanup = performed, "Caught signal, stopping simulation");
        }
        None => {
            tracing::warn!(%signal, phase = %state.phase(), "Caught signal before the simulation was built, exiting");
        }
    }
    SIGNAL_EXIT_CODE
}

pub struct SignalGuard;

impl SignalGuard {
    /// Registers SIGINT and SIGTERM listeners on a dedicated `signal-guard`
    /// thread. Only the first call per process installs anything.
    pub fn install(state: Arc<RunState>) -> std::io::Result<()> {
        if GUARD_INSTALLED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let listener = {
            let _guard = runtime.enter();
            SignalListener::register()?
        };
        std::thread::Builder::new()
            .name("signal-guard".into())
            .spawn(move || {
                let signal = runtime.block_on(listener.recv());
                let code = handle_signal(&state, signal);
                std::process::exit(code);
            })?;
        tracing::debug!("Installed signal handlers");
        Ok(())
    }
}

#[cfg(unix)]
struct SignalListener {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalListener {
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(mut self) -> Signal {
        tokio::select! {
            _ = self.interrupt.recv() => Signal::Interrupt,
            _ = self.terminate.recv() => Signal::Terminate,
        }
    }
}

#[cfg(not(unix))]
struct SignalListener;

#[cfg(not(unix))]
impl SignalListener {
    fn register() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(self) -> Signal {
        ctrl_c_outcome(tokio::signal::ctrl_c().await).await
    }
}

/// A failed Ctrl-C listener never resolves, so it cannot pass for an interrupt.
#[cfg_attr(unix, allow(dead_code))]
async fn ctrl_c_outcome(received: std::io::Result<()>) -> Signal {
    match received {
        Ok(()) => Signal::Interrupt,
        Err(err) => {
            tracing::error!(%err, "Failed listening for Ctrl-C, signals will not trigger cleanup");
            std::future::pending().await
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{
        config::{ControllerConfig, ExperimentConfig},
        control_flow::ControlFlowSpec,
        patch_panel::PatchPanelClass,
        run_state::Phase,
        simulation::SimulationBootstrapper,
        topology::{TopologyClass, TopologyParams},
    };

    fn experiment() -> ExperimentConfig {
        ExperimentConfig {
            controllers: vec![ControllerConfig::new("sleep 30")],
            topology_class: TopologyClass::Mesh,
            topology_params: TopologyParams::new(),
            patch_panel_class: PatchPanelClass::Immediate,
            control_flow: ControlFlowSpec::default(),
            dataplane_trace: None,
        }
    }

    #[test]
    fn signal_while_building_exits_without_cleanup() {
        let state = RunState::new();
        state.advance(Phase::Resolving);
        state.advance(Phase::Building);
        assert_eq!(handle_signal(&state, Signal::Interrupt), SIGNAL_EXIT_CODE);
        assert!(state.cleanup_handle().is_none());
        assert!(state.is_interrupted());
    }

    #[test]
    fn signal_while_running_cleans_up_once() -> testresult::TestResult {
        let state = RunState::new();
        let bootstrap = SimulationBootstrapper::build(experiment())?;
        let handle = bootstrap.simulation.cleanup_handle();
        state.attach(handle.clone());

        assert_eq!(handle_signal(&state, Signal::Terminate), 0);
        assert!(bootstrap.simulation.is_cleaned_up());
        assert_eq!(handle_signal(&state, Signal::Interrupt), 0);
        bootstrap.simulation.clean_up();
        drop(bootstrap);
        assert_eq!(handle.teardowns(), 1);
        Ok(())
    }

    #[test]
    fn signal_after_normal_cleanup_does_not_repeat_it() -> testresult::TestResult {
        let state = RunState::new();
        let bootstrap = SimulationBootstrapper::build(experiment())?;
        let handle = bootstrap.simulation.cleanup_handle();
        state.attach(handle.clone());
        bootstrap.simulation.clean_up();

        handle_signal(&state, Signal::Interrupt);
        assert_eq!(handle.teardowns(), 1);
        Ok(())
    }

    #[test]
    fn failed_ctrl_c_listener_never_fires() -> testresult::TestResult {
        let runtime = tokio::runtime::Builder::new_current_thread().build()?;
        let fired = runtime.block_on(async {
            tokio::select! {
                biased;
                _ = ctrl_c_outcome(Err(std::io::Error::other("unsupported"))) => true,
                _ = std::future::ready(()) => false,
            }
        });
        assert!(!fired);

        let signal = runtime.block_on(ctrl_c_outcome(Ok(())));
        assert_eq!(signal, Signal::Interrupt);
        Ok(())
    }

    #[test]
    fn signal_names() {
        assert_eq!(Signal::Interrupt.to_string(), "SIGINT (2)");
        assert_eq!(Signal::Terminate.name(), "SIGTERM");
    }
}
