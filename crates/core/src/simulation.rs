//! The assembled simulation and its construction.
//!
//! A [`Simulation`] owns every resource of a run. Its single teardown entry
//! point, [`Simulation::clean_up`], is idempotent and also reachable from other
//! threads through a [`CleanupHandle`], which is how the signal path tears the
//! run down while the driver still holds the simulation.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use crate::{
    config::{ControllerConfig, ExperimentConfig},
    control_flow::{ControlFlow, SyncCallback, SyncEvent},
    controller::{ControllerError, ControllerSet, ControllerStatus},
    dataplane::{DataplaneTrace, TraceError},
    patch_panel::{DataplanePacket, PatchPanel, PatchPanelClass},
    snapshot::{get_snapshot_service, ControllerView, Snapshot, SnapshotService},
    topology::{Topology, TopologyClass, TopologyError, TopologyParams},
};

#[derive(Debug, thiserror::Error)]
pub enum ConstructionError {
    #[error("failed building topology: {0}")]
    Topology(#[from] TopologyError),
    #[error("failed loading dataplane trace: {0}")]
    DataplaneTrace(#[from] TraceError),
    #[error("failed booting controllers: {source} (stopped {stopped} already running)")]
    ControllerBoot {
        #[source]
        source: ControllerError,
        stopped: usize,
    },
}

/// Tears down the external resources of a simulation exactly once.
///
/// Concurrent callers serialize on the controller set: a caller arriving while
/// teardown is in flight waits for it to finish and then does nothing.
#[derive(Clone, Debug)]
pub struct CleanupHandle {
    controllers: Arc<Mutex<ControllerSet>>,
    teardowns: Arc<AtomicUsize>,
}

impl CleanupHandle {
    fn new(controllers: Arc<Mutex<ControllerSet>>) -> Self {
        Self {
            controllers,
            teardowns: Arc::default(),
        }
    }

    /// Returns true if this call performed the teardown.
    pub fn clean_up(&self) -> bool {
        self.tear_down().is_some()
    }

    /// Number of processes stopped, or `None` if teardown already happened.
    fn tear_down(&self) -> Option<usize> {
        let mut controllers = self.controllers.lock();
        if controllers.is_torn_down() {
            return None;
        }
        let stopped = controllers.tear_down();
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        tracing::info!(stopped, "Cleaned up simulation");
        Some(stopped)
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.controllers.lock().is_torn_down()
    }

    /// How many times teardown actually ran; never more than one.
    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }
}

pub struct Simulation {
    topology: Topology,
    patch_panel: Box<dyn PatchPanel>,
    dataplane_trace: Option<DataplaneTrace>,
    snapshot_service: Box<dyn SnapshotService>,
    sync_callback: SyncCallback,
    controllers: Arc<Mutex<ControllerSet>>,
    cleanup: CleanupHandle,
}

impl Simulation {
    /// Builds every sub-resource, controllers last. If any of them fails the
    /// ones already created are torn down and no simulation is returned.
    pub fn new(
        controllers: &[ControllerConfig],
        topology_class: TopologyClass,
        topology_params: &TopologyParams,
        patch_panel_class: PatchPanelClass,
        dataplane_trace: Option<&Path>,
        sync_callback: SyncCallback,
        snapshot_service: Box<dyn SnapshotService>,
    ) -> Result<Self, ConstructionError> {
        let topology = Topology::build(topology_class, topology_params)?;
        let patch_panel = patch_panel_class.build();
        let dataplane_trace = dataplane_trace.map(DataplaneTrace::load).transpose()?;

        let controller_set = Arc::new(Mutex::new(ControllerSet::default()));
        let simulation = Self {
            topology,
            patch_panel,
            dataplane_trace,
            snapshot_service,
            sync_callback,
            cleanup: CleanupHandle::new(controller_set.clone()),
            controllers: controller_set,
        };
        for (idx, config) in controllers.iter().enumerate() {
            let booted = simulation.controllers.lock().boot(config.clone());
            if let Err(source) = booted {
                let stopped = simulation.cleanup.tear_down().unwrap_or_default();
                return Err(ConstructionError::ControllerBoot { source, stopped });
            }
            simulation.notify(config.label_or_index(idx), ControllerStatus::Alive);
        }
        Ok(simulation)
    }

    fn notify(&self, controller: String, status: ControllerStatus) {
        (self.sync_callback)(&SyncEvent { controller, status });
    }

    /// Idempotent; later calls, from any thread, are no-ops.
    pub fn clean_up(&self) {
        if self.cleanup.clean_up() {
            let stats = self.patch_panel.stats();
            tracing::debug!(
                forwarded = stats.forwarded,
                delivered = stats.delivered,
                dropped = stats.dropped,
                pending = self.patch_panel.pending(),
                "Dataplane totals"
            );
        }
    }

    pub fn cleanup_handle(&self) -> CleanupHandle {
        self.cleanup.clone()
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleanup.is_cleaned_up()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    pub fn patch_panel(&self) -> &dyn PatchPanel {
        self.patch_panel.as_ref()
    }

    pub fn patch_panel_mut(&mut self) -> &mut dyn PatchPanel {
        self.patch_panel.as_mut()
    }

    pub fn next_trace_packet(&mut self) -> Option<DataplanePacket> {
        self.dataplane_trace.as_mut()?.next_packet()
    }

    pub fn controller_count(&self) -> usize {
        self.controllers.lock().len()
    }

    pub fn controller_status(&self, index: usize) -> Result<ControllerStatus, ControllerError> {
        Ok(self.controllers.lock().get_mut(index)?.status())
    }

    pub fn crash_controller(&self, index: usize) -> Result<(), ControllerError> {
        let label = {
            let mut controllers = self.controllers.lock();
            let process = controllers.get_mut(index)?;
            process.crash()?;
            process.label().to_owned()
        };
        tracing::info!(controller = %label, "Crashed controller");
        self.notify(label, ControllerStatus::Crashed);
        Ok(())
    }

    pub fn recover_controller(&self, index: usize) -> Result<(), ControllerError> {
        let label = {
            let mut controllers = self.controllers.lock();
            let process = controllers.get_mut(index)?;
            process.restart()?;
            process.label().to_owned()
        };
        tracing::info!(controller = %label, "Recovered controller");
        self.notify(label, ControllerStatus::Alive);
        Ok(())
    }

    pub fn controller_views(&self) -> Vec<ControllerView> {
        let mut controllers = self.controllers.lock();
        controllers
            .iter_mut()
            .map(|process| ControllerView {
                label: process.label().to_owned(),
                pid: process.pid(),
                status: process.status(),
                sync: process.config().sync.clone(),
            })
            .collect()
    }

    pub fn take_snapshot(&mut self) -> Snapshot {
        let views = self.controller_views();
        self.snapshot_service.snapshot(&views, &self.topology)
    }

    pub fn snapshot_service(&self) -> &dyn SnapshotService {
        self.snapshot_service.as_ref()
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.clean_up();
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("topology", &self.topology.class())
            .field("patch_panel", &self.patch_panel)
            .field("snapshot_service", &self.snapshot_service.name())
            .field("cleaned_up", &self.is_cleaned_up())
            .finish_non_exhaustive()
    }
}

/// A built simulation together with the driver that will run it.
pub struct Bootstrap {
    pub simulation: Simulation,
    pub driver: Box<dyn ControlFlow>,
}

pub struct SimulationBootstrapper;

impl SimulationBootstrapper {
    pub fn build(config: ExperimentConfig) -> Result<Bootstrap, ConstructionError> {
        let snapshot_service = get_snapshot_service(&config.controllers);
        let driver = config.control_flow.instantiate();
        let sync_callback = driver.sync_callback();
        tracing::debug!(
            snapshot_service = snapshot_service.name(),
            driver = driver.name(),
            controllers = config.controllers.len(),
            "Building simulation"
        );
        let simulation = Simulation::new(
            &config.controllers,
            config.topology_class,
            &config.topology_params,
            config.patch_panel_class,
            config.dataplane_trace.as_deref(),
            sync_callback,
            snapshot_service,
        )?;
        Ok(Bootstrap { simulation, driver })
    }
}
