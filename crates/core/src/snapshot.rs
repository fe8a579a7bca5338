//! Captures the controller-visible state of the network for later comparison.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    config::ControllerConfig,
    controller::ControllerStatus,
    topology::{Dpid, Topology},
};

/// What the simulation knows about one controller at snapshot time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ControllerView {
    pub label: String,
    pub pid: Option<u32>,
    pub status: ControllerStatus,
    pub sync: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub service: &'static str,
    /// Sequence number of this snapshot within the run, starting at 1.
    pub sequence: u64,
    pub controllers: Vec<ControllerView>,
    pub live_switches: usize,
    pub failed_switches: Vec<Dpid>,
}

pub trait SnapshotService: Send + fmt::Debug {
    fn name(&self) -> &'static str;

    fn snapshot(&mut self, controllers: &[ControllerView], topology: &Topology) -> Snapshot;
}

/// Chooses a snapshot service able to talk to the given controllers.
///
/// Controller state can only be observed through a sync channel, so unless every
/// controller exposes one only the topology side is captured.
pub fn get_snapshot_service(controllers: &[ControllerConfig]) -> Box<dyn SnapshotService> {
    let sync_endpoints: Option<Vec<String>> =
        controllers.iter().map(|config| config.sync.clone()).collect();
    match sync_endpoints {
        Some(endpoints) if !endpoints.is_empty() => Box::new(SyncSnapshotService::new(endpoints)),
        _ => Box::<TopologySnapshotService>::default(),
    }
}

#[derive(Debug)]
pub struct SyncSnapshotService {
    endpoints: Vec<String>,
    taken: u64,
}

impl SyncSnapshotService {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            taken: 0,
        }
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }
}

impl SnapshotService for SyncSnapshotService {
    fn name(&self) -> &'static str {
        "sync"
    }

    fn snapshot(&mut self, controllers: &[ControllerView], topology: &Topology) -> Snapshot {
        self.taken += 1;
        take(self.name(), self.taken, controllers.to_vec(), topology)
    }
}

#[derive(Debug, Default)]
pub struct TopologySnapshotService {
    taken: u64,
}

impl SnapshotService for TopologySnapshotService {
    fn name(&self) -> &'static str {
        "topology"
    }

    fn snapshot(&mut self, _controllers: &[ControllerView], topology: &Topology) -> Snapshot {
        self.taken += 1;
        take(self.name(), self.taken, Vec::new(), topology)
    }
}

fn take(
    service: &'static str,
    sequence: u64,
    controllers: Vec<ControllerView>,
    topology: &Topology,
) -> Snapshot {
    Snapshot {
        taken_at: Utc::now(),
        service,
        sequence,
        controllers,
        live_switches: topology.live_switches().count(),
        failed_switches: topology.failed_switches().collect(),
    }
}
