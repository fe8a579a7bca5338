//! Graph model of the simulated network: switches, hosts and the links between switches.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default number of pods in a fat tree.
pub const DEFAULT_FAT_TREE_PODS: usize = 4;
/// Default number of switches in a full mesh.
pub const DEFAULT_MESH_SWITCHES: usize = 3;

/// Switch datapath identifier.
pub type Dpid = u64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyClass {
    #[default]
    FatTree,
    Mesh,
}

impl TopologyClass {
    fn known_params(self) -> &'static [&'static str] {
        match self {
            TopologyClass::FatTree => &["num_pods"],
            TopologyClass::Mesh => &["num_switches"],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("unknown parameter `{param}` for {class:?} topology")]
    UnknownParam { class: TopologyClass, param: String },
    #[error("topology parameter `{0}` must be a non-negative integer")]
    InvalidParam(String),
    #[error("a fat tree needs an even number of pods, at least 2 (got {0})")]
    InvalidPodCount(usize),
    #[error("a mesh needs at least one switch")]
    EmptyMesh,
}

/// Parameters handed to the topology constructor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopologyParams(BTreeMap<String, toml::Value>);

impl TopologyParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    fn usize_or(&self, key: &str, default: usize) -> Result<usize, TopologyError> {
        match self.0.get(key) {
            None => Ok(default),
            Some(value) => value
                .as_integer()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| TopologyError::InvalidParam(key.to_owned())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchRole {
    Core,
    Aggregation,
    Edge,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Switch {
    pub dpid: Dpid,
    pub role: SwitchRole,
    pub failed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Host {
    pub name: String,
    /// Edge switch the host hangs off.
    pub switch: Dpid,
}

/// Undirected link between two switches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Link {
    pub a: Dpid,
    pub b: Dpid,
}

#[derive(Clone, Debug)]
pub struct Topology {
    class: TopologyClass,
    switches: Vec<Switch>,
    hosts: Vec<Host>,
    links: Vec<Link>,
}

impl Topology {
    pub fn build(class: TopologyClass, params: &TopologyParams) -> Result<Self, TopologyError> {
        if let Some(param) = params
            .0
            .keys()
            .find(|key| !class.known_params().contains(&key.as_str()))
        {
            return Err(TopologyError::UnknownParam {
                class,
                param: param.clone(),
            });
        }
        let topology = match class {
            TopologyClass::FatTree => {
                Self::fat_tree(params.usize_or("num_pods", DEFAULT_FAT_TREE_PODS)?)?
            }
            TopologyClass::Mesh => {
                Self::mesh(params.usize_or("num_switches", DEFAULT_MESH_SWITCHES)?)?
            }
        };
        tracing::debug!(
            ?class,
            switches = topology.switches.len(),
            hosts = topology.hosts.len(),
            links = topology.links.len(),
            "Built topology"
        );
        Ok(topology)
    }

    /// Three tier k-ary fat tree: `(k/2)^2` core switches, `k` pods of `k/2`
    /// aggregation and `k/2` edge switches each, `k/2` hosts per edge switch.
    fn fat_tree(pods: usize) -> Result<Self, TopologyError> {
        if pods < 2 || pods % 2 != 0 {
            return Err(TopologyError::InvalidPodCount(pods));
        }
        let half = pods / 2;
        let mut topology = Self::empty(TopologyClass::FatTree);

        let cores: Vec<Dpid> = (0..half * half)
            .map(|_| topology.add_switch(SwitchRole::Core))
            .collect();
        for _ in 0..pods {
            let aggs: Vec<Dpid> = (0..half)
                .map(|_| topology.add_switch(SwitchRole::Aggregation))
                .collect();
            let edges: Vec<Dpid> = (0..half)
                .map(|_| topology.add_switch(SwitchRole::Edge))
                .collect();
            for (i, &agg) in aggs.iter().enumerate() {
                for &core in &cores[i * half..(i + 1) * half] {
                    topology.links.push(Link { a: agg, b: core });
                }
            }
            for &edge in &edges {
                for &agg in &aggs {
                    topology.links.push(Link { a: edge, b: agg });
                }
                for _ in 0..half {
                    topology.add_host(edge);
                }
            }
        }
        Ok(topology)
    }

    fn mesh(switches: usize) -> Result<Self, TopologyError> {
        if switches == 0 {
            return Err(TopologyError::EmptyMesh);
        }
        let mut topology = Self::empty(TopologyClass::Mesh);
        let dpids: Vec<Dpid> = (0..switches)
            .map(|_| topology.add_switch(SwitchRole::Edge))
            .collect();
        for (i, &a) in dpids.iter().enumerate() {
            topology.add_host(a);
            for &b in &dpids[i + 1..] {
                topology.links.push(Link { a, b });
            }
        }
        Ok(topology)
    }

    fn empty(class: TopologyClass) -> Self {
        Self {
            class,
            switches: Vec::new(),
            hosts: Vec::new(),
            links: Vec::new(),
        }
    }

    fn add_switch(&mut self, role: SwitchRole) -> Dpid {
        let dpid = self.switches.len() as Dpid + 1;
        self.switches.push(Switch {
            dpid,
            role,
            failed: false,
        });
        dpid
    }

    fn add_host(&mut self, switch: Dpid) {
        let name = format!("h{}", self.hosts.len() + 1);
        self.hosts.push(Host { name, switch });
    }

    pub fn class(&self) -> TopologyClass {
        self.class
    }

    pub fn switches(&self) -> &[Switch] {
        &self.switches
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn host(&self, name: &str) -> Option<&Host> {
        self.hosts.iter().find(|host| host.name == name)
    }

    pub fn live_switches(&self) -> impl Iterator<Item = Dpid> + '_ {
        self.switches.iter().filter(|s| !s.failed).map(|s| s.dpid)
    }

    pub fn failed_switches(&self) -> impl Iterator<Item = Dpid> + '_ {
        self.switches.iter().filter(|s| s.failed).map(|s| s.dpid)
    }

    /// Marks a switch as failed. Returns false if it was unknown or already down.
    pub fn fail_switch(&mut self, dpid: Dpid) -> bool {
        self.set_failed(dpid, true)
    }

    /// Brings a failed switch back. Returns false if it was unknown or already up.
    pub fn recover_switch(&mut self, dpid: Dpid) -> bool {
        self.set_failed(dpid, false)
    }

    fn set_failed(&mut self, dpid: Dpid, failed: bool) -> bool {
        match self.switches.iter_mut().find(|s| s.dpid == dpid) {
            Some(switch) if switch.failed != failed => {
                switch.failed = failed;
                true
            }
            _ => false,
        }
    }
}
