use super::{ControllerConfig, RawExperimentConfig, Registry};
use crate::{
    patch_panel::PatchPanelClass,
    topology::{TopologyClass, TopologyParams},
};

const POX_CMDLINE: &str =
    "./pox.py --no-cli sts.syncproto.pox_syncer openflow.of_01 --address=__address__ --port=__port__";
const POX_SYNC: &str = "tcp:localhost:18899";

/// Experiments shipped with the harness, under the `config` namespace.
pub fn builtin_registry() -> Registry {
    Registry::new()
        .with("config.fat_tree", fat_tree)
        .with("config.mesh", mesh)
}

fn pox() -> ControllerConfig {
    ControllerConfig::new(POX_CMDLINE)
        .with_cwd("pox")
        .with_sync(POX_SYNC)
        .with_label("pox")
}

fn fat_tree() -> RawExperimentConfig {
    RawExperimentConfig::default()
        .with_controllers(vec![pox()])
        .with_topology(
            TopologyClass::FatTree,
            TopologyParams::new().with("num_pods", 4),
        )
        .with_patch_panel(PatchPanelClass::Buffered)
}

fn mesh() -> RawExperimentConfig {
    RawExperimentConfig::default()
        .with_controllers(vec![pox()])
        .with_topology(
            TopologyClass::Mesh,
            TopologyParams::new().with("num_switches", 3),
        )
}
