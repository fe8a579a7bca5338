use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{ControlFlow, DriverError, SimulationRng, SyncCallback, SyncEvent};
use crate::{controller::ControllerStatus, simulation::Simulation, topology::Dpid};

/// Knobs for the default fault injection driver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzerConfig {
    /// Seed for every random decision; drawn from the OS when absent.
    pub seed: Option<u64>,
    /// Rounds to run; runs until interrupted when absent.
    pub steps: Option<u64>,
    /// Pause between rounds.
    pub delay_ms: u64,
    /// Take a snapshot every this many rounds, 0 disables snapshots.
    pub snapshot_period: u64,
    pub controller_crash_rate: f64,
    pub controller_recovery_rate: f64,
    pub switch_failure_rate: f64,
    pub switch_recovery_rate: f64,
    /// Chance of injecting the next dataplane trace packet each round.
    pub traffic_injection_rate: f64,
    pub dataplane_drop_rate: f64,
    /// Chance a buffered packet is held back for another round.
    pub dataplane_delay_rate: f64,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        Self {
            seed: None,
            steps: None,
            delay_ms: 100,
            snapshot_period: 10,
            controller_crash_rate: 0.01,
            controller_recovery_rate: 0.5,
            switch_failure_rate: 0.01,
            switch_recovery_rate: 0.5,
            traffic_injection_rate: 0.1,
            dataplane_drop_rate: 0.01,
            dataplane_delay_rate: 0.1,
        }
    }
}

impl FuzzerConfig {
    fn validate(&self) -> Result<(), DriverError> {
        let rates = [
            ("controller_crash_rate", self.controller_crash_rate),
            ("controller_recovery_rate", self.controller_recovery_rate),
            ("switch_failure_rate", self.switch_failure_rate),
            ("switch_recovery_rate", self.switch_recovery_rate),
            ("traffic_injection_rate", self.traffic_injection_rate),
            ("dataplane_drop_rate", self.dataplane_drop_rate),
            ("dataplane_delay_rate", self.dataplane_delay_rate),
        ];
        for (name, rate) in rates {
            if !(0.0..=1.0).contains(&rate) {
                return Err(DriverError::InvalidConfig(format!(
                    "`{name}` must be within [0, 1], got {rate}"
                )));
            }
        }
        Ok(())
    }
}

/// Something the fuzzer did to the simulation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum FuzzEvent {
    ControllerCrashed(usize),
    ControllerRecovered(usize),
    SwitchFailed(Dpid),
    SwitchRecovered(Dpid),
    PacketInjected,
    PacketDelivered,
    PacketDropped,
    Snapshot(u64),
}

/// Default driver: randomly crashes and recovers controllers and switches,
/// and delivers, delays or drops dataplane traffic.
#[derive(Debug)]
pub struct Fuzzer {
    config: FuzzerConfig,
    history: Vec<FuzzEvent>,
    sync_events: Arc<Mutex<Vec<SyncEvent>>>,
}

impl Fuzzer {
    pub fn new(config: FuzzerConfig) -> Self {
        Self {
            config,
            history: Vec::new(),
            sync_events: Arc::default(),
        }
    }

    pub fn config(&self) -> &FuzzerConfig {
        &self.config
    }

    pub fn history(&self) -> &[FuzzEvent] {
        &self.history
    }

    /// Controller state changes reported by the simulation so far.
    pub fn sync_events(&self) -> Vec<SyncEvent> {
        self.sync_events.lock().clone()
    }

    fn round(
        &mut self,
        simulation: &mut Simulation,
        rng: &SimulationRng,
        round: u64,
    ) -> Result<(), DriverError> {
        self.fuzz_controllers(simulation, rng)?;
        self.fuzz_switches(simulation, rng);
        self.fuzz_dataplane(simulation, rng);

        let period = self.config.snapshot_period;
        if period > 0 && round % period == 0 {
            let snapshot = simulation.take_snapshot();
            tracing::debug!(
                round,
                sequence = snapshot.sequence,
                live_switches = snapshot.live_switches,
                "Took snapshot"
            );
            self.history.push(FuzzEvent::Snapshot(snapshot.sequence));
        }
        Ok(())
    }

    fn fuzz_controllers(
        &mut self,
        simulation: &mut Simulation,
        rng: &SimulationRng,
    ) -> Result<(), DriverError> {
        for idx in 0..simulation.controller_count() {
            match simulation.controller_status(idx)? {
                ControllerStatus::Alive if rng.gen_bool(self.config.controller_crash_rate) => {
                    simulation.crash_controller(idx)?;
                    self.history.push(FuzzEvent::ControllerCrashed(idx));
                }
                ControllerStatus::Crashed if rng.gen_bool(self.config.controller_recovery_rate) => {
                    simulation.recover_controller(idx)?;
                    self.history.push(FuzzEvent::ControllerRecovered(idx));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn fuzz_switches(&mut self, simulation: &mut Simulation, rng: &SimulationRng) {
        let live: Vec<Dpid> = simulation.topology().live_switches().collect();
        let failed: Vec<Dpid> = simulation.topology().failed_switches().collect();
        for dpid in live {
            if rng.gen_bool(self.config.switch_failure_rate)
                && simulation.topology_mut().fail_switch(dpid)
            {
                tracing::debug!(dpid, "Failed switch");
                self.history.push(FuzzEvent::SwitchFailed(dpid));
            }
        }
        for dpid in failed {
            if rng.gen_bool(self.config.switch_recovery_rate)
                && simulation.topology_mut().recover_switch(dpid)
            {
                tracing::debug!(dpid, "Recovered switch");
                self.history.push(FuzzEvent::SwitchRecovered(dpid));
            }
        }
    }

    fn fuzz_dataplane(&mut self, simulation: &mut Simulation, rng: &SimulationRng) {
        if rng.gen_bool(self.config.traffic_injection_rate) {
            if let Some(packet) = simulation.next_trace_packet() {
                simulation.patch_panel_mut().forward(packet);
                self.history.push(FuzzEvent::PacketInjected);
            }
        }
        // back to front so removals keep the remaining indices valid
        let mut idx = simulation.patch_panel().pending();
        while idx > 0 {
            idx -= 1;
            if rng.gen_bool(self.config.dataplane_drop_rate) {
                if simulation.patch_panel_mut().drop_packet(idx).is_some() {
                    self.history.push(FuzzEvent::PacketDropped);
                }
            } else if !rng.gen_bool(self.config.dataplane_delay_rate)
                && simulation.patch_panel_mut().deliver(idx).is_some()
            {
                self.history.push(FuzzEvent::PacketDelivered);
            }
        }
    }
}

impl ControlFlow for Fuzzer {
    fn name(&self) -> &str {
        "fuzzer"
    }

    fn sync_callback(&self) -> SyncCallback {
        let events = self.sync_events.clone();
        Arc::new(move |event: &SyncEvent| {
            tracing::debug!(controller = %event.controller, status = %event.status, "Controller state change");
            events.lock().push(event.clone());
        })
    }

    fn simulate(&mut self, simulation: &mut Simulation) -> Result<(), DriverError> {
        self.config.validate()?;
        let rng = SimulationRng::from_seed_or_entropy(self.config.seed);
        let delay = Duration::from_millis(self.config.delay_ms);
        tracing::info!(seed = rng.seed(), steps = ?self.config.steps, "Starting fuzzer");

        let mut round = 0;
        while self.config.steps.map_or(true, |steps| round < steps) {
            round += 1;
            self.round(simulation, &rng, round)?;
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }
        tracing::info!(
            rounds = round,
            events = self.history.len(),
            sync_events = self.sync_events.lock().len(),
            "Fuzzer finished"
        );
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{
        config::ControllerConfig,
        control_flow::noop_sync_callback,
        patch_panel::PatchPanelClass,
        snapshot::TopologySnapshotService,
        topology::{TopologyClass, TopologyParams},
    };

    fn config(seed: u64) -> FuzzerConfig {
        FuzzerConfig {
            seed: Some(seed),
            steps: Some(40),
            delay_ms: 0,
            snapshot_period: 5,
            controller_crash_rate: 0.2,
            switch_failure_rate: 0.1,
            ..Default::default()
        }
    }

    fn simulation(sync_callback: SyncCallback) -> Simulation {
        Simulation::new(
            &[ControllerConfig::new("sleep 30")],
            TopologyClass::Mesh,
            &TopologyParams::new().with("num_switches", 4),
            PatchPanelClass::Buffered,
            None,
            sync_callback,
            Box::<TopologySnapshotService>::default(),
        )
        .unwrap()
    }

    fn run(seed: u64) -> Vec<FuzzEvent> {
        let mut fuzzer = Fuzzer::new(config(seed));
        let mut sim = simulation(fuzzer.sync_callback());
        fuzzer.simulate(&mut sim).unwrap();
        sim.clean_up();
        fuzzer.history().to_vec()
    }

    #[test]
    fn same_seed_same_history() {
        let first = run(0xC0FFEE);
        assert_eq!(first, run(0xC0FFEE));
        assert_eq!(
            first
                .iter()
                .filter(|e| matches!(e, FuzzEvent::Snapshot(_)))
                .count(),
            8
        );
    }

    #[test]
    fn crashes_are_reported_through_sync_callback() {
        let mut fuzzer = Fuzzer::new(FuzzerConfig {
            controller_crash_rate: 1.0,
            controller_recovery_rate: 0.0,
            steps: Some(3),
            ..config(1)
        });
        let mut sim = simulation(fuzzer.sync_callback());
        fuzzer.simulate(&mut sim).unwrap();
        assert_eq!(fuzzer.history()[0], FuzzEvent::ControllerCrashed(0));
        assert!(fuzzer
            .sync_events()
            .iter()
            .any(|e| e.status == ControllerStatus::Crashed));
    }

    #[test]
    fn rejects_out_of_range_rates() {
        let mut fuzzer = Fuzzer::new(FuzzerConfig {
            dataplane_drop_rate: 1.5,
            ..config(1)
        });
        let mut sim = simulation(noop_sync_callback());
        assert!(matches!(
            fuzzer.simulate(&mut sim),
            Err(DriverError::InvalidConfig(_))
        ));
    }

    #[test]
    fn torn_down_simulation_stops_the_fuzzer() {
        let mut fuzzer = Fuzzer::new(config(3));
        let mut sim = simulation(noop_sync_callback());
        sim.clean_up();
        assert!(matches!(
            fuzzer.simulate(&mut sim),
            Err(DriverError::Controller(_))
        ));
    }
}
