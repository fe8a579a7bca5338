//! External SDN controller processes booted for a simulation run.

use std::{
    fmt,
    process::{Child, Command, Stdio},
};

use serde::Serialize;

use crate::config::ControllerConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerStatus {
    Alive,
    /// Exited or was killed while the simulation was running.
    Crashed,
    /// Stopped as part of teardown.
    Stopped,
}

impl fmt::Display for ControllerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerStatus::Alive => write!(f, "alive"),
            ControllerStatus::Crashed => write!(f, "crashed"),
            ControllerStatus::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("controller `{label}` has an empty command line")]
    EmptyCommand { label: String },
    #[error("failed spawning controller `{label}` (`{cmdline}`): {source}")]
    Spawn {
        label: String,
        cmdline: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed stopping controller `{label}`: {source}")]
    Kill {
        label: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no controller at index {0}")]
    Unknown(usize),
    #[error("controllers were already torn down")]
    TornDown,
}

#[derive(Debug)]
pub struct ControllerProcess {
    config: ControllerConfig,
    label: String,
    child: Option<Child>,
    status: ControllerStatus,
}

impl ControllerProcess {
    pub fn spawn(config: ControllerConfig, index: usize) -> Result<Self, ControllerError> {
        let label = config.label_or_index(index);
        let mut process = Self {
            config,
            label,
            child: None,
            status: ControllerStatus::Stopped,
        };
        process.launch()?;
        Ok(process)
    }

    fn launch(&mut self) -> Result<(), ControllerError> {
        let cmdline = self.config.expanded_cmdline();
        let mut parts = cmdline.split_whitespace();
        let Some(program) = parts.next() else {
            return Err(ControllerError::EmptyCommand {
                label: self.label.clone(),
            });
        };
        let mut command = Command::new(program);
        command.args(parts).stdin(Stdio::null());
        if let Some(cwd) = &self.config.cwd {
            command.current_dir(cwd);
        }
        let child = command.spawn().map_err(|source| ControllerError::Spawn {
            label: self.label.clone(),
            cmdline: cmdline.clone(),
            source,
        })?;
        tracing::info!(controller = %self.label, pid = child.id(), %cmdline, "Launched controller");
        self.child = Some(child);
        self.status = ControllerStatus::Alive;
        Ok(())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Current status, noticing processes that exited on their own.
    pub fn status(&mut self) -> ControllerStatus {
        if self.status == ControllerStatus::Alive {
            if let Some(child) = &mut self.child {
                if let Ok(Some(exit)) = child.try_wait() {
                    tracing::warn!(controller = %self.label, %exit, "Controller exited unexpectedly");
                    self.child = None;
                    self.status = ControllerStatus::Crashed;
                }
            }
        }
        self.status
    }

    /// Kills the process and marks it crashed.
    pub fn crash(&mut self) -> Result<(), ControllerError> {
        self.kill()?;
        self.status = ControllerStatus::Crashed;
        Ok(())
    }

    /// Relaunches a controller that is not running.
    pub fn restart(&mut self) -> Result<(), ControllerError> {
        if self.status() == ControllerStatus::Alive {
            return Ok(());
        }
        self.launch()
    }

    /// Kills the process and marks it stopped. Returns whether a live process was killed.
    pub fn stop(&mut self) -> Result<bool, ControllerError> {
        let killed = self.kill()?;
        self.status = ControllerStatus::Stopped;
        Ok(killed)
    }

    fn kill(&mut self) -> Result<bool, ControllerError> {
        let Some(mut child) = self.child.take() else {
            return Ok(false);
        };
        if let Ok(Some(_)) = child.try_wait() {
            return Ok(false);
        }
        let label = self.label.clone();
        child
            .kill()
            .and_then(|_| child.wait())
            .map_err(|source| ControllerError::Kill { label, source })?;
        tracing::debug!(controller = %self.label, "Killed controller process");
        Ok(true)
    }
}

/// Every controller booted for a simulation. Once torn down it refuses to start processes again.
#[derive(Debug, Default)]
pub struct ControllerSet {
    processes: Vec<ControllerProcess>,
    torn_down: bool,
}

impl ControllerSet {
    pub fn boot(&mut self, config: ControllerConfig) -> Result<(), ControllerError> {
        if self.torn_down {
            return Err(ControllerError::TornDown);
        }
        let process = ControllerProcess::spawn(config, self.processes.len())?;
        self.processes.push(process);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut ControllerProcess, ControllerError> {
        if self.torn_down {
            return Err(ControllerError::TornDown);
        }
        self.processes
            .get_mut(index)
            .ok_or(ControllerError::Unknown(index))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ControllerProcess> {
        self.processes.iter_mut()
    }

    /// Stops every process, best effort. Returns how many live processes were killed.
    pub fn tear_down(&mut self) -> usize {
        self.torn_down = true;
        let mut stopped = 0;
        for process in &mut self.processes {
            match process.stop() {
                Ok(true) => stopped += 1,
                Ok(false) => {}
                Err(err) => tracing::error!(%err, "Failed stopping controller"),
            }
        }
        stopped
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn spawn_crash_and_restart() -> testresult::TestResult {
        let mut process = ControllerProcess::spawn(ControllerConfig::new("sleep 30"), 0)?;
        assert_eq!(process.label(), "c0");
        assert!(process.pid().is_some());
        assert_eq!(process.status(), ControllerStatus::Alive);

        process.crash()?;
        assert_eq!(process.status(), ControllerStatus::Crashed);
        assert!(process.pid().is_none());

        process.restart()?;
        assert_eq!(process.status(), ControllerStatus::Alive);
        assert!(process.stop()?);
        assert_eq!(process.status(), ControllerStatus::Stopped);
        Ok(())
    }

    #[test]
    fn exited_process_reports_crashed() -> testresult::TestResult {
        let mut process = ControllerProcess::spawn(ControllerConfig::new("true"), 0)?;
        let mut status = process.status();
        for _ in 0..100 {
            if status != ControllerStatus::Alive {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
            status = process.status();
        }
        assert_eq!(status, ControllerStatus::Crashed);
        assert!(!process.stop()?);
        Ok(())
    }

    #[test]
    fn spawn_failure_is_reported() {
        let err = ControllerProcess::spawn(ControllerConfig::new("/nonexistent/sts-controller"), 1)
            .unwrap_err();
        assert!(matches!(err, ControllerError::Spawn { ref label, .. } if label == "c1"));

        let err = ControllerProcess::spawn(ControllerConfig::new("   "), 0).unwrap_err();
        assert!(matches!(err, ControllerError::EmptyCommand { .. }));
    }

    #[test]
    fn torn_down_set_refuses_new_processes() -> testresult::TestResult {
        let mut set = ControllerSet::default();
        set.boot(ControllerConfig::new("sleep 30"))?;
        set.boot(ControllerConfig::new("sleep 30").with_label("second"))?;
        assert_eq!(set.tear_down(), 2);
        assert!(set.is_torn_down());
        assert!(matches!(
            set.boot(ControllerConfig::new("sleep 30")),
            Err(ControllerError::TornDown)
        ));
        assert!(matches!(set.get_mut(0), Err(ControllerError::TornDown)));
        assert_eq!(set.tear_down(), 0);
        Ok(())
    }
}
