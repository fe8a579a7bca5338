//! Recorded dataplane traces replayed into the simulation.
//!
//! A trace file holds one JSON encoded [`DataplanePacket`] per line; blank lines are ignored.

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
};

use crate::patch_panel::DataplanePacket;

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("failed reading dataplane trace {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed packet at {path:?}:{line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug)]
pub struct DataplaneTrace {
    path: PathBuf,
    packets: VecDeque<DataplanePacket>,
}

impl DataplaneTrace {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&path).map_err(|source| TraceError::Io {
            path: path.clone(),
            source,
        })?;
        let mut packets = VecDeque::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let packet = serde_json::from_str(line).map_err(|source| TraceError::Parse {
                path: path.clone(),
                line: idx + 1,
                source,
            })?;
            packets.push_back(packet);
        }
        tracing::info!(?path, packets = packets.len(), "Loaded dataplane trace");
        Ok(Self { path, packets })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remaining(&self) -> usize {
        self.packets.len()
    }

    pub fn next_packet(&mut self) -> Option<DataplanePacket> {
        self.packets.pop_front()
    }
}
