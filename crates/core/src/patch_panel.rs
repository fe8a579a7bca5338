//! Forwarding fabric moving dataplane packets between simulated ports.

use std::{collections::VecDeque, fmt};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataplanePacket {
    pub src: String,
    pub dst: String,
    #[serde(default)]
    pub payload: String,
}

impl DataplanePacket {
    pub fn new(src: impl Into<String>, dst: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            payload: String::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchPanelClass {
    /// Holds packets until the driver decides to deliver or drop them.
    #[default]
    Buffered,
    /// Delivers every packet as soon as it is forwarded.
    Immediate,
}

impl PatchPanelClass {
    pub fn build(self) -> Box<dyn PatchPanel> {
        match self {
            PatchPanelClass::Buffered => Box::<BufferedPatchPanel>::default(),
            PatchPanelClass::Immediate => Box::<ImmediatePatchPanel>::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PatchPanelStats {
    pub forwarded: u64,
    pub delivered: u64,
    pub dropped: u64,
}

pub trait PatchPanel: Send + fmt::Debug {
    fn forward(&mut self, packet: DataplanePacket);

    /// Packets waiting for a delivery decision.
    fn pending(&self) -> usize;

    /// Delivers the `index`-th pending packet.
    fn deliver(&mut self, index: usize) -> Option<DataplanePacket>;

    /// Drops the `index`-th pending packet.
    fn drop_packet(&mut self, index: usize) -> Option<DataplanePacket>;

    fn stats(&self) -> PatchPanelStats;
}

#[derive(Debug, Default)]
pub struct BufferedPatchPanel {
    buffer: VecDeque<DataplanePacket>,
    stats: PatchPanelStats,
}

impl PatchPanel for BufferedPatchPanel {
    fn forward(&mut self, packet: DataplanePacket) {
        self.stats.forwarded += 1;
        self.buffer.push_back(packet);
    }

    fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn deliver(&mut self, index: usize) -> Option<DataplanePacket> {
        let packet = self.buffer.remove(index)?;
        self.stats.delivered += 1;
        tracing::trace!(src = %packet.src, dst = %packet.dst, "Delivered dataplane packet");
        Some(packet)
    }

    fn drop_packet(&mut self, index: usize) -> Option<DataplanePacket> {
        let packet = self.buffer.remove(index)?;
        self.stats.dropped += 1;
        tracing::trace!(src = %packet.src, dst = %packet.dst, "Dropped dataplane packet");
        Some(packet)
    }

    fn stats(&self) -> PatchPanelStats {
        self.stats
    }
}

#[derive(Debug, Default)]
pub struct ImmediatePatchPanel {
    stats: PatchPanelStats,
}

impl PatchPanel for ImmediatePatchPanel {
    fn forward(&mut self, packet: DataplanePacket) {
        self.stats.forwarded += 1;
        self.stats.delivered += 1;
        tracing::trace!(src = %packet.src, dst = %packet.dst, "Delivered dataplane packet");
    }

    fn pending(&self) -> usize {
        0
    }

    fn deliver(&mut self, _index: usize) -> Option<DataplanePacket> {
        None
    }

    fn drop_packet(&mut self, _index: usize) -> Option<DataplanePacket> {
        None
    }

    fn stats(&self) -> PatchPanelStats {
        self.stats
    }
}
