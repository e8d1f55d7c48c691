//! Shared fakes for the proxy core tests: a transport that records
//! packets instead of sending them and an in-memory MFIB.

use crate::err::SysError;
use crate::sys::{Mfib, PacketSend};
use crate::McAddr;

use std::collections::BTreeMap;
use std::sync::Mutex;

/// A packet captured by [`RecordingTransport`].
#[derive(Clone, Debug)]
pub struct SentPacket {
    pub if_index: u32,
    pub dst: McAddr,
    pub payload: Vec<u8>,
}

/// [`PacketSend`] fake that records everything.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentPacket>>,
    joined: Mutex<Vec<(u32, McAddr)>>,
}

impl RecordingTransport {
    pub fn new() -> RecordingTransport {
        RecordingTransport::default()
    }

    pub fn sent(&self) -> Vec<SentPacket> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn joined(&self) -> Vec<(u32, McAddr)> {
        self.joined.lock().unwrap().clone()
    }
}

impl PacketSend for RecordingTransport {
    fn send(&self, if_index: u32, dst: &McAddr, payload: &[u8]) -> Result<(), SysError> {
        self.sent.lock().unwrap().push(SentPacket {
            if_index,
            dst: *dst,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn join_group(&self, if_index: u32, group: &McAddr) -> Result<(), SysError> {
        self.joined.lock().unwrap().push((if_index, *group));
        Ok(())
    }

    fn leave_group(&self, if_index: u32, group: &McAddr) -> Result<(), SysError> {
        self.joined
            .lock()
            .unwrap()
            .retain(|(i, g)| !(*i == if_index && g == group));
        Ok(())
    }
}

/// In-memory [`Mfib`]: routes and per-route packet counters the tests
/// can manipulate.
#[derive(Default)]
pub struct MockMfib {
    routes: Mutex<BTreeMap<(McAddr, McAddr), (u16, Vec<u16>)>>,
    counters: Mutex<BTreeMap<(McAddr, McAddr), u64>>,
    vifs: Mutex<BTreeMap<u16, u32>>,
}

impl MockMfib {
    pub fn new() -> MockMfib {
        MockMfib::default()
    }

    /// The installed route for `(saddr, gaddr)` as
    /// `(input_vif, output_vifs)`.
    pub fn route(&self, saddr: &McAddr, gaddr: &McAddr) -> Option<(u16, Vec<u16>)> {
        self.routes.lock().unwrap().get(&(*saddr, *gaddr)).cloned()
    }

    pub fn route_count(&self) -> usize {
        self.routes.lock().unwrap().len()
    }

    /// Pretends the kernel forwarded `count` more packets for the
    /// route.
    pub fn bump_packet_count(&self, saddr: &McAddr, gaddr: &McAddr, count: u64) {
        *self
            .counters
            .lock()
            .unwrap()
            .entry((*saddr, *gaddr))
            .or_insert(0) += count;
    }
}

impl Mfib for MockMfib {
    fn add_mroute(
        &self,
        input_vif: u16,
        saddr: &McAddr,
        gaddr: &McAddr,
        output_vifs: &[u16],
    ) -> Result<(), SysError> {
        self.routes
            .lock()
            .unwrap()
            .insert((*saddr, *gaddr), (input_vif, output_vifs.to_vec()));
        Ok(())
    }

    fn del_mroute(&self, _input_vif: u16, saddr: &McAddr, gaddr: &McAddr) -> Result<(), SysError> {
        self.routes.lock().unwrap().remove(&(*saddr, *gaddr));
        Ok(())
    }

    fn mroute_packet_count(&self, saddr: &McAddr, gaddr: &McAddr) -> Result<u64, SysError> {
        Ok(*self
            .counters
            .lock()
            .unwrap()
            .get(&(*saddr, *gaddr))
            .unwrap_or(&0))
    }

    fn add_vif(&self, vif: u16, if_index: u32) -> Result<(), SysError> {
        self.vifs.lock().unwrap().insert(vif, if_index);
        Ok(())
    }

    fn del_vif(&self, vif: u16) -> Result<(), SysError> {
        self.vifs.lock().unwrap().remove(&vif);
        Ok(())
    }
}
