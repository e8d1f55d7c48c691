//! Kernel capability adapters (Linux) and the narrow traits the proxy
//! core uses so it can run against mocks in tests.

use crate::err::SysError;
use crate::McAddr;

mod if_registry;
pub use if_registry::*;

mod mroute_socket;
pub use mroute_socket::*;

mod rp_filter;
pub use rp_filter::*;

mod check_kernel;
pub use check_kernel::*;

/// Multicast forwarding information base manipulation.
pub trait Mfib: Send + Sync {
    /// Installs (or replaces) the route replicating `(saddr, gaddr)`
    /// datagrams from `input_vif` to `output_vifs`.
    fn add_mroute(
        &self,
        input_vif: u16,
        saddr: &McAddr,
        gaddr: &McAddr,
        output_vifs: &[u16],
    ) -> Result<(), SysError>;

    /// Removes the route for `(saddr, gaddr)`.
    fn del_mroute(&self, input_vif: u16, saddr: &McAddr, gaddr: &McAddr) -> Result<(), SysError>;

    /// Reads the kernel packet counter of the route; the liveness
    /// signal of dynamically learned sources.
    fn mroute_packet_count(&self, saddr: &McAddr, gaddr: &McAddr) -> Result<u64, SysError>;

    /// Registers a virtual interface in the forwarding table.
    fn add_vif(&self, vif: u16, if_index: u32) -> Result<(), SysError>;

    /// Removes a virtual interface.
    fn del_vif(&self, vif: u16) -> Result<(), SysError>;
}

/// Transmission of built IGMP/MLD datagrams plus the socket-level
/// group management the querier needs for the router groups.
pub trait PacketSend: Send + Sync {
    /// Sends `payload` (an IGMP message or ICMPv6 message body) to
    /// `dst` out of the given interface.
    fn send(&self, if_index: u32, dst: &McAddr, payload: &[u8]) -> Result<(), SysError>;

    /// Joins a multicast group on the interface.
    fn join_group(&self, if_index: u32, group: &McAddr) -> Result<(), SysError>;

    /// Leaves a multicast group on the interface.
    fn leave_group(&self, if_index: u32, group: &McAddr) -> Result<(), SysError>;
}
