use crate::conf::{InterfaceConf, RuleBinding};
use crate::wire::RecordType;
use crate::{GroupMemProtocol, McAddr, SourceList};

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identity token of a scheduled timer.
///
/// One strong handle travels inside the scheduled message, another is
/// stored in the slot the timer belongs to (a group's filter timer, a
/// source entry, ...). When the message fires, the slot is compared by
/// pointer identity: a mismatch means the slot was re-armed in the
/// meantime and the fire is stale.
#[derive(Debug)]
pub struct TimerToken {
    end_time: Instant,
}

/// Shared handle to a [`TimerToken`]; compared with
/// [`TimerToken::is_same`].
pub type TimerHandle = Arc<TimerToken>;

impl TimerToken {
    /// Creates the handle of a timer due after `duration`.
    pub fn new(duration: Duration) -> TimerHandle {
        Arc::new(TimerToken {
            end_time: Instant::now() + duration,
        })
    }

    /// True if this timer still has more than `duration` to run.
    /// Decides the "Suppress Router-Side Processing" flag of queries.
    pub fn fires_later_than(&self, duration: Duration) -> bool {
        Instant::now() + duration <= self.end_time
    }

    /// Pointer identity of two handles.
    pub fn is_same(a: &TimerHandle, b: &TimerHandle) -> bool {
        Arc::ptr_eq(a, b)
    }

    /// True if `slot` currently holds exactly `handle`.
    pub fn slot_matches(slot: &Option<TimerHandle>, handle: &TimerHandle) -> bool {
        matches!(slot, Some(h) if Arc::ptr_eq(h, handle))
    }
}

/// Which timer slot a [`TimerMsg`] belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimerKind {
    /// Group filter timer (EXCLUDE mode liveness).
    Filter,
    /// Shared source timer of one or more sources.
    Source,
    /// Group-specific query retransmission.
    RetGroup,
    /// Group-and-source-specific query retransmission.
    RetSource,
    /// Backward compatibility pinning.
    OlderHostPresent,
    /// Periodic general query.
    GeneralQuery,
    /// Routing-side liveness check of a dynamically learned source.
    NewSource,
}

/// A timer fire delivered through the timing service.
#[derive(Clone, Debug)]
pub struct TimerMsg {
    pub kind: TimerKind,
    /// Interface the timer belongs to (the querier's downstream, or
    /// the input interface for [`TimerKind::NewSource`]).
    pub if_index: u32,
    /// Group the timer belongs to; unspecified for general queries.
    pub gaddr: McAddr,
    /// Source address, for [`TimerKind::NewSource`] only.
    pub saddr: Option<McAddr>,
    /// Identity of the armed timer.
    pub handle: TimerHandle,
}

/// One multicast address record reported by a downstream host.
#[derive(Clone, Debug)]
pub struct GroupRecordMsg {
    pub if_index: u32,
    pub record_type: RecordType,
    pub gaddr: McAddr,
    pub sources: SourceList,
    /// Protocol version the report was received as.
    pub report_version: GroupMemProtocol,
}

/// Runtime reconfiguration of a proxy instance.
#[derive(Clone, Debug)]
pub enum ConfigChange {
    AddDownstream {
        if_index: u32,
        conf: Arc<InterfaceConf>,
    },
    DelDownstream {
        if_index: u32,
    },
    AddUpstream {
        if_index: u32,
        conf: Arc<InterfaceConf>,
    },
    DelUpstream {
        if_index: u32,
    },
    SetGlobalBinding(RuleBinding),
}

/// Message processed by a proxy instance's mailbox loop.
#[derive(Clone, Debug)]
pub enum ProxyMsg {
    Init,
    Test(u32),
    Exit,
    Timer(TimerMsg),
    NewSource {
        if_index: u32,
        gaddr: McAddr,
        saddr: McAddr,
    },
    GroupRecord(GroupRecordMsg),
    /// A membership query from another querier was seen on this
    /// downstream (no election is performed, the event is counted).
    QueryReceived {
        if_index: u32,
    },
    Config(ConfigChange),
    Debug,
}

/// Delivery priority of a message; lower values are delivered first,
/// FIFO within one class.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Priority {
    UserInput = 1,
    Systemic = 10,
    Loseable = 100,
}

impl ProxyMsg {
    /// The delivery class of this message.
    pub fn priority(&self) -> Priority {
        use ProxyMsg::*;
        match self {
            Exit | Debug | Test(_) => Priority::UserInput,
            Init | Timer(_) | Config(_) => Priority::Systemic,
            NewSource { .. } | GroupRecord(_) | QueryReceived { .. } => Priority::Loseable,
        }
    }
}
