//! A user-space IGMP/MLD multicast proxy (RFC 4605, generalized).
//!
//! `mcastd` attaches to a set of network interfaces partitioned into
//! upstream and downstream roles, runs a standards-compliant
//! IGMPv1/v2/v3 or MLDv1/v2 querier on each downstream interface,
//! aggregates the learned group memberships into per-upstream
//! subscriptions and programs the kernel multicast forwarding cache to
//! replicate datagrams toward the interested interfaces.
//!
//! The crate is organized along the data flow:
//!
//! * [`addr`](McAddr): the typed IPv4/IPv6 address value and the
//!   [`GroupMemProtocol`] version ladder.
//! * [`wire`]: the IGMP/MLD wire formats, the kernel cache-miss
//!   upcalls and the floating query-code encodings.
//! * [`conf`]: the declarative filter-rule configuration language
//!   (scanner, parser, AST and evaluator).
//! * [`proxy`]: the core, with the per-instance actor, querier state machine,
//!   route manager, membership aggregation, timing service and the
//!   priority mailbox.
//! * [`sys`]: the Linux capability adapters (raw mroute sockets,
//!   interface registry, reverse path filter) behind the narrow
//!   [`sys::Mfib`] and [`sys::PacketSend`] traits.
//!
//! The proxy needs root (raw sockets and the kernel `MRT` flag); all
//! of the protocol logic is testable without it through the traits
//! above.

pub mod err;

mod addr;
pub use crate::addr::*;

pub mod wire;

pub mod conf;

pub mod proxy;
pub use crate::proxy::*;

pub mod sys;
