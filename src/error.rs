//! Error types for chain lifecycle and structural operations.

use alloc::string::String;
use alloc::vec::Vec;

use itertools::Itertools;
use thiserror::Error;

use crate::node::NodeId;
use crate::port::PortKind;

/// Convenience alias used throughout the crate.
pub type Result<T, E = DspError> = core::result::Result<T, E>;

/// Why a lifecycle or structural operation could not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DspError {
    /// The connection graph contains a cycle, so no execution order exists.
    ///
    /// `nodes` lists every node that sits on a cycle, in insertion order.
    #[error("connection graph is cyclic through nodes [{}]", .nodes.iter().join(", "))]
    CyclicGraph {
        /// Nodes that are part of at least one cycle.
        nodes: Vec<NodeId>,
    },

    /// A port could not bind its sample vector.
    #[error("{kind} port {index} of node {node} failed to start: {reason}")]
    PortStartFailure {
        /// Node owning the port.
        node: NodeId,
        /// Input or output side.
        kind: PortKind,
        /// Port index on that side.
        index: usize,
        /// What went wrong (allocation failure, block size mismatch, ...).
        reason: String,
    },

    /// The real-time path could not be quiesced.
    #[error("chain could not be suspended: {reason}")]
    SuspendFailure {
        /// What went wrong.
        reason: String,
    },

    /// A connection call named a port that does not exist.
    #[error("{kind} port {index} is out of range for node {node} ({count} ports)")]
    InvalidPortIndex {
        /// Node the index was checked against.
        node: NodeId,
        /// Input or output side.
        kind: PortKind,
        /// The offending index.
        index: usize,
        /// Current port count on that side.
        count: usize,
    },

    /// No node with this id belongs to the chain.
    #[error("node {0} is not a member of this chain")]
    NodeNotFound(NodeId),

    /// A structural call was made on a running chain without suspending it.
    #[error("chain is running; suspend it before changing its structure")]
    ChainRunning,

    /// Sample rate or block size are unusable.
    #[error("invalid device settings: {reason}")]
    InvalidSettings {
        /// What is wrong with them.
        reason: String,
    },

    /// The audio backend refused to open or run a stream.
    #[error("audio device error: {reason}")]
    DeviceFailure {
        /// Backend message.
        reason: String,
    },
}

impl DspError {
    pub(crate) fn port_start(node: NodeId, kind: PortKind, index: usize, reason: impl Into<String>) -> Self {
        DspError::PortStartFailure {
            node,
            kind,
            index,
            reason: reason.into(),
        }
    }
}
