//! Inlets and outlets: peer bookkeeping and vector binding.

use alloc::vec::Vec;
use core::fmt;

use crate::buffer::{BufferId, BufferPool};
use crate::error::{DspError, Result};
use crate::node::NodeId;

/// Which side of a node a port sits on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PortKind {
    Input,
    Output,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortKind::Input => f.write_str("input"),
            PortKind::Output => f.write_str("output"),
        }
    }
}

/// The far end of a connection: a node and one of its port indices.
///
/// Stored in an inlet, it names the producing outlet; stored in an outlet, it
/// names the consuming inlet.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PortRef {
    pub node: NodeId,
    pub index: usize,
}

impl PortRef {
    pub fn new(node: NodeId, index: usize) -> Self {
        Self { node, index }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.index)
    }
}

/// One inlet or outlet of a node.
#[derive(Debug, Clone)]
pub struct Port {
    kind: PortKind,
    index: usize,
    peers: Vec<PortRef>,
    vector: Option<BufferId>,
    borrowed: bool,
    owner: Option<NodeId>,
}

impl Port {
    pub fn new(kind: PortKind, index: usize) -> Self {
        Self {
            kind,
            index,
            peers: Vec::new(),
            vector: None,
            borrowed: false,
            owner: None,
        }
    }

    #[inline]
    pub fn kind(&self) -> PortKind {
        self.kind
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Connected peers in connection order.
    #[inline]
    pub fn peers(&self) -> &[PortRef] {
        &self.peers
    }

    pub fn contains(&self, peer: PortRef) -> bool {
        self.peers.contains(&peer)
    }

    /// Adds `peer` unless it is already connected. Returns whether it was added.
    pub fn add(&mut self, peer: PortRef) -> bool {
        if self.contains(peer) {
            return false;
        }
        self.peers.push(peer);
        true
    }

    /// Removes `peer` if present, keeping the order of the others.
    pub fn remove(&mut self, peer: PortRef) -> bool {
        match self.peers.iter().position(|p| *p == peer) {
            Some(pos) => {
                self.peers.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Removes every peer living on `node`.
    pub(crate) fn remove_node(&mut self, node: NodeId) -> bool {
        let before = self.peers.len();
        self.peers.retain(|p| p.node != node);
        before != self.peers.len()
    }

    /// True iff nothing is connected.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// The bound vector; `Some` only while the owning node runs.
    #[inline]
    pub fn vector(&self) -> Option<BufferId> {
        self.vector
    }

    /// Whether the bound vector belongs to another port.
    #[inline]
    pub fn is_borrowed(&self) -> bool {
        self.borrowed
    }

    /// Node that last started this port.
    #[inline]
    pub fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    /// Binds a vector for the coming run.
    ///
    /// With `share` the port reuses that vector, which must already be
    /// `block_size` long; without it a fresh zeroed vector is taken from `pool`.
    pub(crate) fn start(&mut self, owner: NodeId, share: Option<BufferId>, pool: &mut BufferPool) -> Result<BufferId> {
        self.clear();
        let id = match share {
            Some(id) if pool.is_valid(id) => {
                self.borrowed = true;
                id
            }
            Some(id) => {
                return Err(DspError::port_start(
                    owner,
                    self.kind,
                    self.index,
                    alloc::format!("shared vector {} does not hold {} samples", id, pool.block_size()),
                ))
            }
            None => pool
                .allocate()
                .map_err(|e| DspError::port_start(owner, self.kind, self.index, alloc::format!("{}", e)))?,
        };

        tracing::trace!(
            node = %owner,
            kind = %self.kind,
            index = self.index,
            vector = %id,
            borrowed = self.borrowed,
            "port bound"
        );

        self.owner = Some(owner);
        self.vector = Some(id);
        Ok(id)
    }

    /// Releases the vector; peers are untouched.
    pub fn clear(&mut self) {
        self.vector = None;
        self.borrowed = false;
    }
}
