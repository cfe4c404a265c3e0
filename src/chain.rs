//! Chain - owns nodes, computes their order and drives them block by block

use alloc::collections::BinaryHeap;
use alloc::sync::{Arc, Weak};
use alloc::vec;
use alloc::vec::Vec;
use core::cmp::Reverse;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;

use crate::buffer::{BufferId, BufferPool, Sample};
use crate::context::Context;
use crate::device::{DeviceManager, DeviceSettings};
use crate::error::{DspError, Result};
use crate::node::{Handle, Node, NodeId, Processor, Upstream, Wiring, DEFAULT_QUEUE_SIZE};
use crate::port::{Port, PortKind, PortRef};

static NEXT_CHAIN_ID: AtomicU32 = AtomicU32::new(0);

/// Identifier of a chain, unique within the process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ChainId(u32);

impl ChainId {
    fn next() -> Self {
        ChainId(NEXT_CHAIN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain{}", self.0)
    }
}

/// One instruction of the per-block schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Clear(BufferId),
    Copy { src: BufferId, dst: BufferId },
    Accumulate { src: BufferId, dst: BufferId },
    Perform(NodeId),
}

/// An ordered, compiled collection of nodes driven once per audio block.
///
/// Structural calls (`add_node`, `remove_node`, `connect`, `disconnect`)
/// require a stopped chain: call [`suspend`](Self::suspend) first and
/// [`resume`](Self::resume) afterwards, so several edits share one
/// suspend/resume pair. Port-count and in-place changes suspend on their own.
///
/// ```
/// use dspchain::{Chain, DeviceSettings};
/// use dspchain::nodes::{Constant, Gain};
///
/// let mut chain = Chain::new(DeviceSettings::new(48_000, 4));
/// let source = chain.add(Constant::new(1.0)).unwrap();
/// let gain = chain.add(Gain::new(0.5).without_smoothing()).unwrap();
/// chain.connect(source.id(), 0, gain.id(), 0).unwrap();
///
/// chain.start().unwrap();
/// chain.tick();
/// assert_eq!(chain.output(gain.id(), 0).unwrap(), &[0.5; 4]);
/// ```
pub struct Chain {
    id: ChainId,
    context: Option<Weak<Context>>,
    follow_device: bool,

    nodes: HashMap<NodeId, Node>,
    members: Vec<NodeId>,
    order: Vec<NodeId>,
    schedule: Vec<Step>,
    pool: BufferPool,

    settings: DeviceSettings,
    running: bool,
    dirty: bool,
    next_node_id: u32,
    blocks_processed: u64,
}

impl Chain {
    /// Create an empty, stopped chain.
    pub fn new(settings: DeviceSettings) -> Self {
        Self {
            id: ChainId::next(),
            context: None,
            follow_device: false,
            nodes: HashMap::new(),
            members: Vec::new(),
            order: Vec::new(),
            schedule: Vec::new(),
            pool: BufferPool::new(),
            settings,
            running: false,
            dirty: false,
            next_node_id: 0,
            blocks_processed: 0,
        }
    }

    /// Create a stopped chain holding `nodes`, in that insertion order.
    pub fn with_nodes(settings: DeviceSettings, nodes: impl IntoIterator<Item = Node>) -> (Self, Vec<NodeId>) {
        let mut chain = Self::new(settings);
        let ids = nodes.into_iter().map(|node| chain.insert(node)).collect();
        (chain, ids)
    }

    pub(crate) fn set_context(&mut self, context: Weak<Context>) {
        for node in self.nodes.values_mut() {
            node.set_context(context.clone());
        }
        self.context = Some(context);
        self.follow_device = true;
    }

    pub fn id(&self) -> ChainId {
        self.id
    }

    /// The context this chain belongs to, if it is still alive.
    pub fn context(&self) -> Option<Arc<Context>> {
        self.context.as_ref().and_then(Weak::upgrade)
    }

    /// The context's device manager.
    pub fn device_manager(&self) -> Option<Arc<dyn DeviceManager>> {
        self.context().map(|ctx| ctx.device_manager())
    }

    pub fn settings(&self) -> DeviceSettings {
        self.settings
    }

    pub fn sample_rate(&self) -> u32 {
        self.settings.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.settings.block_size
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Members in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.members.iter().filter_map(move |id| self.nodes.get(id))
    }

    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    /// The last successfully compiled execution order.
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// Blocks processed by [`tick`](Self::tick) since the chain was created.
    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed
    }

    /// Samples of an outlet after the last block, while running.
    ///
    /// A vector shared in place holds whatever its last writer left there, so
    /// a producer's outlet may already show the consumer's result. Compare
    /// [`Node::input_vectors`] with [`Node::output_vectors`] to see which
    /// ports share a vector.
    pub fn output(&self, id: NodeId, outlet: usize) -> Option<&[Sample]> {
        let handle = (*self.nodes.get(&id)?.output_vectors().get(outlet)?)?;
        Some(self.pool.get(handle))
    }

    /// Samples of an inlet's vector after the last block, while running.
    ///
    /// Same caveat as [`output`](Self::output): an inlet sharing its vector
    /// with the node's outlet 0 shows what the node wrote, not what it read.
    pub fn input(&self, id: NodeId, inlet: usize) -> Option<&[Sample]> {
        let handle = (*self.nodes.get(&id)?.input_vectors().get(inlet)?)?;
        Some(self.pool.get(handle))
    }

    fn ensure_stopped(&self) -> Result<()> {
        if self.running {
            return Err(DspError::ChainRunning);
        }
        Ok(())
    }

    fn insert(&mut self, mut node: Node) -> NodeId {
        node.stop();
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;

        node.attach(self.id, id, self.context.clone());
        tracing::debug!(chain = %self.id, node = %id, processor = node.processor_name(), "node added");

        self.nodes.insert(id, node);
        self.members.push(id);
        self.dirty = true;
        id
    }

    /// Add a node. The chain must not be running.
    pub fn add_node(&mut self, node: Node) -> Result<NodeId> {
        self.ensure_stopped()?;
        Ok(self.insert(node))
    }

    /// Wrap `processor` in a node and add it.
    pub fn add<P: Processor>(&mut self, processor: P) -> Result<Handle<P::Message>> {
        self.add_with_queue_size(processor, DEFAULT_QUEUE_SIZE)
    }

    /// Like [`add`](Self::add) with a custom message queue size.
    pub fn add_with_queue_size<P: Processor>(&mut self, processor: P, queue_size: usize) -> Result<Handle<P::Message>> {
        self.ensure_stopped()?;
        let (node, sender) = Node::with_queue_size(processor, queue_size);
        let id = self.insert(node);
        Ok(Handle { id, sender })
    }

    /// Remove a node and every connection to it. The chain must not be running.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node> {
        self.ensure_stopped()?;
        let mut node = self.nodes.remove(&id).ok_or(DspError::NodeNotFound(id))?;

        self.members.retain(|m| *m != id);
        self.order.retain(|m| *m != id);
        for other in self.nodes.values_mut() {
            other.forget(id);
        }
        node.resize(PortKind::Input, node.num_inputs());
        node.resize(PortKind::Output, node.num_outputs());
        node.detach();
        self.dirty = true;

        tracing::debug!(chain = %self.id, node = %id, "node removed");
        Ok(node)
    }

    fn check_port(&self, id: NodeId, kind: PortKind, index: usize) -> Result<()> {
        let node = self.nodes.get(&id).ok_or(DspError::NodeNotFound(id))?;
        let count = match kind {
            PortKind::Input => node.num_inputs(),
            PortKind::Output => node.num_outputs(),
        };
        if index >= count {
            return Err(DspError::InvalidPortIndex {
                node: id,
                kind,
                index,
                count,
            });
        }
        Ok(())
    }

    /// Connect outlet `outlet` of `from` to inlet `inlet` of `to`.
    ///
    /// Several outlets feeding one inlet are summed in connection order.
    /// Returns whether anything changed. The chain must not be running.
    pub fn connect(&mut self, from: NodeId, outlet: usize, to: NodeId, inlet: usize) -> Result<bool> {
        self.ensure_stopped()?;
        self.check_port(from, PortKind::Output, outlet)?;
        self.check_port(to, PortKind::Input, inlet)?;

        let mut changed = false;
        if let Some(producer) = self.nodes.get_mut(&from) {
            changed |= producer.add_output_connection(PortRef::new(to, inlet), outlet);
        }
        if let Some(consumer) = self.nodes.get_mut(&to) {
            changed |= consumer.add_input_connection(PortRef::new(from, outlet), inlet);
        }
        if changed {
            self.dirty = true;
            tracing::trace!(chain = %self.id, %from, outlet, %to, inlet, "connected");
        }
        Ok(changed)
    }

    /// Undo [`connect`](Self::connect). Disconnecting an absent link is a no-op.
    pub fn disconnect(&mut self, from: NodeId, outlet: usize, to: NodeId, inlet: usize) -> Result<bool> {
        self.ensure_stopped()?;
        self.check_port(from, PortKind::Output, outlet)?;
        self.check_port(to, PortKind::Input, inlet)?;

        let mut changed = false;
        if let Some(producer) = self.nodes.get_mut(&from) {
            changed |= producer.remove_output_connection(PortRef::new(to, inlet), outlet);
        }
        if let Some(consumer) = self.nodes.get_mut(&to) {
            changed |= consumer.remove_input_connection(PortRef::new(from, outlet), inlet);
        }
        if changed {
            self.dirty = true;
            tracing::trace!(chain = %self.id, %from, outlet, %to, inlet, "disconnected");
        }
        Ok(changed)
    }

    /// Change a member's inlet count, suspending around the change if needed.
    ///
    /// Every connection on the input side is discarded, on both ends. If the
    /// chain cannot be suspended the node is left untouched.
    pub fn set_input_port_count(&mut self, id: NodeId, count: usize) -> Result<()> {
        self.set_port_count(id, PortKind::Input, count)
    }

    /// Output-side counterpart of [`set_input_port_count`](Self::set_input_port_count).
    pub fn set_output_port_count(&mut self, id: NodeId, count: usize) -> Result<()> {
        self.set_port_count(id, PortKind::Output, count)
    }

    fn set_port_count(&mut self, id: NodeId, kind: PortKind, count: usize) -> Result<()> {
        let node_running = self.nodes.get(&id).ok_or(DspError::NodeNotFound(id))?.is_running();
        let prior = if self.running || node_running {
            self.suspend()?
        } else {
            false
        };

        let dropped = match self.nodes.get_mut(&id) {
            Some(node) => node.resize(kind, count),
            None => Vec::new(),
        };
        for (index, peer) in dropped {
            if let Some(other) = self.nodes.get_mut(&peer.node) {
                let this = PortRef::new(id, index);
                match kind {
                    PortKind::Input => other.remove_output_connection(this, peer.index),
                    PortKind::Output => other.remove_input_connection(this, peer.index),
                };
            }
        }
        self.dirty = true;
        tracing::debug!(chain = %self.id, node = %id, %kind, count, "port count changed");

        self.resume(prior)
    }

    /// Set a member's in-place eligibility; re-wires a running chain.
    pub fn set_in_place(&mut self, id: NodeId, status: bool) -> Result<()> {
        let current = self.nodes.get(&id).ok_or(DspError::NodeNotFound(id))?.is_in_place();
        if current == status {
            return Ok(());
        }
        let prior = self.suspend()?;
        if let Some(node) = self.nodes.get_mut(&id) {
            node.set_in_place(status);
        }
        self.resume(prior)
    }

    /// Mark whether a member wants to be executed. Takes effect next block.
    pub fn mark_should_perform(&mut self, id: NodeId, status: bool) -> Result<()> {
        let node = self.nodes.get_mut(&id).ok_or(DspError::NodeNotFound(id))?;
        node.mark_should_perform(status);
        Ok(())
    }

    /// Replace sample rate and block size. Stops following the context's
    /// device settings.
    pub fn set_settings(&mut self, settings: DeviceSettings) -> Result<()> {
        settings.validate()?;
        let prior = self.suspend()?;
        self.settings = settings;
        self.follow_device = false;
        self.resume(prior)
    }

    /// Topologically sort the members.
    ///
    /// Independent nodes keep their insertion order. On a cycle the previous
    /// order stays in place and [`DspError::CyclicGraph`] names the nodes
    /// involved.
    pub fn compile(&mut self) -> Result<()> {
        let edges = self.edges();
        let n = self.members.len();

        let mut successors = vec![Vec::new(); n];
        let mut indegree = vec![0usize; n];
        for &(from, to) in edges.iter().sorted() {
            successors[from].push(to);
            indegree[to] += 1;
        }

        let mut ready: BinaryHeap<Reverse<usize>> = indegree.iter().positions(|&d| d == 0).map(Reverse).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(pos)) = ready.pop() {
            order.push(self.members[pos]);
            for &next in &successors[pos] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != n {
            let nodes = self.cycle_members(&edges);
            tracing::debug!(chain = %self.id, cycle = ?nodes, "compile rejected a cyclic graph");
            return Err(DspError::CyclicGraph { nodes });
        }

        tracing::debug!(chain = %self.id, order = ?order, "compiled");
        self.order = order;
        self.dirty = false;
        Ok(())
    }

    /// Producer → consumer edges as member positions, from both port sides.
    fn edges(&self) -> HashSet<(usize, usize)> {
        let position: HashMap<NodeId, usize> = self.members.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let mut edges = HashSet::new();

        for (pos, id) in self.members.iter().enumerate() {
            let node = match self.nodes.get(id) {
                Some(node) => node,
                None => continue,
            };
            for port in node.inputs() {
                for peer in port.peers() {
                    match position.get(&peer.node) {
                        Some(&from) => {
                            edges.insert((from, pos));
                        }
                        None => tracing::warn!(chain = %self.id, node = %id, %peer, "ignoring inlet peer outside the chain"),
                    }
                }
            }
            for port in node.outputs() {
                for peer in port.peers() {
                    match position.get(&peer.node) {
                        Some(&to) => {
                            edges.insert((pos, to));
                        }
                        None => tracing::warn!(chain = %self.id, node = %id, %peer, "ignoring outlet peer outside the chain"),
                    }
                }
            }
        }
        edges
    }

    fn cycle_members(&self, edges: &HashSet<(usize, usize)>) -> Vec<NodeId> {
        let mut graph = DiGraph::<NodeId, ()>::with_capacity(self.members.len(), edges.len());
        let indices: Vec<_> = self.members.iter().map(|id| graph.add_node(*id)).collect();
        for &(from, to) in edges {
            graph.add_edge(indices[from], indices[to], ());
        }

        tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .flatten()
            .map(|ix| ix.index())
            .sorted()
            .map(|pos| self.members[pos])
            .collect()
    }

    fn refresh_settings(&mut self) {
        if !self.follow_device {
            return;
        }
        if let Some(device) = self.device_manager() {
            self.settings = device.settings();
        }
    }

    /// Start every node in execution order.
    ///
    /// Compiles first if the topology changed. If any node fails, the whole
    /// chain is stopped again and the error returned.
    pub fn start(&mut self) -> Result<()> {
        self.stop();
        if self.dirty {
            self.compile()?;
        }
        self.refresh_settings();

        self.pool.reset(self.settings.block_size);
        self.running = true;

        if let Err(err) = self.start_nodes() {
            tracing::error!(chain = %self.id, error = %err, "chain failed to start");
            self.stop();
            return Err(err);
        }
        self.build_schedule();

        tracing::debug!(
            chain = %self.id,
            nodes = self.order.len(),
            vectors = self.pool.len(),
            sample_rate = self.settings.sample_rate,
            block_size = self.settings.block_size,
            "chain started"
        );
        Ok(())
    }

    fn start_nodes(&mut self) -> Result<()> {
        let mut upstream = Vec::new();
        for i in 0..self.order.len() {
            let id = self.order[i];

            upstream.clear();
            if let Some(node) = self.nodes.get(&id) {
                upstream.extend(node.inputs().iter().map(|port| self.upstream_of(port)));
            }

            if let Some(node) = self.nodes.get_mut(&id) {
                let mut wiring = Wiring {
                    settings: self.settings,
                    pool: &mut self.pool,
                    upstream: &upstream,
                };
                node.start_with(&mut wiring)?;
            }
        }
        Ok(())
    }

    /// What the single producer of `port` can lend it.
    fn upstream_of(&self, port: &Port) -> Upstream {
        match port.peers() {
            [peer] => Upstream {
                vector: self.outlet_vector(*peer),
                exclusive: self.readers_of(*peer) == 1,
            },
            _ => Upstream::default(),
        }
    }

    fn outlet_vector(&self, outlet: PortRef) -> Option<BufferId> {
        self.nodes.get(&outlet.node)?.output_port(outlet.index)?.vector()
    }

    /// Inlets in the chain reading from `outlet`.
    fn readers_of(&self, outlet: PortRef) -> usize {
        self.nodes
            .values()
            .flat_map(|n| n.inputs())
            .filter(|p| p.contains(outlet))
            .count()
    }

    fn build_schedule(&mut self) {
        let mut schedule = core::mem::take(&mut self.schedule);
        schedule.clear();

        for id in &self.order {
            let node = match self.nodes.get(id) {
                Some(node) => node,
                None => continue,
            };
            for (port, handle) in node.inputs().iter().zip(node.input_vectors()) {
                let dst = match handle {
                    Some(dst) if !port.is_borrowed() => *dst,
                    _ => continue,
                };
                let sources: Vec<BufferId> = port.peers().iter().filter_map(|p| self.outlet_vector(*p)).collect();
                match sources.as_slice() {
                    [] => schedule.push(Step::Clear(dst)),
                    [src] => schedule.push(Step::Copy { src: *src, dst }),
                    many => {
                        schedule.push(Step::Clear(dst));
                        schedule.extend(many.iter().map(|&src| Step::Accumulate { src, dst }));
                    }
                }
            }
            schedule.push(Step::Perform(*id));
        }

        self.schedule = schedule;
    }

    /// Stop every node. Safe to call repeatedly.
    pub fn stop(&mut self) {
        for node in self.nodes.values_mut() {
            node.stop();
        }
        let was_running = core::mem::replace(&mut self.running, false);
        self.schedule.clear();
        self.pool.release();

        if was_running {
            tracing::debug!(chain = %self.id, "chain stopped");
        }
    }

    /// Process one block. Real-time path: no allocation, no locking.
    pub fn tick(&mut self) {
        if !self.running {
            return;
        }

        #[cfg(feature = "warn_on_empty")]
        if self.order.is_empty() {
            tracing::warn!(chain = %self.id, "ticking an empty chain");
        }

        for step in self.schedule.iter() {
            match *step {
                Step::Clear(dst) => self.pool.clear(dst),
                Step::Copy { src, dst } => self.pool.copy(src, dst),
                Step::Accumulate { src, dst } => self.pool.accumulate(src, dst),
                Step::Perform(id) => {
                    if let Some(node) = self.nodes.get_mut(&id) {
                        node.perform(&mut self.pool);
                    }
                }
            }
        }
        self.blocks_processed += 1;
    }

    /// Stop the chain so its structure may change, returning whether it was
    /// running.
    ///
    /// Holding `&mut Chain` already keeps the real-time path out; see
    /// [`SharedChain::suspend`](crate::SharedChain::suspend) for the
    /// cross-thread version. If this fails, do not call `resume`; call
    /// [`stop`](Self::stop) instead.
    pub fn suspend(&mut self) -> Result<bool> {
        if !self.running {
            return Ok(false);
        }
        self.stop();
        tracing::debug!(chain = %self.id, "chain suspended");
        Ok(true)
    }

    /// Pairs with [`suspend`](Self::suspend): recompile and restart if the
    /// chain was running before.
    pub fn resume(&mut self, prior: bool) -> Result<()> {
        if !prior {
            return Ok(());
        }
        self.compile()?;
        self.start()?;
        tracing::debug!(chain = %self.id, "chain resumed");
        Ok(())
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::new(DeviceSettings::default())
    }
}

impl Drop for Chain {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("id", &self.id)
            .field("members", &self.members)
            .field("order", &self.order)
            .field("running", &self.running)
            .field("settings", &self.settings)
            .finish()
    }
}
