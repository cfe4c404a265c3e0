//! Core node type, the processor trait and their contexts.

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec;
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;

use rtrb::{Consumer, Producer, RingBuffer};

use crate::buffer::{BlockIo, BufferId, BufferPool};
use crate::chain::ChainId;
use crate::context::Context;
use crate::device::{DeviceManager, DeviceSettings};
use crate::error::Result;
use crate::port::{Port, PortKind, PortRef};

/// Default capacity of a node's parameter message queue.
pub const DEFAULT_QUEUE_SIZE: usize = 64;

/// Information available during audio processing.
///
/// Passed to every [`Processor::perform`] call.
#[derive(Clone, Copy, Debug)]
pub struct ProcessContext {
    /// Sample rate of the chain in Hz (e.g., 44100, 48000)
    pub sample_rate: u32,
    /// Number of samples in every vector this block
    pub block_size: usize,
}

/// Information handed to [`Processor::prepare`] once per start.
#[derive(Clone, Copy, Debug)]
pub struct PrepareContext {
    pub sample_rate: u32,
    pub block_size: usize,
    pub num_inputs: usize,
    pub num_outputs: usize,
    /// Outlet 0 shares inlet 0's vector for this run.
    pub in_place: bool,
}

/// Identifier for a node within a chain.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// An id as assigned by a chain. Useful for wiring detached nodes.
    pub fn from_raw(raw: u32) -> Self {
        NodeId(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The DSP behavior a [`Node`] runs.
///
/// Implementations provide the per-block algorithm; the node takes care of
/// ports, vectors and lifecycle.
///
/// ```
/// use dspchain::{BlockIo, ProcessContext, Processor};
///
/// enum HalfMessage {
///     Bypass(bool),
/// }
///
/// struct Half {
///     bypass: bool,
/// }
///
/// impl Processor for Half {
///     type Message = HalfMessage;
///
///     fn perform(
///         &mut self,
///         _ctx: &ProcessContext,
///         messages: impl Iterator<Item = HalfMessage>,
///         io: &mut BlockIo<'_>,
///     ) {
///         for msg in messages {
///             match msg {
///                 HalfMessage::Bypass(b) => self.bypass = b,
///             }
///         }
///         let factor = if self.bypass { 1.0 } else { 0.5 };
///         io.process(0, 0, |x| x * factor);
///     }
///
///     fn num_inputs(&self) -> usize { 1 }
/// }
/// ```
pub trait Processor: Send + 'static {
    /// Message type for parameter updates (use `()` if none needed).
    type Message: Send + 'static;

    /// Called once per start, after vectors are bound and before the first
    /// block. Size internal working state here.
    fn prepare(&mut self, _ctx: &PrepareContext) {}

    /// Process exactly one block.
    ///
    /// Drain `messages` first, then read inputs and write outputs through `io`.
    /// Runs on the real-time path: no allocation, no locks.
    fn perform(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = Self::Message>,
        io: &mut BlockIo<'_>,
    );

    /// Called once per stop. Mirrors [`prepare`](Self::prepare).
    fn release(&mut self) {}

    /// Number of inlets the node starts with.
    fn num_inputs(&self) -> usize {
        0
    }

    /// Number of outlets the node starts with.
    fn num_outputs(&self) -> usize {
        1
    }

    fn name(&self) -> &'static str {
        core::any::type_name::<Self>()
    }
}

/// Sending half of a node's message queue.
pub struct Sender<M: Send + 'static> {
    producer: Producer<M>,
}

impl<M: Send + 'static> Sender<M> {
    /// Queue a message for the next block.
    ///
    /// Returns `Err(msg)` if the queue is full.
    pub fn send(&mut self, msg: M) -> core::result::Result<(), M> {
        self.producer.push(msg).map_err(|rtrb::PushError::Full(m)| m)
    }

    /// Free slots in the queue.
    pub fn capacity_left(&self) -> usize {
        self.producer.slots()
    }
}

/// A node's id plus the sender for its messages, returned by
/// [`Chain::add`](crate::Chain::add).
pub struct Handle<M: Send + 'static> {
    pub(crate) id: NodeId,
    pub(crate) sender: Sender<M>,
}

impl<M: Send + 'static> Handle<M> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn send(&mut self, msg: M) -> core::result::Result<(), M> {
        self.sender.send(msg)
    }

    pub fn into_sender(self) -> Sender<M> {
        self.sender
    }
}

// Type-erased wrapper so a node can own any processor
trait ErasedProcessor: Send {
    fn prepare(&mut self, ctx: &PrepareContext);
    fn perform(&mut self, ctx: &ProcessContext, io: &mut BlockIo<'_>);
    fn release(&mut self);
    fn name(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
}

struct ProcessorCell<P: Processor> {
    processor: P,
    receiver: Consumer<P::Message>,
}

impl<P: Processor> ErasedProcessor for ProcessorCell<P> {
    fn prepare(&mut self, ctx: &PrepareContext) {
        self.processor.prepare(ctx);
    }

    fn perform(&mut self, ctx: &ProcessContext, io: &mut BlockIo<'_>) {
        let receiver = &mut self.receiver;
        let processor = &mut self.processor;

        // drains without allocating
        let messages = core::iter::from_fn(|| receiver.pop().ok());
        processor.perform(ctx, messages, io);
    }

    fn release(&mut self) {
        self.processor.release();
    }

    fn name(&self) -> &'static str {
        self.processor.name()
    }

    fn as_any(&self) -> &dyn Any {
        &self.processor
    }
}

/// What a producing outlet offers the inlet being started.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Upstream {
    /// The producer's vector, when the inlet has exactly one running peer.
    pub(crate) vector: Option<BufferId>,
    /// The producing outlet feeds no inlet but this one.
    pub(crate) exclusive: bool,
}

/// Everything a chain hands a node while starting it.
pub(crate) struct Wiring<'a> {
    pub(crate) settings: DeviceSettings,
    pub(crate) pool: &'a mut BufferPool,
    pub(crate) upstream: &'a [Upstream],
}

/// A unit of signal processing with a fixed set of inlets and outlets at any
/// instant.
pub struct Node {
    id: Option<NodeId>,
    chain: Option<ChainId>,
    context: Option<Weak<Context>>,
    processor: Box<dyn ErasedProcessor>,

    inputs: Vec<Port>,
    outputs: Vec<Port>,
    sample_ins: Box<[Option<BufferId>]>,
    sample_outs: Box<[Option<BufferId>]>,

    sample_rate: u32,
    block_size: usize,
    in_place: bool,
    running: bool,
    should_perform: bool,
}

impl Node {
    /// Wrap a processor, returning the node and the sender for its messages.
    pub fn new<P: Processor>(processor: P) -> (Self, Sender<P::Message>) {
        Self::with_queue_size(processor, DEFAULT_QUEUE_SIZE)
    }

    pub fn with_queue_size<P: Processor>(processor: P, queue_size: usize) -> (Self, Sender<P::Message>) {
        let (producer, receiver) = RingBuffer::new(queue_size);
        let num_inputs = processor.num_inputs();
        let num_outputs = processor.num_outputs();

        let node = Self {
            id: None,
            chain: None,
            context: None,
            processor: Box::new(ProcessorCell { processor, receiver }),
            inputs: make_ports(PortKind::Input, num_inputs),
            outputs: make_ports(PortKind::Output, num_outputs),
            sample_ins: vec![None; num_inputs].into_boxed_slice(),
            sample_outs: vec![None; num_outputs].into_boxed_slice(),
            sample_rate: 0,
            block_size: 0,
            in_place: true,
            running: false,
            should_perform: true,
        };
        (node, Sender { producer })
    }

    /// Id within the owning chain.
    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    /// The chain this node belongs to, if any.
    pub fn chain(&self) -> Option<ChainId> {
        self.chain
    }

    /// The owning chain's context, if the chain has one and it is alive.
    pub fn context(&self) -> Option<Arc<Context>> {
        self.context.as_ref().and_then(Weak::upgrade)
    }

    /// The device manager of the owning chain's context.
    pub fn device_manager(&self) -> Option<Arc<dyn DeviceManager>> {
        self.context().map(|ctx| ctx.device_manager())
    }

    pub(crate) fn attach(&mut self, chain: ChainId, id: NodeId, context: Option<Weak<Context>>) {
        self.chain = Some(chain);
        self.id = Some(id);
        self.context = context;
    }

    pub(crate) fn set_context(&mut self, context: Weak<Context>) {
        self.context = Some(context);
    }

    pub(crate) fn detach(&mut self) {
        self.stop();
        self.chain = None;
        self.id = None;
        self.context = None;
    }

    pub fn processor_name(&self) -> &'static str {
        self.processor.name()
    }

    /// The processor, if it is a `P`.
    pub fn processor<P: Processor>(&self) -> Option<&P> {
        self.processor.as_any().downcast_ref::<P>()
    }

    #[inline]
    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    #[inline]
    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    pub fn input_port(&self, index: usize) -> Option<&Port> {
        self.inputs.get(index)
    }

    pub fn output_port(&self, index: usize) -> Option<&Port> {
        self.outputs.get(index)
    }

    /// Vector bound to each inlet; all `Some` exactly while running.
    pub fn input_vectors(&self) -> &[Option<BufferId>] {
        &self.sample_ins
    }

    /// Vector bound to each outlet; all `Some` exactly while running.
    pub fn output_vectors(&self) -> &[Option<BufferId>] {
        &self.sample_outs
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn is_in_place(&self) -> bool {
        self.in_place
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn should_perform(&self) -> bool {
        self.should_perform
    }

    /// Changes the number of inlets.
    ///
    /// A running node is stopped first. Every connection on the input side is
    /// discarded, whatever the new count. Members of a chain are resized
    /// through [`Chain::set_input_port_count`](crate::Chain::set_input_port_count)
    /// so the chain can suspend around the change.
    pub fn set_input_port_count(&mut self, count: usize) {
        if self.running {
            self.stop();
        }
        self.resize(PortKind::Input, count);
    }

    /// Output-side counterpart of [`set_input_port_count`](Self::set_input_port_count).
    pub fn set_output_port_count(&mut self, count: usize) {
        if self.running {
            self.stop();
        }
        self.resize(PortKind::Output, count);
    }

    /// Replaces one side's ports and vector handles, returning the links that
    /// were dropped as `(local index, peer)`.
    pub(crate) fn resize(&mut self, kind: PortKind, count: usize) -> Vec<(usize, PortRef)> {
        let (ports, handles) = match kind {
            PortKind::Input => (&mut self.inputs, &mut self.sample_ins),
            PortKind::Output => (&mut self.outputs, &mut self.sample_outs),
        };
        let dropped = ports
            .iter()
            .flat_map(|p| p.peers().iter().map(move |peer| (p.index(), *peer)))
            .collect();

        *ports = make_ports(kind, count);
        *handles = vec![None; count].into_boxed_slice();
        dropped
    }

    /// Connects `peer` to inlet `index`. Out-of-range indices are ignored.
    ///
    /// Returns whether the inlet's peer set changed.
    pub fn add_input_connection(&mut self, peer: PortRef, index: usize) -> bool {
        self.inputs.get_mut(index).map_or(false, |p| p.add(peer))
    }

    /// Connects `peer` to outlet `index`. Out-of-range indices are ignored.
    pub fn add_output_connection(&mut self, peer: PortRef, index: usize) -> bool {
        self.outputs.get_mut(index).map_or(false, |p| p.add(peer))
    }

    pub fn remove_input_connection(&mut self, peer: PortRef, index: usize) -> bool {
        self.inputs.get_mut(index).map_or(false, |p| p.remove(peer))
    }

    pub fn remove_output_connection(&mut self, peer: PortRef, index: usize) -> bool {
        self.outputs.get_mut(index).map_or(false, |p| p.remove(peer))
    }

    /// Drops every link to `node` on both sides.
    pub(crate) fn forget(&mut self, node: NodeId) -> bool {
        let mut changed = false;
        for port in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            changed |= port.remove_node(node);
        }
        changed
    }

    /// Whether inlet `index` has peers. `false` for out-of-range indices.
    pub fn is_input_connected(&self, index: usize) -> bool {
        self.inputs.get(index).map_or(false, |p| !p.is_empty())
    }

    /// Whether outlet `index` has peers. `false` for out-of-range indices.
    pub fn is_output_connected(&self, index: usize) -> bool {
        self.outputs.get(index).map_or(false, |p| !p.is_empty())
    }

    /// Declares whether outlet 0 may reuse inlet 0's vector. Takes effect on
    /// the next start.
    pub fn set_in_place(&mut self, status: bool) {
        self.in_place = status;
    }

    /// Marks whether the node wants to be executed. A running node that does
    /// not want to perform outputs silence.
    pub fn mark_should_perform(&mut self, status: bool) {
        self.should_perform = status;
    }

    /// Only meaningful for a detached node, where it does nothing: vectors
    /// come from a chain's pool, so there is nothing to bind. Members are
    /// reachable only through their chain and are started by
    /// [`Chain::start`](crate::Chain::start).
    pub fn start(&mut self) -> Result<()> {
        Ok(())
    }

    pub(crate) fn start_with(&mut self, wiring: &mut Wiring<'_>) -> Result<()> {
        let id = match (self.chain, self.id) {
            (Some(_), Some(id)) => id,
            _ => return Ok(()),
        };

        self.stop();
        self.sample_rate = wiring.settings.sample_rate;
        self.block_size = wiring.settings.block_size;

        if let Err(err) = self.bind(id, wiring) {
            self.unbind();
            return Err(err);
        }

        let in_place = self.sample_outs.first().copied().flatten().is_some()
            && self.sample_outs.first() == self.sample_ins.first();
        self.processor.prepare(&PrepareContext {
            sample_rate: self.sample_rate,
            block_size: self.block_size,
            num_inputs: self.inputs.len(),
            num_outputs: self.outputs.len(),
            in_place,
        });
        self.running = true;

        tracing::debug!(node = %id, processor = self.processor.name(), in_place, "node started");
        Ok(())
    }

    fn bind(&mut self, id: NodeId, wiring: &mut Wiring<'_>) -> Result<()> {
        for (i, port) in self.inputs.iter_mut().enumerate() {
            let upstream = wiring.upstream.get(i).copied().unwrap_or_default();
            let share = if self.in_place && port.peers().len() == 1 {
                upstream.vector
            } else {
                None
            };
            self.sample_ins[i] = Some(port.start(id, share, wiring.pool)?);
        }

        let shared_outlet = self.in_place_source(wiring.upstream);
        for (i, port) in self.outputs.iter_mut().enumerate() {
            let share = if i == 0 { shared_outlet } else { None };
            self.sample_outs[i] = Some(port.start(id, share, wiring.pool)?);
        }
        Ok(())
    }

    /// The vector outlet 0 may reuse: inlet 0's, if this is a one-in one-out
    /// in-place node and nobody else reads that vector.
    fn in_place_source(&self, upstream: &[Upstream]) -> Option<BufferId> {
        if !self.in_place || self.inputs.len() != 1 || self.outputs.len() != 1 {
            return None;
        }
        let inlet = &self.inputs[0];
        let exclusive = !inlet.is_borrowed() || upstream.first().map_or(false, |u| u.exclusive);
        if exclusive {
            inlet.vector()
        } else {
            None
        }
    }

    fn unbind(&mut self) {
        for port in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            port.clear();
        }
        self.sample_ins.iter_mut().for_each(|h| *h = None);
        self.sample_outs.iter_mut().for_each(|h| *h = None);
    }

    /// Stops the node. Peers stay connected so a restart re-wires the same
    /// topology.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.processor.release();
        self.unbind();
    }

    /// Runs one block. Real-time path.
    pub(crate) fn perform(&mut self, pool: &mut BufferPool) {
        if !self.running {
            return;
        }
        let mut io = BlockIo::new(pool, &self.sample_ins, &self.sample_outs);
        if !self.should_perform {
            io.silence();
            return;
        }
        let ctx = ProcessContext {
            sample_rate: self.sample_rate,
            block_size: self.block_size,
        };
        self.processor.perform(&ctx, &mut io);
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("processor", &self.processor.name())
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("running", &self.running)
            .field("in_place", &self.in_place)
            .finish()
    }
}

fn make_ports(kind: PortKind, count: usize) -> Vec<Port> {
    (0..count).map(|i| Port::new(kind, i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Passthrough;

    impl Processor for Passthrough {
        type Message = ();

        fn perform(&mut self, _ctx: &ProcessContext, _messages: impl Iterator<Item = ()>, io: &mut BlockIo<'_>) {
            io.copy(0, 0);
        }

        fn num_inputs(&self) -> usize {
            1
        }
    }

    fn peer(node: u32) -> PortRef {
        PortRef::new(NodeId(node), 0)
    }

    #[test]
    fn port_counts_follow_processor() {
        let (node, _) = Node::new(Passthrough);
        assert_eq!(node.num_inputs(), 1);
        assert_eq!(node.num_outputs(), 1);
        assert_eq!(node.input_vectors().len(), 1);
        assert_eq!(node.output_vectors().len(), 1);
        assert!(node.is_in_place());
        assert!(node.should_perform());
    }

    #[test]
    fn resizing_drops_connections_on_that_side() {
        let (mut node, _) = Node::new(Passthrough);
        node.add_input_connection(peer(1), 0);
        node.add_output_connection(peer(2), 0);

        node.set_input_port_count(3);
        assert_eq!(node.num_inputs(), 3);
        assert_eq!(node.input_vectors().len(), 3);
        assert!((0..3).all(|i| !node.is_input_connected(i)));
        assert!(node.is_output_connected(0));
    }

    #[test]
    fn out_of_range_connections_are_ignored() {
        let (mut node, _) = Node::new(Passthrough);
        assert!(!node.add_input_connection(peer(1), 4));
        assert!(!node.remove_output_connection(peer(1), 4));
        assert!(!node.is_input_connected(4));
        assert!(!node.is_output_connected(4));
    }

    #[test]
    fn detached_start_is_a_noop() {
        let (mut node, _) = Node::new(Passthrough);
        node.start().unwrap();
        assert!(!node.is_running());
        assert!(node.input_vectors().iter().all(Option::is_none));
    }

    #[test]
    fn detached_node_has_no_context() {
        let (node, _) = Node::new(Passthrough);
        assert!(node.context().is_none());
        assert!(node.device_manager().is_none());
    }

    #[test]
    fn processor_downcast() {
        let (node, _) = Node::new(Passthrough);
        assert!(node.processor::<Passthrough>().is_some());
        assert!(node.processor_name().ends_with("Passthrough"));
    }
}
