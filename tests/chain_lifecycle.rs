use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dspchain::nodes::{Constant, ConstantMessage, Gain, Mixer};
use dspchain::{BlockIo, Chain, DeviceSettings, DspError, Node, NodeId, PortKind, PortRef, PrepareContext, ProcessContext, Processor};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn settings() -> DeviceSettings {
    DeviceSettings::new(48_000, 16)
}

/// Counts lifecycle calls and copies inlet 0 to outlet 0.
#[derive(Clone, Default)]
struct Probe {
    prepared: Arc<AtomicUsize>,
    performed: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl Processor for Probe {
    type Message = ();

    fn prepare(&mut self, _ctx: &PrepareContext) {
        self.prepared.fetch_add(1, Ordering::SeqCst);
    }

    fn perform(&mut self, _ctx: &ProcessContext, _messages: impl Iterator<Item = ()>, io: &mut BlockIo<'_>) {
        self.performed.fetch_add(1, Ordering::SeqCst);
        io.copy(0, 0);
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    fn num_inputs(&self) -> usize {
        1
    }
}

fn series() -> (Chain, NodeId, NodeId) {
    let mut chain = Chain::new(settings());
    let a = chain.add(Constant::new(0.25)).unwrap().id();
    let b = chain.add(Gain::new(2.0).without_smoothing()).unwrap().id();
    chain.connect(a, 0, b, 0).unwrap();
    (chain, a, b)
}

#[test]
fn in_place_consumer_shares_the_producer_vector() {
    init_tracing();
    let (mut chain, a, b) = series();
    chain.start().unwrap();
    chain.tick();

    let a_out = chain.node(a).unwrap().output_vectors()[0];
    let b_in = chain.node(b).unwrap().input_vectors()[0];
    assert!(a_out.is_some());
    assert_eq!(a_out, b_in);
    assert_eq!(chain.output(b, 0).unwrap(), &[0.5; 16]);
}

#[test]
fn ineligible_consumer_gets_its_own_vector() {
    let (mut chain, a, b) = series();
    chain.set_in_place(b, false).unwrap();
    chain.start().unwrap();
    chain.tick();

    let a_out = chain.node(a).unwrap().output_vectors()[0];
    let b_in = chain.node(b).unwrap().input_vectors()[0];
    let b_out = chain.node(b).unwrap().output_vectors()[0];
    assert_ne!(a_out, b_in);
    assert_ne!(b_in, b_out);
    assert_eq!(chain.input(b, 0).unwrap(), &[0.25; 16]);
    assert_eq!(chain.output(a, 0).unwrap(), &[0.25; 16]);
    assert_eq!(chain.output(b, 0).unwrap(), &[0.5; 16]);
}

#[test]
fn shared_producer_output_is_not_overwritten_in_place() {
    let mut chain = Chain::new(settings());
    let a = chain.add(Constant::new(1.0)).unwrap().id();
    let g1 = chain.add(Gain::new(0.5).without_smoothing()).unwrap().id();
    let g2 = chain.add(Gain::new(3.0).without_smoothing()).unwrap().id();
    chain.connect(a, 0, g1, 0).unwrap();
    chain.connect(a, 0, g2, 0).unwrap();
    chain.start().unwrap();
    chain.tick();

    assert_eq!(chain.output(a, 0).unwrap(), &[1.0; 16]);
    assert_eq!(chain.output(g1, 0).unwrap(), &[0.5; 16]);
    assert_eq!(chain.output(g2, 0).unwrap(), &[3.0; 16]);
}

#[test]
fn stop_is_idempotent() {
    let probe = Probe::default();
    let mut chain = Chain::new(settings());
    let id = chain.add(probe.clone()).unwrap().id();
    chain.start().unwrap();

    chain.stop();
    let node = chain.node(id).unwrap();
    let once = (node.is_running(), node.input_vectors().to_vec(), node.output_vectors().to_vec());

    chain.stop();
    let node = chain.node(id).unwrap();
    let twice = (node.is_running(), node.input_vectors().to_vec(), node.output_vectors().to_vec());

    assert_eq!(once, twice);
    assert!(!once.0);
    assert_eq!(probe.released.load(Ordering::SeqCst), 1);
}

#[test]
fn restart_rebinds_the_same_vectors() {
    let (mut chain, a, b) = series();
    chain.start().unwrap();
    let before = (
        chain.node(a).unwrap().output_vectors().to_vec(),
        chain.node(b).unwrap().input_vectors().to_vec(),
        chain.node(b).unwrap().output_vectors().to_vec(),
    );

    chain.stop();
    assert!(chain.node(b).unwrap().input_vectors().iter().all(Option::is_none));
    chain.start().unwrap();

    let after = (
        chain.node(a).unwrap().output_vectors().to_vec(),
        chain.node(b).unwrap().input_vectors().to_vec(),
        chain.node(b).unwrap().output_vectors().to_vec(),
    );
    assert_eq!(before, after);
    assert!(chain.node(b).unwrap().is_input_connected(0));
}

#[test]
fn suspend_resume_does_not_skip_or_duplicate_blocks() {
    let probe = Probe::default();
    let mut chain = Chain::new(settings());
    chain.add(probe.clone()).unwrap();
    chain.start().unwrap();

    for i in 0..10 {
        if i == 5 {
            let prior = chain.suspend().unwrap();
            assert!(prior);
            chain.resume(prior).unwrap();
        }
        chain.tick();
    }
    assert_eq!(chain.blocks_processed(), 10);
    assert_eq!(probe.performed.load(Ordering::SeqCst), 10);
    assert_eq!(probe.prepared.load(Ordering::SeqCst), 2);
}

#[test]
fn resume_without_prior_keeps_the_chain_stopped() {
    let (mut chain, _, _) = series();
    assert!(!chain.suspend().unwrap());
    chain.resume(false).unwrap();
    assert!(!chain.is_running());
    chain.tick();
    assert_eq!(chain.blocks_processed(), 0);
}

#[test]
fn failed_resume_leaves_the_chain_stopped() {
    let (mut chain, a, b) = series();
    chain.start().unwrap();

    let prior = chain.suspend().unwrap();
    chain.set_input_port_count(a, 1).unwrap();
    chain.connect(b, 0, a, 0).unwrap();
    let err = chain.resume(prior).unwrap_err();

    assert!(matches!(err, DspError::CyclicGraph { .. }));
    assert!(!chain.is_running());
    assert!(chain.nodes().all(|n| !n.is_running()));
}

#[test]
fn failed_start_rolls_back_every_node() {
    init_tracing();
    let mut chain = Chain::new(DeviceSettings::new(48_000, 0));
    let probe = Probe::default();
    chain.add(probe.clone()).unwrap();
    chain.add(Constant::new(1.0)).unwrap();

    let err = chain.start().unwrap_err();
    assert!(matches!(
        err,
        DspError::PortStartFailure {
            kind: PortKind::Input,
            index: 0,
            ..
        }
    ));
    assert!(!chain.is_running());
    for node in chain.nodes() {
        assert!(!node.is_running());
        assert!(node.input_vectors().iter().all(Option::is_none));
        assert!(node.output_vectors().iter().all(Option::is_none));
    }
    assert_eq!(probe.prepared.load(Ordering::SeqCst), 0);
}

#[test]
fn removing_an_unknown_connection_is_a_noop() {
    let (mut node, _) = Node::new(Probe::default());
    let known = PortRef::new(NodeId::from_raw(1), 0);
    let unknown = PortRef::new(NodeId::from_raw(2), 0);

    assert!(!node.is_input_connected(0));
    assert!(!node.remove_input_connection(unknown, 0));
    assert!(!node.is_input_connected(0));

    node.add_input_connection(known, 0);
    assert!(node.is_input_connected(0));
    assert!(!node.remove_input_connection(unknown, 0));
    assert!(node.is_input_connected(0));

    let (mut chain, a, b) = series();
    let c = chain.add(Gain::new(1.0)).unwrap().id();
    assert_eq!(chain.disconnect(a, 0, c, 0), Ok(false));
    assert!(!chain.node(c).unwrap().is_input_connected(0));
    assert!(chain.node(b).unwrap().is_input_connected(0));
}

#[test]
fn zero_output_ports_reports_nothing_connected() {
    let (mut chain, a, b) = series();
    chain.start().unwrap();
    chain.set_output_port_count(a, 0).unwrap();

    let node = chain.node(a).unwrap();
    assert_eq!(node.num_outputs(), 0);
    assert!(node.output_vectors().is_empty());
    assert!((0..4).all(|i| !node.is_output_connected(i)));
    assert!(!chain.node(b).unwrap().is_input_connected(0));
    assert!(chain.is_running());
}

#[test]
fn input_port_count_change_discards_connections_on_both_ends() {
    let (mut chain, a, b) = series();
    chain.start().unwrap();
    chain.set_input_port_count(b, 2).unwrap();

    let node = chain.node(b).unwrap();
    assert_eq!(node.input_vectors().len(), 2);
    assert!(!node.is_input_connected(0));
    assert!(!chain.node(a).unwrap().is_output_connected(0));

    chain.tick();
    assert_eq!(chain.output(b, 0).unwrap(), &[0.0; 16]);
}

#[test]
fn fan_in_sums_in_connection_order() {
    fn mix(order: [f32; 3]) -> f32 {
        let mut chain = Chain::new(DeviceSettings::new(48_000, 1));
        let sources: Vec<_> = order.iter().map(|v| chain.add(Constant::new(*v)).unwrap().id()).collect();
        let sum = chain.add(Mixer::new(1)).unwrap().id();
        for source in &sources {
            chain.connect(*source, 0, sum, 0).unwrap();
        }
        chain.start().unwrap();
        chain.tick();
        chain.output(sum, 0).unwrap()[0]
    }

    assert_eq!(mix([1.0e8, 1.0, -1.0e8]), 0.0);
    assert_eq!(mix([1.0e8, -1.0e8, 1.0]), 1.0);
}

#[test]
fn unconnected_inlets_read_silence() {
    let mut chain = Chain::new(settings());
    let gain = chain.add(Gain::new(1.0).without_smoothing()).unwrap().id();
    chain.start().unwrap();
    chain.tick();
    assert_eq!(chain.output(gain, 0).unwrap(), &[0.0; 16]);
}

#[test]
fn nodes_that_should_not_perform_output_silence() {
    let mut chain = Chain::new(settings());
    let mut source = chain.add(Constant::new(1.0)).unwrap();
    chain.start().unwrap();

    chain.mark_should_perform(source.id(), false).unwrap();
    chain.tick();
    assert_eq!(chain.output(source.id(), 0).unwrap(), &[0.0; 16]);

    chain.mark_should_perform(source.id(), true).unwrap();
    source.send(ConstantMessage::SetValue(0.75)).unwrap();
    chain.tick();
    assert_eq!(chain.output(source.id(), 0).unwrap(), &[0.75; 16]);
}

#[test]
fn settings_change_resizes_vectors() {
    let (mut chain, _, b) = series();
    chain.start().unwrap();
    chain.set_settings(DeviceSettings::new(96_000, 32)).unwrap();

    assert!(chain.is_running());
    assert_eq!(chain.node(b).unwrap().block_size(), 32);
    assert_eq!(chain.node(b).unwrap().sample_rate(), 96_000);
    chain.tick();
    assert_eq!(chain.output(b, 0).unwrap().len(), 32);

    let err = chain.set_settings(DeviceSettings::new(96_000, 0)).unwrap_err();
    assert!(matches!(err, DspError::InvalidSettings { .. }));
    assert!(chain.is_running());
}

#[test]
fn removed_nodes_can_join_another_chain() {
    let (mut chain, a, b) = series();
    let node = chain.remove_node(b).unwrap();
    assert_eq!(node.id(), None);
    assert_eq!(chain.len(), 1);
    assert!(!chain.node(a).unwrap().is_output_connected(0));

    let mut other = Chain::new(settings());
    let id = other.add_node(node).unwrap();
    assert_eq!(other.node(id).unwrap().chain(), Some(other.id()));
    other.start().unwrap();
    other.tick();
    assert_eq!(other.output(id, 0).unwrap(), &[0.0; 16]);
}
