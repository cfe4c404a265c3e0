//! Property-based tests for chain compilation and port bookkeeping.
//!
//! Random topologies and port-count sequences, checked against the ordering,
//! cycle and connection invariants of `Chain`.

use proptest::prelude::*;
use dspchain::nodes::{Constant, Mixer};
use dspchain::{Chain, DeviceSettings, DspError, NodeId};

fn settings() -> DeviceSettings {
    DeviceSettings::new(48_000, 8)
}

/// A random acyclic topology: node count, a topological rank per node and the
/// edges consistent with it.
fn dag() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (2usize..8)
        .prop_flat_map(|n| {
            (
                Just(n),
                Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
                prop::collection::vec((0..n, 0..n), 0..24),
            )
        })
        .prop_map(|(n, perm, pairs)| {
            let mut rank = vec![0; n];
            for (k, node) in perm.iter().enumerate() {
                rank[*node] = k;
            }
            let edges = pairs.into_iter().filter(|&(a, b)| rank[a] < rank[b]).collect();
            (n, edges)
        })
}

fn build(n: usize, edges: &[(usize, usize)]) -> (Chain, Vec<NodeId>) {
    let mut chain = Chain::new(settings());
    let ids: Vec<_> = (0..n).map(|_| chain.add(Mixer::new(2)).unwrap().id()).collect();
    for &(a, b) in edges {
        chain.connect(ids[a], 0, ids[b], (a + b) % 2).unwrap();
    }
    (chain, ids)
}

fn position(order: &[NodeId], id: NodeId) -> usize {
    order.iter().position(|x| *x == id).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// After each resize the inlet handle array has exactly the new length
    /// and every earlier input connection is gone on both ends.
    #[test]
    fn port_count_sequences(
        counts in prop::collection::vec(0usize..6, 1..8),
        running in any::<bool>(),
    ) {
        let mut chain = Chain::new(settings());
        let source = chain.add(Constant::new(1.0)).unwrap().id();
        let target = chain.add(Mixer::new(2)).unwrap().id();
        if running {
            chain.start().unwrap();
        }

        for n in counts {
            let prior = chain.suspend().unwrap();
            let inlets = chain.node(target).unwrap().num_inputs();
            for inlet in 0..inlets {
                chain.connect(source, 0, target, inlet).unwrap();
            }
            chain.resume(prior).unwrap();

            chain.set_input_port_count(target, n).unwrap();

            let node = chain.node(target).unwrap();
            prop_assert_eq!(node.input_vectors().len(), n);
            prop_assert_eq!(node.num_inputs(), n);
            prop_assert!((0..n + 1).all(|i| !node.is_input_connected(i)));
            prop_assert!(!chain.node(source).unwrap().is_output_connected(0));
            prop_assert_eq!(chain.is_running(), running);
            if running {
                prop_assert!(node.input_vectors().iter().all(Option::is_some));
            }
        }
    }

    /// Compiled order is a permutation of the members that puts every
    /// producer before its consumers.
    #[test]
    fn order_respects_connections((n, edges) in dag()) {
        let (mut chain, ids) = build(n, &edges);
        chain.compile().unwrap();

        let order = chain.order();
        prop_assert_eq!(order.len(), n);
        for id in &ids {
            prop_assert!(order.contains(id));
        }
        for &(a, b) in &edges {
            prop_assert!(position(order, ids[a]) < position(order, ids[b]));
        }
    }

    /// Closing a cycle is reported and leaves the last good order in place.
    #[test]
    fn cycle_keeps_previous_order((n, edges) in dag(), pick in any::<prop::sample::Index>()) {
        prop_assume!(!edges.is_empty());
        let (mut chain, ids) = build(n, &edges);
        chain.compile().unwrap();
        let before = chain.order().to_vec();

        let (a, b) = edges[pick.index(edges.len())];
        chain.connect(ids[b], 0, ids[a], 0).unwrap();

        match chain.compile() {
            Err(DspError::CyclicGraph { nodes }) => {
                prop_assert!(nodes.contains(&ids[a]));
                prop_assert!(nodes.contains(&ids[b]));
            }
            other => prop_assert!(false, "expected a cycle, got {:?}", other),
        }
        prop_assert_eq!(chain.order(), before.as_slice());
        prop_assert!(chain.start().is_err());
        prop_assert!(!chain.is_running());
    }

    /// Suspend/resume pairs never skip or repeat a block.
    #[test]
    fn suspend_resume_preserves_block_count(ops in prop::collection::vec(any::<bool>(), 0..64)) {
        let (mut chain, _) = build(3, &[(0, 1), (1, 2)]);
        chain.start().unwrap();

        let mut expected = 0;
        for tick in ops {
            if tick {
                chain.tick();
                expected += 1;
            } else {
                let prior = chain.suspend().unwrap();
                chain.resume(prior).unwrap();
            }
        }
        prop_assert_eq!(chain.blocks_processed(), expected);
        prop_assert!(chain.is_running());
    }
}
