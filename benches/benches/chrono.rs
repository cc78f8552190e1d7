// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use understory_chrono::{Checkout, DependencyGraph, Identifier, Variable};

#[derive(Clone)]
struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next_u32(&mut self) -> u32 {
        // Numerical Recipes LCG parameters.
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1);
        (self.0 >> 32) as u32
    }

    fn gen_range_usize(&mut self, upper_exclusive: usize) -> usize {
        if upper_exclusive == 0 {
            return 0;
        }
        (self.next_u32() as usize) % upper_exclusive
    }
}

/// A variable followed by `len` identifiers, each adding one to the previous.
fn build_chain(len: usize, history_limit: usize) -> (Checkout<u64>, Variable, Identifier) {
    let mut checkout = Checkout::with_history_limit(history_limit);
    let head = checkout.variable(0);
    let mut last: Identifier = head.into();
    for _ in 0..len {
        let previous = last;
        last = checkout.identifier(move |ctx| Ok(ctx.read(previous)? + 1));
    }
    checkout.propagate().expect("chain has no cycles");
    (checkout, head, last)
}

/// `n` identifiers, each summing up to `edges_per_node` earlier ones.
fn build_dag(n: usize, edges_per_node: usize, seed: u64) -> (Checkout<u64>, Variable) {
    let mut checkout = Checkout::new();
    let mut rng = Lcg::new(seed);
    let root = checkout.variable(1);
    let mut nodes: Vec<Identifier> = vec![root.into()];
    for _ in 1..n {
        let out = edges_per_node.min(nodes.len());
        let inputs: Vec<Identifier> = (0..out)
            .map(|_| nodes[rng.gen_range_usize(nodes.len())])
            .collect();
        nodes.push(checkout.identifier(move |ctx| {
            let mut sum = 0_u64;
            for &input in &inputs {
                sum = sum.wrapping_add(ctx.read(input)?);
            }
            Ok(sum)
        }));
    }
    checkout.propagate().expect("inputs always precede their dependents");
    (checkout, root)
}

fn bench_chrono(c: &mut Criterion) {
    let mut group = c.benchmark_group("understory_chrono");
    group.sample_size(30);

    for &len in &[100_usize, 1_300] {
        group.bench_function(format!("chain_write_propagate(len={len})"), |b| {
            b.iter_batched(
                || build_chain(len, 1),
                |(mut checkout, head, last)| {
                    checkout.write(head, 1);
                    checkout.propagate().expect("chain has no cycles");
                    black_box(checkout.read(last).expect("chain end is committed"));
                },
                BatchSize::LargeInput,
            );
        });

        group.bench_function(format!("chain_undo_redo(len={len})"), |b| {
            b.iter_batched(
                || {
                    let (mut checkout, head, last) = build_chain(len, 2);
                    checkout.write(head, 1);
                    checkout.propagate().expect("chain has no cycles");
                    (checkout, last)
                },
                |(mut checkout, last)| {
                    checkout.undo();
                    checkout.redo();
                    black_box(checkout.read(last).expect("chain end is committed"));
                },
                BatchSize::LargeInput,
            );
        });
    }

    for &(n, edges_per_node) in &[(256_usize, 2_usize), (4_096_usize, 4_usize)] {
        group.bench_function(format!("dag_write_propagate(n={n},e={edges_per_node})"), |b| {
            b.iter_batched(
                || build_dag(n, edges_per_node, 0xC4_0000_0000_0001),
                |(mut checkout, root)| {
                    checkout.write(root, 2);
                    black_box(checkout.propagate().expect("dag has no cycles"));
                },
                BatchSize::LargeInput,
            );
        });

        group.bench_function(format!("graph_transitive_dependents(n={n},e={edges_per_node})"), |b| {
            b.iter_batched(
                || {
                    let (checkout, root) = build_dag(n, edges_per_node, 0xC4_0000_0000_0002);
                    let graph: DependencyGraph = checkout.graph().clone();
                    (graph, root)
                },
                |(graph, root)| {
                    black_box(graph.transitive_dependents(root.id()));
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_chrono);
criterion_main!(benches);
