//! Device-memory load/store script for a finished instruction graph.
//!
//! Address assignment order is part of the external contract: fixed
//! preamble, per-64-channel twiddle/ones loads, then inputs and outputs in
//! first-seen order against a single increasing counter. Consumers address
//! device memory by this implicit numbering.

use std::collections::BTreeMap;

use polymap_pisa::InstructionGraph;

/// Renders the `dload`/`dstore` directives for the graph's inputs, outputs
/// and auxiliary tables.
pub fn generate_mem_file(graph: &InstructionGraph, max_rns_terms: u32) -> Vec<String> {
    let inputs = graph.input_nodes(true, false, false);
    let outputs = graph.output_nodes();

    let mut counter = 0u32;
    let next = |counter: &mut u32| {
        let address = *counter;
        *counter += 1;
        address
    };

    let mut memory_file = vec![
        format!("dload, ntt_auxiliary_table, {}", next(&mut counter)),
        format!("dload, ntt_routing_table, {}", next(&mut counter)),
        format!("dload, intt_auxiliary_table, {}", next(&mut counter)),
        format!("dload, intt_routing_table, {}", next(&mut counter)),
    ];

    // one twiddle/ones block per 64 RNS channels
    let high_rns_iters = 1 + max_rns_terms.saturating_sub(1) / 64;
    for _ in 0..8 * high_rns_iters {
        memory_file.push(format!("dload, twid, {}", next(&mut counter)));
    }
    for _ in 0..high_rns_iters {
        memory_file.push(format!("dload, ones, {}", next(&mut counter)));
    }

    let mut address_map: BTreeMap<String, u32> = BTreeMap::new();

    for node in inputs {
        let label = &graph.node(node).label;
        let address = *address_map
            .entry(label.clone())
            .or_insert_with(|| next(&mut counter));
        memory_file.push(format!("dload, poly, {address}, {label}"));
    }

    for node in outputs {
        let label = &graph.node(node).label;
        let address = *address_map
            .entry(label.clone())
            .or_insert_with(|| next(&mut counter));
        memory_file.push(format!("dstore, {label}, {address}"));
    }

    memory_file
}
