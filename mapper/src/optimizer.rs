//! Graph-driven instruction fixes and linearization.
//!
//! The passes run in a fixed order over the layer-peeled graph: lock-list,
//! variable adjustment, instruction adjustment. Each pass reads the graph
//! produced by the previous one; keeping them as separate methods keeps the
//! ordering dependency auditable.

use ahash::AHashSet;

use polymap_pisa::{InstructionGraph, NodeIndex, NodeType, Opcode, PisaInstruction};

use crate::error::MapperError;

#[derive(Debug)]
pub struct GraphOptimizer {
    rename_lock_list: AHashSet<String>,
    unique_counter: u32,
    pub perform_variable_isolation: bool,
}

impl Default for GraphOptimizer {
    fn default() -> Self {
        Self {
            rename_lock_list: AHashSet::new(),
            unique_counter: 1,
            perform_variable_isolation: false,
        }
    }
}

impl GraphOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Linearizes the graph into a producer-before-consumer instruction
    /// order (indices into `instructions`). With `fixed_order` the caller's
    /// order is passed through untouched; otherwise the order comes from a
    /// layer peel of the operation-only graph, with the hardware operand
    /// fixes applied when variable isolation is enabled.
    pub fn generate_instruction_stream_from_graph(
        &mut self,
        graph: &mut InstructionGraph,
        instructions: &mut [PisaInstruction],
        fixed_order: bool,
    ) -> Result<Vec<usize>, MapperError> {
        if fixed_order {
            return Ok((0..instructions.len()).collect());
        }

        let stripped = graph.instruction_graph();
        let layers = stripped.input_layers()?;

        if self.perform_variable_isolation {
            self.isolate_graph_variables(graph, instructions, &layers)?;
        }

        let mut stream = Vec::with_capacity(instructions.len());
        for layer in &layers {
            for &node in layer {
                let index = stripped
                    .node(node)
                    .instruction
                    .ok_or(MapperError::DanglingOperationNode)?;
                stream.push(index);
            }
        }
        Ok(stream)
    }

    /// Runs the three adjustment passes over every layer in order.
    pub fn isolate_graph_variables(
        &mut self,
        graph: &mut InstructionGraph,
        instructions: &mut [PisaInstruction],
        layers: &[Vec<NodeIndex>],
    ) -> Result<(), MapperError> {
        for layer in layers {
            for &node in layer {
                self.node_locklist(graph, instructions, node)?;
            }
        }
        for layer in layers {
            for &node in layer {
                self.node_variable_adjustment(graph, node);
            }
        }
        for layer in layers {
            for &node in layer {
                self.node_instruction_adjustment(graph, instructions, node)?;
            }
        }
        Ok(())
    }

    /// Marks registers that must keep their names: graph outputs, and every
    /// register a MAC writes (the accumulator alias chain depends on the
    /// name staying stable across versions).
    fn node_locklist(
        &mut self,
        graph: &InstructionGraph,
        instructions: &[PisaInstruction],
        node: NodeIndex,
    ) -> Result<(), MapperError> {
        let index = graph
            .node(node)
            .instruction
            .ok_or(MapperError::DanglingOperationNode)?;
        let is_mac = instructions[index].opcode == Opcode::Mac;
        for target in graph.out_nodes(node) {
            if graph.out_degree(target) == 0 || is_mac {
                self.rename_lock_list
                    .insert(graph.node(target).label.clone());
            }
        }
        Ok(())
    }

    /// Gives every unlocked output register a unique `uid_<n>_` name so
    /// register reuse across kernels cannot alias.
    fn node_variable_adjustment(&mut self, graph: &mut InstructionGraph, node: NodeIndex) {
        for target in graph.out_nodes(node) {
            let label = graph.node(target).label.clone();
            if !self.rename_lock_list.contains(&label) {
                let renamed = format!("uid_{}_{label}", self.unique_counter);
                tracing::debug!(from = %label, to = %renamed, "adjusting register");
                self.unique_counter += 1;
                graph.node_mut(target).label = renamed;
            }
        }
    }

    /// Rewrites instruction operands from the (possibly renamed) graph node
    /// labels, resolving the hardware's operand-slot expectations:
    ///
    /// * `muli` wants the immediate in slot 1, whichever input carries it;
    /// * `mac` wants the input aliasing the accumulator output in slot 0,
    ///   and a MAC with no aliasing input is an invalid instruction.
    fn node_instruction_adjustment(
        &self,
        graph: &mut InstructionGraph,
        instructions: &mut [PisaInstruction],
        node: NodeIndex,
    ) -> Result<(), MapperError> {
        let index = graph
            .node(node)
            .instruction
            .ok_or(MapperError::DanglingOperationNode)?;
        let in_nodes = graph.in_nodes(node);
        let out_nodes = graph.out_nodes(node);

        match instructions[index].opcode {
            Opcode::Muli if in_nodes.len() == 2 => {
                let label_0 = graph.node(in_nodes[0]).label.clone();
                let label_1 = graph.node(in_nodes[1]).label.clone();
                let instruction = &mut instructions[index];
                if graph.node(in_nodes[0]).node_type == NodeType::Immediate {
                    instruction.input_operand_mut(0).set_location(label_1);
                    instruction.input_operand_mut(1).set_location(label_0);
                } else {
                    instruction.input_operand_mut(0).set_location(label_0);
                    instruction.input_operand_mut(1).set_location(label_1);
                }
            }
            Opcode::Mac => {
                if in_nodes.len() != 3 || out_nodes.is_empty() {
                    return Err(MapperError::MacNoAlias {
                        instruction: instructions[index].to_string(),
                    });
                }
                let inputs: Vec<String> = in_nodes
                    .iter()
                    .map(|&n| graph.node(n).label.clone())
                    .collect();
                let output = graph.node(out_nodes[0]).label.clone();

                let instruction = &mut instructions[index];
                instruction.output_operand_mut(0).set_location(output.clone());
                let ordered = if output == inputs[0] {
                    [0, 1, 2]
                } else if output == inputs[1] {
                    [1, 0, 2]
                } else if output == inputs[2] {
                    [2, 0, 1]
                } else {
                    return Err(MapperError::MacNoAlias {
                        instruction: instruction.to_string(),
                    });
                };
                for (slot, &source) in ordered.iter().enumerate() {
                    instruction
                        .input_operand_mut(slot)
                        .set_location(inputs[source].clone());
                }
            }
            _ => {
                let count = in_nodes.len().min(instructions[index].num_input_operands());
                for x in 0..count {
                    let label = graph.node(in_nodes[x]).label.clone();
                    instructions[index].input_operand_mut(x).set_location(label);
                }
            }
        }

        let count = out_nodes.len().min(instructions[index].num_output_operands());
        for x in 0..count {
            let label = graph.node(out_nodes[x]).label.clone();
            instructions[index].output_operand_mut(x).set_location(label);
        }
        Ok(())
    }

    /// Hardware cannot read the same register twice in one instruction:
    /// duplicate inputs are split by a synthesized `copy` into a fresh
    /// `copyA`-prefixed register. For three-input instructions the
    /// lowest-indexed matching pair is the one corrected.
    pub fn apply_duplicate_input_variable_separation(
        &self,
        instructions: &mut Vec<PisaInstruction>,
    ) {
        let mut new_order = Vec::with_capacity(instructions.len());
        for mut instruction in std::mem::take(instructions) {
            let location = |n: usize| instruction.input_operand(n).location();
            let matching = match instruction.num_input_operands() {
                2 => (location(0) == location(1)).then_some((0, 1)),
                3 => {
                    if location(0) == location(1) {
                        Some((0, 1))
                    } else if location(0) == location(2) {
                        Some((0, 2))
                    } else if location(1) == location(2) {
                        Some((1, 2))
                    } else {
                        None
                    }
                }
                _ => None,
            };

            match matching {
                None => new_order.push(instruction),
                Some((_, second)) => {
                    tracing::debug!(
                        instruction = %instruction,
                        "duplicate input variable detected"
                    );
                    let source = instruction.input_operand(second).clone();
                    let mut duplicate = source.clone();
                    duplicate.set_location(format!("copyA{}", duplicate.location()));
                    instruction
                        .input_operand_mut(second)
                        .set_location(duplicate.location().to_string());
                    new_order.push(PisaInstruction::copy(
                        instruction.pmd,
                        instruction.residual,
                        duplicate,
                        source,
                    ));
                    new_order.push(instruction);
                }
            }
        }
        *instructions = new_order;
    }
}
