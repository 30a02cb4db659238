//! Data-dependency graph over p-ISA instructions.
//!
//! Nodes are either operations (one per instruction) or data (one per
//! register version or immediate). Register writes create a fresh node per
//! write and reads bind to the latest version, so a register reused across
//! kernels still yields a DAG; an actual cycle can only come from a naming
//! collision upstream and is reported as fatal.

use ahash::AHashMap;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;

use crate::error::GraphError;
use crate::instruction::PisaInstruction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Operation,
    Register,
    Immediate,
}

/// A graph node: its display label, kind, and (for operations) the index of
/// the instruction it wraps in the caller's instruction list.
#[derive(Debug, Clone)]
pub struct NodeData {
    pub label: String,
    pub node_type: NodeType,
    pub instruction: Option<usize>,
}

/// Anything that exposes named inputs/outputs can be graphed; both p-ISA
/// instructions and trace-level polynomial operations do.
pub trait GraphOperation {
    fn graph_label(&self) -> String;
    /// Input locations in operand order, with their immediate tag.
    fn graph_inputs(&self) -> Vec<(String, bool)>;
    /// Output locations in operand order.
    fn graph_outputs(&self) -> Vec<String>;
}

impl GraphOperation for PisaInstruction {
    fn graph_label(&self) -> String {
        self.opcode.to_string()
    }

    fn graph_inputs(&self) -> Vec<(String, bool)> {
        self.input_operands()
            .iter()
            .map(|op| (op.location().to_string(), op.immediate()))
            .collect()
    }

    fn graph_outputs(&self) -> Vec<String> {
        self.output_operands()
            .iter()
            .map(|op| op.location().to_string())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstructionGraph {
    graph: StableDiGraph<NodeData, u32>,
}

impl InstructionGraph {
    /// Builds the dependency graph for an ordered operation list.
    pub fn from_operations<T: GraphOperation>(operations: &[T]) -> Self {
        let mut graph = StableDiGraph::new();
        // every version of each register name, in write order
        let mut versions: AHashMap<String, Vec<NodeIndex>> = AHashMap::new();

        for (index, operation) in operations.iter().enumerate() {
            let op_node = graph.add_node(NodeData {
                label: String::new(),
                node_type: NodeType::Operation,
                instruction: Some(index),
            });
            graph[op_node].label = format!("{}_{}", operation.graph_label(), op_node.index());

            for (slot, (location, immediate)) in operation.graph_inputs().into_iter().enumerate() {
                let data_node = match versions.get(&location).and_then(|v| v.last()) {
                    Some(&existing) => existing,
                    None => {
                        let node_type = if immediate {
                            NodeType::Immediate
                        } else {
                            NodeType::Register
                        };
                        let created = graph.add_node(NodeData {
                            label: location.clone(),
                            node_type,
                            instruction: None,
                        });
                        versions.insert(location.clone(), vec![created]);
                        created
                    }
                };
                if graph.find_edge(data_node, op_node).is_none() {
                    graph.add_edge(data_node, op_node, slot as u32);
                }
            }

            for (slot, location) in operation.graph_outputs().into_iter().enumerate() {
                let out_node = graph.add_node(NodeData {
                    label: location.clone(),
                    node_type: NodeType::Register,
                    instruction: None,
                });
                versions.entry(location).or_default().push(out_node);
                graph.add_edge(op_node, out_node, slot as u32);
            }
        }

        Self { graph }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn node(&self, index: NodeIndex) -> &NodeData {
        &self.graph[index]
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> &mut NodeData {
        &mut self.graph[index]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &NodeData)> {
        self.graph
            .node_indices()
            .map(move |index| (index, &self.graph[index]))
    }

    fn neighbors_by_slot(&self, index: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut edges: Vec<(u32, NodeIndex)> = self
            .graph
            .edges_directed(index, direction)
            .map(|edge| {
                let other = match direction {
                    Direction::Incoming => edge.source(),
                    Direction::Outgoing => edge.target(),
                };
                (*edge.weight(), other)
            })
            .collect();
        edges.sort_by_key(|(slot, _)| *slot);
        edges.into_iter().map(|(_, node)| node).collect()
    }

    /// In-neighbors in operand-slot order.
    pub fn in_nodes(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.neighbors_by_slot(index, Direction::Incoming)
    }

    /// Out-neighbors in operand-slot order.
    pub fn out_nodes(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.neighbors_by_slot(index, Direction::Outgoing)
    }

    pub fn in_degree(&self, index: NodeIndex) -> usize {
        self.graph.edges_directed(index, Direction::Incoming).count()
    }

    pub fn out_degree(&self, index: NodeIndex) -> usize {
        self.graph.edges_directed(index, Direction::Outgoing).count()
    }

    /// Zero-in-degree nodes, filtered by kind, in node-creation order.
    pub fn input_nodes(
        &self,
        include_registers: bool,
        include_immediates: bool,
        include_operations: bool,
    ) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&index| self.in_degree(index) == 0)
            .filter(|&index| match self.graph[index].node_type {
                NodeType::Register => include_registers,
                NodeType::Immediate => include_immediates,
                NodeType::Operation => include_operations,
            })
            .collect()
    }

    /// Zero-out-degree nodes of any kind, in node-creation order.
    pub fn output_nodes(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&index| self.out_degree(index) == 0)
            .collect()
    }

    pub fn remove_node(&mut self, index: NodeIndex) {
        let _ = self.graph.remove_node(index);
    }

    /// Removes a node while bridging every predecessor to every successor,
    /// so transitive dependencies survive the removal.
    pub fn remove_node_maintain_connections(&mut self, index: NodeIndex) {
        let predecessors: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(index, Direction::Incoming)
            .collect();
        let successors: Vec<(NodeIndex, u32)> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .map(|edge| (edge.target(), *edge.weight()))
            .collect();

        let _ = self.graph.remove_node(index);

        for &predecessor in &predecessors {
            for &(successor, slot) in &successors {
                if self.graph.find_edge(predecessor, successor).is_none() {
                    self.graph.add_edge(predecessor, successor, slot);
                }
            }
        }
    }

    /// Projection keeping only operation nodes, with data nodes bridged out.
    pub fn instruction_graph(&self) -> Self {
        let mut projected = self.clone();
        let data_nodes: Vec<NodeIndex> = projected
            .graph
            .node_indices()
            .filter(|&index| projected.graph[index].node_type != NodeType::Operation)
            .collect();
        for node in data_nodes {
            projected.remove_node_maintain_connections(node);
        }
        projected
    }

    /// Kahn-style layer peel: repeatedly removes the zero-in-degree node set
    /// as one layer. Node indices refer to `self`. A non-empty graph with no
    /// zero-in-degree nodes is cyclic, which is an upstream naming bug.
    pub fn input_layers(&self) -> Result<Vec<Vec<NodeIndex>>, GraphError> {
        let mut consumable = self.clone();
        let mut layers = Vec::new();
        while consumable.node_count() > 0 {
            let layer = consumable.input_nodes(true, true, true);
            if layer.is_empty() {
                return Err(GraphError::Cycle {
                    remaining: consumable.node_count(),
                });
            }
            for &node in &layer {
                consumable.remove_node(node);
            }
            layers.push(layer);
        }
        Ok(layers)
    }

    /// Graphviz rendering with inputs and outputs highlighted.
    pub fn to_dot(&self) -> String {
        use std::fmt::Write as _;

        let mut out = String::from("digraph {\n");
        for (index, data) in self.nodes() {
            let mut color = "white";
            if self.in_degree(index) == 0 {
                color = "skyblue3";
            }
            if self.out_degree(index) == 0 {
                color = "seagreen1";
            }
            let _ = writeln!(
                out,
                "    {} [ label = \"{}\", style = filled, fillcolor = \"{color}\" ]",
                index.index(),
                data.label
            );
        }
        for edge in self.graph.edge_references() {
            let _ = writeln!(
                out,
                "    {} -> {}",
                edge.source().index(),
                edge.target().index()
            );
        }
        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_instructions;

    fn graph_of(text: &str) -> (InstructionGraph, Vec<PisaInstruction>) {
        let instructions = parse_instructions(text).unwrap();
        let graph = InstructionGraph::from_operations(&instructions);
        (graph, instructions)
    }

    #[test]
    fn classifies_inputs_outputs_immediates() {
        let (graph, _) = graph_of(
            "13, muli, t_0_0, a_0_0, R2_0, 0\n\
             13, add, c_0_0, t_0_0, b_0_0, 0",
        );

        let inputs = graph.input_nodes(true, false, false);
        let input_labels: Vec<&str> =
            inputs.iter().map(|&n| graph.node(n).label.as_str()).collect();
        assert_eq!(input_labels, vec!["a_0_0", "b_0_0"]);

        let immediates = graph.input_nodes(false, true, false);
        assert_eq!(immediates.len(), 1);
        assert_eq!(graph.node(immediates[0]).label, "R2_0");

        let outputs = graph.output_nodes();
        let output_labels: Vec<&str> =
            outputs.iter().map(|&n| graph.node(n).label.as_str()).collect();
        assert_eq!(output_labels, vec!["c_0_0"]);
    }

    #[test]
    fn register_rewrites_are_versioned() {
        // a is read and rewritten twice; the graph must stay acyclic with one
        // node per version.
        let (graph, _) = graph_of(
            "13, add, a_0_0, a_0_0, b_0_0, 0\n\
             13, add, a_0_0, a_0_0, c_0_0, 0",
        );
        let versions = graph
            .nodes()
            .filter(|(_, data)| data.label == "a_0_0")
            .count();
        assert_eq!(versions, 3);
        assert!(graph.input_layers().is_ok());
    }

    #[test]
    fn layer_peel_is_topological() {
        let (graph, instructions) = graph_of(
            "13, add, t_0_0, a_0_0, b_0_0, 0\n\
             13, add, u_0_0, c_0_0, d_0_0, 0\n\
             13, mul, v_0_0, t_0_0, u_0_0, 0\n\
             13, add, w_0_0, v_0_0, a_0_0, 0",
        );
        let stripped = graph.instruction_graph();
        let layers = stripped.input_layers().unwrap();

        let mut position = AHashMap::new();
        for (layer_index, layer) in layers.iter().enumerate() {
            for &node in layer {
                position.insert(
                    stripped.node(node).instruction.unwrap(),
                    layer_index,
                );
            }
        }
        assert_eq!(position.len(), instructions.len());
        // producers strictly before consumers
        assert!(position[&0] < position[&2]);
        assert!(position[&1] < position[&2]);
        assert!(position[&2] < position[&3]);
    }

    #[test]
    fn operand_order_preserved_in_in_nodes() {
        let (graph, _) = graph_of("13, mac, acc_0_0, x_0_0, y_0_0, 0");
        let op = graph
            .nodes()
            .find(|(_, data)| data.node_type == NodeType::Operation)
            .map(|(index, _)| index)
            .unwrap();
        let in_labels: Vec<&str> = graph
            .in_nodes(op)
            .iter()
            .map(|&n| graph.node(n).label.as_str())
            .collect();
        assert_eq!(in_labels, vec!["acc_0_0", "x_0_0", "y_0_0"]);
    }

    #[test]
    fn dot_output_mentions_labels() {
        let (graph, _) = graph_of("13, add, c_0_0, a_0_0, b_0_0, 0");
        let dot = graph.to_dot();
        assert!(dot.contains("a_0_0"));
        assert!(dot.contains("skyblue3"));
        assert!(dot.contains("seagreen1"));
    }
}
