//! The program mapper: drives a trace through kernel materialization,
//! register mapping, graph fixes and emission.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use polymap_pisa::{InstructionGraph, PisaInstruction};

use crate::error::MapperError;
use crate::kernel::{Cache, KernelFlavor, KernelIdGen, PisaKernel};
use crate::memfile::generate_mem_file;
use crate::optimizer::GraphOptimizer;
use crate::program::{PolyOperation, PolyProgram};

#[derive(Debug, Clone)]
pub struct MapperArguments {
    pub program_trace: PathBuf,
    pub outfile_prefix: PathBuf,
    pub kerngen: PathBuf,
    pub dot_file_name: Option<PathBuf>,
    pub cache_dir: PathBuf,
    pub verbose: bool,
    pub export_dot: bool,
    pub remove_cache: bool,
    pub kernel_flavor: KernelFlavor,
    pub apply_name_spacing: bool,
    pub use_kernel_cache: bool,
    pub enable_intermediates: bool,
    /// Reorder the final stream from a layer peel of the graph instead of
    /// keeping kernel emission order.
    pub graph_order: bool,
}

impl Default for MapperArguments {
    fn default() -> Self {
        Self {
            program_trace: PathBuf::new(),
            outfile_prefix: PathBuf::from("program"),
            kerngen: PathBuf::from("kerngen"),
            dot_file_name: None,
            cache_dir: PathBuf::from("./kernel_cache"),
            verbose: false,
            export_dot: false,
            remove_cache: false,
            kernel_flavor: KernelFlavor::Stdin,
            apply_name_spacing: true,
            use_kernel_cache: true,
            enable_intermediates: false,
            graph_order: false,
        }
    }
}

/// Everything the pipeline produces for one trace.
#[derive(Debug)]
pub struct MappedProgram {
    pub instructions: Vec<PisaInstruction>,
    /// Emission order, as indices into `instructions`.
    pub stream: Vec<usize>,
    pub graph: InstructionGraph,
    pub trace_graph: InstructionGraph,
    pub memory_image: Vec<String>,
    pub max_rns_terms: u32,
}

#[derive(Debug, Default)]
pub struct ProgramMapper {
    pub arguments: MapperArguments,
}

impl ProgramMapper {
    pub fn new(arguments: MapperArguments) -> Self {
        Self { arguments }
    }

    /// Runs the full mapping pipeline for one trace.
    pub fn map_program(&self, program: &PolyProgram) -> Result<MappedProgram, MapperError> {
        // Trace-level graph: aligns kernel input/output names with the trace
        // so validation tooling can address them.
        let trace_graph = InstructionGraph::from_operations(&program.operations);
        let mut register_map = BTreeMap::new();
        for node in trace_graph.input_nodes(true, true, false) {
            let label = trace_graph.node(node).label.clone();
            register_map.insert(label.clone(), label);
        }
        for node in trace_graph.output_nodes() {
            let label = trace_graph.node(node).label.clone();
            register_map.insert(label.clone(), label);
        }
        if self.arguments.enable_intermediates {
            for (_, data) in trace_graph.nodes() {
                if data.instruction.is_none() {
                    register_map.insert(data.label.clone(), data.label.clone());
                }
            }
        }
        map_trace_operations_into_register_map(&program.operations, &mut register_map);

        let (mut kernels, max_rns_terms) = self.generate_kernels(program)?;
        map_kernel_io_to_register_map(&mut kernels, &program.operations, &register_map)?;

        let mut combined = combined_instructions(&mut kernels, self.arguments.apply_name_spacing)?;

        let mut optimizer = GraphOptimizer::new();
        optimizer.apply_duplicate_input_variable_separation(&mut combined);

        let mut graph = InstructionGraph::from_operations(&combined);
        optimizer.perform_variable_isolation = self.arguments.graph_order;
        let stream = optimizer.generate_instruction_stream_from_graph(
            &mut graph,
            &mut combined,
            !self.arguments.graph_order,
        )?;

        let memory_image = generate_mem_file(&graph, max_rns_terms);

        Ok(MappedProgram {
            instructions: combined,
            stream,
            graph,
            trace_graph,
            memory_image,
            max_rns_terms,
        })
    }

    /// Maps the trace and writes the instruction stream, optional graphs and
    /// the memory image next to the configured output prefix.
    pub fn generate_pisa_program(&self, program: &PolyProgram) -> Result<(), MapperError> {
        let mapped = self.map_program(program)?;

        let instruction_path = self.arguments.outfile_prefix.with_extension("csv");
        let lines: Vec<String> = mapped
            .stream
            .iter()
            .map(|&index| mapped.instructions[index].to_string())
            .collect();
        write_lines(&instruction_path, &lines)?;
        tracing::info!(
            path = %instruction_path.display(),
            instructions = lines.len(),
            "wrote instruction stream"
        );

        if self.arguments.verbose {
            for line in &lines {
                tracing::info!("{line}");
            }
        }

        if self.arguments.export_dot {
            let dot_path = self
                .arguments
                .dot_file_name
                .clone()
                .unwrap_or_else(|| self.arguments.outfile_prefix.with_extension("dot"));
            write_lines(&dot_path, &[mapped.graph.to_dot()])?;
            let trace_dot = self.arguments.outfile_prefix.with_extension("trace.dot");
            write_lines(&trace_dot, &[mapped.trace_graph.to_dot()])?;
            tracing::info!(path = %dot_path.display(), "wrote graphs");
        }

        let memory_path = self.arguments.outfile_prefix.with_extension("tw.mem");
        write_lines(&memory_path, &mapped.memory_image)?;
        tracing::info!(path = %memory_path.display(), "wrote memory image");

        Ok(())
    }

    /// One kernel per trace operation, with naming derived and the maximum
    /// RNS term count tracked for the memory image.
    fn generate_kernels(
        &self,
        program: &PolyProgram,
    ) -> Result<(Vec<PisaKernel>, u32), MapperError> {
        let cache = Cache::new(
            &self.arguments.cache_dir,
            self.arguments.use_kernel_cache,
            self.arguments.remove_cache,
        )?;
        let ids = KernelIdGen::new();

        let mut max_rns_terms = 0;
        let mut kernels = Vec::with_capacity(program.operations.len());
        for operation in &program.operations {
            max_rns_terms = max_rns_terms.max(operation.rns_terms);
            let mut kernel = PisaKernel::create(
                &self.arguments.kerngen,
                operation,
                program,
                &cache,
                &ids,
                self.arguments.kernel_flavor,
            )?;
            kernel.determine_variable_naming_via_graph();
            kernels.push(kernel);
        }
        Ok((kernels, max_rns_terms))
    }
}

/// Operands not covered by the trace's input/output set get an operation
/// namespace, which is what links one operation's kernel to the next.
fn map_trace_operations_into_register_map(
    operations: &[PolyOperation],
    register_map: &mut BTreeMap<String, String>,
) {
    for (x, operation) in operations.iter().enumerate() {
        for (y, operand) in operation.inputs.iter().enumerate() {
            register_map
                .entry(operand.register_name.clone())
                .or_insert_with(|| format!("{}{x}input{y}", operation.name));
        }
        for (y, operand) in operation.outputs.iter().enumerate() {
            register_map
                .entry(operand.register_name.clone())
                .or_insert_with(|| format!("{}{x}output{y}", operation.name));
        }
    }
}

/// Aligns each kernel's io names with the trace through the register map.
/// Operations and kernels correspond one to one.
fn map_kernel_io_to_register_map(
    kernels: &mut [PisaKernel],
    operations: &[PolyOperation],
    register_map: &BTreeMap<String, String>,
) -> Result<(), MapperError> {
    for (kernel, operation) in kernels.iter_mut().zip(operations) {
        for (x, operand) in operation.inputs.iter().enumerate() {
            let name = register_map
                .get(operand.location())
                .ok_or_else(|| MapperError::MissingInternalSymbol(operand.location().to_string()))?;
            kernel.map_input(x, name)?;
        }
        for (x, operand) in operation.outputs.iter().enumerate() {
            let name = register_map
                .get(operand.location())
                .ok_or_else(|| MapperError::MissingInternalSymbol(operand.location().to_string()))?;
            kernel.map_output(x, name)?;
        }
    }
    Ok(())
}

/// Concatenates every kernel's renamed instructions into one list.
fn combined_instructions(
    kernels: &mut [PisaKernel],
    apply_namespacing: bool,
) -> Result<Vec<PisaInstruction>, MapperError> {
    let mut combined = Vec::new();
    for kernel in kernels {
        kernel.set_enable_namespace(apply_namespacing);
        combined.extend_from_slice(kernel.mapped_instructions()?);
    }
    Ok(combined)
}

fn write_lines(path: &Path, lines: &[String]) -> Result<(), MapperError> {
    let mut contents = lines.join("\n");
    contents.push('\n');
    std::fs::write(path, contents).map_err(|source| MapperError::io(path, source))
}
