//! Kernel materialization: one [`PisaKernel`] per trace operation, produced
//! by the external kernel generator (or its on-disk cache) and carrying the
//! naming state that maps kernel-local symbols onto program-global ones.

use std::cmp::Ordering;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

use ahash::{AHashMap, AHashSet};

use polymap_pisa::{parser, InstructionGraph, NodeIndex, PisaInstruction};

use crate::error::MapperError;
use crate::program::{PolyOpKind, PolyOperation, PolyProgram};

/// On-disk kernel cache. File names are deterministic functions of the
/// operation shape, so a cache hit skips the generator entirely.
#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
    use_cache: bool,
}

impl Cache {
    pub fn new(dir: impl Into<PathBuf>, use_cache: bool, clear: bool) -> Result<Self, MapperError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| MapperError::io(&dir, source))?;
        if clear {
            let entries =
                std::fs::read_dir(&dir).map_err(|source| MapperError::io(&dir, source))?;
            for entry in entries {
                let entry = entry.map_err(|source| MapperError::io(&dir, source))?;
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "csv") {
                    std::fs::remove_file(&path).map_err(|source| MapperError::io(&path, source))?;
                }
            }
        }
        Ok(Self { dir, use_cache })
    }

    pub fn use_cache(&self) -> bool {
        self.use_cache
    }

    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }
}

/// Allocates process-unique kernel ids. Threaded explicitly through kernel
/// creation instead of hiding in module state; atomic so concurrent kernel
/// creation stays collision-free.
#[derive(Debug, Default)]
pub struct KernelIdGen(AtomicU32);

impl KernelIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u32 {
        self.0.fetch_add(1, AtomicOrdering::Relaxed)
    }
}

/// Which argument-marshaling convention to use when invoking the generator.
/// The conventions differ only in how the request is encoded, never in what
/// comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum KernelFlavor {
    /// `CONTEXT`/`DATA` request written to the generator's stdin.
    #[default]
    Stdin,
    /// Positional command-line arguments, legacy CSV convention.
    LegacyCsv,
    /// Positional arguments in the data-formats-aware convention.
    DataFormats,
}

/// The materialized instruction sequence for exactly one trace operation.
#[derive(Debug, Clone)]
pub struct PisaKernel {
    pub name: String,
    pub kernel_id: u32,
    instructions: Vec<PisaInstruction>,
    mapped: Vec<PisaInstruction>,
    input_names: Vec<String>,
    output_names: Vec<String>,
    immediate_names: Vec<String>,
    naming_map: AHashMap<String, String>,
    immediate_map: AHashMap<String, String>,
    internal_map: AHashMap<String, String>,
    map_dirty: bool,
    enable_namespace: bool,
}

impl PisaKernel {
    /// Wraps an already-parsed instruction list.
    pub fn from_instructions(
        name: impl Into<String>,
        kernel_id: u32,
        instructions: Vec<PisaInstruction>,
    ) -> Self {
        let mapped = instructions.clone();
        Self {
            name: name.into(),
            kernel_id,
            instructions,
            mapped,
            input_names: Vec::new(),
            output_names: Vec::new(),
            immediate_names: Vec::new(),
            naming_map: AHashMap::new(),
            immediate_map: AHashMap::new(),
            internal_map: AHashMap::new(),
            map_dirty: false,
            enable_namespace: false,
        }
    }

    /// Materializes the kernel for `operation`, reusing the cache when
    /// allowed and invoking the generator otherwise.
    pub fn create(
        generator: &Path,
        operation: &PolyOperation,
        program: &PolyProgram,
        cache: &Cache,
        ids: &KernelIdGen,
        flavor: KernelFlavor,
    ) -> Result<Self, MapperError> {
        match flavor {
            KernelFlavor::Stdin => Self::create_stdin(generator, operation, program, cache, ids),
            KernelFlavor::LegacyCsv => {
                Self::create_legacy(generator, operation, program, cache, ids)
            }
            KernelFlavor::DataFormats => {
                Self::create_data_formats(generator, operation, program, cache, ids)
            }
        }
    }

    fn first_input(operation: &PolyOperation) -> Result<&crate::program::PolyOperand, MapperError> {
        operation
            .inputs
            .first()
            .ok_or_else(|| MapperError::MissingOperand(operation.name.clone()))
    }

    /// The stdin request protocol: a `CONTEXT` line, one `DATA` line per
    /// operand, and an uppercase operation line listing outputs then inputs.
    fn kerngen_request(
        operation: &PolyOperation,
        program: &PolyProgram,
    ) -> Result<String, MapperError> {
        use std::fmt::Write as _;

        let mut request = String::new();
        let _ = writeln!(
            request,
            "CONTEXT {} {} {} {}",
            program.scheme,
            program.poly_modulus_degree,
            program.key_rns,
            Self::first_input(operation)?.num_rns_terms
        );
        for (i, output) in operation.outputs.iter().enumerate() {
            let _ = writeln!(request, "DATA output{i} {}", output.num_parts);
        }
        for (i, input) in operation.inputs.iter().enumerate() {
            let _ = writeln!(request, "DATA input{i} {}", input.num_parts);
        }
        let _ = write!(request, "{}", operation.name.to_uppercase());
        for i in 0..operation.outputs.len() {
            let _ = write!(request, " output{i}");
        }
        for i in 0..operation.inputs.len() {
            let _ = write!(request, " input{i}");
        }
        Ok(request)
    }

    fn create_stdin(
        generator: &Path,
        operation: &PolyOperation,
        program: &PolyProgram,
        cache: &Cache,
        ids: &KernelIdGen,
    ) -> Result<Self, MapperError> {
        let first = Self::first_input(operation)?;
        let file_name = format!(
            "{}_{}_{}_{}_{}.csv",
            program.scheme,
            operation.name,
            program.poly_modulus_degree,
            first.num_parts,
            first.num_rns_terms
        );
        let path = cache.path_for(&file_name);

        if !cache.use_cache() || !path.exists() {
            let request = Self::kerngen_request(operation, program)?;
            invoke_generator(
                generator,
                &["-q".to_string(), "-l".to_string()],
                Some(&request),
                &path,
                &operation.name,
            )?;
        }

        Self::from_generated(operation, ids, &path)
    }

    fn create_legacy(
        generator: &Path,
        operation: &PolyOperation,
        program: &PolyProgram,
        cache: &Cache,
        ids: &KernelIdGen,
    ) -> Result<Self, MapperError> {
        let first = Self::first_input(operation)?;

        let mut params = vec![
            program.scheme.lowercase(),
            operation.name.clone(),
            program.poly_modulus_degree.to_string(),
            first.num_rns_terms.to_string(),
        ];
        let file_name = format!("{}_{}.csv", params.join("_"), first.num_parts);

        params.push((first.num_rns_terms + 1).to_string());
        if operation.kind == PolyOpKind::Add {
            params.push(first.num_parts.to_string());
        }
        if matches!(operation.kind, PolyOpKind::Relin | PolyOpKind::Rotate) {
            // rns-prime decomposition: dnum follows the term count, alpha and
            // the extended-prime count collapse to one when unset
            let dnum = first.num_rns_terms;
            let alpha = if program.alpha == 0 { 1 } else { program.alpha };
            let k = alpha;
            params.extend([dnum.to_string(), alpha.to_string(), k.to_string()]);
        }

        let path = cache.path_for(&file_name);
        if !cache.use_cache() || !path.exists() {
            invoke_generator(generator, &params, None, &path, &operation.name)?;
        }

        Self::from_generated(operation, ids, &path)
    }

    fn create_data_formats(
        generator: &Path,
        operation: &PolyOperation,
        program: &PolyProgram,
        cache: &Cache,
        ids: &KernelIdGen,
    ) -> Result<Self, MapperError> {
        let mut params = vec![
            program.scheme.lowercase(),
            operation.name.clone(),
            program.poly_modulus_degree.to_string(),
            operation.rns_terms.to_string(),
            program.key_rns.to_string(),
        ];

        let alpha = program.alpha;
        let k = alpha;
        match operation.kind {
            PolyOpKind::Relin => params.extend([
                program.dnum.to_string(),
                alpha.to_string(),
                k.to_string(),
                program.q_size.to_string(),
            ]),
            PolyOpKind::Add => params.push(operation.cipher_degree.to_string()),
            PolyOpKind::Rotate => params.extend([
                program.dnum.to_string(),
                alpha.to_string(),
                k.to_string(),
                program.q_size.to_string(),
                operation.galois_elt.to_string(),
            ]),
            PolyOpKind::Rescale => params.push(program.q_size.to_string()),
            _ => {}
        }

        let file_name = format!("{}_{}.csv", params.join("_"), operation.cipher_degree);
        let path = cache.path_for(&file_name);
        if !cache.use_cache() || !path.exists() {
            invoke_generator(generator, &params, None, &path, &operation.name)?;
        }

        Self::from_generated(operation, ids, &path)
    }

    fn from_generated(
        operation: &PolyOperation,
        ids: &KernelIdGen,
        path: &Path,
    ) -> Result<Self, MapperError> {
        let instructions = parser::parse_instruction_file(path)?;
        if instructions.is_empty() {
            return Err(MapperError::EmptyKernel {
                path: path.display().to_string(),
            });
        }
        Ok(Self::from_instructions(
            operation.name.clone(),
            ids.next_id(),
            instructions,
        ))
    }

    pub fn instructions(&self) -> &[PisaInstruction] {
        &self.instructions
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    pub fn immediate_names(&self) -> &[String] {
        &self.immediate_names
    }

    pub fn set_enable_namespace(&mut self, enable: bool) {
        self.enable_namespace = enable;
        self.map_dirty = true;
    }

    /// Derives the kernel's input/output/immediate symbol roots from its own
    /// dependency graph, in first-seen order.
    ///
    /// Input roots containing the substring `input` are sorted among
    /// themselves (a legacy-format workaround: two generator registers parse
    /// in swapped order); everything else keeps its relative order. Do not
    /// generalize the sort beyond the marker substring.
    pub fn determine_variable_naming_via_graph(&mut self) {
        let graph = InstructionGraph::from_operations(&self.instructions);
        let inputs = graph.input_nodes(true, false, false);
        let outputs = graph.output_nodes();
        let immediates = graph.input_nodes(false, true, false);

        for root in non_repeating_roots(&graph, &inputs) {
            self.input_names.push(root.clone());
            self.naming_map.insert(root.clone(), root);
        }
        self.input_names.sort_by(|a, b| {
            if a.contains("input") && b.contains("input") {
                a.cmp(b)
            } else {
                Ordering::Equal
            }
        });

        for root in non_repeating_roots(&graph, &outputs) {
            self.output_names.push(root.clone());
            self.naming_map.insert(root.clone(), root);
        }
        self.output_names.sort();

        for &node in &immediates {
            let label = graph.node(node).label.clone();
            if !self.immediate_map.contains_key(&label) {
                self.immediate_names.push(label.clone());
            }
            self.immediate_map.insert(label.clone(), label);
        }
    }

    /// Maps the kernel's n-th input root to a program-global name.
    pub fn map_input(&mut self, index: usize, new_name: &str) -> Result<(), MapperError> {
        let local = self
            .input_names
            .get(index)
            .ok_or_else(|| MapperError::MissingOperand(self.name.clone()))?;
        self.naming_map.insert(local.clone(), new_name.to_string());
        self.map_dirty = true;
        Ok(())
    }

    pub fn map_output(&mut self, index: usize, new_name: &str) -> Result<(), MapperError> {
        let local = self
            .output_names
            .get(index)
            .ok_or_else(|| MapperError::MissingOperand(self.name.clone()))?;
        self.naming_map.insert(local.clone(), new_name.to_string());
        self.map_dirty = true;
        Ok(())
    }

    pub fn map_immediate(&mut self, index: usize, new_name: &str) -> Result<(), MapperError> {
        let local = self
            .immediate_names
            .get(index)
            .ok_or_else(|| MapperError::MissingOperand(self.name.clone()))?;
        self.naming_map.insert(local.clone(), new_name.to_string());
        self.map_dirty = true;
        Ok(())
    }

    pub fn set_immediate(&mut self, key: &str, value: &str) {
        self.immediate_map.insert(key.to_string(), value.to_string());
        self.map_dirty = true;
    }

    /// Every internal symbol gets a globally unique namespaced name built
    /// from the kernel name and id.
    fn create_internal_variable_map(&mut self) {
        for name in &self.immediate_names {
            self.naming_map.insert(name.clone(), name.clone());
            self.internal_map.insert(name.clone(), name.clone());
        }
        for (key, value) in &self.immediate_map {
            self.naming_map.insert(key.clone(), value.clone());
            self.internal_map.insert(key.clone(), value.clone());
        }

        for instruction in &self.instructions {
            let operands = instruction
                .input_operands()
                .iter()
                .chain(instruction.output_operands());
            for operand in operands {
                let root = operand.location_root();
                let location = operand.location();
                if !self.naming_map.contains_key(root)
                    && !self.immediate_map.contains_key(location)
                    && !self.internal_map.contains_key(location)
                {
                    self.internal_map.insert(
                        location.to_string(),
                        format!("internal{}{}NS_{location}", self.name, self.kernel_id),
                    );
                }
            }
        }
    }

    /// Rewrites the mapped instruction list from the naming maps. Roots
    /// found in the naming map are replaced; unmapped symbols fall back to
    /// the internal namespace when namespacing is on.
    fn update_symbols(&mut self) -> Result<(), MapperError> {
        if self.internal_map.is_empty() {
            self.create_internal_variable_map();
        }

        for (index, instruction) in self.instructions.iter().enumerate() {
            for x in 0..instruction.num_input_operands() {
                let operand = instruction.input_operand(x);
                if let Some(value) = self.naming_map.get(operand.location_root()) {
                    self.mapped[index].input_operand_mut(x).set_location_root(value);
                    tracing::trace!(from = operand.location_root(), to = %value, "mapped");
                } else if self.enable_namespace {
                    let value = self
                        .internal_map
                        .get(operand.location())
                        .ok_or_else(|| {
                            MapperError::MissingInternalSymbol(operand.location().to_string())
                        })?;
                    self.mapped[index].input_operand_mut(x).set_location(value.clone());
                }
            }
            for x in 0..instruction.num_output_operands() {
                let operand = instruction.output_operand(x);
                if let Some(value) = self.naming_map.get(operand.location_root()) {
                    self.mapped[index].output_operand_mut(x).set_location_root(value);
                } else if self.enable_namespace {
                    let value = self
                        .internal_map
                        .get(operand.location())
                        .ok_or_else(|| {
                            MapperError::MissingInternalSymbol(operand.location().to_string())
                        })?;
                    self.mapped[index].output_operand_mut(x).set_location(value.clone());
                }
            }
        }
        self.map_dirty = false;
        Ok(())
    }

    /// The renamed instruction list; recomputed lazily after any naming
    /// mutation.
    pub fn mapped_instructions(&mut self) -> Result<&[PisaInstruction], MapperError> {
        if self.map_dirty {
            self.update_symbols()?;
        }
        Ok(&self.mapped)
    }
}

/// First-seen-ordered distinct register-name roots of a node list.
fn non_repeating_roots(graph: &InstructionGraph, nodes: &[NodeIndex]) -> Vec<String> {
    let mut seen = AHashSet::new();
    let mut roots = Vec::new();
    for &node in nodes {
        let root = polymap_pisa::symbol::register_name_root(&graph.node(node).label).to_string();
        if seen.insert(root.clone()) {
            roots.push(root);
        }
    }
    roots
}

/// Runs the kernel generator, captures its stdout into `out_path`, and fails
/// loudly on a non-zero exit or empty output; silently proceeding with an
/// empty kernel would corrupt the downstream stream.
fn invoke_generator(
    generator: &Path,
    args: &[String],
    stdin_payload: Option<&str>,
    out_path: &Path,
    operation: &str,
) -> Result<(), MapperError> {
    tracing::debug!(generator = %generator.display(), ?args, "invoking kernel generator");

    let mut command = Command::new(generator);
    command.args(args).stdout(Stdio::piped());
    command.stdin(if stdin_payload.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    let generator_error = |status: String| MapperError::KernelGenerator {
        generator: generator.display().to_string(),
        operation: operation.to_string(),
        status,
    };

    let mut child = command
        .spawn()
        .map_err(|source| generator_error(source.to_string()))?;

    if let Some(payload) = stdin_payload {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| generator_error("stdin unavailable".to_string()))?;
        stdin
            .write_all(payload.as_bytes())
            .map_err(|source| generator_error(source.to_string()))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|source| generator_error(source.to_string()))?;
    if !output.status.success() {
        return Err(generator_error(output.status.to_string()));
    }
    if output.stdout.iter().all(|byte| byte.is_ascii_whitespace()) {
        return Err(MapperError::EmptyKernel {
            path: out_path.display().to_string(),
        });
    }

    std::fs::write(out_path, &output.stdout).map_err(|source| MapperError::io(out_path, source))
}
