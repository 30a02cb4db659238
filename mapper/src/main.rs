use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};

use polymap_mapper::kernel::KernelFlavor;
use polymap_mapper::metadata::extract_metadata;
use polymap_mapper::program::PolyProgram;
use polymap_mapper::{init_logger, trace, MapperArguments, ProgramMapper};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum TraceFormat {
    #[default]
    Csv,
    Binary,
}

/// Maps an FHE program trace onto a p-ISA instruction stream.
#[derive(Debug, Parser)]
#[command(name = "polymap", version, about)]
struct Cli {
    /// Program trace to map.
    program_trace: PathBuf,

    /// Trace file format.
    #[arg(long, value_enum, default_value = "csv")]
    format: TraceFormat,

    /// Kernel generator executable.
    #[arg(long, default_value = "kerngen")]
    kerngen: PathBuf,

    /// Argument-marshaling convention for the kernel generator.
    #[arg(long, value_enum, default_value = "stdin")]
    kernel_flavor: KernelFlavor,

    /// Prefix for the emitted .csv / .tw.mem / .dot files.
    #[arg(short, long, default_value = "program")]
    output_prefix: PathBuf,

    /// Kernel cache directory.
    #[arg(long, default_value = "./kernel_cache")]
    cache_dir: PathBuf,

    /// Always invoke the generator, ignoring cached kernels.
    #[arg(long)]
    no_cache: bool,

    /// Delete cached kernels before mapping.
    #[arg(long)]
    clear_cache: bool,

    /// Write Graphviz renderings of the trace and instruction graphs.
    #[arg(long)]
    export_dot: bool,

    /// Instruction-graph dot file (defaults to the output prefix).
    #[arg(long)]
    dot_file: Option<PathBuf>,

    /// Disable per-kernel namespacing of internal registers.
    #[arg(long)]
    no_namespacing: bool,

    /// Identity-map trace intermediates instead of namespacing them.
    #[arg(long)]
    intermediates: bool,

    /// Reorder the final stream from a graph layer peel.
    #[arg(long)]
    graph_order: bool,

    /// Extract the context's constant tables (binary traces only) and write
    /// them to this path.
    #[arg(long)]
    extract_metadata: Option<PathBuf>,

    /// Echo the emitted instructions.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    init_logger();
    let cli = Cli::parse();

    if cli.extract_metadata.is_some() && cli.format == TraceFormat::Csv {
        anyhow::bail!("--extract-metadata requires a binary trace (CSV traces carry no context)");
    }

    let program: PolyProgram = match cli.format {
        TraceFormat::Csv => trace::load_trace_csv(&cli.program_trace, true)
            .with_context(|| format!("parsing trace {}", cli.program_trace.display()))?,
        TraceFormat::Binary => {
            let binary = trace::load_trace(&cli.program_trace)
                .with_context(|| format!("parsing trace {}", cli.program_trace.display()))?;
            if let Some(metadata_path) = &cli.extract_metadata {
                let context = binary
                    .context
                    .as_ref()
                    .context("trace carries no FHE context to extract metadata from")?;
                let manifest = extract_metadata(context)?;
                let bytes = bincode::serialize(&manifest)?;
                std::fs::write(metadata_path, bytes)
                    .with_context(|| format!("writing {}", metadata_path.display()))?;
                tracing::info!(
                    path = %metadata_path.display(),
                    polys = manifest.polys.len(),
                    immediates = manifest.immediates.len(),
                    "wrote metadata manifest"
                );
            }
            binary.to_program()?
        }
    };
    tracing::info!(
        operations = program.operations.len(),
        scheme = %program.scheme,
        degree = program.poly_modulus_degree,
        "parsed program trace"
    );

    let arguments = MapperArguments {
        program_trace: cli.program_trace,
        outfile_prefix: cli.output_prefix,
        kerngen: cli.kerngen,
        dot_file_name: cli.dot_file,
        cache_dir: cli.cache_dir,
        verbose: cli.verbose,
        export_dot: cli.export_dot,
        remove_cache: cli.clear_cache,
        kernel_flavor: cli.kernel_flavor,
        apply_name_spacing: !cli.no_namespacing,
        use_kernel_cache: !cli.no_cache,
        enable_intermediates: cli.intermediates,
        graph_order: cli.graph_order,
    };

    ProgramMapper::new(arguments)
        .generate_pisa_program(&program)
        .context("mapping failed")?;
    Ok(())
}
