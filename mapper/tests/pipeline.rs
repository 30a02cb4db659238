//! End-to-end pipeline tests driven through pre-populated kernel caches, so
//! no external kernel generator is needed.

use std::fs;
use std::path::PathBuf;

use polymap_mapper::kernel::KernelFlavor;
use polymap_mapper::program::PolyProgram;
use polymap_mapper::{trace, MapperArguments, ProgramMapper};
use polymap_pisa::Opcode;

const HEADER: &str =
    "scheme,poly_modulus_degree,rns_terms,cipher_degree,instruction,arg0,arg1,arg2,arg3,arg4,arg5,arg6,arg7,arg8,arg9";

struct TestDirs {
    root: PathBuf,
    cache: PathBuf,
}

impl TestDirs {
    fn new(name: &str) -> Self {
        let root = std::env::temp_dir().join(format!(
            "polymap-pipeline-{name}-{}",
            std::process::id()
        ));
        let cache = root.join("kernel_cache");
        fs::create_dir_all(&cache).unwrap();
        Self { root, cache }
    }

    fn arguments(&self) -> MapperArguments {
        MapperArguments {
            outfile_prefix: self.root.join("out"),
            kerngen: PathBuf::from("/nonexistent/kerngen"),
            cache_dir: self.cache.clone(),
            kernel_flavor: KernelFlavor::Stdin,
            ..MapperArguments::default()
        }
    }
}

impl Drop for TestDirs {
    fn drop(&mut self) {
        fs::remove_dir_all(&self.root).ok();
    }
}

fn parse_program(rows: &str) -> PolyProgram {
    trace::parse_trace_csv(&format!("{HEADER}\n{rows}"), true).unwrap()
}

#[test]
fn chained_adds_share_one_register() {
    let dirs = TestDirs::new("chained-adds");
    fs::write(
        dirs.cache.join("BGV_add_8192_2_2.csv"),
        "13, add, output0_0_0, input0_0_0, input1_0_0, 0\n",
    )
    .unwrap();

    // two chained adds accumulating into a: a += b; a += c
    let program = parse_program(
        "add,BGV,8192,4,a-2-2,a-2-2,b-2-2\n\
         add,BGV,8192,4,a-2-2,a-2-2,c-2-2\n",
    );

    let mapper = ProgramMapper::new(dirs.arguments());
    let mapped = mapper.map_program(&program).unwrap();

    assert_eq!(mapped.stream.len(), 2);
    let first = &mapped.instructions[mapped.stream[0]];
    let second = &mapped.instructions[mapped.stream[1]];
    assert_eq!(
        second.input_operand(0).location(),
        first.output_operand(0).location()
    );

    let loads: Vec<&String> = mapped
        .memory_image
        .iter()
        .filter(|line| line.starts_with("dload, poly"))
        .collect();
    let stores: Vec<&String> = mapped
        .memory_image
        .iter()
        .filter(|line| line.starts_with("dstore"))
        .collect();
    assert_eq!(loads.len(), 3);
    assert_eq!(stores.len(), 1);
    for symbol in ["a_0_0", "b_0_0", "c_0_0"] {
        assert!(
            loads.iter().any(|line| line.ends_with(symbol)),
            "missing load for {symbol}"
        );
    }
    assert!(stores[0].starts_with("dstore, a_0_0"));
}

#[test]
fn output_files_are_written() {
    let dirs = TestDirs::new("outputs");
    fs::write(
        dirs.cache.join("BGV_add_8192_2_2.csv"),
        "13, add, output0_0_0, input0_0_0, input1_0_0, 0\n",
    )
    .unwrap();
    let program = parse_program("add,BGV,8192,4,c-2-2,a-2-2,b-2-2\n");

    let mut arguments = dirs.arguments();
    arguments.export_dot = true;
    ProgramMapper::new(arguments).generate_pisa_program(&program).unwrap();

    let stream = fs::read_to_string(dirs.root.join("out.csv")).unwrap();
    assert_eq!(stream.trim(), "13, add, c_0_0, a_0_0, b_0_0, 0");

    let memory = fs::read_to_string(dirs.root.join("out.tw.mem")).unwrap();
    assert!(memory.lines().next().unwrap().starts_with("dload, ntt_auxiliary_table"));

    assert!(dirs.root.join("out.dot").exists());
    assert!(dirs.root.join("out.trace.dot").exists());
}

#[test]
fn internal_registers_are_namespaced_per_kernel() {
    let dirs = TestDirs::new("namespacing");
    fs::write(
        dirs.cache.join("BGV_mul_8192_2_2.csv"),
        "13, mul, acc_0_0, input0_0_0, input1_0_0, 0\n\
         13, mac, acc_0_0, input0_0_1, input1_0_1, 1\n\
         13, copy, output0_0_0, acc_0_0\n",
    )
    .unwrap();

    // two muls: each kernel instance's acc must not collide
    let program = parse_program(
        "mul,BGV,8192,4,t-2-2,a-2-2,b-2-2\n\
         mul,BGV,8192,4,u-2-2,t-2-2,c-2-2\n",
    );

    let mapper = ProgramMapper::new(dirs.arguments());
    let mapped = mapper.map_program(&program).unwrap();
    assert_eq!(mapped.stream.len(), 6);

    let accs: Vec<&str> = mapped
        .instructions
        .iter()
        .filter(|instr| instr.opcode == Opcode::Mul)
        .map(|instr| instr.output_operand(0).location())
        .collect();
    assert_eq!(accs.len(), 2);
    assert!(accs[0].starts_with("internalmul0NS_"));
    assert!(accs[1].starts_with("internalmul1NS_"));
    assert_ne!(accs[0], accs[1]);
}

#[test]
fn graph_order_resolves_mac_and_keeps_topology() {
    let dirs = TestDirs::new("graph-order");
    fs::write(
        dirs.cache.join("BGV_mul_8192_2_2.csv"),
        "13, mul, acc_0_0, input0_0_0, input1_0_0, 0\n\
         13, mac, acc_0_0, input0_0_1, input1_0_1, 1\n\
         13, copy, output0_0_0, acc_0_0\n",
    )
    .unwrap();
    let program = parse_program("mul,BGV,8192,4,c-2-2,a-2-2,b-2-2\n");

    let mut arguments = dirs.arguments();
    arguments.graph_order = true;
    let mapped = ProgramMapper::new(arguments).map_program(&program).unwrap();

    assert_eq!(mapped.stream.len(), 3);
    let opcode_at = |n: usize| mapped.instructions[mapped.stream[n]].opcode;
    assert_eq!(opcode_at(0), Opcode::Mul);
    assert_eq!(opcode_at(1), Opcode::Mac);
    assert_eq!(opcode_at(2), Opcode::Copy);

    let mac = &mapped.instructions[mapped.stream[1]];
    assert_eq!(
        mac.input_operand(0).location(),
        mac.output_operand(0).location()
    );
    let copy = &mapped.instructions[mapped.stream[2]];
    assert_eq!(copy.output_operand(0).location(), "c_0_0");
}

#[test]
fn duplicate_inputs_get_a_copy_end_to_end() {
    let dirs = TestDirs::new("duplicate");
    fs::write(
        dirs.cache.join("BGV_add_8192_2_2.csv"),
        "13, add, output0_0_0, input0_0_0, input1_0_0, 0\n",
    )
    .unwrap();
    // both trace inputs are the same ciphertext
    let program = parse_program("add,BGV,8192,4,y-2-2,x-2-2,x-2-2\n");

    let mapper = ProgramMapper::new(dirs.arguments());
    let mapped = mapper.map_program(&program).unwrap();

    assert_eq!(mapped.stream.len(), 2);
    let copy = &mapped.instructions[mapped.stream[0]];
    let add = &mapped.instructions[mapped.stream[1]];
    assert_eq!(copy.opcode, Opcode::Copy);
    assert_eq!(copy.input_operand(0).location(), "x_0_0");
    assert_eq!(copy.output_operand(0).location(), "copyAx_0_0");
    assert_eq!(add.input_operand(0).location(), "x_0_0");
    assert_eq!(add.input_operand(1).location(), "copyAx_0_0");
}

#[cfg(unix)]
#[test]
fn generator_is_invoked_when_cache_misses() {
    use std::os::unix::fs::PermissionsExt;

    let dirs = TestDirs::new("generator");
    let generator = dirs.root.join("fake-kerngen");
    fs::write(
        &generator,
        "#!/bin/sh\n\
         # echo one add instruction regardless of the request on stdin\n\
         cat > /dev/null\n\
         printf '13, add, output0_0_0, input0_0_0, input1_0_0, 0\\n'\n",
    )
    .unwrap();
    let mut permissions = fs::metadata(&generator).unwrap().permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(&generator, permissions).unwrap();

    let program = parse_program("add,BGV,8192,4,c-2-2,a-2-2,b-2-2\n");

    let mut arguments = dirs.arguments();
    arguments.kerngen = generator;
    arguments.use_kernel_cache = false;
    let mapped = ProgramMapper::new(arguments).map_program(&program).unwrap();
    assert_eq!(mapped.stream.len(), 1);

    // the invocation populated the cache file
    assert!(dirs.cache.join("BGV_add_8192_2_2.csv").exists());
}

#[test]
fn missing_generator_is_fatal() {
    let dirs = TestDirs::new("missing-generator");
    let program = parse_program("add,BGV,8192,4,c-2-2,a-2-2,b-2-2\n");
    let result = ProgramMapper::new(dirs.arguments()).map_program(&program);
    assert!(result.is_err());
}
