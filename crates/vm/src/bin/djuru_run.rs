//! djuru-run: a thin test-harness binary that drives the embedding API
//! (spec §6) end-to-end against a `.djuru` source file, the same role
//! mosc's own `mosc` CLI plays for `msc_interpret`.

use std::path::PathBuf;
use std::process;

use clap::Parser as ClapParser;
use djuru_vm::api::Vm;
use djuru_vm::config::{Config, ErrorKind};

#[derive(ClapParser)]
#[command(name = "djuru-run")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a .djuru source file", long_about = None)]
struct Args {
    /// Source file to interpret
    input: PathBuf,

    /// Minimum heap size in bytes before a collection can shrink it back down
    #[arg(long)]
    min_heap_size: Option<usize>,

    /// Heap size at which the first collection is triggered
    #[arg(long)]
    initial_heap_size: Option<usize>,

    /// Percentage the next GC threshold grows by after a collection
    #[arg(long)]
    heap_growth_percent: Option<u32>,
}

fn main() {
    let args = Args::parse();

    let source = match std::fs::read_to_string(&args.input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading {}: {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let mut config = Config::new()
        .with_write_fn(|text| print!("{text}"))
        .with_error_fn(|kind, module, line, message| {
            let location = module.map(|m| format!("{m}:{line}: ")).unwrap_or_default();
            match kind {
                ErrorKind::Compile => eprintln!("Compile error in {location}{message}"),
                ErrorKind::Runtime => eprintln!("Runtime error: {message}"),
                ErrorKind::StackTrace => eprintln!("  {location}{message}"),
            }
        });

    if let Some(bytes) = args.min_heap_size {
        config = config.with_min_heap_size(bytes);
    }
    if let Some(bytes) = args.initial_heap_size {
        config = config.with_initial_heap_size(bytes);
    }
    if let Some(percent) = args.heap_growth_percent {
        config = config.with_heap_growth_percent(percent);
    }

    let mut vm = Vm::new(config);
    let module_name = args.input.file_stem().and_then(|s| s.to_str()).unwrap_or("main");

    match vm.interpret(module_name, &source) {
        djuru_core::InterpretResult::Success => {}
        djuru_core::InterpretResult::CompileError => process::exit(65),
        djuru_core::InterpretResult::RuntimeError => process::exit(70),
    }
}
