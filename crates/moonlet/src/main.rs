use std::cell::RefCell;
use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::process;
use std::rc::Rc;

use clap::Parser;
use moonlet_compiler::{compile, disassemble};
use moonlet_core::proto::Proto;
use moonlet_core::table::Table;
use moonlet_core::value::Value;
use moonlet_vm::{binary_chunk, Vm, VmConfig, VmError};
use rustyline::error::ReadlineError;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const VERSION_BANNER: &str = concat!("moonlet ", env!("CARGO_PKG_VERSION"), " -- Lua 5.3 (compatible)");

#[derive(Parser, Debug)]
#[command(name = "moonlet", version, about = "Run, list or precompile Lua scripts")]
struct Args {
    /// Execute a string before the script
    #[arg(short = 'e', value_name = "CHUNK")]
    exec: Vec<String>,

    /// Enter interactive mode after running the script
    #[arg(short = 'i')]
    interactive: bool,

    /// Show version information
    #[arg(short = 'v')]
    show_version: bool,

    /// Print the bytecode listing instead of running
    #[arg(short = 'l', long = "list")]
    list: bool,

    /// Write the compiled script as a binary chunk instead of running it
    #[arg(short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,

    /// Strip debug information from the binary chunk
    #[arg(short = 's', long = "strip")]
    strip: bool,

    /// Maximum call depth
    #[arg(long = "max-depth", value_name = "N")]
    max_depth: Option<usize>,

    /// Script to run (`-` reads stdin)
    script: Option<String>,

    /// Arguments passed to the script as `arg`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    script_args: Vec<String>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_logging();
    let args = Args::parse();

    if args.show_version {
        println!("{VERSION_BANNER}");
    }

    if args.list || args.output.is_some() {
        if let Err(msg) = precompile(&args) {
            eprintln!("moonlet: {msg}");
            process::exit(1);
        }
        return;
    }

    let stdin_is_tty = std::io::stdin().is_terminal();
    let mut config = VmConfig::default();
    if let Some(n) = args.max_depth {
        config = config.max_call_depth(n);
    }
    let mut vm = Vm::with_config(config);
    set_arg_table(&mut vm, args.script.as_deref(), &args.script_args);

    for chunk in &args.exec {
        if let Err(e) = vm.exec(chunk.as_bytes(), "=(command line)") {
            eprintln!("moonlet: {e}");
            process::exit(1);
        }
    }

    let ran_something = args.script.is_some() || !args.exec.is_empty();
    match args.script.as_deref() {
        Some(path) => {
            if let Err(msg) = run_script(&mut vm, path) {
                eprintln!("moonlet: {msg}");
                process::exit(1);
            }
        }
        None if !stdin_is_tty && args.exec.is_empty() && !args.show_version => {
            if let Err(msg) = run_script(&mut vm, "-") {
                eprintln!("moonlet: {msg}");
                process::exit(1);
            }
            return;
        }
        None => {}
    }

    if args.interactive || (!ran_something && !args.show_version) {
        if !args.show_version {
            println!("{VERSION_BANNER}");
        }
        run_repl(&mut vm);
    }
}

/// Script bytes with any `#!` first line removed. The newline is kept so
/// line numbers stay right.
fn strip_shebang(source: &[u8]) -> &[u8] {
    if !source.starts_with(b"#") {
        return source;
    }
    match source.iter().position(|&b| b == b'\n') {
        Some(pos) => &source[pos..],
        None => b"",
    }
}

fn read_source(path: &str) -> Result<(Vec<u8>, String), String> {
    if path == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .map_err(|e| format!("cannot read stdin: {e}"))?;
        return Ok((buf, "=stdin".to_string()));
    }
    let data = std::fs::read(path).map_err(|e| format!("cannot open {path}: {e}"))?;
    Ok((strip_shebang(&data).to_vec(), format!("@{path}")))
}

fn run_script(vm: &mut Vm, path: &str) -> Result<(), String> {
    let (source, chunkname) = read_source(path)?;
    vm.exec(&source, &chunkname).map_err(|e| e.to_string())?;
    Ok(())
}

/// `-l` / `-o`: compile (or undump) the script without running it.
fn precompile(args: &Args) -> Result<(), String> {
    let path = args.script.as_deref().unwrap_or("-");
    let (source, chunkname) = read_source(path)?;
    let proto: Rc<Proto> = if source.starts_with(binary_chunk::SIGNATURE) {
        binary_chunk::undump(&source, &chunkname).map_err(|e| format!("{chunkname}: {e}"))?
    } else {
        compile(&source, &chunkname).map_err(|e| e.to_string())?
    };
    if args.list {
        print!("{}", disassemble(&proto));
    }
    if let Some(out) = &args.output {
        let bytes = binary_chunk::dump(&proto, args.strip);
        std::fs::write(out, &bytes).map_err(|e| format!("cannot write {}: {e}", out.display()))?;
        debug!(path = %out.display(), bytes = bytes.len(), "wrote binary chunk");
    }
    Ok(())
}

/// Global `arg`: script name at 0, its arguments from 1, the interpreter at -1.
fn set_arg_table(vm: &mut Vm, script: Option<&str>, script_args: &[String]) {
    let mut t = Table::with_capacity(script_args.len());
    t.set_int(-1, Value::from("moonlet"));
    if let Some(name) = script {
        t.set_int(0, Value::from(name));
    }
    for (i, a) in script_args.iter().enumerate() {
        t.set_int(i as i64 + 1, Value::from(a.as_str()));
    }
    vm.set_global("arg", Value::Table(Rc::new(RefCell::new(t))));
}

/// Compile errors that a further line of input could fix.
fn is_incomplete(e: &VmError) -> bool {
    matches!(e, VmError::Compile(c) if c.message.ends_with("<eof>"))
}

/// Load one REPL entry, preferring it as an expression so its value is shown.
fn load_line(vm: &mut Vm, source: &str) -> Result<Value, VmError> {
    let as_expr = format!("return {source}");
    vm.load(as_expr.as_bytes(), "=stdin")
        .or_else(|_| vm.load(source.as_bytes(), "=stdin"))
}

fn run_repl(vm: &mut Vm) {
    let config = rustyline::config::Config::builder().auto_add_history(true).build();
    let mut rl = match rustyline::DefaultEditor::with_config(config) {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("moonlet: cannot initialize REPL: {e}");
            return;
        }
    };

    let mut pending = String::new();
    loop {
        let prompt = if pending.is_empty() { "> " } else { ">> " };
        let line = match rl.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                pending.clear();
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("moonlet: readline error: {e}");
                break;
            }
        };
        if !pending.is_empty() {
            pending.push('\n');
        }
        pending.push_str(&line);
        if pending.trim().is_empty() {
            pending.clear();
            continue;
        }

        let f = match load_line(vm, &pending) {
            Ok(f) => f,
            Err(e) if is_incomplete(&e) => continue,
            Err(e) => {
                eprintln!("{e}");
                pending.clear();
                continue;
            }
        };
        pending.clear();

        match vm.call(&f, Vec::new()) {
            Ok(results) if results.is_empty() => {}
            Ok(results) => {
                let print = vm.get_global("print");
                if let Err(e) = vm.call(&print, results) {
                    eprintln!("{e}");
                }
            }
            Err(e) => eprintln!("{e}"),
        }
    }
}
