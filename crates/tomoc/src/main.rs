//! Tomo compiler driver.
//!
//! Loads a `.tm` source file plus everything its `use` statements pull in,
//! runs the core pipeline (parse, type-check, emit C) and writes a
//! `<file>.tm.h` / `<file>.tm.c` pair per module. By default the emitted C
//! is then handed to the system C compiler and the produced binary runs;
//! `-t` stops after transpiling and `-c` stops after producing an object
//! file.
//!
//! Environment variables: `VERBOSE` raises the log level, `CC` selects the
//! downstream C compiler (default `cc`), `CFLAGS` and `LDLIBS` pass
//! through to it.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{exit, Command};
use std::rc::Rc;

use libtomo::error::{CodeSpanReportGenerator, ReportGenerator};
use libtomo::file::{SourceCache, SourceFile};
use libtomo::nom_tools::State;
use libtomo::{compile_to_c, process_ast, process_code};
use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, ConfigBuilder, LevelPadding, TermLogger, TerminalMode, ThreadLogMode};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    /// `-t`: stop after writing the C files
    Transpile,
    /// `-c`: also compile an object file
    Object,
    /// default: compile and run the program
    Run,
}

struct Options {
    mode: Mode,
    source: PathBuf,
}

fn parse_args() -> Options {
    let mut mode = Mode::Run;
    let mut source = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "-t" => mode = Mode::Transpile,
            "-c" => mode = Mode::Object,
            _ if arg.starts_with('-') => {
                eprintln!("Unknown flag: {arg}");
                exit(64);
            }
            _ => source = Some(PathBuf::from(arg)),
        }
    }
    let Some(source) = source else {
        eprintln!("Usage: tomoc [-t|-c] file.tm");
        exit(64);
    };
    Options { mode, source }
}

fn setup_logging() {
    let level = if std::env::var("VERBOSE").is_ok() { LevelFilter::Debug } else { LevelFilter::Error };
    let config = ConfigBuilder::new()
        .set_location_level(LevelFilter::Error)
        .set_thread_mode(ThreadLogMode::Both)
        .set_level_padding(LevelPadding::Off)
        .set_thread_level(LevelFilter::Off)
        .build();
    let _ = CombinedLogger::init(vec![TermLogger::new(level, config, TerminalMode::Mixed, ColorChoice::Auto)]);
}

fn load_file(cache: &mut SourceCache, path: &Path) -> Result<SourceFile, String> {
    let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if let Some(file) = cache.get(&resolved) {
        return Ok(file.clone());
    }
    let code = std::fs::read_to_string(path).map_err(|error| format!("{}: {error}", path.display()))?;
    let components = resolved
        .components()
        .map(|component| component.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>();
    let file = SourceFile::new(components, code);
    cache.insert(resolved, file.clone());
    Ok(file)
}

/// Where `use <name>` library modules live.
fn library_module_path(name: &str) -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
        .join(".local/share/tomo/installed")
        .join(name)
        .join(format!("{name}.tm"))
}

/// Scans a parsed file for code imports and returns the files they
/// resolve to.
fn imported_paths(file: &SourceFile, base_dir: &Path) -> Vec<PathBuf> {
    let state = State::new(file.clone());
    let Ok(ast) = process_code(&state) else {
        // Parse errors surface when the file is compiled for real
        return Vec::new();
    };
    let mut paths = Vec::new();
    for statement in &ast.statements {
        if let libtomo::ast::AstKind::Use { path, what, .. } = &statement.kind {
            match what {
                libtomo::ast::UseKind::Local => paths.push(base_dir.join(path.as_ref())),
                libtomo::ast::UseKind::Module => paths.push(library_module_path(path)),
                _ => {}
            }
        }
    }
    paths
}

/// Loads the entry file and, transitively, every module it imports.
fn discover_modules(entry: &Path) -> Result<Vec<SourceFile>, String> {
    let mut cache = SourceCache::new();
    let mut files = Vec::new();
    let mut seen = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back(entry.to_path_buf());

    while let Some(path) = queue.pop_front() {
        let resolved = path.canonicalize().unwrap_or_else(|_| path.clone());
        if seen.contains(&resolved) {
            continue;
        }
        seen.push(resolved.clone());
        let file = load_file(&mut cache, &path)?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        for import in imported_paths(&file, &base_dir) {
            queue.push_back(import);
        }
        files.push(file);
    }
    // The entry module compiles last so its dependencies are checked first
    files.reverse();
    Ok(files)
}

fn run_downstream(mode: Mode, context: &libtomo::tir::TirContext<'_>, c_files: &[PathBuf], entry_stem: &str) -> i32 {
    let cc = std::env::var("CC").unwrap_or_else(|_| "cc".to_string());
    let cflags = std::env::var("CFLAGS").unwrap_or_default();
    let ldlibs = std::env::var("LDLIBS").unwrap_or_default();

    let mut command = Command::new(&cc);
    for flag in cflags.split_whitespace() {
        command.arg(flag);
    }
    match mode {
        Mode::Object => {
            command.arg("-c");
            for c_file in c_files {
                command.arg(c_file);
            }
        }
        _ => {
            for c_file in c_files {
                command.arg(c_file);
            }
            command.arg("-o").arg(entry_stem);
            for module in context.modules.values() {
                for flag in module.link_flags() {
                    command.arg(flag);
                }
            }
            for lib in ldlibs.split_whitespace() {
                command.arg(lib);
            }
        }
    }

    log::debug!("running {command:?}");
    match command.status() {
        Ok(status) if status.success() => {}
        Ok(status) => return status.code().unwrap_or(1),
        Err(error) => {
            eprintln!("Couldn't run {cc}: {error}");
            return 1;
        }
    }

    if mode == Mode::Run {
        match Command::new(format!("./{entry_stem}")).status() {
            Ok(status) => return status.code().unwrap_or(0),
            Err(error) => {
                eprintln!("Couldn't run ./{entry_stem}: {error}");
                return 1;
            }
        }
    }
    0
}

fn main() {
    setup_logging();
    let options = parse_args();

    let files = match discover_modules(&options.source) {
        Ok(files) => files,
        Err(message) => {
            CodeSpanReportGenerator::generate(libtomo::tir::TirError::io(
                options.source.display().to_string(),
                message,
            ));
            exit(1);
        }
    };

    // All states must outlive the ASTs parsed from them
    let states: Vec<State> = files.into_iter().map(State::new).collect();

    let mut asts = Vec::new();
    for state in &states {
        match process_code(state) {
            Ok(ast) => asts.push(Rc::new(ast)),
            Err(error) => {
                CodeSpanReportGenerator::generate(error);
                exit(1);
            }
        }
    }

    let context = match process_ast(asts) {
        Ok(context) => context,
        Err(error) => {
            CodeSpanReportGenerator::generate(error);
            exit(1);
        }
    };

    let mut c_files = Vec::new();
    for (name, module) in &context.modules {
        let output = compile_to_c(&context, name).expect("checked modules compile");
        let base = module.file.display_path();
        let header_path = PathBuf::from(format!("{base}.h"));
        let c_path = PathBuf::from(format!("{base}.c"));
        if let Err(error) = std::fs::write(&header_path, &output.header) {
            eprintln!("Couldn't write {}: {error}", header_path.display());
            exit(1);
        }
        if let Err(error) = std::fs::write(&c_path, &output.implementation) {
            eprintln!("Couldn't write {}: {error}", c_path.display());
            exit(1);
        }
        log::debug!("wrote {} and {}", header_path.display(), c_path.display());
        c_files.push(c_path);
    }

    if options.mode == Mode::Transpile {
        return;
    }

    let entry_stem = options
        .source
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "a.out".to_string());
    let status = run_downstream(options.mode, &context, &c_files, &entry_stem);
    exit(status);
}
