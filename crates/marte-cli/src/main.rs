//! `marte`: check / fmt / build commands for the MARTe configuration
//! language. Every subcommand builds one ad-hoc `marte_core::View` over
//! a project directory (or a single file), the same path a language
//! server drives incrementally.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use marte_core::diagnostics::Level;
use marte_core::index::scan::scan_directory;
use marte_core::schema::Schema;
use marte_core::session::{CancellationToken, View};

#[derive(Parser)]
#[command(name = "marte", version, about = "Tooling for the MARTe real-time configuration language")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse and validate a project, printing diagnostics.
    Check {
        /// Project root or single file. Defaults to the current directory.
        path: Option<PathBuf>,
    },
    /// Macro-expand a project and print (or write) the flattened output.
    Build {
        /// Project root or single file. Defaults to the current directory.
        path: Option<PathBuf>,
        /// `Name=value` variable override, repeatable.
        #[arg(long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,
        /// Write the expanded output here instead of stdout.
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
    /// Check that every source file is already canonically formatted.
    Fmt {
        /// Project root or single file. Defaults to the current directory.
        path: Option<PathBuf>,
        /// Rewrite files in place instead of reporting a diff.
        #[arg(long)]
        write: bool,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Check { path } => run_check(&resolve_root(path)),
        Command::Build { path, set, output } => run_build(&resolve_root(path), &parse_overrides(&set), output.as_deref()),
        Command::Fmt { path, write } => run_fmt(&resolve_root(path), write),
    }
}

fn resolve_root(path: Option<PathBuf>) -> PathBuf {
    path.unwrap_or_else(|| PathBuf::from("."))
}

fn parse_overrides(set: &[String]) -> HashMap<String, String> {
    let mut overrides = HashMap::new();
    for entry in set {
        match entry.split_once('=') {
            Some((name, value)) => {
                overrides.insert(name.to_string(), value.to_string());
            }
            None => eprintln!("warning: ignoring malformed --set {entry:?}, expected NAME=VALUE"),
        }
    }
    overrides
}

fn load_project_schema(root: &Path) -> Schema {
    match Schema::load_for_project(root) {
        Ok(schema) => schema,
        Err(err) => {
            eprintln!("error: built-in schema failed to load: {err}");
            std::process::exit(1);
        }
    }
}

/// Discovers every `.marte` file under `path` (or just `path` itself if
/// it names a file) and loads it into a fresh `View`.
fn open_project(path: &Path) -> (Arc<View>, Vec<marte_core::index::scan::ScanError>) {
    let (root, files, errors) = if path.is_file() {
        (path.parent().unwrap_or(Path::new(".")).to_path_buf(), vec![path.to_path_buf()], Vec::new())
    } else {
        let scan = scan_directory(path);
        for error in &scan.errors {
            log::warn!("scan error: {error}");
        }
        (path.to_path_buf(), scan.files, scan.errors)
    };

    let schema = Arc::new(load_project_schema(&root));
    let view = Arc::new(View::new(root, schema));
    let token = CancellationToken::new();
    for file in &files {
        match std::fs::read_to_string(file) {
            Ok(text) => view.open_or_replace(file, text, &token),
            Err(err) => eprintln!("error: could not read {}: {err}", file.display()),
        }
    }
    (view, errors)
}

fn run_check(path: &Path) -> ExitCode {
    let (view, scan_errors) = open_project(path);
    let snapshot = view.snapshot();

    let mut error_count = 0usize;
    let mut warning_count = 0usize;
    for (file, diagnostics) in &snapshot.diagnostics {
        for diagnostic in diagnostics {
            match diagnostic.level {
                Level::Error => error_count += 1,
                Level::Warning => warning_count += 1,
            }
            println!(
                "{}:{}:{}: {}: {}",
                file.display(),
                diagnostic.position.line + 1,
                diagnostic.position.column + 1,
                level_label(diagnostic.level),
                diagnostic.message
            );
        }
    }

    if !scan_errors.is_empty() {
        for error in &scan_errors {
            eprintln!("scan error: {error}");
        }
    }

    println!("{error_count} error(s), {warning_count} warning(s)");
    if error_count > 0 || !scan_errors.is_empty() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn level_label(level: Level) -> &'static str {
    match level {
        Level::Error => "error",
        Level::Warning => "warning",
    }
}

fn run_build(path: &Path, overrides: &HashMap<String, String>, output: Option<&Path>) -> ExitCode {
    let (view, _) = open_project(path);
    let snapshot = view.snapshot();

    let has_errors = snapshot.diagnostics.values().flatten().any(|d| d.level == Level::Error);
    if has_errors {
        eprintln!("error: refusing to build, project has validation errors (run `marte check` for details)");
        return ExitCode::FAILURE;
    }

    let builder = marte_core::builder::Builder::new(overrides);
    let (merged, diagnostics) = builder.build(&snapshot.tree);
    for diagnostic in &diagnostics {
        eprintln!("{}: {}", level_label(diagnostic.level), diagnostic.message);
    }
    if diagnostics.iter().any(|d| d.level == Level::Error) {
        return ExitCode::FAILURE;
    }

    let rendered = marte_core::builder::render(&merged);
    match output {
        Some(path) => {
            if let Err(err) = std::fs::write(path, &rendered) {
                eprintln!("error: could not write {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        }
        None => print!("{rendered}"),
    }
    ExitCode::SUCCESS
}

fn run_fmt(path: &Path, write: bool) -> ExitCode {
    let (view, _) = open_project(path);
    let snapshot = view.snapshot();

    let mut unformatted = Vec::new();
    for (file, document) in &snapshot.documents {
        let (config, ..) = marte_core::parser::parse(&document.text);
        let canonical = marte_core::fmt::format_configuration(&config);
        if canonical != document.text {
            unformatted.push(file.clone());
            if write {
                if let Err(err) = std::fs::write(file, &canonical) {
                    eprintln!("error: could not write {}: {err}", file.display());
                }
            }
        }
    }

    if unformatted.is_empty() {
        ExitCode::SUCCESS
    } else if write {
        for file in &unformatted {
            println!("reformatted {}", file.display());
        }
        ExitCode::SUCCESS
    } else {
        for file in &unformatted {
            println!("would reformat {}", file.display());
        }
        ExitCode::FAILURE
    }
}

