//! ctesplit CLI - edit the CTEs of a SQL statement as separate files

use ctesplit_cli::cli::{Args, Command, Destination, OutputFormat, Source};
use ctesplit_cli::{input, layout, output};

use anyhow::{Context, Result};
use clap::Parser;
use ctesplit_core::{Dialect, RecomposeOptions, Workspace};
use is_terminal::IsTerminal;
use serde_json::json;
use std::path::Path;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// Invalid units or a dependency cycle found.
const EXIT_FAILURE: u8 = 1;
/// Usage, input or configuration error.
const EXIT_CONFIG_ERROR: u8 = 66;

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(true) => ExitCode::from(EXIT_FAILURE),
        Ok(false) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ctesplit: error: {e:#}");
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

/// Logs go to stderr so stdout stays parseable.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .init();
}

/// Output settings shared by every subcommand.
struct Printer {
    format: OutputFormat,
    compact: bool,
    quiet: bool,
    colored: bool,
}

impl Printer {
    fn status(&self, message: impl std::fmt::Display) {
        if !self.quiet {
            eprintln!("ctesplit: {message}");
        }
    }

    fn json<T: serde::Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!("{}", output::format_json(value, self.compact)?);
        Ok(())
    }

    /// Mermaid only makes sense for `graph`.
    fn require_text_or_json(&self, command: &str) -> Result<()> {
        if self.format == OutputFormat::Mermaid {
            anyhow::bail!("'{command}' only supports 'table' and 'json' output formats, got 'mermaid'");
        }
        Ok(())
    }
}

/// Returns whether failures were found.
fn run(args: Args) -> Result<bool> {
    let dialect = args.dialect.map(Dialect::from);
    let printer = Printer {
        format: args.format,
        compact: args.compact,
        quiet: args.quiet,
        colored: std::io::stdout().is_terminal(),
    };

    match args.command {
        Command::Decompose {
            file,
            out,
            test_values,
        } => run_decompose(&file, &out, test_values.as_deref(), dialect, &printer),
        Command::Recompose {
            file,
            from,
            destination,
        } => run_recompose(&file, &from, &destination, dialect, &printer),
        Command::Compose { dir, output } => run_compose(&dir, output.as_deref(), dialect, &printer),
        Command::Validate { source } => run_validate(&source, dialect, &printer),
        Command::Graph { source } => run_graph(&source, dialect, &printer),
        Command::Run {
            source,
            unit,
            execute,
        } => run_unit(&source, &unit, execute, dialect, &printer),
    }
}

fn run_decompose(
    file: &Path,
    root: &Path,
    test_values: Option<&Path>,
    dialect: Option<Dialect>,
    printer: &Printer,
) -> Result<bool> {
    printer.require_text_or_json("decompose")?;
    if file.is_dir() {
        anyhow::bail!("{} is a directory; decompose expects a SQL file", file.display());
    }

    let mut workspace = input::load_workspace(file, dialect)?;
    if let Some(path) = test_values {
        workspace.set_test_values(input::read_test_values(path)?);
    }

    let dir = layout::feature_dir(root, file)?;
    layout::write_workspace(&dir, &workspace)?;
    info!(source = %file.display(), dir = %dir.display(), "decomposed");

    match printer.format {
        OutputFormat::Json => printer.json(&json!({
            "dir": dir,
            "units": workspace.units(),
        }))?,
        _ => {
            printer.status(format!(
                "wrote {} units to {}",
                workspace.units().len(),
                dir.display()
            ));
            print!("{}", output::format_graph(&workspace, printer.colored));
        }
    }
    Ok(false)
}

fn run_recompose(
    file: &Path,
    root: &Path,
    destination: &Destination,
    dialect: Option<Dialect>,
    printer: &Printer,
) -> Result<bool> {
    let dir = layout::feature_dir(root, file)?;
    let sql = assemble(&dir, dialect)?;

    if destination.stdout {
        println!("{sql}");
        return Ok(false);
    }
    let target = destination.output.as_deref().unwrap_or(file);
    write_sql(target, &sql)?;
    printer.status(format!("wrote {}", target.display()));
    Ok(false)
}

fn run_compose(
    dir: &Path,
    output: Option<&Path>,
    dialect: Option<Dialect>,
    printer: &Printer,
) -> Result<bool> {
    let sql = assemble(dir, dialect)?;
    match output {
        Some(path) => {
            write_sql(path, &sql)?;
            printer.status(format!("wrote {}", path.display()));
        }
        None => println!("{sql}"),
    }
    Ok(false)
}

fn run_validate(source: &Source, dialect: Option<Dialect>, printer: &Printer) -> Result<bool> {
    printer.require_text_or_json("validate")?;
    let mut workspace = load_source(source, dialect)?;
    let results = workspace.validate_all();
    let has_invalid = results.values().any(|outcome| !outcome.is_valid());

    match printer.format {
        OutputFormat::Json => printer.json(results)?,
        _ => print!("{}", output::format_validation(results, printer.colored)),
    }
    Ok(has_invalid)
}

fn run_graph(source: &Source, dialect: Option<Dialect>, printer: &Printer) -> Result<bool> {
    let workspace = load_source(source, dialect)?;

    match printer.format {
        OutputFormat::Table => print!("{}", output::format_graph(&workspace, printer.colored)),
        OutputFormat::Json => printer.json(workspace.units())?,
        OutputFormat::Mermaid => print!("{}", output::format_mermaid(&workspace)),
    }

    if let Err(cycle) = workspace.resolve() {
        printer.status(cycle);
        return Ok(true);
    }
    Ok(false)
}

fn run_unit(
    source: &Source,
    unit: &str,
    execute: bool,
    dialect: Option<Dialect>,
    printer: &Printer,
) -> Result<bool> {
    printer.require_text_or_json("run")?;
    let mut workspace = load_source(source, dialect)?;
    let sql = workspace
        .sandbox_sql(unit)
        .with_context(|| format!("Failed to build sandbox SQL for '{unit}'"))?;

    if execute {
        return execute_sql(&sql, printer);
    }

    match printer.format {
        OutputFormat::Json => printer.json(&json!({ "unit": unit, "sql": sql }))?,
        _ => println!("{sql}"),
    }
    Ok(false)
}

#[cfg(feature = "sandbox")]
fn execute_sql(sql: &str, printer: &Printer) -> Result<bool> {
    let result = ctesplit_cli::sandbox::execute(sql)?;
    match printer.format {
        OutputFormat::Json => printer.json(&json!({
            "columns": result.columns,
            "rows": result.rows,
        }))?,
        _ => print!("{}", output::table::format_rows(&result.columns, &result.rows)),
    }
    Ok(false)
}

#[cfg(not(feature = "sandbox"))]
fn execute_sql(_sql: &str, _printer: &Printer) -> Result<bool> {
    anyhow::bail!("--execute requires ctesplit built with the 'sandbox' feature")
}

fn load_source(source: &Source, dialect: Option<Dialect>) -> Result<Workspace> {
    let mut workspace = input::load_workspace(&source.path, dialect)?;
    if let Some(path) = &source.test_values {
        workspace.set_test_values(input::read_test_values(path)?);
    }
    Ok(workspace)
}

fn assemble(dir: &Path, dialect: Option<Dialect>) -> Result<String> {
    let mut workspace = layout::read_workspace(dir, dialect)?;
    workspace
        .generate_final_sql(&RecomposeOptions::default())
        .with_context(|| format!("Failed to recompose {}", dir.display()))
}

fn write_sql(path: &Path, sql: &str) -> Result<()> {
    std::fs::write(path, format!("{sql}\n"))
        .with_context(|| format!("Failed to write file: {}", path.display()))
}
