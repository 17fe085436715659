//! Command-line front end for the querykit engine.
#![forbid(unsafe_code)]

mod ui;

use std::error::Error;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use querykit::config::Settings;
use querykit::query::{
    load_tables, AuditRecord, Engine, InMemoryCatalog, JoinCandidate, QueryErrorWithCode,
    QueryModel, RowSets, SchemaCatalog, TableRef,
};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::ui::{Theme, Ui};

const LOG_ENV: &str = "QUERYKIT_LOG";
const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Parser, Debug)]
#[command(
    name = "querykit",
    version,
    about = "Build, validate, render and run ad-hoc multi-table queries",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "QUERYKIT_CONFIG",
        help = "Config file (defaults to <config_dir>/querykit/config.toml)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(long, global = true, value_enum, default_value_t = ThemeArg::Auto)]
    theme: ThemeArg,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "List join candidates between tables")]
    Suggest(SuggestCmd),

    #[command(about = "Print the query text for a model")]
    Render(RenderCmd),

    #[command(about = "Execute a model over CSV/JSON data files")]
    Run(RunCmd),

    #[command(about = "Check a model against the catalog")]
    Validate(QueryArgs),
}

#[derive(Args, Debug)]
struct CatalogArg {
    #[arg(long, value_name = "FILE", help = "Catalog JSON file")]
    catalog: PathBuf,
}

#[derive(Args, Debug)]
struct QueryArgs {
    #[command(flatten)]
    catalog: CatalogArg,

    #[arg(long, value_name = "FILE", help = "Query model JSON file")]
    query: PathBuf,
}

#[derive(Args, Debug)]
struct SuggestCmd {
    #[command(flatten)]
    catalog: CatalogArg,

    #[arg(
        long,
        value_name = "TABLES",
        value_delimiter = ',',
        required = true,
        help = "Comma-separated table ids; the first is the main table"
    )]
    tables: Vec<String>,
}

#[derive(Args, Debug)]
struct RenderCmd {
    #[command(flatten)]
    query: QueryArgs,

    #[arg(long, help = "Render without validating (incomplete models allowed)")]
    preview: bool,
}

#[derive(Args, Debug)]
struct RunCmd {
    #[command(flatten)]
    query: QueryArgs,

    #[arg(long, value_name = "DIR", help = "Directory holding <table>.csv or <table>.json")]
    data: PathBuf,

    #[arg(long, value_name = "FILE", help = "Append an audit record to this JSON-lines file")]
    history: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ThemeArg {
    Auto,
    Light,
    Dark,
    Plain,
}

impl From<ThemeArg> for Theme {
    fn from(theme: ThemeArg) -> Self {
        match theme {
            ThemeArg::Auto => Theme::Auto,
            ThemeArg::Light => Theme::Light,
            ThemeArg::Dark => Theme::Dark,
            ThemeArg::Plain => Theme::Plain,
        }
    }
}

#[derive(Serialize)]
struct SuggestReport<'a> {
    tables: &'a [TableRef],
    candidates: Vec<JoinCandidate>,
}

#[derive(Serialize)]
struct ValidateReport {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.clone())?;
    init_tracing(settings.log.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER));
    debug!(config = ?settings.engine, "cli.start");
    let ui = Ui::new(cli.theme.into());

    match cli.command {
        Command::Suggest(cmd) => {
            let catalog = read_catalog(&cmd.catalog.catalog)?;
            let mut model = QueryModel::new("suggest");
            for table_id in &cmd.tables {
                if catalog.table(table_id).is_none() {
                    ui.warn(&format!("table '{table_id}' is not in the catalog"));
                }
                model.add_table(table_id.as_str());
            }
            let engine = Engine::with_config(Arc::new(catalog), settings.engine);
            let report = SuggestReport {
                tables: &model.tables,
                candidates: engine.suggest_joins(&model),
            };
            emit(cli.format, &report, || {
                ui.section(
                    "Tables",
                    report.tables.iter().map(|t| (t.alias.as_str(), &t.table_id)),
                );
                ui.list("Join candidates", report.candidates.iter().map(describe_candidate));
            })?;
        }
        Command::Render(cmd) => {
            let (engine, model) = open(&cmd.query, &settings)?;
            let text = if cmd.preview {
                engine.preview(&model)
            } else {
                engine
                    .generate(&model)
                    .map_err(|err| QueryErrorWithCode(&err).to_string())?
                    .text
            };
            emit(cli.format, &serde_json::json!({ "text": &text }), || {
                println!("{text}")
            })?;
        }
        Command::Validate(args) => {
            let (engine, model) = open(&args, &settings)?;
            let report = match engine.validate(&model) {
                Ok(_) => ValidateReport {
                    valid: true,
                    code: None,
                    message: None,
                },
                Err(err) => ValidateReport {
                    valid: false,
                    code: Some(err.code()),
                    message: Some(err.to_string()),
                },
            };
            emit(cli.format, &report, || match (&report.code, &report.message) {
                (Some(code), Some(message)) => ui.warn(&format!("[{code}] {message}")),
                _ => ui.success(&format!("query '{}' is valid", model.name)),
            })?;
            if !report.valid {
                std::process::exit(2);
            }
        }
        Command::Run(cmd) => {
            let (engine, model) = open(&cmd.query, &settings)?;
            let loaded = load_tables(
                &cmd.data,
                engine.catalog(),
                model.tables.iter().map(|t| t.table_id.as_str()),
            );
            let by_table = match loaded {
                Ok(by_table) => by_table,
                Err(err) => {
                    if let Some(path) = &cmd.history {
                        let audit = AuditRecord::load_failure(&model, engine.preview(&model), &err);
                        append_history(path, &audit.to_json_line()?)?;
                    }
                    return Err(err.into());
                }
            };
            let rows = RowSets::for_model(&model, &by_table);
            let report = engine.run(&model, &rows);
            if let Some(path) = &cmd.history {
                append_history(path, &report.audit.to_json_line()?)?;
            }
            let result = report
                .outcome
                .map_err(|err| QueryErrorWithCode(&err).to_string())?;
            emit(
                cli.format,
                &serde_json::json!({ "text": report.text, "columns": result.columns, "rows": result }),
                || {
                    println!("{}", report.text);
                    println!();
                    ui.grid(&result.columns, &result.rows);
                    println!();
                    ui.success(&format!("{} row(s)", result.len()));
                },
            )?;
        }
    }

    Ok(())
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn open(args: &QueryArgs, settings: &Settings) -> Result<(Engine, QueryModel), Box<dyn Error>> {
    let catalog = read_catalog(&args.catalog.catalog)?;
    let model = read_model(&args.query)?;
    Ok((Engine::with_config(Arc::new(catalog), settings.engine.clone()), model))
}

fn read_catalog(path: &Path) -> Result<InMemoryCatalog, Box<dyn Error>> {
    let text = read_text(path)?;
    InMemoryCatalog::from_json(&text)
        .map_err(|err| format!("invalid catalog {}: {err}", path.display()).into())
}

fn read_model(path: &Path) -> Result<QueryModel, Box<dyn Error>> {
    let text = read_text(path)?;
    serde_json::from_str(&text).map_err(|err| format!("invalid query {}: {err}", path.display()).into())
}

fn read_text(path: &Path) -> Result<String, Box<dyn Error>> {
    fs::read_to_string(path).map_err(|err| format!("failed to read {}: {err}", path.display()).into())
}

fn append_history(path: &Path, line: &str) -> Result<(), Box<dyn Error>> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    Ok(())
}

fn describe_candidate(candidate: &JoinCandidate) -> String {
    format!(
        "{}.{} -> {}.{} ({})",
        candidate.left_alias,
        candidate.left_field,
        candidate.right_alias,
        candidate.right_field,
        candidate.join_type.keyword().to_lowercase()
    )
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}
