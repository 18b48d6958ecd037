use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use missedpages_core::admin::{Actor, AdminAction, AdminOutcome, ConfiguredActor, perform};
use missedpages_core::config::{MissedPagesConfig, load_config};
use missedpages_core::editor::{ContentEditor, MediaWikiEditor, MediaWikiEditorConfig};
use missedpages_core::hooks::on_missing_page;
use missedpages_core::report::{
    ignored_report, log_report, render_ignored, render_log, render_recent, render_trend,
    trend_report,
};
use missedpages_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, init_layout, inspect_runtime,
    normalize_for_display, resolve_paths,
};
use missedpages_core::schema::open_store;
use missedpages_core::service::{MissedPages, RecordOutcome};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "MISSEDPAGES_LOG";
const DEFAULT_RECENT_LIMIT: usize = 50;

#[derive(Debug, Parser)]
#[command(
    name = "missedpages",
    version,
    about = "Track requests for wiki pages that do not exist and act on them"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init(InitArgs),
    Db(DbArgs),
    /// Log one request for a page that does not exist
    Record(TitleArgs),
    /// Most missed pages with their daily trend
    List(ListArgs),
    /// Pages excluded from logging
    Ignored(JsonArgs),
    /// Daily miss counts for one page
    Trend(TrendArgs),
    /// Individual misses, newest first
    Recent(RecentArgs),
    /// Clear a page's log and stop logging it
    Ignore(TitleArgs),
    /// Clear a page's log, including an ignore marker
    Delete(TitleArgs),
    /// Create a redirect on the wiki, then clear the source page's log
    Redirect(RedirectArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
    #[arg(long, help = "Skip writing .missedpages/config.toml")]
    no_config: bool,
}

#[derive(Debug, Args)]
struct DbArgs {
    #[command(subcommand)]
    command: DbSubcommand,
}

#[derive(Debug, Subcommand)]
enum DbSubcommand {
    Stats,
}

#[derive(Debug, Args)]
struct TitleArgs {
    title: String,
}

#[derive(Debug, Args)]
struct JsonArgs {
    #[arg(long, help = "Print JSON instead of key: value lines")]
    json: bool,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long, help = "Maximum number of pages (default: ledger.log_limit)")]
    limit: Option<usize>,
    #[arg(long, help = "Print JSON instead of key: value lines")]
    json: bool,
}

#[derive(Debug, Args)]
struct TrendArgs {
    title: String,
    #[arg(long, help = "Most recent active days to show (default: ledger.trend_days)")]
    days: Option<usize>,
    #[arg(long, help = "Print JSON instead of key: value lines")]
    json: bool,
}

#[derive(Debug, Args)]
struct RecentArgs {
    #[arg(long, default_value_t = DEFAULT_RECENT_LIMIT)]
    limit: usize,
    #[arg(long, default_value_t = 0)]
    offset: usize,
    #[arg(long, help = "Print JSON instead of key: value lines")]
    json: bool,
}

#[derive(Debug, Args)]
struct RedirectArgs {
    from: String,
    to: String,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Db(DbArgs { command })) => match command {
            DbSubcommand::Stats => run_db_stats(&runtime),
        },
        Some(Commands::Record(TitleArgs { title })) => run_record(&runtime, &title),
        Some(Commands::List(args)) => run_list(&runtime, args),
        Some(Commands::Ignored(JsonArgs { json })) => run_ignored(&runtime, json),
        Some(Commands::Trend(args)) => run_trend(&runtime, args),
        Some(Commands::Recent(args)) => run_recent(&runtime, args),
        Some(Commands::Ignore(TitleArgs { title })) => {
            run_admin(&runtime, AdminAction::Ignore(title))
        }
        Some(Commands::Delete(TitleArgs { title })) => {
            run_admin(&runtime, AdminAction::Delete(title))
        }
        Some(Commands::Redirect(RedirectArgs { from, to })) => {
            run_admin(&runtime, AdminAction::Redirect { from, to })
        }
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            materialize_config: !args.no_config,
            force: args.force,
        },
    )?;
    let _store = open_store(&paths)?;

    println!("Initialized missedpages runtime layout");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("data_dir: {}", normalize_for_display(&paths.data_dir));
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("schema: ready");
    print_diagnostics(runtime, &paths);

    Ok(())
}

fn run_db_stats(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;

    println!("db stats");
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("data_dir: {}", normalize_for_display(&paths.data_dir));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    if status.db_exists {
        let service = MissedPages::new(open_store(&paths)?);
        println!("ledger.events: {}", service.store().count_events()?);
        println!(
            "ledger.missed_titles: {}",
            service.store().grouped_counts(false, None)?.len()
        );
        println!("ledger.ignored_titles: {}", service.ignored_entries()?.len());
    }
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    print_diagnostics(runtime, &paths);

    Ok(())
}

fn run_record(runtime: &RuntimeOptions, title: &str) -> Result<()> {
    let session = open_session(runtime)?;
    let outcome = on_missing_page(&session.service, title);

    println!("record");
    println!("title: {title}");
    println!(
        "outcome: {}",
        match outcome {
            Some(RecordOutcome::Recorded) => "recorded",
            Some(RecordOutcome::Ignored) => "ignored",
            None => "skipped",
        }
    );
    print_diagnostics(runtime, &session.paths);

    Ok(())
}

fn run_list(runtime: &RuntimeOptions, args: ListArgs) -> Result<()> {
    let session = open_session(runtime)?;
    let limit = args.limit.unwrap_or(session.config.ledger.log_limit);
    let rows = log_report(&session.service, limit, session.config.ledger.trend_days)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        print!("{}", render_log(&rows));
        print_diagnostics(runtime, &session.paths);
    }
    Ok(())
}

fn run_ignored(runtime: &RuntimeOptions, json: bool) -> Result<()> {
    let session = open_session(runtime)?;
    let rows = ignored_report(&session.service)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        print!("{}", render_ignored(&rows));
        print_diagnostics(runtime, &session.paths);
    }
    Ok(())
}

fn run_trend(runtime: &RuntimeOptions, args: TrendArgs) -> Result<()> {
    let session = open_session(runtime)?;
    let days = args.days.unwrap_or(session.config.ledger.trend_days);
    let report = trend_report(&session.service, &args.title, days)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_trend(&report));
        print_diagnostics(runtime, &session.paths);
    }
    Ok(())
}

fn run_recent(runtime: &RuntimeOptions, args: RecentArgs) -> Result<()> {
    let session = open_session(runtime)?;
    let page = session.service.recent_misses(args.limit, args.offset)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&page)?);
    } else {
        print!("{}", render_recent(&page));
        print_diagnostics(runtime, &session.paths);
    }
    Ok(())
}

fn run_admin(runtime: &RuntimeOptions, action: AdminAction) -> Result<()> {
    let mut session = open_session(runtime)?;
    let actor = ConfiguredActor::from_config(&session.config);

    let mut wiki_editor = match action {
        AdminAction::Redirect { .. } => Some(
            MediaWikiEditor::new(MediaWikiEditorConfig::from_config(&session.config))
                .context("failed to set up the wiki editor")?,
        ),
        _ => None,
    };
    let content_editor = wiki_editor
        .as_mut()
        .map(|editor| editor as &mut dyn ContentEditor);

    let outcome = perform(
        &mut session.service,
        &session.config.rights,
        &actor,
        content_editor,
        &action,
    )?;

    match outcome {
        AdminOutcome::Redirected(redirect) => {
            println!("redirect");
            println!("page: {}", redirect.page);
            println!("target: {}", redirect.target);
            println!("cleared_rows: {}", redirect.cleared_rows);
        }
        AdminOutcome::Ignored { page } => {
            println!("ignore");
            println!("page: {page}");
        }
        AdminOutcome::Deleted { page, removed_rows } => {
            println!("delete");
            println!("page: {page}");
            println!("removed_rows: {removed_rows}");
        }
    }
    println!("actor: {}", actor_label(&actor));
    print_diagnostics(runtime, &session.paths);

    Ok(())
}

struct Session {
    paths: ResolvedPaths,
    config: MissedPagesConfig,
    service: MissedPages,
}

fn open_session(runtime: &RuntimeOptions) -> Result<Session> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let store = open_store(&paths)?;
    tracing::debug!(db_path = %paths.db_path.display(), "ledger opened");
    let service = MissedPages::new(store).with_redirect_comment(config.redirect_comment());
    Ok(Session {
        paths,
        config,
        service,
    })
}

fn actor_label(actor: &ConfiguredActor) -> String {
    let rights = actor.rights().collect::<Vec<_>>();
    if rights.is_empty() {
        format!("{} (no rights)", actor.name())
    } else {
        format!("{} ({})", actor.name(), rights.join(", "))
    }
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
