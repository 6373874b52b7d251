use clap::{error::ErrorKind, ArgAction, CommandFactory, Parser, Subcommand};
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use parley::{
    app::{App, AppSettings, AppState, Control},
    app_dirs::AppDirs,
    clock::{Clock, SystemClock},
    condition::ConditionOrder,
    config::{ConfigStore, FileConfigStore},
    experiment::Timings,
    export::{self, ExportFormat},
    persistence::{DocumentSink, MemorySink, SqliteStore},
    runtime::{is_quit, AppEvent, AppEventSource, CrosstermEventSource, FixedTicker, Runner, Ticker},
    script::Script,
    validation::RuleSet,
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use std::{
    error::Error,
    fs,
    io::{self, stdin},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{info, warn};

const TICK_RATE_MS: u64 = 50;

/// scripted banking chatbot that records how participants type their answers
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "Runs a participant through scripted support conversations, one per condition, recording keystroke timing for every answer and a short survey after each session."
)]
pub struct Cli {
    /// participant id; asked for on the welcome screen when omitted
    #[clap(short = 'p', long)]
    participant: Option<String>,

    /// order of conditions, e.g. `none-emoji`; random when omitted
    #[clap(short = 'o', long)]
    condition_order: Option<ConditionOrder>,

    /// session to start from (1-based), to resume an interrupted run
    #[clap(long, default_value_t = 1)]
    start_from: usize,

    /// use this script for every session instead of the bundled ones
    #[clap(long)]
    script: Option<PathBuf>,

    /// session database; defaults to the config file value, then the state dir
    #[clap(long)]
    database: Option<PathBuf>,

    /// keep sessions in memory instead of writing them to the database
    #[clap(long)]
    dry_run: bool,

    /// more logging (-v, -vv, -vvv); PARLEY_LOG overrides
    #[clap(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// write every saved session as one row per answer
    Export {
        /// output file; stdout when omitted
        #[clap(short, long)]
        out: Option<PathBuf>,

        #[clap(short, long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = FileConfigStore::new().load();

    let db_path = cli
        .database
        .clone()
        .or_else(|| config.database_path.clone())
        .or_else(AppDirs::db_path)
        .ok_or("could not resolve a database location; pass --database")?;

    if let Some(Command::Export { out, format }) = &cli.command {
        configure_logging(cli.verbose, LogTarget::Stderr);
        return run_export(&db_path, out.as_deref(), *format);
    }

    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    configure_logging(cli.verbose, LogTarget::File(AppDirs::log_path()));

    let sink: Arc<dyn DocumentSink> = if cli.dry_run {
        info!("dry run, sessions are not written to disk");
        Arc::new(MemorySink::new())
    } else {
        info!(path = %db_path.display(), "opening session store");
        Arc::new(SqliteStore::open(&db_path)?)
    };

    let script = match &cli.script {
        Some(path) => Some(Script::from_json(&fs::read_to_string(path)?)?),
        None => None,
    };

    let order = cli
        .condition_order
        .clone()
        .unwrap_or_else(|| ConditionOrder::random(&mut rand::thread_rng()));

    let settings = AppSettings {
        order,
        start_from: cli.start_from,
        timings: Timings::from(&config),
        rules: RuleSet::banking(),
        script,
        sink,
        persist_timeout: config.persist_timeout(),
    };
    let mut app = App::new(settings, cli.participant.clone(), SystemClock::new())?;

    enable_raw_mode()?;

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let runner = Runner::new(
        CrosstermEventSource::new(),
        FixedTicker::new(Duration::from_millis(TICK_RATE_MS)),
    );
    let result = start_tui(&mut terminal, &mut app, &runner);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen,)?;
    terminal.show_cursor()?;

    if app.state != AppState::Complete {
        if let Some(info) = app.current_session() {
            warn!(
                participant = %info.participant_id,
                session = info.session_number,
                "exited before the session was saved"
            );
            eprintln!(
                "session {} for participant {} was not saved",
                info.session_number, info.participant_id
            );
        }
    }

    result
}

fn start_tui<B: Backend, E: AppEventSource, T: Ticker, C: Clock + Clone>(
    terminal: &mut Terminal<B>,
    app: &mut App<C>,
    runner: &Runner<E, T>,
) -> Result<(), Box<dyn Error>> {
    terminal.draw(|f| f.render_widget(&*app, f.area()))?;

    loop {
        match runner.step() {
            AppEvent::Tick => app.on_tick(),
            AppEvent::Resize => {}
            AppEvent::Key(key) => {
                // ctrl+c to quit
                if is_quit(&key) || app.on_key(&key)? == Control::Quit {
                    break;
                }
            }
        }
        terminal.draw(|f| f.render_widget(&*app, f.area()))?;
    }

    Ok(())
}

fn run_export(
    db_path: &Path,
    out: Option<&Path>,
    format: ExportFormat,
) -> Result<(), Box<dyn Error>> {
    let store = SqliteStore::open(db_path)?;
    let sessions = export::load_sessions(&store)?;
    let rows = match out {
        Some(path) => export::write(format, &sessions, fs::File::create(path)?)?,
        None => export::write(format, &sessions, io::stdout().lock())?,
    };
    info!(rows, sessions = sessions.len(), "export finished");
    Ok(())
}

enum LogTarget {
    Stderr,
    /// The TUI owns the terminal, so logs go to a file when one can be opened.
    File(Option<PathBuf>),
}

fn configure_logging(verbose: u8, target: LogTarget) {
    use tracing::level_filters::LevelFilter;
    use tracing_subscriber::EnvFilter;

    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let level = match target {
        // Keep export output quiet unless asked.
        LogTarget::Stderr if verbose == 0 => LevelFilter::WARN,
        _ => level,
    };

    let filter = EnvFilter::try_from_env("PARLEY_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("parley={level}")));

    match target {
        LogTarget::Stderr => {
            tracing_subscriber::fmt()
                .with_target(false)
                .with_writer(io::stderr)
                .with_env_filter(filter)
                .init();
        }
        LogTarget::File(path) => {
            let file = path.and_then(|path| {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).ok()?;
                }
                fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .ok()
            });
            // Without a log file nothing is logged; stderr belongs to the TUI.
            if let Some(file) = file {
                tracing_subscriber::fmt()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_env_filter(filter)
                    .init();
            }
        }
    }
}
