mod commands;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use invsync_refresh::Config;
use invsync_storage::{EntityKind, MemoryStorage, StoreLock};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Automation inventory refresh engine.
#[derive(Parser)]
#[command(name = "invsync", version, about = "Automation inventory refresh engine")]
struct Cli {
    /// State file holding targets and their entity graphs
    #[arg(long, global = true, env = "INVSYNC_STORE", default_value = "invsync-store.json")]
    store: PathBuf,

    /// Configuration file
    #[arg(long, global = true, env = "INVSYNC_CONFIG", default_value = "invsync.toml")]
    config: PathBuf,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a remote target (defaults come from the [target] config section)
    Register {
        /// Target id
        id: Option<String>,
        /// Base URL of the remote API
        url: Option<String>,
        /// User the API token belongs to
        #[arg(long)]
        userid: Option<String>,
        /// Skip TLS certificate verification
        #[arg(long)]
        no_verify_ssl: bool,
    },

    /// List registered targets and their refresh status
    Targets,

    /// Run one refresh pass of a target
    Refresh {
        /// Target id (defaults to the configured target)
        target: Option<String>,
        /// Read the snapshot from this file instead of the configured source
        #[arg(long)]
        snapshot: Option<PathBuf>,
        /// JSON file mapping instance refs to counterpart ids
        #[arg(long)]
        counterparts: Option<PathBuf>,
    },

    /// Validate a snapshot file against the snapshot JSON Schema
    Validate {
        /// Path to the snapshot JSON file
        snapshot: PathBuf,
    },

    /// Show the persisted entity graph of a target
    Show {
        /// Target id (defaults to the configured target)
        target: Option<String>,
        /// List the active records of one kind
        #[arg(long, value_parser = parse_kind)]
        kind: Option<EntityKind>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    let ctx = Context {
        store: cli.store,
        config: cli.config,
        output: cli.output,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Register {
            id,
            url,
            userid,
            no_verify_ssl,
        } => commands::register::cmd_register(&ctx, id, url, userid, no_verify_ssl),
        Commands::Targets => commands::register::cmd_targets(&ctx),
        Commands::Refresh {
            target,
            snapshot,
            counterparts,
        } => commands::refresh::cmd_refresh(
            &ctx,
            target.as_deref(),
            snapshot.as_deref(),
            counterparts.as_deref(),
        ),
        Commands::Validate { snapshot } => {
            commands::validate::cmd_validate(&snapshot, ctx.output, ctx.quiet)
        }
        Commands::Show { target, kind } => commands::show::cmd_show(&ctx, target.as_deref(), kind),
    }
}

/// Global options shared by every subcommand.
pub(crate) struct Context {
    pub store: PathBuf,
    pub config: PathBuf,
    pub output: OutputFormat,
    pub quiet: bool,
}

impl Context {
    pub(crate) fn fail(&self, msg: &str) -> ! {
        report_error(msg, self.output, self.quiet);
        process::exit(1);
    }

    pub(crate) fn load_config(&self) -> Config {
        match Config::load(&self.config) {
            Ok(config) => config,
            Err(e) => self.fail(&e.to_string()),
        }
    }

    pub(crate) fn open_store(&self) -> MemoryStorage {
        match MemoryStorage::open(&self.store) {
            Ok(storage) => storage,
            Err(e) => self.fail(&format!("error opening store: {}", e)),
        }
    }

    /// Open the store for modification. The returned lock must be held until
    /// after [`Context::save_store`].
    pub(crate) fn open_store_for_update(&self) -> (StoreLock, MemoryStorage) {
        let lock = match MemoryStorage::lock_file(&self.store) {
            Ok(lock) => lock,
            Err(e) => self.fail(&format!("error locking store: {}", e)),
        };
        (lock, self.open_store())
    }

    pub(crate) fn save_store(&self, storage: &MemoryStorage) {
        if let Err(e) = storage.save(&self.store) {
            self.fail(&format!("error saving store: {}", e));
        }
    }

    pub(crate) fn runtime(&self) -> tokio::runtime::Runtime {
        match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => self.fail(&format!("failed to create tokio runtime: {}", e)),
        }
    }

    /// Target id from the argument, falling back to the configured target.
    pub(crate) fn target_id(&self, arg: Option<&str>, config: &Config) -> String {
        match (arg, &config.target) {
            (Some(id), _) => id.to_string(),
            (None, Some(target)) => target.id.clone(),
            (None, None) => self.fail(&format!(
                "no target given and no [target] section in '{}'",
                self.config.display()
            )),
        }
    }
}

fn init_tracing(quiet: bool) {
    let fallback = if quiet { "invsync=warn" } else { "invsync=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn parse_kind(s: &str) -> Result<EntityKind, String> {
    EntityKind::ALL
        .into_iter()
        .find(|kind| kind.as_str() == s)
        .ok_or_else(|| {
            let names: Vec<&str> = EntityKind::ALL.iter().map(|k| k.as_str()).collect();
            format!("unknown kind '{}', expected one of: {}", s, names.join(", "))
        })
}

pub(crate) fn read_file(path: &Path, output: OutputFormat, quiet: bool) -> String {
    match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            let msg = format!("error reading file '{}': {}", path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
