//! secgroup - declarative network security groups
//!
//! Checks policy files for invalid and unreachable rules, previews the
//! changes needed to bring a stored security group in line with a file, and
//! applies them rule by rule.
//!
//! # Usage
//!
//! ```bash
//! secgroup check frontend.json            # Validate and report conflicts
//! secgroup plan frontend.json --diff      # Preview changes against the store
//! secgroup apply frontend.json --prune    # Apply, removing unmanaged rules
//! secgroup list                           # List stored groups
//! secgroup show frontend-nsg              # Print a stored group
//! secgroup diff frontend-nsg frontend.json
//! secgroup evaluate frontend-nsg --direction inbound --protocol tcp \
//!     --source 203.0.113.7 --destination 10.0.0.4 --port 22
//! secgroup history -n 5                    # Recent audit entries
//! secgroup demo --in-memory               # Two-tier network walkthrough
//! ```

use clap::{Parser, Subcommand};
use secgroup::audit::AuditLog;
use secgroup::config::{AppConfig, config_path, load_config, save_config};
use secgroup::core::error::ErrorTranslation;
use secgroup::core::memory::MemoryClient;
use secgroup::core::policy::Flow;
use secgroup::core::render::{diff_policies, render_plan, render_policy};
use secgroup::core::store::FileStore;
use secgroup::core::verify::{load_policy_file, verify_file};
use secgroup::demo::run_demo;
use secgroup::utils::{ensure_dirs, get_state_dir};
use secgroup::{
    Direction, Error, PlanOptions, Protocol, Reconciler, ResourceClient, apply,
};
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::Level;

shadow_rs::shadow!(build);

#[derive(Parser)]
#[command(name = "secgroup")]
#[command(about = "Declarative network security groups with conflict detection", long_about = None)]
#[command(version, long_version = build::CLAP_LONG_VERSION)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Also write logs to secgroup.log in the state directory
    #[arg(long, global = true)]
    log_file: bool,

    /// Policy store directory (overrides the config file)
    #[arg(long, value_name = "DIR", global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Planning flags shared by `plan` and `apply`
#[derive(clap::Args, Clone, Copy)]
struct PlanFlags {
    /// Remove stored rules the policy file does not declare
    #[arg(long)]
    prune: bool,
    /// Refuse policies with redundant or shadowed rules
    #[arg(long)]
    strict: bool,
}

impl PlanFlags {
    fn options(self, config: &AppConfig) -> PlanOptions {
        let defaults = config.plan_options();
        PlanOptions {
            prune_unmanaged: self.prune || defaults.prune_unmanaged,
            strict: self.strict || defaults.strict,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a policy file and report conflicting rules
    Check {
        file: PathBuf,
        /// Treat conflict warnings as errors
        #[arg(long)]
        strict: bool,
    },
    /// Show the changes needed to bring the stored group in line with a file
    Plan {
        file: PathBuf,
        #[command(flatten)]
        flags: PlanFlags,
        /// Also print a diff of the stored and desired rule tables
        #[arg(long)]
        diff: bool,
    },
    /// Apply a policy file to the store
    Apply {
        file: PathBuf,
        #[command(flatten)]
        flags: PlanFlags,
    },
    /// List stored security groups
    List,
    /// Print a stored security group
    Show {
        name: String,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Diff a stored security group against a policy file
    Diff { name: String, file: PathBuf },
    /// Decide a single flow against a stored security group
    Evaluate {
        name: String,
        #[arg(long)]
        direction: Direction,
        #[arg(long, default_value = "tcp")]
        protocol: Protocol,
        #[arg(long)]
        source: IpAddr,
        #[arg(long, default_value_t = 50000)]
        source_port: u16,
        #[arg(long)]
        destination: IpAddr,
        #[arg(long)]
        port: u16,
    },
    /// Print the active configuration
    Config {
        /// Write the active configuration to the config file
        #[arg(long)]
        init: bool,
    },
    /// Print recent audit log entries, newest first
    History {
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,
    },
    /// Create, update, print and tear down a two-tier network's groups
    Demo {
        /// Run against an in-memory store instead of the policy directory
        #[arg(long)]
        in_memory: bool,
    },
}

fn init_logging(verbose: u8, log_file: bool) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false);

    if log_file
        && let Some(mut log_path) = get_state_dir()
    {
        log_path.push("secgroup.log");
        if let Ok(file) = std::fs::File::create(log_path) {
            builder
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
            return;
        }
    }

    builder.with_writer(std::io::stderr).init();
}

fn main() -> ExitCode {
    let _ = ensure_dirs();
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_file);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(handle_cli(cli)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            let translation = ErrorTranslation::from_error(&e);
            eprintln!("Error: {e}");
            if translation.user_message != e.to_string() {
                eprintln!("{}", translation.user_message);
            }
            for suggestion in &translation.suggestions {
                eprintln!("  hint: {suggestion}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn open_store(cli_store: Option<PathBuf>, config: &AppConfig) -> Result<FileStore, Error> {
    match cli_store.or_else(|| config.store_dir.clone()) {
        Some(dir) => Ok(FileStore::open(dir).await?),
        None => Ok(FileStore::open_default().await?),
    }
}

fn audit_log(config: &AppConfig) -> Option<AuditLog> {
    if config.audit {
        AuditLog::new().ok()
    } else {
        None
    }
}

/// Cancels the returned token on Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling after the current operation...");
            token.cancel();
        }
    });
    cancel
}

async fn handle_cli(cli: Cli) -> Result<bool, Error> {
    let config = load_config().await;
    let audit = audit_log(&config);

    match cli.command {
        Commands::Check { file, strict } => {
            let (policy, result) = verify_file(&file, strict || config.strict).await?;
            for error in &result.errors {
                println!("error: {error}");
            }
            for warning in &result.warnings {
                println!("warning: {warning}");
            }
            if result.success {
                println!("✓ Policy '{}' is valid ({} rules)", policy.name, policy.len());
            }
            if let Some(audit) = &audit {
                audit
                    .log_verify(
                        &policy.name,
                        result.success,
                        result.errors.len(),
                        result.warnings.len(),
                    )
                    .await;
            }
            Ok(result.success)
        }
        Commands::Plan { file, flags, diff } => {
            let desired = load_policy_file(&file).await?;
            let store = open_store(cli.store, &config).await?;
            let reconciler = Reconciler::new(store, flags.options(&config));

            let plan = reconciler.preview(&desired).await?;
            print!("{}", render_plan(&plan));

            if diff {
                let observed = reconciler.observe(&desired.name).await?;
                if let Some(text) = diff_policies(&observed, &desired) {
                    println!();
                    print!("{text}");
                }
            }
            Ok(true)
        }
        Commands::Apply { file, flags } => {
            let desired = load_policy_file(&file).await?;
            let store = open_store(cli.store, &config).await?;
            let reconciler = Reconciler::new(store, flags.options(&config));

            let plan = reconciler.preview(&desired).await?;
            print!("{}", render_plan(&plan));
            if plan.is_empty() {
                return Ok(true);
            }

            let plan_id = plan.id;
            let cancel = cancel_on_ctrl_c();
            let result = apply(plan, reconciler.client(), &cancel).await;

            if let Some(audit) = &audit {
                audit
                    .log_apply(&desired.name, plan_id, result.as_ref())
                    .await;
            }

            let report = result?;
            println!(
                "✓ Applied {} change(s) to '{}'",
                report.applied_count(),
                report.policy_name
            );
            Ok(true)
        }
        Commands::List => {
            let store = open_store(cli.store, &config).await?;
            let policies = store.list_policies().await?;
            if policies.is_empty() {
                println!("No security groups in {}", store.dir().display());
            }
            for name in policies {
                println!("  {name}");
            }
            Ok(true)
        }
        Commands::Show { name, json } => {
            let store = open_store(cli.store, &config).await?;
            let policy = store.fetch(&name).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&policy)?);
            } else {
                print!("{}", render_policy(&policy));
            }
            Ok(true)
        }
        Commands::Diff { name, file } => {
            let desired = load_policy_file(&file).await?;
            let store = open_store(cli.store, &config).await?;
            let reconciler = Reconciler::new(store, config.plan_options());
            let observed = reconciler.observe(&name).await?;

            match diff_policies(&observed, &desired) {
                Some(text) => print!("{text}"),
                None => println!("No differences."),
            }
            Ok(true)
        }
        Commands::Evaluate {
            name,
            direction,
            protocol,
            source,
            source_port,
            destination,
            port,
        } => {
            let store = open_store(cli.store, &config).await?;
            let policy = store.fetch(&name).await?;
            let flow = Flow {
                direction,
                protocol,
                source,
                source_port,
                destination,
                destination_port: port,
            };

            let verdict = policy.evaluate(&flow, &config.default_policy());
            match verdict.rule {
                Some(rule) => println!("{} (rule '{rule}')", verdict.access),
                None => println!("{} (default {} policy)", verdict.access, direction),
            }
            Ok(true)
        }
        Commands::Config { init } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if init {
                save_config(&config).await?;
                if let Some(path) = config_path() {
                    println!("✓ Wrote {}", path.display());
                }
            }
            Ok(true)
        }
        Commands::History { count } => {
            let Some(audit) = &audit else {
                println!("Audit logging is disabled in the configuration.");
                return Ok(true);
            };
            let events = match audit.read_recent(count).await {
                Ok(events) => events,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
                Err(e) => return Err(e.into()),
            };
            if events.is_empty() {
                println!("No audit entries in {}", audit.path().display());
            }
            for event in events {
                let status = if event.success { "ok" } else { "FAILED" };
                println!(
                    "{}  {:<14} {:<24} {status}{}",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    serde_json::to_value(&event.event_type)?
                        .as_str()
                        .unwrap_or_default(),
                    event.policy,
                    event.error.map(|e| format!(": {e}")).unwrap_or_default()
                );
            }
            Ok(true)
        }
        Commands::Demo { in_memory } => {
            let cancel = cancel_on_ctrl_c();
            let transcript = if in_memory {
                run_demo(
                    &Reconciler::new(MemoryClient::new(), config.plan_options()),
                    &cancel,
                    None,
                )
                .await?
            } else {
                let store = open_store(cli.store, &config).await?;
                let reconciler = Reconciler::new(store, config.plan_options());
                run_demo(&reconciler, &cancel, audit.as_ref()).await?
            };
            print!("{transcript}");
            Ok(true)
        }
    }
}
