//! CLI Module
//!
//! Command-line interface for wacrm using Clap v4.

mod ui;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::channels::{DryRunChannel, WhatsAppChannel};
use crate::config::{Config, DispatchConfig};
use crate::crm;
use crate::dispatch::{
    DispatchOrchestrator, MediaItem, MessagingChannel, PacingConfig, Recipient, RecipientPlan,
    VariationPool,
};
use crate::history::JsonlHistory;
use crate::logging;
use crate::utils::normalize_phone;

/// wacrm - paced WhatsApp campaigns and subscription reminders
#[derive(Parser, Debug)]
#[command(name = "wacrm")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug mode (writes log files)
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a campaign to a contact list
    Send {
        /// JSON contact list: [{"phone": "...", "name": "...", ...}]
        #[arg(long)]
        contacts: Option<PathBuf>,

        /// Extra recipient phone number (repeatable)
        #[arg(long = "to", value_name = "PHONE")]
        to: Vec<String>,

        /// Message text; repeat to send random variations
        #[arg(short, long = "message", value_name = "TEXT")]
        messages: Vec<String>,

        /// Read a message variation from a file (repeatable)
        #[arg(long = "message-file", value_name = "PATH")]
        message_files: Vec<PathBuf>,

        /// Attach media; repeat to pick one at random per recipient
        #[arg(long = "media", value_name = "PATH")]
        media: Vec<PathBuf>,

        #[command(flatten)]
        dispatch: DispatchArgs,
    },

    /// Remind clients whose subscription expires soon
    Remind {
        /// JSON client list: [{"name", "phone", "plan", "expires_on"}]
        #[arg(long)]
        clients: PathBuf,

        /// Remind clients expiring within this many days
        #[arg(long, default_value = "7")]
        within_days: i64,

        /// Also remind clients whose plan already expired
        #[arg(long)]
        include_overdue: bool,

        /// Reminder template; repeat for variations
        #[arg(short, long = "template", value_name = "TEXT")]
        templates: Vec<String>,

        /// Reference date (YYYY-MM-DD or DD/MM/YYYY, default: today)
        #[arg(long, value_parser = parse_date_arg)]
        today: Option<NaiveDate>,

        /// Only list the clients that are due, send nothing
        #[arg(long)]
        list: bool,

        #[command(flatten)]
        dispatch: DispatchArgs,
    },

    /// Show past dispatch runs
    History {
        /// Number of runs to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,

        /// Print full run summaries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Initialize configuration
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show configuration
    Config {
        /// Show full configuration including secrets
        #[arg(short, long)]
        show_secrets: bool,
    },

    /// Log management operations
    Logs {
        #[command(subcommand)]
        operation: LogCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum LogCommands {
    /// Show log file location and status
    Status,
    /// Clean up old log files
    Clean {
        /// Maximum age in days (default: 7)
        #[arg(short = 'a', long, default_value = "7")]
        days: u64,
    },
}

/// Pacing and channel options shared by `send` and `remind`
#[derive(Args, Debug, Clone, Default)]
pub struct DispatchArgs {
    /// Seconds between messages (overrides config)
    #[arg(long, value_name = "SECONDS")]
    pub delay: Option<u64>,

    /// Pause automatically every N messages, 0 disables (overrides config)
    #[arg(long, value_name = "N")]
    pub auto_pause_every: Option<u32>,

    /// Abort after N failures in a row (overrides config)
    #[arg(long, value_name = "N")]
    pub max_failures: Option<u32>,

    /// Log messages instead of sending them
    #[arg(long)]
    pub dry_run: bool,

    /// Simulated failure rate for --dry-run (0.0-1.0)
    #[arg(long, default_value = "0.0", requires = "dry_run")]
    pub dry_run_fail_rate: f64,

    /// Simulated send latency for --dry-run, in milliseconds
    #[arg(long, default_value = "0", requires = "dry_run")]
    pub dry_run_latency_ms: u64,

    /// Label stored with the run in history
    #[arg(long)]
    pub label: Option<String>,

    /// Seed for variation selection (reproducible runs)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Do not record this run in history
    #[arg(long)]
    pub no_history: bool,
}

impl DispatchArgs {
    pub fn pacing(&self, defaults: &DispatchConfig) -> PacingConfig {
        let mut pacing = defaults.pacing();
        if let Some(delay) = self.delay {
            pacing.delay_seconds = delay;
        }
        if let Some(every) = self.auto_pause_every {
            pacing = pacing.with_auto_pause(every);
        }
        pacing
    }

    pub fn max_consecutive_failures(&self, defaults: &DispatchConfig) -> Option<u32> {
        match self.max_failures {
            Some(0) => None,
            Some(limit) => Some(limit),
            None => defaults.max_consecutive_failures,
        }
    }
}

fn parse_date_arg(raw: &str) -> std::result::Result<NaiveDate, String> {
    crm::reminders::parse_date(raw).ok_or_else(|| format!("invalid date '{raw}'"))
}

/// Main CLI entry point
pub async fn run(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Send {
            contacts,
            to,
            messages,
            message_files,
            media,
            dispatch,
        } => {
            cmd_send(
                &config,
                SendInput {
                    contacts,
                    to,
                    messages,
                    message_files,
                    media,
                },
                dispatch,
            )
            .await
        }
        Commands::Remind {
            clients,
            within_days,
            include_overdue,
            templates,
            today,
            list,
            dispatch,
        } => {
            let window = crm::ReminderWindow {
                within_days,
                include_overdue,
            };
            let today = today.unwrap_or_else(|| chrono::Local::now().date_naive());
            cmd_remind(&config, clients, window, templates, today, list, dispatch).await
        }
        Commands::History { limit, json } => cmd_history(&config, limit, json).await,
        Commands::Init { force } => cmd_init(force).await,
        Commands::Config { show_secrets } => cmd_config(&config, show_secrets).await,
        Commands::Logs { operation } => cmd_logs(&config, operation).await,
    }
}

/// Load configuration from file or defaults
pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    let config = if let Some(path) = config_path {
        Config::load_from_path(path)?
    } else {
        Config::load()?
    };

    config.validate()?;

    Ok(config)
}

struct SendInput {
    contacts: Option<PathBuf>,
    to: Vec<String>,
    messages: Vec<String>,
    message_files: Vec<PathBuf>,
    media: Vec<PathBuf>,
}

async fn cmd_send(config: &Config, input: SendInput, args: DispatchArgs) -> Result<()> {
    let mut recipients = match &input.contacts {
        Some(path) => {
            let contacts = crm::load_contacts(path)
                .await
                .with_context(|| format!("Failed to load contacts from {:?}", path))?;
            crm::contacts_to_plan(&contacts).items().to_vec()
        }
        None => Vec::new(),
    };
    recipients.extend(direct_recipients(&input.to)?);
    if recipients.is_empty() {
        anyhow::bail!("No recipients: pass --contacts and/or --to");
    }

    let mut texts = input.messages;
    for path in &input.message_files {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read message file {:?}", path))?;
        texts.push(text.trim_end().to_string());
    }

    let mut media = Vec::with_capacity(input.media.len());
    for path in &input.media {
        media.push(
            MediaItem::from_path(path)
                .await
                .with_context(|| format!("Failed to read media file {:?}", path))?,
        );
    }

    let pool = build_pool(texts, media)?;
    execute(config, &args, RecipientPlan::new(recipients), pool, "send").await
}

/// Recipients given directly on the command line
fn direct_recipients(numbers: &[String]) -> Result<Vec<Recipient>> {
    numbers
        .iter()
        .map(|raw| {
            normalize_phone(raw)
                .map(|phone| Recipient::new(phone.clone()).with("phone", phone))
                .with_context(|| format!("Invalid phone number: {:?}", raw))
        })
        .collect()
}

/// Several texts switch variations on; media with no text sends bare media.
fn build_pool(mut texts: Vec<String>, media: Vec<MediaItem>) -> Result<VariationPool> {
    let use_media = !media.is_empty();
    if texts.is_empty() {
        if !use_media {
            anyhow::bail!("Nothing to send: pass --message, --message-file or --media");
        }
        texts.push(String::new());
    }

    let pool = VariationPool::builder()
        .use_variations(texts.len() > 1)
        .texts(texts)
        .use_media(use_media)
        .media_items(media)
        .build()?;
    Ok(pool)
}

async fn cmd_remind(
    config: &Config,
    clients_path: PathBuf,
    window: crm::ReminderWindow,
    templates: Vec<String>,
    today: NaiveDate,
    list: bool,
    args: DispatchArgs,
) -> Result<()> {
    let clients = crm::load_clients(&clients_path)
        .await
        .with_context(|| format!("Failed to load clients from {:?}", clients_path))?;

    if list {
        let due = crm::select_due(&clients, today, window);
        ui::print_due_clients(&due);
        return Ok(());
    }

    let plan = crm::reminder_plan(&clients, today, window);
    if plan.is_empty() {
        println!("No clients due for a reminder as of {}", today.format("%d/%m/%Y"));
        return Ok(());
    }

    let templates = if templates.is_empty() {
        vec![crm::DEFAULT_REMINDER_TEMPLATE.to_string()]
    } else {
        templates
    };
    let pool = build_pool(templates, Vec::new())?;
    execute(config, &args, plan, pool, "remind").await
}

fn build_channel(config: &Config, args: &DispatchArgs) -> Result<Arc<dyn MessagingChannel>> {
    if args.dry_run {
        let mut channel = DryRunChannel::new()
            .with_latency(Duration::from_millis(args.dry_run_latency_ms))
            .with_failure_rate(args.dry_run_fail_rate);
        if let Some(seed) = args.seed {
            channel = channel.with_seed(seed);
        }
        return Ok(Arc::new(channel));
    }
    Ok(Arc::new(WhatsAppChannel::from_config(&config.whatsapp)?))
}

async fn execute(
    config: &Config,
    args: &DispatchArgs,
    plan: RecipientPlan,
    pool: VariationPool,
    command: &str,
) -> Result<()> {
    let channel = build_channel(config, args)?;
    let pacing = args.pacing(&config.dispatch);

    let mut orchestrator = DispatchOrchestrator::new(plan, pool, pacing, channel)?
        .with_max_consecutive_failures(args.max_consecutive_failures(&config.dispatch))?
        .with_observer(ui::progress_observer())
        .with_notifier(ui::default_notifier())
        .with_metadata("command", serde_json::json!(command))
        .with_metadata("dry_run", serde_json::json!(args.dry_run));
    if let Some(label) = &args.label {
        orchestrator = orchestrator.with_label(label.clone());
    }
    if let Some(seed) = args.seed {
        orchestrator = orchestrator.with_rng(StdRng::seed_from_u64(seed));
    }
    if config.history.enabled && !args.no_history {
        orchestrator =
            orchestrator.with_history(Arc::new(JsonlHistory::new(config.history.path.clone())));
    }

    let summary = ui::run_interactive(orchestrator).await?;
    ui::print_summary(&summary);
    Ok(())
}

async fn cmd_history(config: &Config, limit: usize, json: bool) -> Result<()> {
    let history = JsonlHistory::new(config.history.path.clone());
    let runs = history
        .list_recent(limit)
        .await
        .with_context(|| format!("Failed to read history from {:?}", history.path()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }
    if runs.is_empty() {
        println!("No runs recorded yet ({})", history.path().display());
        return Ok(());
    }
    for run in &runs {
        println!("{}", ui::history_line(run));
    }
    Ok(())
}

/// Initialize configuration file
async fn cmd_init(force: bool) -> Result<()> {
    let config_path =
        Config::system_config_path().context("Could not determine config directory")?;

    if config_path.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at: {}\nUse --force to overwrite",
            config_path.display()
        );
    }

    Config::default().save(&config_path)?;

    println!("✅ Configuration initialized at: {}", config_path.display());
    println!("\n📝 Next steps:");
    println!("   1. Set whatsapp.base_url and whatsapp.instance for your gateway");
    println!("   2. Export WACRM_WHATSAPP_API_KEY (or add it to .env)");
    println!("   3. Try 'wacrm send --dry-run --to <phone> -m \"Hello\"'");

    Ok(())
}

/// Show configuration
async fn cmd_config(config: &Config, show_secrets: bool) -> Result<()> {
    if show_secrets {
        println!("{:#?}", config);
        return Ok(());
    }

    println!("Log level: {}", config.logging.level);
    let pacing = config.dispatch.pacing();
    println!("\nDispatch:");
    println!("  Delay: {}s", pacing.delay_seconds);
    match pacing.auto_pause_interval() {
        Some(every) => println!("  Auto-pause: every {} messages", every),
        None => println!("  Auto-pause: off"),
    }
    match config.dispatch.max_consecutive_failures {
        Some(limit) => println!("  Stop after {} failures in a row", limit),
        None => println!("  Failure limit: off"),
    }
    println!("\nWhatsApp gateway:");
    println!("  URL: {}", config.whatsapp.base_url);
    println!("  Instance: {}", config.whatsapp.instance);
    println!(
        "  API Key: {}",
        if config.whatsapp.api_key.is_some() {
            "[SET]"
        } else {
            "[NOT SET]"
        }
    );
    println!("\nHistory: {}", config.history.path.display());
    if !config.history.enabled {
        println!("  (disabled)");
    }

    println!("\n💡 Use --show-secrets to display the API key");
    Ok(())
}

/// Log management
async fn cmd_logs(config: &Config, operation: LogCommands) -> Result<()> {
    let log_dir = config
        .logging
        .dir
        .clone()
        .unwrap_or_else(logging::default_log_dir);

    match operation {
        LogCommands::Status => {
            println!("Log directory: {}", log_dir.display());
            let (count, size) = logging::log_stats(&log_dir);
            if count == 0 {
                println!("Status: no logs found");
                println!("\n💡 Run with -d to write debug logs");
                return Ok(());
            }
            println!("Log files: {}", count);
            println!("Total size: {:.2} MB", size as f64 / (1024.0 * 1024.0));
            if let Some(latest) = logging::latest_log_file(&log_dir) {
                println!("Latest log: {}", latest.display());
            }
            Ok(())
        }
        LogCommands::Clean { days } => {
            println!("🧹 Cleaning up log files older than {} days...", days);
            let removed = logging::cleanup_old_logs(&log_dir, days)?;
            if removed > 0 {
                println!("✅ Removed {} old log file(s)", removed);
            } else {
                println!("✅ No old log files to remove");
            }
            Ok(())
        }
    }
}
