use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use gatekeeper_config::{ConfigLoader, GatekeeperConfig, WarningSeverity};
use gatekeeper_core::{Actor, AutonomyTier, GateError, Role, SystemClock, Verdict};
use gatekeeper_engine::{Backends, Gatekeeper};
use gatekeeper_store::{DecisionLog, DecisionRecord, LogFilter, Page, Pagination};

/// Gatekeeper: autonomy, policy and rate-limit decisions for automated actions
#[derive(Parser)]
#[command(name = "gatekeeper", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to gatekeeper.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Listen address override (e.g. 0.0.0.0:3710)
        #[arg(long)]
        listen: Option<String>,
    },
    /// Evaluate a single action against the configured store and log it
    Evaluate {
        /// Action name (e.g. send_email)
        action: String,
        /// Acting user id
        #[arg(short, long)]
        user: String,
        /// Company (tenant) id
        #[arg(long)]
        company: String,
        /// Actor role
        #[arg(short, long, default_value = "agent")]
        role: String,
        /// Action parameters as a JSON object
        #[arg(short, long)]
        params: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recent decisions from the decision log
    Logs {
        /// Company (tenant) id
        #[arg(long)]
        company: String,
        /// Only decisions by this user
        #[arg(long)]
        actor: Option<String>,
        /// Only this action
        #[arg(short, long)]
        action: Option<String>,
        /// Only this verdict (EXECUTE, SUGGEST, LOG_ONLY, BLOCK)
        #[arg(short, long)]
        decision: Option<String>,
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "50")]
        limit: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show suggestions still awaiting human resolution
    Pending {
        /// Company (tenant) id
        #[arg(long)]
        company: String,
        /// Only suggestions for this user
        #[arg(long)]
        actor: Option<String>,
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "50")]
        limit: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the action catalog and each action's required autonomy
    Actions {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Validate instead of printing
        #[arg(long)]
        check: bool,
    },
}

impl Cli {
    pub async fn run(self) -> gatekeeper_core::Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // Resolve log level: --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level.as_deref().unwrap_or(&config.logging.level)
        };
        init_tracing(&config.logging.format, log_level);
        tracing::debug!(path = %config_loader.path().display(), "config loaded");

        match self.command {
            Commands::Serve { listen } => Self::cmd_serve(config, listen).await,
            Commands::Evaluate {
                action,
                user,
                company,
                role,
                params,
                json,
            } => Self::cmd_evaluate(config, action, user, company, role, params, json).await,
            Commands::Logs {
                company,
                actor,
                action,
                decision,
                limit,
                json,
            } => {
                let mut filter = LogFilter::for_company(company);
                filter.actor_id = actor;
                filter.action = action;
                filter.decision = decision.as_deref().map(parse_verdict).transpose()?;
                Self::cmd_logs(config, filter, limit, json).await
            }
            Commands::Pending {
                company,
                actor,
                limit,
                json,
            } => {
                let mut filter = LogFilter::for_company(company);
                filter.actor_id = actor;
                Self::cmd_pending(config, filter, limit, json).await
            }
            Commands::Actions { json } => Self::cmd_actions(config, json),
            Commands::Config { json, check } => {
                if check {
                    Self::cmd_config_check(&config, config_loader.path())
                } else {
                    Self::cmd_config(&config, json)
                }
            }
        }
    }

    async fn cmd_serve(mut config: GatekeeperConfig, listen: Option<String>) -> gatekeeper_core::Result<()> {
        if let Some(listen) = listen {
            config.server.listen = listen;
        }
        let gatekeeper = build_gatekeeper(&config)?;

        println!("Gatekeeper v{}", env!("CARGO_PKG_VERSION"));
        println!("   Storage: {:?}", config.storage.backend);
        println!("   Actions: {}", gatekeeper.catalog().len());
        println!("   Listening: http://{}", config.server.listen);
        if config.server.api_key.is_none() {
            println!("   API key: not set (identity headers are trusted as-is)");
            tracing::warn!("no API key configured, identity headers are trusted as-is");
        }
        println!();

        tracing::info!(
            listen = %config.server.listen,
            backend = ?config.storage.backend,
            actions = gatekeeper.catalog().len(),
            "starting gatekeeper server"
        );

        gatekeeper_server::start_server(config.server.clone(), gatekeeper).await
    }

    async fn cmd_evaluate(
        config: GatekeeperConfig,
        action: String,
        user: String,
        company: String,
        role: String,
        params: Option<String>,
        json: bool,
    ) -> gatekeeper_core::Result<()> {
        let role = Role::parse(&role).ok_or_else(|| GateError::invalid("role", format!("unknown role '{role}'")))?;
        let params = match params {
            Some(raw) => {
                let value: serde_json::Value = serde_json::from_str(&raw)
                    .map_err(|e| GateError::invalid("params", e.to_string()))?;
                if !value.is_object() {
                    return Err(GateError::invalid("params", "expected a JSON object"));
                }
                value
            }
            None => serde_json::json!({}),
        };

        let gatekeeper = build_gatekeeper(&config)?;
        let actor = Actor::new(user, company, role);
        let decision = gatekeeper.evaluate(&actor, &action, &params).await;

        if json {
            println!("{}", serde_json::to_string_pretty(&decision)?);
            return Ok(());
        }

        println!(
            "{}{}\x1b[0m  {}  ({})",
            verdict_color(decision.decision),
            decision.decision,
            decision.action,
            decision.reason
        );
        println!("   {}", decision.detail);
        if !decision.channels.is_empty() {
            let channels: Vec<&str> = decision.channels.iter().map(|c| c.as_str()).collect();
            println!("   channels: {}", channels.join(", "));
        }
        println!("   id: {}", decision.id);
        Ok(())
    }

    async fn cmd_logs(
        config: GatekeeperConfig,
        filter: LogFilter,
        limit: u32,
        json: bool,
    ) -> gatekeeper_core::Result<()> {
        let gatekeeper = build_gatekeeper(&config)?;
        let page = gatekeeper
            .log()
            .query(&filter, Pagination::new(Some(limit), None)?)
            .await?;
        print_page("Decision Log", &page, json)
    }

    async fn cmd_pending(
        config: GatekeeperConfig,
        filter: LogFilter,
        limit: u32,
        json: bool,
    ) -> gatekeeper_core::Result<()> {
        let gatekeeper = build_gatekeeper(&config)?;
        let page = gatekeeper
            .pending_actions(&filter, Pagination::new(Some(limit), None)?)
            .await?;
        print_page("Pending Actions", &page, json)
    }

    fn cmd_actions(config: GatekeeperConfig, json: bool) -> gatekeeper_core::Result<()> {
        let catalog = config.catalog();
        if json {
            let actions: Vec<_> = catalog.iter().collect();
            println!("{}", serde_json::to_string_pretty(&actions)?);
            return Ok(());
        }
        println!("\x1b[1mAction Catalog\x1b[0m ({} actions)", catalog.len());
        println!("{}", "-".repeat(60));
        for spec in catalog.iter() {
            let automation = if spec.automation { "  [automation]" } else { "" };
            println!("  {:<28} {}{}", spec.name, spec.required, automation);
        }
        println!();
        for tier in AutonomyTier::ALL {
            println!("  {:<14} {}", tier.as_str(), tier.description());
        }
        Ok(())
    }

    fn cmd_config(config: &GatekeeperConfig, json: bool) -> gatekeeper_core::Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(config).map_err(|e| GateError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    fn cmd_config_check(config: &GatekeeperConfig, path: &std::path::Path) -> gatekeeper_core::Result<()> {
        println!("Checking {}", path.display());
        println!();

        // load() already rejected errors, so only warnings and hints remain
        let warnings = config.validate().map_err(GateError::Config)?;
        let mut warn_count = 0;
        let mut info_count = 0;
        for w in &warnings {
            println!("  {}", w);
            match w.severity {
                WarningSeverity::Warning => warn_count += 1,
                WarningSeverity::Info => info_count += 1,
                WarningSeverity::Error => {}
            }
        }
        if !warnings.is_empty() {
            println!();
        }
        println!("  {} warnings, {} suggestions", warn_count, info_count);
        Ok(())
    }
}

fn init_tracing(format: &str, level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

fn build_gatekeeper(config: &GatekeeperConfig) -> gatekeeper_core::Result<Gatekeeper> {
    let backends = Backends::from_config(config)?;
    Ok(Gatekeeper::from_config(config, backends, Arc::new(SystemClock)))
}

fn parse_verdict(raw: &str) -> gatekeeper_core::Result<Verdict> {
    Verdict::parse(raw).ok_or_else(|| GateError::invalid("decision", format!("unknown decision '{raw}'")))
}

fn verdict_color(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Execute => "\x1b[32m", // green
        Verdict::Suggest => "\x1b[33m", // yellow
        Verdict::LogOnly => "\x1b[36m", // cyan
        Verdict::Block => "\x1b[31m",   // red
    }
}

fn print_page(title: &str, page: &Page<DecisionRecord>, json: bool) -> gatekeeper_core::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(page)?);
        return Ok(());
    }
    if page.items.is_empty() {
        println!("No entries.");
        return Ok(());
    }

    println!(
        "\x1b[1m{}\x1b[0m ({} of {})",
        title,
        page.items.len(),
        page.total
    );
    println!("{}", "-".repeat(80));
    for record in &page.items {
        println!(
            "\x1b[90m{}\x1b[0m  {}{:<8}\x1b[0m  {:<24} {}",
            record.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            verdict_color(record.decision),
            record.decision.as_str(),
            record.action,
            record.actor_id
        );
        println!("   \x1b[90m{} · {}\x1b[0m", record.reason, record.id);
    }
    Ok(())
}
