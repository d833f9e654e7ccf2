use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate::config::TollgateConfig;
use tollgate::ratelimit::{Outcome, RateLimiter, RequestContext};

#[derive(Parser, Debug)]
#[command(name = "tollgate", version, about = "Per-category rate limiting with progressive backoff")]
struct Cli {
    /// YAML configuration file; TOLLGATE_* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the configuration, then print the effective limits
    Validate,
    /// Run a burst of requests through the limiter and print each decision
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Category to evaluate against
    #[arg(long)]
    category: String,

    /// Caller network address
    #[arg(long, default_value = "127.0.0.1")]
    ip: String,

    /// Authenticated principal id
    #[arg(long)]
    user: Option<String>,

    /// Treat the caller as privileged
    #[arg(long)]
    privileged: bool,

    /// Number of requests to send
    #[arg(long, default_value_t = 1)]
    requests: u32,

    /// Outcome reported for categories that count by outcome
    #[arg(long, value_enum, default_value_t = SimOutcome::Failure)]
    outcome: SimOutcome,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum SimOutcome {
    Success,
    Failure,
}

impl From<SimOutcome> for Outcome {
    fn from(outcome: SimOutcome) -> Self {
        match outcome {
            SimOutcome::Success => Outcome::Success,
            SimOutcome::Failure => Outcome::Failure,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = TollgateConfig::load(cli.config.as_deref())?;
    let limiter = Arc::new(RateLimiter::from_config(&config)?);
    info!(
        categories = limiter.registry().len(),
        exemptions = limiter.exemptions().is_enabled(),
        progressive = limiter.progressive().is_enabled(),
        "Rate limiter initialized"
    );

    match cli.command {
        Command::Validate => print_limits(&limiter, &config),
        Command::Simulate(args) => {
            let maintenance = limiter.spawn_maintenance(config.maintenance.sweep_interval());
            let result = simulate(&limiter, &args);
            maintenance.shutdown().await;
            result?;
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn print_limits(limiter: &RateLimiter, config: &TollgateConfig) {
    println!(
        "{:<20} {:>8} {:>10} {:>8} {:>8} {:>7}",
        "CATEGORY", "CEILING", "WINDOW(s)", "SUCCESS", "FAILED", "EXEMPT"
    );
    let exempt: Vec<&str> = limiter.exemptions().exempt_categories().collect();
    for category in limiter.registry().iter() {
        println!(
            "{:<20} {:>8} {:>10} {:>8} {:>8} {:>7}",
            category.name(),
            category.ceiling(),
            category.window().as_secs(),
            category.counts_successful(),
            category.counts_failed(),
            limiter.exemptions().is_enabled() && exempt.contains(&category.name()),
        );
    }

    println!();
    println!("progressive limiting: {}", config.progressive.enabled);
    println!("violation ttl: {}s", config.progressive.violation_ttl_secs);
    for threshold in &config.progressive.thresholds {
        println!(
            "  >= {:>3} violations -> x{}",
            threshold.violations, threshold.multiplier
        );
    }
    println!(
        "maintenance interval: {}s",
        config.maintenance.sweep_interval_secs
    );
}

fn simulate(limiter: &RateLimiter, args: &SimulateArgs) -> anyhow::Result<()> {
    let mut ctx = RequestContext::from_address(args.ip.as_str()).privileged(args.privileged);
    if let Some(user) = &args.user {
        ctx = ctx.with_principal(user.as_str());
    }

    for _ in 0..args.requests {
        let mut decision = limiter.evaluate(&args.category, &ctx)?;
        if let Some(ticket) = decision.take_ticket() {
            limiter.commit(ticket, args.outcome.into())?;
        }
        println!("{}", serde_json::to_string(&decision.summary())?);
    }

    Ok(())
}
