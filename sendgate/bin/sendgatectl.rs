//! Command-line utility for exercising the sendgate engine
//!
//! Every command runs against an in-memory store seeded with the identities
//! from the configuration file:
//! - Quota checks and identity selection
//! - Simulated sending runs
//! - Retry schedule previews
//! - Tenant statistics

use std::path::PathBuf;

use chrono::{TimeDelta, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use sendgate::{Sendgate, Settings, find_config_file};
use sendgate_common::{Domain, IdentityId, Priority, TenantId, internal, logging};
use sendgate_quota::{DistributionStrategy, RetryScheduler, SendRequest, StrategyKind, TimeRange};
use serde::Serialize;

/// Command-line utility for the sendgate quota engine
#[derive(Parser, Debug)]
#[command(name = "sendgatectl")]
#[command(about = "Inspect sending quotas and identity distribution", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Text,
    Ron,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the current quota of an identity towards a domain
    Check {
        #[arg(long)]
        identity: String,
        /// Recipient domain, or an address to take it from
        #[arg(long)]
        domain: String,
        #[arg(long, default_value = "normal")]
        priority: Priority,
    },
    /// Select an identity for a tenant's message
    Select {
        #[arg(long)]
        tenant: String,
        /// Recipient domain, or an address to take it from
        #[arg(long)]
        domain: String,
        /// Overrides the strategy kind from the configuration file
        #[arg(long)]
        strategy: Option<StrategyKind>,
        #[arg(long, default_value = "normal")]
        priority: Priority,
    },
    /// Repeatedly select and record sends, then print statistics
    Simulate {
        #[arg(long)]
        tenant: String,
        /// Recipient domain, or an address to take it from
        #[arg(long)]
        domain: String,
        #[arg(long, default_value_t = 10)]
        count: u32,
        #[arg(long)]
        strategy: Option<StrategyKind>,
        /// Seconds between messages
        #[arg(long, default_value_t = 60)]
        interval: u32,
    },
    /// Preview the retry schedule of the default policy
    RetryPlan {
        /// Check whether this error would be retried at all
        #[arg(long)]
        error: Option<String>,
    },
    /// Show send statistics for a tenant
    Stats {
        #[arg(long)]
        tenant: String,
        /// Look-back window in hours
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let config_path = find_config_file(cli.config.as_deref())?;
    let settings = Settings::load(&config_path)?;
    internal!(level = INFO, "Loaded configuration from {}", config_path.display());

    sendgate_metrics::init_metrics(&settings.metrics)?;

    let sendgate = Sendgate::new(settings, Utc::now());

    match cli.command {
        Commands::Check {
            identity,
            domain,
            priority,
        } => {
            let quota = sendgate
                .engine()
                .check_quota(&IdentityId::new(identity), &recipient_domain(&domain), priority)
                .await;

            match cli.format {
                Format::Ron => print_ron(&quota)?,
                Format::Text => {
                    println!("available:        {}", quota.is_available);
                    println!("daily remaining:  {}", quota.daily_remaining);
                    println!("hourly remaining: {}", quota.hourly_remaining);
                    println!("domain remaining: {}", quota.domain_remaining);
                    println!("burst available:  {}", quota.burst_available);
                    if let Some(until) = quota.cooldown_until {
                        println!("cooldown until:   {until}");
                    }
                    println!("next slot:        {}", quota.next_available_slot);
                }
            }
        }
        Commands::Select {
            tenant,
            domain,
            strategy,
            priority,
        } => {
            let strategy = strategy_for(&sendgate, strategy);
            let selection = sendgate
                .engine()
                .select_identity(
                    &TenantId::new(tenant),
                    &recipient_domain(&domain),
                    &strategy,
                    priority,
                )
                .await;

            match (cli.format, selection) {
                (_, None) => anyhow::bail!("Tenant has no sending identities"),
                (Format::Ron, Some(selection)) => print_ron(&selection)?,
                (Format::Text, Some(selection)) => match selection.scheduled_for {
                    Some(at) => println!("{} (deferred until {at})", selection.identity),
                    None => println!("{}", selection.identity),
                },
            }
        }
        Commands::Simulate {
            tenant,
            domain,
            count,
            strategy,
            interval,
        } => {
            let strategy = strategy_for(&sendgate, strategy);
            let tenant = TenantId::new(tenant);
            let start = sendgate.now();
            let steps = sendgate
                .simulate(
                    &tenant,
                    &recipient_domain(&domain),
                    &strategy,
                    count,
                    TimeDelta::seconds(i64::from(interval)),
                )
                .await;

            let range = TimeRange::new(start, sendgate.now() + TimeDelta::seconds(1));
            let stats = sendgate.engine().get_stats(&tenant, range).await;

            match cli.format {
                Format::Ron => {
                    print_ron(&steps)?;
                    print_ron(&stats)?;
                }
                Format::Text => {
                    for step in &steps {
                        let note = if step.deferred_until.is_some() {
                            " (deferred)"
                        } else {
                            ""
                        };
                        println!("{:>4}  {}  {}{note}", step.index, step.at, step.identity);
                    }
                    println!();
                    for identity in &stats.identities {
                        println!(
                            "{:<20} {:>5} sent  {:>6.1}% of capacity",
                            identity.identity, identity.attempts, identity.usage_percent
                        );
                    }
                }
            }
        }
        Commands::RetryPlan { error } => {
            let policy = &sendgate.engine().config().retry;

            if let Some(error) = error {
                let mut request =
                    SendRequest::new(Domain::new("example.com"), Priority::Normal, sendgate.now());
                let decision = sendgate
                    .engine()
                    .schedule_retry(&mut request, &error, Some(policy));
                match decision.reason {
                    Some(reason) => println!("{error}: not retried ({})", reason.as_str()),
                    None => println!("{error}: retried"),
                }
            }

            let plan = RetryScheduler::plan(policy);
            match cli.format {
                Format::Ron => print_ron(&plan)?,
                Format::Text => {
                    for (attempt, delay) in plan.iter().enumerate() {
                        println!("retry {:>2}: after {:?}", attempt + 1, delay);
                    }
                    if policy.jitter {
                        println!("(each delay is scaled by a random factor in [0.5, 1.0])");
                    }
                }
            }
        }
        Commands::Stats { tenant, hours } => {
            let range = TimeRange::last(TimeDelta::hours(i64::from(hours)), sendgate.now());
            let stats = sendgate.engine().get_stats(&TenantId::new(tenant), range).await;

            match cli.format {
                Format::Ron => print_ron(&stats)?,
                Format::Text => {
                    for identity in &stats.identities {
                        println!(
                            "{:<20} {:>5} attempts  {:>5.1}% success  {:>3} domains",
                            identity.identity,
                            identity.attempts,
                            identity.success_rate * 100.0,
                            identity.domains
                        );
                    }
                    println!("total: {} attempts", stats.total_attempts);
                }
            }
        }
    }

    Ok(())
}

fn strategy_for(sendgate: &Sendgate, kind: Option<StrategyKind>) -> DistributionStrategy {
    let mut strategy = sendgate.default_strategy().clone();
    if let Some(kind) = kind {
        strategy.kind = kind;
    }
    strategy
}

fn recipient_domain(arg: &str) -> Domain {
    Domain::from_address(arg).unwrap_or_else(|| Domain::new(arg))
}

fn print_ron<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!(
        "{}",
        ron::ser::to_string_pretty(value, ron::ser::PrettyConfig::default())?
    );
    Ok(())
}
