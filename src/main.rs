//! # Diffuser: scheduled scent dispenser controller
//!
//! Usage:
//!   diffuser run                                  # Controller + schedule monitor
//!   diffuser activate --channel red               # Manual run until Ctrl-C
//!   diffuser check                                # Report conflicting rules
//!   diffuser check-overlap --start 9:00 --end 10:00 --recurrence daily
//!   diffuser next                                 # Active and upcoming rule
//!   diffuser test-pins --secs 2                   # Pulse every channel once
//!   diffuser init                                 # Write default config

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use diffuser_actuator::{Activation, CycleController, MockActuator, SysfsActuator};
use diffuser_core::config::DriverKind;
use diffuser_core::traits::{Actuator, RuleStore};
use diffuser_core::types::{Channel, MIN_CYCLE_TIME, MIN_PULSE_DURATION, RuleDraft, ScheduleRule, format_hhmm};
use diffuser_core::DiffuserConfig;
use diffuser_scheduler::monitor::select_target;
use diffuser_scheduler::{JsonRuleStore, ScheduleMonitor, find_conflicts, find_conflicts_for_draft, next_rule};

#[derive(Parser)]
#[command(name = "diffuser", version, about = "🌸 Diffuser: scheduled scent dispenser controller")]
struct Cli {
    /// Config file (default: ~/.diffuser/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller and the schedule monitor until Ctrl-C
    Run,
    /// Pulse one channel manually until Ctrl-C (or --for elapses)
    Activate {
        #[arg(long)]
        channel: Channel,
        /// Cycle time in seconds
        #[arg(long)]
        cycle: Option<u32>,
        /// Pulse duration in seconds
        #[arg(long)]
        pulse: Option<u32>,
        /// Stop after this many seconds
        #[arg(long = "for")]
        run_for: Option<u64>,
    },
    /// Report every conflicting pair in the rule file
    Check {
        /// Ignore the rule with this id
        #[arg(long)]
        exclude_id: Option<u64>,
    },
    /// Check an unsaved window against the rule file
    CheckOverlap {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long, default_value = "daily")]
        recurrence: String,
        /// Id of the rule being edited
        #[arg(long)]
        exclude_id: Option<u64>,
    },
    /// Show the rule active now and the next one to start
    Next,
    /// Drive every configured channel HIGH in turn
    TestPins {
        #[arg(long, default_value = "2")]
        secs: u64,
    },
    /// Write the default config file
    Init,
}

fn config_path(cli: &Cli) -> PathBuf {
    match &cli.config {
        Some(p) => PathBuf::from(shellexpand::tilde(p).to_string()),
        None => DiffuserConfig::default_path(),
    }
}

fn load_config(cli: &Cli) -> Result<DiffuserConfig> {
    let config = match &cli.config {
        Some(_) => DiffuserConfig::load_from(&config_path(cli))?,
        None => DiffuserConfig::load()?,
    };
    Ok(config)
}

fn build_actuator(config: &DiffuserConfig) -> Arc<dyn Actuator> {
    match config.actuator.driver {
        DriverKind::Mock => {
            tracing::warn!("⚠️ Using mock outputs, nothing will reach hardware");
            Arc::new(MockActuator::new())
        }
        DriverKind::Sysfs => {
            let root = shellexpand::tilde(&config.actuator.sysfs_root).to_string();
            Arc::new(SysfsActuator::new(std::path::Path::new(&root)))
        }
    }
}

fn load_rules(config: &DiffuserConfig) -> Result<Vec<ScheduleRule>> {
    let path = config.rules_path();
    JsonRuleStore::new(&path)
        .load_all()
        .with_context(|| format!("loading rules from {}", path.display()))
}

fn describe(rule: &ScheduleRule) -> String {
    format!(
        "#{} {} {} ({}, {}s/{}s){}",
        rule.id(),
        rule.window_label(),
        rule.channel(),
        rule.recurrence(),
        rule.pulse_duration(),
        rule.cycle_time(),
        if rule.enabled() { "" } else { " [disabled]" }
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "diffuser=debug" } else { "diffuser=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    if let Commands::Init = cli.command {
        let path = config_path(&cli);
        if path.exists() {
            bail!("{} already exists, not overwriting", path.display());
        }
        DiffuserConfig::default().save_to(&path)?;
        println!("✅ Wrote default config to {}", path.display());
        return Ok(());
    }

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Activate {
            channel,
            cycle,
            pulse,
            run_for,
        } => {
            let cycle = cycle.unwrap_or(config.controller.default_cycle_time);
            let pulse = pulse.unwrap_or(config.controller.default_pulse_duration);
            activate(config, channel, cycle, pulse, run_for.map(Duration::from_secs)).await
        }
        Commands::Check { exclude_id } => check(&config, exclude_id),
        Commands::CheckOverlap {
            start,
            end,
            recurrence,
            exclude_id,
        } => check_overlap(&config, start, end, recurrence, exclude_id),
        Commands::Next => next(&config),
        Commands::TestPins { secs } => test_pins(&config, Duration::from_secs(secs)).await,
        Commands::Init => Ok(()),
    }
}

async fn run(config: DiffuserConfig) -> Result<()> {
    let actuator = build_actuator(&config);
    let controller = Arc::new(CycleController::from_config(actuator, &config));

    println!("🌸 Diffuser v{}", env!("CARGO_PKG_VERSION"));
    println!("   🔌 Driver:   {:?}", config.actuator.driver);
    println!("   📂 Rules:    {}", config.rules_path().display());
    for (channel, pin) in &config.channels {
        println!("   💧 {channel:<7} → pin {pin}");
    }
    println!();

    let monitor = if config.monitor.enabled {
        let store: Arc<dyn RuleStore> = Arc::new(JsonRuleStore::new(&config.rules_path()));
        Some(ScheduleMonitor::new(store, controller.clone()).spawn())
    } else {
        tracing::info!("⏸️ Schedule monitor disabled in config");
        None
    };

    tokio::signal::ctrl_c().await?;
    println!("\n👋 Shutting down...");

    if let Some(monitor) = monitor {
        monitor.shutdown(Duration::from_secs(1)).await;
    }
    controller.cleanup().await?;
    Ok(())
}

async fn activate(
    config: DiffuserConfig,
    channel: Channel,
    cycle: u32,
    pulse: u32,
    run_for: Option<Duration>,
) -> Result<()> {
    if cycle < MIN_CYCLE_TIME {
        bail!("cycle time must be >= {MIN_CYCLE_TIME} seconds");
    }
    if pulse < MIN_PULSE_DURATION || pulse >= cycle {
        bail!("pulse duration must be >= {MIN_PULSE_DURATION}s and shorter than the cycle");
    }

    let controller = CycleController::from_config(build_actuator(&config), &config);
    controller.activate(Activation::manual(channel, cycle, pulse)).await?;
    println!("💨 {channel}: {pulse}s on every {cycle}s, Ctrl-C to stop");

    match run_for {
        Some(limit) => {
            tokio::select! {
                _ = tokio::time::sleep(limit) => {}
                r = tokio::signal::ctrl_c() => r?,
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }

    controller.cleanup().await?;
    println!("⏹️ Stopped");
    Ok(())
}

fn check(config: &DiffuserConfig, exclude_id: Option<u64>) -> Result<()> {
    let rules: Vec<ScheduleRule> = load_rules(config)?
        .into_iter()
        .filter(|r| Some(r.id()) != exclude_id)
        .collect();

    let mut conflicts = 0;
    for (i, rule) in rules.iter().enumerate() {
        if !rule.enabled() {
            continue;
        }
        for other in find_conflicts(rule, &rules[i + 1..], None) {
            println!("❌ {}  ⟷  {}", describe(rule), describe(&other));
            conflicts += 1;
        }
    }

    if conflicts == 0 {
        println!("✅ {} rules, no conflicts", rules.len());
        Ok(())
    } else {
        bail!("{conflicts} conflicting pair(s)")
    }
}

fn check_overlap(
    config: &DiffuserConfig,
    start: String,
    end: String,
    recurrence: String,
    exclude_id: Option<u64>,
) -> Result<()> {
    let rules = load_rules(config)?;
    // Channel does not take part in overlap.
    let draft = RuleDraft::new(&start, &end, Channel::Yellow.as_str(), &recurrence);
    let conflicts = find_conflicts_for_draft(&draft, &rules, exclude_id)?;

    if conflicts.is_empty() {
        println!("✅ {start}-{end} ({recurrence}) is free");
        return Ok(());
    }
    println!("❌ {start}-{end} ({recurrence}) overlaps with:");
    for rule in &conflicts {
        println!("   {}", describe(rule));
    }
    bail!("{} conflicting rule(s)", conflicts.len())
}

fn next(config: &DiffuserConfig) -> Result<()> {
    let rules = load_rules(config)?;
    let now = Local::now().naive_local();

    println!("🕐 Now: {}", format_hhmm(now.time()));
    match select_target(&rules, now) {
        Some(rule) => println!("▶️ Active:   {}", describe(rule)),
        None => println!("▶️ Active:   none"),
    }
    match next_rule(&rules, now) {
        Some((rule, at)) => println!("⏭️ Next:     {} at {}", describe(&rule), at.format("%a %H:%M")),
        None => println!("⏭️ Next:     none"),
    }
    Ok(())
}

async fn test_pins(config: &DiffuserConfig, secs: Duration) -> Result<()> {
    let actuator = build_actuator(config);
    println!("🔧 Testing {} channels ({})", config.channels.len(), actuator.name());

    for (channel, pin) in &config.channels {
        if let Err(e) = actuator.setup(*channel, *pin) {
            println!("   ❌ {channel} (pin {pin}): setup failed: {e}");
            continue;
        }
        let result = actuator.set_high(*channel);
        if result.is_ok() {
            tokio::time::sleep(secs).await;
        }
        let result = result.and_then(|_| actuator.set_low(*channel));
        match result {
            Ok(()) => println!("   ✅ {channel} (pin {pin})"),
            Err(e) => println!("   ❌ {channel} (pin {pin}): {e}"),
        }
    }

    actuator.cleanup()?;
    Ok(())
}
