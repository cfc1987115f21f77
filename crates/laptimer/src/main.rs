//! `laptimer` - CLI for the lap timer
//!
//! This binary runs the timing pipeline in the foreground and provides
//! commands to inspect and maintain lap records and the driver roster.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use laptimer::cli::{
    Cli, Command, ConfigCommand, ListenCommand, ResetCommand, RosterCommand, StandingsCommand,
};
use laptimer::config::ListenerConfig;
use laptimer::lap_clock::format_optional_lap;
use laptimer::{
    format_lap, init_logging, Config, DetectionToken, DriverRoster, Error, LapRecord, LapStore,
    OpenSource, PumpReport, Timekeeper,
};

/// Pause between attempts to reopen a lost source.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone()).context("failed to load configuration")?;

    match cli.command {
        Command::Listen(cmd) => handle_listen(&config, &cmd),
        Command::Standings(cmd) => handle_standings(&config, &cmd),
        Command::Reset(cmd) => handle_reset(&config, &cmd),
        Command::Roster(cmd) => handle_roster(&config, cmd),
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

fn handle_listen(config: &Config, cmd: &ListenCommand) -> anyhow::Result<()> {
    let mut config = config.clone();
    cmd.apply(&mut config.listener);
    config.validate()?;

    let roster = DriverRoster::load(config.roster_path())?;
    let mut keeper = Timekeeper::from_config(&config)?;
    keeper
        .listen(&config.listener)
        .with_context(|| format!("failed to start listening on {}", config.listener.address()))?;
    if !cmd.paused {
        keeper.start_race();
    }
    info!(
        store = %keeper.store().describe(),
        race = %keeper.race_state(),
        "Listening; press Ctrl-C to stop"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    let result = runtime.block_on(run_listen_loop(&mut keeper, &config.listener, &roster, cmd));

    let shutdown = keeper.shutdown();
    result?;
    shutdown?;
    Ok(())
}

async fn run_listen_loop(
    keeper: &mut Timekeeper,
    source: &ListenerConfig,
    roster: &DriverRoster,
    cmd: &ListenCommand,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(source.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut reconnect_at: Option<Instant> = None;

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("failed to listen for Ctrl-C")?;
                info!("Interrupted");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        if let Some(when) = reconnect_at {
            if Instant::now() >= when {
                match keeper.listen(source) {
                    Ok(_) => {
                        info!(address = %source.address(), "Reconnected");
                        reconnect_at = None;
                    }
                    Err(e) => {
                        warn!(error = %e, "Reconnect failed");
                        reconnect_at = Some(Instant::now() + RECONNECT_DELAY);
                    }
                }
            }
        }

        match keeper.pump() {
            Ok(report) => print_report(&report, roster, cmd.json)?,
            Err(e @ Error::ConnectionLost { .. }) => {
                if cmd.no_reconnect {
                    return Err(e.into());
                }
                warn!(error = %e, "Source lost; reconnecting");
                reconnect_at = Some(Instant::now() + RECONNECT_DELAY);
            }
            Err(e) if e.is_persistence_error() => {
                warn!(error = %e, "Lap records not saved; will retry");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn print_report(report: &PumpReport, roster: &DriverRoster, json: bool) -> anyhow::Result<()> {
    for recorded in &report.recorded {
        let record = &recorded.record;
        let driver = roster.display_name(&record.token);

        if json {
            let line = serde_json::json!({
                "token": record.token,
                "driver": driver,
                "first_pass": recorded.is_first_pass(),
                "lap_ms": recorded.outcome.duration.map(|d| d.num_milliseconds()),
                "best_ms": record.best_lap.map(|d| d.num_milliseconds()),
                "seen_at": record.last_seen_at.to_rfc3339(),
            });
            println!("{}", serde_json::to_string(&line)?);
        } else if let Some(duration) = recorded.outcome.duration {
            println!(
                "{:<12} {:<20} lap {}  best {}",
                record.token,
                driver,
                format_lap(duration),
                format_optional_lap(record.best_lap)
            );
        } else if recorded.is_first_pass() {
            println!("{:<12} {:<20} first pass", record.token, driver);
        }
    }
    Ok(())
}

fn handle_standings(config: &Config, cmd: &StandingsCommand) -> anyhow::Result<()> {
    let store = LapStore::open_from_config(config)?;
    let roster = DriverRoster::load(config.roster_path())?;
    let standings = laptimer::timekeeper::standings(store.snapshot());

    if cmd.json {
        let rows: Vec<_> = standings
            .iter()
            .enumerate()
            .map(|(index, record)| standing_json(index + 1, record, &roster))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if standings.is_empty() {
        println!("No lap records in {}", store.describe());
        return Ok(());
    }

    println!(
        "{:>3}  {:<12} {:<20} {:<6} {:<10} {:<10}",
        "Pos", "Tag", "Driver", "No.", "Last", "Best"
    );
    for (index, record) in standings.iter().enumerate() {
        let driver = roster.driver_or_default(&record.token);
        println!(
            "{:>3}  {:<12} {:<20} {:<6} {:<10} {:<10}",
            index + 1,
            record.token,
            driver.name,
            driver.number,
            format_optional_lap(record.last_lap),
            format_optional_lap(record.best_lap)
        );
    }
    Ok(())
}

fn standing_json(position: usize, record: &LapRecord, roster: &DriverRoster) -> serde_json::Value {
    serde_json::json!({
        "position": position,
        "token": record.token,
        "driver": roster.driver_or_default(&record.token),
        "last_lap_ms": record.last_lap.map(|d| d.num_milliseconds()),
        "best_lap_ms": record.best_lap.map(|d| d.num_milliseconds()),
        "last_seen_at": record.last_seen_at.to_rfc3339(),
    })
}

fn handle_reset(config: &Config, cmd: &ResetCommand) -> anyhow::Result<()> {
    let mut store = LapStore::open_from_config(config)?;

    if let Some(token) = &cmd.token {
        let token = DetectionToken::new(token)?;
        match store.remove(&token)? {
            Some(_) => println!("Removed lap record for {token}."),
            None => println!("No lap record for {token}."),
        }
        return Ok(());
    }

    if !cmd.yes {
        println!(
            "This will remove all {} lap records from {}.",
            store.len(),
            store.describe()
        );
        println!("Use --yes to confirm.");
        return Ok(());
    }

    let removed = store.clear()?;
    println!("Removed {removed} lap records.");
    Ok(())
}

fn handle_roster(config: &Config, cmd: RosterCommand) -> anyhow::Result<()> {
    let mut roster = DriverRoster::load(config.roster_path())?;

    match cmd {
        RosterCommand::List { json } => {
            if json {
                let entries: Vec<_> = roster
                    .iter()
                    .map(|(tag, driver)| serde_json::json!({ "tag": tag, "driver": driver }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if roster.is_empty() {
                println!("No drivers assigned ({}).", roster.path().display());
            } else {
                println!(
                    "{:<12} {:<20} {:<6} {:<10} {:<8}",
                    "Tag", "Driver", "No.", "Kart", "Class"
                );
                for (tag, driver) in roster.iter() {
                    println!(
                        "{:<12} {:<20} {:<6} {:<10} {:<8}",
                        tag, driver.name, driver.number, driver.kart, driver.kart_class
                    );
                }
            }
        }
        RosterCommand::Assign(args) => {
            let token = DetectionToken::new(&args.tag)?;
            let driver = args.driver();
            let name = driver.name.clone();
            roster.assign(token.clone(), driver);
            roster.save()?;
            println!("Assigned {token} to {name}.");
        }
        RosterCommand::Remove { tag } => {
            let token = DetectionToken::new(&tag)?;
            if roster.remove(&token).is_none() {
                bail!("tag {token} is not in the roster");
            }
            roster.save()?;
            println!("Removed {token} from the roster.");
        }
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                let listener = &config.listener;
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Listener]");
                println!("  Source:             {:?}", listener.source);
                println!("  Device:             {}", listener.device);
                println!("  Baud rate:          {}", listener.baud_rate);
                println!("  Poll interval (ms): {}", listener.poll_interval_ms);
                println!("  Read timeout (ms):  {}", listener.read_timeout_ms);
                println!("  Token mode:         {:?}", listener.token_mode);
                println!();
                println!("[Storage]");
                println!("  Backend:            {:?}", config.storage.backend);
                println!("  Path:               {}", config.store_path().display());
                println!();
                println!("[Session]");
                println!("  Lap policy:         {:?}", config.session.lap_policy);
                println!("  Dedup window (ms):  {}", config.session.dedup_window_ms);
                println!();
                println!("[Roster]");
                println!("  Path:               {}", config.roster_path().display());
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}
