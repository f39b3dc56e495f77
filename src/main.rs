use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

mod config;
mod dashboard;
mod db;
mod football_data;
mod live_scores;

use config::{Command, Config};
use dashboard::AppState;
use chrono::NaiveDate;
use db::models::{MatchSnapshot, MatchStatus};
use db::Database;
use football_data::{ApiError, FootballDataClient, MatchQuery};
use live_scores::{ChannelSubscriber, LogSubscriber, PollingScheduler};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    match config.command.clone() {
        Command::Monitor {
            duration_secs,
            dashboard,
        } => monitor(&config, duration_secs, dashboard).await,
        Command::Status => status(&config).await,
        Command::Export { output } => export(&config, &output).await,
        Command::Competitions { areas } => competitions(&config, areas.as_deref()).await,
        Command::Matches {
            competition,
            status,
            from,
            to,
        } => matches(&config, competition, status, from, to).await,
        Command::Live => live(&config).await,
        Command::Match { id } => match_detail(&config, id).await,
        Command::Team { id } => team(&config, id).await,
        Command::DetailedStats => detailed_stats(&config).await,
        Command::ValidateKey => validate_key(&config).await,
        Command::Events { limit } => events(&config, limit),
    }
}

fn open_database(config: &Config) -> Result<Database> {
    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);
    Ok(db)
}

fn build_client(config: &Config) -> Result<FootballDataClient> {
    FootballDataClient::new(config.client_config()?, config.limiter_config())
}

fn build_scheduler(config: &Config, db: &Database) -> Result<PollingScheduler> {
    let scheduler = PollingScheduler::new(build_client(config)?, Arc::new(db.clone()), config.cadence());
    for code in config.competition_codes() {
        scheduler.add_source(&code);
    }
    info!("Tracking competitions: {:?}", scheduler.sources());
    Ok(scheduler)
}

async fn monitor(config: &Config, duration_secs: Option<u64>, dashboard: bool) -> Result<()> {
    let db = open_database(config)?;
    let scheduler = build_scheduler(config, &db)?;
    scheduler.register_subscriber(Arc::new(LogSubscriber));

    // Per-kind tally, fed through the channel subscriber.
    let (channel, mut rx) = ChannelSubscriber::new(1024);
    scheduler.register_subscriber(channel);
    let tally: Arc<Mutex<BTreeMap<&'static str, u64>>> = Arc::default();
    let tally_task = {
        let tally = tally.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                *tally.lock().entry(event.kind.as_str()).or_insert(0) += 1;
            }
        })
    };

    if dashboard {
        let state = AppState {
            scheduler: scheduler.clone(),
            db: db.clone(),
            default_interval: config.poll_interval(),
        };
        let addr: SocketAddr = config
            .dashboard_addr
            .parse()
            .with_context(|| format!("Invalid dashboard address {}", config.dashboard_addr))?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Admin API listening on http://{}", addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, dashboard::router(state)).await {
                error!("Admin API server failed: {}", e);
            }
        });
    }

    scheduler.start(config.poll_interval());

    match duration_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => info!("Monitor duration elapsed"),
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("Interrupted");
        }
    }

    scheduler.stop().await;
    tally_task.abort();

    let stats = scheduler.get_statistics();
    if let Some(reason) = &stats.halted {
        warn!("Polling was halted: {}", reason);
    }
    println!("{}", serde_json::to_string_pretty(&stats)?);
    for (kind, count) in tally.lock().iter() {
        println!("{:>15}: {}", kind, count);
    }
    Ok(())
}

async fn status(config: &Config) -> Result<()> {
    let db = open_database(config)?;
    let scheduler = build_scheduler(config, &db)?;
    scheduler.sweep_once().await?;
    println!("{}", serde_json::to_string_pretty(&scheduler.get_statistics())?);
    Ok(())
}

async fn export(config: &Config, output: &Path) -> Result<()> {
    let db = open_database(config)?;
    let scheduler = build_scheduler(config, &db)?;
    scheduler.sweep_once().await?;
    let document = scheduler.export_snapshot(output)?;
    println!(
        "Exported {} matches ({} live) to {}",
        document.total_matches,
        document.live_matches.len(),
        output.display()
    );
    Ok(())
}

async fn detailed_stats(config: &Config) -> Result<()> {
    let db = open_database(config)?;
    let scheduler = build_scheduler(config, &db)?;
    scheduler.sweep_once().await?;
    for c in scheduler.competition_statuses() {
        println!("{}", c.competition);
        println!("  total:     {}", c.total_matches);
        println!("  live:      {}", c.live);
        println!("  scheduled: {}", c.scheduled);
        println!("  finished:  {}", c.finished);
    }
    Ok(())
}

async fn competitions(config: &Config, areas: Option<&str>) -> Result<()> {
    let client = build_client(config)?;
    let filters: Vec<(&str, &str)> = areas.map(|a| ("areas", a)).into_iter().collect();
    let competitions = client.competitions_filtered(&filters).await?;
    for c in &competitions {
        println!(
            "{:<6} {:<40} {}",
            c.code.as_deref().unwrap_or("-"),
            c.name,
            c.area.as_ref().map(|a| a.name.as_str()).unwrap_or("")
        );
    }
    println!("{} competitions available", competitions.len());
    Ok(())
}

async fn live(config: &Config) -> Result<()> {
    let client = build_client(config)?;
    let matches = client.live_matches().await?;
    for m in &matches {
        print_snapshot(m);
    }
    println!("{} live matches", matches.len());
    Ok(())
}

async fn matches(
    config: &Config,
    competition: Option<String>,
    status: Option<String>,
    date_from: Option<NaiveDate>,
    date_to: Option<NaiveDate>,
) -> Result<()> {
    let client = build_client(config)?;
    let query = MatchQuery {
        competition: competition.map(|c| c.trim().to_ascii_uppercase()),
        status: status.as_deref().map(MatchStatus::parse),
        date_from,
        date_to,
    };
    let matches = client.matches(&query).await?;
    for m in &matches {
        print_snapshot(m);
    }
    println!("{} matches", matches.len());
    Ok(())
}

async fn team(config: &Config, id: i64) -> Result<()> {
    let client = build_client(config)?;
    match client.team(id).await? {
        Some(t) => {
            println!("{} ({})", t.name, t.tla.as_deref().unwrap_or("-"));
            if let Some(area) = &t.area {
                println!("  area:    {}", area.name);
            }
            if let Some(venue) = &t.venue {
                println!("  venue:   {}", venue);
            }
            if let Some(founded) = t.founded {
                println!("  founded: {}", founded);
            }
            for c in &t.running_competitions {
                println!("  plays in {} {}", c.code.as_deref().unwrap_or("-"), c.name);
            }
        }
        None => println!("Team {} not found", id),
    }
    Ok(())
}

async fn match_detail(config: &Config, id: i64) -> Result<()> {
    let client = build_client(config)?;
    match client.match_detail(id).await? {
        Some(m) => print_snapshot(&m),
        None => match open_database(config)?.get_snapshot(id)? {
            Some(stored) => {
                println!("Match {} not in response, last stored state:", id);
                print_snapshot(&stored);
            }
            None => println!("Match {} not found", id),
        },
    }
    Ok(())
}

fn print_snapshot(m: &MatchSnapshot) {
    println!(
        "[{:<4}] #{:<8} {:<10} {} {}-{} {}{}",
        m.competition,
        m.match_id,
        m.status.as_str(),
        m.home_team,
        m.home_score,
        m.away_score,
        m.away_team,
        m.minute.map(|min| format!(" ({}')", min)).unwrap_or_default()
    );
}

async fn validate_key(config: &Config) -> Result<()> {
    let client = build_client(config)?;
    match client.competitions().await {
        Ok(list) => println!("API key accepted ({} competitions visible)", list.len()),
        Err(e @ (ApiError::Authentication { .. } | ApiError::Authorization { .. })) => {
            anyhow::bail!("API key rejected: {}", e)
        }
        Err(e) => warn!("Could not confirm API key: {}", e),
    }
    println!("{}", serde_json::to_string_pretty(&client.rate_limit_status())?);
    Ok(())
}

fn events(config: &Config, limit: i64) -> Result<()> {
    let db = open_database(config)?;
    for event in db.list_recent_events(limit.max(1))? {
        let s = &event.snapshot;
        println!(
            "{} {:<14} #{:<8} {} {}-{} {}",
            event.emitted_at.format("%Y-%m-%d %H:%M:%S"),
            event.kind.as_str(),
            event.match_id,
            s["home_team"].as_str().unwrap_or("?"),
            s["home_score"],
            s["away_score"],
            s["away_team"].as_str().unwrap_or("?"),
        );
    }
    println!("{} events stored", db.count_events()?);
    Ok(())
}
