use std::env;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};

use legalease::{
    config::AppConfig,
    db::{self, PgPool},
    engine::{routing::check_timeouts, versions::verify_all_chains},
    jobs::requeue_stale_jobs,
};

const USAGE: &str = "Usage: maintenance <check-timeouts | verify-chains | requeue-stale-jobs [minutes]>";

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt().with_target(false).compact().init();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("check-timeouts") => run_timeout_sweep()?,
        Some("verify-chains") => verify_chains()?,
        Some("requeue-stale-jobs") => {
            let minutes = match args.next() {
                Some(raw) => raw
                    .parse::<i64>()
                    .with_context(|| format!("invalid minutes: {raw}"))?,
                None => 30,
            };
            requeue_stale(minutes)?
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn connect() -> Result<PgPool> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        "loaded configuration"
    );
    db::init_pool_with_size(&config.database_url, 1)
}

fn run_timeout_sweep() -> Result<()> {
    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let report = check_timeouts(&mut conn, Utc::now().naive_utc())?;
    println!(
        "escalated: {}, auto-approved: {}, overdue: {}, failed: {}",
        report.escalated, report.auto_approved, report.overdue, report.failed
    );
    Ok(())
}

fn verify_chains() -> Result<()> {
    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let broken = verify_all_chains(&mut conn)?;

    if broken.is_empty() {
        println!("All version chains are consistent.");
        return Ok(());
    }

    for (root_id, violations) in &broken {
        for violation in violations {
            println!("{root_id}: {violation}");
        }
    }
    eprintln!("{} version chain(s) need attention", broken.len());
    std::process::exit(2);
}

fn requeue_stale(minutes: i64) -> Result<()> {
    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let cutoff = Utc::now().naive_utc() - Duration::minutes(minutes.max(1));
    let count = requeue_stale_jobs(&mut conn, cutoff)?;
    println!("Requeued {count} stale job(s).");
    Ok(())
}
