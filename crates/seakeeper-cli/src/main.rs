//! Command-line tool for a Seakeeper gyro stabilizer.

use std::time::Duration;

use anyhow::{Result, bail};
use chrono::Utc;
use clap::Parser;
use seakeeper::{ReadContext, Seakeeper, SeakeeperConfig};

/// Watch a Seakeeper and optionally switch power or stabilization.
#[derive(Parser, Debug)]
#[command(name = "seakeeper")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host of the seakeeper.
    #[arg(long, env = "SEAKEEPER_HOST")]
    host: String,

    /// Switch flywheel power.
    #[arg(long)]
    power: bool,

    /// Switch roll stabilization.
    #[arg(long)]
    enable: bool,

    #[arg(long)]
    on: bool,

    #[arg(long)]
    off: bool,

    /// Number of status reads.
    #[arg(short = 'n', default_value_t = 1)]
    times: u32,

    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Requested direction, if a command was asked for.
    fn direction(&self) -> Result<Option<bool>> {
        if !self.power && !self.enable {
            return Ok(None);
        }
        match (self.on, self.off) {
            (true, true) => bail!("cannot turn on and off"),
            (false, false) => bail!("need to specify on or off"),
            (on, _) => Ok(Some(on)),
        }
    }
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var("SEAKEEPER_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "seakeeper=debug" } else { "seakeeper=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .compact()
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let direction = args.direction()?;
    init_logging(args.verbose);

    let session = Seakeeper::new(seakeeper::DEFAULT_NAME, SeakeeperConfig::new(&args.host))?;
    session.start().await?;

    let result = run(&session, &args, direction).await;
    session.close().await?;
    result
}

/// `-n` plus one per issued command.
fn poll_count(args: &Args, direction: Option<bool>) -> u32 {
    let commands = u32::from(direction.is_some() && args.power)
        + u32::from(direction.is_some() && args.enable);
    args.times.saturating_add(commands)
}

async fn run(session: &Seakeeper, args: &Args, direction: Option<bool>) -> Result<()> {
    tokio::time::sleep(Duration::from_secs(1)).await;
    if session.readings(ReadContext::default()).is_err() {
        bail!("no status");
    }
    println!("{:#?}", session.last_status());

    let times = poll_count(args, direction);
    if let Some(on) = direction {
        if args.power {
            session.set_power(on).await?;
        }
        if args.enable {
            session.set_stabilize(on).await?;
        }
    }

    for _ in 1..times {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let age = session
            .last_status_time()
            .and_then(|t| (Utc::now() - t).to_std().ok())
            .unwrap_or_default();
        println!("{:.1?} \t {:?}", age, session.last_status());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_status_only() {
        let args = parse(&["seakeeper", "--host", "10.1.10.42", "-n", "5"]);
        assert_eq!(args.host, "10.1.10.42");
        assert_eq!(args.times, 5);
        assert_eq!(args.direction().unwrap(), None);
    }

    #[test]
    fn test_direction() {
        let args = parse(&["seakeeper", "--host", "h", "--power", "--on"]);
        assert_eq!(args.direction().unwrap(), Some(true));

        let args = parse(&["seakeeper", "--host", "h", "--enable", "--off"]);
        assert_eq!(args.direction().unwrap(), Some(false));
    }

    #[test]
    fn test_direction_errors() {
        let args = parse(&["seakeeper", "--host", "h", "--power", "--on", "--off"]);
        assert_eq!(
            args.direction().unwrap_err().to_string(),
            "cannot turn on and off"
        );

        let args = parse(&["seakeeper", "--host", "h", "--enable"]);
        assert_eq!(
            args.direction().unwrap_err().to_string(),
            "need to specify on or off"
        );
    }

    #[test]
    fn test_poll_count() {
        let args = parse(&["seakeeper", "--host", "h", "-n", "3", "--power", "--enable", "--on"]);
        assert_eq!(poll_count(&args, args.direction().unwrap()), 5);

        let args = parse(&["seakeeper", "--host", "h", "-n", "4294967295", "--power", "--on"]);
        assert_eq!(poll_count(&args, args.direction().unwrap()), u32::MAX);
    }

    #[test]
    fn test_on_without_command_is_ignored() {
        let args = parse(&["seakeeper", "--host", "h", "--on", "--off"]);
        assert_eq!(args.direction().unwrap(), None);
    }
}
