//! `activity-inspect` - filter a saved activity log from the command line.
//!
//! ```text
//! activity-inspect --file activitylogs.json [--query "<url query>"] [--config manifest.toml]
//! ```
//!
//! The query uses the same parameters as the log viewer page URL, so a view
//! can be reproduced by pasting its query string. Matching records are printed
//! as JSON lines followed by a `visible/total` summary.

use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ext_activity_log::{persistence, ActivityLogConfig, LogViewer, QueryParams};

#[derive(Debug, PartialEq, Eq)]
struct Args {
    file: PathBuf,
    query: String,
    config: Option<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let mut file = None;
    let mut query = String::new();
    let mut config = None;
    while let Some(a) = args.next() {
        match a.as_str() {
            "--file" => {
                file = Some(PathBuf::from(
                    args.next().context("--file requires a path")?,
                ));
            }
            "--query" => {
                query = args.next().context("--query requires a value")?;
            }
            "--config" => {
                config = Some(PathBuf::from(
                    args.next().context("--config requires a path")?,
                ));
            }
            other => tracing::warn!(arg = other, "Ignoring unknown argument"),
        }
    }
    let Some(file) = file else {
        bail!("usage: activity-inspect --file <path> [--query <query>] [--config <path>]");
    };
    Ok(Args {
        file,
        query,
        config,
    })
}

fn load_config(path: Option<&Path>) -> Result<ActivityLogConfig> {
    match path {
        Some(path) => ActivityLogConfig::load(path)
            .with_context(|| format!("reading config at {}", path.display())),
        None => Ok(ActivityLogConfig::default()),
    }
}

/// Import `args.file` into a viewer with the requested filter applied.
fn inspect(args: &Args) -> Result<LogViewer> {
    let config = load_config(args.config.as_deref())?;
    let text = std::fs::read_to_string(&args.file)
        .with_context(|| format!("reading log file at {}", args.file.display()))?;
    let logs = persistence::import_file(&text)
        .with_context(|| format!("parsing log file at {}", args.file.display()))?;

    let mut viewer = LogViewer::new(config.viewer_address, &QueryParams::parse(&args.query));
    viewer.replace_rows(logs);
    Ok(viewer)
}

fn write_report(viewer: &LogViewer, out: &mut impl Write) -> Result<()> {
    for record in viewer.visible_records() {
        serde_json::to_writer(&mut *out, record)?;
        writeln!(out)?;
    }
    writeln!(out, "{}", viewer.counter_text())?;
    Ok(())
}

fn main() -> Result<()> {
    use tracing_subscriber::EnvFilter;
    let filter =
        EnvFilter::try_from_env("ACTIVITY_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    let args = parse_args(env::args().skip(1))?;
    let viewer = inspect(&args)?;

    let (visible, total) = viewer.counter();
    tracing::info!(file = %args.file.display(), visible, total, "Inspected activity log");

    let stdout = io::stdout();
    write_report(&viewer, &mut stdout.lock())
}
