//! Headless driver for the flip grid.
//!
//! Renders into memory, walks the given images like a "next image" button
//! would, and optionally writes the last frame as PNG.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use crossbeam_channel::Receiver;
use flip_grid::{Configuration, JobOutcome, Session, SessionEvent, SnapshotSink};
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "flip-grid", about = "Flip-grid tile animation, rendered headless")]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Image to flip in next (repeatable)
    #[arg(short, long, value_name = "PATH")]
    image: Vec<PathBuf>,

    /// Write the last presented frame to this PNG
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Give up waiting for a step after this many seconds
    #[arg(long = "timeout", value_name = "SECS", default_value_t = 30)]
    timeout_secs: u64,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    // map -v to log level
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env().add_directive(format!("flip_grid={level}").parse()?);
    fmt().with_env_filter(filter).with_target(true).init();
    Ok(())
}

/// Block until `matches` accepts an event, returning it.
fn wait_for(
    events: &Receiver<SessionEvent>,
    timeout: Duration,
    what: &str,
    matches: impl Fn(&SessionEvent) -> bool,
) -> Result<SessionEvent> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = events
            .recv_timeout(remaining)
            .with_context(|| format!("timed out waiting for {what}"))?;
        if matches(&event) {
            return Ok(event);
        }
    }
}

fn wait_for_preparation(
    events: &Receiver<SessionEvent>,
    timeout: Duration,
    job: flip_grid::JobId,
) -> Result<()> {
    let event = wait_for(events, timeout, "preparation", |e| {
        matches!(e, SessionEvent::PreparationFinished { job: j, .. } if *j == job)
    })?;
    match event {
        SessionEvent::PreparationFinished {
            outcome: JobOutcome::Failed(reason),
            ..
        } => bail!("preparation {job} failed: {reason}"),
        other => {
            info!(?other, "preparation finished");
            Ok(())
        }
    }
}

fn wait_for_cycle(events: &Receiver<SessionEvent>, timeout: Duration) -> Result<()> {
    wait_for(events, timeout, "flip cycle", |e| {
        *e == SessionEvent::FlipCycleCompleted
    })?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    let timeout = Duration::from_secs(cli.timeout_secs);

    let cfg = match &cli.config {
        Some(path) => Configuration::from_yaml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Configuration::default(),
    };
    let width = cfg.grid().resolved_width();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let (session, events) =
        Session::new(cfg, runtime.handle().clone()).context("validating configuration")?;

    let sink = SnapshotSink::new(width, width);
    let job = session.attach(sink.clone())?;
    wait_for_preparation(&events, timeout, job)?;

    session.flip_all();
    wait_for_cycle(&events, timeout)?;

    for path in &cli.image {
        let face = session.set_next_image(path.clone());
        let job = session.current_job();
        info!(image = %path.display(), ?face, "next image");
        wait_for_preparation(&events, timeout, job)?;
        wait_for_cycle(&events, timeout)?;
    }

    if !cli.image.is_empty() {
        session.clear();
        let job = session.current_job();
        wait_for_preparation(&events, timeout, job)?;
        wait_for_cycle(&events, timeout)?;
    }

    session.detach();
    let stats = session.cache_stats();
    info!(
        frames = sink.frames_presented(),
        hits = stats.hits,
        misses = stats.misses,
        "done"
    );

    if let Some(output) = &cli.output {
        match sink.latest() {
            Some(frame) => frame
                .save(output)
                .with_context(|| format!("writing {}", output.display()))?,
            None => warn!("no frame was presented"),
        }
    }
    Ok(())
}
