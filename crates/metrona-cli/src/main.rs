//! metrona: headless clock runner
//!
//! Usage: `metrona [SESSION.toml] [SECONDS]`

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam_channel::RecvTimeoutError;
use metrona_core::{PPQN, Transport, TransportEvent};
use metrona_services::{ClockEngine, LogVoice, SessionConfig, default_session_path, load_session};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_SECONDS: f64 = 4.0;

struct Args {
    session: Option<PathBuf>,
    seconds: f64,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        session: None,
        seconds: DEFAULT_SECONDS,
    };
    for arg in std::env::args().skip(1) {
        match arg.parse::<f64>() {
            Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => args.seconds = seconds,
            _ if args.session.is_none() => args.session = Some(PathBuf::from(arg)),
            _ => anyhow::bail!("Unexpected argument {arg:?}"),
        }
    }
    Ok(args)
}

fn load(args: &Args) -> anyhow::Result<SessionConfig> {
    if let Some(path) = &args.session {
        return load_session(path).with_context(|| format!("loading {}", path.display()));
    }
    let path = default_session_path();
    if path.exists() {
        return Ok(load_session(&path)?);
    }
    info!("No session at {}, using demo session", path.display());
    Ok(SessionConfig::demo())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("metrona=info".parse()?),
        )
        .init();

    let args = parse_args()?;
    let session = load(&args)?;

    let mut transport = Transport::with_tempo(session.tempo);
    for source in session.build_sources(LogVoice::boxed)? {
        transport.register_source(source);
    }

    let engine = ClockEngine::new(transport)?;
    let events = engine.subscribe()?;
    engine.start()?;
    info!("Running for {:.1}s at {}", args.seconds, session.tempo);

    let deadline = Instant::now() + Duration::from_secs_f64(args.seconds);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(TransportEvent::Tick(tick)) if tick % PPQN as u64 == 1 => {
                debug!("Beat {}", tick / PPQN as u64 + 1);
            }
            Ok(TransportEvent::SourceFailed { source_id, reason }) => {
                error!("{} failed: {}", source_id, reason);
            }
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => anyhow::bail!("Clock thread exited"),
        }
    }

    engine.stop()?;
    info!("Done");
    Ok(())
}
