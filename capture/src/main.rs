mod keys;
mod score;
mod session;
mod sink;
mod source;

use std::path::PathBuf;
use std::time::Duration;

use frame_keeper_common::config::Config;
use session::CaptureSession;
use sink::FrameSink;
use source::SourceExit;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// How long the source gets to notice the closed channel before it is aborted.
const SOURCE_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        source = ?config.source.kind,
        keep = config.session.keep,
        tie_break = ?config.session.tie_break,
        split_day_night = config.session.split_day_night,
        metric = ?config.scoring.metric,
        duration_secs = config.session.duration_secs,
        output = %config.output.dir.display(),
        "starting frame-keeper capture"
    );

    let scorer = score::scorer_for(config.scoring.metric);
    let mut session =
        match CaptureSession::new(scorer, &config.session, config.output.log_all_frames) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to build selectors");
                std::process::exit(1);
            }
        };

    let (tx, mut rx) = mpsc::channel(config.source.channel_capacity);
    let mut source_task = source::spawn_source(config.source.clone(), tx);

    let deadline = match config.session.duration_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("ctrl-c received, finishing session");
    };

    info!(scorer = session.scorer_name(), "entering capture loop");
    session.run(&mut rx, deadline, shutdown).await;
    if session.counters().frames == 0 {
        warn!("no frames were captured this session");
    }

    // Dropping the receiver tells the source to stop at its next send.
    drop(rx);
    let exit = source::join_source(&mut source_task, SOURCE_GRACE).await;
    if let SourceExit::Aborted = exit {
        warn!("frame source did not stop in time, aborted it");
    }
    let source_failure = exit.failure();

    let mut report = session.finish();
    if let Some(e) = &source_failure {
        error!(error = %e, "frame source failed");
        report.source_failed(e.clone());
    }
    let sink = FrameSink::new(&config.output);
    info!(record_log = %sink.record_log().display(), "persisting session");
    let persisted = tokio::task::spawn_blocking(move || sink.persist(&report)).await;
    match persisted {
        Ok(Ok(summary)) => {
            for saved in &summary.saved {
                info!(file = saved.key, score = saved.score, rank = saved.rank, "kept frame");
            }
        }
        Ok(Err(e)) => {
            error!(error = %e, "failed to persist session");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "persist task panicked");
            std::process::exit(1);
        }
    }
    if source_failure.is_some() {
        std::process::exit(1);
    }
}
