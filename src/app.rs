//! Application wiring.
//!
//! Builds every component from one `MonitorConfig`, runs them on the
//! current (single-threaded) runtime and finalizes the sleep log on
//! shutdown.

use anyhow::{anyhow, Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::MonitorConfig;
use crate::motion::{self, run_status_reader, DetectorControl, MotionStatus, StatusReader};
use crate::process::{HelperIo, HelperProcess};
use crate::server;
use crate::sleeplog::SleepLogger;
use crate::streaming::{run_ingest, Distributor, DistributorHandle};
use crate::vitals::{run_vitals_reader, VitalsSnapshot};

/// Shared, read-mostly state handed to request handlers and tasks
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<MonitorConfig>,
    pub distributor: DistributorHandle,
    pub motion: watch::Receiver<MotionStatus>,
    pub vitals: watch::Receiver<VitalsSnapshot>,
}

impl AppContext {
    pub fn new(
        config: MonitorConfig,
        distributor: DistributorHandle,
        motion: watch::Receiver<MotionStatus>,
        vitals: watch::Receiver<VitalsSnapshot>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            distributor,
            motion,
            vitals,
        }
    }
}

/// Run the monitor until Ctrl-C / SIGTERM.
pub async fn run(config: MonitorConfig) -> Result<()> {
    config.validate()?;

    let (distributor, handle) = Distributor::new(config.resume_delay(), config.sink_queue_frames);
    let distributor_task = tokio::spawn(distributor.run());

    let (motion_tx, motion_rx) = watch::channel(MotionStatus::default());
    let (vitals_tx, vitals_rx) = watch::channel(VitalsSnapshot::no_reading());
    let ctx = AppContext::new(config, handle.clone(), motion_rx, vitals_rx);

    let detector = start_motion_detector(&ctx, motion_tx)?;
    start_vitals_reader(&ctx, vitals_tx)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let logger = SleepLogger::new(ctx.config.log_dir.clone(), ctx.config.idle_rotation());
    let logger_task = tokio::spawn(logger.run(
        ctx.config.log_interval(),
        ctx.vitals.clone(),
        ctx.motion.clone(),
        shutdown_rx,
    ));

    let ingest = TcpListener::bind(&ctx.config.ingest_addr)
        .await
        .with_context(|| {
            format!("Failed to listen for MJPEG stream on {}", ctx.config.ingest_addr)
        })?;
    tracing::info!(addr = %ctx.config.ingest_addr, "Started listening for MJPEG stream");
    let marker = ctx.config.boundary_marker();
    let mut ingest_task = tokio::spawn(run_ingest(ingest, marker, handle.clone()));

    let web = server::bind_with_fallback(
        &ctx.config.http_bind,
        ctx.config.http_port,
        ctx.config.http_fallback_port,
    )
    .await?;
    let mut web_task = tokio::spawn(server::run_server(web, ctx.clone()));

    let reset_task = spawn_reset_on_hangup(detector);

    let outcome = supervise(wait_for_shutdown(), &mut ingest_task, &mut web_task).await;
    match &outcome {
        Ok(()) => tracing::info!("Shutting down"),
        Err(e) => tracing::error!(error = %e, "Shutting down after listener failure"),
    }

    ingest_task.abort();
    web_task.abort();
    if let Some(task) = reset_task {
        task.abort();
    }

    let _ = shutdown_tx.send(true);
    match logger_task.await.context("Logger task panicked")? {
        Ok(Some(path)) => tracing::info!(path = %path.display(), "Closed last sleep log"),
        Ok(None) => {}
        Err(e) => tracing::error!(error = %e, "Failed to close last sleep log"),
    }

    handle.shutdown()?;
    let stats = distributor_task.await.context("Distributor task panicked")?;
    tracing::info!(
        viewers = stats.viewers_seen,
        segments = stats.segments,
        "Stopped"
    );
    outcome
}

/// Wait for a shutdown request while watching the listener tasks. A
/// listener that ends on its own is an error; the monitor is unusable
/// without it.
async fn supervise<F>(
    shutdown: F,
    ingest: &mut JoinHandle<()>,
    web: &mut JoinHandle<crate::error::Result<()>>,
) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::select! {
        res = shutdown => res,
        res = ingest => match res {
            Ok(()) => Err(anyhow!("MJPEG listener stopped")),
            Err(e) => Err(anyhow!("MJPEG listener task failed: {}", e)),
        },
        res = web => match res {
            Ok(Ok(())) => Err(anyhow!("Webserver stopped")),
            Ok(Err(e)) => Err(anyhow!(e).context("Webserver failed")),
            Err(e) => Err(anyhow!("Webserver task failed: {}", e)),
        },
    }
}

/// Spawn the detector, wire its stdout to the status reader and return
/// the control side of its stdin.
fn start_motion_detector(
    ctx: &AppContext,
    motion_tx: watch::Sender<MotionStatus>,
) -> Result<DetectorControl<tokio::process::ChildStdin>> {
    let mut helper = HelperProcess::spawn("motion", &ctx.config.motion_command, HelperIo::BOTH)
        .context("Failed to start motion detection process")?;
    let stdin = helper.take_stdin()?;
    let stdout = helper.take_stdout()?;
    helper.watch_exit();

    let reader = StatusReader::new(motion::video_pipeline_hook(ctx.config.video_command.clone()));
    tokio::spawn(async move {
        if let Err(e) = run_status_reader(stdout, reader, motion_tx).await {
            tracing::error!(error = %e, "Motion status reader failed");
        }
    });

    tracing::info!("Started motion detection process");
    Ok(DetectorControl::new(stdin))
}

fn start_vitals_reader(ctx: &AppContext, vitals_tx: watch::Sender<VitalsSnapshot>) -> Result<()> {
    let Some(command) = &ctx.config.vitals_command else {
        tracing::info!("No vitals reader configured; logging stays idle");
        return Ok(());
    };

    let mut helper = HelperProcess::spawn("vitals", command, HelperIo::STDOUT)
        .context("Failed to start vitals reader")?;
    let stdout = helper.take_stdout()?;
    helper.watch_exit();

    tokio::spawn(async move {
        if let Err(e) = run_vitals_reader(stdout, vitals_tx).await {
            tracing::error!(error = %e, "Vitals reader failed");
        }
    });
    Ok(())
}

/// SIGHUP re-arms the motion detector.
#[cfg(unix)]
fn spawn_reset_on_hangup(
    mut control: DetectorControl<tokio::process::ChildStdin>,
) -> Option<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGHUP; detector reset unavailable");
            return None;
        }
    };

    Some(tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            if let Err(e) = control.reset().await {
                tracing::error!(error = %e, "Motion detector reset failed");
                break;
            }
        }
    }))
}

#[cfg(not(unix))]
fn spawn_reset_on_hangup(
    _control: DetectorControl<tokio::process::ChildStdin>,
) -> Option<JoinHandle<()>> {
    None
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for Ctrl-C")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;
    use std::future::pending;

    fn idle_ingest() -> JoinHandle<()> {
        tokio::spawn(pending())
    }

    #[tokio::test]
    async fn test_shutdown_request_wins() {
        let mut ingest = idle_ingest();
        let mut web = tokio::spawn(pending());

        let outcome = supervise(async { Ok(()) }, &mut ingest, &mut web).await;
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn test_failed_webserver_is_reported() {
        let mut ingest = idle_ingest();
        let mut web = tokio::spawn(async {
            Err(MonitorError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "too many open files",
            )))
        });

        let err = supervise(pending(), &mut ingest, &mut web)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Webserver failed"));
        assert!(format!("{:#}", err).contains("too many open files"));
    }

    #[tokio::test]
    async fn test_panicked_ingest_is_reported() {
        let mut ingest = tokio::spawn(async { panic!("listener blew up") });
        let mut web = tokio::spawn(pending());

        let err = supervise(pending(), &mut ingest, &mut web)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("MJPEG listener task failed"));
    }
}
