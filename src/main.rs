//! lapgate binary entrypoint: runs either the host (HTTP control surface + peer listener) or a
//! gate (detector + link to the host), selected by `LAPGATE_MODE`.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, bail};
use axum::Router;
use lapgate::{
    config::AppConfig,
    routes,
    services::{
        gate_service::{GateController, LogHaptics},
        motion::{MotionDetector, SamplingHandle, ScoreDetector},
        race_service,
        session::SessionEngine,
    },
    state::{
        AppState, SharedState,
        clock::{MonotonicClock, WallClock},
        peer::{PLACEHOLDER_NAME, PeerId},
    },
    transport::websocket::{WsConnector, WsListener},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpListener,
    sync::mpsc,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_HOST_URL: &str = "ws://127.0.0.1:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(AppConfig::load());
    let mode = env::var("LAPGATE_MODE").unwrap_or_else(|_| "host".into());
    match mode.as_str() {
        "host" => run_host(config).await,
        "gate" => run_gate(config).await,
        other => bail!("unknown LAPGATE_MODE `{other}` (expected `host` or `gate`)"),
    }
}

/// Run the coordinating device: register on the network, serve the HTTP API and peer links.
async fn run_host(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let listener = Arc::new(WsListener::new());
    let (session, events) = SessionEngine::new(listener.clone(), config.session_options());
    let preferred = env::var("LAPGATE_HOST_ID").ok().map(PeerId::from);
    let host_id = session
        .init(true, preferred)
        .await
        .context("registering host identity")?;
    info!(host = %host_id, "gates should dial this host id");

    let app_state = AppState::new(
        config,
        session.clone(),
        Arc::new(MonotonicClock::new()),
        Some(listener),
    );
    tokio::spawn(race_service::run_host_events(app_state.clone(), events));

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let tcp = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(tcp, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    session.destroy().await;
    Ok(())
}

/// Run a gate: link to the host, feed the detector from stdin scores and react to commands.
async fn run_gate(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let host_id = env::var("LAPGATE_HOST_ID")
        .map(PeerId::from)
        .context("LAPGATE_HOST_ID must name the host to join")?;
    let host_url = env::var("LAPGATE_HOST_URL").unwrap_or_else(|_| DEFAULT_HOST_URL.into());
    let name = env::var("LAPGATE_NAME").unwrap_or_else(|_| PLACEHOLDER_NAME.into());

    let connector = Arc::new(WsConnector::new(host_url.clone()));
    let (session, events) = SessionEngine::new(connector, config.session_options());
    let local = session
        .init(false, None)
        .await
        .context("opening gate endpoint")?;
    info!(gate = %local, host = %host_id, url = %host_url, "joining host");
    session
        .connect_to_host(host_id, name)
        .await
        .context("starting host link")?;

    let detector = Arc::new(ScoreDetector::new(config.detector));
    let motion = detector.subscribe();
    let sampling = SamplingHandle::start(detector.clone(), stdin_scores());

    let controller = GateController::new(
        session.clone(),
        detector,
        Arc::new(LogHaptics),
        Arc::new(WallClock),
        config.haptic_pulse(),
    );
    let mut view = controller.subscribe();
    tokio::spawn(async move {
        while view.changed().await.is_ok() {
            let current = view.borrow_and_update().clone();
            match &current.alert {
                Some(alert) => warn!(status = ?current.status, role = ?current.role, %alert, "gate alert"),
                None => info!(
                    status = ?current.status,
                    role = ?current.role,
                    score = current.activity_score,
                    "gate state"
                ),
            }
        }
    });

    tokio::select! {
        _ = controller.run(events, motion) => {},
        _ = shutdown_signal() => info!("shutting down gate"),
    }

    sampling.stop();
    session.destroy().await;
    Ok(())
}

/// Activity scores read from stdin, one float per line, as produced by an external frame differ.
fn stdin_scores() -> mpsc::UnboundedReceiver<f32> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match line.trim().parse::<f32>() {
                Ok(score) => {
                    if tx.send(score).is_err() {
                        break;
                    }
                }
                Err(err) => warn!(%line, error = %err, "ignoring malformed activity score"),
            }
        }
    });
    rx
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
