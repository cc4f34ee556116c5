//! LAN cooperation daemon entry point.
//!
//! Wires the pieces together: settings, identity, the discovery socket, the
//! pairing listener, and the cooperation service behind its mutex.  Four
//! tasks feed the service — discovery receive, pairing accept, session
//! events, and the keep-alive tick — and a Ctrl-C triggers the shutdown
//! broadcast before the process exits.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use coop_core::{DeviceInfo, DeviceOs};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use coop_daemon::application::cooperation::{CooperationService, StateNotifier};
use coop_daemon::application::flow_router::InputFlowRouter;
use coop_daemon::infrastructure::input_capture::noop::{
    NoopClipboard, NoopEdgeDetector, NoopGrabber, NoopInhibitor,
};
use coop_daemon::infrastructure::input_capture::{
    EdgeDetector, InputGrabber, LocalClipboard, ScreensaverInhibitor,
};
use coop_daemon::infrastructure::ipc_bridge::{DaemonState, LoggingNotifier};
use coop_daemon::infrastructure::network::discovery::DiscoveryEngine;
use coop_daemon::infrastructure::network::pairing::{read_pair_request, PairListener};
use coop_daemon::infrastructure::network::session::KEEPALIVE_INTERVAL;
use coop_daemon::infrastructure::storage::settings::{
    load_settings, FileSettingsStore, SettingsStore,
};

fn local_device_os() -> DeviceOs {
    if cfg!(target_os = "windows") {
        DeviceOs::Windows
    } else if cfg!(target_os = "macos") {
        DeviceOs::MacOs
    } else {
        DeviceOs::Linux
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings().context("failed to load settings")?;
    let hostname = gethostname::gethostname().to_string_lossy().into_owned();
    let identity = DeviceInfo::new(settings.machine_id.clone(), hostname.clone(), local_device_os());
    info!("starting as {hostname} ({})", identity.uuid);

    let (pair_listener, pair_port) = PairListener::bind()
        .await
        .context("failed to bind pairing listener")?;
    let discovery = DiscoveryEngine::bind(identity.clone(), pair_port)
        .await
        .context("failed to bind discovery socket")?;

    let flow_router = InputFlowRouter::new(
        vec![Arc::new(NoopGrabber) as Arc<dyn InputGrabber>],
        Arc::new(NoopEdgeDetector) as Arc<dyn EdgeDetector>,
        Arc::new(NoopInhibitor) as Arc<dyn ScreensaverInhibitor>,
    );

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let service = Arc::new(Mutex::new(CooperationService::new(
        identity,
        pair_port,
        settings,
        Arc::new(FileSettingsStore) as Arc<dyn SettingsStore>,
        flow_router,
        Arc::new(NoopClipboard) as Arc<dyn LocalClipboard>,
        Arc::new(LoggingNotifier) as Arc<dyn StateNotifier>,
        discovery.clone(),
        events_tx,
    )));
    let state = DaemonState::new(Arc::clone(&service));
    state.service().lock().await.publish_state();

    // Discovery receive task.
    {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                match discovery.recv(&mut buf).await {
                    Ok((n, src)) => {
                        let mut service = service.lock().await;
                        service.handle_discovery_datagram(src, &buf[..n]).await;
                    }
                    Err(e) => {
                        warn!("discovery recv failed: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
    }

    // Pairing accept task; each handshake runs on its own task so a slow
    // peer cannot block the listener.
    {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            loop {
                match pair_listener.accept().await {
                    Ok((mut stream, src)) => {
                        let service = Arc::clone(&service);
                        tokio::spawn(async move {
                            match read_pair_request(&mut stream).await {
                                Ok(request) => {
                                    let mut service = service.lock().await;
                                    service.handle_inbound_pairing(stream, src, request).await;
                                }
                                Err(e) => debug!("handshake from {src} failed: {e}"),
                            }
                        });
                    }
                    Err(e) => {
                        warn!("pairing accept failed: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
    }

    // Session event pump.
    {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                service.lock().await.handle_session_event(event).await;
            }
        });
    }

    // Keep-alive tick.
    {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(KEEPALIVE_INTERVAL);
            loop {
                interval.tick().await;
                service.lock().await.tick();
            }
        });
    }

    if let Err(e) = service.lock().await.scan().await {
        warn!("initial scan failed: {e}");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for shutdown signal")?;
    info!("shutting down");
    service.lock().await.shutdown().await;
    Ok(())
}
