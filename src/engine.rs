//! Engine lifecycle
//!
//! [`Engine`] owns the long-lived tasks of the interception engine: the
//! interface read loop and the proxy probe. `start` opens the virtual
//! interface (the one fatal step), runs an initial probe round so the first
//! packets see accurate reachability, and spawns the tasks; `stop`
//! broadcasts shutdown, joins them, and drains the flow table so every
//! tracked connection reaches a terminal state.

use crate::config::EngineConfig;
use crate::dns::DnsInterceptor;
use crate::error::TungateError;
use crate::flow::{CloseReason, FlowTable};
use crate::probe::ProxyProbe;
use crate::protect::{ArcProtector, NoopProtector};
use crate::relay::{LogSink, ResponseSink};
use crate::socks::Socks5Client;
use crate::status::{EngineStatus, StatusSnapshot};
use crate::tun::{TunProvider, TunPump};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Capacity of the shutdown broadcast channel
const SHUTDOWN_CHANNEL_SIZE: usize = 4;

/// Lifecycle state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No tasks running
    Stopped,
    /// `start` in progress
    Starting,
    /// Read loop and probe running
    Running,
    /// `stop` in progress
    Stopping,
}

/// Mutable lifecycle data behind the engine's lock
struct EngineInner {
    /// Current lifecycle state
    state: EngineState,
    /// Shutdown signal for the spawned tasks
    shutdown_tx: Option<broadcast::Sender<bool>>,
    /// Handles of the read loop and probe tasks
    tasks: Vec<JoinHandle<()>>,
}

/// The traffic interception engine
pub struct Engine {
    /// Engine configuration
    config: EngineConfig,
    /// Socket protector applied to every upstream socket
    protector: ArcProtector,
    /// Destination for upstream response bytes
    sink: Arc<dyn ResponseSink>,
    /// Shared status flags
    status: Arc<EngineStatus>,
    /// Active flows
    table: Arc<FlowTable>,
    /// Lifecycle state and task handles
    inner: Mutex<EngineInner>,
}

impl Engine {
    /// Create an engine with a no-op protector and the logging sink
    pub fn new(config: EngineConfig) -> Self {
        Self::with_parts(config, Arc::new(NoopProtector), Arc::new(LogSink::new()))
    }

    /// Create an engine with the platform's protector and response sink
    pub fn with_parts(
        config: EngineConfig,
        protector: ArcProtector,
        sink: Arc<dyn ResponseSink>,
    ) -> Self {
        Self {
            config,
            protector,
            sink,
            status: Arc::new(EngineStatus::new()),
            table: Arc::new(FlowTable::new()),
            inner: Mutex::new(EngineInner {
                state: EngineState::Stopped,
                shutdown_tx: None,
                tasks: Vec::new(),
            }),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> EngineState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    /// Point-in-time status snapshot
    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    /// Number of currently tracked flows
    pub async fn active_flows(&self) -> usize {
        self.table.len().await
    }

    /// Start the engine over the interface `provider` opens.
    ///
    /// Interface establishment is the only fatal failure; it aborts the
    /// start and leaves the engine stopped. An unreachable proxy does not
    /// fail the start, it only keeps new flows from being created until a
    /// probe round sees the proxy again.
    pub async fn start(&self, provider: &dyn TunProvider) -> Result<(), TungateError> {
        self.claim_state(EngineState::Stopped, EngineState::Starting)
            .map_err(|state| {
                TungateError::Config(format!("cannot start engine in state {:?}", state))
            })?;

        match self.start_tasks(provider).await {
            Ok((shutdown_tx, tasks)) => {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                inner.shutdown_tx = Some(shutdown_tx);
                inner.tasks = tasks;
                inner.state = EngineState::Running;
                self.status.set_running(true);
                info!("Engine started");
                Ok(())
            }
            Err(e) => {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                inner.state = EngineState::Stopped;
                Err(e)
            }
        }
    }

    /// Open the interface, run the initial probe round, and spawn the
    /// long-lived tasks.
    async fn start_tasks(
        &self,
        provider: &dyn TunProvider,
    ) -> Result<(broadcast::Sender<bool>, Vec<JoinHandle<()>>), TungateError> {
        self.config
            .validate()
            .map_err(TungateError::Config)?;

        let proxy_addr = self.config.proxy_addr().map_err(TungateError::Config)?;
        let dns_addr = self.dns_addr()?;
        let resolver = self
            .config
            .dns
            .resolver_addr()
            .map_err(TungateError::Config)?;

        let device = provider.open(&self.config.tun)?;

        let socks = Socks5Client::new(proxy_addr, &self.config.timeouts, self.protector.clone());

        let dns = Arc::new(DnsInterceptor::new(
            dns_addr,
            resolver,
            self.config.dns.timeout(),
            socks.clone(),
            self.status.clone(),
            self.protector.clone(),
            self.sink.clone(),
        ));

        let probe = ProxyProbe::new(
            proxy_addr,
            dns_addr,
            self.config.timeouts.connect(),
            self.status.clone(),
            self.protector.clone(),
        );

        // First probe round completes before any packet is dispatched.
        probe.check_once().await;
        if !self.status.proxy_reachable() {
            warn!("Starting with unreachable proxy {}", proxy_addr);
        }

        let (shutdown_tx, _) = broadcast::channel(SHUTDOWN_CHANNEL_SIZE);

        let pump = Arc::new(TunPump::new(
            device,
            self.table.clone(),
            socks,
            dns,
            self.sink.clone(),
            self.status.clone(),
            shutdown_tx.clone(),
            self.config.timeouts.relay(),
            self.config.tun.mtu,
            self.config.udp_passthrough,
        ));

        let tasks = vec![
            tokio::spawn(probe.run(shutdown_tx.subscribe())),
            tokio::spawn(pump.run(shutdown_tx.subscribe())),
        ];

        Ok((shutdown_tx, tasks))
    }

    /// Stop the engine.
    ///
    /// Idempotent: stopping a stopped engine is a no-op. All remaining
    /// flows are drained and closed as successful terminations.
    pub async fn stop(&self) {
        if self
            .claim_state(EngineState::Running, EngineState::Stopping)
            .is_err()
        {
            return;
        }

        let (shutdown_tx, tasks) = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            (inner.shutdown_tx.take(), std::mem::take(&mut inner.tasks))
        };

        if let Some(tx) = shutdown_tx {
            // Fails only when every task already exited.
            let _ = tx.send(true);
        }

        for task in tasks {
            if let Err(e) = task.await {
                warn!("Engine task panicked during stop: {}", e);
            }
        }

        // Relay tasks observing shutdown remove their own entries; whatever
        // is left (e.g. flows still handshaking) is closed here.
        let remaining = self.table.drain().await;
        for conn in &remaining {
            conn.claim_close(CloseReason::Success);
        }
        if !remaining.is_empty() {
            info!("Closed {} remaining flows on stop", remaining.len());
        }

        self.status.set_running(false);
        self.status.set_proxy_reachable(false);
        self.status.set_dns_proxy_reachable(false);

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.state = EngineState::Stopped;
        info!("Engine stopped");
    }

    /// Dedicated DNS endpoint, when interception is enabled
    fn dns_addr(&self) -> Result<Option<SocketAddr>, TungateError> {
        if !self.config.dns.enabled {
            return Ok(None);
        }
        self.config
            .dns_proxy_addr()
            .map(Some)
            .map_err(TungateError::Config)
    }

    /// Transition `from` to `to`, or report the actual state
    fn claim_state(&self, from: EngineState, to: EngineState) -> Result<(), EngineState> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state != from {
            return Err(inner.state);
        }
        inner.state = to;
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
