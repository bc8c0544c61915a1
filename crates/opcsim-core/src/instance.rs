//! ---
//! opcsim_section: "06-server-runtime"
//! opcsim_subsection: "module"
//! opcsim_type: "source"
//! opcsim_scope: "code"
//! opcsim_description: "Server instance lifecycle and registry runtime."
//! opcsim_version: "v0.0.0-prealpha"
//! opcsim_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use opcsim_common::time::{duration_to_micros, jitter_us, monotonic_now};
use opcsim_common::SimulationConfig;
use opcsim_model::{ModelError, NodeId, NodeKind, NodeRecord, TypedValue};
use opcsim_space::{AddressSpace, EntryHandle, SpaceError};
use opcsim_store::{NodeStore, StoreError, ValueUpdate};
use opcsim_wave::{WaveStep, WaveformEngine};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::Result;

/// Grace period a stop waits for the update loop before aborting it.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors surfaced by instance lifecycle operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The configured endpoint could not be bound.
    #[error("failed to bind endpoint {endpoint}: {source}")]
    Bind {
        /// The `host:port` pair that was attempted.
        endpoint: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },
    /// Address-space rebuild or mutation failed.
    #[error(transparent)]
    Space(#[from] SpaceError),
    /// Catalog access failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A configuration record failed validation.
    #[error(transparent)]
    Model(#[from] ModelError),
    /// The update loop ignored the stop signal and had to be aborted.
    #[error("update loop did not stop within {0:?}")]
    StopTimeout(Duration),
}

/// Observable lifecycle phase of a server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Restarting,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Restarting => "restarting",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct RuntimeTasks {
    stop_tx: watch::Sender<bool>,
    endpoint_task: JoinHandle<()>,
    loop_task: JoinHandle<()>,
}

/// One simulated server: a bound endpoint, an address space mirroring the
/// catalog, and a background loop driving waveform updates.
///
/// Lifecycle operations are serialized through an async mutex so that
/// concurrent starts, stops, and restarts observe a consistent instance.
/// Double start and double stop are deliberate no-ops.
pub struct ServerInstance {
    server_id: String,
    store: Arc<dyn NodeStore>,
    space: Arc<dyn AddressSpace>,
    entries: Arc<Mutex<HashMap<NodeId, EntryHandle>>>,
    state: Mutex<LifecycleState>,
    runtime: tokio::sync::Mutex<Option<RuntimeTasks>>,
    settings: SimulationConfig,
}

impl ServerInstance {
    /// Build an instance over a catalog server entry. Nothing is bound or
    /// spawned until [`start`](Self::start).
    pub fn new(
        server_id: impl Into<String>,
        store: Arc<dyn NodeStore>,
        space: Arc<dyn AddressSpace>,
        settings: SimulationConfig,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            store,
            space,
            entries: Arc::new(Mutex::new(HashMap::new())),
            state: Mutex::new(LifecycleState::Stopped),
            runtime: tokio::sync::Mutex::new(None),
            settings,
        }
    }

    /// Catalog identifier of the backing server entry.
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Bind the endpoint, rebuild the address space from the catalog, and
    /// spawn the update loop. A start on a running instance is a no-op.
    ///
    /// On any failure the instance rolls back to a clean stopped state:
    /// the address space is cleared and no background task survives.
    pub async fn start(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        self.start_locked(&mut runtime).await
    }

    /// Signal the update loop, wait for it to drain, and tear the endpoint
    /// down. A stop on a stopped instance is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        self.stop_locked(&mut runtime).await
    }

    /// Stop followed by start under a single lifecycle exclusion scope, so
    /// no interleaved operation can observe a half-restarted instance. The
    /// settle delay runs between the two phases so the endpoint port is
    /// fully released before the rebind.
    pub async fn restart(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        *self.state.lock() = LifecycleState::Restarting;
        self.stop_locked(&mut runtime).await?;
        if !self.settings.settle_delay.is_zero() {
            sleep(self.settings.settle_delay).await;
        }
        self.start_locked(&mut runtime).await
    }

    async fn start_locked(&self, runtime: &mut Option<RuntimeTasks>) -> Result<()> {
        if runtime.is_some() {
            debug!(server = %self.server_id, "start requested while already running");
            *self.state.lock() = LifecycleState::Running;
            return Ok(());
        }
        *self.state.lock() = LifecycleState::Starting;
        match self.bring_up().await {
            Ok(tasks) => {
                *runtime = Some(tasks);
                *self.state.lock() = LifecycleState::Running;
                Ok(())
            }
            Err(err) => {
                self.space.clear();
                self.entries.lock().clear();
                *self.state.lock() = LifecycleState::Stopped;
                Err(err)
            }
        }
    }

    async fn bring_up(&self) -> Result<RuntimeTasks> {
        let config = self.store.server(&self.server_id)?;
        config.validate()?;

        let endpoint = config.endpoint();
        let listener = TcpListener::bind(&endpoint)
            .await
            .map_err(|source| CoreError::Bind {
                endpoint: endpoint.clone(),
                source,
            })?;

        let nodes = self.store.nodes(&self.server_id)?;
        {
            let mut entries = self.entries.lock();
            for record in &nodes {
                // Idempotent rebuild: entries left over from a previous
                // partial attempt are reused rather than recreated.
                if let Some(existing) = self.space.lookup(&record.node_id) {
                    entries.insert(record.node_id.clone(), existing);
                    continue;
                }
                let handle = self.install(record)?;
                entries.insert(record.node_id.clone(), handle);
            }
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let endpoint_task =
            spawn_endpoint_task(self.server_id.clone(), listener, stop_tx.subscribe());
        let loop_task = spawn_update_loop(UpdateLoop {
            server_id: self.server_id.clone(),
            store: self.store.clone(),
            space: self.space.clone(),
            entries: self.entries.clone(),
            engine: WaveformEngine::new(self.settings.random_seed),
            floor_ms: config
                .min_sampling_interval_ms
                .max(opcsim_model::MIN_VARIATION_INTERVAL_MS),
            idle_tick: self.settings.idle_tick,
            settle_delay: self.settings.settle_delay,
            stop_rx,
        });

        // The persisted running flag doubles as the autostart marker; a
        // failure to record it must not take down a healthy server.
        if let Err(err) = self.store.set_running(&self.server_id, true, Some(Utc::now())) {
            warn!(server = %self.server_id, error = %err, "failed to persist running flag");
        }

        info!(server = %self.server_id, endpoint = %endpoint, nodes = nodes.len(), "server started");
        Ok(RuntimeTasks {
            stop_tx,
            endpoint_task,
            loop_task,
        })
    }

    async fn stop_locked(&self, runtime: &mut Option<RuntimeTasks>) -> Result<()> {
        let Some(tasks) = runtime.take() else {
            debug!(server = %self.server_id, "stop requested while already stopped");
            *self.state.lock() = LifecycleState::Stopped;
            return Ok(());
        };
        *self.state.lock() = LifecycleState::Stopping;

        let _ = tasks.stop_tx.send(true);
        let mut loop_task = tasks.loop_task;
        let drained = match timeout(STOP_TIMEOUT, &mut loop_task).await {
            Ok(join) => {
                if let Err(err) = join {
                    warn!(server = %self.server_id, error = %err, "update loop join error");
                }
                true
            }
            Err(_) => {
                loop_task.abort();
                false
            }
        };
        // Await the aborted accept task so the listener is actually dropped
        // and the port released before stop() returns.
        tasks.endpoint_task.abort();
        let _ = tasks.endpoint_task.await;

        self.space.clear();
        self.entries.lock().clear();
        if let Err(err) = self.store.set_running(&self.server_id, false, None) {
            warn!(server = %self.server_id, error = %err, "failed to persist running flag");
        }
        *self.state.lock() = LifecycleState::Stopped;

        if drained {
            info!(server = %self.server_id, "server stopped");
            Ok(())
        } else {
            Err(CoreError::StopTimeout(STOP_TIMEOUT))
        }
    }

    /// Persist a node record and, when the instance is running, splice the
    /// corresponding entry into the live address space without a restart.
    pub async fn add_node(&self, record: NodeRecord) -> Result<()> {
        record.validate()?;
        let runtime = self.runtime.lock().await;
        self.store.upsert_node(&self.server_id, record.clone())?;
        if runtime.is_some() {
            let mut entries = self.entries.lock();
            if let Some(previous) = entries.remove(&record.node_id) {
                // Replacing in place; a stale handle just means the entry
                // is already gone.
                match self.space.remove(&previous) {
                    Ok(()) | Err(SpaceError::StaleHandle(_)) | Err(SpaceError::NotFound(_)) => {}
                    Err(err) => return Err(err.into()),
                }
            }
            let handle = self.install(&record)?;
            entries.insert(record.node_id.clone(), handle);
            info!(server = %self.server_id, node = %record.node_id, "node spliced into running server");
        }
        Ok(())
    }

    /// Remove a node record and, when the instance is running, drop the
    /// live entry. Returns whether a record existed.
    pub async fn remove_node(&self, node_id: &NodeId) -> Result<bool> {
        let runtime = self.runtime.lock().await;
        let existed = self.store.remove_node(&self.server_id, node_id)?;
        if runtime.is_some() {
            let mut entries = self.entries.lock();
            if let Some(handle) = entries.remove(node_id) {
                match self.space.remove(&handle) {
                    Ok(()) | Err(SpaceError::StaleHandle(_)) | Err(SpaceError::NotFound(_)) => {}
                    Err(err) => return Err(err.into()),
                }
                info!(server = %self.server_id, node = %node_id, "node removed from running server");
            }
        }
        Ok(existed)
    }

    /// Number of live address-space entries; zero when stopped.
    pub fn entry_count(&self) -> usize {
        self.space.len()
    }

    fn install(&self, record: &NodeRecord) -> Result<EntryHandle> {
        let handle = match record.kind {
            NodeKind::Object => self.space.create_object(&record.node_id, &record.name)?,
            NodeKind::Variable => {
                let initial = match record.try_value() {
                    Ok(value) => value,
                    Err(err) => {
                        warn!(
                            server = %self.server_id,
                            node = %record.node_id,
                            error = %err,
                            "stored value not convertible; using type default"
                        );
                        TypedValue::default_for(record.data_type)
                    }
                };
                self.space
                    .create_variable(&record.node_id, &record.name, initial, record.data_type)?
            }
        };
        Ok(handle)
    }
}

impl std::fmt::Debug for ServerInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerInstance")
            .field("server_id", &self.server_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn spawn_endpoint_task(
    server_id: String,
    listener: TcpListener,
    mut stop_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        debug!(server = %server_id, "endpoint shutdown signal received");
                        break;
                    }
                }
                accepted = listener.accept() => {
                    match accepted {
                        // Session negotiation is out of scope for the
                        // simulator; presence of the endpoint is what
                        // clients probe for.
                        Ok((_, peer)) => {
                            debug!(server = %server_id, %peer, "client connection accepted");
                        }
                        Err(err) => {
                            warn!(server = %server_id, error = %err, "accept failed");
                        }
                    }
                }
            }
        }
    })
}

struct UpdateLoop {
    server_id: String,
    store: Arc<dyn NodeStore>,
    space: Arc<dyn AddressSpace>,
    entries: Arc<Mutex<HashMap<NodeId, EntryHandle>>>,
    engine: WaveformEngine,
    floor_ms: u64,
    idle_tick: Duration,
    settle_delay: Duration,
    stop_rx: watch::Receiver<bool>,
}

fn spawn_update_loop(mut ctx: UpdateLoop) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Give clients a quiet window to connect before values start moving.
        if !ctx.settle_delay.is_zero() {
            tokio::select! {
                _ = ctx.stop_rx.changed() => return,
                _ = sleep(ctx.settle_delay) => {}
            }
        }

        loop {
            // Node records are re-read every tick so edits made while the
            // server runs take effect on the next pass.
            let nodes = match ctx.store.nodes(&ctx.server_id) {
                Ok(nodes) => nodes,
                Err(err) => {
                    warn!(server = %ctx.server_id, error = %err, "catalog read failed; retrying next tick");
                    Vec::new()
                }
            };

            let period = tick_period(&nodes, ctx.floor_ms, ctx.idle_tick);
            let tick_started = monotonic_now();
            tokio::select! {
                _ = ctx.stop_rx.changed() => {
                    debug!(server = %ctx.server_id, "update loop shutdown signal received");
                    break;
                }
                _ = sleep(period) => {}
            }

            {
                // Address-space writes and the catalog commit share one
                // entries-lock scope, so reads never observe the two
                // disagreeing.
                let entries = ctx.entries.lock();
                let mut updates = Vec::new();
                for node in &nodes {
                    if *ctx.stop_rx.borrow() {
                        break;
                    }
                    if node.variation.kind.is_none() {
                        continue;
                    }
                    match ctx.engine.next_value(node, Utc::now()) {
                        WaveStep::Hold => {}
                        WaveStep::Misconfigured(reason) => {
                            warn!(server = %ctx.server_id, node = %node.node_id, reason, "variation skipped");
                        }
                        WaveStep::Advance { value, direction } => {
                            let Some(handle) = entries.get(&node.node_id) else {
                                // Node was deleted after this tick's
                                // snapshot was taken.
                                continue;
                            };
                            if let Err(err) = ctx.space.write(handle, value.clone()) {
                                warn!(server = %ctx.server_id, node = %node.node_id, error = %err, "address-space write failed");
                                continue;
                            }
                            updates.push(ValueUpdate {
                                node_id: node.node_id.clone(),
                                value: value.canonical(),
                                direction,
                            });
                        }
                    }
                }
                // The whole tick lands in one catalog commit, so file-backed
                // stores rewrite the document once per tick rather than once
                // per node.
                if !updates.is_empty() {
                    if let Err(err) = ctx.store.update_values(&ctx.server_id, &updates) {
                        warn!(server = %ctx.server_id, error = %err, "catalog value update failed");
                    }
                }
            }

            let elapsed = tick_started.elapsed();
            debug!(
                server = %ctx.server_id,
                period_us = duration_to_micros(period),
                jitter_us = jitter_us(elapsed, period),
                nodes = nodes.len(),
                "tick complete"
            );
        }
        debug!(server = %ctx.server_id, "update loop exited");
    })
}

/// Server-wide tick period: the smallest effective variation interval among
/// active nodes, floored by the sampling minimum; the idle period when no
/// node varies.
fn tick_period(nodes: &[NodeRecord], floor_ms: u64, idle_tick: Duration) -> Duration {
    nodes
        .iter()
        .filter(|node| !node.variation.kind.is_none())
        .map(|node| node.variation.effective_interval_ms().max(floor_ms))
        .min()
        .map(Duration::from_millis)
        .unwrap_or(idle_tick)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcsim_model::VariationConfig;

    fn varying(local: u64, interval_ms: u64) -> NodeRecord {
        NodeRecord {
            node_id: NodeId::numeric(2, local),
            name: format!("node-{local}"),
            kind: NodeKind::Variable,
            data_type: opcsim_model::DataType::Double,
            value: Some("0".to_owned()),
            description: None,
            variation: VariationConfig {
                kind: opcsim_model::VariationKind::Sine,
                interval_ms,
                min: Some(0.0),
                max: Some(1.0),
                ..VariationConfig::default()
            },
        }
    }

    fn steady(local: u64) -> NodeRecord {
        NodeRecord {
            node_id: NodeId::numeric(2, local),
            name: format!("node-{local}"),
            kind: NodeKind::Variable,
            data_type: opcsim_model::DataType::Double,
            value: Some("0".to_owned()),
            description: None,
            variation: VariationConfig::default(),
        }
    }

    #[test]
    fn tick_period_picks_the_fastest_active_node() {
        let nodes = vec![varying(1, 500), varying(2, 1500), steady(3)];
        assert_eq!(
            tick_period(&nodes, 100, Duration::from_secs(1)),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn tick_period_respects_the_sampling_floor() {
        let nodes = vec![varying(1, 120)];
        assert_eq!(
            tick_period(&nodes, 250, Duration::from_secs(1)),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn tick_period_idles_without_active_variation() {
        let nodes = vec![steady(1), steady(2)];
        assert_eq!(
            tick_period(&nodes, 100, Duration::from_secs(3)),
            Duration::from_secs(3)
        );
        assert_eq!(
            tick_period(&[], 100, Duration::from_secs(3)),
            Duration::from_secs(3)
        );
    }
}
