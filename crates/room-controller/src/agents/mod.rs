//! Agent supervisor: one ephemeral worker per (room, service), fleet-wide.
//!
//! Leadership is a lock lease on `rc:lock:agent:{room}:{service}`. Only the
//! instance that acquires the lease builds the worker; every other instance
//! does nothing on a boot trigger. The leader refreshes the lease on a fixed
//! period and tears its worker down the moment a refresh fails, without
//! waiting for any external signal.
//!
//! The registry of locally running workers sits behind one mutex. Worker
//! calls (task starts, shutdown) and lease release happen after the guard is
//! dropped.
//!
//! Requests aimed at a running worker never trigger election: a worker that
//! is not in the local registry is reported as not found and the request is
//! dropped.

use crate::config::AgentConfig;
use crate::errors::RcError;
use crate::lock::{DistributedLock, LockHandle};
use crate::observability::metrics;
use crate::store::keys;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// A running per-room background worker.
#[async_trait]
pub trait AgentWorker: Send + Sync {
    /// Start work on behalf of one user (e.g. begin transcribing their track).
    async fn start_task_for_user(&self, user_id: &str, payload: serde_json::Value) -> Result<(), RcError>;

    /// Stop the worker and release anything it holds.
    async fn shutdown(&self);
}

/// Builds workers for a (room, service) pair once leadership is won.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn build(&self, room_id: &str, service: &str) -> Result<Arc<dyn AgentWorker>, RcError>;
}

/// Outcome of a boot trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootOutcome {
    /// This instance won the lease and started the worker.
    Started,
    /// The worker already runs on this instance.
    AlreadyRunningLocally,
    /// Another instance holds the lease.
    HeldElsewhere,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct AgentKey {
    room_id: String,
    service: String,
}

struct AgentEntry {
    worker: Arc<dyn AgentWorker>,
    lease: LockHandle,
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
}

type Registry = Arc<Mutex<HashMap<AgentKey, AgentEntry>>>;

#[derive(Clone)]
pub struct AgentSupervisor {
    lock: DistributedLock,
    factory: Arc<dyn AgentFactory>,
    config: AgentConfig,
    registry: Registry,
    cancel: CancellationToken,
}

impl AgentSupervisor {
    pub fn new(
        lock: DistributedLock,
        factory: Arc<dyn AgentFactory>,
        config: AgentConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            lock,
            factory,
            config,
            registry: Arc::new(Mutex::new(HashMap::new())),
            cancel,
        }
    }

    /// Boot trigger: start the worker here if this instance wins the lease.
    ///
    /// # Errors
    ///
    /// Store errors from the lease acquisition, or the factory's error
    /// (the lease is released again in that case).
    #[instrument(skip_all, fields(room_id = %room_id, service = %service))]
    pub async fn boot(&self, room_id: &str, service: &str) -> Result<BootOutcome, RcError> {
        let key = AgentKey {
            room_id: room_id.to_string(),
            service: service.to_string(),
        };
        if self.registry.lock().await.contains_key(&key) {
            return Ok(BootOutcome::AlreadyRunningLocally);
        }

        let Some(lease) = self
            .lock
            .try_acquire(&keys::agent_lock(room_id, service), self.config.lease_ttl)
            .await?
        else {
            debug!(target: "rc.agents", room_id = %room_id, service = %service, "Agent lease held elsewhere");
            return Ok(BootOutcome::HeldElsewhere);
        };

        let worker = match self.factory.build(room_id, service).await {
            Ok(worker) => worker,
            Err(e) => {
                warn!(target: "rc.agents", room_id = %room_id, service = %service, error = %e, "Failed to build agent worker");
                self.release_lease(&lease).await;
                return Err(e);
            }
        };

        let cancel = self.cancel.child_token();
        let supervisor = tokio::spawn(self.clone().supervise(key.clone(), lease.clone(), cancel.clone()));

        let running = {
            let mut registry = self.registry.lock().await;
            registry.insert(
                key,
                AgentEntry {
                    worker,
                    lease,
                    cancel,
                    supervisor,
                },
            );
            registry.len()
        };
        metrics::set_agents_running(running);

        info!(target: "rc.agents", room_id = %room_id, service = %service, "Agent started");
        Ok(BootOutcome::Started)
    }

    /// End trigger for one service. Returns whether the worker ran locally.
    #[instrument(skip_all, fields(room_id = %room_id, service = %service))]
    pub async fn end(&self, room_id: &str, service: &str) -> bool {
        let key = AgentKey {
            room_id: room_id.to_string(),
            service: service.to_string(),
        };
        let (entry, running) = {
            let mut registry = self.registry.lock().await;
            let entry = registry.remove(&key);
            (entry, registry.len())
        };

        match entry {
            Some(entry) => {
                metrics::set_agents_running(running);
                self.teardown(&key, entry).await;
                true
            }
            None => {
                debug!(target: "rc.agents", room_id = %room_id, service = %service, "No local agent to end");
                false
            }
        }
    }

    /// End every local worker for the room. Returns how many were ended.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn end_all_for_room(&self, room_id: &str) -> usize {
        let (entries, running) = {
            let mut registry = self.registry.lock().await;
            let keys: Vec<AgentKey> = registry
                .keys()
                .filter(|k| k.room_id == room_id)
                .cloned()
                .collect();
            let entries: Vec<(AgentKey, AgentEntry)> = keys
                .into_iter()
                .filter_map(|k| registry.remove(&k).map(|e| (k, e)))
                .collect();
            (entries, registry.len())
        };

        let ended = entries.len();
        if ended > 0 {
            metrics::set_agents_running(running);
        }
        for (key, entry) in entries {
            self.teardown(&key, entry).await;
        }
        ended
    }

    /// Forward a per-user task to the local worker.
    ///
    /// Returns `Ok(false)` (and logs a warning) when the worker does not run
    /// on this instance. No election and no remote call happen.
    #[instrument(skip_all, fields(room_id = %room_id, service = %service, user_id = %user_id))]
    pub async fn start_task_for_user(
        &self,
        room_id: &str,
        service: &str,
        user_id: &str,
        payload: serde_json::Value,
    ) -> Result<bool, RcError> {
        let key = AgentKey {
            room_id: room_id.to_string(),
            service: service.to_string(),
        };
        let worker = self
            .registry
            .lock()
            .await
            .get(&key)
            .map(|entry| Arc::clone(&entry.worker));

        match worker {
            Some(worker) => {
                worker.start_task_for_user(user_id, payload).await?;
                Ok(true)
            }
            None => {
                warn!(
                    target: "rc.agents",
                    room_id = %room_id,
                    service = %service,
                    user_id = %user_id,
                    "Agent not running on this instance, dropping task request"
                );
                Ok(false)
            }
        }
    }

    pub async fn is_running_locally(&self, room_id: &str, service: &str) -> bool {
        let key = AgentKey {
            room_id: room_id.to_string(),
            service: service.to_string(),
        };
        self.registry.lock().await.contains_key(&key)
    }

    /// `(room_id, service)` of every local worker, sorted.
    pub async fn running_agents(&self) -> Vec<(String, String)> {
        let mut agents: Vec<AgentKey> = self.registry.lock().await.keys().cloned().collect();
        agents.sort();
        agents
            .into_iter()
            .map(|k| (k.room_id, k.service))
            .collect()
    }

    /// Stop every local worker and release every lease (process exit).
    pub async fn shutdown(&self) {
        let entries: Vec<(AgentKey, AgentEntry)> = self.registry.lock().await.drain().collect();
        metrics::set_agents_running(0);

        if !entries.is_empty() {
            info!(target: "rc.agents", count = entries.len(), "Shutting down local agents");
        }
        for (key, entry) in entries {
            self.teardown(&key, entry).await;
        }
    }

    /// Refresh the lease until cancelled or the refresh fails.
    async fn supervise(self, key: AgentKey, lease: LockHandle, cancel: CancellationToken) {
        let period = self.config.refresh_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.lock.refresh(&lease, self.config.lease_ttl).await {
                        Ok(()) => {
                            debug!(target: "rc.agents", room_id = %key.room_id, service = %key.service, "Agent lease refreshed");
                        }
                        Err(e) => {
                            warn!(
                                target: "rc.agents",
                                room_id = %key.room_id,
                                service = %key.service,
                                error = %e,
                                "Agent lease lost, tearing down local worker"
                            );
                            self.on_lease_lost(&key, &lease).await;
                            return;
                        }
                    }
                }
                () = cancel.cancelled() => {
                    debug!(target: "rc.agents", room_id = %key.room_id, service = %key.service, "Agent supervisor cancelled");
                    return;
                }
            }
        }
    }

    async fn on_lease_lost(&self, key: &AgentKey, lease: &LockHandle) {
        let (entry, running) = {
            let mut registry = self.registry.lock().await;
            // Only remove the entry this supervisor owns
            let owned = registry
                .get(key)
                .is_some_and(|entry| entry.lease.token() == lease.token());
            let entry = if owned { registry.remove(key) } else { None };
            (entry, registry.len())
        };

        metrics::record_agent_lease_lost();
        if let Some(entry) = entry {
            metrics::set_agents_running(running);
            entry.cancel.cancel();
            entry.worker.shutdown().await;
            info!(target: "rc.agents", room_id = %key.room_id, service = %key.service, "Agent stopped after lease loss");
        }
    }

    async fn teardown(&self, key: &AgentKey, entry: AgentEntry) {
        entry.cancel.cancel();
        self.release_lease(&entry.lease).await;
        entry.worker.shutdown().await;
        if let Err(e) = entry.supervisor.await {
            warn!(target: "rc.agents", room_id = %key.room_id, service = %key.service, error = %e, "Agent supervisor task failed");
        }
        info!(target: "rc.agents", room_id = %key.room_id, service = %key.service, "Agent stopped");
    }

    async fn release_lease(&self, lease: &LockHandle) {
        match self.lock.release(lease).await {
            Ok(()) | Err(RcError::LockNotHeld(_)) => {}
            Err(e) => {
                warn!(target: "rc.agents", key = %lease.key(), error = %e, "Failed to release agent lease");
            }
        }
    }
}

/// Factory for deployments without an agent backend.
///
/// Workers only log the calls they receive.
#[derive(Debug, Default, Clone)]
pub struct LoggingAgentFactory;

#[async_trait]
impl AgentFactory for LoggingAgentFactory {
    async fn build(&self, room_id: &str, service: &str) -> Result<Arc<dyn AgentWorker>, RcError> {
        Ok(Arc::new(LoggingAgent {
            room_id: room_id.to_string(),
            service: service.to_string(),
        }))
    }
}

#[derive(Debug)]
struct LoggingAgent {
    room_id: String,
    service: String,
}

#[async_trait]
impl AgentWorker for LoggingAgent {
    async fn start_task_for_user(&self, user_id: &str, payload: serde_json::Value) -> Result<(), RcError> {
        info!(
            target: "rc.agents",
            room_id = %self.room_id,
            service = %self.service,
            user_id = %user_id,
            has_payload = !payload.is_null(),
            "Agent task requested"
        );
        Ok(())
    }

    async fn shutdown(&self) {
        debug!(target: "rc.agents", room_id = %self.room_id, service = %self.service, "Agent worker shut down");
    }
}
