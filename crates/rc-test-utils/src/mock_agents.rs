//! Agent factory that builds recording workers.

use async_trait::async_trait;
use room_controller::agents::{AgentFactory, AgentWorker};
use room_controller::errors::RcError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct AgentLog {
    built: Vec<(String, String)>,
    tasks: Vec<(String, String, String)>,
    shutdowns: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct MockAgentFactory {
    log: Arc<Mutex<AgentLog>>,
    fail_build: Arc<AtomicBool>,
}

impl MockAgentFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_build(&self, fail: bool) {
        self.fail_build.store(fail, Ordering::SeqCst);
    }

    /// `(room_id, service)` of every worker built.
    #[must_use]
    pub fn built(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().built.clone()
    }

    /// `(room_id, service, user_id)` of every task started.
    #[must_use]
    pub fn tasks(&self) -> Vec<(String, String, String)> {
        self.log.lock().unwrap().tasks.clone()
    }

    /// `(room_id, service)` of every worker shut down.
    #[must_use]
    pub fn shutdowns(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().shutdowns.clone()
    }
}

#[async_trait]
impl AgentFactory for MockAgentFactory {
    async fn build(&self, room_id: &str, service: &str) -> Result<Arc<dyn AgentWorker>, RcError> {
        if self.fail_build.load(Ordering::SeqCst) {
            return Err(RcError::AgentUnavailable(service.to_string()));
        }
        self.log
            .lock()
            .unwrap()
            .built
            .push((room_id.to_string(), service.to_string()));
        Ok(Arc::new(RecordingWorker {
            room_id: room_id.to_string(),
            service: service.to_string(),
            log: Arc::clone(&self.log),
        }))
    }
}

#[derive(Debug)]
struct RecordingWorker {
    room_id: String,
    service: String,
    log: Arc<Mutex<AgentLog>>,
}

#[async_trait]
impl AgentWorker for RecordingWorker {
    async fn start_task_for_user(&self, user_id: &str, _payload: serde_json::Value) -> Result<(), RcError> {
        self.log.lock().unwrap().tasks.push((
            self.room_id.clone(),
            self.service.clone(),
            user_id.to_string(),
        ));
        Ok(())
    }

    async fn shutdown(&self) {
        self.log
            .lock()
            .unwrap()
            .shutdowns
            .push((self.room_id.clone(), self.service.clone()));
    }
}
