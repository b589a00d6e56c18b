use tokio::sync::watch;

use crate::engine::{ExecutionMonitor, MonitorSnapshot};

#[derive(Clone)]
pub struct AppState {
    pub snapshot: watch::Receiver<MonitorSnapshot>,
    pub elapsed: watch::Receiver<u64>,
}

impl AppState {
    pub fn for_monitor(monitor: &ExecutionMonitor) -> Self {
        Self {
            snapshot: monitor.subscribe(),
            elapsed: monitor.elapsed(),
        }
    }
}
