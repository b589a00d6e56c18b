//! Execution-status synchronization engine.
//!
//! The scheduler ticks, the poller fetches from the task queue or the record
//! store, the reconciler decides what changed, and the monitor runs the
//! resulting effects.

pub mod monitor;
pub mod poller;
pub mod reconciler;
pub mod scheduler;
pub mod tracker;

pub use self::monitor::{Collaborators, ExecutionMonitor, MonitorSettings, MonitorSnapshot};
pub use self::poller::{DualSourcePoller, PollOutcome, Source};
pub use self::reconciler::{Effect, Reconciler, SyncState, Visible};
pub use self::scheduler::PollScheduler;
pub use self::tracker::ElapsedTracker;
