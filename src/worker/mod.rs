//! Request-time cache behaviour: routing, strategies, background tasks,
//! eviction sweeps and the install/activate lifecycle.

mod lifecycle;
mod manager;
mod messages;
mod router;
mod strategy;
mod sweeper;
mod tasks;

pub use lifecycle::{ActivationReport, InstallReport, PrecacheFailure, WorkerState};
pub use manager::{CacheManager, PartitionStat, StatusReport};
pub use messages::{MessageReply, WorkerMessage};
pub use router::{CacheRouter, RoutePredicate, RouteRule, StaticAssets, StrategyKind};
pub use strategy::{ResponseSource, StrategyContext, StrategyError, StrategyOutcome};
pub use sweeper::{
    IntervalTrigger, ManualTrigger, PartitionSweep, SweepFailure, SweepHandle, SweepReport,
    SweepTrigger, run_sweeper, sweep_partition,
};
pub use tasks::{DeferredExecutor, TaskError, TaskExecutor, TaskFuture, TokioExecutor};
