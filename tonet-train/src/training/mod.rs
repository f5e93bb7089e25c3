//! Training infrastructure: schedule, metrics, loss, optimizers, monitor,
//! checkpoints and the epoch runner.

pub mod batch;
pub mod checkpoint;
pub mod loss;
pub mod metrics;
pub mod monitor;
pub mod optim;
pub mod runner;
pub mod schedule;

pub use batch::{Batch, BatchSource};
pub use checkpoint::{CheckpointEntry, CheckpointManager};
pub use loss::{CrossEntropyLoss, LossOutput};
pub use metrics::{EpochMetrics, MetricsAccumulator, Split};
pub use monitor::{EpochRecord, MetricsHistory, Monitor};
pub use optim::{Adam, Optimizer, OptimizerSettings, OptimizerState, Sgd, build_optimizer};
pub use runner::{Trainer, TrainingState};
pub use schedule::{LearningRateScheduler, ScheduleState, next_rate};
