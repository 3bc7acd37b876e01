pub mod epoch_stats;
pub mod loop_fn;
pub mod state;
pub mod train_config;
pub mod trainer;

pub use epoch_stats::EpochStats;
pub use loop_fn::{train_loop, TrainReport};
pub use state::{early_stop_triggered, StopReason, TrainState};
pub use train_config::TrainConfig;
pub use trainer::{train_step, StepResult};
