pub mod activation;
pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod layers;
pub mod loss;
pub mod math;
pub mod network;
pub mod optim;
pub mod pipeline;
pub mod train;

// Convenience re-exports
pub use config::RunConfig;
pub use data::{BatchLoader, EegDataset};
pub use device::{Device, DeviceKind};
pub use error::{EegError, Result};
pub use math::{Precision, Tensor};
pub use network::{ArchitectureSpec, EegNet};
pub use pipeline::{run, RunOutcome};
pub use train::{train_loop, EpochStats, StopReason, TrainConfig, TrainReport};
