pub mod dataset;
pub mod loader;
pub mod npy;

pub use dataset::{BandWindow, EegDataset};
pub use loader::{Batch, BatchLoader};
pub use npy::{read_npy, write_npy, NpyArray};
