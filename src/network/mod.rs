pub mod encoder;
pub mod metadata;
pub mod network;
pub mod spec;

pub use encoder::SegmentEncoder;
pub use metadata::ModelMetadata;
pub use network::{EegNet, NetCache};
pub use spec::{ArchitectureSpec, ConvLayerSpec};
