pub mod ops;
pub mod precision;
pub mod tensor;

pub use precision::Precision;
pub use tensor::Tensor;
