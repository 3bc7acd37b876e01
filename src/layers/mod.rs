pub mod conv;
pub mod dense;
pub mod lstm;
pub mod param;
pub mod pool;

pub use conv::Conv2d;
pub use dense::Linear;
pub use lstm::Lstm;
pub use param::{Module, Param};
pub use pool::MaxPool2d;
