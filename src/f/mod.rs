pub mod metrics;
pub mod shape;

pub use metrics::*;
pub use shape::*;
