mod dense;
pub mod types;

pub use dense::Dense;
pub use types::{Layer, Layers};
