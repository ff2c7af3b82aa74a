mod source;
mod store;

pub use source::{two_spirals, DataSource};
pub use store::{ContextManager, Mode, Partition, SampleStore};
