mod registry;

pub use registry::{EntityId, Registry};
