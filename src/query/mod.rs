// Query descriptors and cache key derivation
pub mod key;

pub use key::{QueryDescriptor, QueryFilter, QueryKey, Scope};
