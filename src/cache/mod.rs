// Result caching: expiry-aware store plus a per-key fetch gate
pub mod clock;
pub mod single_flight;
pub mod ttl;

pub use clock::{Clock, ManualClock, SystemClock};
pub use single_flight::SingleFlight;
pub use ttl::{CacheEntry, CacheStats, TtlCache};
