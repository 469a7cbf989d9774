//! Response cache.

mod singleflight;
mod store;

pub use singleflight::{SingleFlight, SingleFlightError};
pub use store::{fingerprint_extras, CacheKey, CacheKind, CacheTtls, ResponseCache};
