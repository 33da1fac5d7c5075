pub mod backoff;
pub mod engine;
pub mod ratelimit;
pub mod session;

pub use backoff::ExponentialBackoff;
pub use engine::{PeerStatus, SyncEngine};
pub use ratelimit::TokenBucket;
pub use session::{decrement_ttls, PeerSpec, SessionState, SyncConfig};
