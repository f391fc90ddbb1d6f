pub mod signal_cache;

pub use signal_cache::{CacheStats, CachedSignal, SignalCache};
