//! Resilience core of the Al-Araf numerology app: retries with backoff and
//! circuit breaking around the LLM backend, TTL/LRU caches for responses and
//! calculations, and operation monitoring with health reports.

pub mod cli;
pub mod clock;
pub mod config;
pub mod resilience;

pub use clock::{Clock, MockClock, SharedClock, SystemClock};
pub use resilience::{
    CacheRegistry, CacheStore, OperationMonitor, ResilienceConfig, RetryConfig, RetryExecutor, ServiceError,
};
