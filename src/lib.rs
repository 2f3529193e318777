//! Distributed request and bandwidth throttling over a shared Redis store
//! with a process-local fallback cache.
//!
//! A [`Throttler`] decides whether a unit of work (one action, or N bytes)
//! is currently permitted for a subject, under one of four window
//! behaviours: fixed or sliding, counting actions or counting bytes.
//! Accepted work is tracked in a [`Window`] persisted to a remote
//! [`WindowStore`] so decisions stay consistent across process restarts and
//! multiple service instances; when the store is unreachable the throttler
//! degrades to its [`LocalCache`]. Regex-matched [`Rule`]s let a narrow
//! subset of keys run under a different limit than the throttler's default.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use throttlr::{
//!     CacheConfig, LimiterKind, RedisStore, ThrottlerConfig, ThrottlerRegistry, WindowKind,
//! };
//!
//! struct Upload {
//!     user_id: u64,
//! }
//!
//! # async fn demo() -> throttlr::Result<()> {
//! let store = Arc::new(RedisStore::connect("redis://127.0.0.1/").await?);
//!
//! let config = ThrottlerConfig::builder("uploads")
//!     .limiter_kind(LimiterKind::BandwidthLimiter)
//!     .window_kind(WindowKind::Sliding)
//!     .maximum(10 * 1024 * 1024)
//!     .time_window(Duration::from_secs(600))
//!     .key_builder(|upload: &Upload| format!("user:{}", upload.user_id))
//!     .build()?;
//!
//! let throttler = ThrottlerRegistry::global().create(config, store, CacheConfig::default())?;
//!
//! let decision = throttler.decide(&Upload { user_id: 42 }, 512 * 1024).await?;
//! if !decision.allowed() {
//!     println!("throttled; retry in {}s", decision.reset().max(0));
//! }
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod cache;
pub mod convert;
pub mod error;
pub mod registry;
pub mod rules;
pub mod store;
pub mod throttler;
pub mod window;

pub use action::{ActionQueue, ActionRecord};
pub use cache::{CacheConfig, LocalCache};
pub use error::{Result, ThrottlrError};
pub use registry::ThrottlerRegistry;
pub use rules::{Rule, RuleRegistry};
pub use store::{RedisStore, WindowStore};
pub use throttler::{Decision, DecisionHook, Throttler, ThrottlerConfig, ThrottlerConfigBuilder};
pub use window::{LimiterKind, Window, WindowKind};
