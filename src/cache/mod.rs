//! 结果缓存模块：按内容指纹缓存已完成的推理结果，避免重复调用副本。
//!
//! # Result Cache Module
//!
//! Completed inference results are cached under a content fingerprint of the
//! submitted image, so byte-identical submissions are answered without a
//! replica round trip.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Fingerprint`] | SHA-256 of the payload bytes, hex encoded |
//! | [`ResultCache`] | Bounded LRU cache keyed by fingerprint |
//! | [`CacheStats`] | Hit / miss / insert / eviction counters |
//!
//! ## Example
//!
//! ```rust
//! use infer_dispatch::cache::{Fingerprint, ResultCache};
//! use infer_dispatch::types::InferenceResult;
//!
//! let cache = ResultCache::new(1000);
//! let key = Fingerprint::of(b"image bytes");
//! cache.insert(key.clone(), InferenceResult {
//!     filename: "cat.jpg".into(),
//!     inference_time: 0.1,
//!     predictions: vec!["tabby".into()],
//! });
//! assert!(cache.lookup(&key).is_some());
//! ```
//!
//! ## Eviction
//!
//! When full, inserting evicts the least recently *accessed* entry. Lookups
//! refresh recency, which keeps popular images resident under skewed repeat
//! distributions.

mod key;
mod manager;

pub use key::Fingerprint;
pub use manager::{CacheStats, ResultCache};
