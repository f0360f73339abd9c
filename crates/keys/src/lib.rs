//! Cache key resolution for cistash
//!
//! Turns a cache identity plus a key template into a concrete,
//! content-addressed cache key:
//!
//! ```text
//! v1-{{ id }}-{{ agent.os }}-{{ checksum "package-lock.json" }}
//! ```
//!
//! - [`template`] parses and renders the placeholder language
//! - [`checksum`] hashes glob-matched files deterministically
//! - [`templates`] holds the built-in cache templates (`node`, `go`, ...)

mod error;
mod resolver;

pub mod checksum;
pub mod platform;
pub mod template;
pub mod templates;

pub use error::{Error, Result};
pub use resolver::KeyResolver;
pub use templates::CacheTemplate;
