//! Provider discovery: metadata document and its cache
//!
//! The provider publishes a JSON discovery document at
//! `{issuer}/.well-known/openid-configuration` describing its endpoints
//! and capabilities. [`ProviderMetadata`] is one immutable snapshot of
//! that document; [`MetadataCache`] owns fetching, TTL-based reuse and
//! the explicit per-field overrides a caller may configure.

pub mod cache;
pub mod metadata;

pub use cache::MetadataCache;
pub use metadata::ProviderMetadata;
