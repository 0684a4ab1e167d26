//! Slug and SKU reservation aggregates.
//!
//! Both are small string-keyed state machines whose aggregate id embeds the
//! reserved string itself, so "is this taken?" is a single point lookup.

pub mod sku;
pub mod slug;

pub use sku::{Sku, SkuState, SkuStatus};
pub use slug::{EntityType, Slug, SlugState, SlugStatus};
