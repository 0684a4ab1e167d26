//! Catalog aggregates: products, variants, collections, and position lists.

pub mod collection;
pub mod image;
pub mod positions;
pub mod product;
pub mod status;
pub mod variant;

pub use collection::{Collection, CollectionMetadata, CollectionState, NewCollection};
pub use image::ImageRef;
pub use positions::{Positions, PositionsState};
pub use product::{NewProduct, Product, ProductKind, ProductMetadata, ProductOption, ProductState};
pub use status::LifecycleStatus;
pub use variant::{NewVariant, Sale, Variant, VariantState};
