//! Entity Repositories
//!
//! Taxonomy and menu repositories over the nested-set engine:
//!
//! - [`TreeEntityRepository`] - generic create/read/move/delete for one entity type
//! - [`EntityCache`] - cache seam, with [`InMemoryEntityCache`] as the default
//! - [`TaxonomyRepository`], [`MenuRepository`] - the concrete entity types

mod cache;
mod entity;
mod menu;
mod taxonomy;

pub use cache::{CacheStats, EntityCache, InMemoryEntityCache};
pub use entity::{EntityAttributes, NewEntity, TreeEntity, TreeEntityRepository};
pub use menu::{MenuItem, MenuRepository};
pub use taxonomy::{Taxonomy, TaxonomyRepository};
