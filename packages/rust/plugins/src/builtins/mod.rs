//! Built-in plugins.
//!
//! These are the light derivations every site wants; heavier
//! transformations (thumbnail computation, translation, search export)
//! are expected to arrive as caller-registered plugins.

mod canvas_dims;
mod collection_membership;
mod flat_slugs;
mod manifest_homepage;
mod manifest_label;
mod metadata_topics;
mod slug_source;

pub use canvas_dims::CanvasDims;
pub use collection_membership::CollectionMembership;
pub use flat_slugs::FlatSlugs;
pub use manifest_homepage::ManifestHomepage;
pub use manifest_label::ManifestLabel;
pub use metadata_topics::MetadataTopics;
pub use slug_source::SlugSource;
