//! Flattens slugs into the `manifests/` / `collections/` namespaces.

use tessella_shared::ResourceType;

use crate::traits::Rewrite;

pub struct FlatSlugs;

const TYPES: &[ResourceType] = &[ResourceType::Manifest, ResourceType::Collection];

impl Rewrite for FlatSlugs {
    fn id(&self) -> &'static str {
        "flat-slugs"
    }

    fn name(&self) -> &'static str {
        "Flat slugs"
    }

    fn types(&self) -> &[ResourceType] {
        TYPES
    }

    fn rewrite(&self, slug: &str, kind: ResourceType) -> Option<String> {
        let leaf = slug.trim_end_matches('/').rsplit('/').next()?;
        if leaf.is_empty() {
            return None;
        }
        match kind {
            ResourceType::Manifest => Some(format!("manifests/{leaf}")),
            ResourceType::Collection => Some(format!("collections/{leaf}")),
            ResourceType::Canvas => None,
        }
    }
}
