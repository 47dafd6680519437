//! Taxonomy entities (categories, tags arranged in a hierarchy)

use crate::models::TreeNode;
use crate::repositories::entity::{EntityAttributes, TreeEntity, TreeEntityRepository};
use serde::{Deserialize, Serialize};

/// One taxonomy term and its position in the hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Taxonomy {
    #[serde(flatten)]
    pub node: TreeNode,
    pub name: String,
    pub slug: Option<String>,
    pub description: Option<String>,
}

impl TreeEntity for Taxonomy {
    const NAMESPACE: &'static str = "taxonomies";
    const DETAIL_COLUMN: &'static str = "description";

    fn from_parts(node: TreeNode, attributes: EntityAttributes) -> Self {
        Self {
            node,
            name: attributes.name,
            slug: attributes.slug,
            description: attributes.detail,
        }
    }

    fn node(&self) -> &TreeNode {
        &self.node
    }
}

pub type TaxonomyRepository = TreeEntityRepository<Taxonomy>;
