//! Navigation menu entities

use crate::models::TreeNode;
use crate::repositories::entity::{EntityAttributes, TreeEntity, TreeEntityRepository};
use serde::{Deserialize, Serialize};

/// One menu entry; `url` is absent for pure grouping entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    #[serde(flatten)]
    pub node: TreeNode,
    pub name: String,
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl MenuItem {
    /// Entries without a link only group their children
    pub fn is_group(&self) -> bool {
        self.url.is_none()
    }
}

impl TreeEntity for MenuItem {
    const NAMESPACE: &'static str = "menus";
    const DETAIL_COLUMN: &'static str = "url";

    fn from_parts(node: TreeNode, attributes: EntityAttributes) -> Self {
        Self {
            node,
            name: attributes.name,
            slug: attributes.slug,
            url: attributes.detail,
        }
    }

    fn node(&self) -> &TreeNode {
        &self.node
    }
}

pub type MenuRepository = TreeEntityRepository<MenuItem>;
