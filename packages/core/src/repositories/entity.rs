//! Generic tree-entity repository
//!
//! A tree entity is a row of a namespace table: structural columns owned by
//! the nested-set engine plus `name`, `slug` and one detail column owned by
//! the repository. Writes compose the engine's `*_in` operations with entity
//! column updates in one transaction, retried as a whole on `Conflict`.

use crate::context::OpContext;
use crate::db::{EntityColumn, TreeNamespace};
use crate::models::{now_timestamp, MutationOutcome, Page, TreeNode, NODE_COLUMNS};
use crate::repositories::cache::EntityCache;
use crate::tree::{with_retry, NestedSetIndex, Placement, TreeError, TreeResult, TreeTx};
use crate::Arbor;
use anyhow::Context;
use libsql::params::IntoParams;
use libsql::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;

/// An entity stored in its own tree namespace
pub trait TreeEntity: Clone + Send + Sync + 'static {
    /// Table backing this entity
    const NAMESPACE: &'static str;

    /// Name of the entity-specific text column (e.g. `description`)
    const DETAIL_COLUMN: &'static str;

    fn from_parts(node: TreeNode, attributes: EntityAttributes) -> Self;

    fn node(&self) -> &TreeNode;

    fn id(&self) -> &str {
        &self.node().id
    }
}

/// Columns owned by the repository rather than the engine
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityAttributes {
    pub name: String,
    pub slug: Option<String>,
    pub detail: Option<String>,
}

impl EntityAttributes {
    fn validate(&self) -> TreeResult<()> {
        if self.name.trim().is_empty() {
            return Err(TreeError::invalid_argument("name cannot be empty"));
        }
        if let Some(slug) = &self.slug {
            let valid = !slug.is_empty()
                && slug
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
            if !valid {
                return Err(TreeError::invalid_argument(format!(
                    "slug '{}' must be lowercase letters, digits and '-'",
                    slug
                )));
            }
        }
        Ok(())
    }
}

/// Request to create an entity
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntity {
    /// Explicit id; a UUID v4 is generated when absent
    pub id: Option<String>,
    pub parent_id: Option<String>,
    #[serde(flatten)]
    pub attributes: EntityAttributes,
}

impl NewEntity {
    pub fn new(name: &str) -> Self {
        Self {
            attributes: EntityAttributes {
                name: name.to_string(),
                ..EntityAttributes::default()
            },
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn under(mut self, parent_id: &str) -> Self {
        self.parent_id = Some(parent_id.to_string());
        self
    }

    pub fn with_slug(mut self, slug: &str) -> Self {
        self.attributes.slug = Some(slug.to_string());
        self
    }

    pub fn with_detail(mut self, detail: &str) -> Self {
        self.attributes.detail = Some(detail.to_string());
        self
    }
}

/// Repository for one tree entity type
pub struct TreeEntityRepository<E: TreeEntity> {
    index: NestedSetIndex,
    cache: Arc<dyn EntityCache<E>>,
    _entity: PhantomData<E>,
}

impl<E: TreeEntity> Clone for TreeEntityRepository<E> {
    fn clone(&self) -> Self {
        Self {
            index: self.index.clone(),
            cache: self.cache.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: TreeEntity> TreeEntityRepository<E> {
    /// Namespace layout shared by every tree entity
    pub fn namespace() -> TreeResult<TreeNamespace> {
        Ok(TreeNamespace::new(E::NAMESPACE)?
            .with_column(EntityColumn::text("name"))?
            .with_column(EntityColumn::unique_text("slug"))?
            .with_column(EntityColumn::text(E::DETAIL_COLUMN))?)
    }

    /// Open the repository, creating its table on first use
    pub async fn new(arbor: &Arbor, cache: Arc<dyn EntityCache<E>>) -> TreeResult<Self> {
        let index = arbor.index_for(Self::namespace()?).await?;
        Ok(Self {
            index,
            cache,
            _entity: PhantomData,
        })
    }

    /// The engine handle, for structural queries and maintenance
    pub fn index(&self) -> &NestedSetIndex {
        &self.index
    }

    fn select_columns() -> String {
        format!("{}, name, slug, {}", NODE_COLUMNS, E::DETAIL_COLUMN)
    }

    async fn select_entities(
        &self,
        conn: &Connection,
        context: &str,
        filter: &str,
        page: Page,
        params: impl IntoParams,
    ) -> TreeResult<Vec<E>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE deleted_at IS NULL AND {} ORDER BY lft LIMIT {} OFFSET {}",
            Self::select_columns(),
            self.index.table(),
            filter,
            page.sql_limit(),
            page.sql_offset()
        );
        let mut rows = conn.query(&sql, params).await.map_err(|e| {
            TreeError::storage(self.index.table(), context, e)
        })?;

        let mut entities = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| {
            TreeError::storage(self.index.table(), context, e)
        })? {
            entities.push(entity_from_row::<E>(&row)?);
        }
        Ok(entities)
    }

    async fn write_attributes(
        &self,
        tx: &TreeTx,
        id: &str,
        attributes: &EntityAttributes,
    ) -> TreeResult<()> {
        let sql = format!(
            "UPDATE {} SET name = ?1, slug = ?2, {} = ?3, updated_at = ?4
             WHERE id = ?5 AND deleted_at IS NULL",
            self.index.table(),
            E::DETAIL_COLUMN
        );
        let changed = tx
            .execute(
                &sql,
                params![
                    attributes.name.clone(),
                    attributes.slug.clone(),
                    attributes.detail.clone(),
                    now_timestamp(),
                    id
                ],
            )
            .await
            .map_err(|e| {
                TreeError::storage(self.index.table(), "write attributes", e)
            })?;
        if changed == 0 {
            return Err(TreeError::not_found(self.index.table(), id));
        }
        Ok(())
    }

    /// Run a structural mutation with retry and evict what it touched
    async fn mutate<F, Fut>(&self, operation: &str, op: F) -> TreeResult<MutationOutcome>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = TreeResult<MutationOutcome>>,
    {
        let outcome = with_retry(self.index.retry_policy(), operation, op).await?;
        self.cache.invalidate(&outcome.affected_ids()).await;
        Ok(outcome)
    }

    async fn create_once(&self, ctx: &OpContext, new: &NewEntity) -> TreeResult<MutationOutcome> {
        let tx = ctx.run("create", self.index.begin()).await?;
        let result = ctx
            .run("create", async {
                let outcome = self
                    .index
                    .insert_child_in(&tx, new.parent_id.as_deref(), new.id.as_deref())
                    .await?;
                let id = outcome
                    .node()
                    .map(|n| n.id.clone())
                    .ok_or_else(|| TreeError::Decode("insert returned no node".to_string()))?;
                self.write_attributes(&tx, &id, &new.attributes).await?;
                Ok(outcome)
            })
            .await;
        self.index.finish(tx, "create", result).await
    }

    /// Create an entity as the last child of `new.parent_id` (or a root)
    pub async fn create(&self, ctx: &OpContext, new: NewEntity) -> TreeResult<E> {
        new.attributes.validate()?;
        let outcome = self.mutate("create", || self.create_once(ctx, &new)).await?;
        let node = outcome
            .nodes
            .into_iter()
            .next()
            .ok_or_else(|| TreeError::Decode("insert returned no node".to_string()))?;
        tracing::debug!("Created {} '{}'", E::NAMESPACE, node.id);
        Ok(E::from_parts(node, new.attributes))
    }

    /// Live entity by id, served from the cache when possible
    pub async fn get(&self, ctx: &OpContext, id: &str) -> TreeResult<Option<E>> {
        if let Some(cached) = self.cache.get(id).await {
            return Ok(Some(cached));
        }

        let generation = self.cache.generation();
        let found = ctx
            .run("get", async {
                let conn = self.index.reader().await?;
                self.select_entities(&conn, "get", "id = ?1", Page::all(), params![id])
                    .await
            })
            .await?
            .into_iter()
            .next();

        if let Some(entity) = &found {
            self.cache.put(id, entity.clone(), generation).await;
        }
        Ok(found)
    }

    async fn require(&self, ctx: &OpContext, id: &str) -> TreeResult<E> {
        self.get(ctx, id)
            .await?
            .ok_or_else(|| TreeError::not_found(self.index.table(), id))
    }

    /// Live entity by slug (unique index lookup)
    pub async fn get_by_slug(&self, ctx: &OpContext, slug: &str) -> TreeResult<Option<E>> {
        ctx.run("get_by_slug", async {
            let conn = self.index.reader().await?;
            Ok(self
                .select_entities(&conn, "get_by_slug", "slug = ?1", Page::all(), params![slug])
                .await?
                .into_iter()
                .next())
        })
        .await
    }

    /// Top-level entities in order
    pub async fn roots(&self, ctx: &OpContext) -> TreeResult<Vec<E>> {
        ctx.run("roots", async {
            let conn = self.index.reader().await?;
            self.select_entities(&conn, "roots", "parent_id IS NULL", Page::all(), ())
                .await
        })
        .await
    }

    /// Direct children in order
    pub async fn children(&self, ctx: &OpContext, id: &str, page: Page) -> TreeResult<Vec<E>> {
        ctx.run("children", async {
            let conn = self.index.reader().await?;
            let parent = self.index.require_live(&conn, id).await?;
            self.select_entities(
                &conn,
                "children",
                "lft > ?1 AND rgt < ?2 AND depth = ?3",
                page,
                params![parent.left, parent.right, parent.depth + 1],
            )
            .await
        })
        .await
    }

    /// Root-to-entity trail, the entity included
    pub async fn breadcrumbs(&self, ctx: &OpContext, id: &str) -> TreeResult<Vec<E>> {
        ctx.run("breadcrumbs", async {
            let conn = self.index.reader().await?;
            let node = self.index.require_live(&conn, id).await?;
            self.select_entities(
                &conn,
                "breadcrumbs",
                "lft <= ?1 AND rgt >= ?2",
                Page::all(),
                params![node.left, node.right],
            )
            .await
        })
        .await
    }

    /// The entity and all its descendants in pre-order
    pub async fn subtree(&self, ctx: &OpContext, id: &str) -> TreeResult<Vec<E>> {
        ctx.run("subtree", async {
            let conn = self.index.reader().await?;
            let node = self.index.require_live(&conn, id).await?;
            self.select_entities(
                &conn,
                "subtree",
                "lft >= ?1 AND rgt <= ?2",
                Page::all(),
                params![node.left, node.right],
            )
            .await
        })
        .await
    }

    /// Move an entity (and its subtree) to a new placement
    pub async fn move_to(&self, ctx: &OpContext, id: &str, placement: Placement) -> TreeResult<E> {
        self.mutate("move_to", || self.index.move_subtree_to(ctx, id, &placement))
            .await?;
        self.require(ctx, id).await
    }

    /// Exchange the positions of two sibling entities
    pub async fn swap(&self, ctx: &OpContext, a: &str, b: &str) -> TreeResult<MutationOutcome> {
        self.mutate("swap", || self.index.swap_positions(ctx, a, b))
            .await
    }

    /// Hard-delete an entity and its subtree
    pub async fn delete(&self, ctx: &OpContext, id: &str) -> TreeResult<MutationOutcome> {
        self.mutate("delete", || self.index.delete_subtree(ctx, id))
            .await
    }

    /// Soft-delete an entity and its subtree
    pub async fn archive(&self, ctx: &OpContext, id: &str) -> TreeResult<MutationOutcome> {
        self.mutate("archive", || self.index.soft_delete_subtree(ctx, id))
            .await
    }

    async fn rename_once(
        &self,
        ctx: &OpContext,
        id: &str,
        attributes: &EntityAttributes,
    ) -> TreeResult<()> {
        let tx = ctx.run("rename", self.index.begin()).await?;
        let result = ctx
            .run("rename", self.write_attributes(&tx, id, attributes))
            .await;
        self.index.finish(tx, "rename", result).await
    }

    /// Replace name and slug; structure is untouched
    pub async fn rename(
        &self,
        ctx: &OpContext,
        id: &str,
        name: &str,
        slug: Option<&str>,
    ) -> TreeResult<E> {
        let mut attributes = entity_attributes::<E>(&self.index, ctx, id).await?;
        attributes.name = name.to_string();
        attributes.slug = slug.map(str::to_string);
        attributes.validate()?;

        with_retry(self.index.retry_policy(), "rename", || {
            self.rename_once(ctx, id, &attributes)
        })
        .await?;
        self.cache.invalidate(&[id.to_string()]).await;
        self.require(ctx, id).await
    }
}

/// Current repository-owned columns of a live row
async fn entity_attributes<E: TreeEntity>(
    index: &NestedSetIndex,
    ctx: &OpContext,
    id: &str,
) -> TreeResult<EntityAttributes> {
    ctx.run("attributes", async {
        let conn = index.reader().await?;
        let sql = format!(
            "SELECT name, slug, {} FROM {} WHERE id = ?1 AND deleted_at IS NULL",
            E::DETAIL_COLUMN,
            index.table()
        );
        let mut rows = conn
            .query(&sql, params![id])
            .await
            .map_err(|e| TreeError::storage(index.table(), "attributes", e))?;
        let row = rows
            .next()
            .await
            .map_err(|e| TreeError::storage(index.table(), "attributes", e))?
            .ok_or_else(|| TreeError::not_found(index.table(), id))?;
        Ok(attributes_from_row(&row, 0)?)
    })
    .await
}

fn attributes_from_row(row: &Row, offset: i32) -> anyhow::Result<EntityAttributes> {
    let name: Option<String> = row.get(offset).context("Failed to get name")?;
    let slug: Option<String> = row.get(offset + 1).context("Failed to get slug")?;
    let detail: Option<String> = row.get(offset + 2).context("Failed to get detail")?;
    Ok(EntityAttributes {
        name: name.unwrap_or_default(),
        slug,
        detail,
    })
}

fn entity_from_row<E: TreeEntity>(row: &Row) -> TreeResult<E> {
    let node = TreeNode::from_row(row)?;
    let attributes = attributes_from_row(row, 9)?;
    Ok(E::from_parts(node, attributes))
}
