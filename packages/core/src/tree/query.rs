//! Query Engine
//!
//! Read-only queries answered with boundary comparisons on one indexed range
//! scan: no recursion, no parent-pointer walks. Soft-deleted rows are never
//! returned. Every query has an `_in` variant that runs on a caller-supplied
//! connection (including an open [`TreeTx`](super::TreeTx)).

use crate::context::OpContext;
use crate::models::{Page, TreeNode, NODE_COLUMNS};
use crate::tree::error::{TreeError, TreeResult};
use crate::tree::NestedSetIndex;
use libsql::params::IntoParams;
use libsql::{params, Connection};

impl NestedSetIndex {
    // ----- row access -------------------------------------------------------

    pub(crate) async fn select_nodes(
        &self,
        conn: &Connection,
        context: &str,
        sql: &str,
        params: impl IntoParams,
    ) -> TreeResult<Vec<TreeNode>> {
        let mut rows = conn
            .query(sql, params)
            .await
            .map_err(|e| TreeError::storage(self.table(), context, e))?;

        let mut nodes = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| TreeError::storage(self.table(), context, e))?
        {
            nodes.push(TreeNode::from_row(&row)?);
        }
        Ok(nodes)
    }

    pub(crate) async fn scalar(
        &self,
        conn: &Connection,
        context: &str,
        sql: &str,
        params: impl IntoParams,
    ) -> TreeResult<i64> {
        let mut rows = conn
            .query(sql, params)
            .await
            .map_err(|e| TreeError::storage(self.table(), context, e))?;
        let row = rows
            .next()
            .await
            .map_err(|e| TreeError::storage(self.table(), context, e))?
            .ok_or_else(|| TreeError::Decode(format!("{} returned no row", context)))?;
        row.get::<i64>(0)
            .map_err(|e| TreeError::storage(self.table(), context, e))
    }

    /// Fetch a row whether live or tombstoned
    pub(crate) async fn fetch_any(&self, conn: &Connection, id: &str) -> TreeResult<Option<TreeNode>> {
        let sql = format!("SELECT {} FROM {} WHERE id = ?1", NODE_COLUMNS, self.table());
        Ok(self
            .select_nodes(conn, "get", &sql, params![id])
            .await?
            .into_iter()
            .next())
    }

    /// A live node, or `NotFound`
    pub(crate) async fn require_live(&self, conn: &Connection, id: &str) -> TreeResult<TreeNode> {
        match self.fetch_any(conn, id).await? {
            Some(node) if !node.is_deleted() => Ok(node),
            _ => Err(TreeError::not_found(self.table(), id)),
        }
    }

    /// A node that may receive children: missing is `NotFound`, a
    /// tombstone is `InvalidParent`
    pub(crate) async fn require_parent(
        &self,
        conn: &Connection,
        parent_id: &str,
    ) -> TreeResult<TreeNode> {
        match self.fetch_any(conn, parent_id).await? {
            None => Err(TreeError::not_found(self.table(), parent_id)),
            Some(node) if node.is_deleted() => Err(TreeError::invalid_parent(
                parent_id,
                "parent has been soft-deleted",
            )),
            Some(node) => Ok(node),
        }
    }

    /// Largest live right boundary, 0 for an empty namespace
    ///
    /// Rows detached mid-move sit at negative boundaries and are ignored.
    pub(crate) async fn max_right_in(&self, conn: &Connection) -> TreeResult<i64> {
        let sql = format!(
            "SELECT COALESCE(MAX(rgt), 0) FROM {} WHERE deleted_at IS NULL AND lft > 0",
            self.table()
        );
        self.scalar(conn, "max_right", &sql, ()).await
    }

    /// Live sibling whose span starts right after `node`
    pub(crate) async fn next_sibling_in(
        &self,
        conn: &Connection,
        node: &TreeNode,
    ) -> TreeResult<Option<TreeNode>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE deleted_at IS NULL AND parent_id IS ?1 AND lft = ?2",
            NODE_COLUMNS,
            self.table()
        );
        Ok(self
            .select_nodes(
                conn,
                "next_sibling",
                &sql,
                params![node.parent_id.clone(), node.right + 1],
            )
            .await?
            .into_iter()
            .next())
    }

    // ----- transaction-scoped queries ---------------------------------------

    pub async fn get_in(&self, conn: &Connection, id: &str) -> TreeResult<Option<TreeNode>> {
        Ok(self.fetch_any(conn, id).await?.filter(|n| !n.is_deleted()))
    }

    pub async fn ancestors_in(&self, conn: &Connection, id: &str) -> TreeResult<Vec<TreeNode>> {
        let node = self.require_live(conn, id).await?;
        let sql = format!(
            "SELECT {} FROM {} WHERE deleted_at IS NULL AND lft < ?1 AND rgt > ?2 ORDER BY lft",
            NODE_COLUMNS,
            self.table()
        );
        self.select_nodes(conn, "ancestors", &sql, params![node.left, node.right])
            .await
    }

    pub async fn descendants_in(
        &self,
        conn: &Connection,
        id: &str,
        page: Page,
    ) -> TreeResult<Vec<TreeNode>> {
        let node = self.require_live(conn, id).await?;
        let sql = format!(
            "SELECT {} FROM {} WHERE deleted_at IS NULL AND lft > ?1 AND rgt < ?2
             ORDER BY lft LIMIT ?3 OFFSET ?4",
            NODE_COLUMNS,
            self.table()
        );
        self.select_nodes(
            conn,
            "descendants",
            &sql,
            params![node.left, node.right, page.sql_limit(), page.sql_offset()],
        )
        .await
    }

    pub async fn siblings_in(
        &self,
        conn: &Connection,
        id: &str,
        page: Page,
    ) -> TreeResult<Vec<TreeNode>> {
        let node = self.require_live(conn, id).await?;
        let sql = format!(
            "SELECT {} FROM {} WHERE deleted_at IS NULL AND parent_id IS ?1 AND id != ?2
             ORDER BY lft LIMIT ?3 OFFSET ?4",
            NODE_COLUMNS,
            self.table()
        );
        self.select_nodes(
            conn,
            "siblings",
            &sql,
            params![node.parent_id, node.id, page.sql_limit(), page.sql_offset()],
        )
        .await
    }

    pub async fn children_in(
        &self,
        conn: &Connection,
        id: &str,
        page: Page,
    ) -> TreeResult<Vec<TreeNode>> {
        let node = self.require_live(conn, id).await?;
        let sql = format!(
            "SELECT {} FROM {} WHERE deleted_at IS NULL AND lft > ?1 AND rgt < ?2 AND depth = ?3
             ORDER BY lft LIMIT ?4 OFFSET ?5",
            NODE_COLUMNS,
            self.table()
        );
        self.select_nodes(
            conn,
            "children",
            &sql,
            params![
                node.left,
                node.right,
                node.depth + 1,
                page.sql_limit(),
                page.sql_offset()
            ],
        )
        .await
    }

    /// Root-to-node path, the node included
    pub async fn path_in(&self, conn: &Connection, id: &str) -> TreeResult<Vec<TreeNode>> {
        let node = self.require_live(conn, id).await?;
        let sql = format!(
            "SELECT {} FROM {} WHERE deleted_at IS NULL AND lft <= ?1 AND rgt >= ?2 ORDER BY lft",
            NODE_COLUMNS,
            self.table()
        );
        self.select_nodes(conn, "path", &sql, params![node.left, node.right])
            .await
    }

    /// The node followed by its descendants in pre-order
    pub async fn subtree_in(&self, conn: &Connection, id: &str) -> TreeResult<Vec<TreeNode>> {
        let node = self.require_live(conn, id).await?;
        let sql = format!(
            "SELECT {} FROM {} WHERE deleted_at IS NULL AND lft >= ?1 AND rgt <= ?2 ORDER BY lft",
            NODE_COLUMNS,
            self.table()
        );
        self.select_nodes(conn, "subtree", &sql, params![node.left, node.right])
            .await
    }

    pub async fn roots_in(&self, conn: &Connection) -> TreeResult<Vec<TreeNode>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE deleted_at IS NULL AND parent_id IS NULL ORDER BY lft",
            NODE_COLUMNS,
            self.table()
        );
        self.select_nodes(conn, "roots", &sql, ()).await
    }

    pub async fn leaf_nodes_in(&self, conn: &Connection, page: Page) -> TreeResult<Vec<TreeNode>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE deleted_at IS NULL AND rgt = lft + 1
             ORDER BY lft LIMIT ?1 OFFSET ?2",
            NODE_COLUMNS,
            self.table()
        );
        self.select_nodes(
            conn,
            "leaf_nodes",
            &sql,
            params![page.sql_limit(), page.sql_offset()],
        )
        .await
    }

    pub async fn internal_nodes_in(
        &self,
        conn: &Connection,
        page: Page,
    ) -> TreeResult<Vec<TreeNode>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE deleted_at IS NULL AND rgt > lft + 1
             ORDER BY lft LIMIT ?1 OFFSET ?2",
            NODE_COLUMNS,
            self.table()
        );
        self.select_nodes(
            conn,
            "internal_nodes",
            &sql,
            params![page.sql_limit(), page.sql_offset()],
        )
        .await
    }

    pub async fn subtree_size_in(&self, conn: &Connection, id: &str) -> TreeResult<i64> {
        Ok(self.require_live(conn, id).await?.subtree_size())
    }

    pub async fn tree_height_in(&self, conn: &Connection) -> TreeResult<i64> {
        let sql = format!(
            "SELECT COALESCE(MAX(depth) + 1, 0) FROM {} WHERE deleted_at IS NULL",
            self.table()
        );
        self.scalar(conn, "tree_height", &sql, ()).await
    }

    pub async fn level_width_in(&self, conn: &Connection, depth: i64) -> TreeResult<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE deleted_at IS NULL AND depth = ?1",
            self.table()
        );
        self.scalar(conn, "level_width", &sql, params![depth]).await
    }

    /// `ancestor_id` strictly contains `descendant_id`
    pub async fn is_ancestor_in(
        &self,
        conn: &Connection,
        ancestor_id: &str,
        descendant_id: &str,
    ) -> TreeResult<bool> {
        let ancestor = self.require_live(conn, ancestor_id).await?;
        let descendant = self.require_live(conn, descendant_id).await?;
        Ok(ancestor.contains(&descendant))
    }

    pub async fn node_count_in(&self, conn: &Connection) -> TreeResult<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE deleted_at IS NULL",
            self.table()
        );
        self.scalar(conn, "node_count", &sql, ()).await
    }

    // ----- public queries ---------------------------------------------------

    /// Live node by id
    pub async fn get(&self, ctx: &OpContext, id: &str) -> TreeResult<Option<TreeNode>> {
        ctx.run("get", async {
            let conn = self.reader().await?;
            self.get_in(&conn, id).await
        })
        .await
    }

    /// Ancestors, root first
    pub async fn ancestors(&self, ctx: &OpContext, id: &str) -> TreeResult<Vec<TreeNode>> {
        ctx.run("ancestors", async {
            let conn = self.reader().await?;
            self.ancestors_in(&conn, id).await
        })
        .await
    }

    /// Descendants in pre-order
    pub async fn descendants(
        &self,
        ctx: &OpContext,
        id: &str,
        page: Page,
    ) -> TreeResult<Vec<TreeNode>> {
        ctx.run("descendants", async {
            let conn = self.reader().await?;
            self.descendants_in(&conn, id, page).await
        })
        .await
    }

    /// Other children of the same parent, in order
    pub async fn siblings(&self, ctx: &OpContext, id: &str, page: Page) -> TreeResult<Vec<TreeNode>> {
        ctx.run("siblings", async {
            let conn = self.reader().await?;
            self.siblings_in(&conn, id, page).await
        })
        .await
    }

    pub async fn children(&self, ctx: &OpContext, id: &str, page: Page) -> TreeResult<Vec<TreeNode>> {
        ctx.run("children", async {
            let conn = self.reader().await?;
            self.children_in(&conn, id, page).await
        })
        .await
    }

    pub async fn path(&self, ctx: &OpContext, id: &str) -> TreeResult<Vec<TreeNode>> {
        ctx.run("path", async {
            let conn = self.reader().await?;
            self.path_in(&conn, id).await
        })
        .await
    }

    pub async fn subtree(&self, ctx: &OpContext, id: &str) -> TreeResult<Vec<TreeNode>> {
        ctx.run("subtree", async {
            let conn = self.reader().await?;
            self.subtree_in(&conn, id).await
        })
        .await
    }

    pub async fn roots(&self, ctx: &OpContext) -> TreeResult<Vec<TreeNode>> {
        ctx.run("roots", async {
            let conn = self.reader().await?;
            self.roots_in(&conn).await
        })
        .await
    }

    pub async fn leaf_nodes(&self, ctx: &OpContext, page: Page) -> TreeResult<Vec<TreeNode>> {
        ctx.run("leaf_nodes", async {
            let conn = self.reader().await?;
            self.leaf_nodes_in(&conn, page).await
        })
        .await
    }

    pub async fn internal_nodes(&self, ctx: &OpContext, page: Page) -> TreeResult<Vec<TreeNode>> {
        ctx.run("internal_nodes", async {
            let conn = self.reader().await?;
            self.internal_nodes_in(&conn, page).await
        })
        .await
    }

    /// Number of descendants, from one row fetch
    pub async fn subtree_size(&self, ctx: &OpContext, id: &str) -> TreeResult<i64> {
        ctx.run("subtree_size", async {
            let conn = self.reader().await?;
            self.subtree_size_in(&conn, id).await
        })
        .await
    }

    /// `max(depth) + 1`, 0 when empty
    pub async fn tree_height(&self, ctx: &OpContext) -> TreeResult<i64> {
        ctx.run("tree_height", async {
            let conn = self.reader().await?;
            self.tree_height_in(&conn).await
        })
        .await
    }

    pub async fn level_width(&self, ctx: &OpContext, depth: i64) -> TreeResult<i64> {
        ctx.run("level_width", async {
            let conn = self.reader().await?;
            self.level_width_in(&conn, depth).await
        })
        .await
    }

    pub async fn is_ancestor(
        &self,
        ctx: &OpContext,
        ancestor_id: &str,
        descendant_id: &str,
    ) -> TreeResult<bool> {
        ctx.run("is_ancestor", async {
            let conn = self.reader().await?;
            self.is_ancestor_in(&conn, ancestor_id, descendant_id).await
        })
        .await
    }

    pub async fn node_count(&self, ctx: &OpContext) -> TreeResult<i64> {
        ctx.run("node_count", async {
            let conn = self.reader().await?;
            self.node_count_in(&conn).await
        })
        .await
    }
}
