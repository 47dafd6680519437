//! Range Shifter
//!
//! The two bulk updates every structural mutation is built from:
//!
//! - [`shift`] opens or closes a gap by moving every live boundary at or
//!   beyond a pivot.
//! - [`translate`] moves a closed band of rows (one subtree) by an offset,
//!   adjusting depth on the way.
//!
//! Both run on the caller's connection, so inside a [`TreeTx`](super::TreeTx)
//! they commit or roll back with the rest of the mutation. Tombstones are
//! never touched.

use crate::models::now_timestamp;
use crate::tree::error::{TreeError, TreeResult};
use libsql::{params, Connection, Rows};

/// Which boundary a shift applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftSelector {
    Left,
    Right,
    /// Each boundary independently, so ancestors spanning the pivot only
    /// move their right boundary
    Both,
}

/// A closed boundary interval `[low, high]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub low: i64,
    pub high: i64,
}

impl Band {
    pub fn new(low: i64, high: i64) -> Self {
        Self { low, high }
    }

    pub fn width(&self) -> i64 {
        self.high - self.low + 1
    }
}

/// Add `delta` to the selected boundary of every live row whose selected
/// boundary is `>= pivot`; returns the ids of touched rows
pub async fn shift(
    conn: &Connection,
    table: &str,
    pivot: i64,
    delta: i64,
    selector: ShiftSelector,
) -> TreeResult<Vec<String>> {
    if delta == 0 {
        return Ok(Vec::new());
    }

    let sql = match selector {
        ShiftSelector::Left => format!(
            "UPDATE {table} SET lft = lft + ?2, updated_at = ?3
             WHERE deleted_at IS NULL AND lft >= ?1
             RETURNING id"
        ),
        ShiftSelector::Right => format!(
            "UPDATE {table} SET rgt = rgt + ?2, updated_at = ?3
             WHERE deleted_at IS NULL AND rgt >= ?1
             RETURNING id"
        ),
        ShiftSelector::Both => format!(
            "UPDATE {table} SET
                lft = CASE WHEN lft >= ?1 THEN lft + ?2 ELSE lft END,
                rgt = CASE WHEN rgt >= ?1 THEN rgt + ?2 ELSE rgt END,
                updated_at = ?3
             WHERE deleted_at IS NULL AND (lft >= ?1 OR rgt >= ?1)
             RETURNING id"
        ),
    };

    let rows = conn
        .query(&sql, params![pivot, delta, now_timestamp()])
        .await
        .map_err(|e| TreeError::storage(table, "shift", e))?;
    let touched = collect_ids(rows, table).await?;

    tracing::debug!(
        "Shifted {} row(s) in '{}' at pivot {} by {} ({:?})",
        touched.len(),
        table,
        pivot,
        delta,
        selector
    );
    Ok(touched)
}

/// Add `offset` to both boundaries and `depth_delta` to the depth of every
/// live row inside `band`; returns the ids of touched rows
pub async fn translate(
    conn: &Connection,
    table: &str,
    band: Band,
    offset: i64,
    depth_delta: i64,
) -> TreeResult<Vec<String>> {
    let sql = format!(
        "UPDATE {table} SET
            lft = lft + ?3,
            rgt = rgt + ?3,
            depth = depth + ?4,
            updated_at = ?5
         WHERE deleted_at IS NULL AND lft >= ?1 AND rgt <= ?2
         RETURNING id"
    );

    let rows = conn
        .query(
            &sql,
            params![band.low, band.high, offset, depth_delta, now_timestamp()],
        )
        .await
        .map_err(|e| TreeError::storage(table, "translate", e))?;
    let touched = collect_ids(rows, table).await?;

    tracing::debug!(
        "Translated {} row(s) in '{}' from [{}, {}] by {} (depth {:+})",
        touched.len(),
        table,
        band.low,
        band.high,
        offset,
        depth_delta
    );
    Ok(touched)
}

/// Exchange two disjoint bands of equal width in one statement
pub async fn swap_bands(
    conn: &Connection,
    table: &str,
    first: Band,
    second: Band,
) -> TreeResult<Vec<String>> {
    if first.width() != second.width() {
        return Err(TreeError::invalid_argument(format!(
            "cannot swap bands of width {} and {}",
            first.width(),
            second.width()
        )));
    }
    let distance = second.low - first.low;

    let sql = format!(
        "UPDATE {table} SET
            lft = CASE WHEN lft >= ?1 AND rgt <= ?2 THEN lft + ?5 ELSE lft - ?5 END,
            rgt = CASE WHEN lft >= ?1 AND rgt <= ?2 THEN rgt + ?5 ELSE rgt - ?5 END,
            updated_at = ?6
         WHERE deleted_at IS NULL
           AND ((lft >= ?1 AND rgt <= ?2) OR (lft >= ?3 AND rgt <= ?4))
         RETURNING id"
    );

    let rows = conn
        .query(
            &sql,
            params![
                first.low,
                first.high,
                second.low,
                second.high,
                distance,
                now_timestamp()
            ],
        )
        .await
        .map_err(|e| TreeError::storage(table, "swap", e))?;
    let touched = collect_ids(rows, table).await?;

    tracing::debug!(
        "Swapped bands [{}, {}] and [{}, {}] in '{}' ({} row(s))",
        first.low,
        first.high,
        second.low,
        second.high,
        table,
        touched.len()
    );
    Ok(touched)
}

pub(crate) async fn collect_ids(mut rows: Rows, table: &str) -> TreeResult<Vec<String>> {
    let mut ids = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| TreeError::storage(table, "read rows", e))?
    {
        let id: String = row
            .get(0)
            .map_err(|e| TreeError::storage(table, "read id", e))?;
        ids.push(id);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArborConfig;
    use crate::db::{DatabaseService, TreeNamespace};
    use tempfile::TempDir;

    async fn seeded(temp_dir: &TempDir) -> Connection {
        let service = DatabaseService::new(&ArborConfig::for_path(temp_dir.path().join("t.db")))
            .await
            .unwrap();
        service
            .ensure_namespace(&TreeNamespace::new("nodes").unwrap())
            .await
            .unwrap();
        let conn = service.connect_with_timeout().await.unwrap();

        // R(1,8) > A(2,5) > B(3,4); C(6,7) under R
        for (id, parent, lft, rgt, depth) in [
            ("R", None, 1, 8, 0),
            ("A", Some("R"), 2, 5, 1),
            ("B", Some("A"), 3, 4, 2),
            ("C", Some("R"), 6, 7, 1),
        ] {
            conn.execute(
                "INSERT INTO nodes (id, parent_id, lft, rgt, depth, ordering, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
                params![id, parent, lft, rgt, depth, now_timestamp()],
            )
            .await
            .unwrap();
        }
        conn
    }

    async fn bounds(conn: &Connection, id: &str) -> (i64, i64, i64) {
        let mut rows = conn
            .query("SELECT lft, rgt, depth FROM nodes WHERE id = ?1", [id])
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        (
            row.get(0).unwrap(),
            row.get(1).unwrap(),
            row.get(2).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_shift_both_moves_ancestors_right_only() {
        let temp_dir = TempDir::new().unwrap();
        let conn = seeded(&temp_dir).await;

        // Open a gap of 2 at C's left boundary
        let mut touched = shift(&conn, "nodes", 6, 2, ShiftSelector::Both)
            .await
            .unwrap();
        touched.sort();
        assert_eq!(touched, vec!["C", "R"]);

        assert_eq!(bounds(&conn, "R").await, (1, 10, 0));
        assert_eq!(bounds(&conn, "A").await, (2, 5, 1));
        assert_eq!(bounds(&conn, "C").await, (8, 9, 1));
    }

    #[tokio::test]
    async fn test_shift_single_boundary_selectors() {
        let temp_dir = TempDir::new().unwrap();
        let conn = seeded(&temp_dir).await;

        let touched = shift(&conn, "nodes", 7, 2, ShiftSelector::Right).await.unwrap();
        assert_eq!(touched.len(), 2);
        assert_eq!(bounds(&conn, "C").await, (6, 9, 1));
        assert_eq!(bounds(&conn, "R").await, (1, 10, 0));

        let touched = shift(&conn, "nodes", 6, 1, ShiftSelector::Left).await.unwrap();
        assert_eq!(touched, vec!["C"]);
        assert_eq!(bounds(&conn, "C").await, (7, 9, 1));
    }

    #[tokio::test]
    async fn test_shift_skips_tombstones() {
        let temp_dir = TempDir::new().unwrap();
        let conn = seeded(&temp_dir).await;
        conn.execute(
            "UPDATE nodes SET deleted_at = ?1 WHERE id = 'C'",
            [now_timestamp()],
        )
        .await
        .unwrap();

        shift(&conn, "nodes", 6, 4, ShiftSelector::Both).await.unwrap();
        assert_eq!(bounds(&conn, "C").await, (6, 7, 1));
        assert_eq!(bounds(&conn, "R").await, (1, 12, 0));
    }

    #[tokio::test]
    async fn test_translate_band_with_depth() {
        let temp_dir = TempDir::new().unwrap();
        let conn = seeded(&temp_dir).await;

        let mut touched = translate(&conn, "nodes", Band::new(2, 5), -6, 1)
            .await
            .unwrap();
        touched.sort();
        assert_eq!(touched, vec!["A", "B"]);
        assert_eq!(bounds(&conn, "A").await, (-4, -1, 2));
        assert_eq!(bounds(&conn, "B").await, (-3, -2, 3));
        assert_eq!(bounds(&conn, "C").await, (6, 7, 1));
    }

    #[tokio::test]
    async fn test_swap_equal_width_bands() {
        let temp_dir = TempDir::new().unwrap();
        let conn = seeded(&temp_dir).await;
        // Make A a leaf-width sibling of C by removing B from the picture
        conn.execute("DELETE FROM nodes WHERE id = 'B'", ()).await.unwrap();
        conn.execute("UPDATE nodes SET rgt = 3 WHERE id = 'A'", ())
            .await
            .unwrap();

        swap_bands(&conn, "nodes", Band::new(2, 3), Band::new(6, 7))
            .await
            .unwrap();
        assert_eq!(bounds(&conn, "A").await, (6, 7, 1));
        assert_eq!(bounds(&conn, "C").await, (2, 3, 1));

        let err = swap_bands(&conn, "nodes", Band::new(2, 3), Band::new(5, 8))
            .await
            .unwrap_err();
        assert!(matches!(err, TreeError::InvalidArgument { .. }));
    }
}
