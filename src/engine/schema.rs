//! SQL used by the SQLite document engine
//!
//! Every collection is its own table of `(id, body)` rows where `body` is
//! the JSON text of the document.

/// Private table holding engine metadata (key digest)
pub const META_TABLE: &str = "__docrepo_meta";

pub const CREATE_META_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS __docrepo_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

pub const SELECT_META: &str = "SELECT value FROM __docrepo_meta WHERE key = ?1";

pub const UPSERT_META: &str =
    "INSERT INTO __docrepo_meta (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value";

pub const KEY_DIGEST: &str = "key_digest";

pub const TABLE_EXISTS: &str =
    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1";

pub const COUNT_USER_TABLES: &str =
    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE '\\_\\_%' ESCAPE '\\' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'";

pub fn create_collection_table(name: &str) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS "{name}" (
    id TEXT PRIMARY KEY,
    body TEXT NOT NULL
)"#
    )
}

pub fn drop_collection_table(name: &str) -> String {
    format!(r#"DROP TABLE IF EXISTS "{name}""#)
}

pub fn count(name: &str) -> String {
    format!(r#"SELECT COUNT(*) FROM "{name}""#)
}

pub fn select_all(name: &str) -> String {
    format!(r#"SELECT id, body FROM "{name}" ORDER BY id"#)
}

pub fn select_by_id(name: &str) -> String {
    format!(r#"SELECT id, body FROM "{name}" WHERE id = ?1"#)
}

pub fn upsert(name: &str) -> String {
    format!(
        r#"INSERT INTO "{name}" (id, body) VALUES (?1, ?2)
ON CONFLICT(id) DO UPDATE SET body = excluded.body"#
    )
}

pub fn insert(name: &str) -> String {
    format!(r#"INSERT INTO "{name}" (id, body) VALUES (?1, ?2)"#)
}

pub fn delete_all(name: &str) -> String {
    format!(r#"DELETE FROM "{name}""#)
}

pub fn delete_by_id(name: &str) -> String {
    format!(r#"DELETE FROM "{name}" WHERE id = ?1"#)
}

/// Expression index over a top-level JSON member of `body`
pub fn create_index(collection: &str, field: &str, unique: bool) -> String {
    let unique = if unique { "UNIQUE " } else { "" };
    format!(
        r#"CREATE {unique}INDEX IF NOT EXISTS "idx__{collection}__{field}" ON "{collection}" (json_extract(body, '$.{field}'))"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_statement() {
        let sql = create_index("Orders", "customer", true);
        assert!(sql.starts_with("CREATE UNIQUE INDEX IF NOT EXISTS \"idx__Orders__customer\""));
        assert!(sql.contains("json_extract(body, '$.customer')"));
    }

    #[test]
    fn test_index_names_do_not_collide() {
        let left = create_index("a_b", "c", true);
        let right = create_index("a", "b_c", true);
        assert!(left.contains("\"idx__a_b__c\""));
        assert!(right.contains("\"idx__a__b_c\""));
    }
}
