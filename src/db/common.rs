//! SQL text shared by every backend.
//!
//! Identifiers come from validated configuration (see `ArchiveConfig::validate`)
//! and are quoted per dialect; values are always bound as parameters.

use crate::config::ArchiveConfig;

/// The table being archived and the two columns the archiver relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTarget {
    pub table: String,
    pub id_column: String,
    pub timestamp_column: String,
}

impl From<&ArchiveConfig> for TableTarget {
    fn from(config: &ArchiveConfig) -> Self {
        Self {
            table: config.table.clone(),
            id_column: config.id_column.clone(),
            timestamp_column: config.timestamp_column.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Mysql,
    Postgres,
}

impl Dialect {
    /// Quote a possibly schema-qualified identifier.
    pub fn quote(&self, ident: &str) -> String {
        ident
            .split('.')
            .map(|part| match self {
                Dialect::Mysql => format!("`{part}`"),
                Dialect::Sqlite | Dialect::Postgres => format!("\"{part}\""),
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Bind placeholder for the 1-based parameter `n`.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${n}"),
            Dialect::Sqlite | Dialect::Mysql => "?".to_string(),
        }
    }

    fn placeholders(&self, count: usize) -> String {
        (1..=count)
            .map(|n| self.placeholder(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Oldest rows first, so a row limit archives the most aged data.
    pub fn select_aged(&self, target: &TableTarget, limit: Option<u64>) -> String {
        let mut sql = format!(
            "SELECT * FROM {table} WHERE {ts} < {p} ORDER BY {ts}, {id}",
            table = self.quote(&target.table),
            ts = self.quote(&target.timestamp_column),
            id = self.quote(&target.id_column),
            p = self.placeholder(1),
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        sql
    }

    pub fn delete_by_ids(&self, target: &TableTarget, count: usize) -> String {
        format!(
            "DELETE FROM {table} WHERE {id} IN ({params})",
            table = self.quote(&target.table),
            id = self.quote(&target.id_column),
            params = self.placeholders(count),
        )
    }

    pub fn copy_by_ids(&self, target: &TableTarget, recovery_table: &str, count: usize) -> String {
        format!(
            "INSERT INTO {recovery} SELECT * FROM {table} WHERE {id} IN ({params})",
            recovery = self.quote(recovery_table),
            table = self.quote(&target.table),
            id = self.quote(&target.id_column),
            params = self.placeholders(count),
        )
    }
}

/// Split keys into statement-sized chunks. A zero batch size is treated as one.
pub fn key_batches<T>(keys: &[T], batch_size: u32) -> std::slice::Chunks<'_, T> {
    keys.chunks(batch_size.max(1) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> TableTarget {
        TableTarget {
            table: "ops.run".to_string(),
            id_column: "run_id".to_string(),
            timestamp_column: "msg_sent_date".to_string(),
        }
    }

    #[test]
    fn test_quote_per_dialect() {
        assert_eq!(Dialect::Mysql.quote("ops.run"), "`ops`.`run`");
        assert_eq!(Dialect::Postgres.quote("ops.run"), "\"ops\".\"run\"");
        assert_eq!(Dialect::Sqlite.quote("run"), "\"run\"");
    }

    #[test]
    fn test_select_aged() {
        assert_eq!(
            Dialect::Mysql.select_aged(&target(), None),
            "SELECT * FROM `ops`.`run` WHERE `msg_sent_date` < ? ORDER BY `msg_sent_date`, `run_id`"
        );
        assert_eq!(
            Dialect::Postgres.select_aged(&target(), Some(500)),
            "SELECT * FROM \"ops\".\"run\" WHERE \"msg_sent_date\" < $1 \
             ORDER BY \"msg_sent_date\", \"run_id\" LIMIT 500"
        );
    }

    #[test]
    fn test_delete_by_ids() {
        assert_eq!(
            Dialect::Sqlite.delete_by_ids(&target(), 3),
            "DELETE FROM \"ops\".\"run\" WHERE \"run_id\" IN (?, ?, ?)"
        );
        assert_eq!(
            Dialect::Postgres.delete_by_ids(&target(), 2),
            "DELETE FROM \"ops\".\"run\" WHERE \"run_id\" IN ($1, $2)"
        );
    }

    #[test]
    fn test_copy_by_ids() {
        assert_eq!(
            Dialect::Mysql.copy_by_ids(&target(), "run_archive", 1),
            "INSERT INTO `run_archive` SELECT * FROM `ops`.`run` WHERE `run_id` IN (?)"
        );
    }

    #[test]
    fn test_key_batches() {
        let keys: Vec<u32> = (0..2500).collect();
        let sizes: Vec<usize> = key_batches(&keys, 1000).map(|c| c.len()).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);

        let sizes: Vec<usize> = key_batches(&keys[..2], 0).map(|c| c.len()).collect();
        assert_eq!(sizes, vec![1, 1]);
    }
}
