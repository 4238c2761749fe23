//! SQLite-backed reference store: items, stages, time ranges, drop infos,
//! accounts, properties, and the pre-aggregated matrix element tables the
//! refresh pipelines write.

use std::collections::HashMap;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};

use crate::models::matrix::{DropMatrixElement, PatternMatrixElement, QuantityBuckets};
use crate::models::reference::{
    Account, DropInfo, DropPatternElement, Item, Stage, TimeRange, datetime_from_millis,
};

pub struct RefDb {
    conn: Mutex<Connection>,
}

impl RefDb {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        Ok(db)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS items (
                item_id     INTEGER PRIMARY KEY,
                ark_item_id TEXT NOT NULL UNIQUE,
                name        TEXT NOT NULL,
                sort_id     INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS stages (
                stage_id     INTEGER PRIMARY KEY,
                ark_stage_id TEXT NOT NULL UNIQUE,
                zone_id      INTEGER NOT NULL DEFAULT 0,
                sort_id      INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS time_ranges (
                range_id   INTEGER PRIMARY KEY,
                server     TEXT NOT NULL,
                start_time INTEGER NOT NULL,
                end_time   INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_time_ranges_server ON time_ranges(server);

            CREATE TABLE IF NOT EXISTS drop_infos (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                server      TEXT NOT NULL,
                stage_id    INTEGER NOT NULL REFERENCES stages(stage_id),
                item_id     INTEGER REFERENCES items(item_id),
                range_id    INTEGER NOT NULL REFERENCES time_ranges(range_id),
                accumulable INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_drop_infos_server ON drop_infos(server);

            CREATE TABLE IF NOT EXISTS drop_patterns (
                pattern_id INTEGER PRIMARY KEY,
                hash       TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS drop_pattern_elements (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                pattern_id INTEGER NOT NULL REFERENCES drop_patterns(pattern_id),
                item_id    INTEGER NOT NULL REFERENCES items(item_id),
                quantity   INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_drop_pattern_elements_pattern
                ON drop_pattern_elements(pattern_id);

            CREATE TABLE IF NOT EXISTS accounts (
                account_id INTEGER PRIMARY KEY,
                public_id  TEXT NOT NULL UNIQUE,
                token      TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS properties (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS drop_matrix_elements (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                server           TEXT NOT NULL,
                stage_id         INTEGER NOT NULL,
                item_id          INTEGER NOT NULL,
                range_id         INTEGER NOT NULL,
                quantity         INTEGER NOT NULL,
                times            INTEGER NOT NULL,
                quantity_buckets TEXT NOT NULL DEFAULT '{}',
                UNIQUE(server, stage_id, item_id, range_id)
            );

            CREATE TABLE IF NOT EXISTS pattern_matrix_elements (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                server     TEXT NOT NULL,
                stage_id   INTEGER NOT NULL,
                pattern_id INTEGER NOT NULL,
                range_id   INTEGER NOT NULL,
                quantity   INTEGER NOT NULL,
                times      INTEGER NOT NULL,
                UNIQUE(server, stage_id, pattern_id, range_id)
            );
            ",
        )?;
        Ok(())
    }

    pub fn get_items(&self) -> anyhow::Result<Vec<Item>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT item_id, ark_item_id, name, sort_id FROM items ORDER BY sort_id")?;
        let items = stmt
            .query_map([], |row| {
                Ok(Item {
                    item_id: row.get(0)?,
                    ark_item_id: row.get(1)?,
                    name: row.get(2)?,
                    sort_id: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn get_stages(&self) -> anyhow::Result<Vec<Stage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT stage_id, ark_stage_id, zone_id, sort_id FROM stages ORDER BY sort_id")?;
        let stages = stmt
            .query_map([], |row| {
                Ok(Stage {
                    stage_id: row.get(0)?,
                    ark_stage_id: row.get(1)?,
                    zone_id: row.get(2)?,
                    sort_id: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(stages)
    }

    pub fn get_time_ranges_by_server(&self, server: &str) -> anyhow::Result<Vec<TimeRange>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT range_id, start_time, end_time FROM time_ranges
             WHERE server = ?1 ORDER BY start_time",
        )?;
        let ranges = stmt
            .query_map(params![server], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ranges
            .into_iter()
            .map(|(range_id, start, end)| TimeRange {
                range_id,
                start_time: datetime_from_millis(start),
                end_time: datetime_from_millis(end),
            })
            .collect())
    }

    pub fn get_time_range_by_id(&self, range_id: i64) -> anyhow::Result<Option<TimeRange>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT range_id, start_time, end_time FROM time_ranges WHERE range_id = ?1",
                params![range_id],
                |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
                },
            )
            .optional()?;
        Ok(row.map(|(range_id, start, end)| TimeRange {
            range_id,
            start_time: datetime_from_millis(start),
            end_time: datetime_from_millis(end),
        }))
    }

    pub fn get_drop_infos_by_server(&self, server: &str) -> anyhow::Result<Vec<DropInfo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT server, stage_id, item_id, range_id, accumulable FROM drop_infos
             WHERE server = ?1",
        )?;
        let infos = stmt
            .query_map(params![server], |row| {
                Ok(DropInfo {
                    server: row.get(0)?,
                    stage_id: row.get(1)?,
                    item_id: row.get(2)?,
                    range_id: row.get(3)?,
                    accumulable: row.get::<_, i64>(4)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(infos)
    }

    /// Item composition of one drop pattern, ordered by item id.
    pub fn get_drop_pattern_elements_by_pattern_id(
        &self,
        pattern_id: i64,
    ) -> anyhow::Result<Vec<DropPatternElement>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT pattern_id, item_id, quantity FROM drop_pattern_elements
             WHERE pattern_id = ?1 ORDER BY item_id",
        )?;
        let elements = stmt
            .query_map(params![pattern_id], |row| {
                Ok(DropPatternElement {
                    pattern_id: row.get(0)?,
                    item_id: row.get(1)?,
                    quantity: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(elements)
    }

    pub fn get_account_by_token(&self, token: &str) -> anyhow::Result<Option<Account>> {
        let conn = self.conn.lock().unwrap();
        let account = conn
            .query_row(
                "SELECT account_id, public_id FROM accounts WHERE token = ?1",
                params![token],
                |row| {
                    Ok(Account {
                        account_id: row.get(0)?,
                        public_id: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(account)
    }

    pub fn get_properties(&self) -> anyhow::Result<HashMap<String, String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT key, value FROM properties")?;
        let properties = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<HashMap<String, String>, _>>()?;
        Ok(properties)
    }

    /// Atomically replaces every drop matrix element of `server`.
    pub fn replace_drop_matrix_elements(
        &self,
        server: &str,
        elements: &[DropMatrixElement],
    ) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM drop_matrix_elements WHERE server = ?1",
            params![server],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO drop_matrix_elements
                 (server, stage_id, item_id, range_id, quantity, times, quantity_buckets)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for el in elements {
                let buckets = serde_json::to_string(&el.quantity_buckets)?;
                stmt.execute(params![
                    el.server,
                    el.stage_id,
                    el.item_id,
                    el.range_id,
                    el.quantity,
                    el.times,
                    buckets,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_drop_matrix_elements_by_server(
        &self,
        server: &str,
    ) -> anyhow::Result<Vec<DropMatrixElement>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT server, stage_id, item_id, range_id, quantity, times, quantity_buckets
             FROM drop_matrix_elements WHERE server = ?1",
        )?;
        let rows = stmt
            .query_map(params![server], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(server, stage_id, item_id, range_id, quantity, times, buckets)| {
                let quantity_buckets: QuantityBuckets = serde_json::from_str(&buckets)?;
                Ok(DropMatrixElement {
                    server,
                    stage_id,
                    item_id,
                    range_id,
                    quantity,
                    times,
                    quantity_buckets,
                    time_range: None,
                })
            })
            .collect()
    }

    /// Atomically replaces every pattern matrix element of `server`.
    pub fn replace_pattern_matrix_elements(
        &self,
        server: &str,
        elements: &[PatternMatrixElement],
    ) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM pattern_matrix_elements WHERE server = ?1",
            params![server],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO pattern_matrix_elements
                 (server, stage_id, pattern_id, range_id, quantity, times)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for el in elements {
                stmt.execute(params![
                    el.server,
                    el.stage_id,
                    el.pattern_id,
                    el.range_id,
                    el.quantity,
                    el.times,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_pattern_matrix_elements_by_server(
        &self,
        server: &str,
    ) -> anyhow::Result<Vec<PatternMatrixElement>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT server, stage_id, pattern_id, range_id, quantity, times
             FROM pattern_matrix_elements WHERE server = ?1",
        )?;
        let elements = stmt
            .query_map(params![server], |row| {
                Ok(PatternMatrixElement {
                    server: row.get(0)?,
                    stage_id: row.get(1)?,
                    pattern_id: row.get(2)?,
                    range_id: row.get(3)?,
                    quantity: row.get(4)?,
                    times: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(elements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn element(server: &str, stage: i64, item: i64, range: i64) -> DropMatrixElement {
        DropMatrixElement {
            server: server.to_string(),
            stage_id: stage,
            item_id: item,
            range_id: range,
            quantity: 5,
            times: 10,
            quantity_buckets: BTreeMap::from([(1, 3), (2, 1)]),
            time_range: None,
        }
    }

    #[test]
    fn replace_drop_matrix_elements_is_whole_server() {
        let db = RefDb::open_in_memory().unwrap();
        db.replace_drop_matrix_elements("CN", &[element("CN", 1, 1, 1), element("CN", 1, 2, 1)])
            .unwrap();
        db.replace_drop_matrix_elements("US", &[element("US", 9, 9, 9)])
            .unwrap();

        db.replace_drop_matrix_elements("CN", &[element("CN", 2, 3, 4)])
            .unwrap();

        let cn = db.get_drop_matrix_elements_by_server("CN").unwrap();
        assert_eq!(cn.len(), 1);
        assert_eq!(cn[0].stage_id, 2);
        assert_eq!(cn[0].quantity_buckets, BTreeMap::from([(1, 3), (2, 1)]));

        // other servers untouched
        assert_eq!(db.get_drop_matrix_elements_by_server("US").unwrap().len(), 1);
    }

    #[test]
    fn drop_pattern_elements_read_in_item_order() {
        let db = RefDb::open_in_memory().unwrap();
        {
            let conn = db.conn.lock().unwrap();
            conn.execute_batch(
                "INSERT INTO items (item_id, ark_item_id, name) VALUES (10, '30012', 'Item 10'), (11, '30013', 'Item 11');
                 INSERT INTO drop_patterns (pattern_id, hash) VALUES (1, '30012:2|30013:1');
                 INSERT INTO drop_pattern_elements (pattern_id, item_id, quantity)
                 VALUES (1, 11, 1), (1, 10, 2);",
            )
            .unwrap();
        }
        let elements = db.get_drop_pattern_elements_by_pattern_id(1).unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!((elements[0].item_id, elements[0].quantity), (10, 2));
        assert_eq!((elements[1].item_id, elements[1].quantity), (11, 1));
        assert!(db.get_drop_pattern_elements_by_pattern_id(2).unwrap().is_empty());
    }

    #[test]
    fn time_range_roundtrip() {
        let db = RefDb::open_in_memory().unwrap();
        {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO time_ranges (range_id, server, start_time, end_time)
                 VALUES (1, 'CN', 1000, 2000)",
                [],
            )
            .unwrap();
        }
        let ranges = db.get_time_ranges_by_server("CN").unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].range_id, 1);
        assert_eq!(ranges[0].start_millis(), 1000);
        assert_eq!(db.get_time_ranges_by_server("US").unwrap().len(), 0);
        assert!(db.get_time_range_by_id(2).unwrap().is_none());
    }
}
