//! In-memory store used by the engine tests.
#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use store::{Store, StoreError};

/// In-memory stand-in for the columnar store. Understands exactly the SQL
/// shapes the engine issues: the `system.columns` probe, the head-cursor
/// read, and `DELETE ... WHERE` reconciliation. Inserts can be failed or
/// gated per table to script flush behavior.
pub struct MiniStore {
    columns: Vec<(String, String, String)>,
    tables: Mutex<HashMap<String, Vec<Value>>>,
    failing: Mutex<HashSet<String>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    commands: Mutex<Vec<String>>,
    inserts: Mutex<Vec<(String, usize)>>,
}

impl MiniStore {
    pub fn new(columns: &[(&str, &str, &str)]) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|(t, n, ty)| ((*t).to_owned(), (*n).to_owned(), (*ty).to_owned()))
                .collect(),
            tables: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            gates: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
            inserts: Mutex::new(Vec::new()),
        }
    }

    /// A `blocks` table plus item tables, each with `block_number UInt64`
    /// and `block_hash String`.
    pub fn with_tables(item_tables: &[&str]) -> Self {
        let mut columns = vec![
            ("blocks", "number", "UInt64"),
            ("blocks", "hash", "String"),
            ("blocks", "parent_hash", "String"),
        ];
        for table in item_tables {
            columns.push((table, "block_number", "UInt64"));
            columns.push((table, "block_hash", "String"));
        }
        Self::new(&columns)
    }

    /// Rows currently in `table`, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables.lock().expect("lock poisoned").get(table).cloned().unwrap_or_default()
    }

    /// Block numbers currently in `table` under `column`, sorted.
    pub fn block_numbers(&self, table: &str, column: &str) -> Vec<u64> {
        let mut numbers: Vec<u64> =
            self.rows(table).iter().filter_map(|r| r[column].as_u64()).collect();
        numbers.sort_unstable();
        numbers
    }

    /// Pre-populate a table, as if a previous run had written it.
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        self.tables.lock().expect("lock poisoned").entry(table.to_owned()).or_default().extend(rows);
    }

    /// Make every insert into `table` fail with a server error.
    pub fn fail_inserts(&self, table: &str) {
        self.failing.lock().expect("lock poisoned").insert(table.to_owned());
    }

    /// Gate inserts into `table`: each insert consumes one permit from the
    /// returned semaphore before it lands.
    pub fn gate_inserts(&self, table: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates.lock().expect("lock poisoned").insert(table.to_owned(), Arc::clone(&gate));
        gate
    }

    /// Every command executed so far.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("lock poisoned").clone()
    }

    /// `(table, row_count)` per completed insert, in completion order.
    pub fn inserts(&self) -> Vec<(String, usize)> {
        self.inserts.lock().expect("lock poisoned").clone()
    }

    /// Current contents of every table.
    pub fn snapshot(&self) -> HashMap<String, Vec<Value>> {
        self.tables.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl Store for MiniStore {
    async fn query_rows(&self, sql: &str) -> Result<Vec<Value>, StoreError> {
        if sql.contains("system.columns") {
            return Ok(self
                .columns
                .iter()
                .map(|(table, name, ty)| json!({"table": table, "name": name, "type": ty}))
                .collect());
        }
        if sql.contains(".blocks") && sql.contains("ORDER BY number DESC") {
            let limit: usize = sql
                .rsplit("LIMIT ")
                .next()
                .and_then(|rest| rest.trim().parse().ok())
                .unwrap_or(1);
            let mut rows = self.rows("blocks");
            rows.sort_by_key(|r| std::cmp::Reverse(r["number"].as_u64().unwrap_or(0)));
            rows.truncate(limit);
            return Ok(rows
                .into_iter()
                .map(|r| json!({"number": r["number"], "hash": r["hash"]}))
                .collect());
        }
        panic!("MiniStore got unexpected query: {sql}");
    }

    async fn command(&self, sql: &str) -> Result<(), StoreError> {
        self.commands.lock().expect("lock poisoned").push(sql.to_owned());

        let rest = sql
            .strip_prefix("DELETE FROM ")
            .unwrap_or_else(|| panic!("MiniStore got unexpected command: {sql}"));
        let (target, predicate) =
            rest.split_once(" WHERE ").unwrap_or_else(|| panic!("unqualified delete: {sql}"));
        let table = target.rsplit('.').next().expect("db-qualified table").to_owned();

        let mut tables = self.tables.lock().expect("lock poisoned");
        let rows = tables.entry(table).or_default();
        if let Some(bound) = predicate.strip_prefix("block_number > ") {
            let bound: u64 = bound.trim().parse().expect("numeric bound");
            rows.retain(|r| r["block_number"].as_u64().unwrap_or(0) <= bound);
        } else if predicate.starts_with("block_number >= 0") {
            rows.clear();
        } else if let Some(bound) = predicate.strip_prefix("number > ") {
            let bound: u64 = bound.trim().parse().expect("numeric bound");
            rows.retain(|r| r["number"].as_u64().unwrap_or(0) <= bound);
        } else {
            panic!("MiniStore got unexpected delete predicate: {predicate}");
        }
        Ok(())
    }

    async fn insert(&self, table: &str, body: Bytes) -> Result<(), StoreError> {
        let gate = self.gates.lock().expect("lock poisoned").get(table).cloned();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        if self.failing.lock().expect("lock poisoned").contains(table) {
            return Err(StoreError::Server {
                status: 500,
                message: format!("insert into {table} rejected"),
            });
        }

        let text = String::from_utf8(body.to_vec()).expect("utf-8 body");
        let rows: Vec<Value> = text
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_str(line).expect("JSONEachRow line"))
            .collect();
        let count = rows.len();
        self.tables.lock().expect("lock poisoned").entry(table.to_owned()).or_default().extend(rows);
        self.inserts.lock().expect("lock poisoned").push((table.to_owned(), count));
        Ok(())
    }
}
