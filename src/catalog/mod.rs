//! Catalog collaborator interface and the shared user records.
//!
//! The front end resolves credentials, databases, tables and region
//! descriptors through the [`Schema`] trait; `MemoryCatalog` is the
//! DashMap-backed implementation used by the standalone binary and tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::info;

use crate::mysql::packet::handshake_salt;
use crate::mysql::protocol::scramble_password;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    String,
    Datetime,
    Timestamp,
    Date,
}

impl PrimitiveType {
    /// Column type rendered into synthesized `SHOW CREATE TABLE` DDL.
    pub fn ddl_name(&self) -> &'static str {
        match self {
            PrimitiveType::Bool => "boolean",
            PrimitiveType::Int8 => "tinyint(4)",
            PrimitiveType::UInt8 => "tinyint(4) unsigned",
            PrimitiveType::Int16 => "smallint(6)",
            PrimitiveType::UInt16 => "smallint(6) unsigned",
            PrimitiveType::Int32 => "int(10)",
            PrimitiveType::UInt32 => "int(10) unsigned",
            PrimitiveType::Int64 => "bigint(20)",
            PrimitiveType::UInt64 => "bigint(20) unsigned",
            PrimitiveType::Float => "float",
            PrimitiveType::Double => "double",
            PrimitiveType::String => "varchar(1024)",
            PrimitiveType::Datetime => "DATETIME",
            PrimitiveType::Timestamp => "TIMESTAMP",
            PrimitiveType::Date => "DATE",
        }
    }

    /// Symbolic name shown in DESC / SHOW FULL COLUMNS output.
    pub fn type_name(&self) -> &'static str {
        match self {
            PrimitiveType::Bool => "BOOL",
            PrimitiveType::Int8 => "INT8",
            PrimitiveType::UInt8 => "UINT8",
            PrimitiveType::Int16 => "INT16",
            PrimitiveType::UInt16 => "UINT16",
            PrimitiveType::Int32 => "INT32",
            PrimitiveType::UInt32 => "UINT32",
            PrimitiveType::Int64 => "INT64",
            PrimitiveType::UInt64 => "UINT64",
            PrimitiveType::Float => "FLOAT",
            PrimitiveType::Double => "DOUBLE",
            PrimitiveType::String => "STRING",
            PrimitiveType::Datetime => "DATETIME",
            PrimitiveType::Timestamp => "TIMESTAMP",
            PrimitiveType::Date => "DATE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    Primary,
    Uniq,
    Key,
    Fulltext,
}

impl IndexType {
    pub fn ddl_name(&self) -> &'static str {
        match self {
            IndexType::Primary => "PRIMARY KEY",
            IndexType::Uniq => "UNIQUE KEY",
            IndexType::Key => "KEY",
            IndexType::Fulltext => "FULLTEXT KEY",
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            IndexType::Primary => "I_PRIMARY",
            IndexType::Uniq => "I_UNIQ",
            IndexType::Key => "I_KEY",
            IndexType::Fulltext => "I_FULLTEXT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableCharset {
    Utf8,
    Gbk,
}

impl TableCharset {
    pub fn name(&self) -> &'static str {
        match self {
            TableCharset::Utf8 => "utf8",
            TableCharset::Gbk => "gbk",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub id: i32,
    pub name: String,
    pub ftype: PrimitiveType,
    pub can_null: bool,
    pub default_value: String,
    pub auto_inc: bool,
    pub deleted: bool,
}

impl FieldInfo {
    pub fn new(id: i32, name: &str, ftype: PrimitiveType) -> Self {
        Self {
            id,
            name: name.to_string(),
            ftype,
            can_null: false,
            default_value: String::new(),
            auto_inc: false,
            deleted: false,
        }
    }

    /// Trailing path component; catalog field names are `db.table.field`.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct TableInfo {
    pub id: i64,
    pub name: String,
    pub namespace: String,
    pub resource_tag: String,
    pub charset: TableCharset,
    pub byte_size_per_record: u32,
    pub version: i64,
    pub auto_inc_field_id: i32,
    pub fields: Vec<FieldInfo>,
    pub indices: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct IndexInfo {
    pub id: i64,
    pub name: String,
    pub itype: IndexType,
    pub fields: Vec<FieldInfo>,
}

impl IndexInfo {
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct RegionInfo {
    pub region_id: i64,
    pub table_id: i64,
    pub leader: String,
    pub peers: Vec<String>,
    pub version: i64,
    pub start_key: String,
    pub end_key: String,
}

impl RegionInfo {
    /// Single-line rendering for SHOW REGION output.
    pub fn short_debug(&self) -> String {
        format!(
            "region_id: {} table_id: {} version: {} leader: {} peers: [{}] range: [{}, {})",
            self.region_id,
            self.table_id,
            self.version,
            self.leader,
            self.peers.join(", "),
            self.start_key,
            self.end_key
        )
    }
}

struct QuotaWindow {
    started: Instant,
    count: u32,
}

/// One record per database user, shared by every connection authenticated
/// as that user. The connection counter and the QPS window are touched from
/// multiple reactor threads.
pub struct UserInfo {
    pub username: String,
    pub scramble_password: [u8; 20],
    pub namespace: String,
    max_connection: AtomicU32,
    query_quota: AtomicU32,
    connection_count: AtomicU32,
    quota_window: Mutex<QuotaWindow>,
}

const QUOTA_WINDOW: Duration = Duration::from_secs(1);

impl UserInfo {
    pub fn new(username: &str, scramble_password: [u8; 20], namespace: &str) -> Self {
        Self {
            username: username.to_string(),
            scramble_password,
            namespace: namespace.to_string(),
            max_connection: AtomicU32::new(0),
            query_quota: AtomicU32::new(0),
            connection_count: AtomicU32::new(0),
            quota_window: Mutex::new(QuotaWindow {
                started: Instant::now(),
                count: 0,
            }),
        }
    }

    pub fn with_limits(mut self, max_connection: u32, query_quota: u32) -> Self {
        *self.max_connection.get_mut() = max_connection;
        *self.query_quota.get_mut() = query_quota;
        self
    }

    pub fn max_connection(&self) -> u32 {
        self.max_connection.load(Ordering::Relaxed)
    }

    pub fn query_quota(&self) -> u32 {
        self.query_quota.load(Ordering::Relaxed)
    }

    /// Fills in process-wide defaults for limits the catalog left unset.
    /// Compare-exchange so concurrent logins agree on the final value.
    pub fn apply_default_limits(&self, max_connection: u32, query_quota: u32) {
        let _ = self.max_connection.compare_exchange(
            0,
            max_connection,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
        let _ =
            self.query_quota
                .compare_exchange(0, query_quota, Ordering::Relaxed, Ordering::Relaxed);
    }

    /// Atomically claims a connection slot; false when the user is at cap.
    pub fn connection_inc(&self) -> bool {
        let cap = self.max_connection();
        self.connection_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if current < cap {
                    Some(current + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    pub fn connection_dec(&self) {
        self.connection_count.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn connection_count(&self) -> u32 {
        self.connection_count.load(Ordering::SeqCst)
    }

    /// Counts this query against the rolling 1-second window.
    pub fn is_exceed_quota(&self) -> bool {
        let mut window = self.quota_window.lock();
        if window.started.elapsed() > QUOTA_WINDOW {
            window.count = 0;
            window.started = Instant::now();
        }
        window.count += 1;
        window.count > self.query_quota()
    }

    pub fn query_count(&self) -> u32 {
        self.quota_window.lock().count
    }
}

/// Narrow catalog interface consumed by the protocol layer.
pub trait Schema: Send + Sync {
    fn get_user_info(&self, username: &str) -> Option<Arc<UserInfo>>;
    fn get_db_list(&self, namespace: &str) -> Vec<String>;
    fn get_table_list(&self, namespace: &str, db: &str) -> Vec<String>;
    /// `full_name` is `namespace.db.table`.
    fn get_table_id(&self, full_name: &str) -> Option<i64>;
    fn get_table_info(&self, table_id: i64) -> Option<TableInfo>;
    fn get_index_info(&self, index_id: i64) -> Option<IndexInfo>;
    fn get_region_info(&self, region_id: i64) -> Option<RegionInfo>;
}

/// In-memory catalog backing the standalone gateway and the test suite.
pub struct MemoryCatalog {
    users: DashMap<String, Arc<UserInfo>>,
    databases: DashMap<String, Vec<String>>,
    table_names: DashMap<String, Vec<String>>,
    table_ids: DashMap<String, i64>,
    tables: DashMap<i64, TableInfo>,
    indexes: DashMap<i64, IndexInfo>,
    regions: DashMap<i64, RegionInfo>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            databases: DashMap::new(),
            table_names: DashMap::new(),
            table_ids: DashMap::new(),
            tables: DashMap::new(),
            indexes: DashMap::new(),
            regions: DashMap::new(),
        }
    }

    /// Registers a user; the stored scramble is derived from the plaintext
    /// password against the fixed handshake salt.
    pub fn add_user(&self, username: &str, password: &str, namespace: &str) -> Arc<UserInfo> {
        let scramble = scramble_password(password, &handshake_salt());
        let mut stored = [0u8; 20];
        stored.copy_from_slice(&scramble);
        let user = Arc::new(UserInfo::new(username, stored, namespace));
        info!(username, namespace, "registered user");
        self.users.insert(username.to_string(), user.clone());
        user
    }

    pub fn add_user_with_limits(
        &self,
        username: &str,
        password: &str,
        namespace: &str,
        max_connection: u32,
        query_quota: u32,
    ) -> Arc<UserInfo> {
        let scramble = scramble_password(password, &handshake_salt());
        let mut stored = [0u8; 20];
        stored.copy_from_slice(&scramble);
        let user = Arc::new(
            UserInfo::new(username, stored, namespace).with_limits(max_connection, query_quota),
        );
        self.users.insert(username.to_string(), user.clone());
        user
    }

    pub fn add_database(&self, namespace: &str, db: &str) {
        self.databases
            .entry(namespace.to_string())
            .or_default()
            .push(db.to_string());
    }

    pub fn add_table(&self, db: &str, table: TableInfo) {
        let full_name = format!("{}.{}.{}", table.namespace, db, table.name);
        self.table_names
            .entry(format!("{}.{}", table.namespace, db))
            .or_default()
            .push(table.name.clone());
        self.table_ids.insert(full_name, table.id);
        self.tables.insert(table.id, table);
    }

    pub fn add_index(&self, index: IndexInfo) {
        self.indexes.insert(index.id, index);
    }

    pub fn add_region(&self, region: RegionInfo) {
        self.regions.insert(region.region_id, region);
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Schema for MemoryCatalog {
    fn get_user_info(&self, username: &str) -> Option<Arc<UserInfo>> {
        self.users.get(username).map(|entry| entry.value().clone())
    }

    fn get_db_list(&self, namespace: &str) -> Vec<String> {
        self.databases
            .get(namespace)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    fn get_table_list(&self, namespace: &str, db: &str) -> Vec<String> {
        self.table_names
            .get(&format!("{}.{}", namespace, db))
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    fn get_table_id(&self, full_name: &str) -> Option<i64> {
        self.table_ids.get(full_name).map(|entry| *entry.value())
    }

    fn get_table_info(&self, table_id: i64) -> Option<TableInfo> {
        self.tables.get(&table_id).map(|entry| entry.value().clone())
    }

    fn get_index_info(&self, index_id: i64) -> Option<IndexInfo> {
        self.indexes.get(&index_id).map(|entry| entry.value().clone())
    }

    fn get_region_info(&self, region_id: i64) -> Option<RegionInfo> {
        self.regions.get(&region_id).map(|entry| entry.value().clone())
    }
}
