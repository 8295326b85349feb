//! Built-in responders: fixed-schema result sets for catalog and session
//! introspection, produced without consulting the planner.

use tracing::{error, warn};

use crate::catalog::{IndexType, Schema};

use super::classify::{istarts_with, StmtType};
use super::connection::{ConnState, Connection};
use super::machine::StateMachine;
use super::protocol::*;
use super::send_buf::ResultField;

fn remove_quote<'a>(s: &'a str, quote: char) -> &'a str {
    s.trim_matches(quote)
}

fn field(name: &str, ftype: u8) -> ResultField {
    ResultField::new(name, ftype)
}

impl StateMachine {
    pub(crate) fn make_simple_ok(&self, conn: &mut Connection) {
        let seq = conn.packet_id.wrapping_add(1);
        conn.send_buf.make_simple_ok_packet(seq);
    }

    pub(crate) fn make_err(&self, conn: &mut Connection, code: u16, message: &str) {
        let seq = conn.packet_id.wrapping_add(1);
        conn.send_buf.make_err_packet(seq, code, message);
    }

    /// Emits a complete result set: header, field packets, EOF, rows, EOF,
    /// with sequence ids 1..k.
    fn make_common_resultset(
        &self,
        conn: &mut Connection,
        mut fields: Vec<ResultField>,
        rows: Vec<Vec<String>>,
    ) -> std::result::Result<(), ()> {
        if fields.is_empty() {
            error!("field list is empty");
            return Err(());
        }
        let mut seq: u8 = 1;
        conn.send_buf.make_result_header(seq, fields.len() as u64);
        for f in fields.iter_mut() {
            f.catalog = "granite".to_string();
            f.db = conn.query_ctx.cur_db.clone();
            f.table.clear();
            f.org_table.clear();
            f.org_name = f.name.clone();
            seq = seq.wrapping_add(1);
            conn.send_buf.make_field_packet(f, seq);
        }
        seq = seq.wrapping_add(1);
        conn.send_buf.make_eof_packet(seq);
        seq = seq.wrapping_add(1);
        for row in &rows {
            conn.send_buf.make_row_packet(row, &mut seq);
        }
        conn.send_buf.make_eof_packet(seq);
        Ok(())
    }

    fn finish_resultset(
        &self,
        conn: &mut Connection,
        fields: Vec<ResultField>,
        rows: Vec<Vec<String>>,
    ) -> bool {
        if self.make_common_resultset(conn, fields, rows).is_err() {
            error!(fd = conn.fd, "failed to make result packet");
            self.make_err(conn, ER_MAKE_RESULT_PACKET, "Failed to make result packet");
            conn.state = ConnState::Error;
            return false;
        }
        conn.state = ConnState::ReadQueryResult;
        true
    }

    /// Single-field, single-row reply shared by the session-variable stubs.
    fn handle_query_template(
        &self,
        conn: &mut Connection,
        field_name: &str,
        data_type: u8,
        value: String,
    ) -> bool {
        let fields = vec![field(field_name, data_type)];
        self.finish_resultset(conn, fields, vec![vec![value]])
    }

    pub(crate) fn handle_query_version_comment(&self, conn: &mut Connection) -> bool {
        self.handle_query_template(
            conn,
            "@@version_comment",
            MYSQL_TYPE_VAR_STRING,
            "Source distribution".to_string(),
        )
    }

    pub(crate) fn handle_query_session_auto_increment(&self, conn: &mut Connection) -> bool {
        self.handle_query_template(
            conn,
            "@@session.auto_increment_increment",
            MYSQL_TYPE_VAR_STRING,
            "1".to_string(),
        )
    }

    pub(crate) fn handle_query_session_autocommit(&self, conn: &mut Connection) -> bool {
        self.handle_query_template(
            conn,
            "@@session.autocommit",
            MYSQL_TYPE_VAR_STRING,
            "1".to_string(),
        )
    }

    pub(crate) fn handle_query_session_tx_isolation(&self, conn: &mut Connection) -> bool {
        self.handle_query_template(
            conn,
            "@@session.tx_isolation",
            MYSQL_TYPE_VAR_STRING,
            "REPEATABLE-READ".to_string(),
        )
    }

    pub(crate) fn handle_query_select_1(&self, conn: &mut Connection) -> bool {
        self.handle_query_template(conn, "1", MYSQL_TYPE_LONG, "1".to_string())
    }

    pub(crate) fn handle_query_select_database(&self, conn: &mut Connection) -> bool {
        let current_db = conn.current_db.clone();
        self.handle_query_template(conn, "database()", MYSQL_TYPE_VAR_STRING, current_db)
    }

    pub(crate) fn handle_query_use_database(&self, conn: &mut Connection) -> bool {
        let sql = conn.query_ctx.sql.clone();
        let name = sql.trim();
        // Only the "use <db>" query form carries the keyword; a COM_INIT_DB
        // payload is the bare database name.
        let name = if conn.query_ctx.stmt_type == StmtType::UseInQuery && istarts_with(name, "use")
        {
            name[3..].trim_start()
        } else {
            name
        };
        let db = remove_quote(name.trim(), '`').to_string();
        conn.current_db = db.clone();
        conn.query_ctx.cur_db = db;
        self.make_simple_ok(conn);
        conn.state = ConnState::ReadQueryResult;
        true
    }

    pub(crate) fn handle_query_show_databases(&self, conn: &mut Connection) -> bool {
        let namespace = match conn.query_ctx.user_info.as_ref() {
            Some(user) => user.namespace.clone(),
            None => String::new(),
        };
        let dbs = self.schema().get_db_list(&namespace);

        let fields = vec![field("Database", MYSQL_TYPE_VAR_STRING)];
        let rows = dbs.into_iter().map(|db| vec![db]).collect();
        self.finish_resultset(conn, fields, rows)
    }

    pub(crate) fn handle_query_show_tables(&self, conn: &mut Connection) -> bool {
        let namespace = match conn.query_ctx.user_info.as_ref() {
            Some(user) => user.namespace.clone(),
            None => String::new(),
        };
        let current_db = conn.current_db.clone();
        if current_db.is_empty() {
            warn!(fd = conn.fd, "no database selected");
            self.make_err(conn, ER_NO_DB_ERROR, "No database selected");
            conn.state = ConnState::ReadQueryResult;
            return false;
        }

        let tables = self.schema().get_table_list(&namespace, &current_db);
        let fields = vec![field(&format!("Tables_in_{}", current_db), MYSQL_TYPE_VAR_STRING)];
        let rows = tables.into_iter().map(|t| vec![t]).collect();
        self.finish_resultset(conn, fields, rows)
    }

    fn resolve_table(&self, conn: &mut Connection, db: &str, table: &str) -> Option<i64> {
        let namespace = conn
            .query_ctx
            .user_info
            .as_ref()
            .map(|u| u.namespace.clone())
            .unwrap_or_default();
        let full_name = format!("{}.{}.{}", namespace, db, table);
        self.schema().get_table_id(&full_name)
    }

    pub(crate) fn handle_query_show_create_table(&self, conn: &mut Connection) -> bool {
        let fields = vec![
            field("Table", MYSQL_TYPE_VAR_STRING),
            field("Create Table", MYSQL_TYPE_VAR_STRING),
        ];

        let sql = conn.query_ctx.sql.clone();
        let tokens: Vec<&str> = sql
            .split(|c| " \t\n\r.".contains(c))
            .filter(|s| !s.is_empty())
            .collect();
        let (db, table) = match tokens.len() {
            4 => (conn.current_db.clone(), remove_quote(tokens[3], '`').to_string()),
            5 => (
                remove_quote(tokens[3], '`').to_string(),
                remove_quote(tokens[4], '`').to_string(),
            ),
            _ => {
                conn.state = ConnState::Error;
                return false;
            }
        };

        let table_id = match self.resolve_table(conn, &db, &table) {
            Some(id) => id,
            None => {
                conn.state = ConnState::Error;
                return false;
            }
        };
        let info = match self.schema().get_table_info(table_id) {
            Some(info) => info,
            None => {
                conn.state = ConnState::Error;
                return false;
            }
        };

        let mut ddl = format!("CREATE TABLE `{}` (\n", table);
        for f in info.fields.iter().filter(|f| !f.deleted) {
            ddl.push_str("  `");
            ddl.push_str(f.short_name());
            ddl.push_str("` ");
            ddl.push_str(f.ftype.ddl_name());
            ddl.push(' ');
            ddl.push_str(if f.can_null { "NULL " } else { "NOT NULL " });
            ddl.push_str(&f.default_value);
            ddl.push(' ');
            if f.auto_inc {
                ddl.push_str("AUTO_INCREMENT");
            }
            ddl.push_str(",\n");
        }
        for (index_idx, index_id) in info.indices.iter().enumerate() {
            let index_info = match self.schema().get_index_info(*index_id) {
                Some(info) => info,
                None => {
                    conn.state = ConnState::Error;
                    return false;
                }
            };
            ddl.push_str("  ");
            ddl.push_str(index_info.itype.ddl_name());
            ddl.push(' ');
            if index_info.itype != IndexType::Primary {
                ddl.push('`');
                ddl.push_str(index_info.short_name());
                ddl.push_str("` ");
            }
            ddl.push('(');
            for (i, f) in index_info.fields.iter().enumerate() {
                if i > 0 {
                    ddl.push(',');
                }
                ddl.push('`');
                ddl.push_str(f.short_name());
                ddl.push('`');
            }
            if index_idx + 1 < info.indices.len() {
                ddl.push_str("),\n");
            } else {
                ddl.push_str(")\n");
            }
        }
        ddl.push_str(&format!(
            ") ENGINE=Rocksdb DEFAULT CHARSET={} AVG_ROW_LENGTH={} COMMENT='{{\"resource_tag\":\"{}\", \"namespace\":\"{}\"}}'",
            info.charset.name(),
            info.byte_size_per_record,
            info.resource_tag,
            info.namespace
        ));

        let rows = vec![vec![table, ddl]];
        self.finish_resultset(conn, fields, rows)
    }

    pub(crate) fn handle_query_show_full_columns(&self, conn: &mut Connection) -> bool {
        let fields = vec![
            field("Field", MYSQL_TYPE_VAR_STRING),
            field("Type", MYSQL_TYPE_VAR_STRING),
            field("Collation", MYSQL_TYPE_VAR_STRING),
            field("Null", MYSQL_TYPE_VAR_STRING),
            field("Key", MYSQL_TYPE_VAR_STRING),
            field("default", MYSQL_TYPE_VAR_STRING),
            field("Extra", MYSQL_TYPE_VAR_STRING),
            field("Privileges", MYSQL_TYPE_VAR_STRING),
            field("Comment", MYSQL_TYPE_VAR_STRING),
        ];

        // "show full columns from <table> [from <db>]"
        let sql = conn.query_ctx.sql.clone();
        let tokens: Vec<&str> = sql
            .split(|c| " \t\n\r".contains(c))
            .filter(|s| !s.is_empty())
            .collect();
        let (db, table) = match tokens.len() {
            5 => (conn.current_db.clone(), remove_quote(tokens[4], '`').to_string()),
            7 => (
                remove_quote(tokens[6], '`').to_string(),
                remove_quote(tokens[4], '`').to_string(),
            ),
            _ => {
                conn.state = ConnState::Error;
                return false;
            }
        };

        let table_id = match self.resolve_table(conn, &db, &table) {
            Some(id) => id,
            None => {
                conn.state = ConnState::Error;
                return false;
            }
        };
        let info = match self.schema().get_table_info(table_id) {
            Some(info) => info,
            None => {
                conn.state = ConnState::Error;
                return false;
            }
        };
        let field_index = self.collect_field_index(&info.indices);

        let mut rows = Vec::new();
        for f in info.fields.iter().filter(|f| !f.deleted) {
            // Legacy cell layout: the Type cell is the literal "NULL", the
            // Collation cell carries the type name.
            rows.push(vec![
                f.short_name().to_string(),
                "NULL".to_string(),
                f.ftype.type_name().to_string(),
                if f.can_null { "YES" } else { "NO" }.to_string(),
                field_index
                    .iter()
                    .find(|(id, _)| *id == f.id)
                    .map(|(_, itype)| itype.type_name().to_string())
                    .unwrap_or_else(|| " ".to_string()),
                "NULL".to_string(),
                if info.auto_inc_field_id == f.id {
                    "auto_increment".to_string()
                } else {
                    " ".to_string()
                },
                "select,insert,update,references".to_string(),
                " ".to_string(),
            ]);
        }
        self.finish_resultset(conn, fields, rows)
    }

    /// First index that covers a field wins, in catalog index order.
    fn collect_field_index(&self, indices: &[i64]) -> Vec<(i32, IndexType)> {
        let mut field_index: Vec<(i32, IndexType)> = Vec::new();
        for index_id in indices {
            if let Some(index_info) = self.schema().get_index_info(*index_id) {
                for f in &index_info.fields {
                    if !field_index.iter().any(|(id, _)| *id == f.id) {
                        field_index.push((f.id, index_info.itype));
                    }
                }
            }
        }
        field_index
    }

    pub(crate) fn handle_query_show_table_status(&self, conn: &mut Connection) -> bool {
        let fields = vec![
            field("Name", MYSQL_TYPE_VAR_STRING),
            field("Engine", MYSQL_TYPE_VAR_STRING),
            field("Version", MYSQL_TYPE_LONG),
            field("Row_format", MYSQL_TYPE_VAR_STRING),
            field("Rows", MYSQL_TYPE_LONG),
            field("Avg_row_length", MYSQL_TYPE_LONG),
            field("Data_length", MYSQL_TYPE_LONG),
            field("Max_data_length", MYSQL_TYPE_LONG),
            field("Index_length", MYSQL_TYPE_LONG),
            field("Data_free", MYSQL_TYPE_LONG),
            field("Auto_increment", MYSQL_TYPE_LONG),
            field("Create_time", MYSQL_TYPE_VAR_STRING),
            field("Update_time", MYSQL_TYPE_VAR_STRING),
            field("Check_time", MYSQL_TYPE_VAR_STRING),
            field("Collation", MYSQL_TYPE_VAR_STRING),
            field("Checksum", MYSQL_TYPE_VAR_STRING),
            field("Create_options", MYSQL_TYPE_VAR_STRING),
            field("Comment", MYSQL_TYPE_VAR_STRING),
        ];

        // "show table status like '<table>'"
        let sql = conn.query_ctx.sql.clone();
        let tokens: Vec<&str> = sql
            .split(|c| " \t\n\r".contains(c))
            .filter(|s| !s.is_empty())
            .collect();
        let table = match tokens.len() {
            5 => remove_quote(tokens[4], '\'').to_string(),
            _ => {
                conn.state = ConnState::Error;
                return false;
            }
        };

        let db = conn.current_db.clone();
        let table_id = match self.resolve_table(conn, &db, &table) {
            Some(id) => id,
            None => {
                conn.state = ConnState::Error;
                return false;
            }
        };
        let info = match self.schema().get_table_info(table_id) {
            Some(info) => info,
            None => {
                conn.state = ConnState::Error;
                return false;
            }
        };

        let rows = vec![vec![
            table,
            "Innodb".to_string(),
            info.version.to_string(),
            "Compact".to_string(),
            "0".to_string(),
            "0".to_string(),
            "0".to_string(),
            "0".to_string(),
            "0".to_string(),
            "0".to_string(),
            "0".to_string(),
            "2018-08-09 15:01:40".to_string(),
            String::new(),
            String::new(),
            "utf8_general_ci".to_string(),
            String::new(),
            String::new(),
            String::new(),
        ]];
        self.finish_resultset(conn, fields, rows)
    }

    pub(crate) fn handle_query_show_region(&self, conn: &mut Connection) -> bool {
        let sql = conn.query_ctx.sql.clone();
        let region_id = match sql
            .find('_')
            .and_then(|pos| sql[pos + 1..].trim().parse::<i64>().ok())
        {
            Some(id) => id,
            None => {
                warn!(fd = conn.fd, sql = %sql, "malformed show region statement");
                self.make_err(conn, ER_ERROR_COMMON, "malformed show region statement");
                conn.state = ConnState::ReadQueryResult;
                return false;
            }
        };

        let fields = vec![
            field("region_id", MYSQL_TYPE_VAR_STRING),
            field("region_info", MYSQL_TYPE_VAR_STRING),
        ];

        let mut rows = Vec::new();
        match self.schema().get_region_info(region_id) {
            Some(info) => rows.push(vec![region_id.to_string(), info.short_debug()]),
            None => warn!(region_id, "region does not exist"),
        }
        self.finish_resultset(conn, fields, rows)
    }

    pub(crate) fn handle_query_show_collation(&self, conn: &mut Connection) -> bool {
        let fields = vec![
            field("Collation", MYSQL_TYPE_VAR_STRING),
            field("Charset", MYSQL_TYPE_VAR_STRING),
            field("Id", MYSQL_TYPE_LONGLONG),
            field("Default", MYSQL_TYPE_VAR_STRING),
            field("Compiled", MYSQL_TYPE_VAR_STRING),
            field("Sortlen", MYSQL_TYPE_VAR_STRING),
        ];
        let rows = vec![
            vec![
                "gbk_chinese_ci".to_string(),
                "gbk".to_string(),
                "28".to_string(),
                "Yes".to_string(),
                "Yes".to_string(),
                "1".to_string(),
            ],
            vec![
                "gbk_bin".to_string(),
                "gbk".to_string(),
                "87".to_string(),
                "   ".to_string(),
                "Yes".to_string(),
                "1".to_string(),
            ],
        ];
        self.finish_resultset(conn, fields, rows)
    }

    pub(crate) fn handle_query_show_warnings(&self, conn: &mut Connection) -> bool {
        let fields = vec![
            field("Level", MYSQL_TYPE_VAR_STRING),
            field("Code", MYSQL_TYPE_LONG),
            field("Message", MYSQL_TYPE_VAR_STRING),
        ];
        self.finish_resultset(conn, fields, Vec::new())
    }

    pub(crate) fn handle_query_show_variables(&self, conn: &mut Connection) -> bool {
        let fields = vec![
            field("Variable_name", MYSQL_TYPE_VAR_STRING),
            field("Value", MYSQL_TYPE_VAR_STRING),
        ];
        let vars: [(&str, &str); 18] = [
            ("character_set_client", "gbk"),
            ("character_set_connection", "gbk"),
            ("character_set_results", "gbk"),
            ("character_set_server", "gbk"),
            ("init_connect", " "),
            ("interactive_timeout", "28800"),
            ("language", "/home/mysql/mysql/share/mysql/english/"),
            ("lower_case_table_names", "0"),
            ("max_allowed_packet", "268435456"),
            ("net_buffer_length", "16384"),
            ("net_write_timeout", "60"),
            ("query_cache_size", "335544320"),
            ("query_cache_type", "OFF"),
            ("sql_mode", " "),
            ("system_time_zone", "CST"),
            ("time_zone", "SYSTEM"),
            ("tx_isolation", "REPEATABLE-READ"),
            ("wait_timeout", "28800"),
        ];
        let rows = vars
            .iter()
            .map(|(name, value)| vec![name.to_string(), value.to_string()])
            .collect();
        self.finish_resultset(conn, fields, rows)
    }

    pub(crate) fn handle_query_desc_table(&self, conn: &mut Connection) -> bool {
        let fields = vec![
            field("Field", MYSQL_TYPE_VAR_STRING),
            field("Type", MYSQL_TYPE_VAR_STRING),
            field("Null", MYSQL_TYPE_VAR_STRING),
            field("Key", MYSQL_TYPE_VAR_STRING),
            field("default", MYSQL_TYPE_VAR_STRING),
            field("Extra", MYSQL_TYPE_VAR_STRING),
        ];

        // "desc [<db>.]<table>"
        let sql = conn.query_ctx.sql.clone();
        let tokens: Vec<&str> = sql
            .split(|c| " \t\n\r.".contains(c))
            .filter(|s| !s.is_empty())
            .collect();
        let (db, table) = match tokens.len() {
            2 => (conn.current_db.clone(), remove_quote(tokens[1], '`').to_string()),
            3 => (
                remove_quote(tokens[1], '`').to_string(),
                remove_quote(tokens[2], '`').to_string(),
            ),
            _ => {
                conn.state = ConnState::Error;
                return false;
            }
        };

        let table_id = match self.resolve_table(conn, &db, &table) {
            Some(id) => id,
            None => {
                conn.state = ConnState::Error;
                return false;
            }
        };
        let info = match self.schema().get_table_info(table_id) {
            Some(info) => info,
            None => {
                conn.state = ConnState::Error;
                return false;
            }
        };
        let field_index = self.collect_field_index(&info.indices);

        let mut rows = Vec::new();
        for f in info.fields.iter().filter(|f| !f.deleted) {
            rows.push(vec![
                f.short_name().to_string(),
                f.ftype.type_name().to_string(),
                if f.can_null { "YES" } else { "NO" }.to_string(),
                field_index
                    .iter()
                    .find(|(id, _)| *id == f.id)
                    .map(|(_, itype)| itype.type_name().to_string())
                    .unwrap_or_else(|| " ".to_string()),
                "NULL".to_string(),
                if info.auto_inc_field_id == f.id {
                    "auto_increment".to_string()
                } else {
                    " ".to_string()
                },
            ]);
        }
        self.finish_resultset(conn, fields, rows)
    }
}
