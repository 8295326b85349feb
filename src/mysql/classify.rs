use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use crate::query::QueryContext;
use super::protocol::*;

/// Statement classification; command byte first, then a prefix match over
/// the comment-stripped SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StmtType {
    Use,
    FieldList,
    CreateDb,
    DropDb,
    Refresh,
    Stat,
    ProcessInfo,
    Debug,
    ChangeUser,
    Ping,
    Select,
    Show,
    Explain,
    Kill,
    UseInQuery,
    Desc,
    Call,
    SetNames,
    SetCharset,
    SetCharacterSetClient,
    SetCharacterSetConnection,
    SetCharacterSetResults,
    SetCharacterSet,
    Set,
    Write,
    Unknown,
}

impl Default for StmtType {
    fn default() -> Self {
        StmtType::Unknown
    }
}

lazy_static! {
    static ref COMMENT_RE: Regex = Regex::new(r"(?is)^(/\*.*?\*/)(.*)$").unwrap();
}

const TRIM_CHARS: &[char] = &[' ', '\t', '\n', '\r', '\x0B'];

fn trim_statement(sql: &str) -> &str {
    sql.trim_start_matches(TRIM_CHARS)
        .trim_end_matches(|c: char| TRIM_CHARS.contains(&c) || c == ';')
}

pub fn istarts_with(s: &str, prefix: &str) -> bool {
    match s.get(..prefix.len()) {
        Some(head) => head.eq_ignore_ascii_case(prefix),
        None => false,
    }
}

/// Peels leading `/* … */` blocks off `ctx.sql` into `ctx.comments` and
/// trims surrounding whitespace and trailing semicolons.
pub fn parse_comments(ctx: &mut QueryContext) {
    ctx.sql = trim_statement(&ctx.sql).to_string();

    while ctx.sql.starts_with("/*") {
        let len = ctx.sql.len();
        let (comment, rest) = match COMMENT_RE.captures(&ctx.sql) {
            Some(caps) => (caps[1].to_string(), caps[2].to_string()),
            None => break,
        };
        if !comment.is_empty() {
            ctx.comments.push(comment);
        }
        ctx.sql = rest;
        if ctx.sql.len() == len {
            break;
        }
        ctx.sql = trim_statement(&ctx.sql).to_string();
    }
}

/// Harvests recognized debug hints from comments that decode as JSON.
pub fn get_json_attributes(ctx: &mut QueryContext) {
    for comment in &ctx.comments {
        if comment.len() < 4 {
            continue;
        }
        let body = &comment[2..comment.len() - 2];
        let root: serde_json::Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(_) => continue,
        };
        if let Some(region_id) = root.get("region_id").and_then(|v| v.as_i64()) {
            debug!(region_id, "query carries region hint");
            ctx.debug_region_id = Some(region_id);
        }
        if let Some(enable_2pc) = root.get("enable_2pc").and_then(|v| v.as_i64()) {
            debug!(enable_2pc, "query carries 2pc hint");
            ctx.enable_2pc = Some(enable_2pc);
        }
    }
}

/// Pure classification: command byte to enum, with a prefix fallback over
/// the comment-stripped SQL. Also extracts comments as a side effect so the
/// result is insensitive to leading `/* … */` blocks.
pub fn get_query_type(ctx: &mut QueryContext) -> StmtType {
    parse_comments(ctx);

    match ctx.mysql_cmd {
        COM_INIT_DB => return StmtType::Use,
        COM_FIELD_LIST => return StmtType::FieldList,
        COM_CREATE_DB => return StmtType::CreateDb,
        COM_DROP_DB => return StmtType::DropDb,
        COM_REFRESH => return StmtType::Refresh,
        COM_STATISTICS => return StmtType::Stat,
        COM_PROCESS_INFO => return StmtType::ProcessInfo,
        COM_DEBUG => return StmtType::Debug,
        COM_CHANGE_USER => return StmtType::ChangeUser,
        COM_PING => return StmtType::Ping,
        _ => {}
    }
    if !matches!(
        ctx.mysql_cmd,
        COM_QUERY | COM_STMT_PREPARE | COM_STMT_EXECUTE | COM_STMT_CLOSE | COM_STMT_FETCH
    ) {
        return StmtType::Unknown;
    }
    if ctx.sql.is_empty() {
        warn!(cmd = ctx.mysql_cmd, "statement text is empty");
        return StmtType::Unknown;
    }

    if istarts_with(&ctx.sql, "select") {
        return StmtType::Select;
    }
    if istarts_with(&ctx.sql, "show") {
        return StmtType::Show;
    }
    if istarts_with(&ctx.sql, "explain") {
        return StmtType::Explain;
    }
    if istarts_with(&ctx.sql, "kill") {
        return StmtType::Kill;
    }
    if istarts_with(&ctx.sql, "use") {
        return StmtType::UseInQuery;
    }
    if istarts_with(&ctx.sql, "desc") {
        return StmtType::Desc;
    }
    if istarts_with(&ctx.sql, "call") {
        return StmtType::Call;
    }
    if istarts_with(&ctx.sql, "set") {
        let value = ctx
            .sql
            .trim_start_matches(|c: char| " SETset".contains(c));
        if istarts_with(value, "names") {
            return StmtType::SetNames;
        }
        if istarts_with(value, "charset") {
            return StmtType::SetCharset;
        }
        // "set [global | session | @@] …" variants are not classified
        if istarts_with(value, "character_set_client") {
            return StmtType::SetCharacterSetClient;
        }
        if istarts_with(value, "character_set_connection") {
            return StmtType::SetCharacterSetConnection;
        }
        if istarts_with(value, "character_set_results") {
            return StmtType::SetCharacterSetResults;
        }
        if istarts_with(value, "character set") {
            return StmtType::SetCharacterSet;
        }
        return StmtType::Set;
    }
    StmtType::Write
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_for(cmd: u8, sql: &str) -> QueryContext {
        let mut ctx = QueryContext::default();
        ctx.mysql_cmd = cmd;
        ctx.sql = sql.to_string();
        ctx
    }

    fn classify(sql: &str) -> StmtType {
        let mut ctx = ctx_for(COM_QUERY, sql);
        get_query_type(&mut ctx)
    }

    #[test]
    fn test_command_byte_classification() {
        let mut ctx = ctx_for(COM_INIT_DB, "somedb");
        assert_eq!(get_query_type(&mut ctx), StmtType::Use);
        let mut ctx = ctx_for(COM_PING, "");
        assert_eq!(get_query_type(&mut ctx), StmtType::Ping);
        let mut ctx = ctx_for(COM_FIELD_LIST, "t");
        assert_eq!(get_query_type(&mut ctx), StmtType::FieldList);
        let mut ctx = ctx_for(0x22, "whatever");
        assert_eq!(get_query_type(&mut ctx), StmtType::Unknown);
    }

    #[test]
    fn test_prefix_classification() {
        assert_eq!(classify("select 1"), StmtType::Select);
        assert_eq!(classify("SHOW TABLES"), StmtType::Show);
        assert_eq!(classify("Explain select 1"), StmtType::Explain);
        assert_eq!(classify("kill 42"), StmtType::Kill);
        assert_eq!(classify("use mydb"), StmtType::UseInQuery);
        assert_eq!(classify("desc mytable"), StmtType::Desc);
        assert_eq!(classify("call proc()"), StmtType::Call);
        assert_eq!(classify("insert into t values (1)"), StmtType::Write);
        assert_eq!(classify("delete from t"), StmtType::Write);
    }

    #[test]
    fn test_set_sub_classification() {
        assert_eq!(classify("set names utf8"), StmtType::SetNames);
        assert_eq!(classify("SET NAMES gbk"), StmtType::SetNames);
        assert_eq!(classify("set charset gbk"), StmtType::SetCharset);
        assert_eq!(
            classify("set character_set_client = utf8"),
            StmtType::SetCharacterSetClient
        );
        assert_eq!(
            classify("set character_set_connection = utf8"),
            StmtType::SetCharacterSetConnection
        );
        assert_eq!(
            classify("set character_set_results = utf8"),
            StmtType::SetCharacterSetResults
        );
        assert_eq!(classify("set character set gbk"), StmtType::SetCharacterSet);
        assert_eq!(classify("set autocommit = 1"), StmtType::Set);
    }

    #[test]
    fn test_whitespace_and_semicolon_insensitive() {
        assert_eq!(classify("   select 1  ;  "), StmtType::Select);
        assert_eq!(classify("\t\nselect 1;\r\n"), StmtType::Select);
        let mut ctx = ctx_for(COM_QUERY, "  select 1 ; ");
        get_query_type(&mut ctx);
        assert_eq!(ctx.sql, "select 1");
    }

    #[test]
    fn test_comments_moved_to_ctx() {
        let mut ctx = ctx_for(COM_QUERY, "/* hint */ /* another */ select 1;");
        assert_eq!(get_query_type(&mut ctx), StmtType::Select);
        assert_eq!(ctx.sql, "select 1");
        assert_eq!(ctx.comments.len(), 2);
        assert_eq!(ctx.comments[0], "/* hint */");
    }

    #[test]
    fn test_json_hints() {
        let mut ctx = ctx_for(
            COM_QUERY,
            "/*{\"region_id\": 17, \"enable_2pc\": 1}*/ select * from t",
        );
        get_query_type(&mut ctx);
        get_json_attributes(&mut ctx);
        assert_eq!(ctx.debug_region_id, Some(17));
        assert_eq!(ctx.enable_2pc, Some(1));
    }

    #[test]
    fn test_non_json_comment_ignored() {
        let mut ctx = ctx_for(COM_QUERY, "/* plain note */ select 1");
        get_query_type(&mut ctx);
        get_json_attributes(&mut ctx);
        assert_eq!(ctx.debug_region_id, None);
        assert_eq!(ctx.enable_2pc, None);
    }

    #[test]
    fn test_empty_sql_is_unknown() {
        assert_eq!(classify("   "), StmtType::Unknown);
    }
}
