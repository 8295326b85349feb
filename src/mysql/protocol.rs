use bytes::{Buf, BufMut, Bytes, BytesMut};

// MySQL command bytes
pub const COM_QUIT: u8 = 0x01;
pub const COM_INIT_DB: u8 = 0x02;
pub const COM_QUERY: u8 = 0x03;
pub const COM_FIELD_LIST: u8 = 0x04;
pub const COM_CREATE_DB: u8 = 0x05;
pub const COM_DROP_DB: u8 = 0x06;
pub const COM_REFRESH: u8 = 0x07;
pub const COM_STATISTICS: u8 = 0x09;
pub const COM_PROCESS_INFO: u8 = 0x0a;
pub const COM_DEBUG: u8 = 0x0d;
pub const COM_PING: u8 = 0x0e;
pub const COM_CHANGE_USER: u8 = 0x11;
pub const COM_STMT_PREPARE: u8 = 0x16;
pub const COM_STMT_EXECUTE: u8 = 0x17;
pub const COM_STMT_CLOSE: u8 = 0x19;
pub const COM_STMT_FETCH: u8 = 0x1c;

// MySQL Capability Flags
pub const CLIENT_LONG_PASSWORD: u32 = 0x00000001;
pub const CLIENT_FOUND_ROWS: u32 = 0x00000002;
pub const CLIENT_LONG_FLAG: u32 = 0x00000004;
pub const CLIENT_CONNECT_WITH_DB: u32 = 0x00000008;
pub const CLIENT_ODBC: u32 = 0x00000040;
pub const CLIENT_IGNORE_SPACE: u32 = 0x00000100;
pub const CLIENT_PROTOCOL_41: u32 = 0x00000200;
pub const CLIENT_INTERACTIVE: u32 = 0x00000400;
pub const CLIENT_IGNORE_SIGPIPE: u32 = 0x00001000;
pub const CLIENT_TRANSACTIONS: u32 = 0x00002000;
pub const CLIENT_SECURE_CONNECTION: u32 = 0x00008000;
pub const CLIENT_MULTI_STATEMENTS: u32 = 0x00010000;
pub const CLIENT_MULTI_RESULTS: u32 = 0x00020000;
pub const CLIENT_PLUGIN_AUTH: u32 = 0x00080000;

// Server capability flags advertised in the handshake
pub fn server_capabilities() -> u32 {
    CLIENT_LONG_PASSWORD
        | CLIENT_FOUND_ROWS
        | CLIENT_LONG_FLAG
        | CLIENT_CONNECT_WITH_DB
        | CLIENT_ODBC
        | CLIENT_IGNORE_SPACE
        | CLIENT_PROTOCOL_41
        | CLIENT_INTERACTIVE
        | CLIENT_IGNORE_SIGPIPE
        | CLIENT_TRANSACTIONS
        | CLIENT_SECURE_CONNECTION
        | CLIENT_MULTI_STATEMENTS
        | CLIENT_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH
}

// Status flags
pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;

// Accepted charset code points; everything else is normalized to gbk.
pub const CHARSET_GBK_NUM: u8 = 28;
pub const CHARSET_UTF8_NUM: u8 = 33;
pub const CHARSET_GBK_NAME: &str = "gbk";
pub const CHARSET_UTF8_NAME: &str = "utf8";

// Column types
pub const MYSQL_TYPE_DECIMAL: u8 = 0x00;
pub const MYSQL_TYPE_TINY: u8 = 0x01;
pub const MYSQL_TYPE_SHORT: u8 = 0x02;
pub const MYSQL_TYPE_LONG: u8 = 0x03;
pub const MYSQL_TYPE_FLOAT: u8 = 0x04;
pub const MYSQL_TYPE_DOUBLE: u8 = 0x05;
pub const MYSQL_TYPE_NULL: u8 = 0x06;
pub const MYSQL_TYPE_TIMESTAMP: u8 = 0x07;
pub const MYSQL_TYPE_LONGLONG: u8 = 0x08;
pub const MYSQL_TYPE_INT24: u8 = 0x09;
pub const MYSQL_TYPE_DATE: u8 = 0x0a;
pub const MYSQL_TYPE_TIME: u8 = 0x0b;
pub const MYSQL_TYPE_DATETIME: u8 = 0x0c;
pub const MYSQL_TYPE_YEAR: u8 = 0x0d;
pub const MYSQL_TYPE_VARCHAR: u8 = 0x0f;
pub const MYSQL_TYPE_BIT: u8 = 0x10;
pub const MYSQL_TYPE_NEWDECIMAL: u8 = 0xf6;
pub const MYSQL_TYPE_BLOB: u8 = 0xfc;
pub const MYSQL_TYPE_VAR_STRING: u8 = 0xfd;
pub const MYSQL_TYPE_STRING: u8 = 0xfe;

// MySQL error code numbers used by the front end
pub const ER_ERROR_FIRST: u16 = 1000;
pub const ER_ERROR_ON_READ: u16 = 1024;
pub const ER_ACCESS_DENIED_ERROR: u16 = 1045;
pub const ER_NO_DB_ERROR: u16 = 1046;
pub const ER_UNKNOWN_CHARACTER_SET: u16 = 1115;
pub const ER_NOT_ALLOWED_COMMAND: u16 = 1148;
// Front-end specific codes, above the standard range
pub const ER_ERROR_COMMON: u16 = 3650;
pub const ER_MAKE_RESULT_PACKET: u16 = 3651;
pub const ER_GEN_PLAN_FAILED: u16 = 3652;
pub const ER_EXEC_PLAN_FAILED: u16 = 3653;
pub const ER_QUERY_EXCEED_QUOTA: u16 = 3654;

// Helper functions for length-encoded integers
pub fn write_lenenc_int(buf: &mut BytesMut, value: u64) {
    if value < 251 {
        buf.put_u8(value as u8);
    } else if value < 65536 {
        buf.put_u8(0xfc);
        buf.put_u16_le(value as u16);
    } else if value < 16777216 {
        buf.put_u8(0xfd);
        buf.put_uint_le(value, 3);
    } else {
        buf.put_u8(0xfe);
        buf.put_u64_le(value);
    }
}

pub fn write_lenenc_str(buf: &mut BytesMut, s: &str) {
    write_lenenc_int(buf, s.len() as u64);
    buf.put_slice(s.as_bytes());
}

pub fn write_null_terminated_str(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

pub fn read_lenenc_int(buf: &mut Bytes) -> Option<u64> {
    if buf.is_empty() {
        return None;
    }

    let first = buf.get_u8();
    match first {
        0xfb => Some(0), // NULL
        0xfc => {
            if buf.remaining() < 2 {
                return None;
            }
            Some(buf.get_u16_le() as u64)
        }
        0xfd => {
            if buf.remaining() < 3 {
                return None;
            }
            Some(buf.get_uint_le(3))
        }
        0xfe => {
            if buf.remaining() < 8 {
                return None;
            }
            Some(buf.get_u64_le())
        }
        _ => Some(first as u64),
    }
}

// Authentication token for mysql_native_password.
//
// The catalog stores the expected 20-byte client reply for the fixed
// handshake salt; the wire comparison is a plain byte-wise equality.
pub fn scramble_password(password: &str, salt: &[u8]) -> Vec<u8> {
    use sha1::{Digest, Sha1};

    // SHA1(password)
    let mut hasher = Sha1::new();
    hasher.update(password.as_bytes());
    let hash1 = hasher.finalize();

    // SHA1(SHA1(password))
    let mut hasher = Sha1::new();
    hasher.update(hash1);
    let hash2 = hasher.finalize();

    // SHA1(salt + SHA1(SHA1(password)))
    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(hash2);
    let hash3 = hasher.finalize();

    // XOR hash1 and hash3
    hash1.iter().zip(hash3.iter()).map(|(a, b)| a ^ b).collect()
}
