use bytes::{BufMut, BytesMut};

use super::packet::HandshakePacket;
use super::protocol::*;

/// One column of a synthetic result set.
#[derive(Debug, Clone)]
pub struct ResultField {
    pub catalog: String,
    pub db: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub charset: u16,
    pub length: u32,
    pub ftype: u8,
    pub flags: u16,
    pub decimals: u8,
}

impl ResultField {
    pub fn new(name: &str, ftype: u8) -> Self {
        Self {
            catalog: "def".to_string(),
            db: String::new(),
            table: String::new(),
            org_table: String::new(),
            name: name.to_string(),
            org_name: name.to_string(),
            charset: CHARSET_UTF8_NUM as u16,
            length: 1024,
            ftype,
            flags: 0,
            decimals: 0,
        }
    }
}

/// Outbound byte buffer with MySQL packet framing.
///
/// Packet length headers are back-patched after the payload is appended, so
/// emitters never need to pre-compute body sizes. Sequence ids are supplied
/// by the caller; the result-set emitters keep them strictly increasing.
pub struct SendBuf {
    buf: BytesMut,
    error_packed: bool,
}

impl SendBuf {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            error_packed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.error_packed = false;
    }

    /// True when the buffer currently holds an ERR reply.
    pub fn error_packed(&self) -> bool {
        self.error_packed
    }

    fn begin_packet(&mut self, seq: u8) -> usize {
        let start = self.buf.len();
        self.buf.put_slice(&[0, 0, 0, seq]);
        start
    }

    fn end_packet(&mut self, start: usize) {
        let body_len = self.buf.len() - start - 4;
        self.buf[start] = (body_len & 0xff) as u8;
        self.buf[start + 1] = ((body_len >> 8) & 0xff) as u8;
        self.buf[start + 2] = ((body_len >> 16) & 0xff) as u8;
    }

    pub fn make_handshake_packet(&mut self, handshake: &HandshakePacket) {
        let start = self.begin_packet(0);
        let payload = handshake.encode();
        self.buf.put_slice(&payload);
        self.end_packet(start);
    }

    pub fn make_ok_packet(&mut self, seq: u8, affected_rows: u64, last_insert_id: u64, info: &str) {
        let start = self.begin_packet(seq);
        self.buf.put_u8(0x00);
        write_lenenc_int(&mut self.buf, affected_rows);
        write_lenenc_int(&mut self.buf, last_insert_id);
        self.buf.put_u16_le(SERVER_STATUS_AUTOCOMMIT);
        self.buf.put_u16_le(0); // warnings
        if !info.is_empty() {
            self.buf.put_slice(info.as_bytes());
        }
        self.end_packet(start);
    }

    pub fn make_simple_ok_packet(&mut self, seq: u8) {
        self.make_ok_packet(seq, 0, 0, "");
    }

    /// Replaces whatever is pending with a single ERR packet so the error is
    /// the only reply the client sees for this command.
    pub fn make_err_packet(&mut self, seq: u8, code: u16, message: &str) {
        self.clear();
        let start = self.begin_packet(seq);
        self.buf.put_u8(0xff);
        self.buf.put_u16_le(code);
        self.buf.put_u8(b'#');
        self.buf.put_slice(b"HY000");
        self.buf.put_slice(message.as_bytes());
        self.end_packet(start);
        self.error_packed = true;
    }

    pub fn fill_auth_failed_packet(&mut self, seq: u8, message: &str) {
        self.make_err_packet(seq, ER_ACCESS_DENIED_ERROR, message);
    }

    pub fn make_eof_packet(&mut self, seq: u8) {
        let start = self.begin_packet(seq);
        self.buf.put_u8(0xfe);
        self.buf.put_u16_le(0); // warnings
        self.buf.put_u16_le(SERVER_STATUS_AUTOCOMMIT);
        self.end_packet(start);
    }

    /// Result-set header packet carrying the column count.
    pub fn make_result_header(&mut self, seq: u8, column_count: u64) {
        let start = self.begin_packet(seq);
        write_lenenc_int(&mut self.buf, column_count);
        self.end_packet(start);
    }

    pub fn make_field_packet(&mut self, field: &ResultField, seq: u8) {
        let start = self.begin_packet(seq);
        write_lenenc_str(&mut self.buf, &field.catalog);
        write_lenenc_str(&mut self.buf, &field.db);
        write_lenenc_str(&mut self.buf, &field.table);
        write_lenenc_str(&mut self.buf, &field.org_table);
        write_lenenc_str(&mut self.buf, &field.name);
        write_lenenc_str(&mut self.buf, &field.org_name);
        // Length of the fixed-size trailer
        write_lenenc_int(&mut self.buf, 0x0c);
        self.buf.put_u16_le(field.charset);
        self.buf.put_u32_le(field.length);
        self.buf.put_u8(field.ftype);
        self.buf.put_u16_le(field.flags);
        self.buf.put_u8(field.decimals);
        self.buf.put_u16(0); // filler
        self.end_packet(start);
    }

    /// Appends one text-protocol row and advances the sequence id.
    pub fn make_row_packet(&mut self, row: &[String], seq: &mut u8) {
        let start = self.begin_packet(*seq);
        for cell in row {
            write_lenenc_str(&mut self.buf, cell);
        }
        self.end_packet(start);
        *seq = seq.wrapping_add(1);
    }
}
