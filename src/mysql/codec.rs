use std::io::{ErrorKind, Read, Write};

use tracing::{debug, trace};

use crate::error::{FrontendError, Result};
use super::connection::Connection;

pub const PACKET_HEADER_LEN: usize = 4;
/// Ceiling for the declared 3-byte body length.
pub const PACKET_LEN_MAX: usize = 0x00ff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete packet is available in `self_buf`.
    Ready,
    /// The socket ran dry mid-packet; cursors are preserved for resumption.
    Wait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Flushed,
    Wait,
}

impl Connection {
    /// Reads one framed packet in two resumable phases: the 4-byte header,
    /// then the body of the declared length. Returns `Wait` whenever the
    /// transport would block; the cursors pick the read back up on the next
    /// readiness event.
    pub fn read_packet(&mut self) -> Result<ReadOutcome> {
        if self.header_read_len != PACKET_HEADER_LEN {
            let want = PACKET_HEADER_LEN - self.header_read_len;
            let (got, outcome) = self.read_into_self_buf(want)?;
            self.header_read_len += got;
            if outcome == ReadOutcome::Wait || self.header_read_len < PACKET_HEADER_LEN {
                trace!(fd = self.fd, "packet header read interrupted");
                return Ok(ReadOutcome::Wait);
            }

            self.header_offset = self.self_buf.len() - PACKET_HEADER_LEN;
            let header = &self.self_buf[self.header_offset..];
            self.packet_len =
                header[0] as usize | (header[1] as usize) << 8 | (header[2] as usize) << 16;
            self.packet_id = header[3];
            self.packet_read_len = 0;

            if self.packet_len > PACKET_LEN_MAX {
                return Err(FrontendError::Protocol(format!(
                    "packet_len={} exceeds maximum {}",
                    self.packet_len, PACKET_LEN_MAX
                )));
            }
        }

        if self.packet_read_len < self.packet_len {
            let want = self.packet_len - self.packet_read_len;
            let (got, outcome) = self.read_into_self_buf(want)?;
            self.packet_read_len += got;
            if outcome == ReadOutcome::Wait || self.packet_read_len < self.packet_len {
                trace!(fd = self.fd, "packet body read interrupted");
                return Ok(ReadOutcome::Wait);
            }
        }

        self.packet_read_len = 0;
        self.header_read_len = 0;
        Ok(ReadOutcome::Ready)
    }

    /// The body of the packet most recently completed by `read_packet`.
    pub fn current_payload(&self) -> &[u8] {
        let start = self.header_offset + PACKET_HEADER_LEN;
        &self.self_buf[start..start + self.packet_len]
    }

    fn read_into_self_buf(&mut self, want: usize) -> Result<(usize, ReadOutcome)> {
        let mut chunk = vec![0u8; want];
        match self.transport.read(&mut chunk) {
            Ok(0) => Err(FrontendError::PeerClosed),
            Ok(n) => {
                self.self_buf.extend_from_slice(&chunk[..n]);
                Ok((n, ReadOutcome::Ready))
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => Ok((0, ReadOutcome::Wait)),
            Err(ref e) if e.kind() == ErrorKind::Interrupted => Ok((0, ReadOutcome::Wait)),
            Err(e) => Err(FrontendError::Io(e)),
        }
    }

    /// Flushes the pending response; resumable across partial writes. The
    /// buffer is cleared once every byte is on the wire.
    pub fn flush_send_buf(&mut self) -> Result<WriteOutcome> {
        while self.send_buf_offset < self.send_buf.len() {
            let pending = &self.send_buf.bytes()[self.send_buf_offset..];
            match self.transport.write(pending) {
                Ok(0) => {
                    return Err(FrontendError::Io(std::io::Error::new(
                        ErrorKind::WriteZero,
                        "failed to write to socket",
                    )))
                }
                Ok(n) => {
                    self.send_buf_offset += n;
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    debug!(
                        fd = self.fd,
                        sent = self.send_buf_offset,
                        total = self.send_buf.len(),
                        "partial write, waiting for writable"
                    );
                    return Ok(WriteOutcome::Wait);
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(FrontendError::Io(e)),
            }
        }
        self.send_buf.clear();
        self.send_buf_offset = 0;
        Ok(WriteOutcome::Flushed)
    }
}

/// Cursor over one packet body exposing the protocol's primitive fields.
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(FrontendError::Protocol(format!(
                "truncated packet: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16_le(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn get_u24_le(&mut self) -> Result<u32> {
        let b = self.take(3)?;
        Ok(b[0] as u32 | (b[1] as u32) << 8 | (b[2] as u32) << 16)
    }

    pub fn get_u32_le(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_lenenc_int(&mut self) -> Result<u64> {
        let first = self.get_u8()?;
        match first {
            0xfb => Ok(0),
            0xfc => Ok(self.get_u16_le()? as u64),
            0xfd => Ok(self.get_u24_le()? as u64),
            0xfe => {
                let b = self.take(8)?;
                Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            }
            v => Ok(v as u64),
        }
    }

    pub fn get_null_terminated_string(&mut self) -> Result<String> {
        let rest = &self.buf[self.pos..];
        match rest.iter().position(|&b| b == 0) {
            Some(idx) => {
                let s = String::from_utf8_lossy(&rest[..idx]).into_owned();
                self.pos += idx + 1;
                Ok(s)
            }
            None => Err(FrontendError::Protocol(
                "unterminated string in packet".to_string(),
            )),
        }
    }

    pub fn get_fixed_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Consumes the rest of the packet as SQL text.
    pub fn rest_as_sql(&mut self) -> String {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        String::from_utf8_lossy(rest).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// In-memory wire: the test pushes the bytes one readiness event would
    /// deliver, reads drain them, an empty wire reports WouldBlock.
    #[derive(Clone, Default)]
    struct TestWire {
        inbound: Arc<Mutex<Vec<u8>>>,
    }

    impl TestWire {
        fn push(&self, bytes: &[u8]) {
            self.inbound.lock().unwrap().extend_from_slice(bytes);
        }
    }

    impl Read for TestWire {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut inbound = self.inbound.lock().unwrap();
            if inbound.is_empty() {
                return Err(io::Error::new(ErrorKind::WouldBlock, "no data"));
            }
            let n = inbound.len().min(buf.len());
            buf[..n].copy_from_slice(&inbound[..n]);
            inbound.drain(..n);
            Ok(n)
        }
    }

    impl Write for TestWire {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn wired_conn() -> (TestWire, Connection) {
        let wire = TestWire::default();
        let conn = Connection::new(
            Box::new(wire.clone()),
            7,
            "127.0.0.1".to_string(),
            3306,
        );
        (wire, conn)
    }

    fn frame(seq: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![
            (payload.len() & 0xff) as u8,
            ((payload.len() >> 8) & 0xff) as u8,
            ((payload.len() >> 16) & 0xff) as u8,
            seq,
        ];
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_read_packet_single_event() {
        let (wire, mut conn) = wired_conn();
        wire.push(&frame(0, b"\x03select 1"));

        assert!(matches!(conn.read_packet().unwrap(), ReadOutcome::Ready));
        assert_eq!(conn.packet_id, 0);
        assert_eq!(conn.current_payload(), b"\x03select 1");
    }

    #[test]
    fn test_read_packet_resumes_across_partial_reads() {
        // Header split 3 + 1, then the body; three readiness events.
        let packet = frame(0, &[b'x'; 96]);
        let (wire, mut conn) = wired_conn();

        wire.push(&packet[..3]);
        assert!(matches!(conn.read_packet().unwrap(), ReadOutcome::Wait));
        assert_eq!(conn.header_read_len, 3);

        wire.push(&packet[3..4]);
        assert!(matches!(conn.read_packet().unwrap(), ReadOutcome::Wait));
        assert_eq!(conn.packet_len, 96);

        wire.push(&packet[4..]);
        assert!(matches!(conn.read_packet().unwrap(), ReadOutcome::Ready));
        assert_eq!(conn.current_payload().len(), 96);
        // Cursors must be reset between packets.
        assert_eq!(conn.header_read_len, 0);
        assert_eq!(conn.packet_read_len, 0);
    }

    #[test]
    fn test_reassembled_body_matches_declared_length() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(300).collect();
        let packet = frame(2, &payload);
        let (wire, mut conn) = wired_conn();

        let mut done = false;
        for chunk in packet.chunks(7) {
            wire.push(chunk);
            if matches!(conn.read_packet().unwrap(), ReadOutcome::Ready) {
                done = true;
            }
        }
        assert!(done);
        assert_eq!(conn.current_payload(), payload.as_slice());
        assert_eq!(conn.packet_id, 2);
    }

    #[test]
    fn test_max_length_header_accepted() {
        let (wire, mut conn) = wired_conn();
        wire.push(&[0xff, 0xff, 0xff, 0x00]);
        // 0xffffff == PACKET_LEN_MAX is legal; the body read then parks.
        assert!(matches!(conn.read_packet().unwrap(), ReadOutcome::Wait));
        assert_eq!(conn.packet_len, PACKET_LEN_MAX);
    }

    #[test]
    fn test_peer_close_is_an_error() {
        struct ClosedTransport;
        impl Read for ClosedTransport {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Ok(0)
            }
        }
        impl Write for ClosedTransport {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut conn = Connection::new(Box::new(ClosedTransport), 7, "".to_string(), 0);
        assert!(matches!(
            conn.read_packet(),
            Err(FrontendError::PeerClosed)
        ));
    }

    #[test]
    fn test_payload_reader_primitives() {
        let mut buf = Vec::new();
        buf.push(0x2a);
        buf.extend_from_slice(&0x0102u16.to_le_bytes());
        buf.extend_from_slice(&[0x01, 0x02, 0x03]); // u24
        buf.extend_from_slice(&0xdeadbeefu32.to_le_bytes());
        buf.extend_from_slice(b"granite\0");
        buf.extend_from_slice(b"tail");

        let mut r = PayloadReader::new(&buf);
        assert_eq!(r.get_u8().unwrap(), 0x2a);
        assert_eq!(r.get_u16_le().unwrap(), 0x0102);
        assert_eq!(r.get_u24_le().unwrap(), 0x030201);
        assert_eq!(r.get_u32_le().unwrap(), 0xdeadbeef);
        assert_eq!(r.get_null_terminated_string().unwrap(), "granite");
        assert_eq!(r.rest_as_sql(), "tail");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_payload_reader_truncation() {
        let mut r = PayloadReader::new(&[0x01]);
        assert!(r.get_u32_le().is_err());

        let mut r = PayloadReader::new(b"no-terminator");
        assert!(r.get_null_terminated_string().is_err());
    }

    #[test]
    fn test_payload_reader_lenenc() {
        let buf = [0xfcu8, 0x2c, 0x01];
        let mut r = PayloadReader::new(&buf);
        assert_eq!(r.get_lenenc_int().unwrap(), 300);
    }
}
