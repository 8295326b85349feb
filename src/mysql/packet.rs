use bytes::{BufMut, Bytes, BytesMut};

use super::protocol::*;

/// The fixed 20-byte auth-plugin-data sent in every server handshake.
///
/// Stored scrambles in the catalog are derived against this value, so it
/// must never change between handshakes.
pub fn handshake_salt() -> [u8; 20] {
    let mut salt = [0u8; 20];
    for (i, b) in salt.iter_mut().enumerate() {
        *b = (i * 7 + 13) as u8;
    }
    salt
}

// Initial handshake from server to client (protocol v10)
pub struct HandshakePacket {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub auth_plugin_data: [u8; 20],
    pub capability_flags: u32,
    pub character_set: u8,
    pub status_flags: u16,
    pub auth_plugin_name: String,
}

impl HandshakePacket {
    pub fn new(connection_id: u32) -> Self {
        Self {
            protocol_version: 10,
            server_version: "5.7.99".to_string(),
            connection_id,
            auth_plugin_data: handshake_salt(),
            capability_flags: server_capabilities(),
            character_set: CHARSET_GBK_NUM,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            auth_plugin_name: "mysql_native_password".to_string(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        buf.put_u8(self.protocol_version);
        write_null_terminated_str(&mut buf, &self.server_version);
        buf.put_u32_le(self.connection_id);

        // Auth plugin data part 1 (8 bytes) + filler
        buf.put_slice(&self.auth_plugin_data[0..8]);
        buf.put_u8(0);

        // Capability flags (lower 2 bytes)
        buf.put_u16_le((self.capability_flags & 0xffff) as u16);

        buf.put_u8(self.character_set);
        buf.put_u16_le(self.status_flags);

        // Capability flags (upper 2 bytes)
        buf.put_u16_le(((self.capability_flags >> 16) & 0xffff) as u16);

        // Auth plugin data length
        buf.put_u8(self.auth_plugin_data.len() as u8 + 1);

        // Reserved (10 bytes)
        buf.put_bytes(0, 10);

        // Auth plugin data part 2 (12 bytes) + null terminator
        buf.put_slice(&self.auth_plugin_data[8..20]);
        buf.put_u8(0);

        write_null_terminated_str(&mut buf, &self.auth_plugin_name);

        buf.freeze()
    }

    pub fn salt(&self) -> &[u8] {
        &self.auth_plugin_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_layout() {
        let hs = HandshakePacket::new(1090);
        let buf = hs.encode();

        assert_eq!(buf[0], 10, "protocol version");
        // Connection ID starts after version string "5.7.99\0" = 8 bytes
        assert_eq!(
            1090,
            u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            "connection id"
        );
        // Character set at offset 1 + 7 + 4 + 8 + 1 + 2 = 23
        assert_eq!(buf[23], CHARSET_GBK_NUM, "charset byte");
        // Auth plugin data length at offset 23 + 1 + 2 + 2 = 28
        assert_eq!(buf[28], 21, "auth plugin data length");
    }

    #[test]
    fn test_salt_is_stable() {
        let a = HandshakePacket::new(1);
        let b = HandshakePacket::new(2);
        assert_eq!(a.salt(), b.salt());
        assert_eq!(a.salt().len(), 20);
    }
}
