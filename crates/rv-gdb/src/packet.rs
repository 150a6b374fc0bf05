//! GDB remote serial protocol framing: `$payload#cs`, the leading `+`/`-`
//! acknowledgement byte, and the stray `BREAK` (0x03) byte that can arrive
//! outside any packet.

use std::io::Read;

#[derive(Debug, thiserror::Error)]
pub enum GdbError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed packet: {0}")]
    Malformed(String),
}

/// One event read off the wire: a complete, checksum-valid packet, a
/// checksum mismatch (caller should NAK and let the client retransmit), the
/// out-of-band interrupt byte, or end of stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketEvent {
    Packet(String),
    ChecksumMismatch,
    Break,
    Eof,
}

pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Wraps `$payload#cs` framing and the two-digit lowercase hex checksum.
pub fn encode_packet(payload: &str) -> Vec<u8> {
    let cs = checksum(payload.as_bytes());
    format!("${payload}#{cs:02x}").into_bytes()
}

/// Reads one `PacketEvent` from `reader`, a byte at a time. Ignores stray
/// `+`/`-` ack bytes and anything else seen outside a `$...#cs` frame
/// (matches how real `gdbserver` implementations resynchronize after noise).
pub fn read_event(reader: &mut impl Read) -> Result<PacketEvent, GdbError> {
    loop {
        let mut byte = [0u8; 1];
        match reader.read(&mut byte) {
            Ok(0) => return Ok(PacketEvent::Eof),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(PacketEvent::Eof),
            Err(e) => return Err(e.into()),
        }
        match byte[0] {
            0x03 => return Ok(PacketEvent::Break),
            b'$' => return read_payload(reader),
            _ => continue,
        }
    }
}

fn read_payload(reader: &mut impl Read) -> Result<PacketEvent, GdbError> {
    let mut payload = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        if reader.read(&mut byte)? == 0 {
            return Ok(PacketEvent::Eof);
        }
        if byte[0] == b'#' {
            break;
        }
        payload.push(byte[0]);
    }
    let mut cs_hex = [0u8; 2];
    reader.read_exact(&mut cs_hex)?;
    let cs_str = std::str::from_utf8(&cs_hex).map_err(|_| GdbError::Malformed("checksum not ascii".into()))?;
    let expected = u8::from_str_radix(cs_str, 16).map_err(|_| GdbError::Malformed("checksum not hex".into()))?;
    let actual = checksum(&payload);
    if actual != expected {
        return Ok(PacketEvent::ChecksumMismatch);
    }
    let payload = String::from_utf8(payload).map_err(|_| GdbError::Malformed("payload not utf8".into()))?;
    Ok(PacketEvent::Packet(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn encode_then_read_round_trips() {
        let encoded = encode_packet("g");
        let mut cursor = Cursor::new(encoded);
        let event = read_event(&mut cursor).unwrap();
        assert_eq!(event, PacketEvent::Packet("g".to_string()));
    }

    #[test]
    fn ack_bytes_before_a_packet_are_ignored() {
        let mut bytes = b"+".to_vec();
        bytes.extend(encode_packet("?"));
        let mut cursor = Cursor::new(bytes);
        let event = read_event(&mut cursor).unwrap();
        assert_eq!(event, PacketEvent::Packet("?".to_string()));
    }

    #[test]
    fn corrupted_checksum_is_reported() {
        let mut bytes = encode_packet("g");
        let last = bytes.len() - 1;
        bytes[last] = b'0';
        bytes[last - 1] = b'0';
        let mut cursor = Cursor::new(bytes);
        let event = read_event(&mut cursor).unwrap();
        assert_eq!(event, PacketEvent::ChecksumMismatch);
    }

    #[test]
    fn break_byte_outside_a_packet_is_reported() {
        let mut cursor = Cursor::new(vec![0x03u8]);
        let event = read_event(&mut cursor).unwrap();
        assert_eq!(event, PacketEvent::Break);
    }

    #[test]
    fn empty_stream_is_eof() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let event = read_event(&mut cursor).unwrap();
        assert_eq!(event, PacketEvent::Eof);
    }
}
