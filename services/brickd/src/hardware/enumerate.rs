use bd_protocol::{encode_uid, function_id, EnumerationType, Header, Packet, HEADER_LEN};

/// Synthesizes an `ENUMERATE` callback announcing that `uid` is gone.
///
/// Position, hardware/firmware version, and device identifier are not
/// tracked by the recipient tables this daemon keeps (they only remember
/// that a uid was seen behind a given stack, not its last enumerate
/// payload), so those fields are zeroed here. `uid` and `enumeration_type`
/// are the only fields a client can rely on in a synthetic announcement.
pub fn build_enumerate_disconnected(uid: u32) -> Packet {
    let mut payload = Vec::with_capacity(24);
    payload.extend_from_slice(&pad_uid_field(uid));
    payload.extend_from_slice(&pad_uid_field(0));
    payload.push(0); // position
    payload.extend_from_slice(&[0, 0, 0]); // hardware_version
    payload.extend_from_slice(&[0, 0, 0]); // firmware_version
    payload.extend_from_slice(&0u16.to_le_bytes()); // device_identifier
    payload.push(EnumerationType::Disconnected as u8);

    let header = Header {
        uid,
        length: (HEADER_LEN + payload.len()) as u8,
        function_id: function_id::ENUMERATE,
        sequence_number: 0,
        response_expected: false,
        error_code_bits: 0,
    };
    Packet { header, payload }
}

fn pad_uid_field(uid: u32) -> [u8; 8] {
    let encoded = encode_uid(uid);
    let mut field = [0u8; 8];
    let bytes = encoded.as_bytes();
    let n = bytes.len().min(8);
    field[..n].copy_from_slice(&bytes[..n]);
    field
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnected_callback_carries_uid_and_type() {
        let packet = build_enumerate_disconnected(42);
        assert_eq!(packet.header.uid, 42);
        assert_eq!(packet.header.sequence_number, 0);
        assert_eq!(packet.header.function_id, function_id::ENUMERATE);
        assert_eq!(*packet.payload.last().unwrap(), EnumerationType::Disconnected as u8);
    }
}
