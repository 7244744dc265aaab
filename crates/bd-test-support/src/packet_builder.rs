use bd_protocol::{Header, Packet, HEADER_LEN};

fn build(uid: u32, function_id: u8, sequence_number: u8, response_expected: bool, payload: &[u8]) -> Vec<u8> {
    let header = Header {
        uid,
        length: (HEADER_LEN + payload.len()) as u8,
        function_id,
        sequence_number,
        response_expected,
        error_code_bits: 0,
    };
    Packet::new(header, payload.to_vec()).to_bytes()
}

/// A solicited request: non-zero `sequence_number`.
pub fn request_bytes(uid: u32, function_id: u8, sequence_number: u8, response_expected: bool, payload: &[u8]) -> Vec<u8> {
    assert_ne!(sequence_number, 0, "a request needs a non-zero sequence number");
    build(uid, function_id, sequence_number, response_expected, payload)
}

/// A response to some earlier request, carrying the same `sequence_number`
/// the request used.
pub fn response_bytes(uid: u32, function_id: u8, sequence_number: u8, payload: &[u8]) -> Vec<u8> {
    build(uid, function_id, sequence_number, false, payload)
}

/// An unsolicited callback: always `sequence_number == 0`.
pub fn callback_bytes(uid: u32, function_id: u8, payload: &[u8]) -> Vec<u8> {
    build(uid, function_id, 0, false, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bd_protocol::Packet;

    #[test]
    fn request_bytes_round_trip_via_packet_parse() {
        let bytes = request_bytes(42, 7, 3, true, &[1, 2, 3]);
        let packet = Packet::parse(&bytes).unwrap();
        assert_eq!(packet.header.uid, 42);
        assert_eq!(packet.header.function_id, 7);
        assert_eq!(packet.header.sequence_number, 3);
        assert!(packet.header.response_expected);
        assert_eq!(packet.payload, vec![1, 2, 3]);
    }

    #[test]
    fn callback_bytes_has_zero_sequence_number() {
        let bytes = callback_bytes(1, 253, &[0, 1]);
        let packet = Packet::parse(&bytes).unwrap();
        assert!(packet.header.is_callback());
    }

    #[test]
    #[should_panic(expected = "non-zero sequence number")]
    fn request_bytes_rejects_zero_sequence_number() {
        request_bytes(1, 1, 0, false, &[]);
    }
}
