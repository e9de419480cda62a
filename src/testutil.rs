//! Hand-built frames shared by the unit tests.

/// Build an Ethernet + IPv4 + TCP frame with the given header fields and
/// payload. Checksums are left zero; nothing in the decode path reads them.
pub(crate) fn tcp_frame(
    src_ip: [u8; 4],
    dst_ip: [u8; 4],
    src_port: u16,
    dst_port: u16,
    flags: u8,
    seq: u32,
    ack: u32,
    payload: &[u8],
) -> Vec<u8> {
    let mut frame = Vec::with_capacity(54 + payload.len());

    // Ethernet
    frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x01]);
    frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x02]);
    frame.extend_from_slice(&0x0800u16.to_be_bytes());

    // IPv4
    let total_len = (20 + 20 + payload.len()) as u16;
    frame.push(0x45);
    frame.push(0);
    frame.extend_from_slice(&total_len.to_be_bytes());
    frame.extend_from_slice(&[0, 0, 0, 0]); // id, frag
    frame.push(64); // ttl
    frame.push(6); // tcp
    frame.extend_from_slice(&[0, 0]); // checksum
    frame.extend_from_slice(&src_ip);
    frame.extend_from_slice(&dst_ip);

    // TCP
    frame.extend_from_slice(&src_port.to_be_bytes());
    frame.extend_from_slice(&dst_port.to_be_bytes());
    frame.extend_from_slice(&seq.to_be_bytes());
    frame.extend_from_slice(&ack.to_be_bytes());
    frame.push(0x50); // data offset: 5 words
    frame.push(flags);
    frame.extend_from_slice(&0xffffu16.to_be_bytes()); // window
    frame.extend_from_slice(&[0, 0]); // checksum
    frame.extend_from_slice(&[0, 0]); // urgent pointer

    frame.extend_from_slice(payload);
    frame
}
