use crate::flow::FlowKey;

pub const VXLAN_HDR_LEN: usize = 8;
pub const ETH_HDR_LEN: usize = 14;
pub const IPV4_MIN_HDR_LEN: usize = 20;
/// Smallest datagram that can carry VXLAN + Ethernet + IPv4.
pub const MIN_DATAGRAM_LEN: usize = VXLAN_HDR_LEN + ETH_HDR_LEN + IPV4_MIN_HDR_LEN;

const ETHERTYPE_IPV4: u16 = 0x0800;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

/// Decoded inner flow of one VXLAN datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InnerFlow {
    pub key: FlowKey,
    /// Inner IPv4 total-length field, verbatim.
    pub total_len: u16,
}

/// Decode the inner IPv4 flow tuple of a VXLAN-encapsulated datagram.
///
/// Returns `None` for anything that is not a tracked VXLAN/IPv4 frame:
/// too short, non-IPv4 EtherType, bad version, IHL below 20 bytes, or an
/// IPv4 header extending past the datagram. Rejections are not errors;
/// the caller just skips the datagram. Ports are zero when the inner
/// protocol is neither TCP nor UDP or when the datagram is truncated
/// before the port pair.
///
/// The VXLAN header itself is not inspected; VNI filtering is out of
/// scope. IP and port bytes are captured in wire order without swapping.
#[inline]
pub fn parse(data: &[u8]) -> Option<InnerFlow> {
    if data.len() < MIN_DATAGRAM_LEN {
        return None;
    }

    let ethertype = u16::from_be_bytes([data[VXLAN_HDR_LEN + 12], data[VXLAN_HDR_LEN + 13]]);
    if ethertype != ETHERTYPE_IPV4 {
        return None;
    }

    let ip = &data[VXLAN_HDR_LEN + ETH_HDR_LEN..];
    if ip[0] >> 4 != 4 {
        return None;
    }
    let ihl = usize::from(ip[0] & 0x0F) * 4;
    if ihl < IPV4_MIN_HDR_LEN || ihl > ip.len() {
        return None;
    }

    let total_len = u16::from_be_bytes([ip[2], ip[3]]);
    let proto = ip[9];
    let src_ip = [ip[12], ip[13], ip[14], ip[15]];
    let dst_ip = [ip[16], ip[17], ip[18], ip[19]];

    let (src_port, dst_port) = match (proto, ip.get(ihl..ihl + 4)) {
        (PROTO_TCP, Some(l4)) | (PROTO_UDP, Some(l4)) => ([l4[0], l4[1]], [l4[2], l4[3]]),
        _ => ([0; 2], [0; 2]),
    };

    Some(InnerFlow {
        key: FlowKey {
            src_ip,
            dst_ip,
            proto,
            src_port,
            dst_port,
        },
        total_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    // VXLAN(8) + Ethernet(12 MAC + EtherType 0x0800) + minimal IPv4 header:
    // total_len 106, TTL 64, proto TCP, 10.1.2.3 -> 172.16.0.5
    const HEADERS_ONLY: [u8; MIN_DATAGRAM_LEN] = hex!(
        "08 00 00 00 00 30 39 00
         00 00 00 00 00 00 00 00 00 00 00 00 08 00
         45 00 00 6a 00 00 00 00 40 06 00 00 0a 01 02 03 ac 10 00 05"
    );

    // Same frame with the TCP port pair 1234 -> 80 appended.
    const WITH_PORTS: [u8; 46] = hex!(
        "08 00 00 00 00 30 39 00
         00 00 00 00 00 00 00 00 00 00 00 00 08 00
         45 00 00 6a 00 00 00 00 40 06 00 00 0a 01 02 03 ac 10 00 05
         04 d2 00 50"
    );

    #[test]
    fn accepts_minimal_datagram_with_zero_ports() {
        let flow = parse(&HEADERS_ONLY).unwrap();

        assert_eq!(flow.key.src_ip, [10, 1, 2, 3]);
        assert_eq!(flow.key.dst_ip, [172, 16, 0, 5]);
        assert_eq!(flow.key.proto, PROTO_TCP);
        // port pair falls outside the datagram: zeroed, decode still succeeds
        assert_eq!(flow.key.src_port, [0, 0]);
        assert_eq!(flow.key.dst_port, [0, 0]);
        assert_eq!(flow.total_len, 106);
    }

    #[test]
    fn reads_ports_when_present() {
        let flow = parse(&WITH_PORTS).unwrap();

        assert_eq!(flow.key.src_port, [0x04, 0xd2]);
        assert_eq!(flow.key.dst_port, [0x00, 0x50]);
        assert_eq!(u16::from_be_bytes(flow.key.src_port), 1234);
        assert_eq!(u16::from_be_bytes(flow.key.dst_port), 80);
    }

    #[test]
    fn rejects_truncated_datagram() {
        assert_eq!(parse(&HEADERS_ONLY[..MIN_DATAGRAM_LEN - 1]), None);
        assert_eq!(parse(&[]), None);
    }

    #[test]
    fn rejects_non_ipv4_ethertype() {
        let mut pkt = HEADERS_ONLY;
        // IPv6 EtherType
        pkt[VXLAN_HDR_LEN + 12] = 0x86;
        pkt[VXLAN_HDR_LEN + 13] = 0xdd;
        assert_eq!(parse(&pkt), None);
    }

    #[test]
    fn rejects_non_ipv4_version() {
        let mut pkt = HEADERS_ONLY;
        pkt[VXLAN_HDR_LEN + ETH_HDR_LEN] = 0x55;
        assert_eq!(parse(&pkt), None);
    }

    #[test]
    fn rejects_ihl_below_minimum() {
        let mut pkt = HEADERS_ONLY;
        // version 4, IHL 4 words = 16 bytes
        pkt[VXLAN_HDR_LEN + ETH_HDR_LEN] = 0x44;
        assert_eq!(parse(&pkt), None);
    }

    #[test]
    fn rejects_header_overrunning_datagram() {
        let mut pkt = HEADERS_ONLY;
        // IHL 6 words = 24 bytes, but only 20 remain
        pkt[VXLAN_HDR_LEN + ETH_HDR_LEN] = 0x46;
        assert_eq!(parse(&pkt), None);
    }

    #[test]
    fn accepts_options_and_offsets_ports_past_them() {
        // IHL 6 words = 24 bytes of IPv4 header, then the port pair
        let mut pkt = [0u8; VXLAN_HDR_LEN + ETH_HDR_LEN + 24 + 4];
        pkt[..MIN_DATAGRAM_LEN].copy_from_slice(&HEADERS_ONLY);
        pkt[VXLAN_HDR_LEN + ETH_HDR_LEN] = 0x46;
        pkt[VXLAN_HDR_LEN + ETH_HDR_LEN + 24..].copy_from_slice(&[0x1f, 0x90, 0x00, 0x35]);

        let flow = parse(&pkt).unwrap();
        assert_eq!(u16::from_be_bytes(flow.key.src_port), 8080);
        assert_eq!(u16::from_be_bytes(flow.key.dst_port), 53);
    }

    #[test]
    fn zeroes_ports_for_other_protocols() {
        let mut pkt = WITH_PORTS;
        // ICMP: the four bytes after the header are not ports
        pkt[VXLAN_HDR_LEN + ETH_HDR_LEN + 9] = 1;

        let flow = parse(&pkt).unwrap();
        assert_eq!(flow.key.proto, 1);
        assert_eq!(flow.key.src_port, [0, 0]);
        assert_eq!(flow.key.dst_port, [0, 0]);
    }

    #[test]
    fn decode_is_a_pure_function() {
        assert_eq!(parse(&WITH_PORTS), parse(&WITH_PORTS));
    }
}
