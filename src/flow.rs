use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// 32-bit FNV-1a over an arbitrary byte slice.
#[inline]
pub fn fnv1a(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(FNV_OFFSET_BASIS, |h, &b| (h ^ u32::from(b)).wrapping_mul(FNV_PRIME))
}

/// Inner 5-tuple identifying one flow.
///
/// All fields keep the byte order they had on the wire; the parser never
/// byte-swaps them. Equality and hashing both work on these raw bytes, so
/// two packets map to the same flow iff their captured bytes match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlowKey {
    pub src_ip: [u8; 4],
    pub dst_ip: [u8; 4],
    pub proto: u8,
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
}

impl FlowKey {
    /// Canonical 13-byte form: src_ip, dst_ip, proto, src_port, dst_port.
    #[inline]
    pub fn as_bytes(&self) -> [u8; 13] {
        let mut out = [0u8; 13];
        out[0..4].copy_from_slice(&self.src_ip);
        out[4..8].copy_from_slice(&self.dst_ip);
        out[8] = self.proto;
        out[9..11].copy_from_slice(&self.src_port);
        out[11..13].copy_from_slice(&self.dst_port);
        out
    }

    #[inline]
    pub fn hash(&self) -> u32 {
        fnv1a(&self.as_bytes())
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} proto {}",
            Ipv4Addr::from(self.src_ip),
            u16::from_be_bytes(self.src_port),
            Ipv4Addr::from(self.dst_ip),
            u16::from_be_bytes(self.dst_port),
            self.proto
        )
    }
}

/// One snapshot entry, 32 bytes.
///
/// The layout is part of the external contract: consumers read the flush
/// buffer as a flat array of these records, and the `--dump` file is their
/// bincode fixint little-endian image, which is byte-identical to the
/// in-memory layout.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub src_ip: [u8; 4],
    pub dst_ip: [u8; 4],
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
    pub proto: u8,
    _pad: [u8; 3],
    pub packets: u64,
    pub bytes: u64,
}

impl FlowRecord {
    pub fn new(key: &FlowKey, packets: u64, bytes: u64) -> Self {
        FlowRecord {
            src_ip: key.src_ip,
            dst_ip: key.dst_ip,
            src_port: key.src_port,
            dst_port: key.dst_port,
            proto: key.proto,
            _pad: [0; 3],
            packets,
            bytes,
        }
    }

    pub fn key(&self) -> FlowKey {
        FlowKey {
            src_ip: self.src_ip,
            dst_ip: self.dst_ip,
            proto: self.proto,
            src_port: self.src_port,
            dst_port: self.dst_port,
        }
    }
}

impl fmt::Display for FlowRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "from: {}:{}, to: {}:{}, proto: {}, packets: {}, bytes: {}",
            Ipv4Addr::from(self.src_ip),
            u16::from_be_bytes(self.src_port),
            Ipv4Addr::from(self.dst_ip),
            u16::from_be_bytes(self.dst_port),
            self.proto,
            self.packets,
            self.bytes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bincode::Options;

    fn sample_key() -> FlowKey {
        FlowKey {
            src_ip: [10, 0, 0, 1],
            dst_ip: [172, 16, 0, 1],
            proto: 6,
            src_port: [0x04, 0x00],
            dst_port: [0x00, 0x50],
        }
    }

    #[test]
    fn fnv1a_published_vectors() {
        // test vectors from the FNV reference draft
        assert_eq!(fnv1a(b""), 0x811c9dc5);
        assert_eq!(fnv1a(b"a"), 0xe40c292c);
        assert_eq!(fnv1a(b"foobar"), 0xbf9cf968);
    }

    #[test]
    fn key_bytes_are_in_canonical_order() {
        let key = sample_key();
        assert_eq!(
            key.as_bytes(),
            [10, 0, 0, 1, 172, 16, 0, 1, 6, 0x04, 0x00, 0x00, 0x50]
        );
        assert_eq!(key.hash(), fnv1a(&key.as_bytes()));
    }

    #[test]
    fn key_hash_is_deterministic() {
        let key = sample_key();
        assert_eq!(key.hash(), key.hash());

        let mut other = key;
        other.dst_port = [0x01, 0xbb];
        assert_ne!(key, other);
    }

    #[test]
    fn record_is_32_bytes() {
        assert_eq!(std::mem::size_of::<FlowRecord>(), 32);
    }

    #[test]
    fn record_bincode_image_matches_wire_layout() {
        let record = FlowRecord::new(&sample_key(), 3, 300);
        let encoded = bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .with_little_endian()
            .serialize(&record)
            .unwrap();

        assert_eq!(
            encoded,
            vec![
                10, 0, 0, 1, // src_ip as captured
                172, 16, 0, 1, // dst_ip as captured
                0x04, 0x00, // src_port 1024, network order
                0x00, 0x50, // dst_port 80, network order
                6, // proto
                0, 0, 0, // pad
                3, 0, 0, 0, 0, 0, 0, 0, // packets, host LE
                0x2c, 0x01, 0, 0, 0, 0, 0, 0, // bytes = 300, host LE
            ]
        );
    }

    #[test]
    fn record_display_renders_addresses() {
        let record = FlowRecord::new(&sample_key(), 2, 212);
        assert_eq!(
            record.to_string(),
            "from: 10.0.0.1:1024, to: 172.16.0.1:80, proto: 6, packets: 2, bytes: 212"
        );
    }
}
