//! Minimal MaxMind DB writer for country fixtures.
//!
//! Produces an IPv6 tree with 24-bit records. IPv4 networks are stored under
//! `::/96`, as MaxMind's own databases do, without the IPv4-mapped aliases.

use ipnet::IpNet;
use std::collections::HashMap;

const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

const TYPE_UTF8: u8 = 2;
const TYPE_UINT16: u8 = 5;
const TYPE_UINT32: u8 = 6;
const TYPE_MAP: u8 = 7;
const TYPE_UINT64: u8 = 9;
const TYPE_ARRAY: u8 = 11;

#[derive(Clone, Copy)]
enum Record {
    Empty,
    Node(usize),
    Data(usize),
}

/// Country database under construction. Networks must not overlap.
#[derive(Default)]
pub struct MmdbBuilder {
    networks: Vec<(u128, u8, String)>,
}

impl MmdbBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `cidr` to the country `iso_code`.
    pub fn insert(mut self, cidr: &str, iso_code: &str) -> Self {
        let (bits, len) = match cidr.parse::<IpNet>().unwrap() {
            IpNet::V4(net) => (u32::from(net.network()) as u128, net.prefix_len() + 96),
            IpNet::V6(net) => (u128::from(net.network()), net.prefix_len()),
        };
        assert!(len > 0);
        self.networks.push((bits, len, iso_code.to_string()));
        self
    }

    /// Serialize the database.
    pub fn build(&self) -> Vec<u8> {
        let mut data = Vec::new();
        let mut offsets: HashMap<&str, usize> = HashMap::new();
        for (_, _, iso_code) in &self.networks {
            offsets.entry(iso_code.as_str()).or_insert_with(|| {
                let offset = data.len();
                map_header(&mut data, 1);
                string(&mut data, "country");
                map_header(&mut data, 1);
                string(&mut data, "iso_code");
                string(&mut data, iso_code);
                offset
            });
        }

        let mut nodes = vec![[Record::Empty; 2]];
        for (bits, len, iso_code) in &self.networks {
            let mut node = 0;
            for depth in 0..*len {
                let bit = ((bits >> (127 - depth)) & 1) as usize;
                if depth + 1 == *len {
                    nodes[node][bit] = Record::Data(offsets[iso_code.as_str()]);
                    break;
                }
                node = match nodes[node][bit] {
                    Record::Node(next) => next,
                    Record::Empty => {
                        nodes.push([Record::Empty; 2]);
                        let next = nodes.len() - 1;
                        nodes[node][bit] = Record::Node(next);
                        next
                    }
                    Record::Data(_) => panic!("overlapping fixture network"),
                };
            }
        }

        let node_count = nodes.len() as u32;
        let mut out = Vec::new();
        for node in &nodes {
            for record in node {
                let value = match *record {
                    Record::Empty => node_count,
                    Record::Node(next) => next as u32,
                    Record::Data(offset) => node_count + 16 + offset as u32,
                };
                out.extend_from_slice(&value.to_be_bytes()[1..]);
            }
        }
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&data);

        out.extend_from_slice(METADATA_MARKER);
        map_header(&mut out, 9);
        string(&mut out, "binary_format_major_version");
        uint(&mut out, TYPE_UINT16, 2);
        string(&mut out, "binary_format_minor_version");
        uint(&mut out, TYPE_UINT16, 0);
        string(&mut out, "build_epoch");
        uint(&mut out, TYPE_UINT64, 1_700_000_000);
        string(&mut out, "database_type");
        string(&mut out, "GeoLite2-Country");
        string(&mut out, "description");
        map_header(&mut out, 1);
        string(&mut out, "en");
        string(&mut out, "cidrsift test fixture");
        string(&mut out, "ip_version");
        uint(&mut out, TYPE_UINT16, 6);
        string(&mut out, "languages");
        control(&mut out, TYPE_ARRAY, 1);
        string(&mut out, "en");
        string(&mut out, "node_count");
        uint(&mut out, TYPE_UINT32, node_count as u64);
        string(&mut out, "record_size");
        uint(&mut out, TYPE_UINT16, 24);
        out
    }
}

fn control(out: &mut Vec<u8>, kind: u8, size: usize) {
    assert!(size < 29);
    if kind <= 7 {
        out.push(kind << 5 | size as u8);
    } else {
        out.push(size as u8);
        out.push(kind - 7);
    }
}

fn map_header(out: &mut Vec<u8>, entries: usize) {
    control(out, TYPE_MAP, entries);
}

fn string(out: &mut Vec<u8>, value: &str) {
    control(out, TYPE_UTF8, value.len());
    out.extend_from_slice(value.as_bytes());
}

fn uint(out: &mut Vec<u8>, kind: u8, value: u64) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    control(out, kind, bytes.len() - skip);
    out.extend_from_slice(&bytes[skip..]);
}
