//! Canonical IP prefixes backed by fixed-width integers.
//!
//! A [`Prefix`] stores its base address as a `u128` for both families
//! (IPv4 uses the low 32 bits), so containment and sibling tests are plain
//! bitmask arithmetic.

mod set;

pub use set::PrefixSet;

use ipnet::{IpNet, Ipv4Net, Ipv6Net, PrefixLenError};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::PrefixError;

/// Address family of a prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    /// Number of bits in an address of this family.
    pub fn max_len(self) -> u8 {
        match self {
            Family::V4 => 32,
            Family::V6 => 128,
        }
    }

    /// All-ones value for this family's address width.
    fn full_mask(self) -> u128 {
        match self {
            Family::V4 => u32::MAX as u128,
            Family::V6 => u128::MAX,
        }
    }

    /// Family of an address.
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }
}

/// Split an address into its family and integer value.
pub(crate) fn addr_bits(addr: IpAddr) -> (Family, u128) {
    match addr {
        IpAddr::V4(v4) => (Family::V4, u32::from(v4) as u128),
        IpAddr::V6(v6) => (Family::V6, u128::from(v6)),
    }
}

fn bits_to_addr(family: Family, bits: u128) -> IpAddr {
    match family {
        Family::V4 => IpAddr::V4(Ipv4Addr::from(bits as u32)),
        Family::V6 => IpAddr::V6(Ipv6Addr::from(bits)),
    }
}

/// An IP network prefix in canonical form.
///
/// Host bits beyond `len` are always zero, so two prefixes are equal exactly
/// when family, base and length match. The derived ordering is ascending by
/// `(family, base, len)`, which is the canonical output order.
///
/// # Examples
/// ```
/// use cidrsift::Prefix;
///
/// let p: Prefix = "10.1.2.3/8".parse().unwrap();
/// assert_eq!(p.to_string(), "10.0.0.0/8");
/// assert!(p.contains_addr("10.200.0.1".parse().unwrap()));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Prefix {
    family: Family,
    base: u128,
    len: u8,
}

impl Prefix {
    /// Create a prefix, clearing any host bits in `base`.
    pub fn new(family: Family, base: u128, len: u8) -> Result<Self, PrefixError> {
        let max = family.max_len();
        if len > max {
            return Err(PrefixError::InvalidLength { len, max });
        }
        let base = base & family.full_mask() & mask_for(family, len);
        Ok(Self { family, base, len })
    }

    /// Create a prefix from an address and a length.
    pub fn from_addr(addr: IpAddr, len: u8) -> Result<Self, PrefixError> {
        let (family, bits) = addr_bits(addr);
        Self::new(family, bits, len)
    }

    /// Host prefix (/32 or /128) for a single address.
    pub fn host(addr: IpAddr) -> Self {
        let (family, bits) = addr_bits(addr);
        Self {
            family,
            base: bits,
            len: family.max_len(),
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    /// Base address as an integer (low 32 bits for IPv4).
    pub fn base(&self) -> u128 {
        self.base
    }

    pub fn prefix_len(&self) -> u8 {
        self.len
    }

    /// Network mask as an integer.
    pub fn mask(&self) -> u128 {
        mask_for(self.family, self.len)
    }

    /// First address of the range.
    pub fn network(&self) -> IpAddr {
        bits_to_addr(self.family, self.base)
    }

    /// Last address of the range.
    pub fn last(&self) -> IpAddr {
        bits_to_addr(self.family, self.last_bits())
    }

    pub(crate) fn last_bits(&self) -> u128 {
        self.base | (!self.mask() & self.family.full_mask())
    }

    /// Check whether an integer address of the given family lies in this prefix.
    pub(crate) fn contains_bits(&self, family: Family, bits: u128) -> bool {
        self.family == family && bits & self.mask() == self.base
    }

    /// Check whether an address lies in this prefix.
    pub fn contains_addr(&self, addr: IpAddr) -> bool {
        let (family, bits) = addr_bits(addr);
        self.contains_bits(family, bits)
    }

    /// Check whether `other` is wholly contained in this prefix.
    ///
    /// A prefix contains itself. Prefixes of different families never
    /// contain each other.
    pub fn contains(&self, other: &Prefix) -> bool {
        self.family == other.family
            && other.len >= self.len
            && other.base & self.mask() == self.base
    }

    /// The prefix one bit shorter that covers this one.
    pub fn parent(&self) -> Option<Prefix> {
        if self.len == 0 {
            return None;
        }
        let len = self.len - 1;
        Some(Prefix {
            family: self.family,
            base: self.base & mask_for(self.family, len),
            len,
        })
    }

    /// The other half of this prefix's parent.
    pub fn sibling(&self) -> Option<Prefix> {
        if self.len == 0 {
            return None;
        }
        let bit = 1u128 << (self.family.max_len() - self.len);
        Some(Prefix {
            family: self.family,
            base: self.base ^ bit,
            len: self.len,
        })
    }

    /// Check whether the two prefixes are the two halves of a common parent.
    pub fn is_sibling_of(&self, other: &Prefix) -> bool {
        self.sibling().as_ref() == Some(other)
    }
}

/// Mask with the top `len` bits of the family's width set.
fn mask_for(family: Family, len: u8) -> u128 {
    if len == 0 {
        return 0;
    }
    (u128::MAX << (family.max_len() - len)) & family.full_mask()
}

impl FromStr for Prefix {
    type Err = PrefixError;

    /// Parse `address/length`, or a bare address as a host prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PrefixError::Malformed(s.to_string()));
        }

        let (addr_part, len_part) = match s.split_once('/') {
            Some((addr, len)) => (addr, Some(len)),
            None => (s, None),
        };

        let addr: IpAddr = addr_part
            .parse()
            .map_err(|_| PrefixError::InvalidAddress(addr_part.to_string()))?;

        match len_part {
            None => Ok(Prefix::host(addr)),
            Some(len) => {
                if len.is_empty() || !len.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(PrefixError::Malformed(s.to_string()));
                }
                let max = Family::of(&addr).max_len();
                let len: u8 = len
                    .parse()
                    .map_err(|_| PrefixError::InvalidLength { len: u8::MAX, max })?;
                Prefix::from_addr(addr, len)
            }
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.len)
    }
}

impl TryFrom<Prefix> for IpNet {
    type Error = PrefixLenError;

    fn try_from(p: Prefix) -> Result<Self, Self::Error> {
        match p.network() {
            IpAddr::V4(v4) => Ipv4Net::new(v4, p.len).map(IpNet::V4),
            IpAddr::V6(v6) => Ipv6Net::new(v6, p.len).map(IpNet::V6),
        }
    }
}

impl From<IpNet> for Prefix {
    fn from(net: IpNet) -> Self {
        let (family, bits) = addr_bits(net.network());
        Prefix {
            family,
            base: bits,
            len: net.prefix_len(),
        }
    }
}
