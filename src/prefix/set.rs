//! Immutable, canonical prefix sets.

use std::net::IpAddr;

use super::{addr_bits, Family, Prefix};

/// A duplicate-free, non-overlapping set of prefixes, kept per family in
/// ascending `(base, len)` order.
///
/// Sets are only built by the aggregator, which guarantees that no member
/// contains another. They are read-only afterwards and can be shared across
/// tasks behind an `Arc` without locking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixSet {
    v4: Vec<Prefix>,
    v6: Vec<Prefix>,
}

impl PrefixSet {
    /// Build from per-family lists that are already sorted and non-overlapping.
    pub(crate) fn from_canonical(v4: Vec<Prefix>, v6: Vec<Prefix>) -> Self {
        debug_assert!(v4.iter().all(|p| p.family() == Family::V4));
        debug_assert!(v6.iter().all(|p| p.family() == Family::V6));
        debug_assert!(v4.windows(2).all(|w| w[0].last_bits() < w[1].base()));
        debug_assert!(v6.windows(2).all(|w| w[0].last_bits() < w[1].base()));
        Self { v4, v6 }
    }

    /// IPv4 members in canonical order.
    pub fn v4(&self) -> &[Prefix] {
        &self.v4
    }

    /// IPv6 members in canonical order.
    pub fn v6(&self) -> &[Prefix] {
        &self.v6
    }

    fn family(&self, family: Family) -> &[Prefix] {
        match family {
            Family::V4 => &self.v4,
            Family::V6 => &self.v6,
        }
    }

    /// All members, IPv4 first.
    pub fn iter(&self) -> impl Iterator<Item = &Prefix> {
        self.v4.iter().chain(self.v6.iter())
    }

    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }

    /// Find the member containing `addr`, if any.
    ///
    /// Members never overlap, so at most one prefix can match and the answer
    /// is the same one a front-to-back scan would return. The lookup is a
    /// binary search for the last member whose base is not above `addr`.
    pub fn find(&self, addr: IpAddr) -> Option<&Prefix> {
        let (family, bits) = addr_bits(addr);
        let members = self.family(family);
        let idx = members.partition_point(|p| p.base() <= bits);
        if idx == 0 {
            return None;
        }
        let candidate = &members[idx - 1];
        candidate.contains_bits(family, bits).then_some(candidate)
    }

    /// Check whether `addr` lies inside any member.
    pub fn is_member(&self, addr: IpAddr) -> bool {
        self.find(addr).is_some()
    }

    /// Render members as `addr/len` strings in canonical order.
    pub fn to_lines(&self) -> Vec<String> {
        self.iter().map(|p| p.to_string()).collect()
    }
}

impl<'a> IntoIterator for &'a PrefixSet {
    type Item = &'a Prefix;
    type IntoIter = std::iter::Chain<std::slice::Iter<'a, Prefix>, std::slice::Iter<'a, Prefix>>;

    fn into_iter(self) -> Self::IntoIter {
        self.v4.iter().chain(self.v6.iter())
    }
}
