//! Randomized properties of aggregation, checked exhaustively over small
//! address windows against an independent bitmap.

use cidrsift::{aggregate, AggregateOptions, Family, Prefix, PrefixSet};
use ipnet::IpNet;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const WINDOW: u128 = 4096;
const V4_BASE: u128 = 0x0a00_0000; // 10.0.0.0/20
const V6_BASE: u128 = 0x2001_0db8_0000_0000_0000_0000_0000_0000; // 2001:db8::/116

fn addr(family: Family, bits: u128) -> IpAddr {
    match family {
        Family::V4 => IpAddr::V4(Ipv4Addr::from(bits as u32)),
        Family::V6 => IpAddr::V6(Ipv6Addr::from(bits)),
    }
}

fn window_base(family: Family) -> u128 {
    match family {
        Family::V4 => V4_BASE,
        Family::V6 => V6_BASE,
    }
}

fn random_prefix(rng: &mut StdRng, family: Family) -> Prefix {
    let max = family.max_len();
    let len = max - rng.random_range(0..13u8);
    let bits = window_base(family) + rng.random_range(0..WINDOW);
    Prefix::new(family, bits, len).unwrap()
}

fn random_input(rng: &mut StdRng, count: usize) -> Vec<Prefix> {
    (0..count)
        .map(|_| {
            let family = if rng.random_bool(0.5) { Family::V4 } else { Family::V6 };
            random_prefix(rng, family)
        })
        .collect()
}

/// Bitmap of covered offsets inside the window, computed without the crate.
fn oracle(input: &[Prefix], family: Family) -> Vec<bool> {
    let base = window_base(family);
    let mut covered = vec![false; WINDOW as usize];
    for p in input.iter().filter(|p| p.family() == family) {
        let size = 1u128 << (family.max_len() - p.prefix_len());
        let start = p.base() - base;
        for offset in start..start + size {
            covered[offset as usize] = true;
        }
    }
    covered
}

fn run(input: &[Prefix], merge_adjacent: bool) -> PrefixSet {
    let raw: Vec<String> = input.iter().map(|p| p.to_string()).collect();
    aggregate(&raw, AggregateOptions { merge_adjacent }).set
}

fn check_invariants(input: &[Prefix], set: &PrefixSet, merged: bool) {
    for family in [Family::V4, Family::V6] {
        let members = match family {
            Family::V4 => set.v4(),
            Family::V6 => set.v6(),
        };
        assert!(members.iter().all(|p| p.family() == family));

        for (i, a) in members.iter().enumerate() {
            for b in &members[i + 1..] {
                assert!(!a.contains(b) && !b.contains(a), "{} overlaps {}", a, b);
                if merged {
                    assert!(!a.is_sibling_of(b), "{} and {} should merge", a, b);
                }
            }
        }

        let covered = oracle(input, family);
        let base = window_base(family);
        for (offset, &expected) in covered.iter().enumerate() {
            let ip = addr(family, base + offset as u128);
            let holders = members.iter().filter(|p| p.contains_addr(ip)).count();
            assert_eq!(holders, usize::from(expected), "coverage of {}", ip);
            assert_eq!(set.is_member(ip), expected, "membership of {}", ip);
            if let Some(found) = set.find(ip) {
                assert!(found.contains_addr(ip));
            }
        }
    }
}

#[test]
fn test_random_inputs_without_merge() {
    let mut rng = StdRng::seed_from_u64(0x9e37_79b9_7f4a_7c15);
    for round in 0..40 {
        let input = random_input(&mut rng, 1 + round * 3);
        let set = run(&input, false);
        check_invariants(&input, &set, false);

        // Without merging, every output is one of the inputs.
        let given: BTreeSet<Prefix> = input.iter().copied().collect();
        assert!(set.iter().all(|p| given.contains(p)));
    }
}

#[test]
fn test_random_inputs_with_merge() {
    let mut rng = StdRng::seed_from_u64(0x2545_f491_4f6c_dd1d);
    for round in 0..40 {
        let input = random_input(&mut rng, 1 + round * 3);
        let set = run(&input, true);
        check_invariants(&input, &set, true);
    }
}

#[test]
fn test_idempotent_on_random_inputs() {
    let mut rng = StdRng::seed_from_u64(0xdead_beef_cafe_f00d);
    for merge in [false, true] {
        for _ in 0..20 {
            let input = random_input(&mut rng, 60);
            let once = run(&input, merge);
            let lines = once.to_lines();
            let twice = aggregate(&lines, AggregateOptions { merge_adjacent: merge }).set;
            assert_eq!(once, twice);
        }
    }
}

#[test]
fn test_merge_matches_ipnet() {
    let mut rng = StdRng::seed_from_u64(0x0123_4567_89ab_cdef);
    for _ in 0..30 {
        let input = random_input(&mut rng, 50);
        let nets: Vec<IpNet> = input.iter().map(|p| IpNet::try_from(*p).unwrap()).collect();
        let expected: BTreeSet<Prefix> = IpNet::aggregate(&nets).into_iter().map(Prefix::from).collect();

        let ours: BTreeSet<Prefix> = run(&input, true).iter().copied().collect();
        assert_eq!(ours, expected);
    }
}

#[test]
fn test_merge_never_grows_output() {
    let mut rng = StdRng::seed_from_u64(0x5151_5151_5151_5151);
    for _ in 0..30 {
        let input = random_input(&mut rng, 80);
        assert!(run(&input, true).len() <= run(&input, false).len());
    }
}

#[test]
fn test_input_order_irrelevant() {
    let mut rng = StdRng::seed_from_u64(0x7777_0000_7777_0000);
    let input = random_input(&mut rng, 100);
    let mut reversed = input.clone();
    reversed.reverse();
    for merge in [false, true] {
        assert_eq!(run(&input, merge), run(&reversed, merge));
    }
}
