//! Prefix aggregation: subset elimination and sibling merging.
//!
//! Raw CIDR strings are parsed into canonical [`Prefix`] values, grouped by
//! family, and reduced to the smallest non-overlapping set covering the same
//! addresses. The two families are reduced independently.

use std::collections::BTreeMap;

use crate::prefix::{Family, Prefix, PrefixSet};

/// Aggregation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateOptions {
    /// Merge equal-length siblings into their parent, repeatedly.
    pub merge_adjacent: bool,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            merge_adjacent: true,
        }
    }
}

/// Counters reported for one aggregation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateStats {
    /// Entries offered to the aggregator
    pub input: usize,
    /// Entries dropped because they did not parse
    pub invalid: usize,
    /// Prefixes in the resulting set
    pub output: usize,
}

/// Result of aggregating one list of CIDRs.
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub set: PrefixSet,
    pub stats: AggregateStats,
}

/// Aggregate raw CIDR strings into a canonical [`PrefixSet`].
///
/// Entries may be `address/length` or bare addresses. Malformed entries are
/// dropped and counted in [`AggregateStats::invalid`].
///
/// # Examples
/// ```
/// use cidrsift::{aggregate, AggregateOptions};
///
/// let result = aggregate(["1.1.1.0/25", "1.1.1.128/25", "junk"], AggregateOptions::default());
/// assert_eq!(result.set.to_lines(), vec!["1.1.1.0/24"]);
/// assert_eq!(result.stats.invalid, 1);
/// ```
pub fn aggregate<I, S>(raw: I, options: AggregateOptions) -> Aggregation
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut stats = AggregateStats::default();
    let mut v4 = Vec::new();
    let mut v6 = Vec::new();

    for entry in raw {
        stats.input += 1;
        let entry = entry.as_ref();
        match entry.parse::<Prefix>() {
            Ok(prefix) => match prefix.family() {
                Family::V4 => v4.push(prefix),
                Family::V6 => v6.push(prefix),
            },
            Err(e) => {
                stats.invalid += 1;
                log::debug!("Dropping CIDR entry {:?}: {}", entry, e);
            }
        }
    }

    let (v4, v6) = if v4.is_empty() || v6.is_empty() {
        (reduce(v4, options), reduce(v6, options))
    } else {
        std::thread::scope(|scope| {
            let v6_handle = scope.spawn(move || reduce(v6, options));
            let v4 = reduce(v4, options);
            let v6 = v6_handle
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
            (v4, v6)
        })
    };

    let set = PrefixSet::from_canonical(v4, v6);
    stats.output = set.len();
    Aggregation { set, stats }
}

/// Aggregate each labelled CIDR list independently.
pub fn aggregate_labeled(
    labeled: &BTreeMap<String, Vec<String>>,
    options: AggregateOptions,
) -> BTreeMap<String, Aggregation> {
    labeled
        .iter()
        .map(|(label, raw)| {
            let result = aggregate(raw, options);
            log::debug!(
                "Aggregated {}: {} entries -> {} prefixes ({} invalid)",
                label,
                result.stats.input,
                result.stats.output,
                result.stats.invalid
            );
            (label.clone(), result)
        })
        .collect()
}

/// Reduce one family's prefixes to canonical form.
fn reduce(mut prefixes: Vec<Prefix>, options: AggregateOptions) -> Vec<Prefix> {
    prefixes.sort_unstable();
    prefixes.dedup();

    let kept = eliminate_subsets(prefixes);
    if options.merge_adjacent {
        merge_siblings(kept)
    } else {
        kept
    }
}

/// Drop every prefix contained in another one.
///
/// Input must be sorted by `(base, len)`. Any container of a prefix sorts
/// before it, and accepted prefixes are disjoint, so the only accepted
/// prefix that can contain the next candidate is the last one accepted.
fn eliminate_subsets(sorted: Vec<Prefix>) -> Vec<Prefix> {
    let mut kept: Vec<Prefix> = Vec::with_capacity(sorted.len());
    for candidate in sorted {
        if let Some(last) = kept.last() {
            if last.contains(&candidate) {
                continue;
            }
        }
        kept.push(candidate);
    }
    kept
}

/// Collapse sibling pairs into their parents until none remain.
///
/// Input must be sorted and non-overlapping. A prefix's lower sibling can
/// only ever be the top of the stack, and a freshly merged parent may in
/// turn pair with the new top, so a single pass reaches the fixed point.
fn merge_siblings(sorted: Vec<Prefix>) -> Vec<Prefix> {
    let mut merged: Vec<Prefix> = Vec::with_capacity(sorted.len());
    for prefix in sorted {
        let mut current = prefix;
        while let Some(top) = merged.last() {
            if !top.is_sibling_of(&current) {
                break;
            }
            match current.parent() {
                Some(parent) => {
                    merged.pop();
                    current = parent;
                }
                None => break,
            }
        }
        merged.push(current);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str], merge_adjacent: bool) -> Vec<String> {
        aggregate(raw, AggregateOptions { merge_adjacent }).set.to_lines()
    }

    #[test]
    fn test_subset_dropped() {
        assert_eq!(
            lines(&["1.1.1.0/24", "1.1.1.0/25", "1.1.2.0/24"], false),
            vec!["1.1.1.0/24", "1.1.2.0/24"]
        );
    }

    #[test]
    fn test_broader_entry_replaces_narrower() {
        assert_eq!(
            lines(&["10.1.0.0/16", "10.2.3.0/24", "10.0.0.0/8", "10.3.3.3"], false),
            vec!["10.0.0.0/8"]
        );
    }

    #[test]
    fn test_siblings_merge() {
        assert_eq!(lines(&["1.1.1.0/25", "1.1.1.128/25"], true), vec!["1.1.1.0/24"]);
        assert_eq!(
            lines(&["1.1.1.0/25", "1.1.1.128/25"], false),
            vec!["1.1.1.0/25", "1.1.1.128/25"]
        );
    }

    #[test]
    fn test_merge_cascades() {
        // Four /26 quarters collapse to one /24.
        assert_eq!(
            lines(
                &["192.0.2.192/26", "192.0.2.0/26", "192.0.2.128/26", "192.0.2.64/26"],
                true
            ),
            vec!["192.0.2.0/24"]
        );
        // Uneven pieces: /25 + /26 + /26.
        assert_eq!(
            lines(&["192.0.2.0/25", "192.0.2.128/26", "192.0.2.192/26"], true),
            vec!["192.0.2.0/24"]
        );
    }

    #[test]
    fn test_adjacent_non_siblings_stay_apart() {
        // Contiguous but not halves of a common parent.
        assert_eq!(
            lines(&["10.0.1.0/24", "10.0.2.0/24"], true),
            vec!["10.0.1.0/24", "10.0.2.0/24"]
        );
    }

    #[test]
    fn test_whole_space_merges() {
        assert_eq!(lines(&["0.0.0.0/1", "128.0.0.0/1"], true), vec!["0.0.0.0/0"]);
        assert_eq!(lines(&["::/1", "8000::/1"], true), vec!["::/0"]);
    }

    #[test]
    fn test_host_duplicates_collapse() {
        assert_eq!(
            lines(&["8.8.8.8", "8.8.8.8/32", "2001:db8::1", "2001:db8::1/128"], false),
            vec!["8.8.8.8/32", "2001:db8::1/128"]
        );
    }

    #[test]
    fn test_families_kept_apart() {
        let result = aggregate(
            ["0.0.0.0/0", "::/0", "1.2.3.0/24", "2001:db8::/32"],
            AggregateOptions::default(),
        );
        assert_eq!(result.set.to_lines(), vec!["0.0.0.0/0", "::/0"]);
        assert_eq!(result.set.v4().len(), 1);
        assert_eq!(result.set.v6().len(), 1);
    }

    #[test]
    fn test_empty_input() {
        let result = aggregate(Vec::<String>::new(), AggregateOptions::default());
        assert!(result.set.is_empty());
        assert_eq!(result.stats, AggregateStats::default());
    }

    #[test]
    fn test_invalid_entries_counted() {
        let result = aggregate(
            ["1.1.1.0/24", "", "bogus", "1.1.1.1/40", "AS13335"],
            AggregateOptions::default(),
        );
        assert_eq!(result.set.to_lines(), vec!["1.1.1.0/24"]);
        assert_eq!(
            result.stats,
            AggregateStats {
                input: 5,
                invalid: 4,
                output: 1
            }
        );
    }

    #[test]
    fn test_output_is_sorted() {
        assert_eq!(
            lines(&["2400:cb00::/32", "172.64.0.0/13", "104.16.0.0/13", "103.21.244.0/22"], true),
            vec!["103.21.244.0/22", "104.16.0.0/13", "172.64.0.0/13", "2400:cb00::/32"]
        );
    }

    #[test]
    fn test_labeled() {
        let mut input = BTreeMap::new();
        input.insert(
            "HK".to_string(),
            vec!["1.1.1.0/25".to_string(), "1.1.1.128/25".to_string()],
        );
        input.insert("JP".to_string(), vec!["1.1.1.0/25".to_string()]);

        let result = aggregate_labeled(&input, AggregateOptions::default());
        assert_eq!(result["HK"].set.to_lines(), vec!["1.1.1.0/24"]);
        // Labels never merge with each other.
        assert_eq!(result["JP"].set.to_lines(), vec!["1.1.1.0/25"]);
    }

    #[test]
    fn test_idempotent() {
        let raw = ["1.1.1.0/25", "1.1.1.128/25", "1.1.2.0/24", "1.1.3.0/24", "fd00::/9", "fd80::/9"];
        let once = aggregate(raw, AggregateOptions::default()).set;
        let twice = aggregate(once.to_lines(), AggregateOptions::default()).set;
        assert_eq!(once, twice);
        assert_eq!(once.to_lines(), vec!["1.1.1.0/24", "1.1.2.0/23", "fd00::/8"]);
    }
}
