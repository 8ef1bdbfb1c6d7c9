//! Rule-list exclusion: drop matched rules from a larger rule list.

use ahash::AHashSet;

/// Rule lines left after exclusion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exclusion {
    /// Surviving rule lines, in input order
    pub lines: Vec<String>,
    /// Rule lines dropped because they were matched and not kept
    pub removed: usize,
}

/// Non-comment lines of a rule list, trimmed.
fn rule_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Remove from `rules` every line that appears in `matched` but not in `keep`.
///
/// Lines are compared whole after trimming, so `DOMAIN,example.com` and
/// `DOMAIN-SUFFIX,example.com` are different rules. Comment and blank lines
/// are dropped from the output.
///
/// # Examples
/// ```
/// use cidrsift::exclude::exclude_rules;
///
/// let rules = "DOMAIN,a.com\nDOMAIN,b.com\nDOMAIN,c.com\n";
/// let matched = "DOMAIN,a.com\nDOMAIN,b.com\n";
/// let keep = "DOMAIN,b.com\n";
/// let result = exclude_rules(rules, matched, keep);
/// assert_eq!(result.lines, vec!["DOMAIN,b.com", "DOMAIN,c.com"]);
/// assert_eq!(result.removed, 1);
/// ```
pub fn exclude_rules(rules: &str, matched: &str, keep: &str) -> Exclusion {
    let matched: AHashSet<&str> = rule_lines(matched).collect();
    let keep: AHashSet<&str> = rule_lines(keep).collect();

    let mut result = Exclusion::default();
    for line in rule_lines(rules) {
        if matched.contains(line) && !keep.contains(line) {
            result.removed += 1;
        } else {
            result.lines.push(line.to_string());
        }
    }
    result
}
