//! Line-oriented parsers for raw CIDR lists and domain lists.

use ahash::AHashMap;

/// A domain to classify, with the rule tag it was listed under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainEntry {
    /// Lowercased domain name
    pub name: String,
    /// Rule tag such as `DOMAIN` or `DOMAIN-SUFFIX`, carried through untouched
    pub tag: Option<String>,
}

impl DomainEntry {
    /// Create an entry, normalizing the name.
    pub fn new(name: &str, tag: Option<&str>) -> Self {
        Self {
            name: name.trim().to_lowercase(),
            tag: tag.map(|t| t.to_string()),
        }
    }

    /// Render as `<tag>,<name>`, or the bare name when untagged.
    pub fn to_rule_line(&self) -> String {
        match &self.tag {
            Some(tag) => format!("{},{}", tag, self.name),
            None => self.name.clone(),
        }
    }
}

/// Parsed domain list.
#[derive(Debug, Clone, Default)]
pub struct DomainList {
    /// Unique entries in order of first appearance
    pub entries: Vec<DomainEntry>,
    /// Non-empty, non-comment lines that were not usable
    pub skipped: usize,
}

/// Rule tags whose value is a domain name.
const DOMAIN_TAGS: &[&str] = &["DOMAIN", "DOMAIN-SUFFIX"];

/// Rule tags whose value is a CIDR.
const CIDR_TAGS: &[&str] = &["IP-CIDR", "IP-CIDR6"];

/// Strip a trailing `#` comment and surrounding whitespace.
fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => line[..idx].trim(),
        None => line.trim(),
    }
}

/// Extract CIDR candidates from a newline-delimited list.
///
/// Accepts one CIDR or bare address per line, as well as Clash classical
/// `IP-CIDR,<cidr>[,no-resolve]` lines. Blank lines and `#` comments are
/// skipped silently. Returns the candidates and the number of lines carrying
/// some other rule type. Candidates are validated by the aggregator.
pub fn parse_cidr_lines(text: &str) -> (Vec<String>, usize) {
    let mut cidrs = Vec::new();
    let mut skipped = 0;

    for line in text.lines() {
        let line = strip_comment(line);
        if line.is_empty() {
            continue;
        }

        match line.split_once(',') {
            None => cidrs.push(line.to_string()),
            Some((tag, rest)) => {
                let tag = tag.trim().to_uppercase();
                if CIDR_TAGS.contains(&tag.as_str()) {
                    let value = rest.split(',').next().unwrap_or_default().trim();
                    cidrs.push(value.to_string());
                } else {
                    skipped += 1;
                }
            }
        }
    }

    (cidrs, skipped)
}

/// Parse a newline-delimited domain list.
///
/// Recognized shapes are `DOMAIN,<name>`, `DOMAIN-SUFFIX,<name>` and bare
/// names. Any further comma-separated fields (policy names) are ignored. A
/// leading `+.` or `.` on a name is dropped. When a name repeats, the entry
/// keeps its first position and takes the last tag seen.
pub fn parse_domain_lines(text: &str) -> DomainList {
    let mut list = DomainList::default();
    let mut index: AHashMap<String, usize> = AHashMap::new();

    for line in text.lines() {
        let line = strip_comment(line);
        if line.is_empty() {
            continue;
        }

        let (tag, value) = match line.split_once(',') {
            Some((tag, rest)) => {
                let tag = tag.trim().to_uppercase();
                if !DOMAIN_TAGS.contains(&tag.as_str()) {
                    list.skipped += 1;
                    continue;
                }
                (Some(tag), rest.split(',').next().unwrap_or_default())
            }
            None => (None, line),
        };

        let Some(name) = normalize_domain(value) else {
            log::debug!("Skipping malformed domain line {:?}", line);
            list.skipped += 1;
            continue;
        };

        let entry = DomainEntry {
            name: name.clone(),
            tag,
        };
        match index.get(&name) {
            Some(&pos) => list.entries[pos] = entry,
            None => {
                index.insert(name, list.entries.len());
                list.entries.push(entry);
            }
        }
    }

    list
}

/// Lowercase and validate a domain name.
fn normalize_domain(value: &str) -> Option<String> {
    let value = value.trim();
    let value = value
        .strip_prefix("+.")
        .or_else(|| value.strip_prefix('.'))
        .unwrap_or(value)
        .trim_end_matches('.')
        .to_lowercase();

    let valid = value.contains('.')
        && !value.starts_with('.')
        && !value.contains("..")
        && value
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '.' || c == '_');

    valid.then_some(value)
}
