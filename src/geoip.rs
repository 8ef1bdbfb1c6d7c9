//! Country CIDR extraction from MaxMind GeoIP databases.

use ahash::AHashSet;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

use crate::prefix::Prefix;
use crate::{Error, Result};

#[derive(Deserialize)]
struct Country {
    iso_code: Option<String>,
}

#[derive(Deserialize)]
struct CountryRecord {
    country: Option<Country>,
}

/// Normalize an ISO country code for comparison (`hk` -> `HK`).
pub fn normalize_country(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Collect the networks of each requested country from a `.mmdb` database.
///
/// Networks are matched on `country.iso_code`. Every requested code is present
/// in the result, possibly with an empty list. Each list holds IPv4 networks
/// first, then IPv6, in address order.
pub fn extract_countries(data: Vec<u8>, countries: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
    let reader = maxminddb::Reader::from_source(data).map_err(|e| Error::GeoIp(e.to_string()))?;

    let wanted: AHashSet<String> = countries.iter().map(|c| normalize_country(c)).collect();
    let mut found: BTreeMap<String, Vec<Prefix>> =
        wanted.iter().map(|code| (code.clone(), Vec::new())).collect();

    let root = if reader.metadata.ip_version == 6 {
        "::/0"
    } else {
        "0.0.0.0/0"
    };

    let mut networks = 0usize;
    let iter = reader
        .within::<CountryRecord>(root.parse().map_err(|e| Error::GeoIp(format!("{:?}", e)))?)
        .map_err(|e| Error::GeoIp(e.to_string()))?;
    for item in iter {
        let item = item.map_err(|e| Error::GeoIp(e.to_string()))?;
        networks += 1;

        let Some(code) = item.info.country.and_then(|c| c.iso_code) else {
            continue;
        };
        let Some(list) = found.get_mut(&normalize_country(&code)) else {
            continue;
        };
        if let Some(prefix) = canonical_network(item.ip_net.ip(), item.ip_net.prefix()) {
            list.push(prefix);
        }
    }

    log::debug!("Walked {} GeoIP networks", networks);

    Ok(found
        .into_iter()
        .map(|(code, mut prefixes)| {
            prefixes.sort_unstable();
            log::info!("GeoIP {}: {} networks", code, prefixes.len());
            (code, prefixes.iter().map(|p| p.to_string()).collect())
        })
        .collect())
}

/// Convert a database network to a prefix.
///
/// IPv4 networks stored under `::/96` of an IPv6 tree come back as IPv4.
/// The `::ffff:0:0/96` and `2002::/16` aliases of the IPv4 subtree are
/// skipped so each IPv4 network is reported once.
fn canonical_network(ip: IpAddr, len: u8) -> Option<Prefix> {
    match ip {
        IpAddr::V4(_) => Prefix::from_addr(ip, len).ok(),
        IpAddr::V6(addr) => {
            let bits = u128::from(addr);
            if len >= 96 && bits >> 32 == 0 {
                return Prefix::from_addr(IpAddr::V4(Ipv4Addr::from(bits as u32)), len - 96).ok();
            }
            let mapped = len >= 96 && bits >> 32 == 0xffff;
            let six_to_four = len >= 16 && bits >> 112 == 0x2002;
            if mapped || six_to_four {
                return None;
            }
            Prefix::from_addr(ip, len).ok()
        }
    }
}
