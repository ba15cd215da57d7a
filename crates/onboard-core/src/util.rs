// ── Diff and address helpers ──
//
// Small pure helpers shared by both reconcilers, plus the DNS existence
// check that goes through the device's own resolver.

use std::cmp::Ordering;
use std::net::IpAddr;

use serde_json::{Value, json};
use tracing::debug;

use onboard_api::{DeviceGateway, RetryPolicy};

use crate::error::CoreError;

/// Address without its `/prefix`, if any.
pub fn strip_cidr(address: &str) -> &str {
    address.split_once('/').map_or(address, |(ip, _)| ip)
}

/// Prefix length of a CIDR address, if one is present and numeric.
pub fn prefix_len(address: &str) -> Option<u8> {
    address.split_once('/').and_then(|(_, mask)| mask.parse().ok())
}

pub fn is_ip(address: &str) -> bool {
    strip_cidr(address).parse::<IpAddr>().is_ok()
}

/// Canonical textual form of an IP (shortest IPv6 notation). Strips any
/// prefix and `%route-domain`. Non-IP input comes back unchanged.
pub fn minimize_ip(address: &str) -> String {
    let bare = strip_cidr(address);
    let bare = bare.split_once('%').map_or(bare, |(ip, _)| ip);
    bare.parse::<IpAddr>()
        .map_or_else(|_| address.to_owned(), |ip| ip.to_string())
}

/// Append the host prefix (/32 or /128) to a route network that has none.
/// The `default` and `default-inet6` sentinels pass through.
pub fn with_default_prefix(network: &str) -> String {
    if network == "default" || network == "default-inet6" || network.contains('/') {
        return network.to_owned();
    }
    match network.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("{network}/128"),
        _ => format!("{network}/32"),
    }
}

/// Compare dotted version strings numerically, treating missing
/// components as zero: `"14.1.2" >= "14.0"`.
pub fn version_at_least(version: &str, minimum: &str) -> bool {
    compare_versions(version, minimum) != Ordering::Less
}

fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| {
                part.chars()
                    .take_while(char::is_ascii_digit)
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect()
    };
    let (a, b) = (parse(a), parse(b));
    let len = a.len().max(b.len());
    for i in 0..len {
        let ord = a.get(i).unwrap_or(&0).cmp(b.get(i).unwrap_or(&0));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Locally administered variant of a MAC: bit 1 of the second hex digit
/// is flipped. `fa:16:3e:4b:44:99` becomes `f8:16:3e:4b:44:99`.
pub fn derive_masquerade_mac(mac: &str) -> Option<String> {
    let mut chars: Vec<char> = mac.chars().collect();
    let nibble = chars.get(1)?.to_digit(16)?;
    let flipped = std::char::from_digit(nibble ^ 2, 16)?;
    chars[1] = flipped;
    Some(chars.into_iter().collect())
}

/// Members of `current` that are absent from `desired`.
pub fn missing_from(current: &[String], desired: &[String]) -> Vec<String> {
    current
        .iter()
        .filter(|item| !desired.contains(item))
        .cloned()
        .collect()
}

/// Confirm `address` resolves on the device. IP literals pass without a
/// lookup.
pub async fn check_dns_resolution(
    gateway: &dyn DeviceGateway,
    address: &str,
) -> Result<(), CoreError> {
    if is_ip(address) {
        return Ok(());
    }
    debug!(address, "checking DNS resolution");
    let response = gateway
        .create(
            "/tm/util/dig",
            json!({ "command": "run", "utilCmdArgs": format!("+short {address}") }),
            RetryPolicy::SHORT,
        )
        .await?;
    let resolved = response
        .get("commandResult")
        .and_then(Value::as_str)
        .is_some_and(|out| !out.trim().is_empty());
    if resolved {
        Ok(())
    } else {
        Err(CoreError::resolution(address))
    }
}

/// Single-quoted shell word for `text`; embedded quotes become `'\''`.
pub fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// Names (`name` field) of the items in a listed collection.
pub fn item_names(items: &Value) -> Vec<String> {
    items
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("name").and_then(Value::as_str))
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn strips_cidr_from_addresses() {
        assert_eq!(strip_cidr("1.2.3.4/24"), "1.2.3.4");
        assert_eq!(strip_cidr("2001:db8::5/64"), "2001:db8::5");
        assert_eq!(strip_cidr("10.0.0.1"), "10.0.0.1");
        assert_eq!(prefix_len("1.2.3.4/24"), Some(24));
        assert_eq!(prefix_len("1.2.3.4"), None);
    }

    #[test]
    fn minimizes_ipv6() {
        assert_eq!(minimize_ip("2001:0db8:0000:0000:0000:0000:0000:0001/64"), "2001:db8::1");
        assert_eq!(minimize_ip("10.0.0.1%2"), "10.0.0.1");
        assert_eq!(minimize_ip("bigip1.example.com"), "bigip1.example.com");
    }

    #[test]
    fn default_prefix_by_family() {
        assert_eq!(with_default_prefix("10.1.0.0"), "10.1.0.0/32");
        assert_eq!(with_default_prefix("2001:db8::"), "2001:db8::/128");
        assert_eq!(with_default_prefix("10.1.0.0/16"), "10.1.0.0/16");
        assert_eq!(with_default_prefix("default"), "default");
        assert_eq!(with_default_prefix("default-inet6"), "default-inet6");
    }

    #[test]
    fn version_comparison() {
        assert!(version_at_least("14.1", "14.0"));
        assert!(version_at_least("14.0.0", "14.0"));
        assert!(!version_at_least("13.1.1", "14.0"));
        assert!(version_at_least("15.1.0.4", "14.0"));
    }

    #[test]
    fn masquerade_mac_flips_local_bit() {
        assert_eq!(
            derive_masquerade_mac("fa:16:3e:4b:44:99").as_deref(),
            Some("f8:16:3e:4b:44:99")
        );
        assert_eq!(
            derive_masquerade_mac("00:50:56:aa:bb:cc").as_deref(),
            Some("02:50:56:aa:bb:cc")
        );
        assert_eq!(derive_masquerade_mac("z"), None);
    }

    #[test]
    fn missing_from_lists_extras() {
        let current = vec!["a".to_owned(), "b".to_owned(), "c".to_owned()];
        let desired = vec!["a".to_owned(), "b".to_owned()];
        assert_eq!(missing_from(&current, &desired), vec!["c".to_owned()]);
    }
}
