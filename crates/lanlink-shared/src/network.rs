//! Network grouping: map a client address to a subnet-derived group key.
//!
//! The grouping is deliberately coarse -- the first three octets of an IPv4
//! address (a /24-equivalent), or the first four segments of an IPv6 address.
//! It is not a true CIDR calculation and does not consult interface netmasks;
//! two hosts on the same physical network behind different /23 halves will
//! land in different groups.  Known limitation, kept on purpose.

use crate::types::{DeviceType, GroupKey};

/// Derive the group key for a raw client address string.
///
/// Handles IPv4, IPv4-mapped-IPv6 (`::ffff:a.b.c.d`) and plain IPv6.
/// Loopback addresses yield `None` unless `allow_loopback` is set (local
/// testing only).  Unparseable input yields `None`, never an error --
/// callers treat "no group" as a normal outcome.
pub fn subnet_for_addr(addr: &str, allow_loopback: bool) -> Option<GroupKey> {
    if addr.is_empty() {
        return None;
    }

    let mut normalized = addr;

    if let Some(stripped) = addr.strip_prefix("::ffff:") {
        normalized = stripped;
    }

    if addr == "::1" {
        normalized = "127.0.0.1";
    }

    if !allow_loopback && normalized == "127.0.0.1" {
        return None;
    }

    // IPv4: first three octets.
    if normalized.contains('.') {
        let parts: Vec<&str> = normalized.split('.').collect();
        if parts.len() == 4 {
            return Some(GroupKey(parts[..3].join(".")));
        }
        return None;
    }

    // IPv6 (simplified): first four segments of the original form.
    if addr.contains(':') {
        let parts: Vec<&str> = addr.split(':').collect();
        if parts.len() >= 4 {
            return Some(GroupKey(parts[..4].join(":")));
        }
    }

    None
}

/// True if the raw address is a loopback form the resolver would normalize.
pub fn is_loopback_addr(addr: &str) -> bool {
    addr == "::1" || addr == "127.0.0.1" || addr == "::ffff:127.0.0.1"
}

/// Generate a display name for a new group.
///
/// An SSID reported by the client wins.  Otherwise the configured
/// `patterns` (subnet-prefix, name) pairs are consulted in order; these are
/// deployment-specific data, not behavior.  Fallback is a generic name
/// built from the subnet's last octet.
pub fn generate_group_name(
    subnet: &GroupKey,
    ssid: Option<&str>,
    patterns: &[(String, String)],
) -> String {
    if let Some(ssid) = ssid {
        if !ssid.is_empty() {
            return format!("{ssid} Network");
        }
    }

    for (prefix, name) in patterns {
        if subnet.as_str().starts_with(prefix.as_str()) {
            return name.clone();
        }
    }

    let last_octet = subnet
        .as_str()
        .rsplit(['.', ':'])
        .next()
        .unwrap_or(subnet.as_str());
    format!("Local Network {last_octet}")
}

/// Classify the connecting device from its user agent string.
pub fn detect_device_type(user_agent: Option<&str>) -> DeviceType {
    let Some(ua) = user_agent else {
        return DeviceType::Laptop;
    };
    let ua = ua.to_lowercase();

    if ua.contains("mobile") || ua.contains("android") || ua.contains("iphone") {
        DeviceType::Phone
    } else if ua.contains("tablet") || ua.contains("ipad") {
        DeviceType::Tablet
    } else if ua.contains("windows") || ua.contains("macintosh") || ua.contains("linux") {
        DeviceType::Desktop
    } else {
        DeviceType::Laptop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_first_three_octets() {
        assert_eq!(
            subnet_for_addr("192.168.1.42", false),
            Some(GroupKey::from("192.168.1"))
        );
        assert_eq!(
            subnet_for_addr("10.0.0.7", false),
            Some(GroupKey::from("10.0.0"))
        );
    }

    #[test]
    fn ipv4_mapped_ipv6_is_stripped() {
        assert_eq!(
            subnet_for_addr("::ffff:172.16.4.9", false),
            Some(GroupKey::from("172.16.4"))
        );
    }

    #[test]
    fn ipv6_first_four_segments() {
        assert_eq!(
            subnet_for_addr("2001:db8:85a3:8d3:1319:8a2e:370:7348", false),
            Some(GroupKey::from("2001:db8:85a3:8d3"))
        );
    }

    #[test]
    fn loopback_rejected_by_default() {
        assert_eq!(subnet_for_addr("127.0.0.1", false), None);
        assert_eq!(subnet_for_addr("::1", false), None);
        assert_eq!(subnet_for_addr("::ffff:127.0.0.1", false), None);
    }

    #[test]
    fn loopback_allowed_with_flag() {
        assert_eq!(
            subnet_for_addr("127.0.0.1", true),
            Some(GroupKey::from("127.0.0"))
        );
        assert_eq!(
            subnet_for_addr("::1", true),
            Some(GroupKey::from("127.0.0"))
        );
    }

    #[test]
    fn garbage_yields_no_group() {
        assert_eq!(subnet_for_addr("", false), None);
        assert_eq!(subnet_for_addr("not-an-address", false), None);
        assert_eq!(subnet_for_addr("10.0.0", false), None);
        assert_eq!(subnet_for_addr("fe80::1", false), None);
    }

    #[test]
    fn group_name_prefers_ssid() {
        let subnet = GroupKey::from("192.168.1");
        assert_eq!(
            generate_group_name(&subnet, Some("CoffeeShop"), &[]),
            "CoffeeShop Network"
        );
    }

    #[test]
    fn group_name_uses_configured_patterns() {
        let patterns = vec![("192.168.1".to_string(), "Home WiFi".to_string())];
        assert_eq!(
            generate_group_name(&GroupKey::from("192.168.1"), None, &patterns),
            "Home WiFi"
        );
    }

    #[test]
    fn group_name_fallback_uses_last_octet() {
        assert_eq!(
            generate_group_name(&GroupKey::from("10.20.30"), None, &[]),
            "Local Network 30"
        );
    }

    #[test]
    fn device_type_detection() {
        assert_eq!(detect_device_type(None), DeviceType::Laptop);
        assert_eq!(
            detect_device_type(Some("Mozilla/5.0 (iPhone; CPU iPhone OS)")),
            DeviceType::Phone
        );
        assert_eq!(
            detect_device_type(Some("Mozilla/5.0 (iPad; CPU OS 16)")),
            DeviceType::Tablet
        );
        assert_eq!(
            detect_device_type(Some("Mozilla/5.0 (Windows NT 10.0)")),
            DeviceType::Desktop
        );
    }
}
