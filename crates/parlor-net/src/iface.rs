//! Network interface enumeration and the usability predicate.
//!
//! An interface is worth connecting with only if it is administratively up,
//! not a loopback or point-to-point link, not a virtual sub-interface or a
//! virtualization adapter, supports multicast, and has an IPv4 address.
//! The predicate is pure over [`InterfaceInfo`] so it can be tested without
//! touching the operating system.

use std::net::{IpAddr, Ipv4Addr};

use tracing::debug;

/// Marker found in the names of VMware host-only adapters.
const VIRTUAL_ADAPTER_MARKER: &str = "vmnet";

/// A snapshot of one OS network interface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterfaceInfo {
    pub name: String,
    pub display_name: String,
    pub up: bool,
    pub loopback: bool,
    pub point_to_point: bool,
    /// Aliased sub-interface, like `eth0:1`
    pub is_virtual: bool,
    pub multicast: bool,
    pub ipv4_addresses: Vec<Ipv4Addr>,
}

impl InterfaceInfo {
    /// Whether this interface can carry the multicast chat.
    pub fn is_usable(&self) -> bool {
        self.up
            && !self.loopback
            && !self.point_to_point
            && !self.is_virtual
            && self.multicast
            && !self.name.to_lowercase().contains(VIRTUAL_ADAPTER_MARKER)
            && !self
                .display_name
                .to_lowercase()
                .contains(VIRTUAL_ADAPTER_MARKER)
            && self.has_ipv4_address()
    }

    pub fn has_ipv4_address(&self) -> bool {
        !self.ipv4_addresses.is_empty()
    }

    pub fn first_ipv4(&self) -> Option<Ipv4Addr> {
        self.ipv4_addresses.first().copied()
    }
}

impl std::fmt::Display for InterfaceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.display_name)
    }
}

fn from_datalink(iface: &pnet_datalink::NetworkInterface) -> InterfaceInfo {
    let display_name = if iface.description.is_empty() {
        iface.name.clone()
    } else {
        iface.description.clone()
    };

    InterfaceInfo {
        name: iface.name.clone(),
        display_name,
        up: iface.is_up(),
        loopback: iface.is_loopback(),
        point_to_point: iface.is_point_to_point(),
        is_virtual: iface.name.contains(':'),
        multicast: iface.is_multicast(),
        ipv4_addresses: iface
            .ips
            .iter()
            .filter_map(|ip| match ip.ip() {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .collect(),
    }
}

/// All interfaces the OS reports, usable or not.
pub fn list_interfaces() -> Vec<InterfaceInfo> {
    pnet_datalink::interfaces()
        .iter()
        .map(from_datalink)
        .collect()
}

/// All interfaces that pass the usability predicate.
pub fn list_usable() -> Vec<InterfaceInfo> {
    list_interfaces()
        .into_iter()
        .filter(InterfaceInfo::is_usable)
        .collect()
}

/// The first usable interface, in OS enumeration order.
pub fn find_first_usable() -> Option<InterfaceInfo> {
    let found = list_interfaces().into_iter().find(InterfaceInfo::is_usable);

    if found.is_none() {
        debug!("No usable network interface detected");
    }

    found
}

/// Fresh snapshot of the interface with the given name, if it still exists.
pub fn get_by_name(name: &str) -> Option<InterfaceInfo> {
    list_interfaces().into_iter().find(|i| i.name == name)
}

/// Re-fetch `old` from the OS, matching by name.
pub fn refresh(old: &InterfaceInfo) -> Option<InterfaceInfo> {
    get_by_name(&old.name)
}

/// The interface that carries the given IPv4 address, if any.
pub fn find_by_ipv4(address: Ipv4Addr) -> Option<InterfaceInfo> {
    list_interfaces()
        .into_iter()
        .find(|i| i.ipv4_addresses.contains(&address))
}

/// Two interfaces are the same iff their names are equal.
pub fn same_interface(first: Option<&InterfaceInfo>, second: Option<&InterfaceInfo>) -> bool {
    match (first, second) {
        (Some(a), Some(b)) => a.name == b.name,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usable_interface() -> InterfaceInfo {
        InterfaceInfo {
            name: "eth0".to_string(),
            display_name: "eth0".to_string(),
            up: true,
            loopback: false,
            point_to_point: false,
            is_virtual: false,
            multicast: true,
            ipv4_addresses: vec![Ipv4Addr::new(192, 168, 1, 2)],
        }
    }

    #[test]
    fn test_usable_interface_passes() {
        assert!(usable_interface().is_usable());
    }

    #[test]
    fn test_usability_table() {
        let cases: Vec<(&str, Box<dyn Fn(&mut InterfaceInfo)>)> = vec![
            ("down", Box::new(|i| i.up = false)),
            ("loopback", Box::new(|i| i.loopback = true)),
            ("point to point", Box::new(|i| i.point_to_point = true)),
            ("virtual sub-interface", Box::new(|i| i.is_virtual = true)),
            ("no multicast", Box::new(|i| i.multicast = false)),
            ("no ipv4", Box::new(|i| i.ipv4_addresses.clear())),
            ("vmnet name", Box::new(|i| i.name = "vmnet1".to_string())),
            (
                "vmnet display name",
                Box::new(|i| i.display_name = "VMware vmnet adapter".to_string()),
            ),
        ];

        for (reason, break_it) in cases {
            let mut iface = usable_interface();
            break_it(&mut iface);
            assert!(!iface.is_usable(), "should be unusable: {reason}");
        }
    }

    #[test]
    fn test_vmnet_check_is_case_insensitive() {
        let mut iface = usable_interface();
        iface.name = "VMnet8".to_string();
        assert!(!iface.is_usable());
    }

    #[test]
    fn test_same_interface_compares_names_only() {
        let a = usable_interface();
        let mut b = usable_interface();
        b.ipv4_addresses = vec![Ipv4Addr::new(10, 0, 0, 1)];
        b.up = false;

        assert!(same_interface(Some(&a), Some(&b)));

        b.name = "eth1".to_string();
        assert!(!same_interface(Some(&a), Some(&b)));
        assert!(!same_interface(Some(&a), None));
        assert!(!same_interface(None, None));
    }

    #[test]
    fn test_list_interfaces_does_not_panic() {
        // Smoke test against the real OS; content depends on the machine.
        let _ = list_interfaces();
        let _ = find_first_usable();
    }
}
