//! MAC OUI (Organizationally Unique Identifier) vendor lookup
//!
//! Uses the IEEE OUI database to identify device manufacturers from MAC addresses.

use crate::mac::MacAddress;

/// Lookup the vendor/manufacturer name for a hardware address.
///
/// Falls back to a hypervisor label for the well-known virtual NIC prefixes,
/// which the IEEE registry lists under the hypervisor vendor or not at all.
pub fn lookup_vendor(mac: &MacAddress) -> Option<String> {
    let canonical = mac.to_string();

    match oui_data::lookup(&canonical) {
        Some(record) => {
            let vendor_name = record.organization().to_string();
            tracing::debug!("OUI lookup for {}: found {}", canonical, vendor_name);
            Some(vendor_name)
        }
        None => {
            let virtual_vendor = virtual_nic_vendor(mac).map(String::from);
            if virtual_vendor.is_none() {
                tracing::debug!("OUI lookup for {}: not found in database", canonical);
            }
            virtual_vendor
        }
    }
}

/// Vendor label for MAC prefixes handed out by hypervisors and container runtimes.
pub fn virtual_nic_vendor(mac: &MacAddress) -> Option<&'static str> {
    let [a, b, c, ..] = mac.octets();

    match [a, b, c] {
        [0x02, 0x42, 0xAC] => Some("Docker"),
        [0x00, 0x50, 0x56] | [0x00, 0x0C, 0x29] | [0x00, 0x05, 0x69] => Some("VMware"),
        [0x00, 0x16, 0x3E] => Some("Xen"),
        [0x00, 0x15, 0x5D] => Some("Microsoft Hyper-V"),
        [0x00, 0x1C, 0x42] => Some("Parallels"),
        [0x52, 0x54, 0x00] => Some("QEMU/KVM"),
        [0x08, 0x00, 0x27] => Some("VirtualBox"),
        [0xBC, 0x24, 0x11] => Some("Proxmox VE"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_virtual_nic_vendor() {
        assert_eq!(virtual_nic_vendor(&mac("02:42:ac:12:34:56")), Some("Docker"));
        assert_eq!(virtual_nic_vendor(&mac("52-54-00-aa-bb-cc")), Some("QEMU/KVM"));
        assert_eq!(virtual_nic_vendor(&mac("00:17:F2:12:34:56")), None);
    }

    #[test]
    fn test_lookup_known_vendor() {
        // 00:17:F2 is registered to Apple
        let vendor = lookup_vendor(&mac("00:17:F2:12:34:56")).unwrap();
        assert!(vendor.to_lowercase().contains("apple"), "{vendor}");
    }

    #[test]
    fn test_locally_administered_is_unknown() {
        assert_eq!(lookup_vendor(&mac("02:00:00:00:00:01")), None);
    }
}
