use uuid::Uuid;

/// Represents the different Multicast modes that ICE can run in.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum MulticastDnsMode {
    Unspecified,

    /// Means remote mDNS candidates will be discarded, and local host
    /// candidates will use IPs.
    Disabled,

    /// Means remote mDNS candidates will be accepted, and local host
    /// candidates will use IPs.
    QueryOnly,

    /// Means remote mDNS candidates will be accepted, and local host
    /// candidates will use mDNS.
    QueryAndGather,
}

impl Default for MulticastDnsMode {
    fn default() -> Self {
        Self::QueryOnly
    }
}

/// The unique mDNS name MUST consist of a version 4 UUID followed by
/// ".local".
/// <https://tools.ietf.org/id/draft-ietf-rtcweb-mdns-ice-candidates-02.html#gathering>
pub fn generate_multicast_dns_name() -> String {
    let u = Uuid::new_v4();
    format!("{u}.local")
}

#[cfg(test)]
mod mdns_test {
    use super::*;

    #[test]
    fn test_multicast_dns_name_generation() {
        let name = generate_multicast_dns_name();
        assert!(name.ends_with(".local"));
        assert_eq!(name.len(), 36 + ".local".len());

        assert_ne!(name, generate_multicast_dns_name());
    }
}
