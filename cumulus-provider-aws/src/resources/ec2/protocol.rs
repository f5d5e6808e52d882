//! IP protocol names and numbers

/// Protocols network ACL entries accept by name
const ACL_PROTOCOLS: &[(&str, i32)] = &[
    ("ah", 51),
    ("esp", 50),
    ("udp", 17),
    ("tcp", 6),
    ("icmp", 1),
    ("all", -1),
    ("icmpv6", 58),
];

/// Protocols security groups keep by name
const SG_PROTOCOLS: &[(&str, i32)] = &[
    ("udp", 17),
    ("tcp", 6),
    ("icmp", 1),
    ("all", -1),
    ("icmpv6", 58),
];

/// Protocol number for a network ACL protocol name
pub fn acl_protocol_number(name: &str) -> Option<i32> {
    ACL_PROTOCOLS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, p)| *p)
}

/// Normalise a security group protocol: `all` becomes `-1`, known numbers
/// become their names, anything else is returned lowercased
pub fn protocol_for_value(value: &str) -> String {
    let protocol = value.to_lowercase();
    if protocol == "-1" || protocol == "all" {
        return "-1".to_string();
    }
    if SG_PROTOCOLS.iter().any(|(name, _)| *name == protocol) {
        return protocol;
    }

    let Ok(number) = protocol.parse::<i32>() else {
        log::warn!("Unable to determine valid protocol: {}", value);
        return protocol;
    };
    match SG_PROTOCOLS.iter().find(|(_, n)| *n == number) {
        Some((name, _)) => name.to_string(),
        None => protocol,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_names_and_numbers() {
        assert_eq!(protocol_for_value("tcp"), "tcp");
        assert_eq!(protocol_for_value("TCP"), "tcp");
        assert_eq!(protocol_for_value("6"), "tcp");
        assert_eq!(protocol_for_value("17"), "udp");
        assert_eq!(protocol_for_value("1"), "icmp");
        assert_eq!(protocol_for_value("58"), "icmpv6");
        assert_eq!(protocol_for_value("all"), "-1");
        assert_eq!(protocol_for_value("-1"), "-1");
        assert_eq!(protocol_for_value("ALL"), "-1");
    }

    #[test]
    fn unknown_protocols_pass_through() {
        assert_eq!(protocol_for_value("50"), "50");
        assert_eq!(protocol_for_value("Foo"), "foo");
    }

    #[test]
    fn acl_protocol_numbers() {
        assert_eq!(acl_protocol_number("tcp"), Some(6));
        assert_eq!(acl_protocol_number("esp"), Some(50));
        assert_eq!(acl_protocol_number("ah"), Some(51));
        assert_eq!(acl_protocol_number("all"), Some(-1));
        assert_eq!(acl_protocol_number("gre"), None);
    }
}
