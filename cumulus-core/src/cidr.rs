//! CIDR block validation and comparison
//!
//! A CIDR block is valid only when its address is already the network
//! address for its prefix (`10.2.2.0/24` is valid, `10.2.2.2/24` is not).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Parsed CIDR: address as written plus prefix length
fn parse_cidr(cidr: &str) -> Option<(IpAddr, u8)> {
    let (addr, prefix) = cidr.split_once('/')?;
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let addr: IpAddr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    let max = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    if prefix > max {
        return None;
    }
    Some((addr, prefix))
}

/// Zero all host bits of `addr`
fn network_address(addr: IpAddr, prefix: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
            IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask))
        }
        IpAddr::V6(v6) => {
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
            IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask))
        }
    }
}

fn check_network(cidr: &str) -> Result<(IpAddr, u8), String> {
    let (addr, prefix) =
        parse_cidr(cidr).ok_or_else(|| format!("{:?} is not a valid CIDR block", cidr))?;
    let network = network_address(addr, prefix);
    if network != addr {
        return Err(format!(
            "{:?} is not a valid CIDR block; did you mean \"{}/{}\"?",
            cidr, network, prefix
        ));
    }
    Ok((addr, prefix))
}

/// Validate an IPv4 or IPv6 CIDR block
pub fn validate_cidr_block(cidr: &str) -> Result<(), String> {
    check_network(cidr).map(|_| ())
}

/// Validate an IPv4 CIDR block
pub fn validate_ipv4_cidr_block(cidr: &str) -> Result<(), String> {
    match check_network(cidr)? {
        (IpAddr::V4(_), _) => Ok(()),
        _ => Err(format!("{:?} is not a valid IPv4 CIDR block", cidr)),
    }
}

/// Validate an IPv6 CIDR block
pub fn validate_ipv6_cidr_block(cidr: &str) -> Result<(), String> {
    match check_network(cidr)? {
        (IpAddr::V6(_), _) => Ok(()),
        _ => Err(format!("{:?} is not a valid IPv6 CIDR block", cidr)),
    }
}

/// Validate that `value` is written exactly as its network address.
///
/// Stricter than [`validate_cidr_block`]: non-canonical spellings such as
/// `::0/0` are rejected with a hint naming the canonical form.
pub fn validate_cidr_network_address(value: &str) -> Result<(), String> {
    let canonical = canonical_cidr_block(value);
    if canonical.is_empty() {
        return Err(format!("{:?} is not a valid CIDR block", value));
    }
    if canonical != value {
        return Err(format!(
            "{:?} is not a valid CIDR block; did you mean {:?}?",
            value, canonical
        ));
    }
    Ok(())
}

/// Canonical network form of a CIDR block, or an empty string if it does not parse
pub fn canonical_cidr_block(cidr: &str) -> String {
    match parse_cidr(cidr) {
        Some((addr, prefix)) => format!("{}/{}", network_address(addr, prefix), prefix),
        None => String::new(),
    }
}

/// Whether two CIDR blocks denote the same address and prefix.
///
/// Unparseable input is never equal, including two empty strings.
pub fn cidr_blocks_equal(a: &str, b: &str) -> bool {
    match (parse_cidr(a), parse_cidr(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Diff suppression for string CIDR attributes
pub fn suppress_equivalent_cidr(
    old: &crate::resource::Value,
    new: &crate::resource::Value,
) -> bool {
    match (old.as_str(), new.as_str()) {
        (Some(a), Some(b)) => cidr_blocks_equal(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cidr_block() {
        for valid in ["10.2.2.0/24", "::/0", "::0/0", "2000::/15"] {
            assert!(validate_cidr_block(valid).is_ok(), "{} should be valid", valid);
        }
        for invalid in ["10.2.2.0/1234", "10.2.2.2/24", "2001::/15", ""] {
            assert!(validate_cidr_block(invalid).is_err(), "{} should be invalid", invalid);
        }
    }

    #[test]
    fn ipv4_cidr_block() {
        assert!(validate_ipv4_cidr_block("10.2.2.0/24").is_ok());
        for invalid in [
            "10.2.2.0/1234",
            "10/24",
            "10.2.2.2/24",
            "::/0",
            "2000::/15",
            "",
        ] {
            assert!(validate_ipv4_cidr_block(invalid).is_err(), "{} should be invalid", invalid);
        }
    }

    #[test]
    fn ipv6_cidr_block() {
        for valid in ["::/0", "::0/0", "2000::/15", "2001:db8::/122"] {
            assert!(validate_ipv6_cidr_block(valid).is_ok(), "{} should be valid", valid);
        }
        for invalid in ["10.2.2.0/24", "10.2.2.0/1234", "2001::/15", ""] {
            assert!(validate_ipv6_cidr_block(invalid).is_err(), "{} should be invalid", invalid);
        }
    }

    #[test]
    fn network_address_hint() {
        let err = validate_cidr_network_address("notacidr").unwrap_err();
        assert!(err.contains("is not a valid CIDR block"));
        assert!(!err.contains("did you mean"));

        let err = validate_cidr_network_address("10.0.1.0/16").unwrap_err();
        assert!(err.contains("is not a valid CIDR block; did you mean \"10.0.0.0/16\""));

        let err = validate_cidr_network_address("2001::/15").unwrap_err();
        assert!(err.contains("is not a valid CIDR block; did you mean \"2000::/15\""));

        assert!(validate_cidr_network_address("10.0.0.0/16").is_ok());
    }

    #[test]
    fn blocks_equal() {
        assert!(cidr_blocks_equal("10.2.2.0/24", "10.2.2.0/24"));
        assert!(cidr_blocks_equal("2001::/15", "2001::/15"));
        assert!(cidr_blocks_equal("::/0", "::0/0"));
        assert!(!cidr_blocks_equal("10.2.2.0/1234", "10.2.2.0/24"));
        assert!(!cidr_blocks_equal("10.2.2.0/24", "10.2.2.0/1234"));
        assert!(!cidr_blocks_equal("::/0", "2001::/15"));
        assert!(!cidr_blocks_equal("", ""));
    }

    #[test]
    fn canonical_form() {
        assert_eq!(canonical_cidr_block("10.2.2.5/24"), "10.2.2.0/24");
        assert_eq!(canonical_cidr_block("::0/0"), "::/0");
        assert_eq!(canonical_cidr_block("2001::/15"), "2000::/15");
        assert_eq!(canonical_cidr_block("2001:db8::1/120"), "2001:db8::/120");
        assert_eq!(canonical_cidr_block(""), "");
        assert_eq!(canonical_cidr_block("0.0.0.0/0"), "0.0.0.0/0");
    }
}
