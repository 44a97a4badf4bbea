//! IP anonymization.
//!
//! Client addresses are stored truncated to their /24 network. Anything that
//! is not a dotted-quad IPv4 address is dropped rather than stored as-is.

/// Replace the last octet of an IPv4 address with `0`.
///
/// The address must be exactly four dot-separated runs of ASCII digits, taken
/// literally: no surrounding whitespace, octets kept as written (so leading
/// zeros survive) and not range-checked. Returns `None` for IPv6, anything
/// malformed, or no input at all.
pub fn anonymize_ip(ip: Option<&str>) -> Option<String> {
    let octets: Vec<&str> = ip?.split('.').collect();
    let dotted_quad = octets.len() == 4
        && octets
            .iter()
            .all(|o| !o.is_empty() && o.bytes().all(|b| b.is_ascii_digit()));
    if !dotted_quad {
        return None;
    }
    Some(format!("{}.{}.{}.0", octets[0], octets[1], octets[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymize_ipv4() {
        assert_eq!(anonymize_ip(Some("1.2.3.4")), Some("1.2.3.0".to_string()));
        assert_eq!(
            anonymize_ip(Some("192.168.100.255")),
            Some("192.168.100.0".to_string())
        );
    }

    #[test]
    fn test_anonymize_keeps_octets_as_written() {
        assert_eq!(anonymize_ip(Some("01.2.3.4")), Some("01.2.3.0".to_string()));
        assert_eq!(anonymize_ip(Some("10.0.0.007")), Some("10.0.0.0".to_string()));
    }

    #[test]
    fn test_anonymize_rejects_non_ipv4() {
        assert_eq!(anonymize_ip(Some("::1")), None);
        assert_eq!(anonymize_ip(Some("2001:db8::1")), None);
        assert_eq!(anonymize_ip(Some("1.2.3")), None);
        assert_eq!(anonymize_ip(Some("1.2.3.4.5")), None);
        assert_eq!(anonymize_ip(Some("1..3.4")), None);
        assert_eq!(anonymize_ip(Some("a.b.c.d")), None);
        assert_eq!(anonymize_ip(Some(" 1.2.3.4")), None);
        assert_eq!(anonymize_ip(Some("1.2.3.4\n")), None);
        assert_eq!(anonymize_ip(Some("")), None);
        assert_eq!(anonymize_ip(None), None);
    }
}
