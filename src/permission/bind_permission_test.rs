use std::net::IpAddr;

use super::*;
use crate::AddressFamily;
use crate::BindFlags;
use crate::BindTarget;
use crate::Error;
use crate::PermissionConfig;

fn granted(rules: &[&str]) -> BindPermission {
    let mut permission = BindPermission::deny_all();
    for rule in rules {
        permission.grant(rule).unwrap();
    }
    permission
}

fn tcp4(
    address: &str,
    port: u16,
) -> BindTarget {
    BindTarget::new(address, port, AddressFamily::Ipv4, BindFlags::NONE)
}

#[test]
fn test_enabled_without_rules_denies_everything() {
    let permission = BindPermission::deny_all();

    assert!(!permission.has(""));
    assert!(!permission.has("localhost"));
    assert!(!permission.has("127.0.0.1:*"));
    assert!(!permission.has("127.0.0.1:9999"));
    assert!(!permission.has("*:9999"));
    assert!(!permission.is_granted(&tcp4("127.0.0.1", 9999)));
}

#[test]
fn test_disabled_grants_everything() {
    let permission = BindPermission::disabled();

    assert!(!permission.is_enabled());
    assert!(permission.has("127.0.0.1:9999"));
    assert!(permission.is_granted(&tcp4("10.1.2.3", 1)));
    assert!(permission.is_granted(&BindTarget::unix("/tmp/any.sock")));
}

#[test]
fn test_wildcard_grants_everything() {
    for wildcard in ["*", "*/*"] {
        let permission = granted(&[wildcard]);

        assert!(permission.has(""));
        assert!(permission.has("localhost"));
        assert!(permission.has("127.0.0.1:*"));
        assert!(permission.has("127.0.0.1:9999"));
        assert!(permission.has("*:9999"));
        assert!(permission.rules().is_empty());
    }
}

#[test]
fn test_any_host_fixed_port() {
    let permission = granted(&["*:9999"]);

    assert!(permission.has("127.0.0.1:9999"));
    assert!(permission.has("*:9999"));
    assert!(!permission.has("127.0.0.1:8888"));
    assert!(permission.is_granted(&tcp4("0.0.0.0", 9999)));
}

#[test]
fn test_fixed_host_any_port() {
    let permission = granted(&["127.0.0.1:*"]);

    assert!(permission.has("127.0.0.1:9999"));
    assert!(permission.has("127.0.0.1:*"));
    assert!(!permission.has("127.0.0.2:9999"));
    assert!(!permission.has("*:9999"));
}

#[test]
fn test_host_and_port() {
    let permission = granted(&["127.0.0.1:9999"]);

    assert!(permission.has("127.0.0.1:9999"));
    assert!(!permission.has("127.0.0.2:9999"));
    assert!(!permission.has("127.0.0.1:8888"));
    assert!(!permission.has("127.0.0.1:*"));
}

#[test]
fn test_comma_separated_lists_accumulate() {
    let permission = granted(&["127.0.0.1:5555,127.0.0.1:6666", "127.0.0.2:8888, 127.0.0.2:9999"]);

    assert!(permission.has("127.0.0.1:5555"));
    assert!(permission.has("127.0.0.1:6666"));
    assert!(permission.has("127.0.0.2:8888"));
    assert!(permission.has("127.0.0.2:9999"));
    assert!(!permission.has("127.0.0.1:7777"));
    assert!(!permission.has("127.0.0.3:9999"));
    assert_eq!(permission.rules().len(), 4);
}

#[test]
fn test_every_port_rule_absorbs_narrower_rules() {
    let permission = granted(&["127.0.0.1:80,127.0.0.1:443", "127.0.0.1", "127.0.0.1:8080"]);

    assert_eq!(permission.rules().len(), 1);
    assert_eq!(permission.rules()[0].port(), PortRule::Any);
    assert!(permission.has("127.0.0.1:1234"));
}

#[test]
fn test_prefix_netmask() {
    let permission = granted(&["10.0.0.0/8:*", "192.168.1.0/24:80"]);

    assert!(permission.has("10.200.3.4:1"));
    assert!(!permission.has("11.0.0.1:1"));
    assert!(permission.has("192.168.1.77:80"));
    assert!(!permission.has("192.168.1.77:81"));
    assert!(!permission.has("192.168.2.1:80"));
    assert!(permission.has("10.1.0.0/16:22"));
    assert!(!permission.has("10.0.0.0/7:22"));
}

#[test]
fn test_dotted_netmask() {
    let permission = granted(&["172.16.0.0/255.240.0.0:443"]);

    match permission.rules()[0].host() {
        HostRule::Network(n) => assert_eq!(n.prefix(), 12),
        other => panic!("unexpected host rule {other:?}"),
    }
    assert!(permission.has("172.31.255.1:443"));
    assert!(!permission.has("172.32.0.1:443"));
}

#[test]
fn test_ipv6_rules() {
    let permission = granted(&["[::1]:8080", "[fd00::]/8:*"]);

    assert!(permission.has("[::1]:8080"));
    assert!(!permission.has("[::1]:8081"));
    assert!(permission.has("[fd12:3456::1]:22"));
    assert!(!permission.has("[fe80::1]:22"));

    let target = BindTarget::new("::1", 8080, AddressFamily::Ipv6, BindFlags::IPV6_ONLY);
    assert!(permission.is_granted(&target));
}

#[test]
fn test_bare_ipv6_rule_covers_every_port() {
    let permission = granted(&["::1"]);
    assert_eq!(permission.rules()[0].host(), &HostRule::Ip("::1".parse::<IpAddr>().unwrap()));
    assert!(permission.has("[::1]:1"));
}

#[test]
fn test_hostname_rules_match_target_name_or_loopback() {
    let permission = granted(&["localhost:3000"]);

    assert!(permission.has("localhost:3000"));
    assert!(permission.has("LOCALHOST:3000"));
    assert!(permission.is_granted(&tcp4("localhost", 3000)));
    assert!(!permission.is_granted(&tcp4("localhost", 3001)));

    // A loopback grant also covers targets spelled as localhost
    let mut permission = BindPermission::deny_all();
    permission.grant("127.0.0.1:3000").unwrap();
    assert!(permission.is_granted(&tcp4("localhost", 3000)));
}

#[test]
fn test_wildcard_target_address_needs_wildcard_grant() {
    let permission = granted(&["127.0.0.1:*"]);
    assert!(!permission.is_granted(&tcp4("", 8000)));

    let permission = granted(&["0.0.0.0:8000"]);
    assert!(permission.is_granted(&tcp4("", 8000)));
}

#[test]
fn test_unix_paths_match_literally() {
    let permission = granted(&["/run/app.sock"]);

    assert!(permission.is_granted(&BindTarget::unix("/run/app.sock")));
    assert!(!permission.is_granted(&BindTarget::unix("/run/other.sock")));
    assert!(!permission.is_granted(&BindTarget::unix("/RUN/app.sock")));
}

#[test]
fn test_malformed_rules_are_rejected() {
    for rule in [
        "127.0.0.1:http",
        "127.0.0.1:70000",
        "[::1",
        "[::1]x:80",
        "example.com/8:80",
        "10.0.0.0/33:80",
        "10.0.0.0/255.0.255.0:80",
        "*/8:80",
    ] {
        let mut permission = BindPermission::deny_all();
        let result = permission.grant(rule);
        assert!(matches!(result, Err(Error::Config(_))), "rule {rule:?} should be rejected");
    }
}

#[test]
fn test_unparseable_query_is_denied() {
    let permission = granted(&["127.0.0.1:80"]);
    assert!(!permission.has("127.0.0.1:http"));
}

#[test]
fn test_from_config() {
    let config = PermissionConfig {
        enabled: true,
        allow: vec!["127.0.0.1:8000".to_string()],
    };
    let permission = BindPermission::from_config(&config).unwrap();
    assert!(permission.is_enabled());
    assert!(permission.is_granted(&tcp4("127.0.0.1", 8000)));
    assert!(!permission.is_granted(&tcp4("127.0.0.1", 8001)));

    let config = PermissionConfig {
        enabled: false,
        allow: vec!["127.0.0.1:nope".to_string()],
    };
    assert!(BindPermission::from_config(&config).is_err());
}

#[test]
fn test_rule_display() {
    let permission = granted(&["10.0.0.7/8:22", "[::1]:80", "localhost"]);
    let rendered: Vec<String> = permission.rules().iter().map(|r| r.to_string()).collect();

    assert_eq!(rendered, vec!["10.0.0.0/8:22", "[::1]:80", "localhost:*"]);
}
