//! Shared test utilities for core module tests
//!
//! Provides common test helpers to avoid duplication across test suites.
//! This module is only compiled in test mode.

use crate::core::policy::{Access, Direction, Flow, Protocol, SecurityPolicy, SecurityRule};
use proptest::prelude::*;

/// Creates an inbound TCP allow rule to `*` on the given ports.
///
/// This is the canonical helper for rule fixtures. Use this instead of
/// spelling out every field in tests.
pub fn allow_tcp(name: &str, priority: u32, ports: &str) -> SecurityRule {
    SecurityRule::new(name, Direction::Inbound, Access::Allow, priority)
        .with_protocol(Protocol::Tcp)
        .with_destination("*", ports)
}

/// Builds a validated policy, panicking on invalid fixtures.
pub fn policy_of(name: &str, rules: Vec<SecurityRule>) -> SecurityPolicy {
    SecurityPolicy::from_rules(name, rules).expect("test policy should be valid")
}

/// Front-end group: SSH and HTTP open to the world.
pub fn front_end() -> SecurityPolicy {
    policy_of(
        "fe",
        vec![
            allow_tcp("ALLOW-SSH", 100, "22"),
            allow_tcp("ALLOW-HTTP", 101, "80"),
        ],
    )
}

/// Back-end group: SQL from the front-end subnet, no outbound traffic.
pub fn back_end() -> SecurityPolicy {
    policy_of(
        "be",
        vec![
            SecurityRule::new("ALLOW-SQL", Direction::Inbound, Access::Allow, 100)
                .with_protocol(Protocol::Tcp)
                .with_source("172.16.1.0/24", "*")
                .with_destination("*", "1433"),
            SecurityRule::new("DENY-WEB", Direction::Outbound, Access::Deny, 200),
        ],
    )
}

/// Builds a TCP flow from an ephemeral source port.
///
/// # Panics
///
/// Panics if either address does not parse.
pub fn flow(direction: Direction, source: &str, destination: &str, port: u16) -> Flow {
    Flow {
        direction,
        protocol: Protocol::Tcp,
        source: source.parse().expect("valid source address"),
        source_port: 50000,
        destination: destination.parse().expect("valid destination address"),
        destination_port: port,
    }
}

/// Port field values, valid by construction
pub fn arb_ports() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("*".to_string()),
        (1u16..=65535).prop_map(|p| p.to_string()),
        (1u16..=60000, 0u16..=5000).prop_map(|(lo, span)| format!("{}-{}", lo, lo + span)),
        prop::collection::vec(1u16..=65535, 1..4).prop_map(|ports| {
            ports
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        }),
    ]
}

/// Address field values, valid by construction
pub fn arb_prefix() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("*".to_string()),
        (any::<u8>(), 0u8..=32).prop_map(|(a, len)| format!("10.{a}.0.0/{len}")),
        (any::<u16>(), 32u8..=128).prop_map(|(a, len)| format!("2001:db8:{a:x}::/{len}")),
    ]
}

/// Valid rules with a fixed name and slot chosen by the caller
pub fn arb_rule_body() -> impl Strategy<Value = (Access, Protocol, String, String, String, String)>
{
    (
        prop_oneof![Just(Access::Allow), Just(Access::Deny)],
        prop_oneof![Just(Protocol::Tcp), Just(Protocol::Udp), Just(Protocol::Any)],
        arb_prefix(),
        arb_ports(),
        arb_prefix(),
        arb_ports(),
    )
}

/// Valid policies of up to `max_rules` rules with unique names and slots
///
/// Priorities are a shuffled draw from a pool twice the policy size, so two
/// policies generated independently move rules between priorities, hand a
/// slot to a different rule and trade slots in cycles.
pub fn arb_policy(max_rules: usize) -> impl Strategy<Value = SecurityPolicy> {
    let pool: Vec<u32> = (0..max_rules.max(1) * 2)
        .map(|i| 100 + u32::try_from(i).expect("small index") * 10)
        .collect();

    (
        prop::collection::vec((any::<bool>(), arb_rule_body()), 0..=max_rules),
        Just(pool).prop_shuffle(),
    )
        .prop_map(|(bodies, priorities)| {
            let rules = bodies.into_iter().zip(priorities).enumerate().map(
                |(i, ((outbound, (access, protocol, src, sports, dst, dports)), priority))| {
                    let direction = if outbound {
                        Direction::Outbound
                    } else {
                        Direction::Inbound
                    };
                    SecurityRule::new(format!("RULE-{i}"), direction, access, priority)
                        .with_protocol(protocol)
                        .with_source(src, sports)
                        .with_destination(dst, dports)
                },
            );
            SecurityPolicy::from_rules("prop", rules).expect("generated policy should be valid")
        })
}
