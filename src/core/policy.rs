//! Security rule and policy data structures
//!
//! This module defines the value types that describe a network security
//! group: a named collection of prioritized allow/deny rules.
//!
//! # Rule Structure
//!
//! A [`SecurityRule`] matches traffic on:
//! - Direction (Inbound/Outbound)
//! - Protocol (TCP, UDP or any)
//! - Source and destination address prefix (CIDR or `*`)
//! - Source and destination port range (`*`, `22`, `8000-9000`, `20,21`)
//!
//! and decides Allow or Deny. Rules are evaluated per direction in ascending
//! priority order; the first match wins.
//!
//! Address and port fields are kept as the strings the caller wrote so that
//! field-by-field comparison against a remote group sees exactly what the
//! provider stores. Parsed forms ([`AddressPrefix`], [`PortSpec`]) are derived
//! on demand.
//!
//! # Limits
//!
//! Policies are limited to [`MAX_RULES`] rules and priorities must fall in
//! [`MIN_PRIORITY`]..=[`MAX_PRIORITY`].
//!
//! # Example
//!
//! ```
//! use secgroup::core::policy::{Access, Direction, Protocol, SecurityPolicy, SecurityRule};
//!
//! let ssh = SecurityRule::new("ALLOW-SSH", Direction::Inbound, Access::Allow, 100)
//!     .with_protocol(Protocol::Tcp)
//!     .with_destination("*", "22");
//!
//! let policy = SecurityPolicy::new("frontend").add_rule(ssh).unwrap();
//! assert_eq!(policy.len(), 1);
//! ```

use crate::core::error::{ValidationError, ValidationErrors};
use crate::validators;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Lowest (highest-precedence) priority a rule may use
pub const MIN_PRIORITY: u32 = 100;

/// Highest (lowest-precedence) priority a rule may use
pub const MAX_PRIORITY: u32 = 4096;

/// Maximum number of rules allowed in a single policy
///
/// Mirrors the per-group quota of common providers and bounds the work done
/// by the conflict detector.
pub const MAX_RULES: usize = 1000;

/// Wildcard accepted by address and port fields
pub const ANY: &str = "*";

/// Traffic direction a rule applies to
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Decision taken when a rule matches
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Access {
    Allow,
    Deny,
}

/// Transport protocol matched by a rule
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Protocol {
    #[strum(to_string = "Tcp")]
    Tcp,
    #[strum(to_string = "Udp")]
    Udp,
    /// Matches every protocol (`*` in provider notation)
    #[serde(alias = "*")]
    #[strum(to_string = "Any", serialize = "*")]
    Any,
}

impl Protocol {
    /// Returns `true` if a rule with this protocol matches traffic of `other`.
    pub fn matches(self, other: Protocol) -> bool {
        self == Protocol::Any || self == other
    }
}

/// Inclusive port range
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Parsed port field: `*` or a list of ports and ranges
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSpec {
    Any,
    List(Vec<PortRange>),
}

impl PortSpec {
    pub fn contains_port(&self, port: u16) -> bool {
        match self {
            PortSpec::Any => true,
            PortSpec::List(ranges) => ranges.iter().any(|r| r.contains(port)),
        }
    }
}

impl FromStr for PortSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validators::parse_port_spec(s)
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::Any => f.write_str(ANY),
            PortSpec::List(ranges) => {
                let parts: Vec<String> = ranges.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

/// Parsed address field: `*` or a CIDR block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressPrefix {
    Any,
    Network(IpNetwork),
}

impl AddressPrefix {
    pub fn contains_ip(&self, ip: IpAddr) -> bool {
        match self {
            AddressPrefix::Any => true,
            AddressPrefix::Network(net) => net.contains(ip),
        }
    }
}

impl FromStr for AddressPrefix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validators::parse_address_prefix(s)
    }
}

impl fmt::Display for AddressPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressPrefix::Any => f.write_str(ANY),
            AddressPrefix::Network(net) => write!(f, "{net}"),
        }
    }
}

/// Individually comparable rule fields, used to explain updates
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumIter,
    strum::AsRefStr,
)]
pub enum RuleField {
    #[strum(serialize = "name")]
    Name,
    #[strum(serialize = "description")]
    Description,
    #[strum(serialize = "direction")]
    Direction,
    #[strum(serialize = "access")]
    Access,
    #[strum(serialize = "protocol")]
    Protocol,
    #[strum(serialize = "sourceAddressPrefix")]
    SourceAddressPrefix,
    #[strum(serialize = "sourcePortRange")]
    SourcePortRange,
    #[strum(serialize = "destinationAddressPrefix")]
    DestinationAddressPrefix,
    #[strum(serialize = "destinationPortRange")]
    DestinationPortRange,
    #[strum(serialize = "priority")]
    Priority,
}

/// A single prioritized allow/deny rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub direction: Direction,
    pub access: Access,
    pub protocol: Protocol,
    #[serde(default = "any_string")]
    pub source_address_prefix: String,
    #[serde(default = "any_string")]
    pub source_port_range: String,
    #[serde(default = "any_string")]
    pub destination_address_prefix: String,
    #[serde(default = "any_string")]
    pub destination_port_range: String,
    pub priority: u32,
}

fn any_string() -> String {
    ANY.to_string()
}

impl SecurityRule {
    /// Creates a rule matching any protocol, address and port.
    /// Narrow it with the `with_*` builders.
    pub fn new(
        name: impl Into<String>,
        direction: Direction,
        access: Access,
        priority: u32,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            direction,
            access,
            protocol: Protocol::Any,
            source_address_prefix: any_string(),
            source_port_range: any_string(),
            destination_address_prefix: any_string(),
            destination_port_range: any_string(),
            priority,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    /// Sets the source address prefix and port range
    pub fn with_source(mut self, prefix: impl Into<String>, ports: impl Into<String>) -> Self {
        self.source_address_prefix = prefix.into();
        self.source_port_range = ports.into();
        self
    }

    /// Sets the destination address prefix and port range
    pub fn with_destination(
        mut self,
        prefix: impl Into<String>,
        ports: impl Into<String>,
    ) -> Self {
        self.destination_address_prefix = prefix.into();
        self.destination_port_range = ports.into();
        self
    }

    pub fn source_prefix(&self) -> Result<AddressPrefix, String> {
        self.source_address_prefix.parse()
    }

    pub fn destination_prefix(&self) -> Result<AddressPrefix, String> {
        self.destination_address_prefix.parse()
    }

    pub fn source_ports(&self) -> Result<PortSpec, String> {
        self.source_port_range.parse()
    }

    pub fn destination_ports(&self) -> Result<PortSpec, String> {
        self.destination_port_range.parse()
    }

    /// `(direction, priority)` slot this rule occupies in its policy
    pub fn slot(&self) -> (Direction, u32) {
        (self.direction, self.priority)
    }

    /// Validates this rule in isolation. See [`validate_rule`].
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        validate_rule(self)
    }

    /// Lists the fields that differ between `self` and `other`.
    pub fn changed_fields(&self, other: &SecurityRule) -> Vec<RuleField> {
        let mut changed = Vec::new();
        if self.name != other.name {
            changed.push(RuleField::Name);
        }
        if self.description != other.description {
            changed.push(RuleField::Description);
        }
        if self.direction != other.direction {
            changed.push(RuleField::Direction);
        }
        if self.access != other.access {
            changed.push(RuleField::Access);
        }
        if self.protocol != other.protocol {
            changed.push(RuleField::Protocol);
        }
        if self.source_address_prefix != other.source_address_prefix {
            changed.push(RuleField::SourceAddressPrefix);
        }
        if self.source_port_range != other.source_port_range {
            changed.push(RuleField::SourcePortRange);
        }
        if self.destination_address_prefix != other.destination_address_prefix {
            changed.push(RuleField::DestinationAddressPrefix);
        }
        if self.destination_port_range != other.destination_port_range {
            changed.push(RuleField::DestinationPortRange);
        }
        if self.priority != other.priority {
            changed.push(RuleField::Priority);
        }
        changed
    }

    /// Returns `true` if this rule matches the flow. Rules with unparsable
    /// address or port fields never match.
    pub fn matches(&self, flow: &Flow) -> bool {
        if self.direction != flow.direction || !self.protocol.matches(flow.protocol) {
            return false;
        }

        let (Ok(src), Ok(dst), Ok(sports), Ok(dports)) = (
            self.source_prefix(),
            self.destination_prefix(),
            self.source_ports(),
            self.destination_ports(),
        ) else {
            return false;
        };

        src.contains_ip(flow.source)
            && dst.contains_ip(flow.destination)
            && sports.contains_port(flow.source_port)
            && dports.contains_port(flow.destination_port)
    }
}

impl fmt::Display for SecurityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} {} {} {}:{} -> {}:{}, priority {})",
            self.name,
            self.direction,
            self.access,
            self.protocol,
            self.source_address_prefix,
            self.source_port_range,
            self.destination_address_prefix,
            self.destination_port_range,
            self.priority
        )
    }
}

/// Collects every problem with a single rule.
fn rule_violations(rule: &SecurityRule) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Err(message) = validators::validate_rule_name(&rule.name) {
        errors.push(ValidationError::InvalidName {
            rule: rule.name.clone(),
            message,
        });
    }

    if validators::validate_priority(rule.priority).is_err() {
        errors.push(ValidationError::InvalidPriority {
            rule: rule.name.clone(),
            priority: rule.priority,
        });
    }

    for (field, value) in [
        (RuleField::SourcePortRange, &rule.source_port_range),
        (RuleField::DestinationPortRange, &rule.destination_port_range),
    ] {
        if let Err(message) = validators::parse_port_spec(value) {
            errors.push(ValidationError::InvalidPortRange {
                rule: rule.name.clone(),
                field,
                value: value.clone(),
                message,
            });
        }
    }

    for (field, value) in [
        (RuleField::SourceAddressPrefix, &rule.source_address_prefix),
        (
            RuleField::DestinationAddressPrefix,
            &rule.destination_address_prefix,
        ),
    ] {
        if let Err(message) = validators::parse_address_prefix(value) {
            errors.push(ValidationError::InvalidAddressPrefix {
                rule: rule.name.clone(),
                field,
                value: value.clone(),
                message,
            });
        }
    }

    errors
}

/// Validates a single rule, reporting every violation found.
///
/// # Errors
///
/// Returns every applicable error of:
/// - `InvalidName` if the name is empty or malformed
/// - `InvalidPriority` if priority is outside [`MIN_PRIORITY`]..=[`MAX_PRIORITY`]
/// - `InvalidPortRange` if a port field is not `*`, a port, a range or a list of those
/// - `InvalidAddressPrefix` if an address field is not `*` or a CIDR block
pub fn validate_rule(rule: &SecurityRule) -> Result<(), ValidationErrors> {
    ValidationErrors::from_vec(rule_violations(rule))
}

/// Validates a whole policy: every rule, plus name and
/// `(direction, priority)` uniqueness and the rule count limit.
///
/// Needed for policies that arrive deserialized rather than built with
/// [`SecurityPolicy::add_rule`].
pub fn validate_policy(policy: &SecurityPolicy) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    if policy.rules.len() > MAX_RULES {
        errors.push(ValidationError::TooManyRules {
            count: policy.rules.len(),
            max: MAX_RULES,
        });
    }

    let mut names: HashSet<&str> = HashSet::with_capacity(policy.rules.len());
    let mut slots: HashMap<(Direction, u32), &str> = HashMap::with_capacity(policy.rules.len());

    for rule in &policy.rules {
        errors.extend(rule_violations(rule));

        if !names.insert(rule.name.as_str()) {
            errors.push(ValidationError::DuplicateName {
                rule: rule.name.clone(),
            });
        }

        if let Some(existing) = slots.get(&rule.slot()) {
            errors.push(ValidationError::DuplicatePriority {
                rule: rule.name.clone(),
                existing: (*existing).to_string(),
                direction: rule.direction,
                priority: rule.priority,
            });
        } else {
            slots.insert(rule.slot(), rule.name.as_str());
        }
    }

    ValidationErrors::from_vec(errors)
}

/// A concrete traffic flow, used to evaluate a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flow {
    pub direction: Direction,
    pub protocol: Protocol,
    pub source: IpAddr,
    pub source_port: u16,
    pub destination: IpAddr,
    pub destination_port: u16,
}

/// Decision applied when no rule matches a flow
///
/// Providers decide this implicitly; the usual behaviour is deny for inbound
/// and allow for outbound, which is what [`Default`] returns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DefaultPolicy {
    pub inbound: Access,
    pub outbound: Access,
}

impl Default for DefaultPolicy {
    fn default() -> Self {
        Self {
            inbound: Access::Deny,
            outbound: Access::Allow,
        }
    }
}

impl DefaultPolicy {
    pub fn for_direction(&self, direction: Direction) -> Access {
        match direction {
            Direction::Inbound => self.inbound,
            Direction::Outbound => self.outbound,
        }
    }
}

/// Outcome of evaluating a flow against a policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub access: Access,
    /// Name of the deciding rule, `None` when the default applied
    pub rule: Option<String>,
}

/// Named collection of security rules, keyed by rule name
///
/// Storage order carries no meaning; evaluation order is purely by priority.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityPolicy {
    pub name: String,
    #[serde(default)]
    rules: Vec<SecurityRule>,
}

impl SecurityPolicy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    /// Builds a policy from a rule list, validating the result as a whole.
    ///
    /// # Errors
    ///
    /// Returns every violation found, see [`validate_policy`].
    pub fn from_rules(
        name: impl Into<String>,
        rules: impl IntoIterator<Item = SecurityRule>,
    ) -> Result<Self, ValidationErrors> {
        let policy = Self {
            name: name.into(),
            rules: rules.into_iter().collect(),
        };
        validate_policy(&policy)?;
        Ok(policy)
    }

    /// Returns a new policy with `rule` added.
    ///
    /// # Errors
    ///
    /// Fails with `DuplicateName` if a rule with the same name exists,
    /// `DuplicatePriority` if the `(direction, priority)` slot is taken, and
    /// with any violation reported by [`validate_rule`].
    pub fn add_rule(&self, rule: SecurityRule) -> Result<Self, ValidationErrors> {
        let mut errors = rule_violations(&rule);

        if self.rules.len() >= MAX_RULES {
            errors.push(ValidationError::TooManyRules {
                count: self.rules.len() + 1,
                max: MAX_RULES,
            });
        }

        if self.contains(&rule.name) {
            errors.push(ValidationError::DuplicateName {
                rule: rule.name.clone(),
            });
        }

        if let Some(existing) = self.rule_at(rule.direction, rule.priority) {
            errors.push(ValidationError::DuplicatePriority {
                rule: rule.name.clone(),
                existing: existing.name.clone(),
                direction: rule.direction,
                priority: rule.priority,
            });
        }

        ValidationErrors::from_vec(errors)?;

        let mut next = self.clone();
        next.rules.push(rule);
        Ok(next)
    }

    /// Returns a new policy without the named rule (unchanged if absent).
    pub fn without_rule(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.take_rule(name);
        next
    }

    /// Inserts or replaces a rule by name without validation.
    /// Used by resource clients that mirror remote state.
    pub(crate) fn put_rule(&mut self, rule: SecurityRule) {
        if let Some(existing) = self.rules.iter_mut().find(|r| r.name == rule.name) {
            *existing = rule;
        } else {
            self.rules.push(rule);
        }
    }

    pub(crate) fn take_rule(&mut self, name: &str) -> Option<SecurityRule> {
        let pos = self.rules.iter().position(|r| r.name == name)?;
        Some(self.rules.remove(pos))
    }

    pub fn rules(&self) -> &[SecurityRule] {
        &self.rules
    }

    pub fn get(&self, name: &str) -> Option<&SecurityRule> {
        self.rules.iter().find(|r| r.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Rule occupying the `(direction, priority)` slot, if any
    pub fn rule_at(&self, direction: Direction, priority: u32) -> Option<&SecurityRule> {
        self.rules
            .iter()
            .find(|r| r.direction == direction && r.priority == priority)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules of one direction in evaluation order
    pub fn ordered(&self, direction: Direction) -> Vec<&SecurityRule> {
        let mut rules: Vec<&SecurityRule> = self
            .rules
            .iter()
            .filter(|r| r.direction == direction)
            .collect();
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        rules
    }

    /// Evaluates a flow first-match-wins, falling back to `defaults`.
    pub fn evaluate(&self, flow: &Flow, defaults: &DefaultPolicy) -> Verdict {
        self.ordered(flow.direction)
            .into_iter()
            .find(|rule| rule.matches(flow))
            .map_or_else(
                || Verdict {
                    access: defaults.for_direction(flow.direction),
                    rule: None,
                },
                |rule| Verdict {
                    access: rule.access,
                    rule: Some(rule.name.clone()),
                },
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::{allow_tcp, flow};

    #[test]
    fn test_protocol_parsing_accepts_wildcard() {
        assert_eq!("*".parse::<Protocol>().unwrap(), Protocol::Any);
        assert_eq!("tcp".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!(Protocol::Any.to_string(), "Any");
        let parsed: Protocol = serde_json::from_str("\"*\"").unwrap();
        assert_eq!(parsed, Protocol::Any);
    }

    #[test]
    fn test_rule_json_uses_provider_field_names() {
        let rule = allow_tcp("ALLOW-SSH", 100, "22");
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["destinationPortRange"], "22");
        assert_eq!(json["sourceAddressPrefix"], "*");
        assert_eq!(json["direction"], "Inbound");
    }

    #[test]
    fn test_missing_address_fields_default_to_any() {
        let rule: SecurityRule = serde_json::from_str(
            r#"{"name":"X","direction":"Inbound","access":"Deny","protocol":"Tcp","priority":300}"#,
        )
        .unwrap();
        assert_eq!(rule.source_address_prefix, "*");
        assert_eq!(rule.destination_port_range, "*");
    }

    #[test]
    fn test_add_rule_is_immutable() {
        let empty = SecurityPolicy::new("fe");
        let one = empty.add_rule(allow_tcp("ALLOW-SSH", 100, "22")).unwrap();
        assert!(empty.is_empty());
        assert_eq!(one.len(), 1);
    }

    #[test]
    fn test_add_rule_duplicate_name() {
        let policy = SecurityPolicy::new("fe")
            .add_rule(allow_tcp("ALLOW-SSH", 100, "22"))
            .unwrap();
        let err = policy
            .add_rule(allow_tcp("ALLOW-SSH", 200, "2222"))
            .unwrap_err();
        assert!(
            err.iter()
                .any(|e| matches!(e, ValidationError::DuplicateName { .. }))
        );
    }

    #[test]
    fn test_same_priority_different_direction_is_allowed() {
        let policy = SecurityPolicy::new("fe")
            .add_rule(allow_tcp("ALLOW-SSH", 100, "22"))
            .unwrap();
        let outbound = SecurityRule::new("OUT", Direction::Outbound, Access::Deny, 100);
        assert!(policy.add_rule(outbound).is_ok());
    }

    #[test]
    fn test_validate_rule_collects_all_errors() {
        let rule = SecurityRule::new("BAD", Direction::Inbound, Access::Allow, 50)
            .with_source("10.0.0.0/33", "abc")
            .with_destination("*", "70000");
        let err = validate_rule(&rule).unwrap_err();
        assert_eq!(err.len(), 4);
        assert!(
            err.iter()
                .any(|e| matches!(e, ValidationError::InvalidPriority { priority: 50, .. }))
        );
        assert_eq!(
            err.iter()
                .filter(|e| matches!(e, ValidationError::InvalidPortRange { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn test_validate_policy_detects_duplicates_from_files() {
        let json = r#"{
            "name": "fe",
            "rules": [
                {"name":"A","direction":"Inbound","access":"Allow","protocol":"Tcp","priority":100},
                {"name":"B","direction":"Inbound","access":"Allow","protocol":"Tcp","priority":100},
                {"name":"A","direction":"Outbound","access":"Allow","protocol":"Tcp","priority":100}
            ]
        }"#;
        let policy: SecurityPolicy = serde_json::from_str(json).unwrap();
        let err = validate_policy(&policy).unwrap_err();
        assert!(
            err.iter()
                .any(|e| matches!(e, ValidationError::DuplicatePriority { rule, .. } if rule == "B"))
        );
        assert!(
            err.iter()
                .any(|e| matches!(e, ValidationError::DuplicateName { rule } if rule == "A"))
        );
    }

    #[test]
    fn test_changed_fields() {
        let a = allow_tcp("ALLOW-SSH", 100, "22");
        let b = a.clone().with_priority(110).with_access(Access::Deny);
        assert_eq!(
            a.changed_fields(&b),
            vec![RuleField::Access, RuleField::Priority]
        );
        assert!(a.changed_fields(&a).is_empty());
    }

    #[test]
    fn test_evaluate_first_match_wins() {
        let policy = SecurityPolicy::new("be")
            .add_rule(
                SecurityRule::new("DENY-ALL", Direction::Outbound, Access::Deny, 100),
            )
            .unwrap()
            .add_rule(
                SecurityRule::new("ALLOW-HTTPS", Direction::Outbound, Access::Allow, 200)
                    .with_destination("*", "443"),
            )
            .unwrap();

        let verdict = policy.evaluate(
            &flow(Direction::Outbound, "10.0.0.4", "93.184.216.34", 443),
            &DefaultPolicy::default(),
        );
        assert_eq!(verdict.access, Access::Deny);
        assert_eq!(verdict.rule.as_deref(), Some("DENY-ALL"));
    }

    #[test]
    fn test_evaluate_falls_back_to_default() {
        let policy = SecurityPolicy::new("fe")
            .add_rule(allow_tcp("ALLOW-SSH", 100, "22"))
            .unwrap();
        let defaults = DefaultPolicy::default();

        let inbound = policy.evaluate(
            &flow(Direction::Inbound, "203.0.113.9", "10.0.0.4", 3389),
            &defaults,
        );
        assert_eq!(inbound.access, Access::Deny);
        assert!(inbound.rule.is_none());

        let outbound = policy.evaluate(
            &flow(Direction::Outbound, "10.0.0.4", "203.0.113.9", 3389),
            &defaults,
        );
        assert_eq!(outbound.access, Access::Allow);
    }

    #[test]
    fn test_evaluate_source_prefix() {
        let policy = SecurityPolicy::new("be")
            .add_rule(
                SecurityRule::new("ALLOW-SQL", Direction::Inbound, Access::Allow, 100)
                    .with_protocol(Protocol::Tcp)
                    .with_source("172.16.1.0/24", "*")
                    .with_destination("*", "1433"),
            )
            .unwrap();
        let defaults = DefaultPolicy::default();

        let from_frontend = flow(Direction::Inbound, "172.16.1.10", "172.16.2.4", 1433);
        assert_eq!(policy.evaluate(&from_frontend, &defaults).access, Access::Allow);

        let from_elsewhere = flow(Direction::Inbound, "172.16.3.10", "172.16.2.4", 1433);
        assert_eq!(policy.evaluate(&from_elsewhere, &defaults).access, Access::Deny);
    }
}
