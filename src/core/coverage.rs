//! Match predicates and set arithmetic for overlap analysis
//!
//! Every rule field is mapped onto a set of `u128` values so that protocols,
//! ports and address prefixes can share one interval representation:
//!
//! - Protocols: `0` = TCP, `1` = UDP; `Any` is `{0, 1}`
//! - Ports: `1..=65535`; `*` is the whole range
//! - Addresses: IPv6 addresses as-is, IPv4 addresses embedded in the
//!   IPv4-mapped block `::ffff:0:0/96`; `*` is the whole `u128` space
//!
//! A [`MatchPredicate`] is the product of five such sets (protocol, source
//! address, source port, destination address, destination port). Coverage of
//! one predicate by the union of several is computed exactly by box
//! subtraction, bounded by [`MAX_FRAGMENTS`].

use crate::core::policy::{AddressPrefix, PortSpec, Protocol, SecurityRule};
use ipnetwork::IpNetwork;

/// Upper bound on intermediate fragments kept while testing coverage.
/// Past this the check gives up and reports "not covered".
pub const MAX_FRAGMENTS: usize = 4096;

const IPV4_MAPPED_BASE: u128 = 0xffff_u128 << 32;

/// Sorted, non-overlapping, non-adjacent set of inclusive `u128` intervals
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IntervalSet {
    ranges: Vec<(u128, u128)>,
}

impl IntervalSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn full() -> Self {
        Self::from_range(0, u128::MAX)
    }

    pub fn from_range(start: u128, end: u128) -> Self {
        let mut set = Self::empty();
        set.insert(start, end);
        set
    }

    /// Inserts `[start, end]`, merging overlapping and adjacent intervals.
    pub fn insert(&mut self, start: u128, end: u128) {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        self.ranges.push((start, end));
        self.ranges.sort_unstable();

        let mut merged: Vec<(u128, u128)> = Vec::with_capacity(self.ranges.len());
        for &(s, e) in &self.ranges {
            match merged.last_mut() {
                Some(last) if last.1.checked_add(1).is_none_or(|next| s <= next) => {
                    last.1 = last.1.max(e);
                }
                _ => merged.push((s, e)),
            }
        }
        self.ranges = merged;
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[(u128, u128)] {
        &self.ranges
    }

    pub fn union(&self, other: &IntervalSet) -> IntervalSet {
        let mut out = self.clone();
        for &(s, e) in &other.ranges {
            out.insert(s, e);
        }
        out
    }

    pub fn intersect(&self, other: &IntervalSet) -> IntervalSet {
        let mut out = IntervalSet::empty();
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let (a_start, a_end) = self.ranges[i];
            let (b_start, b_end) = other.ranges[j];
            let start = a_start.max(b_start);
            let end = a_end.min(b_end);
            if start <= end {
                out.ranges.push((start, end));
            }
            if a_end < b_end {
                i += 1;
            } else {
                j += 1;
            }
        }
        out
    }

    /// Values in `self` that are not in `other`
    pub fn difference(&self, other: &IntervalSet) -> IntervalSet {
        let mut out = IntervalSet::empty();
        for &(start, end) in &self.ranges {
            let mut cursor = Some(start);
            for &(o_start, o_end) in &other.ranges {
                let Some(from) = cursor else { break };
                if o_end < from || o_start > end {
                    continue;
                }
                if o_start > from {
                    out.ranges.push((from, o_start - 1));
                }
                cursor = o_end.checked_add(1);
            }
            if let Some(from) = cursor
                && from <= end
            {
                out.ranges.push((from, end));
            }
        }
        out
    }

    /// Returns `true` if every value of `other` is in `self`.
    pub fn covers(&self, other: &IntervalSet) -> bool {
        other.difference(self).is_empty()
    }

    pub fn intersects(&self, other: &IntervalSet) -> bool {
        !self.intersect(other).is_empty()
    }
}

/// Protocol set of a rule
pub fn protocol_set(protocol: Protocol) -> IntervalSet {
    match protocol {
        Protocol::Tcp => IntervalSet::from_range(0, 0),
        Protocol::Udp => IntervalSet::from_range(1, 1),
        Protocol::Any => IntervalSet::from_range(0, 1),
    }
}

/// Port set of a parsed port field
pub fn port_set(spec: &PortSpec) -> IntervalSet {
    match spec {
        PortSpec::Any => IntervalSet::from_range(1, u128::from(u16::MAX)),
        PortSpec::List(ranges) => {
            let mut set = IntervalSet::empty();
            for range in ranges {
                set.insert(u128::from(range.start), u128::from(range.end));
            }
            set
        }
    }
}

/// Address set of a parsed prefix. Host bits are ignored.
pub fn address_set(prefix: &AddressPrefix) -> IntervalSet {
    match prefix {
        AddressPrefix::Any => IntervalSet::full(),
        AddressPrefix::Network(IpNetwork::V4(net)) => {
            let start = IPV4_MAPPED_BASE | u128::from(u32::from(net.network()));
            let end = IPV4_MAPPED_BASE | u128::from(u32::from(net.broadcast()));
            IntervalSet::from_range(start, end)
        }
        AddressPrefix::Network(IpNetwork::V6(net)) => {
            let host_bits = 128 - u32::from(net.prefix());
            let mask = if host_bits == 128 {
                u128::MAX
            } else {
                (1u128 << host_bits) - 1
            };
            let start = u128::from(net.network()) & !mask;
            IntervalSet::from_range(start, start | mask)
        }
    }
}

/// Number of dimensions in a [`MatchPredicate`]
const DIMENSIONS: usize = 5;

/// Traffic matched by a rule, as a product of per-field sets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPredicate {
    dims: [IntervalSet; DIMENSIONS],
}

impl MatchPredicate {
    /// Builds the predicate for a rule; `None` if any field fails to parse.
    pub fn from_rule(rule: &SecurityRule) -> Option<Self> {
        let source = rule.source_prefix().ok()?;
        let source_ports = rule.source_ports().ok()?;
        let destination = rule.destination_prefix().ok()?;
        let destination_ports = rule.destination_ports().ok()?;

        Some(Self {
            dims: [
                protocol_set(rule.protocol),
                address_set(&source),
                port_set(&source_ports),
                address_set(&destination),
                port_set(&destination_ports),
            ],
        })
    }

    pub fn is_empty(&self) -> bool {
        self.dims.iter().any(IntervalSet::is_empty)
    }

    /// Returns `true` if `self` matches all traffic `other` matches.
    pub fn contains(&self, other: &MatchPredicate) -> bool {
        self.dims
            .iter()
            .zip(&other.dims)
            .all(|(mine, theirs)| mine.covers(theirs))
    }

    pub fn intersects(&self, other: &MatchPredicate) -> bool {
        self.dims
            .iter()
            .zip(&other.dims)
            .all(|(mine, theirs)| mine.intersects(theirs))
    }

    /// Splits `self \ other` into disjoint predicates.
    fn subtract(&self, other: &MatchPredicate) -> Vec<MatchPredicate> {
        if !self.intersects(other) {
            return vec![self.clone()];
        }

        let mut pieces = Vec::new();
        let mut prefix = self.clone();
        for d in 0..DIMENSIONS {
            let outside = self.dims[d].difference(&other.dims[d]);
            if !outside.is_empty() {
                let mut piece = prefix.clone();
                piece.dims[d] = outside;
                pieces.push(piece);
            }
            prefix.dims[d] = self.dims[d].intersect(&other.dims[d]);
        }
        pieces
    }

    /// Returns `true` if the union of `others` matches all traffic `self`
    /// matches. Gives up (returns `false`) past [`MAX_FRAGMENTS`].
    pub fn covered_by<'a, I>(&self, others: I) -> bool
    where
        I: IntoIterator<Item = &'a MatchPredicate>,
    {
        self.deciders(others).is_some()
    }

    /// Walks `others` in evaluation order, taking from `self` whatever each
    /// one matches first. If together they match all of `self`, returns the
    /// indices of those that took a non-empty part; otherwise (or past
    /// [`MAX_FRAGMENTS`]) returns `None`.
    pub fn deciders<'a, I>(&self, others: I) -> Option<Vec<usize>>
    where
        I: IntoIterator<Item = &'a MatchPredicate>,
    {
        let mut remaining = vec![self.clone()];
        let mut deciding = Vec::new();
        for (index, other) in others.into_iter().enumerate() {
            if remaining.is_empty() {
                break;
            }
            if !remaining.iter().any(|fragment| fragment.intersects(other)) {
                continue;
            }

            deciding.push(index);
            remaining = remaining
                .iter()
                .flat_map(|fragment| fragment.subtract(other))
                .collect();
            if remaining.len() > MAX_FRAGMENTS {
                return None;
            }
        }
        remaining.is_empty().then_some(deciding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::{Access, Direction};

    fn predicate(rule: &SecurityRule) -> MatchPredicate {
        MatchPredicate::from_rule(rule).unwrap()
    }

    fn inbound(name: &str, priority: u32) -> SecurityRule {
        SecurityRule::new(name, Direction::Inbound, Access::Allow, priority)
    }

    #[test]
    fn test_insert_merges_adjacent() {
        let mut set = IntervalSet::empty();
        set.insert(10, 20);
        set.insert(21, 30);
        set.insert(5, 7);
        assert_eq!(set.ranges(), &[(5, 7), (10, 30)]);
    }

    #[test]
    fn test_insert_at_upper_bound() {
        let mut set = IntervalSet::from_range(u128::MAX - 1, u128::MAX);
        set.insert(0, 3);
        assert_eq!(set.ranges(), &[(0, 3), (u128::MAX - 1, u128::MAX)]);
    }

    #[test]
    fn test_difference_splits() {
        let a = IntervalSet::from_range(0, 100);
        let b = IntervalSet::from_range(20, 30).union(&IntervalSet::from_range(90, 200));
        assert_eq!(a.difference(&b).ranges(), &[(0, 19), (31, 89)]);
        assert!(IntervalSet::full().difference(&IntervalSet::full()).is_empty());
    }

    #[test]
    fn test_cidr_containment() {
        let wide = address_set(&"10.0.0.0/8".parse().unwrap());
        let narrow = address_set(&"10.1.2.0/24".parse().unwrap());
        let other = address_set(&"192.168.0.0/16".parse().unwrap());
        assert!(wide.covers(&narrow));
        assert!(!narrow.covers(&wide));
        assert!(!wide.intersects(&other));
        assert!(IntervalSet::full().covers(&wide));
    }

    #[test]
    fn test_ipv4_and_ipv6_do_not_overlap() {
        let v4 = address_set(&"0.0.0.0/0".parse().unwrap());
        let v6 = address_set(&"2001:db8::/32".parse().unwrap());
        assert!(!v4.intersects(&v6));
    }

    #[test]
    fn test_any_rule_contains_narrow_rule() {
        let any = predicate(&inbound("ANY", 100));
        let ssh = predicate(
            &inbound("SSH", 200)
                .with_protocol(Protocol::Tcp)
                .with_destination("10.0.0.0/24", "22"),
        );
        assert!(any.contains(&ssh));
        assert!(!ssh.contains(&any));
    }

    #[test]
    fn test_union_of_tcp_and_udp_covers_any() {
        let tcp = predicate(&inbound("TCP", 100).with_protocol(Protocol::Tcp));
        let udp = predicate(&inbound("UDP", 101).with_protocol(Protocol::Udp));
        let any = predicate(&inbound("ANY", 200));
        assert!(any.covered_by([&tcp, &udp]));
        assert!(!any.covered_by([&tcp]));
    }

    #[test]
    fn test_union_across_two_dimensions() {
        // low ports from anywhere + high ports from anywhere = all ports
        let low = predicate(&inbound("LOW", 100).with_destination("*", "1-1023"));
        let high = predicate(&inbound("HIGH", 101).with_destination("*", "1024-65535"));
        let web = predicate(&inbound("WEB", 200).with_destination("10.0.0.0/8", "80,8080"));
        assert!(web.covered_by([&low, &high]));
    }

    #[test]
    fn test_split_cidr_union() {
        let lower = predicate(&inbound("A", 100).with_source("10.0.0.0/25", "*"));
        let upper = predicate(&inbound("B", 101).with_source("10.0.0.128/25", "*"));
        let whole = predicate(&inbound("C", 200).with_source("10.0.0.0/24", "*"));
        assert!(whole.covered_by([&lower, &upper]));
        assert!(!whole.covered_by([&lower]));
    }

    #[test]
    fn test_deciders_skip_rules_already_decided() {
        let wide = predicate(&inbound("WIDE", 100).with_destination("*", "22"));
        let inner = predicate(
            &inbound("INNER", 150)
                .with_source("10.1.5.0/24", "*")
                .with_destination("*", "22"),
        );
        let candidate = predicate(
            &inbound("CANDIDATE", 200)
                .with_source("10.1.0.0/16", "*")
                .with_destination("*", "22"),
        );
        assert_eq!(candidate.deciders([&wide, &inner]), Some(vec![0]));
        assert_eq!(candidate.deciders([&inner]), None);
    }

    #[test]
    fn test_unparsable_rule_has_no_predicate() {
        let rule = inbound("BAD", 100).with_destination("*", "http");
        assert!(MatchPredicate::from_rule(&rule).is_none());
    }
}
