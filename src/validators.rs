//! Input validation and parsing for rule fields
//!
//! This module provides centralized parsing for the string fields of a
//! security rule (ports, address prefixes) and validation of names and
//! priorities. Errors are plain messages; callers wrap them in
//! [`ValidationError`](crate::core::error::ValidationError) with rule context.

use crate::core::policy::{AddressPrefix, MAX_PRIORITY, MIN_PRIORITY, PortRange, PortSpec};
use ipnetwork::IpNetwork;

/// Maximum length of a rule name
pub const MAX_RULE_NAME_LEN: usize = 80;

/// Maximum number of comma-separated entries in a port field
pub const MAX_PORT_ENTRIES: usize = 64;

/// Validates a single port number.
///
/// # Errors
///
/// Returns `Err` if port is 0 (reserved).
pub fn validate_port(port: u16) -> Result<u16, String> {
    if port == 0 {
        Err("Port must be between 1 and 65535".to_string())
    } else {
        Ok(port)
    }
}

/// Validates a port range.
///
/// # Errors
///
/// Returns `Err` if:
/// - Either port is 0
/// - Start port is greater than end port
pub fn validate_port_range(start: u16, end: u16) -> Result<(u16, u16), String> {
    validate_port(start)?;
    validate_port(end)?;

    if start > end {
        Err("Start port must be less than or equal to end port".to_string())
    } else {
        Ok((start, end))
    }
}

fn parse_port_number(input: &str) -> Result<u16, String> {
    let port = input
        .parse::<u16>()
        .map_err(|_| format!("'{input}' is not a port number (1-65535)"))?;
    validate_port(port)
}

/// Parses a port field: `*`, a single port, a `lo-hi` range, or a
/// comma-separated list of ports and ranges.
///
/// # Examples
///
/// ```
/// use secgroup::core::policy::{PortRange, PortSpec};
/// use secgroup::validators::parse_port_spec;
///
/// assert_eq!(parse_port_spec("*").unwrap(), PortSpec::Any);
/// assert_eq!(
///     parse_port_spec("20,21").unwrap(),
///     PortSpec::List(vec![PortRange::single(20), PortRange::single(21)])
/// );
/// assert!(parse_port_spec("0").is_err());
/// assert!(parse_port_spec("90-80").is_err());
/// ```
///
/// # Errors
///
/// Returns `Err` if the field is empty, has an empty entry, an entry that is
/// not a port in 1-65535, a reversed range, or too many entries.
pub fn parse_port_spec(input: &str) -> Result<PortSpec, String> {
    let trimmed = input.trim();

    if trimmed == "*" {
        return Ok(PortSpec::Any);
    }

    if trimmed.is_empty() {
        return Err("Port range cannot be empty (use * for any)".to_string());
    }

    let entries: Vec<&str> = trimmed.split(',').map(str::trim).collect();
    if entries.len() > MAX_PORT_ENTRIES {
        return Err(format!(
            "Too many port entries ({}, max {MAX_PORT_ENTRIES})",
            entries.len()
        ));
    }

    let mut ranges = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.is_empty() {
            return Err("Port list contains an empty entry".to_string());
        }

        let range = if let Some((start, end)) = entry.split_once('-') {
            let (start, end) =
                validate_port_range(parse_port_number(start.trim())?, parse_port_number(end.trim())?)?;
            PortRange { start, end }
        } else {
            PortRange::single(parse_port_number(entry)?)
        };
        ranges.push(range);
    }

    Ok(PortSpec::List(ranges))
}

/// Parses an address field: `*` or a CIDR block. A bare address is accepted
/// as a host prefix (`/32` or `/128`).
///
/// # Examples
///
/// ```
/// use secgroup::core::policy::AddressPrefix;
/// use secgroup::validators::parse_address_prefix;
///
/// assert_eq!(parse_address_prefix("*").unwrap(), AddressPrefix::Any);
/// assert!(parse_address_prefix("172.16.1.0/24").is_ok());
/// assert!(parse_address_prefix("2001:db8::/32").is_ok());
/// assert!(parse_address_prefix("Internet").is_err());
/// ```
///
/// # Errors
///
/// Returns `Err` if the field is empty or not a syntactically valid CIDR block.
pub fn parse_address_prefix(input: &str) -> Result<AddressPrefix, String> {
    let trimmed = input.trim();

    if trimmed == "*" {
        return Ok(AddressPrefix::Any);
    }

    if trimmed.is_empty() {
        return Err("Address prefix cannot be empty (use * for any)".to_string());
    }

    trimmed
        .parse::<IpNetwork>()
        .map(AddressPrefix::Network)
        .map_err(|e| format!("'{trimmed}' is not a valid CIDR block: {e}"))
}

/// Validates a rule priority.
///
/// # Errors
///
/// Returns `Err` if priority is outside `MIN_PRIORITY..=MAX_PRIORITY`.
pub fn validate_priority(priority: u32) -> Result<u32, String> {
    if (MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        Ok(priority)
    } else {
        Err(format!(
            "Priority must be between {MIN_PRIORITY} and {MAX_PRIORITY}"
        ))
    }
}

/// Validates a rule name.
///
/// # Errors
///
/// Returns `Err` if the name is empty or whitespace, exceeds
/// [`MAX_RULE_NAME_LEN`] characters, or contains control characters.
pub fn validate_rule_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Rule name cannot be empty".to_string());
    }

    if name.chars().count() > MAX_RULE_NAME_LEN {
        return Err(format!(
            "Rule name too long (max {MAX_RULE_NAME_LEN} characters)"
        ));
    }

    if name.chars().any(char::is_control) {
        return Err("Rule name contains control characters".to_string());
    }

    Ok(())
}

/// Validates a policy name for filesystem safety.
///
/// Constraints:
/// - Alphanumeric, underscores, periods and hyphens only
/// - Max 64 chars
/// - Rejects "." and ".." (path traversal)
///
/// # Errors
///
/// Returns `Err` describing the first violated constraint.
pub fn validate_policy_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Policy name cannot be empty".to_string());
    }

    if name.len() > 64 {
        return Err("Policy name too long (max 64 chars)".to_string());
    }

    if name == "." || name == ".." {
        return Err("Invalid policy name".to_string());
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(
            "Policy name contains invalid characters (use only a-z, 0-9, _, -, .)".to_string(),
        );
    }

    Ok(())
}
