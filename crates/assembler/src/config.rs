//! Serde types for the per-client YAML bundle (spec §4.4 step 4). Field
//! names and shape follow the Nebula dataplane's own config format, since
//! this crate's only consumer is a node agent driving that dataplane.

use std::collections::BTreeMap;

use meshctl_store::models::{Direction, FirewallRule, Proto, Selector};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct NebulaConfig {
    pub pki: PkiSection,
    pub static_host_map: BTreeMap<String, Vec<String>>,
    pub lighthouse: LighthouseSection,
    pub punchy: PunchySection,
    pub firewall: FirewallSection,
    pub groups: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PkiSection {
    pub ca: String,
    pub cert: String,
    pub key: String,
}

impl Default for PkiSection {
    fn default() -> Self {
        Self {
            ca: "ca.crt".to_string(),
            cert: "host.crt".to_string(),
            key: "host.key".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LighthouseSection {
    am_lighthouse: bool,
    /// Overlay IPs of lighthouse peers in the client's pool. Empty for a
    /// lighthouse itself — a lighthouse advertises but does not target
    /// itself (spec §4.4 step 4).
    hosts: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PunchySection {
    punch: bool,
    respond: bool,
}

impl PunchySection {
    pub fn new(punchy: bool) -> Self {
        Self {
            punch: punchy,
            respond: punchy,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FirewallSection {
    pub inbound: Vec<FirewallRuleYaml>,
    pub outbound: Vec<FirewallRuleYaml>,
    /// Nebula denies anything not explicitly allowed; this flag is emitted
    /// for readability even though it is also the dataplane's own default
    /// (spec §4.4 step 4 "terminal default-deny").
    pub default_deny: bool,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq, Hash)]
pub struct FirewallRuleYaml {
    pub port: String,
    pub proto: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_sha: Option<String>,
}

impl LighthouseSection {
    pub fn new(am_lighthouse: bool, hosts: Vec<String>) -> Self {
        Self { am_lighthouse, hosts }
    }
}

/// Canonicalizes a port spec (literal, `N-M` range, `any`, or `fragment`)
/// into a numeric range used only for the stable sort key, never for
/// semantic validation (the store layer already constrains valid shapes at
/// write time).
fn canonical_port_range(port: &str) -> (u32, u32) {
    match port {
        "any" => (0, u32::MAX),
        "fragment" => (u32::MAX - 1, u32::MAX - 1),
        _ => {
            if let Some((lo, hi)) = port.split_once('-') {
                let lo = lo.trim().parse().unwrap_or(0);
                let hi = hi.trim().parse().unwrap_or(lo);
                (lo, hi)
            } else {
                let n = port.trim().parse().unwrap_or(0);
                (n, n)
            }
        }
    }
}

fn direction_rank(d: Direction) -> u8 {
    match d {
        Direction::Inbound => 0,
        Direction::Outbound => 1,
    }
}

fn proto_rank(p: Proto) -> u8 {
    match p {
        Proto::Tcp => 0,
        Proto::Udp => 1,
        Proto::Icmp => 2,
        Proto::Any => 3,
    }
}

fn selector_rank(s: &Selector) -> u8 {
    match s {
        Selector::Host(_) => 0,
        Selector::Cidr(_) => 1,
        Selector::Groups(_) => 2,
        Selector::CaName(_) => 3,
        Selector::CaSha(_) => 4,
    }
}

/// Stable sort key per spec §4.4's determinism requirement: `(direction,
/// proto, port-canonicalized, selector-kind, selector-value)`.
type SortKey = (u8, u8, (u32, u32), u8, String);

fn sort_key(rule: &FirewallRule) -> SortKey {
    (
        direction_rank(rule.direction),
        proto_rank(rule.proto),
        canonical_port_range(&rule.port),
        selector_rank(&rule.selector),
        rule.selector.value_string(),
    )
}

fn to_yaml_rule(rule: &FirewallRule) -> FirewallRuleYaml {
    let proto = match rule.proto {
        Proto::Tcp => "tcp",
        Proto::Udp => "udp",
        Proto::Icmp => "icmp",
        Proto::Any => "any",
    }
    .to_string();

    let mut out = FirewallRuleYaml {
        port: rule.port.clone(),
        proto,
        host: None,
        cidr: None,
        groups: None,
        ca_name: None,
        ca_sha: None,
    };

    match &rule.selector {
        Selector::Host(v) => out.host = Some(v.clone()),
        Selector::Cidr(v) => out.cidr = Some(v.clone()),
        Selector::Groups(v) => out.groups = Some(v.clone()),
        Selector::CaName(v) => out.ca_name = Some(v.clone()),
        Selector::CaSha(v) => out.ca_sha = Some(v.clone()),
    }

    out
}

/// Synthesizes the firewall section from the union of a client's rulesets:
/// rules deduplicated by structural equality, direction-separated, sorted by
/// the stable key above (spec §4.4 step 4).
pub fn build_firewall_section(rulesets: &[(meshctl_store::models::FirewallRuleset, Vec<FirewallRule>)]) -> FirewallSection {
    let mut all_rules: Vec<&FirewallRule> = rulesets.iter().flat_map(|(_, rules)| rules.iter()).collect();
    all_rules.sort_by_key(|r| sort_key(r));

    let mut inbound = Vec::new();
    let mut outbound = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for rule in all_rules {
        let yaml_rule = to_yaml_rule(rule);
        // Dedup is scoped per direction: an inbound and an outbound rule
        // with otherwise-identical fields are distinct entries.
        let is_inbound = matches!(rule.direction, Direction::Inbound);
        if !seen.insert((is_inbound, yaml_rule.clone())) {
            continue;
        }
        match rule.direction {
            Direction::Inbound => inbound.push(yaml_rule),
            Direction::Outbound => outbound.push(yaml_rule),
        }
    }

    FirewallSection {
        inbound,
        outbound,
        default_deny: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshctl_store::models::FirewallRuleset;
    use uuid::Uuid;

    fn rule(direction: Direction, port: &str, proto: Proto, selector: Selector) -> FirewallRule {
        FirewallRule {
            id: Uuid::new_v4(),
            ruleset_id: Uuid::new_v4(),
            position: 0,
            direction,
            port: port.to_string(),
            proto,
            selector,
        }
    }

    fn ruleset() -> FirewallRuleset {
        FirewallRuleset {
            id: Uuid::new_v4(),
            name: "rs".to_string(),
            owner: "op".to_string(),
        }
    }

    #[test]
    fn separates_inbound_and_outbound() {
        let rules = vec![
            rule(Direction::Inbound, "22", Proto::Tcp, Selector::Groups(vec!["role:admin".into()])),
            rule(Direction::Outbound, "443", Proto::Tcp, Selector::Cidr("0.0.0.0/0".into())),
        ];
        let section = build_firewall_section(&[(ruleset(), rules)]);
        assert_eq!(section.inbound.len(), 1);
        assert_eq!(section.outbound.len(), 1);
        assert!(section.default_deny);
    }

    #[test]
    fn identical_rule_in_both_directions_is_not_collapsed() {
        let rules = vec![
            rule(Direction::Inbound, "53", Proto::Udp, Selector::Cidr("10.0.0.0/8".into())),
            rule(Direction::Outbound, "53", Proto::Udp, Selector::Cidr("10.0.0.0/8".into())),
        ];
        let section = build_firewall_section(&[(ruleset(), rules)]);
        assert_eq!(section.inbound.len(), 1);
        assert_eq!(section.outbound.len(), 1);
    }

    #[test]
    fn duplicate_rules_within_a_direction_are_deduplicated() {
        let rules = vec![
            rule(Direction::Inbound, "80", Proto::Tcp, Selector::Groups(vec!["env:prod".into()])),
            rule(Direction::Inbound, "80", Proto::Tcp, Selector::Groups(vec!["env:prod".into()])),
        ];
        let section = build_firewall_section(&[(ruleset(), rules)]);
        assert_eq!(section.inbound.len(), 1);
    }

    #[test]
    fn sort_is_stable_across_rulesets() {
        let a = vec![rule(Direction::Inbound, "443", Proto::Tcp, Selector::Cidr("10.0.0.0/8".into()))];
        let b = vec![rule(Direction::Inbound, "22", Proto::Tcp, Selector::Cidr("10.0.0.0/8".into()))];
        let section = build_firewall_section(&[(ruleset(), a), (ruleset(), b)]);
        assert_eq!(section.inbound[0].port, "22");
        assert_eq!(section.inbound[1].port, "443");
    }
}
