//! Routing rule sequence and rule-set references.
//!
//! The engine evaluates rules first-match-wins, so the emitted order is the
//! policy: block, then direct (bypass), then the private-range shortcut, then
//! explicit proxy, then the inbound catch-all.

use crate::singbox::document::{RouteBlock, RouteRule, RuleMatch, RuleSetRef};
use crate::singbox::policy::{clean_list, uppercase_codes, RegionRoutingSettings, SplitTunnelSettings};
use crate::singbox::types::{ConnectionMode, OutboundTag};

pub const ADS_RULE_SET_TAG: &str = "geosite-category-ads-all";
pub const ADS_RULE_SET_URL: &str =
    "https://raw.githubusercontent.com/SagerNet/sing-geosite/rule-set/geosite-category-ads-all.srs";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Rule groups
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Domain / IP-CIDR / process lists that route to one outbound.
struct TargetLists<'a> {
    domains: &'a [String],
    ips: &'a [String],
    processes: &'a [String],
}

impl<'a> TargetLists<'a> {
    fn block(s: &'a SplitTunnelSettings) -> Self {
        Self {
            domains: &s.block_domains,
            ips: &s.block_ips,
            processes: &s.block_processes,
        }
    }

    fn direct(s: &'a SplitTunnelSettings) -> Self {
        Self {
            domains: &s.bypass_domains,
            ips: &s.bypass_ips,
            processes: &s.bypass_processes,
        }
    }

    fn proxy(s: &'a SplitTunnelSettings) -> Self {
        Self {
            domains: &s.proxy_domains,
            ips: &s.proxy_ips,
            processes: &s.proxy_processes,
        }
    }

    /// One rule per non-empty list, in domain, IP, process order.
    fn push_rules(&self, outbound: OutboundTag, rules: &mut Vec<RouteRule>) {
        let lists: [(Vec<String>, fn(Vec<String>) -> RuleMatch); 3] = [
            (clean_list(self.domains), RuleMatch::Domain),
            (clean_list(self.ips), RuleMatch::IpCidr),
            (clean_list(self.processes), RuleMatch::ProcessName),
        ];
        for (values, matcher) in lists {
            if !values.is_empty() {
                rules.push(RouteRule::new(matcher(values), outbound));
            }
        }
    }
}

fn push_geoip(countries: &[String], outbound: OutboundTag, rules: &mut Vec<RouteRule>) {
    let codes = uppercase_codes(countries);
    if !codes.is_empty() {
        rules.push(RouteRule::new(RuleMatch::Geoip(codes), outbound));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Sequence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the ordered rule list.
pub fn build_rules(
    split: Option<&SplitTunnelSettings>,
    region: Option<&RegionRoutingSettings>,
    mode: ConnectionMode,
) -> Vec<RouteRule> {
    let mut rules = Vec::new();

    // block
    if let Some(s) = split {
        TargetLists::block(s).push_rules(OutboundTag::Block, &mut rules);
    }
    rules.push(RouteRule::new(
        RuleMatch::RuleSet(ADS_RULE_SET_TAG.into()),
        OutboundTag::Block,
    ));
    if let Some(r) = region {
        push_geoip(&r.block_countries, OutboundTag::Block, &mut rules);
    }

    // direct
    if let Some(s) = split {
        TargetLists::direct(s).push_rules(OutboundTag::Direct, &mut rules);
    }
    if let Some(r) = region {
        push_geoip(&r.direct_countries, OutboundTag::Direct, &mut rules);
    }
    rules.push(RouteRule::new(RuleMatch::IpIsPrivate(true), OutboundTag::Direct));

    // proxy
    if let Some(s) = split {
        TargetLists::proxy(s).push_rules(OutboundTag::Proxy, &mut rules);
    }
    if let Some(r) = region {
        push_geoip(&r.proxy_countries, OutboundTag::Proxy, &mut rules);
    }
    let inbounds = mode.inbound_tags().into_iter().map(str::to_string).collect();
    rules.push(RouteRule::new(RuleMatch::Inbound(inbounds), OutboundTag::Proxy));

    rules
}

/// The single remote rule-set every document references.
pub fn default_rule_sets() -> Vec<RuleSetRef> {
    vec![RuleSetRef {
        tag: ADS_RULE_SET_TAG.into(),
        kind: "remote".into(),
        format: "binary".into(),
        url: ADS_RULE_SET_URL.into(),
        download_detour: OutboundTag::Direct,
    }]
}

pub fn build_route(
    split: Option<&SplitTunnelSettings>,
    region: Option<&RegionRoutingSettings>,
    mode: ConnectionMode,
) -> RouteBlock {
    RouteBlock {
        rules: build_rules(split, region, mode),
        rule_set: default_rule_sets(),
        auto_detect_interface: true,
    }
}
