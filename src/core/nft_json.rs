//! nftables JSON API payloads for minishell allow rules
//!
//! Rules are identified by their `comment`, which carries the deterministic
//! rule name. Deletion resolves the comment to kernel handles from a
//! `nft --json list chain` dump.

use crate::core::types::FirewallRuleDescriptor;
use serde_json::{Value, json};

/// Location of the allow rules inside the ruleset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainRef {
    pub family: String,
    pub table: String,
    pub chain: String,
}

impl ChainRef {
    /// Arguments for `nft --json list chain <family> <table> <chain>`
    pub fn list_args(&self) -> [&str; 6] {
        ["--json", "list", "chain", &self.family, &self.table, &self.chain]
    }
}

/// Batch adding `<proto> dport <port> accept comment "<name>"`
pub fn add_rule_payload(chain: &ChainRef, rule: &FirewallRuleDescriptor) -> Value {
    json!({
        "nftables": [
            {
                "add": {
                    "rule": {
                        "family": chain.family,
                        "table": chain.table,
                        "chain": chain.chain,
                        "comment": rule.name,
                        "expr": [
                            {
                                "match": {
                                    "op": "==",
                                    "left": {
                                        "payload": {
                                            "protocol": rule.protocol.nft_name(),
                                            "field": "dport"
                                        }
                                    },
                                    "right": rule.port
                                }
                            },
                            { "accept": null }
                        ]
                    }
                }
            }
        ]
    })
}

/// Batch deleting the given rule handles
pub fn delete_rules_payload(chain: &ChainRef, handles: &[u64]) -> Value {
    let commands: Vec<Value> = handles
        .iter()
        .map(|handle| {
            json!({
                "delete": {
                    "rule": {
                        "family": chain.family,
                        "table": chain.table,
                        "chain": chain.chain,
                        "handle": handle
                    }
                }
            })
        })
        .collect();
    json!({ "nftables": commands })
}

/// Handles of every rule in a chain listing whose comment equals `name`.
///
/// Unknown or malformed entries are skipped.
pub fn find_rule_handles(listing: &Value, name: &str) -> Vec<u64> {
    listing
        .get("nftables")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("rule"))
                .filter(|rule| rule.get("comment").and_then(Value::as_str) == Some(name))
                .filter_map(|rule| rule.get("handle").and_then(Value::as_u64))
                .collect()
        })
        .unwrap_or_default()
}
