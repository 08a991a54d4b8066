//! Engine configuration objects.

use serde::{Deserialize, Serialize};

use crate::store::{PolicySettings, ProxyEntry};

pub const CHAIN_NAME: &str = "upstream-chain";
pub const HOP_NAME: &str = "hop-0";
pub const SERVICE_NAME: &str = "proxy-service";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connector {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialer {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub addr: String,
    pub connector: Connector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialer: Option<Dialer>,
}

impl Node {
    /// Build node `proxy-<ordinal>` from a parsed entry.
    ///
    /// `https` upstreams speak HTTP CONNECT over TLS, which the engine
    /// expresses as an `http` connector with a `tls` dialer.
    pub fn from_entry(ordinal: usize, entry: &ProxyEntry) -> Self {
        let (connector, dialer) = match entry.scheme.as_str() {
            "https" => ("http".to_string(), Some(Dialer { kind: "tls".to_string() })),
            other => (other.to_string(), None),
        };
        Node {
            name: format!("proxy-{}", ordinal),
            addr: entry.address.clone(),
            connector: Connector {
                kind: connector,
                auth: entry.credentials.as_ref().map(|c| Auth {
                    username: c.username.clone(),
                    password: c.password.clone(),
                }),
            },
            dialer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    pub strategy: String,
    pub max_fails: u32,
    pub fail_timeout: String,
}

impl From<&PolicySettings> for Selector {
    fn from(policy: &PolicySettings) -> Self {
        Selector {
            strategy: policy.strategy.as_engine_str().to_string(),
            max_fails: policy.max_retries,
            fail_timeout: policy.fail_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub name: String,
    pub selector: Selector,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub name: String,
    pub hops: Vec<Hop>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handler {
    #[serde(rename = "type")]
    pub kind: String,
    pub chain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub addr: String,
    pub handler: Handler,
    pub listener: Listener,
}

/// Chain with a single hop holding every node. `None` when there are no nodes.
pub fn build_chain(entries: &[ProxyEntry], policy: &PolicySettings) -> Option<Chain> {
    if entries.is_empty() {
        return None;
    }
    let nodes = entries
        .iter()
        .enumerate()
        .map(|(i, e)| Node::from_entry(i, e))
        .collect();

    Some(Chain {
        name: CHAIN_NAME.to_string(),
        hops: vec![Hop {
            name: HOP_NAME.to_string(),
            selector: Selector::from(policy),
            nodes,
        }],
    })
}

pub fn build_service(listen_addr: &str) -> Service {
    Service {
        name: SERVICE_NAME.to_string(),
        addr: listen_addr.to_string(),
        handler: Handler {
            kind: "http".to_string(),
            chain: CHAIN_NAME.to_string(),
        },
        listener: Listener { kind: "tcp".to_string() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{parse_proxy_text, SelectionStrategy};

    #[test]
    fn test_chain_payload_shape() {
        let parsed = parse_proxy_text("socks5://u:p@10.0.0.1:1080\n# comment\nhttp://10.0.0.2:8888");
        let policy = PolicySettings {
            strategy: SelectionStrategy::Random,
            max_retries: 2,
            timeout: 5,
            concurrency: 0,
        };
        let chain = build_chain(&parsed.entries, &policy).unwrap();
        let json = serde_json::to_value(&chain).unwrap();

        assert_eq!(json["name"], "upstream-chain");
        let hop = &json["hops"][0];
        assert_eq!(hop["name"], "hop-0");
        assert_eq!(
            hop["selector"],
            serde_json::json!({"strategy": "random", "maxFails": 2, "failTimeout": "5s"})
        );
        assert_eq!(hop["nodes"].as_array().unwrap().len(), 2);
        assert_eq!(hop["nodes"][0]["name"], "proxy-0");
        assert_eq!(hop["nodes"][0]["addr"], "10.0.0.1:1080");
        assert_eq!(hop["nodes"][0]["connector"]["type"], "socks5");
        assert_eq!(hop["nodes"][0]["connector"]["auth"]["username"], "u");
        assert!(hop["nodes"][1]["connector"].get("auth").is_none());
        assert!(hop["nodes"][1].get("dialer").is_none());
    }

    #[test]
    fn test_https_uses_tls_dialer() {
        let parsed = parse_proxy_text("https://secure.example.com:443");
        let chain = build_chain(&parsed.entries, &PolicySettings::default()).unwrap();
        let node = &chain.hops[0].nodes[0];
        assert_eq!(node.connector.kind, "http");
        assert_eq!(node.dialer, Some(Dialer { kind: "tls".into() }));
    }

    #[test]
    fn test_no_entries_no_chain() {
        assert!(build_chain(&[], &PolicySettings::default()).is_none());
    }

    #[test]
    fn test_service_payload_shape() {
        let json = serde_json::to_value(build_service(":8080")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "proxy-service",
                "addr": ":8080",
                "handler": {"type": "http", "chain": "upstream-chain"},
                "listener": {"type": "tcp"}
            })
        );
    }
}
