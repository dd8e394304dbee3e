//! Bootstrap peer discovery.
//!
//! The official peers are always used. A few random entries from the public
//! node directory are appended when the directory answers; any failure there
//! leaves just the official peers.

use crate::config::DiscoveryConfig;
use crate::error::{ProtocolError, Result};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

#[derive(Debug, Deserialize)]
struct NodeDirectory {
    success: bool,
    #[serde(default)]
    data: Option<NodePage>,
}

#[derive(Debug, Deserialize)]
struct NodePage {
    #[serde(default)]
    items: Vec<NodeEntry>,
}

#[derive(Debug, Deserialize)]
struct NodeEntry {
    protocol: String,
    host: String,
    #[serde(deserialize_with = "port_from_any")]
    port: u16,
}

fn port_from_any<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| serde::de::Error::custom(format!("port out of range: {n}"))),
        serde_json::Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port: {s}"))),
        other => Err(serde::de::Error::custom(format!("invalid port: {other}"))),
    }
}

/// Peer URLs listed in a directory response body.
///
/// # Errors
/// `Discovery` when the directory reports failure, `Json` on a malformed body.
pub fn parse_nodes(body: &str) -> Result<Vec<String>> {
    let directory: NodeDirectory = serde_json::from_str(body)?;
    if !directory.success {
        return Err(ProtocolError::Discovery("directory reported failure".into()));
    }
    Ok(directory
        .data
        .map(|page| page.items)
        .unwrap_or_default()
        .into_iter()
        .map(|node| format!("{}://{}:{}", node.protocol, node.host, node.port))
        .collect())
}

/// Fetch every active node URL from the directory.
pub async fn fetch_public_nodes(config: &DiscoveryConfig) -> Result<Vec<String>> {
    let client = reqwest::Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| ProtocolError::Discovery(e.to_string()))?;

    let resp = client
        .get(&config.api_url)
        .send()
        .await
        .map_err(|e| ProtocolError::Discovery(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(ProtocolError::Discovery(format!("HTTP {}", resp.status())));
    }

    let body = resp
        .text()
        .await
        .map_err(|e| ProtocolError::Discovery(e.to_string()))?;
    parse_nodes(&body)
}

/// Pick up to `count` distinct entries at random.
fn sample(nodes: &[String], count: usize) -> Vec<String> {
    let amount = count.min(nodes.len());
    rand::seq::index::sample(&mut rand::rng(), nodes.len(), amount)
        .into_iter()
        .map(|i| nodes[i].clone())
        .collect()
}

/// Official peers followed by a random directory sample, de-duplicated in
/// order. Never fails.
#[instrument(skip(config), fields(url = %config.api_url))]
pub async fn bootstrap_peers(config: &DiscoveryConfig) -> Vec<String> {
    let mut peers = config.official_peers.clone();

    match fetch_public_nodes(config).await {
        Ok(nodes) => {
            debug!(available = nodes.len(), "Node directory answered");
            peers.extend(sample(&nodes, config.sample_size));
        }
        Err(e) => warn!(error = %e, "Node directory unavailable, using official peers"),
    }

    dedup_in_order(peers)
}

fn dedup_in_order(peers: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    peers.into_iter().filter(|p| seen.insert(p.clone())).collect()
}
