//! Worker families: what each manager supervises and how config
//! documents translate into child specs.

use std::collections::BTreeMap;

use lookout_bus::ConfigDocument;
use lookout_core::Environment;

use crate::supervisor::ChildSpec;

/// A family of workers supervised by one manager.
pub trait Family: Send {
    fn name(&self) -> &str;

    /// Children that exist regardless of config.
    fn initial_specs(&self, env: &Environment) -> Vec<ChildSpec>;

    /// Config subtree this family follows, `None` for static families.
    fn config_pattern(&self) -> Option<String> {
        None
    }

    /// Child specs for one chain's config document. An empty document
    /// (deleted file) removes the chain's children.
    fn specs_for_chain(
        &self,
        _chain_name: &str,
        _doc: &ConfigDocument,
        _env: &Environment,
    ) -> Vec<ChildSpec> {
        Vec::new()
    }

    /// Prefix identifying this family's children of a given chain, used
    /// to find what a config removal should terminate.
    fn chain_child_prefix(&self, chain_name: &str) -> String {
        format!("{chain_name}:")
    }
}

// ── Config-driven monitors manager ───────────────────────────────────

/// Supervises contract observers and node monitors, one set per chain,
/// driven by `chains/<kind>/<chain>/nodes_config` documents.
pub struct MonitorsFamily {
    name: String,
}

impl MonitorsFamily {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Family for MonitorsFamily {
    fn name(&self) -> &str {
        &self.name
    }

    fn initial_specs(&self, _env: &Environment) -> Vec<ChildSpec> {
        Vec::new()
    }

    fn config_pattern(&self) -> Option<String> {
        Some("chains.#.nodes_config".to_string())
    }

    fn specs_for_chain(
        &self,
        chain_name: &str,
        doc: &ConfigDocument,
        _env: &Environment,
    ) -> Vec<ChildSpec> {
        let mut specs = Vec::new();

        // The chain section names the realm and its shared sources.
        let chain = doc.sections.get("chain").cloned().unwrap_or_default();
        let parent_id = chain
            .get("parent_id")
            .cloned()
            .unwrap_or_else(|| chain_name.to_string());
        let catalog_url = chain.get("weiwatchers_url").cloned();
        let evm_urls: Vec<String> = chain
            .get("evm_nodes")
            .map(|raw| split_list(raw))
            .unwrap_or_default();

        // Every node section becomes one node monitor child.
        let mut operators = Vec::new();
        for (section, record) in &doc.sections {
            let Some(node_id) = section.strip_prefix("node_") else {
                continue;
            };
            let node_name = record
                .get("name")
                .cloned()
                .unwrap_or_else(|| node_id.to_string());
            let prometheus_urls = record
                .get("prometheus_urls")
                .map(|raw| split_list(raw))
                .unwrap_or_default();

            let mut env_vars = BTreeMap::new();
            env_vars.insert("NODE_ID".to_string(), node_id.to_string());
            env_vars.insert("NODE_NAME".to_string(), node_name.clone());
            env_vars.insert("PARENT_ID".to_string(), parent_id.clone());
            env_vars.insert(
                "NODE_PROMETHEUS_URLS".to_string(),
                prometheus_urls.join(","),
            );
            specs.push(ChildSpec {
                name: format!("{}node-monitor ({node_name})", self.chain_child_prefix(chain_name)),
                binary: "node-monitor".to_string(),
                args: Vec::new(),
                env: env_vars,
                parent_id: parent_id.clone(),
            });

            operators.push(serde_json::json!({
                "node_id": node_id,
                "node_name": node_name,
                "prometheus_urls": prometheus_urls,
            }));
        }

        // One contract observer per chain, when it has the inputs.
        if let Some(catalog_url) = catalog_url {
            if !evm_urls.is_empty() && !operators.is_empty() {
                let config = serde_json::json!({
                    "parent_id": parent_id,
                    "catalog_url": catalog_url,
                    "evm_urls": evm_urls,
                    "operators": operators,
                });
                let mut env_vars = BTreeMap::new();
                env_vars.insert("CONTRACTS_CONFIG".to_string(), config.to_string());
                specs.push(ChildSpec {
                    name: format!("{}contracts-monitor", self.chain_child_prefix(chain_name)),
                    binary: "contracts-monitor".to_string(),
                    args: Vec::new(),
                    env: env_vars,
                    parent_id,
                });
            }
        }

        specs
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ── Pure-singleton alerters manager ──────────────────────────────────

/// Supervises the repository alerter: a single child, reset before every
/// (re)start.
pub struct AlertersFamily {
    name: String,
}

impl AlertersFamily {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Family for AlertersFamily {
    fn name(&self) -> &str {
        &self.name
    }

    fn initial_specs(&self, _env: &Environment) -> Vec<ChildSpec> {
        vec![ChildSpec {
            name: "repo-alerter".to_string(),
            binary: "repo-alerter".to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
            parent_id: "general".to_string(),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn doc(sections: &[(&str, &[(&str, &str)])]) -> ConfigDocument {
        let mut out = BTreeMap::new();
        for (name, options) in sections {
            let mut section = BTreeMap::new();
            for (key, value) in *options {
                section.insert(key.to_string(), value.to_string());
            }
            out.insert(name.to_string(), section);
        }
        ConfigDocument {
            path: "chains/chainlink/bsc/nodes_config".to_string(),
            sections: out,
        }
    }

    #[test]
    fn chain_config_yields_node_monitors_and_one_observer() {
        let family = MonitorsFamily::new("monitors-manager");
        let document = doc(&[
            (
                "chain",
                &[
                    ("parent_id", "chain_bsc"),
                    ("weiwatchers_url", "https://weiwatchers.example/feeds.json"),
                    ("evm_nodes", "http://rpc-1:8545, http://rpc-2:8545"),
                ],
            ),
            (
                "node_ocr1",
                &[
                    ("name", "ocr-node-1"),
                    ("prometheus_urls", "http://node1:9090/metrics"),
                ],
            ),
        ]);

        let env = test_environment();
        let specs = family.specs_for_chain("bsc", &document, &env);
        assert_eq!(specs.len(), 2);

        let node = specs.iter().find(|s| s.binary == "node-monitor").unwrap();
        assert_eq!(node.parent_id, "chain_bsc");
        assert_eq!(node.env["NODE_ID"], "ocr1");
        assert!(node.name.starts_with("bsc:"));

        let observer = specs
            .iter()
            .find(|s| s.binary == "contracts-monitor")
            .unwrap();
        let embedded: serde_json::Value =
            serde_json::from_str(&observer.env["CONTRACTS_CONFIG"]).unwrap();
        assert_eq!(embedded["parent_id"], "chain_bsc");
        assert_eq!(embedded["evm_urls"].as_array().unwrap().len(), 2);
        assert_eq!(embedded["operators"][0]["node_id"], "ocr1");
    }

    #[test]
    fn chain_without_catalog_gets_no_observer() {
        let family = MonitorsFamily::new("monitors-manager");
        let document = doc(&[(
            "node_ocr1",
            &[("name", "ocr-node-1"), ("prometheus_urls", "http://node1:9090")],
        )]);
        let specs = family.specs_for_chain("bsc", &document, &test_environment());
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].binary, "node-monitor");
    }

    fn test_environment() -> Environment {
        Environment {
            broker_host: "127.0.0.1".into(),
            broker_port: 5672,
            redis_host: "127.0.0.1".into(),
            redis_port: 6379,
            redis_db: 10,
            namespace: "test".into(),
            logging_level: "info".into(),
            transformer_queue_size: 1000,
            alerter_queue_size: 1000,
            system_monitor_period: 60,
            repo_monitor_period: 3600,
            node_monitor_period: 30,
            contracts_monitor_period: 300,
            enable_console_alerts: false,
        }
    }
}
