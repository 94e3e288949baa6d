//! The observer itself: refresh gates, source selection, participation
//! filtering and the per-operator v3/v4 collectors.

use std::collections::HashMap;
use std::time::Duration;

use alloy::primitives::aliases::U80;
use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use alloy::rpc::types::SyncStatus;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error, info, warn};

use lookout_bus::{exchanges, routing, BusClient, MetaData, RawError, RawMessage, RawResult};
use lookout_core::{now_ts, EntityKind, ErrorCode, MonitoringError, TimedGate};

use crate::contracts::abi::{AggregatorProxy, AggregatorV3, AggregatorV4};
use crate::contracts::arena::WatermarkArena;
use crate::contracts::catalog::{fetch_catalog, FeedCatalogEntry};
use crate::contracts::rounds::{
    walk_v3_rounds, walk_v4_rounds, RoundData, RoundReader, V3Submission, V4Transmission,
};
use crate::error::MonitorError;
use crate::monitor::{Monitor, RoundStatus};
use crate::scrape::{fetch_metrics, labels_of};

/// Catalog and operator-address refresh cadences.
pub const CATALOG_REFRESH: Duration = Duration::from_secs(86_400);
pub const ADDRESS_REFRESH: Duration = Duration::from_secs(86_400);

/// One EVM RPC endpoint the observer may read from.
pub struct EvmSource<P> {
    pub url: String,
    pub provider: P,
}

/// One Chainlink operator (node) to observe.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub node_id: String,
    pub node_name: String,
    /// Prometheus endpoints, tried in order, carrying the operator's
    /// on-chain `account` on the `eth_balance` metric.
    pub prometheus_urls: Vec<String>,
}

/// Which proxies an operator participates on, split by contract version.
#[derive(Debug, Clone, Default)]
struct Participation {
    v3: Vec<Address>,
    v4: Vec<Address>,
}

pub struct ContractsObserver<P> {
    name: String,
    parent_id: String,
    catalog_url: String,
    period: Duration,
    http: reqwest::Client,
    sources: Vec<EvmSource<P>>,
    operators: Vec<OperatorConfig>,
    /// node_id → operator address, from the Prometheus discovery pass.
    addresses: HashMap<String, Address>,
    catalog: Vec<FeedCatalogEntry>,
    participation: HashMap<String, Participation>,
    arena: WatermarkArena,
    catalog_gate: TimedGate,
    address_gate: TimedGate,
}

impl<P: Provider + Clone> ContractsObserver<P> {
    pub fn new(
        name: impl Into<String>,
        parent_id: impl Into<String>,
        catalog_url: impl Into<String>,
        sources: Vec<EvmSource<P>>,
        operators: Vec<OperatorConfig>,
        period: Duration,
    ) -> Result<Self, MonitorError> {
        let name = name.into();
        if sources.is_empty() {
            return Err(MonitorError::NotEnoughSources {
                monitor: name,
                field: "evm_sources".into(),
            });
        }
        if operators.is_empty() {
            return Err(MonitorError::NotEnoughSources {
                monitor: name,
                field: "node_configs".into(),
            });
        }
        Ok(Self {
            name,
            parent_id: parent_id.into(),
            catalog_url: catalog_url.into(),
            period,
            http: reqwest::Client::new(),
            sources,
            operators,
            addresses: HashMap::new(),
            catalog: Vec::new(),
            participation: HashMap::new(),
            arena: WatermarkArena::new(),
            catalog_gate: TimedGate::new(CATALOG_REFRESH),
            address_gate: TimedGate::new(ADDRESS_REFRESH),
        })
    }

    fn chain_meta(&self, time: f64) -> MetaData {
        MetaData {
            monitor_name: self.name.clone(),
            kind: EntityKind::ChainlinkContract,
            id: self.parent_id.clone(),
            name: self.parent_id.clone(),
            parent_id: self.parent_id.clone(),
            time,
        }
    }

    fn operator_meta(&self, operator: &OperatorConfig, time: f64) -> MetaData {
        MetaData {
            monitor_name: self.name.clone(),
            kind: EntityKind::ChainlinkContract,
            id: operator.node_id.clone(),
            name: operator.node_name.clone(),
            parent_id: self.parent_id.clone(),
            time,
        }
    }

    async fn publish_chain_error(
        &self,
        client: &BusClient,
        error: MonitoringError,
    ) -> Result<(), MonitorError> {
        let message = RawMessage::Error(RawError {
            meta_data: self.chain_meta(now_ts()),
            error,
        });
        client
            .publish_confirm(
                exchanges::RAW_DATA,
                &routing::raw(EntityKind::ChainlinkContract, &self.parent_id),
                &message,
                true,
            )
            .await?;
        Ok(())
    }

    /// Operator address discovery: each node's Prometheus endpoints are
    /// tried in order until one yields an `eth_balance` sample whose label
    /// carries the operator `account`. Returns whether any node stayed
    /// unresolved (the gate must not advance then).
    async fn discover_addresses(&self) -> (HashMap<String, Address>, bool) {
        let mut addresses = HashMap::new();
        let mut missing = false;

        for operator in &self.operators {
            for url in &operator.prometheus_urls {
                match fetch_metrics(&self.http, url).await {
                    Ok(scrape) => {
                        let account = labels_of(&scrape, "eth_balance")
                            .into_iter()
                            .find_map(|labels| labels.get("account").cloned());
                        match account.and_then(|a| a.parse::<Address>().ok()) {
                            Some(address) => {
                                addresses.insert(operator.node_id.clone(), address);
                            }
                            None => {
                                warn!(
                                    node = %operator.node_name,
                                    url = %url,
                                    "eth_balance carries no account label"
                                );
                            }
                        }
                        // Only one endpoint of a pair is live at a time:
                        // the first reachable page is authoritative.
                        break;
                    }
                    Err(e) => {
                        debug!(node = %operator.node_name, url = %url, error = %e, "endpoint not reachable");
                    }
                }
            }

            if !addresses.contains_key(&operator.node_id) {
                missing = true;
            }
        }

        (addresses, missing)
    }

    /// First endpoint that answers and reports not-syncing.
    async fn select_source(&self) -> Option<usize> {
        for (index, source) in self.sources.iter().enumerate() {
            let reachable = source.provider.get_block_number().await.is_ok();
            if !reachable {
                debug!(url = %source.url, "source unreachable");
                continue;
            }
            match source.provider.syncing().await {
                Ok(SyncStatus::None) => return Some(index),
                Ok(_) => debug!(url = %source.url, "source still syncing"),
                Err(e) => debug!(url = %source.url, error = %e, "syncing probe failed"),
            }
        }
        None
    }

    /// Rebuild each operator's participating-contract sets by membership
    /// of its address in v3 `getOracles()` / v4 `transmitters()`.
    async fn filter_participation(
        &self,
        provider: &P,
    ) -> Result<HashMap<String, Participation>, MonitorError> {
        let mut participation = HashMap::new();
        for operator in &self.operators {
            let Some(&address) = self.addresses.get(&operator.node_id) else {
                continue;
            };
            let mut entry = Participation::default();
            for feed in &self.catalog {
                match feed.contract_version {
                    3 => {
                        let aggregator = AggregatorV3::new(feed.contract_address, provider.clone());
                        let oracles = aggregator.getOracles().call().await?._0;
                        if oracles.contains(&address) {
                            entry.v3.push(feed.proxy_address);
                        }
                    }
                    4 => {
                        let aggregator = AggregatorV4::new(feed.contract_address, provider.clone());
                        let transmitters = aggregator.transmitters().call().await?._0;
                        if transmitters.contains(&address) {
                            entry.v4.push(feed.proxy_address);
                        }
                    }
                    version => {
                        debug!(version, proxy = %feed.proxy_address, "unknown contract version");
                    }
                }
            }
            debug!(
                node = %operator.node_name,
                v3 = entry.v3.len(),
                v4 = entry.v4.len(),
                "participation filtered"
            );
            participation.insert(operator.node_id.clone(), entry);
        }
        Ok(participation)
    }

    async fn collect_v3(
        &mut self,
        provider: &P,
        node_id: &str,
        operator: Address,
    ) -> Result<serde_json::Map<String, serde_json::Value>, MonitorError> {
        let proxies = self
            .participation
            .get(node_id)
            .map(|p| p.v3.clone())
            .unwrap_or_default();
        let operator_id = self.arena.operator_id(node_id);
        let mut out = serde_json::Map::new();

        for proxy in proxies {
            // Proxies may rotate their aggregator; resolve fresh each tick.
            let proxy_contract = AggregatorProxy::new(proxy, provider.clone());
            let aggregator_address = proxy_contract.aggregator().call().await?._0;
            let description = proxy_contract.description().call().await?._0;
            let aggregator = AggregatorV3::new(aggregator_address, provider.clone());

            let head = provider.get_block_number().await?;
            let first = match self.arena.watermark(operator_id, proxy) {
                Some(w) => (w.last_block + 1).min(head),
                None => head,
            };

            let raw_events = aggregator
                .SubmissionReceived_filter()
                .topic3(operator.into_word())
                .from_block(first)
                .to_block(head)
                .query()
                .await?;
            let events: Vec<V3Submission> = raw_events
                .into_iter()
                .map(|(event, log)| V3Submission {
                    round_id: event.round as u64,
                    submission: event.submission.to_string(),
                    block_number: log.block_number.unwrap_or(head),
                })
                .collect();

            let latest = aggregator.latestRoundData().call().await?;
            let payment = aggregator.withdrawablePayment(operator).call().await?._0;

            let prior = self
                .arena
                .watermark(operator_id, proxy)
                .and_then(|w| w.last_round);
            let reader = V3Reader {
                aggregator: &aggregator,
            };
            let walk = walk_v3_rounds(&events, &reader, head, prior).await?;
            self.arena
                .update(operator_id, proxy, walk.window_end, walk.last_round_observed);

            out.insert(
                proxy.to_string(),
                json!({
                    "contractVersion": 3,
                    "aggregatorAddress": aggregator_address.to_string(),
                    "description": description,
                    "latestRound": narrow_u80(latest.roundId),
                    "latestAnswer": latest.answer.to_string(),
                    "latestTimestamp": narrow_u256(latest.updatedAt),
                    "answeredInRound": narrow_u80(latest.answeredInRound),
                    "withdrawablePayment": payment.to_string(),
                    "lastRoundObserved": walk.last_round_observed,
                    "historicalRounds": walk.rounds,
                }),
            );
        }

        Ok(out)
    }

    async fn collect_v4(
        &mut self,
        provider: &P,
        node_id: &str,
        operator: Address,
    ) -> Result<serde_json::Map<String, serde_json::Value>, MonitorError> {
        let proxies = self
            .participation
            .get(node_id)
            .map(|p| p.v4.clone())
            .unwrap_or_default();
        let operator_id = self.arena.operator_id(node_id);
        let mut out = serde_json::Map::new();

        for proxy in proxies {
            let proxy_contract = AggregatorProxy::new(proxy, provider.clone());
            let aggregator_address = proxy_contract.aggregator().call().await?._0;
            let description = proxy_contract.description().call().await?._0;
            let aggregator = AggregatorV4::new(aggregator_address, provider.clone());

            let transmitters = aggregator.transmitters().call().await?._0;
            let Some(transmitter_index) = transmitters.iter().position(|t| *t == operator) else {
                // The operator was removed from this contract between
                // filtering and now.
                warn!(node_id, proxy = %proxy, "operator is no longer a transmitter, skipping");
                continue;
            };

            let head = provider.get_block_number().await?;
            let first = match self.arena.watermark(operator_id, proxy) {
                Some(w) => (w.last_block + 1).min(head),
                None => head,
            };

            let raw_events = aggregator
                .NewTransmission_filter()
                .from_block(first)
                .to_block(head)
                .query()
                .await?;
            let events: Vec<V4Transmission> = raw_events
                .into_iter()
                .map(|(event, log)| V4Transmission {
                    round_id: event.aggregatorRoundId as u64,
                    observations: event.observations.iter().map(|o| o.to_string()).collect(),
                    observers: event.observers.to_vec(),
                    block_number: log.block_number.unwrap_or(head),
                })
                .collect();

            let latest = aggregator.latestRoundData().call().await?;
            let payment = aggregator.owedPayment(operator).call().await?._0;

            let prior = self
                .arena
                .watermark(operator_id, proxy)
                .and_then(|w| w.last_round);
            let reader = V4Reader {
                aggregator: &aggregator,
            };
            let walk = walk_v4_rounds(
                &events,
                &reader,
                transmitter_index,
                transmitters.len() as u32,
                prior,
            )
            .await?;
            // v4 never rolls back: consensus is implicit in the event.
            self.arena
                .update(operator_id, proxy, head, walk.last_round_observed);

            out.insert(
                proxy.to_string(),
                json!({
                    "contractVersion": 4,
                    "aggregatorAddress": aggregator_address.to_string(),
                    "description": description,
                    "latestRound": narrow_u80(latest.roundId),
                    "latestAnswer": latest.answer.to_string(),
                    "latestTimestamp": narrow_u256(latest.updatedAt),
                    "answeredInRound": narrow_u80(latest.answeredInRound),
                    "owedPayment": payment.to_string(),
                    "lastRoundObserved": walk.last_round_observed,
                    "historicalRounds": walk.rounds,
                }),
            );
        }

        Ok(out)
    }

    async fn collect_operator(
        &mut self,
        provider: &P,
        node_id: &str,
        operator: Address,
    ) -> Result<serde_json::Value, MonitorError> {
        let mut data = self.collect_v3(provider, node_id, operator).await?;
        data.extend(self.collect_v4(provider, node_id, operator).await?);
        Ok(serde_json::Value::Object(data))
    }
}

#[async_trait]
impl<P: Provider + Clone> Monitor for ContractsObserver<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn period(&self) -> Duration {
        self.period
    }

    async fn tick(&mut self, client: &BusClient) -> Result<RoundStatus, MonitorError> {
        let mut re_filter = false;
        let mut catalog_failed = false;

        // Catalog refresh. Failure surfaces as one chain-level error and
        // leaves the gate open for the next tick.
        if self.catalog_gate.is_open() {
            match fetch_catalog(&self.http, &self.catalog_url).await {
                Ok(catalog) => {
                    info!(feeds = catalog.len(), "contracts catalog refreshed");
                    self.catalog = catalog;
                    self.catalog_gate.mark_fired();
                    re_filter = true;
                }
                Err(e) => {
                    error!(url = %self.catalog_url, error = %e, "could not retrieve contracts");
                    catalog_failed = true;
                }
            }
        }

        // Operator address refresh, attempted even on a failed catalog
        // round. A partial result is stored but the gate only advances
        // when every node resolved.
        if self.address_gate.is_open() {
            let (addresses, missing) = self.discover_addresses().await;
            self.addresses = addresses;
            re_filter = true;
            if missing {
                warn!("not every operator address was resolved; retrying next tick");
            } else {
                self.address_gate.mark_fired();
            }
        }

        if catalog_failed {
            self.publish_chain_error(
                client,
                MonitoringError::new(
                    ErrorCode::CouldNotRetrieveContracts,
                    format!("could not retrieve contracts from {}", self.catalog_url),
                ),
            )
            .await?;
            return Ok(RoundStatus::Degraded);
        }

        let Some(source_index) = self.select_source().await else {
            error!(parent_id = %self.parent_id, "no synced EVM source accessible");
            self.publish_chain_error(
                client,
                MonitoringError::new(ErrorCode::NoSyncedSource, "no synced EVM node accessible"),
            )
            .await?;
            return Ok(RoundStatus::Degraded);
        };
        let provider = self.sources[source_index].provider.clone();

        if re_filter {
            match self.filter_participation(&provider).await {
                Ok(participation) => self.participation = participation,
                Err(e) => {
                    // Keep the stale sets; better than dropping coverage.
                    error!(error = %e, "could not re-filter participating contracts");
                }
            }
        }

        let operators = self.operators.clone();
        for operator in &operators {
            let Some(&address) = self.addresses.get(&operator.node_id) else {
                continue;
            };
            let data = match self
                .collect_operator(&provider, &operator.node_id, address)
                .await
            {
                Ok(data) => data,
                Err(e) => {
                    error!(node = %operator.node_name, error = %e, "contract data retrieval failed, skipping operator");
                    continue;
                }
            };

            let message = RawMessage::Result(RawResult {
                meta_data: self.operator_meta(operator, now_ts()),
                data,
            });
            client
                .publish_confirm(
                    exchanges::RAW_DATA,
                    &routing::raw(EntityKind::ChainlinkContract, &self.parent_id),
                    &message,
                    true,
                )
                .await?;
        }

        Ok(RoundStatus::Clean)
    }
}

// ── Alloy-backed round readers ───────────────────────────────────────

struct V3Reader<'a, P> {
    aggregator: &'a AggregatorV3::AggregatorV3Instance<(), P>,
}

#[async_trait]
impl<P: Provider> RoundReader for V3Reader<'_, P> {
    async fn round_data(&self, round_id: u64) -> Result<Option<RoundData>, MonitorError> {
        match self
            .aggregator
            .getRoundData(U80::from(round_id))
            .call()
            .await
        {
            Ok(data) => Ok(Some(RoundData {
                answer: data.answer.to_string(),
                timestamp: narrow_u256(data.updatedAt),
                answered_in_round: narrow_u80(data.answeredInRound),
            })),
            // The aggregator reverts the lookup until consensus exists.
            Err(e) if is_revert(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

struct V4Reader<'a, P> {
    aggregator: &'a AggregatorV4::AggregatorV4Instance<(), P>,
}

#[async_trait]
impl<P: Provider> RoundReader for V4Reader<'_, P> {
    async fn round_data(&self, round_id: u64) -> Result<Option<RoundData>, MonitorError> {
        match self
            .aggregator
            .getRoundData(U80::from(round_id))
            .call()
            .await
        {
            Ok(data) => Ok(Some(RoundData {
                answer: data.answer.to_string(),
                timestamp: narrow_u256(data.updatedAt),
                answered_in_round: narrow_u80(data.answeredInRound),
            })),
            Err(e) if is_revert(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_revert(error: &alloy::contract::Error) -> bool {
    matches!(
        error,
        alloy::contract::Error::TransportError(alloy::transports::RpcError::ErrorResp(_))
    )
}

fn narrow_u80(value: U80) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

fn narrow_u256(value: U256) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}
