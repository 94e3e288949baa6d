//! Repository monitor: polls a JSON releases feed.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use lookout_bus::{exchanges, routing, BusClient, MetaData, RawError, RawMessage, RawResult};
use lookout_core::{now_ts, EntityId, EntityKind};

use crate::error::MonitorError;
use crate::monitor::{Monitor, RoundStatus};

/// One release entry as the feed reports it (GitHub-shaped).
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    #[serde(rename = "name", default)]
    pub release_name: Option<String>,
    pub tag_name: String,
}

pub struct RepoMonitor {
    name: String,
    entity: EntityId,
    releases_url: String,
    period: Duration,
    http: reqwest::Client,
}

impl RepoMonitor {
    pub fn new(
        name: impl Into<String>,
        entity: EntityId,
        releases_url: impl Into<String>,
        period: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            entity,
            releases_url: releases_url.into(),
            period,
            http: reqwest::Client::new(),
        }
    }

    fn meta(&self, time: f64) -> MetaData {
        MetaData {
            monitor_name: self.name.clone(),
            kind: EntityKind::Repository,
            id: self.entity.id.clone(),
            name: self.entity.name.clone(),
            parent_id: self.entity.parent_id.clone(),
            time,
        }
    }

    async fn fetch_releases(&self) -> Result<Vec<Release>, MonitorError> {
        let releases = self
            .http
            .get(&self.releases_url)
            .header("User-Agent", "lookout")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(releases)
    }
}

/// Shape the ordered release list: index "0" is the newest release.
fn shape_releases(releases: &[Release]) -> serde_json::Value {
    let mut indexed = serde_json::Map::new();
    for (i, release) in releases.iter().enumerate() {
        indexed.insert(
            i.to_string(),
            json!({
                "release_name": release.release_name.clone().unwrap_or_else(|| release.tag_name.clone()),
                "tag_name": release.tag_name,
            }),
        );
    }
    json!({
        "no_of_releases": releases.len(),
        "releases": indexed,
    })
}

#[async_trait]
impl Monitor for RepoMonitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn period(&self) -> Duration {
        self.period
    }

    async fn tick(&mut self, client: &BusClient) -> Result<RoundStatus, MonitorError> {
        let routing_key = routing::raw(EntityKind::Repository, &self.entity.parent_id);

        let message = match self.fetch_releases().await {
            Ok(releases) => RawMessage::Result(RawResult {
                meta_data: self.meta(now_ts()),
                data: shape_releases(&releases),
            }),
            Err(e) => RawMessage::Error(RawError {
                meta_data: self.meta(now_ts()),
                error: e.as_wire_error(&self.releases_url),
            }),
        };

        client
            .publish_confirm(exchanges::RAW_DATA, &routing_key, &message, true)
            .await?;
        Ok(RoundStatus::Clean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_release_gets_index_zero() {
        let releases = vec![
            Release {
                release_name: Some("v2.0 — Hardfork".into()),
                tag_name: "v2.0.0".into(),
            },
            Release {
                release_name: None,
                tag_name: "v1.9.0".into(),
            },
        ];
        let data = shape_releases(&releases);
        assert_eq!(data["no_of_releases"], 2);
        assert_eq!(data["releases"]["0"]["tag_name"], "v2.0.0");
        // A missing name falls back to the tag.
        assert_eq!(data["releases"]["1"]["release_name"], "v1.9.0");
    }

    #[test]
    fn empty_feed_is_valid() {
        let data = shape_releases(&[]);
        assert_eq!(data["no_of_releases"], 0);
        assert!(data["releases"].as_object().unwrap().is_empty());
    }
}
