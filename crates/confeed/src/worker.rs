//! The config-feed worker loop.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info};

use lookout_bus::{exchanges, BusClient, BusError, BusWorker, ConfigDocument, Transport};

use crate::scanner::{diff, parse_document, routing_key_for, scan, ChangeKind, Snapshot};

pub struct ConfigFeedWorker {
    name: String,
    root: PathBuf,
    broker: Transport,
    poll_period: Duration,
    snapshot: Snapshot,
    hydrated: bool,
}

impl ConfigFeedWorker {
    pub fn new(
        name: impl Into<String>,
        root: impl Into<PathBuf>,
        broker: Transport,
        poll_period: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            broker,
            poll_period,
            snapshot: Snapshot::new(),
            hydrated: false,
        }
    }

    /// Read, parse and publish one file. Parse errors are logged and
    /// dropped — downstream keeps its previous version.
    async fn publish_file(&self, client: &BusClient, relative: &str) -> Result<(), BusError> {
        let contents = match std::fs::read_to_string(self.root.join(relative)) {
            Ok(contents) => contents,
            Err(e) => {
                error!(path = relative, error = %e, "could not read config file");
                return Ok(());
            }
        };
        let document = match parse_document(&contents, relative) {
            Ok(document) => document,
            Err(e) => {
                error!(path = relative, error = %e, "unparseable config file, keeping previous version");
                return Ok(());
            }
        };
        self.publish(client, relative, &document).await
    }

    async fn publish(
        &self,
        client: &BusClient,
        relative: &str,
        document: &ConfigDocument,
    ) -> Result<(), BusError> {
        let routing_key = routing_key_for(relative);
        // Not mandatory: subtrees nobody subscribes to are fine.
        client
            .publish_confirm(exchanges::CONFIG, &routing_key, document, false)
            .await?;
        info!(routing_key = %routing_key, sections = document.sections.len(), "config published");
        Ok(())
    }
}

#[async_trait]
impl BusWorker for ConfigFeedWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self) -> Result<(), BusError> {
        let client = BusClient::connect_until_successful(&self.broker).await;
        client.declare_exchange(exchanges::CONFIG).await?;

        // First run: synthetically emit every existing file so freshly
        // started components hydrate.
        if !self.hydrated {
            self.snapshot = scan(&self.root);
            info!(files = self.snapshot.len(), root = %self.root.display(), "first run, hydrating downstream");
            let paths: Vec<String> = self.snapshot.keys().cloned().collect();
            for relative in paths {
                self.publish_file(&client, &relative).await?;
            }
            self.hydrated = true;
        }

        loop {
            client.pace(self.poll_period).await;

            let current = scan(&self.root);
            for (relative, change) in diff(&self.snapshot, &current) {
                match change {
                    ChangeKind::Created | ChangeKind::Modified => {
                        self.publish_file(&client, &relative).await?;
                    }
                    ChangeKind::Removed => {
                        // An empty document tells downstream to drop the
                        // chain's config.
                        let document = ConfigDocument {
                            path: crate::scanner::document_path(&relative),
                            sections: Default::default(),
                        };
                        self.publish(&client, &relative, &document).await?;
                    }
                }
            }
            self.snapshot = current;
        }
    }
}
