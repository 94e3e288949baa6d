//! The price-feed catalog (WeiWatchers-style listing).

use alloy::primitives::Address;
use serde::Deserialize;

use crate::error::MonitorError;

/// One feed as listed by the catalog endpoint. Unknown fields (feed name,
/// decimals, heartbeat…) are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedCatalogEntry {
    /// The stable address clients read.
    pub proxy_address: Address,
    /// The current aggregator behind the proxy at listing time.
    pub contract_address: Address,
    pub contract_version: u8,
}

/// Fetch the catalog. Callers decide what a failure means for their
/// refresh gate.
pub async fn fetch_catalog(
    client: &reqwest::Client,
    url: &str,
) -> Result<Vec<FeedCatalogEntry>, MonitorError> {
    let entries = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_catalog_listing() {
        let raw = r#"[
            {
                "proxyAddress": "0x0000000000000000000000000000000000000001",
                "contractAddress": "0x0000000000000000000000000000000000000002",
                "contractVersion": 3,
                "name": "ETH / USD",
                "decimals": 8
            },
            {
                "proxyAddress": "0x0000000000000000000000000000000000000003",
                "contractAddress": "0x0000000000000000000000000000000000000004",
                "contractVersion": 4
            }
        ]"#;
        let entries: Vec<FeedCatalogEntry> = serde_json::from_str(raw).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].contract_version, 3);
        assert_eq!(
            entries[1].proxy_address,
            Address::with_last_byte(3)
        );
    }
}
