//! Round-walk algorithms for the v3 and v4 collectors.
//!
//! The walks are written against a [`RoundReader`] so the watermark
//! semantics are checkable without a chain: the real reader wraps an
//! aggregator instance, the tests wrap a map.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::MonitorError;

/// Consensus data of one round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundData {
    /// Decimal string; answers are int256/int192 and can exceed u64.
    pub answer: String,
    pub timestamp: u64,
    pub answered_in_round: u64,
}

/// Reads per-round consensus data from an aggregator.
///
/// `Ok(None)` means the aggregator refused the lookup — for v3 that is the
/// consensus-not-reached signal. `Err` is a source failure.
#[async_trait]
pub trait RoundReader: Sync {
    async fn round_data(&self, round_id: u64) -> Result<Option<RoundData>, MonitorError>;
}

/// One entry of the per-proxy `historicalRounds` output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalRound {
    pub round_id: u64,
    pub round_answer: Option<String>,
    pub round_timestamp: Option<u64>,
    pub answered_in_round: Option<u64>,
    pub node_submission: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_of_observations: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_of_transmitters: Option<u32>,
}

/// A `SubmissionReceived` event already filtered to one operator.
#[derive(Debug, Clone)]
pub struct V3Submission {
    pub round_id: u64,
    pub submission: String,
    pub block_number: u64,
}

/// A `NewTransmission` event (not operator-filtered; the operator is
/// located through the observers index array).
#[derive(Debug, Clone)]
pub struct V4Transmission {
    pub round_id: u64,
    /// Observations in observer order, decimal strings.
    pub observations: Vec<String>,
    /// Transmitter indices, one byte per observation.
    pub observers: Vec<u8>,
    pub block_number: u64,
}

/// Result of a v3 round walk.
#[derive(Debug, Clone, PartialEq)]
pub struct V3Walk {
    pub rounds: Vec<HistoricalRound>,
    /// Where `last_block_monitored` must end: the head of the scanned
    /// window, rolled back below the first round without consensus.
    pub window_end: u64,
    pub last_round_observed: Option<u64>,
}

/// Walk v3 submissions in event order.
///
/// On a consensus-not-reached round the round is still recorded (null
/// answer/timestamp), the window end rolls back to just below the event's
/// block, and the walk stops — the next tick re-examines that round until
/// consensus is reached.
pub async fn walk_v3_rounds<R: RoundReader>(
    events: &[V3Submission],
    reader: &R,
    window_end: u64,
    prior_last_round: Option<u64>,
) -> Result<V3Walk, MonitorError> {
    let mut rounds = Vec::with_capacity(events.len());
    let mut window_end = window_end;
    let mut last_round_observed = prior_last_round;

    for event in events {
        last_round_observed = Some(event.round_id);
        match reader.round_data(event.round_id).await? {
            Some(data) => {
                rounds.push(HistoricalRound {
                    round_id: event.round_id,
                    round_answer: Some(data.answer),
                    round_timestamp: Some(data.timestamp),
                    answered_in_round: Some(data.answered_in_round),
                    node_submission: Some(event.submission.clone()),
                    no_of_observations: None,
                    no_of_transmitters: None,
                });
            }
            None => {
                warn!(
                    round_id = event.round_id,
                    "round has no consensus yet, rolling the watermark back"
                );
                rounds.push(HistoricalRound {
                    round_id: event.round_id,
                    round_answer: None,
                    round_timestamp: None,
                    answered_in_round: None,
                    node_submission: Some(event.submission.clone()),
                    no_of_observations: None,
                    no_of_transmitters: None,
                });
                window_end = event.block_number.saturating_sub(1);
                break;
            }
        }
    }

    Ok(V3Walk {
        rounds,
        window_end,
        last_round_observed,
    })
}

/// Result of a v4 round walk. v4 never rolls the watermark back —
/// consensus is implicit in `NewTransmission`.
#[derive(Debug, Clone, PartialEq)]
pub struct V4Walk {
    pub rounds: Vec<HistoricalRound>,
    pub last_round_observed: Option<u64>,
}

/// Walk v4 transmissions in event order, locating the operator by its
/// transmitter index in each event's observers array. A round the operator
/// did not answer records a null submission but still advances
/// `last_round_observed`.
pub async fn walk_v4_rounds<R: RoundReader>(
    events: &[V4Transmission],
    reader: &R,
    transmitter_index: usize,
    no_of_transmitters: u32,
    prior_last_round: Option<u64>,
) -> Result<V4Walk, MonitorError> {
    let mut rounds = Vec::with_capacity(events.len());
    let mut last_round_observed = prior_last_round;

    for event in events {
        let data = reader.round_data(event.round_id).await?;

        let node_submission = event
            .observers
            .iter()
            .position(|&observer| observer as usize == transmitter_index)
            .and_then(|position| event.observations.get(position).cloned());
        if node_submission.is_none() {
            warn!(
                round_id = event.round_id,
                transmitter_index, "operator did not answer this round"
            );
        }
        last_round_observed = Some(event.round_id);

        rounds.push(HistoricalRound {
            round_id: event.round_id,
            round_answer: data.as_ref().map(|d| d.answer.clone()),
            round_timestamp: data.as_ref().map(|d| d.timestamp),
            answered_in_round: data.as_ref().map(|d| d.answered_in_round),
            node_submission,
            no_of_observations: Some(event.observations.len() as u32),
            no_of_transmitters: Some(no_of_transmitters),
        });
    }

    Ok(V4Walk {
        rounds,
        last_round_observed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapReader {
        rounds: HashMap<u64, RoundData>,
    }

    impl MapReader {
        fn new(entries: &[(u64, &str, u64)]) -> Self {
            let rounds = entries
                .iter()
                .map(|&(id, answer, ts)| {
                    (
                        id,
                        RoundData {
                            answer: answer.to_string(),
                            timestamp: ts,
                            answered_in_round: id,
                        },
                    )
                })
                .collect();
            Self { rounds }
        }
    }

    #[async_trait]
    impl RoundReader for MapReader {
        async fn round_data(&self, round_id: u64) -> Result<Option<RoundData>, MonitorError> {
            Ok(self.rounds.get(&round_id).cloned())
        }
    }

    fn v3_event(round_id: u64, block_number: u64) -> V3Submission {
        V3Submission {
            round_id,
            submission: format!("10{round_id}"),
            block_number,
        }
    }

    #[tokio::test]
    async fn v3_no_consensus_rolls_the_watermark_back() {
        // Head is 200; round 7 (block 160) has consensus, round 8 (block
        // 170) does not.
        let reader = MapReader::new(&[(7, "1007", 1600)]);
        let events = vec![v3_event(7, 160), v3_event(8, 170)];

        let walk = walk_v3_rounds(&events, &reader, 200, None).await.unwrap();

        assert_eq!(walk.rounds.len(), 2);
        assert_eq!(walk.rounds[0].round_answer.as_deref(), Some("1007"));
        assert_eq!(walk.rounds[1].round_id, 8);
        assert_eq!(walk.rounds[1].round_answer, None);
        assert_eq!(walk.rounds[1].round_timestamp, None);
        // Strictly below head: 170 - 1.
        assert_eq!(walk.window_end, 169);
        assert_eq!(walk.last_round_observed, Some(8));
    }

    #[tokio::test]
    async fn v3_rescan_fills_the_round_once_consensus_arrives() {
        // Next tick: head 210, the same event now has consensus.
        let reader = MapReader::new(&[(8, "1008", 1700)]);
        let events = vec![v3_event(8, 170)];

        let walk = walk_v3_rounds(&events, &reader, 210, Some(8)).await.unwrap();

        assert_eq!(walk.rounds.len(), 1);
        assert_eq!(walk.rounds[0].round_answer.as_deref(), Some("1008"));
        assert_eq!(walk.window_end, 210);
        assert_eq!(walk.last_round_observed, Some(8));
    }

    #[tokio::test]
    async fn v3_clean_walk_keeps_the_head() {
        let reader = MapReader::new(&[(7, "1007", 1600), (8, "1008", 1700)]);
        let events = vec![v3_event(7, 160), v3_event(8, 170)];

        let walk = walk_v3_rounds(&events, &reader, 200, Some(6)).await.unwrap();
        assert_eq!(walk.window_end, 200);
        assert_eq!(walk.last_round_observed, Some(8));
    }

    #[tokio::test]
    async fn v3_empty_window_preserves_prior_round() {
        let reader = MapReader::new(&[]);
        let walk = walk_v3_rounds(&[], &reader, 300, Some(5)).await.unwrap();
        assert!(walk.rounds.is_empty());
        assert_eq!(walk.window_end, 300);
        assert_eq!(walk.last_round_observed, Some(5));
    }

    #[tokio::test]
    async fn v4_absent_observer_still_advances_last_round() {
        let reader = MapReader::new(&[(12, "555", 1800)]);
        let events = vec![V4Transmission {
            round_id: 12,
            observations: vec!["551".into(), "553".into()],
            // Transmitter indices 0 and 2 answered; our operator is 1.
            observers: vec![0, 2],
            block_number: 500,
        }];

        let walk = walk_v4_rounds(&events, &reader, 1, 4, None).await.unwrap();

        assert_eq!(walk.rounds.len(), 1);
        assert_eq!(walk.rounds[0].node_submission, None);
        assert_eq!(walk.rounds[0].round_answer.as_deref(), Some("555"));
        assert_eq!(walk.rounds[0].no_of_observations, Some(2));
        assert_eq!(walk.rounds[0].no_of_transmitters, Some(4));
        assert_eq!(walk.last_round_observed, Some(12));
    }

    #[tokio::test]
    async fn v4_present_observer_reports_its_observation() {
        let reader = MapReader::new(&[(13, "600", 1900)]);
        let events = vec![V4Transmission {
            round_id: 13,
            observations: vec!["598".into(), "601".into(), "602".into()],
            observers: vec![3, 1, 0],
            block_number: 510,
        }];

        let walk = walk_v4_rounds(&events, &reader, 1, 4, Some(12)).await.unwrap();

        // Operator index 1 sits at position 1 of the observers array.
        assert_eq!(walk.rounds[0].node_submission.as_deref(), Some("601"));
        assert_eq!(walk.last_round_observed, Some(13));
    }
}
