//! Topic-exchange routing key matching.
//!
//! Binding patterns are dot-separated words where `*` matches exactly one
//! word and `#` matches zero or more words, the conventional topic-exchange
//! semantics.

/// Whether `routing_key` matches the binding `pattern`.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches_words(&pattern, &key)
}

fn matches_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => {
            // `#` absorbs zero or more words; try every split point.
            (0..=key.len()).any(|i| matches_words(rest, &key[i..]))
        }
        Some((&"*", rest)) => match key.split_first() {
            Some((_, key_rest)) => matches_words(rest, key_rest),
            None => false,
        },
        Some((word, rest)) => match key.split_first() {
            Some((k, key_rest)) if k == word => matches_words(rest, key_rest),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::topic_matches;

    #[test]
    fn exact_match() {
        assert!(topic_matches("ping", "ping"));
        assert!(topic_matches("monitor.system.chain_1", "monitor.system.chain_1"));
        assert!(!topic_matches("monitor.system.chain_1", "monitor.system.chain_2"));
    }

    #[test]
    fn star_matches_exactly_one_word() {
        assert!(topic_matches("monitor.*.chain_1", "monitor.system.chain_1"));
        assert!(!topic_matches("monitor.*", "monitor.system.chain_1"));
        assert!(!topic_matches("monitor.*.chain_1", "monitor.chain_1"));
    }

    #[test]
    fn hash_matches_zero_or_more_words() {
        assert!(topic_matches("#", "anything.at.all"));
        assert!(topic_matches("#", ""));
        assert!(topic_matches("alerter.#", "alerter.system.chain_1"));
        assert!(topic_matches("alerter.#", "alerter"));
        assert!(topic_matches("#.chain_1", "monitor.system.chain_1"));
        assert!(!topic_matches("alerter.#", "monitor.system.chain_1"));
    }

    #[test]
    fn hash_in_the_middle() {
        assert!(topic_matches("chains.#.alerts_config", "chains.chainlink.bsc.alerts_config"));
        assert!(topic_matches("chains.#.alerts_config", "chains.alerts_config"));
        assert!(!topic_matches("chains.#.alerts_config", "chains.chainlink.nodes_config"));
    }

    #[test]
    fn mixed_wildcards() {
        assert!(topic_matches("transformer.*.#", "transformer.system.chain_1"));
        assert!(topic_matches("transformer.*.#", "transformer.system"));
        assert!(!topic_matches("transformer.*.#", "transformer"));
    }
}
