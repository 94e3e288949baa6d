//! Watermark storage for the contract observer.
//!
//! Watermarks live in an arena indexed by `(operator id, proxy address)`
//! where operator ids are small interned integers. Slots are addressed by
//! index, never by pointer identity, so a full reset is one `clear`.

use std::collections::HashMap;

use alloy::primitives::Address;

/// Scan progress for one `(operator, proxy)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark {
    /// Highest block already scanned.
    pub last_block: u64,
    /// Highest round id for which a submission by this operator was seen.
    pub last_round: Option<u64>,
}

#[derive(Debug, Default)]
pub struct WatermarkArena {
    operators: Vec<String>,
    operator_ids: HashMap<String, usize>,
    slots: Vec<Watermark>,
    index: HashMap<(usize, Address), usize>,
}

impl WatermarkArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern an operator, returning its stable small id.
    pub fn operator_id(&mut self, operator: &str) -> usize {
        if let Some(&id) = self.operator_ids.get(operator) {
            return id;
        }
        let id = self.operators.len();
        self.operators.push(operator.to_string());
        self.operator_ids.insert(operator.to_string(), id);
        id
    }

    pub fn watermark(&self, operator_id: usize, proxy: Address) -> Option<Watermark> {
        self.index
            .get(&(operator_id, proxy))
            .map(|&slot| self.slots[slot])
    }

    pub fn update(
        &mut self,
        operator_id: usize,
        proxy: Address,
        last_block: u64,
        last_round: Option<u64>,
    ) {
        let watermark = Watermark {
            last_block,
            last_round,
        };
        match self.index.get(&(operator_id, proxy)) {
            Some(&slot) => self.slots[slot] = watermark,
            None => {
                let slot = self.slots.len();
                self.slots.push(watermark);
                self.index.insert((operator_id, proxy), slot);
            }
        }
    }

    /// Drop every watermark (operators stay interned).
    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn interning_is_stable() {
        let mut arena = WatermarkArena::new();
        let a = arena.operator_id("node_a");
        let b = arena.operator_id("node_b");
        assert_ne!(a, b);
        assert_eq!(arena.operator_id("node_a"), a);
    }

    #[test]
    fn update_then_read_back() {
        let mut arena = WatermarkArena::new();
        let op = arena.operator_id("node_a");
        assert_eq!(arena.watermark(op, addr(1)), None);

        arena.update(op, addr(1), 150, Some(7));
        assert_eq!(
            arena.watermark(op, addr(1)),
            Some(Watermark {
                last_block: 150,
                last_round: Some(7)
            })
        );

        // Same proxy under another operator is a distinct slot.
        let other = arena.operator_id("node_b");
        assert_eq!(arena.watermark(other, addr(1)), None);

        arena.update(op, addr(1), 169, Some(8));
        assert_eq!(arena.watermark(op, addr(1)).unwrap().last_block, 169);
    }

    #[test]
    fn clear_evicts_everything() {
        let mut arena = WatermarkArena::new();
        let op = arena.operator_id("node_a");
        arena.update(op, addr(1), 10, None);
        arena.clear();
        assert_eq!(arena.watermark(op, addr(1)), None);
        // The operator id survives the reset.
        assert_eq!(arena.operator_id("node_a"), op);
    }
}
