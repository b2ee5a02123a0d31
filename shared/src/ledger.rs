//! In-memory stock book implementing the inventory ledger contract
//!
//! Quantities are never negative. Transfers and recalls move stock between
//! locations and leave the per-key total unchanged; only `credit` from outside
//! the network (replenishment) changes it.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Shortfall, WorkflowError, WorkflowResult};
use crate::models::{InventoryRecord, StockMovement};
use crate::types::{StockKey, StockLocation};

/// Reject non-positive mutation quantities
pub fn ensure_positive_quantity(quantity: i64) -> WorkflowResult<()> {
    if quantity <= 0 {
        return Err(WorkflowError::validation(
            "quantity",
            "Quantity must be positive",
        ));
    }
    Ok(())
}

/// `current + quantity`; a sum past `i64::MAX` is a validation error
pub fn add_quantity(current: i64, quantity: i64) -> WorkflowResult<i64> {
    current.checked_add(quantity).ok_or_else(|| {
        WorkflowError::validation("quantity", "Quantity exceeds the largest stock level")
    })
}

/// Sum quantities per key, in lock order
pub fn aggregate_demand(
    items: impl IntoIterator<Item = (StockKey, i64)>,
) -> WorkflowResult<BTreeMap<StockKey, i64>> {
    let mut demand = BTreeMap::new();
    for (key, quantity) in items {
        let entry = demand.entry(key).or_insert(0);
        *entry = add_quantity(*entry, quantity)?;
    }
    Ok(demand)
}

/// Every key whose demand exceeds what is available
pub fn shortfalls(demand: &BTreeMap<StockKey, i64>, available: &HashMap<StockKey, i64>) -> Vec<Shortfall> {
    demand
        .iter()
        .filter_map(|(key, requested)| {
            let on_hand = available.get(key).copied().unwrap_or(0);
            (on_hand < *requested)
                .then(|| Shortfall::new(key.variant_id, key.color.clone(), *requested, on_hand))
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockBook {
    quantities: BTreeMap<(StockLocation, StockKey), i64>,
}

impl StockBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quantity(&self, location: &StockLocation, key: &StockKey) -> i64 {
        self.quantities
            .get(&(*location, key.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Decrement only if enough stock is present; untouched on failure
    pub fn reserve(&mut self, location: &StockLocation, key: &StockKey, quantity: i64) -> WorkflowResult<i64> {
        ensure_positive_quantity(quantity)?;
        let available = self.quantity(location, key);
        if available < quantity {
            return Err(WorkflowError::InsufficientStock(vec![Shortfall::new(
                key.variant_id,
                key.color.clone(),
                quantity,
                available,
            )]));
        }
        let remaining = available - quantity;
        self.quantities.insert((*location, key.clone()), remaining);
        Ok(remaining)
    }

    /// Increment, creating the record when absent
    pub fn credit(&mut self, location: &StockLocation, key: &StockKey, quantity: i64) -> WorkflowResult<i64> {
        ensure_positive_quantity(quantity)?;
        let total = add_quantity(self.quantity(location, key), quantity)?;
        self.quantities.insert((*location, key.clone()), total);
        Ok(total)
    }

    pub fn transfer(&mut self, movement: &StockMovement) -> WorkflowResult<()> {
        self.apply_all(std::slice::from_ref(movement))
    }

    /// Apply every movement or none of them.
    ///
    /// Demand is summed per source record first so that several movements
    /// drawing on one record are checked together. Every uncovered record is
    /// reported.
    pub fn apply_all(&mut self, movements: &[StockMovement]) -> WorkflowResult<()> {
        let mut demand: BTreeMap<(StockLocation, StockKey), i64> = BTreeMap::new();
        for movement in movements {
            ensure_positive_quantity(movement.quantity)?;
            let entry = demand.entry((movement.from, movement.key.clone())).or_insert(0);
            *entry = add_quantity(*entry, movement.quantity)?;
        }

        let shortfalls: Vec<Shortfall> = demand
            .iter()
            .filter_map(|((location, key), requested)| {
                let available = self.quantity(location, key);
                (available < *requested).then(|| {
                    Shortfall::new(key.variant_id, key.color.clone(), *requested, available)
                })
            })
            .collect();
        if !shortfalls.is_empty() {
            return Err(WorkflowError::InsufficientStock(shortfalls));
        }

        // Destination credits can still overflow, so work on a copy
        let mut next = self.clone();
        for movement in movements {
            next.reserve(&movement.from, &movement.key, movement.quantity)?;
            next.credit(&movement.to, &movement.key, movement.quantity)?;
        }
        *self = next;
        Ok(())
    }

    /// Quantities at one location for the given keys
    pub fn snapshot<'a>(
        &self,
        location: &StockLocation,
        keys: impl IntoIterator<Item = &'a StockKey>,
    ) -> HashMap<StockKey, i64> {
        keys.into_iter()
            .map(|key| (key.clone(), self.quantity(location, key)))
            .collect()
    }

    /// Sum over every location, saturating at `i64::MAX`
    pub fn network_total(&self, key: &StockKey) -> i64 {
        self.quantities
            .iter()
            .filter(|((_, k), _)| k == key)
            .fold(0i64, |total, (_, q)| total.saturating_add(*q))
    }

    pub fn records(&self, location: Option<&StockLocation>) -> Vec<InventoryRecord> {
        self.quantities
            .iter()
            .filter(|((loc, _), _)| location.map_or(true, |wanted| loc == wanted))
            .map(|((loc, key), quantity)| InventoryRecord::new(*loc, key.clone(), *quantity))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn key(color: &str) -> StockKey {
        StockKey::new(Uuid::from_u128(5), color).unwrap()
    }

    fn to_dealer(dealer: uuid::Uuid, key: StockKey, quantity: i64) -> StockMovement {
        StockMovement {
            from: StockLocation::Manufacturer,
            to: StockLocation::dealer(dealer),
            key,
            quantity,
        }
    }

    #[test]
    fn reserve_fails_without_side_effects() {
        let mut book = StockBook::new();
        book.credit(&StockLocation::Manufacturer, &key("Red"), 2).unwrap();

        let err = book.reserve(&StockLocation::Manufacturer, &key("Red"), 3).unwrap_err();
        match err {
            WorkflowError::InsufficientStock(shortfalls) => {
                assert_eq!(shortfalls.len(), 1);
                assert_eq!(shortfalls[0].shortfall, 1);
                assert_eq!(shortfalls[0].available, 2);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(book.quantity(&StockLocation::Manufacturer, &key("Red")), 2);
    }

    #[test]
    fn credit_creates_missing_records() {
        let mut book = StockBook::new();
        let dealer = StockLocation::dealer(Uuid::new_v4());
        assert_eq!(book.credit(&dealer, &key("Blue"), 4).unwrap(), 4);
        assert_eq!(book.credit(&dealer, &key("Blue"), 1).unwrap(), 5);
    }

    #[test]
    fn mutations_need_positive_quantities() {
        let mut book = StockBook::new();
        assert!(book.credit(&StockLocation::Manufacturer, &key("Red"), 0).is_err());
        assert!(book.reserve(&StockLocation::Manufacturer, &key("Red"), -1).is_err());
    }

    #[test]
    fn transfer_is_all_or_nothing() {
        let mut book = StockBook::new();
        let dealer = Uuid::new_v4();
        book.credit(&StockLocation::Manufacturer, &key("Red"), 3).unwrap();
        book.credit(&StockLocation::Manufacturer, &key("Blue"), 1).unwrap();

        let before = book.clone();
        let err = book
            .apply_all(&[to_dealer(dealer, key("Red"), 3), to_dealer(dealer, key("Blue"), 2)])
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InsufficientStock(ref s) if s.len() == 1));
        assert_eq!(book, before);
    }

    #[test]
    fn recall_recreates_manufacturer_stock() {
        let mut book = StockBook::new();
        let dealer = Uuid::new_v4();
        book.credit(&StockLocation::dealer(dealer), &key("Red"), 2).unwrap();

        book.transfer(&to_dealer(dealer, key("Red"), 2).reversed()).unwrap();
        assert_eq!(book.quantity(&StockLocation::Manufacturer, &key("Red")), 2);
        assert_eq!(book.quantity(&StockLocation::dealer(dealer), &key("Red")), 0);
    }

    #[test]
    fn demand_is_summed_per_source() {
        let mut book = StockBook::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        book.credit(&StockLocation::Manufacturer, &key("Red"), 3).unwrap();

        assert!(book
            .apply_all(&[to_dealer(a, key("Red"), 2), to_dealer(b, key("Red"), 2)])
            .is_err());
        assert_eq!(book.quantity(&StockLocation::Manufacturer, &key("Red")), 3);
    }

    #[test]
    fn shortfalls_use_aggregated_demand() {
        let demand = aggregate_demand([(key("Red"), 1), (key("Red"), 1), (key("Blue"), 1)]).unwrap();
        assert_eq!(demand[&key("Red")], 2);

        let available: HashMap<StockKey, i64> = [(key("Red"), 1), (key("Blue"), 1)].into_iter().collect();
        let missing = shortfalls(&demand, &available);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].color, "Red");
        assert_eq!(missing[0].shortfall, 1);
    }

    #[test]
    fn credit_refuses_to_overflow() {
        let mut book = StockBook::new();
        book.credit(&StockLocation::Manufacturer, &key("Red"), i64::MAX).unwrap();

        match book.credit(&StockLocation::Manufacturer, &key("Red"), 2) {
            Err(WorkflowError::Validation { field, .. }) => assert_eq!(field, "quantity"),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(book.quantity(&StockLocation::Manufacturer, &key("Red")), i64::MAX);
    }

    #[test]
    fn overflowing_destination_leaves_the_book_untouched() {
        let mut book = StockBook::new();
        let dealer = Uuid::new_v4();
        book.credit(&StockLocation::Manufacturer, &key("Red"), 5).unwrap();
        book.credit(&StockLocation::dealer(dealer), &key("Red"), i64::MAX - 1).unwrap();

        let before = book.clone();
        assert!(matches!(
            book.apply_all(&[to_dealer(dealer, key("Red"), 1), to_dealer(dealer, key("Red"), 1)]),
            Err(WorkflowError::Validation { .. })
        ));
        assert_eq!(book, before);
    }

    #[test]
    fn demand_overflow_is_reported() {
        assert!(aggregate_demand([(key("Red"), i64::MAX), (key("Red"), 1)]).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Transfers and recalls never change the network total and never go negative
        #[test]
        fn conservation_under_transfer_and_recall(
            initial in 0i64..50,
            ops in proptest::collection::vec((any::<bool>(), 0usize..3, 1i64..10), 0..40),
        ) {
            let dealers = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
            let k = key("Red");
            let mut book = StockBook::new();
            if initial > 0 {
                book.credit(&StockLocation::Manufacturer, &k, initial).unwrap();
            }

            for (outbound, dealer_idx, qty) in ops {
                let movement = to_dealer(dealers[dealer_idx], k.clone(), qty);
                let movement = if outbound { movement } else { movement.reversed() };
                let before = book.clone();
                if book.transfer(&movement).is_err() {
                    prop_assert_eq!(&book, &before);
                }
                prop_assert_eq!(book.network_total(&k), initial);
                for record in book.records(None) {
                    prop_assert!(record.quantity >= 0);
                }
            }
        }
    }
}
