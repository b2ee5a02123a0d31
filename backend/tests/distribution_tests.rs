//! Distribution request workflow tests
//!
//! Tests for the request lifecycle including:
//! - Allocation moves every line or none
//! - Recall reverses an allocation until receipt is confirmed
//! - Concurrent allocations transfer stock exactly once
//! - Only the enumerated transitions succeed from any reachable state

mod common;

use common::{next_week, Harness};
use ev_distribution_backend::error::AppError;
use ev_distribution_backend::services::distribution::{CreateRequestInput, RequestLineInput};
use proptest::prelude::*;
use shared::{Priority, RequestAction, RequestStatus, StockKey, StockLocation};
use uuid::Uuid;

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[tokio::test]
    async fn allocation_moves_the_full_quantity_to_the_dealer() {
        let h = Harness::new();
        let (dealer, staff) = h.dealer().await;
        let variant = h.variant("1200000000").await;
        h.replenish(variant.id, "Red", 3).await;

        let request = h.approved_request(&staff, &[(variant.id, "Red", 3)]).await;
        let shipped = h
            .distribution()
            .allocate(&h.manufacturer, request.id)
            .await
            .unwrap();

        assert_eq!(shipped.status, RequestStatus::Shipped);
        assert_eq!(h.stock(StockLocation::Manufacturer, variant.id, "Red").await, 0);
        assert_eq!(h.stock(StockLocation::dealer(dealer.id), variant.id, "Red").await, 3);
    }

    #[tokio::test]
    async fn short_stock_fails_allocation_without_moving_anything() {
        let h = Harness::new();
        let (dealer, staff) = h.dealer().await;
        let variant = h.variant("1200000000").await;
        h.replenish(variant.id, "Red", 2).await;

        let request = h.approved_request(&staff, &[(variant.id, "Red", 3)]).await;
        let result = h.distribution().allocate(&h.manufacturer, request.id).await;

        match result {
            Err(AppError::InsufficientStock(shortfalls)) => {
                assert_eq!(shortfalls.len(), 1);
                assert_eq!(shortfalls[0].variant_id, variant.id);
                assert_eq!(shortfalls[0].requested, 3);
                assert_eq!(shortfalls[0].available, 2);
                assert_eq!(shortfalls[0].shortfall, 1);
            }
            other => panic!("expected InsufficientStock, got {:?}", other),
        }

        let current = h
            .distribution()
            .get_request(&h.manufacturer, request.id)
            .await
            .unwrap();
        assert_eq!(current.status, RequestStatus::Approved);
        assert_eq!(h.stock(StockLocation::Manufacturer, variant.id, "Red").await, 2);
        assert_eq!(h.stock(StockLocation::dealer(dealer.id), variant.id, "Red").await, 0);
    }

    #[tokio::test]
    async fn one_short_line_blocks_every_line() {
        let h = Harness::new();
        let (dealer, staff) = h.dealer().await;
        let variant = h.variant("950000000").await;
        h.replenish(variant.id, "White", 10).await;
        h.replenish(variant.id, "Blue", 1).await;

        let request = h
            .approved_request(&staff, &[(variant.id, "White", 4), (variant.id, "Blue", 2)])
            .await;
        let err = h
            .distribution()
            .allocate(&h.manufacturer, request.id)
            .await
            .unwrap_err();

        match err {
            AppError::InsufficientStock(shortfalls) => {
                assert_eq!(shortfalls.len(), 1);
                assert_eq!(shortfalls[0].color, "Blue");
            }
            other => panic!("expected InsufficientStock, got {:?}", other),
        }
        assert_eq!(h.stock(StockLocation::Manufacturer, variant.id, "White").await, 10);
        assert_eq!(h.stock(StockLocation::Manufacturer, variant.id, "Blue").await, 1);
        assert_eq!(h.stock(StockLocation::dealer(dealer.id), variant.id, "White").await, 0);

        // Topping up the short line lets the same request through
        h.replenish(variant.id, "Blue", 1).await;
        let shipped = h
            .distribution()
            .allocate(&h.manufacturer, request.id)
            .await
            .unwrap();
        assert_eq!(shipped.status, RequestStatus::Shipped);
        assert_eq!(h.stock(StockLocation::dealer(dealer.id), variant.id, "Blue").await, 2);
    }

    #[tokio::test]
    async fn recall_is_rejected_once_receipt_is_confirmed() {
        let h = Harness::new();
        let (_dealer, staff) = h.dealer().await;
        let variant = h.variant("800000000").await;
        h.replenish(variant.id, "Red", 3).await;

        let request = h.approved_request(&staff, &[(variant.id, "Red", 3)]).await;
        let service = h.distribution();
        service.allocate(&h.manufacturer, request.id).await.unwrap();
        let delivered = service.confirm_receipt(&staff, request.id).await.unwrap();
        assert_eq!(delivered.status, RequestStatus::Delivered);

        let result = service.recall(&h.manufacturer, request.id).await;
        assert!(matches!(result, Err(AppError::InvalidStateTransition(_))));
    }

    #[tokio::test]
    async fn recall_of_a_shipped_request_restores_stock_and_approval() {
        let h = Harness::new();
        let (dealer, staff) = h.dealer().await;
        let variant = h.variant("800000000").await;
        h.replenish(variant.id, "Red", 5).await;

        let request = h.approved_request(&staff, &[(variant.id, "Red", 3)]).await;
        let service = h.distribution();
        service.allocate(&h.manufacturer, request.id).await.unwrap();

        let recalled = service.recall(&h.manufacturer, request.id).await.unwrap();

        assert_eq!(recalled.status, RequestStatus::Approved);
        assert_eq!(h.stock(StockLocation::Manufacturer, variant.id, "Red").await, 5);
        assert_eq!(h.stock(StockLocation::dealer(dealer.id), variant.id, "Red").await, 0);

        // A recalled request can be allocated again
        let again = service.allocate(&h.manufacturer, request.id).await.unwrap();
        assert_eq!(again.status, RequestStatus::Shipped);
    }

    #[tokio::test]
    async fn recall_fails_when_the_dealer_no_longer_holds_the_stock() {
        let h = Harness::new();
        let (dealer, staff) = h.dealer().await;
        let variant = h.variant("800000000").await;
        h.replenish(variant.id, "Red", 3).await;

        let request = h.approved_request(&staff, &[(variant.id, "Red", 3)]).await;
        let service = h.distribution();
        service.allocate(&h.manufacturer, request.id).await.unwrap();

        // One unit sold off the dealer floor
        h.store
            .reserve(
                StockLocation::dealer(dealer.id),
                &StockKey::new(variant.id, "Red").unwrap(),
                1,
            )
            .await
            .unwrap();

        let result = service.recall(&h.manufacturer, request.id).await;
        assert!(matches!(result, Err(AppError::InsufficientStock(_))));

        let current = service.get_request(&staff, request.id).await.unwrap();
        assert_eq!(current.status, RequestStatus::Shipped);
        assert_eq!(h.stock(StockLocation::Manufacturer, variant.id, "Red").await, 0);
        assert_eq!(h.stock(StockLocation::dealer(dealer.id), variant.id, "Red").await, 2);
    }

    #[tokio::test]
    async fn approving_twice_is_an_invalid_transition() {
        let h = Harness::new();
        let (_dealer, staff) = h.dealer().await;
        let variant = h.variant("800000000").await;

        let request = h.approved_request(&staff, &[(variant.id, "Red", 1)]).await;
        let result = h.distribution().approve(&h.manufacturer, request.id).await;

        assert!(matches!(result, Err(AppError::InvalidStateTransition(_))));
    }

    #[tokio::test]
    async fn lines_are_priced_from_the_current_variant_price() {
        let h = Harness::new();
        let (dealer, staff) = h.dealer().await;
        let variant = h.variant("1000").await;
        let other = h.variant("250.50").await;

        let request = h
            .request(&staff, &[(variant.id, " Red ", 2), (other.id, "Black", 4)])
            .await;

        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.dealer_id, dealer.id);
        assert_eq!(request.lines[0].color, "Red");
        assert_eq!(request.lines[0].line_total, common::dec("2000"));
        assert_eq!(request.lines[1].line_total, common::dec("1002.00"));
        assert_eq!(request.total_amount, common::dec("3002.00"));

        // A later price revision leaves the raised request alone
        h.catalog()
            .update_variant_price(&h.manufacturer, variant.id, common::dec("1500"))
            .await
            .unwrap();
        let stored = h.distribution().get_request(&staff, request.id).await.unwrap();
        assert_eq!(stored.total_amount, common::dec("3002.00"));
    }

    #[tokio::test]
    async fn malformed_requests_are_rejected() {
        let h = Harness::new();
        let (_dealer, staff) = h.dealer().await;
        let variant = h.variant("1000").await;
        let service = h.distribution();

        let input = |lines: Vec<(Uuid, &str, i64)>| CreateRequestInput {
            required_date: next_week(),
            priority: Priority::High,
            lines: lines
                .into_iter()
                .map(|(variant_id, color, quantity)| RequestLineInput {
                    variant_id,
                    color: color.to_string(),
                    quantity,
                })
                .collect(),
            note: None,
        };

        let cases = vec![
            ("lines", input(vec![])),
            ("quantity", input(vec![(variant.id, "Red", 0)])),
            ("quantity", input(vec![(variant.id, "Red", -2)])),
            ("color", input(vec![(variant.id, "  ", 1)])),
            ("variant_id", input(vec![(Uuid::new_v4(), "Red", 1)])),
            ("lines", input(vec![(variant.id, "Red", 1), (variant.id, "Red", 2)])),
        ];

        for (expected_field, case) in cases {
            match service.create_request(&staff, case).await {
                Err(AppError::Validation { field, .. }) => assert_eq!(field, expected_field),
                other => panic!("expected a validation error on {}, got {:?}", expected_field, other),
            }
        }

        let mut past = input(vec![(variant.id, "Red", 1)]);
        past.required_date = chrono::NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        assert!(matches!(
            service.create_request(&staff, past).await,
            Err(AppError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn each_side_may_only_perform_its_own_transitions() {
        let h = Harness::new();
        let (_dealer, staff) = h.dealer().await;
        let (_other_dealer, outsider) = h.dealer().await;
        let variant = h.variant("1000").await;
        h.replenish(variant.id, "Red", 1).await;
        let service = h.distribution();

        assert!(matches!(
            service
                .create_request(
                    &h.manufacturer,
                    CreateRequestInput {
                        required_date: next_week(),
                        priority: Priority::Low,
                        lines: vec![RequestLineInput {
                            variant_id: variant.id,
                            color: "Red".to_string(),
                            quantity: 1,
                        }],
                        note: None,
                    },
                )
                .await,
            Err(AppError::Forbidden(_))
        ));

        let request = h.request(&staff, &[(variant.id, "Red", 1)]).await;
        assert!(matches!(
            service.approve(&staff, request.id).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            service.cancel(&outsider, request.id).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            service.get_request(&outsider, request.id).await,
            Err(AppError::Forbidden(_))
        ));

        service.approve(&h.manufacturer, request.id).await.unwrap();
        service.allocate(&h.manufacturer, request.id).await.unwrap();
        assert!(matches!(
            service.confirm_receipt(&h.manufacturer, request.id).await,
            Err(AppError::Forbidden(_))
        ));
        service.confirm_receipt(&staff, request.id).await.unwrap();
    }

    #[tokio::test]
    async fn history_records_every_committed_transition() {
        let h = Harness::new();
        let (_dealer, staff) = h.dealer().await;
        let variant = h.variant("1000").await;
        h.replenish(variant.id, "Red", 2).await;
        let service = h.distribution();

        let request = h.request(&staff, &[(variant.id, "Red", 2)]).await;
        service.approve(&h.manufacturer, request.id).await.unwrap();
        service.allocate(&h.manufacturer, request.id).await.unwrap();
        service.recall(&h.manufacturer, request.id).await.unwrap();
        service.allocate(&h.manufacturer, request.id).await.unwrap();
        service.confirm_receipt(&staff, request.id).await.unwrap();
        // Failed transitions leave no trace
        let _ = service.cancel(&staff, request.id).await;

        let history = service.request_history(&staff, request.id).await.unwrap();
        let actions: Vec<&str> = history.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(
            actions,
            vec!["create", "approve", "allocate", "recall", "allocate", "confirm_receipt"]
        );
        assert_eq!(history[0].from_status, None);
        assert_eq!(history[0].to_status, RequestStatus::Pending);
        assert_eq!(history[3].from_status, Some(RequestStatus::Shipped));
        assert_eq!(history[3].to_status, RequestStatus::Approved);
        assert_eq!(history[5].actor_id, staff.user_id);
    }

    #[tokio::test]
    async fn dealer_listings_are_scoped_to_the_dealer() {
        let h = Harness::new();
        let (dealer, staff) = h.dealer().await;
        let (_other, other_staff) = h.dealer().await;
        let variant = h.variant("1000").await;

        h.request(&staff, &[(variant.id, "Red", 1)]).await;
        h.approved_request(&staff, &[(variant.id, "Blue", 1)]).await;
        h.request(&other_staff, &[(variant.id, "Red", 1)]).await;

        let service = h.distribution();
        let own = service.list_requests(&staff, None, None).await.unwrap();
        assert_eq!(own.len(), 2);
        assert!(own.iter().all(|r| r.dealer_id == dealer.id));

        let approved = service
            .list_requests(&h.manufacturer, None, Some(RequestStatus::Approved))
            .await
            .unwrap();
        assert_eq!(approved.len(), 1);

        assert_eq!(service.list_requests(&h.manufacturer, None, None).await.unwrap().len(), 3);
        assert!(matches!(
            service.list_requests(&other_staff, Some(dealer.id), None).await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_allocations_ship_exactly_once() {
        let h = Harness::new();
        let (dealer, staff) = h.dealer().await;
        let variant = h.variant("1000").await;
        h.replenish(variant.id, "Red", 10).await;
        let request = h.approved_request(&staff, &[(variant.id, "Red", 3)]).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = h.distribution();
            let actor = h.manufacturer;
            let id = request.id;
            handles.push(tokio::spawn(async move { service.allocate(&actor, id).await }));
        }

        let mut shipped = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => shipped += 1,
                Err(AppError::InvalidStateTransition(_)) => {}
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }

        assert_eq!(shipped, 1);
        assert_eq!(h.stock(StockLocation::Manufacturer, variant.id, "Red").await, 7);
        assert_eq!(h.stock(StockLocation::dealer(dealer.id), variant.id, "Red").await, 3);

        let history = h.distribution().request_history(&staff, request.id).await.unwrap();
        assert_eq!(history.iter().filter(|e| e.action == "allocate").count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn competing_requests_never_overdraw_manufacturer_stock() {
        let h = Harness::new();
        let (_dealer, staff) = h.dealer().await;
        let (_other, other_staff) = h.dealer().await;
        let variant = h.variant("1000").await;
        h.replenish(variant.id, "Red", 4).await;

        let first = h.approved_request(&staff, &[(variant.id, "Red", 3)]).await;
        let second = h.approved_request(&other_staff, &[(variant.id, "Red", 3)]).await;

        let a = {
            let service = h.distribution();
            let actor = h.manufacturer;
            tokio::spawn(async move { service.allocate(&actor, first.id).await })
        };
        let b = {
            let service = h.distribution();
            let actor = h.manufacturer;
            tokio::spawn(async move { service.allocate(&actor, second.id).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(AppError::InsufficientStock(_))))
                .count(),
            1
        );
        assert_eq!(h.stock(StockLocation::Manufacturer, variant.id, "Red").await, 1);
    }

    #[tokio::test]
    async fn oversized_request_lines_are_validation_errors() {
        let h = Harness::new();
        let (_dealer, staff) = h.dealer().await;
        let variant = h.variant("100000000000").await;

        for quantity in [i64::MAX, 10_001] {
            let result = h
                .distribution()
                .create_request(
                    &staff,
                    CreateRequestInput {
                        required_date: next_week(),
                        priority: Priority::Normal,
                        lines: vec![RequestLineInput {
                            variant_id: variant.id,
                            color: "Red".to_string(),
                            quantity,
                        }],
                        note: None,
                    },
                )
                .await;

            match result {
                Err(AppError::Validation { field, .. }) => assert_eq!(field, "quantity"),
                other => panic!("expected a validation error for {}, got {:?}", quantity, other),
            }
        }
        assert!(h
            .distribution()
            .list_requests(&staff, None, None)
            .await
            .unwrap()
            .is_empty());
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    fn action_strategy() -> impl Strategy<Value = RequestAction> {
        prop::sample::select(RequestAction::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        /// From any reachable state only the enumerated transitions succeed,
        /// and failed attempts change nothing.
        #[test]
        fn lifecycle_follows_the_transition_table(
            actions in prop::collection::vec(action_strategy(), 1..12),
        ) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let h = Harness::new();
                let (dealer, staff) = h.dealer().await;
                let variant = h.variant("1000").await;
                h.replenish(variant.id, "Red", 100).await;
                let service = h.distribution();

                let request = h.request(&staff, &[(variant.id, "Red", 2)]).await;
                let mut expected = RequestStatus::Pending;

                for action in actions {
                    let actor = match action.performed_by() {
                        shared::Party::Manufacturer => h.manufacturer,
                        shared::Party::OwningDealer => staff,
                    };
                    let result = match action {
                        RequestAction::Approve => service.approve(&actor, request.id).await,
                        RequestAction::Reject => service.reject(&actor, request.id).await,
                        RequestAction::Allocate => service.allocate(&actor, request.id).await,
                        RequestAction::ConfirmReceipt => service.confirm_receipt(&actor, request.id).await,
                        RequestAction::Recall => service.recall(&actor, request.id).await,
                        RequestAction::Cancel => service.cancel(&actor, request.id).await,
                    };

                    match expected.apply(action) {
                        Ok(next) => {
                            let updated = result.unwrap();
                            assert_eq!(updated.status, next);
                            expected = next;
                        }
                        Err(_) => {
                            assert!(matches!(result, Err(AppError::InvalidStateTransition(_))));
                        }
                    }

                    let manufacturer = h.stock(StockLocation::Manufacturer, variant.id, "Red").await;
                    let at_dealer = h.stock(StockLocation::dealer(dealer.id), variant.id, "Red").await;
                    assert_eq!(manufacturer + at_dealer, 100);
                    let shipped = matches!(expected, RequestStatus::Shipped | RequestStatus::Delivered);
                    assert_eq!(at_dealer, if shipped { 2 } else { 0 });
                }

                let stored = service.get_request(&staff, request.id).await.unwrap();
                assert_eq!(stored.status, expected);
            });
        }
    }
}
