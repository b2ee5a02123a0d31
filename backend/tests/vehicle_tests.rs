//! Vehicle tracking and catalog tests
//!
//! Tests for per-VIN tracking including:
//! - VIN registration and uniqueness
//! - Dealer assignment and test drives
//! - Separation between vehicle statuses and aggregate stock

mod common;

use common::{dec, unique_vin, Harness};
use ev_distribution_backend::error::AppError;
use ev_distribution_backend::services::catalog::{CreateDealerInput, CreateVariantInput};
use ev_distribution_backend::services::vehicles::RegisterVehicleInput;
use proptest::prelude::*;
use shared::{StockLocation, VehicleStatus};
use uuid::Uuid;

fn register(vin: &str, variant_id: Uuid, color: &str) -> RegisterVehicleInput {
    RegisterVehicleInput {
        vin: vin.to_string(),
        variant_id,
        color: color.to_string(),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[tokio::test]
    async fn registration_normalizes_the_vin_and_starts_in_manufacturer_stock() {
        let h = Harness::new();
        let variant = h.variant("1000").await;

        let vehicle = h
            .vehicles()
            .register_vehicle(&h.manufacturer, register(" 5yj3e1ea7kf317000 ", variant.id, "White"))
            .await
            .unwrap();

        assert_eq!(vehicle.vin, "5YJ3E1EA7KF317000");
        assert_eq!(vehicle.status, VehicleStatus::InManufacturerStock);
        assert_eq!(vehicle.dealer_id, None);
    }

    #[tokio::test]
    async fn a_vin_is_registered_once() {
        let h = Harness::new();
        let variant = h.variant("1000").await;
        let vehicles = h.vehicles();
        let vin = unique_vin();

        vehicles
            .register_vehicle(&h.manufacturer, register(&vin, variant.id, "White"))
            .await
            .unwrap();
        let again = vehicles
            .register_vehicle(&h.manufacturer, register(&vin.to_lowercase(), variant.id, "Black"))
            .await;
        assert!(matches!(again, Err(AppError::Conflict { ref resource, .. }) if resource == "vin"));
    }

    #[tokio::test]
    async fn malformed_vins_and_unknown_variants_are_rejected() {
        let h = Harness::new();
        let variant = h.variant("1000").await;
        let vehicles = h.vehicles();

        for vin in ["5YJ3E1EA7KF31700", "5YJ3E1EA7KF3170OO", "5YJ3E1EA7KF31700!"] {
            let result = vehicles
                .register_vehicle(&h.manufacturer, register(vin, variant.id, "White"))
                .await;
            assert!(matches!(result, Err(AppError::Validation { ref field, .. }) if field == "vin"));
        }

        let unknown = vehicles
            .register_vehicle(&h.manufacturer, register(&unique_vin(), Uuid::new_v4(), "White"))
            .await;
        assert!(matches!(unknown, Err(AppError::Validation { ref field, .. }) if field == "variant_id"));
    }

    #[tokio::test]
    async fn only_manufacturer_staff_register_and_assign() {
        let h = Harness::new();
        let (dealer, staff) = h.dealer().await;
        let variant = h.variant("1000").await;
        let vehicles = h.vehicles();

        assert!(matches!(
            vehicles
                .register_vehicle(&staff, register(&unique_vin(), variant.id, "White"))
                .await,
            Err(AppError::Forbidden(_))
        ));

        let vehicle = vehicles
            .register_vehicle(&h.manufacturer, register(&unique_vin(), variant.id, "White"))
            .await
            .unwrap();
        assert!(matches!(
            vehicles.assign_to_dealer(&staff, vehicle.id, dealer.id).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            vehicles.assign_to_dealer(&h.manufacturer, vehicle.id, Uuid::new_v4()).await,
            Err(AppError::Validation { ref field, .. }) if field == "dealer_id"
        ));
    }

    #[tokio::test]
    async fn assignment_hands_the_vehicle_to_the_dealer_once() {
        let h = Harness::new();
        let (dealer, staff) = h.dealer().await;
        let (other, _other_staff) = h.dealer().await;
        let variant = h.variant("1000").await;
        let vehicles = h.vehicles();

        let vehicle = vehicles
            .register_vehicle(&h.manufacturer, register(&unique_vin(), variant.id, "White"))
            .await
            .unwrap();
        let assigned = vehicles
            .assign_to_dealer(&h.manufacturer, vehicle.id, dealer.id)
            .await
            .unwrap();
        assert_eq!(assigned.status, VehicleStatus::InDealerStock);
        assert_eq!(assigned.dealer_id, Some(dealer.id));
        assert_eq!(vehicles.get_vehicle(&staff, vehicle.id).await.unwrap().id, vehicle.id);

        let reassigned = vehicles.assign_to_dealer(&h.manufacturer, vehicle.id, other.id).await;
        assert!(matches!(reassigned, Err(AppError::InvalidStateTransition(_))));
        assert_eq!(
            vehicles.get_vehicle(&h.manufacturer, vehicle.id).await.unwrap().dealer_id,
            Some(dealer.id)
        );
    }

    #[tokio::test]
    async fn test_drives_are_set_and_cleared_by_the_holding_dealer() {
        let h = Harness::new();
        let (dealer, staff) = h.dealer().await;
        let (_other, outsider) = h.dealer().await;
        let variant = h.variant("1000").await;
        let vehicle = h.dealer_vehicle(&dealer, &variant, "Red").await;
        let vehicles = h.vehicles();

        assert!(matches!(
            vehicles.set_test_drive(&outsider, vehicle.id).await,
            Err(AppError::Forbidden(_))
        ));

        let driving = vehicles.set_test_drive(&staff, vehicle.id).await.unwrap();
        assert_eq!(driving.status, VehicleStatus::TestDrive);
        assert!(matches!(
            vehicles.set_test_drive(&staff, vehicle.id).await,
            Err(AppError::InvalidStateTransition(_))
        ));

        let back = vehicles.clear_test_drive(&staff, vehicle.id).await.unwrap();
        assert_eq!(back.status, VehicleStatus::InDealerStock);
        assert!(matches!(
            vehicles.clear_test_drive(&staff, vehicle.id).await,
            Err(AppError::InvalidStateTransition(_))
        ));
    }

    #[tokio::test]
    async fn unassigned_vehicles_cannot_go_on_test_drive() {
        let h = Harness::new();
        let (_dealer, staff) = h.dealer().await;
        let variant = h.variant("1000").await;
        let vehicles = h.vehicles();
        let vehicle = vehicles
            .register_vehicle(&h.manufacturer, register(&unique_vin(), variant.id, "White"))
            .await
            .unwrap();

        assert!(matches!(
            vehicles.set_test_drive(&staff, vehicle.id).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            vehicles.get_vehicle(&staff, vehicle.id).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            vehicles.get_vehicle(&h.manufacturer, Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
    }

    /// Per-VIN statuses and aggregate stock are kept separately; a test
    /// drive does not take the vehicle out of the dealer's count.
    #[tokio::test]
    async fn vehicle_transitions_leave_aggregate_stock_alone() {
        let h = Harness::new();
        let (dealer, staff) = h.dealer().await;
        let variant = h.variant("1000").await;
        let vehicle = h.dealer_vehicle(&dealer, &variant, "Red").await;
        let location = StockLocation::dealer(dealer.id);
        assert_eq!(h.stock(location, variant.id, "Red").await, 1);

        h.vehicles().set_test_drive(&staff, vehicle.id).await.unwrap();
        assert_eq!(h.stock(location, variant.id, "Red").await, 1);
        h.vehicles().clear_test_drive(&staff, vehicle.id).await.unwrap();
        assert_eq!(h.stock(location, variant.id, "Red").await, 1);
    }

    #[tokio::test]
    async fn listing_is_scoped_to_the_callers_dealer() {
        let h = Harness::new();
        let (dealer, staff) = h.dealer().await;
        let (other, _other_staff) = h.dealer().await;
        let variant = h.variant("1000").await;
        h.dealer_vehicle(&dealer, &variant, "Red").await;
        h.dealer_vehicle(&other, &variant, "Red").await;
        let on_drive = h.dealer_vehicle(&dealer, &variant, "Blue").await;
        h.vehicles().set_test_drive(&staff, on_drive.id).await.unwrap();
        let vehicles = h.vehicles();

        assert_eq!(vehicles.list_vehicles(&staff, None, None).await.unwrap().len(), 2);
        let driving = vehicles
            .list_vehicles(&staff, None, Some(VehicleStatus::TestDrive))
            .await
            .unwrap();
        assert_eq!(driving.len(), 1);
        assert_eq!(driving[0].id, on_drive.id);

        assert!(matches!(
            vehicles.list_vehicles(&staff, Some(other.id), None).await,
            Err(AppError::Forbidden(_))
        ));
        assert_eq!(vehicles.list_vehicles(&h.manufacturer, None, None).await.unwrap().len(), 3);
    }

    // ------------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn dealer_codes_are_normalized_and_unique() {
        let h = Harness::new();
        let catalog = h.catalog();
        let input = || CreateDealerInput {
            code: " hn01 ".to_string(),
            name: "Hanoi Central".to_string(),
            address: Some("  ".to_string()),
            phone: Some("+84 912-345-678".to_string()),
            email: None,
        };

        let dealer = catalog.create_dealer(&h.manufacturer, input()).await.unwrap();
        assert_eq!(dealer.code, "HN01");
        assert_eq!(dealer.address, None);
        assert_eq!(catalog.get_dealer(dealer.id).await.unwrap(), dealer);

        assert!(matches!(
            catalog.create_dealer(&h.manufacturer, input()).await,
            Err(AppError::Conflict { .. })
        ));

        let mut bad_phone = input();
        bad_phone.code = "HN02".to_string();
        bad_phone.phone = Some("12ab".to_string());
        assert!(matches!(
            catalog.create_dealer(&h.manufacturer, bad_phone).await,
            Err(AppError::Validation { ref field, .. }) if field == "phone"
        ));
    }

    #[tokio::test]
    async fn variant_prices_must_be_positive() {
        let h = Harness::new();
        let catalog = h.catalog();

        let rejected = catalog
            .create_variant(
                &h.manufacturer,
                CreateVariantInput {
                    model: "VF 8".to_string(),
                    trim: "Plus".to_string(),
                    price: dec("0"),
                },
            )
            .await;
        assert!(matches!(rejected, Err(AppError::Validation { ref field, .. }) if field == "price"));

        let variant = h.variant("1200000000").await;
        let revised = catalog
            .update_variant_price(&h.manufacturer, variant.id, dec("1150000000"))
            .await
            .unwrap();
        assert_eq!(revised.price, dec("1150000000"));
        assert!(matches!(
            catalog.update_variant_price(&h.manufacturer, variant.id, dec("-1")).await,
            Err(AppError::Validation { .. })
        ));
        assert!(matches!(
            catalog.update_variant_price(&h.manufacturer, Uuid::new_v4(), dec("1")).await,
            Err(AppError::NotFound(_))
        ));
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;
    use shared::VehicleAction;

    fn action_strategy() -> impl Strategy<Value = VehicleAction> {
        prop_oneof![
            Just(VehicleAction::AssignToDealer),
            Just(VehicleAction::SetTestDrive),
            Just(VehicleAction::ClearTestDrive),
            Just(VehicleAction::Ship),
            Just(VehicleAction::ReturnToStock),
            Just(VehicleAction::MarkSold),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// SOLD is terminal and every accepted action matches the transition table
        #[test]
        fn vehicle_statuses_follow_the_table(actions in prop::collection::vec(action_strategy(), 1..20)) {
            let mut status = VehicleStatus::InManufacturerStock;
            for action in actions {
                let before = status;
                match status.apply(action) {
                    Ok(next) => {
                        prop_assert_ne!(before, VehicleStatus::Sold);
                        status = next;
                    }
                    Err(_) => prop_assert_eq!(status, before),
                }
                if before == VehicleStatus::Sold {
                    prop_assert_eq!(status, VehicleStatus::Sold);
                }
            }
        }
    }
}
