// =============================================================================
// PRODUCT LEDGER
// =============================================================================
// The only writer of `sold_quantity`. Two operations:
// - reserve: conditional "sold += qty WHERE active AND available >= qty"
// - release: "sold -= qty" floored at zero
//
// Both run inside the caller's transaction scope. Release is only ever used
// to undo an earlier successful reservation; callers make sure it runs once
// per reservation.
// =============================================================================

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::store::{Reservation, ReservationFailure, StoreTx};

/// Reserve `quantity` units of a product and return its current unit price.
///
/// A refused reservation becomes the conflict error the caller surfaces
/// (`InsufficientStock` carries the quantity actually available).
pub async fn reserve(tx: &mut dyn StoreTx, product_id: Uuid, quantity: i32) -> AppResult<Decimal> {
    match tx.try_reserve(product_id, quantity).await? {
        Reservation::Reserved { unit_price } => {
            metrics::record_reservation("reserved");
            tracing::debug!(%product_id, quantity, "Stock reserved");
            Ok(unit_price)
        }
        Reservation::Rejected(failure) => {
            let (outcome, err) = match failure {
                ReservationFailure::ProductNotFound | ReservationFailure::ProductInactive => {
                    ("unavailable", AppError::ProductUnavailable { product_id })
                }
                ReservationFailure::InsufficientStock { available } => (
                    "insufficient_stock",
                    AppError::InsufficientStock {
                        product_id,
                        available,
                        requested: quantity,
                    },
                ),
            };
            metrics::record_reservation(outcome);
            tracing::info!(%product_id, quantity, ?failure, "Reservation refused");
            Err(err)
        }
    }
}

/// Give `quantity` units back to available stock.
pub async fn release(tx: &mut dyn StoreTx, product_id: Uuid, quantity: i32) -> AppResult<()> {
    if !tx.release(product_id, quantity).await? {
        return Err(AppError::Internal(format!(
            "cannot release stock for unknown product {product_id}"
        )));
    }
    metrics::record_reservation("released");
    tracing::debug!(%product_id, quantity, "Stock released");
    Ok(())
}

/// Reservations taken by one order attempt, oldest first.
#[derive(Debug, Default)]
pub struct ReservationLog {
    entries: Vec<(Uuid, i32)>,
}

impl ReservationLog {
    pub fn record(&mut self, product_id: Uuid, quantity: i32) {
        self.entries.push((product_id, quantity));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release every recorded reservation, newest first.
    pub async fn undo(mut self, tx: &mut dyn StoreTx) -> AppResult<()> {
        while let Some((product_id, quantity)) = self.entries.pop() {
            release(tx, product_id, quantity).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::stocked;
    use crate::store::{MemoryStore, Store};

    #[tokio::test]
    async fn refused_reservation_reports_available_units() {
        let store = MemoryStore::new();
        let p = stocked(&store, 10, 8, Decimal::TEN);
        let mut tx = store.begin().await.unwrap();

        let err = reserve(tx.as_mut(), p.id, 3).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InsufficientStock { available: 2, requested: 3, .. }
        ));
    }

    #[tokio::test]
    async fn unknown_product_is_unavailable() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();

        let err = reserve(tx.as_mut(), Uuid::new_v4(), 1).await.unwrap_err();
        assert!(matches!(err, AppError::ProductUnavailable { .. }));
    }

    #[tokio::test]
    async fn undo_releases_everything_recorded() {
        let store = MemoryStore::new();
        let a = stocked(&store, 10, 0, Decimal::ONE);
        let b = stocked(&store, 10, 0, Decimal::ONE);

        let mut tx = store.begin().await.unwrap();
        let mut log = ReservationLog::default();
        for (id, qty) in [(a.id, 2), (b.id, 5)] {
            reserve(tx.as_mut(), id, qty).await.unwrap();
            log.record(id, qty);
        }
        assert_eq!(log.len(), 2);

        log.undo(tx.as_mut()).await.unwrap();
        tx.commit().await.unwrap();

        for id in [a.id, b.id] {
            let p = store.get_product(id).await.unwrap().unwrap();
            assert_eq!(p.sold_quantity, 0);
        }
    }

    #[tokio::test]
    async fn releasing_unknown_product_fails() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();

        assert!(release(tx.as_mut(), Uuid::new_v4(), 1).await.is_err());
    }
}
