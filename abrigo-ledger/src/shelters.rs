//! Shelter and occupant operations

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{require_local_id, ShelterLedger};
use crate::models::{Occupant, OccupantStatus, Shelter};
use abrigo_sync::{Entity, Stored};
use chrono::Utc;

impl ShelterLedger {
    /// Register a shelter.
    pub async fn add_shelter(&self, shelter: Shelter) -> LedgerResult<Stored<Shelter>> {
        let mut record = Stored::new(shelter);
        self.store.put(&mut record).await?;
        self.trigger_push().await;
        Ok(record)
    }

    /// Active (non-deleted) shelters.
    pub async fn get_shelters(&self) -> LedgerResult<Vec<Stored<Shelter>>> {
        Ok(self.store.get_all::<Shelter>(true).await?)
    }

    /// One shelter by business identifier, deleted or not.
    pub async fn get_shelter(&self, business_id: &str) -> LedgerResult<Option<Stored<Shelter>>> {
        Ok(self.store.get_by_business_id::<Shelter>(business_id).await?)
    }

    /// Edit a shelter in place.
    pub async fn update_shelter<F>(
        &self,
        business_id: &str,
        apply: F,
    ) -> LedgerResult<Stored<Shelter>>
    where
        F: FnOnce(&mut Shelter),
    {
        let mut shelter = self
            .store
            .get_by_business_id::<Shelter>(business_id)
            .await?
            .filter(Stored::is_active)
            .ok_or_else(|| LedgerError::NotFound(format!("Shelter {} not found", business_id)))?;

        apply(&mut shelter.data);
        if shelter.data.current_occupancy < 0 {
            return Err(LedgerError::Validation(
                "Shelter occupancy cannot be negative".to_string(),
            ));
        }
        self.store.put(&mut shelter).await?;
        self.trigger_push().await;
        Ok(shelter)
    }

    /// Soft-delete a shelter.
    pub async fn delete_shelter(&self, business_id: &str) -> LedgerResult<()> {
        let shelter = self
            .store
            .get_by_business_id::<Shelter>(business_id)
            .await?
            .filter(Stored::is_active)
            .ok_or_else(|| LedgerError::NotFound(format!("Shelter {} not found", business_id)))?;

        self.store
            .soft_delete(Shelter::ENTITY, require_local_id(&shelter.meta)?)
            .await?;
        self.trigger_push().await;
        Ok(())
    }

    /// Register an occupant on intake.
    pub async fn add_occupant(&self, occupant: Occupant) -> LedgerResult<Stored<Occupant>> {
        let mut record = Stored::new(occupant);
        self.store.put(&mut record).await?;
        self.trigger_push().await;
        Ok(record)
    }

    /// Occupants of one shelter, or all of them.
    pub async fn get_occupants(
        &self,
        shelter_id: Option<&str>,
    ) -> LedgerResult<Vec<Stored<Occupant>>> {
        let occupants = match shelter_id {
            Some(id) => self.store.query_by_field::<Occupant>("shelter_id", id).await?,
            None => self.store.get_all::<Occupant>(true).await?,
        };
        Ok(occupants.into_iter().filter(Stored::is_active).collect())
    }

    /// Mark an occupant as exited and decrement the owning shelter's
    /// occupancy by exactly one, atomically. Idempotent for an occupant
    /// who already exited.
    pub async fn exit_occupant(&self, occupant_id: &str) -> LedgerResult<()> {
        let mut tx = self.store.begin().await?;

        let mut occupant = tx
            .get_by_business_id::<Occupant>(occupant_id)
            .await?
            .filter(Stored::is_active)
            .ok_or_else(|| LedgerError::NotFound(format!("Occupant {} not found", occupant_id)))?;

        if occupant.data.status == OccupantStatus::Exited {
            return Ok(());
        }

        occupant.data.status = OccupantStatus::Exited;
        occupant.data.exit_date = Some(Utc::now());
        tx.put(&mut occupant).await?;

        if let Some(mut shelter) = tx
            .get_by_business_id::<Shelter>(&occupant.data.shelter_id)
            .await?
        {
            shelter.data.current_occupancy = (shelter.data.current_occupancy - 1).max(0);
            tx.put(&mut shelter).await?;
        }

        tx.commit().await?;
        self.trigger_push().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::create_test_ledger;

    #[tokio::test]
    async fn shelter_round_trip_and_soft_delete() {
        let (ledger, _store, _guard) = create_test_ledger().await;

        let shelter = ledger
            .add_shelter(Shelter::new("Escola Municipal", 120))
            .await
            .unwrap();
        assert!(shelter.meta.business_id.starts_with("ABR-"));

        assert_eq!(ledger.get_shelters().await.unwrap().len(), 1);

        ledger
            .delete_shelter(&shelter.meta.business_id)
            .await
            .unwrap();
        assert!(ledger.get_shelters().await.unwrap().is_empty());

        // Still reachable by id for audit purposes.
        let deleted = ledger
            .get_shelter(&shelter.meta.business_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!deleted.is_active());
    }

    #[tokio::test]
    async fn exit_decrements_occupancy_once() {
        let (ledger, _store, _guard) = create_test_ledger().await;

        let shelter = ledger
            .add_shelter(Shelter::new("Quadra Norte", 80))
            .await
            .unwrap();
        ledger
            .update_shelter(&shelter.meta.business_id, |s| s.current_occupancy = 2)
            .await
            .unwrap();

        let occupant = ledger
            .add_occupant(Occupant::new(
                shelter.meta.business_id.clone(),
                "Maria Souza",
            ))
            .await
            .unwrap();

        ledger
            .exit_occupant(&occupant.meta.business_id)
            .await
            .unwrap();
        // Second exit is a no-op.
        ledger
            .exit_occupant(&occupant.meta.business_id)
            .await
            .unwrap();

        let reloaded = ledger
            .get_shelter(&shelter.meta.business_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.data.current_occupancy, 1);

        let occupants = ledger
            .get_occupants(Some(shelter.meta.business_id.as_str()))
            .await
            .unwrap();
        assert_eq!(occupants[0].data.status, OccupantStatus::Exited);
        assert!(occupants[0].data.exit_date.is_some());
    }

    #[tokio::test]
    async fn occupancy_never_goes_negative() {
        let (ledger, _store, _guard) = create_test_ledger().await;

        let shelter = ledger
            .add_shelter(Shelter::new("Quadra Norte", 80))
            .await
            .unwrap();
        let occupant = ledger
            .add_occupant(Occupant::new(
                shelter.meta.business_id.clone(),
                "João Lima",
            ))
            .await
            .unwrap();

        // Occupancy was never incremented; exit still floors at zero.
        ledger
            .exit_occupant(&occupant.meta.business_id)
            .await
            .unwrap();

        let reloaded = ledger
            .get_shelter(&shelter.meta.business_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.data.current_occupancy, 0);
    }
}
