//! Calculation service: CRUD over the record store with ownership checks.
//!
//! A record owned by someone else is reported exactly like a missing one, so
//! callers cannot probe for other accounts' ids.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calculation::{Calculation, CalculationType};
use crate::error::{CalcError, Result};
use crate::store::CalculationStore;

/// Payload for creating a calculation.
///
/// `type` stays a string here so an unknown kind surfaces as a validation
/// error rather than a body decoding failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationCreate {
    #[serde(rename = "type")]
    pub kind: String,
    pub inputs: Vec<f64>,
}

/// Partial update; absent fields keep their stored values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalculationUpdate {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<f64>>,
}

pub struct CalculationService {
    store: RwLock<CalculationStore>,
}

impl CalculationService {
    pub fn new(store: CalculationStore) -> Self {
        CalculationService {
            store: RwLock::new(store),
        }
    }

    pub fn create(&self, owner: Uuid, payload: CalculationCreate) -> Result<Calculation> {
        let kind = payload.kind.parse::<CalculationType>().inspect_err(|e| {
            log::debug!("rejected create for owner {}: {}", owner, e);
        })?;
        let calc = Calculation::new(owner, kind, payload.inputs, Utc::now()).inspect_err(|e| {
            log::debug!("rejected {} for owner {}: {}", kind, owner, e);
        })?;

        self.store.write().insert(calc.clone())?;
        log::info!("created calculation {} ({}) for owner {}", calc.id, kind, owner);
        Ok(calc)
    }

    pub fn get(&self, owner: Uuid, id: Uuid) -> Result<Calculation> {
        let store = self.store.read();
        owned(store.get(&id), owner).cloned()
    }

    /// The owner's calculations in creation order.
    pub fn list(&self, owner: Uuid) -> Vec<Calculation> {
        self.store
            .read()
            .iter()
            .filter(|calc| calc.owner_id == owner)
            .cloned()
            .collect()
    }

    pub fn update(&self, owner: Uuid, id: Uuid, changes: CalculationUpdate) -> Result<Calculation> {
        let mut store = self.store.write();
        let mut calc = owned(store.get(&id), owner)?.clone();

        let kind = match changes.kind.as_deref() {
            Some(raw) => raw.parse::<CalculationType>().inspect_err(|e| {
                log::debug!("rejected update of {} for owner {}: {}", id, owner, e);
            })?,
            None => calc.kind,
        };
        let inputs = changes.inputs.unwrap_or_else(|| calc.inputs.clone());
        let result = kind.evaluate(&inputs).inspect_err(|e| {
            log::debug!("rejected update of {} for owner {}: {}", id, owner, e);
        })?;

        calc.kind = kind;
        calc.inputs = inputs;
        calc.result = result;
        calc.updated_at = next_timestamp(calc.updated_at, Utc::now());

        store.replace(calc.clone())?;
        log::info!("updated calculation {} for owner {}", id, owner);
        Ok(calc)
    }

    pub fn delete(&self, owner: Uuid, id: Uuid) -> Result<()> {
        let mut store = self.store.write();
        owned(store.get(&id), owner)?;
        store.remove(&id)?;
        log::info!("deleted calculation {} for owner {}", id, owner);
        Ok(())
    }
}

fn owned(calc: Option<&Calculation>, owner: Uuid) -> Result<&Calculation> {
    match calc {
        Some(calc) if calc.owner_id == owner => Ok(calc),
        _ => Err(CalcError::NotFound),
    }
}

/// `now`, or one microsecond past `previous` when the clock has not moved on.
fn next_timestamp(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn service() -> CalculationService {
        CalculationService::new(CalculationStore::in_memory())
    }

    fn create(kind: &str, inputs: &[f64]) -> CalculationCreate {
        CalculationCreate {
            kind: kind.to_string(),
            inputs: inputs.to_vec(),
        }
    }

    #[test]
    fn test_create_then_get_matches_direct_evaluation() {
        let svc = service();
        let owner = Uuid::new_v4();
        let cases: [(&str, &[f64], f64); 4] = [
            ("addition", &[2.0, 3.0], 5.0),
            ("subtraction", &[10.0, 4.0, 1.0], 5.0),
            ("multiplication", &[3.0, 4.0, 2.0], 24.0),
            ("division", &[100.0, 8.0], 12.5),
        ];

        for (kind, inputs, expected) in cases {
            let created = svc.create(owner, create(kind, inputs)).unwrap();
            let fetched = svc.get(owner, created.id).unwrap();
            assert_eq!(fetched.result, expected, "{kind}");
            assert_eq!(fetched, created);
        }
    }

    #[test]
    fn test_division_by_zero_is_never_persisted() {
        let svc = service();
        let owner = Uuid::new_v4();

        let err = svc.create(owner, create("division", &[10.0, 0.0])).unwrap_err();
        assert!(matches!(err, CalcError::Validation(_)));
        assert!(svc.list(owner).is_empty());
    }

    #[test]
    fn test_unknown_kind_is_a_validation_error() {
        let svc = service();
        let err = svc
            .create(Uuid::new_v4(), create("square_root", &[25.0, 1.0]))
            .unwrap_err();
        assert!(matches!(err, CalcError::Validation(_)));
    }

    #[test]
    fn test_update_recomputes_and_bumps_updated_at() {
        let svc = service();
        let owner = Uuid::new_v4();
        let created = svc.create(owner, create("addition", &[2.0, 3.0])).unwrap();

        let updated = svc
            .update(
                owner,
                created.id,
                CalculationUpdate {
                    kind: Some("multiplication".into()),
                    inputs: None,
                },
            )
            .unwrap();

        assert_eq!(updated.kind, CalculationType::Multiplication);
        assert_eq!(updated.inputs, vec![2.0, 3.0]);
        assert_eq!(updated.result, 6.0);
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at > created.updated_at);

        // An empty update still counts as a write.
        let touched = svc
            .update(owner, created.id, CalculationUpdate::default())
            .unwrap();
        assert!(touched.updated_at > updated.updated_at);
        assert_eq!(touched.created_at, created.created_at);
    }

    #[test]
    fn test_rejected_update_leaves_record_untouched() {
        let svc = service();
        let owner = Uuid::new_v4();
        let created = svc.create(owner, create("division", &[9.0, 3.0])).unwrap();

        let err = svc
            .update(
                owner,
                created.id,
                CalculationUpdate {
                    kind: None,
                    inputs: Some(vec![9.0, 0.0]),
                },
            )
            .unwrap_err();
        assert!(matches!(err, CalcError::Validation(_)));
        assert_eq!(svc.get(owner, created.id).unwrap(), created);
    }

    #[test]
    fn test_delete_then_get_is_not_found() {
        let svc = service();
        let owner = Uuid::new_v4();
        let created = svc.create(owner, create("addition", &[1.0, 1.0])).unwrap();

        svc.delete(owner, created.id).unwrap();
        assert!(matches!(svc.get(owner, created.id), Err(CalcError::NotFound)));
        assert!(matches!(svc.delete(owner, created.id), Err(CalcError::NotFound)));
    }

    #[test]
    fn test_other_owner_sees_not_found() {
        let svc = service();
        let alice = Uuid::new_v4();
        let mallory = Uuid::new_v4();
        let created = svc.create(alice, create("addition", &[1.0, 2.0])).unwrap();

        assert!(matches!(svc.get(mallory, created.id), Err(CalcError::NotFound)));
        assert!(matches!(
            svc.update(mallory, created.id, CalculationUpdate::default()),
            Err(CalcError::NotFound)
        ));
        assert!(matches!(svc.delete(mallory, created.id), Err(CalcError::NotFound)));
        assert!(svc.list(mallory).is_empty());

        // The owner's record survives the attempts.
        assert_eq!(svc.get(alice, created.id).unwrap(), created);
    }

    #[test]
    fn test_list_is_per_owner_in_creation_order() {
        let svc = service();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let first = svc.create(alice, create("addition", &[1.0, 2.0])).unwrap();
        svc.create(bob, create("addition", &[5.0, 5.0])).unwrap();
        let second = svc.create(alice, create("subtraction", &[5.0, 2.0])).unwrap();

        let ids: Vec<Uuid> = svc.list(alice).iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn test_writes_are_durable() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("calculations.bin.gz");
        let owner = Uuid::new_v4();

        let created = {
            let svc = CalculationService::new(CalculationStore::open(&path).unwrap());
            svc.create(owner, create("multiplication", &[6.0, 7.0])).unwrap()
        };

        let svc = CalculationService::new(CalculationStore::open(&path).unwrap());
        assert_eq!(svc.get(owner, created.id).unwrap().result, 42.0);
    }

    #[test]
    fn test_next_timestamp_is_strictly_increasing() {
        let now = Utc::now();
        assert!(next_timestamp(now, now) > now);
        assert!(next_timestamp(now, now - Duration::seconds(5)) > now);
        let later = now + Duration::seconds(1);
        assert_eq!(next_timestamp(now, later), later);
    }
}
