//! Calculation record store.
//!
//! Records are kept in creation order and, when the store is backed by a
//! file, every mutation rewrites the snapshot before returning. A failed
//! write rolls the in-memory change back so memory and disk never diverge.
//! The store does not know about owners; access control is the service's job.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::calculation::Calculation;
use crate::error::{CalcError, Result};
use crate::saving;

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    next_seq: u64,
    records: Vec<(u64, Calculation)>,
}

pub struct CalculationStore {
    records: BTreeMap<u64, Calculation>,
    index: HashMap<Uuid, u64>,
    next_seq: u64,
    path: Option<PathBuf>,
}

impl CalculationStore {
    /// A store that lives only in memory.
    pub fn in_memory() -> Self {
        CalculationStore {
            records: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 0,
            path: None,
        }
    }

    /// Open a file-backed store, loading the snapshot if one exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = if path.exists() {
            saving::load_snapshot::<Snapshot>(&path)
                .map_err(|e| CalcError::storage(format!("loading {}", path.display()), e))?
        } else {
            Snapshot::default()
        };

        let mut store = CalculationStore::in_memory();
        store.next_seq = snapshot.next_seq;
        for (seq, calc) in snapshot.records {
            store.index.insert(calc.id, seq);
            store.records.insert(seq, calc);
        }
        store.path = Some(path);

        log::debug!("loaded {} calculation(s)", store.records.len());
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &Uuid) -> Option<&Calculation> {
        self.index.get(id).and_then(|seq| self.records.get(seq))
    }

    /// All records in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Calculation> {
        self.records.values()
    }

    /// Append a new record.
    pub fn insert(&mut self, calc: Calculation) -> Result<()> {
        let seq = self.next_seq;
        let id = calc.id;
        self.next_seq += 1;
        self.index.insert(id, seq);
        self.records.insert(seq, calc);

        if let Err(e) = self.persist() {
            self.records.remove(&seq);
            self.index.remove(&id);
            self.next_seq -= 1;
            return Err(e);
        }
        Ok(())
    }

    /// Overwrite an existing record in place, keeping its position.
    ///
    /// Fails with [`CalcError::NotFound`] if no record has that id.
    pub fn replace(&mut self, calc: Calculation) -> Result<()> {
        let seq = *self.index.get(&calc.id).ok_or(CalcError::NotFound)?;
        let previous = self.records.insert(seq, calc);

        if let Err(e) = self.persist() {
            if let Some(previous) = previous {
                self.records.insert(seq, previous);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Remove a record permanently, returning it.
    pub fn remove(&mut self, id: &Uuid) -> Result<Calculation> {
        let seq = self.index.remove(id).ok_or(CalcError::NotFound)?;
        let removed = match self.records.remove(&seq) {
            Some(calc) => calc,
            None => return Err(CalcError::NotFound),
        };

        if let Err(e) = self.persist() {
            self.index.insert(*id, seq);
            self.records.insert(seq, removed);
            return Err(e);
        }
        Ok(removed)
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let snapshot = Snapshot {
            next_seq: self.next_seq,
            records: self
                .records
                .iter()
                .map(|(seq, calc)| (*seq, calc.clone()))
                .collect(),
        };

        saving::save_snapshot(&snapshot, path).map_err(|e| {
            log::error!("failed to write snapshot {}: {}", path.display(), e);
            CalcError::storage(format!("writing {}", path.display()), e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculation::CalculationType;
    use chrono::Utc;
    use tempfile::TempDir;

    fn calc(kind: CalculationType, inputs: &[f64]) -> Calculation {
        Calculation::new(Uuid::new_v4(), kind, inputs.to_vec(), Utc::now()).unwrap()
    }

    #[test]
    fn test_iter_keeps_creation_order() {
        let mut store = CalculationStore::in_memory();
        let a = calc(CalculationType::Addition, &[1.0, 2.0]);
        let b = calc(CalculationType::Multiplication, &[3.0, 4.0]);
        let c = calc(CalculationType::Subtraction, &[9.0, 1.0]);
        store.insert(a.clone()).unwrap();
        store.insert(b.clone()).unwrap();
        store.insert(c.clone()).unwrap();

        store.remove(&b.id).unwrap();
        let ids: Vec<Uuid> = store.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a.id, c.id]);
    }

    #[test]
    fn test_replace_and_remove_missing() {
        let mut store = CalculationStore::in_memory();
        let orphan = calc(CalculationType::Addition, &[1.0, 1.0]);
        assert!(matches!(store.replace(orphan.clone()), Err(CalcError::NotFound)));
        assert!(matches!(store.remove(&orphan.id), Err(CalcError::NotFound)));
    }

    #[test]
    fn test_reopen_restores_records() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("calculations.bin.gz");

        let first = calc(CalculationType::Division, &[10.0, 4.0]);
        let second = calc(CalculationType::Addition, &[2.0, 3.0]);
        {
            let mut store = CalculationStore::open(&path).unwrap();
            assert!(store.is_empty());
            store.insert(first.clone()).unwrap();
            store.insert(second.clone()).unwrap();
            store.remove(&first.id).unwrap();
        }

        let mut reopened = CalculationStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get(&second.id), Some(&second));
        assert!(reopened.get(&first.id).is_none());

        // New records still land after the survivors.
        let third = calc(CalculationType::Multiplication, &[2.0, 2.0]);
        reopened.insert(third.clone()).unwrap();
        let ids: Vec<Uuid> = reopened.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![second.id, third.id]);
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let tmp = TempDir::new().unwrap();
        // A directory where the snapshot file should be makes every write fail.
        let path = tmp.path().join("snapshot");
        std::fs::create_dir_all(path.with_extension("tmp")).unwrap();

        let mut store = CalculationStore::in_memory();
        store.path = Some(path);

        let record = calc(CalculationType::Addition, &[1.0, 2.0]);
        let err = store.insert(record.clone()).unwrap_err();
        assert!(matches!(err, CalcError::Storage { .. }));
        assert!(store.is_empty());
        assert!(store.get(&record.id).is_none());
    }
}
