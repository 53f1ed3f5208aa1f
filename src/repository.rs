//! durable loan storage
//!
//! The ledger is one JSON object mapping loan id to the full loan record.
//! [`JsonLoanRepository`] keeps no resident state: every call reads the file
//! under a process-wide mutex, so a save is visible to the very next read,
//! in this process or after a restart.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::errors::{BillingError, Result};
use crate::loan::Loan;
use crate::types::LoanId;

/// complete set of loans written as one unit
pub type LoanSnapshot = BTreeMap<LoanId, Loan>;

/// storage for loans keyed by id
pub trait LoanRepository {
    /// insert or replace the loan, returning its id
    fn save(&self, loan: &Loan) -> Result<LoanId>;

    /// store the loan only if its id is unused, returning whether it was stored
    ///
    /// The check and the insert form one critical section.
    fn insert_new(&self, loan: &Loan) -> Result<bool>;

    /// fetch the loan, failing with `NotFound` when absent
    fn find_by_id(&self, id: &LoanId) -> Result<Loan>;

    /// ids of every stored loan in ascending order
    fn list_ids(&self) -> Result<Vec<LoanId>>;

    /// load, mutate and store one loan as a single critical section
    ///
    /// Nothing is written when `mutate` fails or leaves the loan unchanged.
    fn update<T, F>(&self, id: &LoanId, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Loan) -> Result<T>;

    fn exists(&self, id: &LoanId) -> Result<bool> {
        match self.find_by_id(id) {
            Ok(_) => Ok(true),
            Err(BillingError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// json file backed repository
#[derive(Debug)]
pub struct JsonLoanRepository {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLoanRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// the guarded data is `()`, so a panic in another holder leaves nothing to repair
    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// read the whole ledger
    ///
    /// A missing file and a file with no content are both an empty ledger.
    /// Anything else that does not parse is reported as corrupt.
    pub fn load_all(&self) -> Result<LoanSnapshot> {
        let _guard = self.guard();
        self.read_snapshot()
    }

    fn read_snapshot(&self) -> Result<LoanSnapshot> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "ledger file missing, starting empty");
                return Ok(LoanSnapshot::new());
            }
            Err(e) => return Err(e.into()),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(LoanSnapshot::new());
        }

        let loans: LoanSnapshot = serde_json::from_slice(&bytes).map_err(|source| {
            warn!(path = %self.path.display(), error = %source, "ledger snapshot is corrupt");
            BillingError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;

        debug!(path = %self.path.display(), loans = loans.len(), "ledger loaded");
        Ok(loans)
    }

    /// replace the ledger atomically: temp file in the same directory, fsync, rename
    fn write_snapshot(&self, loans: &LoanSnapshot) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let json = serde_json::to_vec_pretty(loans)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!(path = %self.path.display(), loans = loans.len(), "ledger written");
        Ok(())
    }
}

impl LoanRepository for JsonLoanRepository {
    fn save(&self, loan: &Loan) -> Result<LoanId> {
        let _guard = self.guard();

        let mut loans = self.read_snapshot()?;
        loans.insert(loan.id().clone(), loan.clone());
        self.write_snapshot(&loans)?;

        Ok(loan.id().clone())
    }

    fn insert_new(&self, loan: &Loan) -> Result<bool> {
        let _guard = self.guard();

        let mut loans = self.read_snapshot()?;
        if loans.contains_key(loan.id()) {
            return Ok(false);
        }
        loans.insert(loan.id().clone(), loan.clone());
        self.write_snapshot(&loans)?;

        Ok(true)
    }

    fn find_by_id(&self, id: &LoanId) -> Result<Loan> {
        let _guard = self.guard();

        let mut loans = self.read_snapshot()?;
        loans
            .remove(id)
            .ok_or_else(|| BillingError::NotFound { id: id.clone() })
    }

    fn list_ids(&self) -> Result<Vec<LoanId>> {
        let _guard = self.guard();
        Ok(self.read_snapshot()?.into_keys().collect())
    }

    fn update<T, F>(&self, id: &LoanId, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Loan) -> Result<T>,
    {
        let _guard = self.guard();

        let mut loans = self.read_snapshot()?;
        let loan = loans
            .get_mut(id)
            .ok_or_else(|| BillingError::NotFound { id: id.clone() })?;

        let before = loan.clone();
        let output = mutate(loan)?;

        if *loan != before {
            self.write_snapshot(&loans)?;
        }

        Ok(output)
    }
}

/// in-memory repository with the same semantics as the json ledger
#[derive(Debug, Default)]
pub struct MemoryLoanRepository {
    loans: Mutex<LoanSnapshot>,
}

impl MemoryLoanRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, LoanSnapshot> {
        self.loans.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

impl LoanRepository for MemoryLoanRepository {
    fn save(&self, loan: &Loan) -> Result<LoanId> {
        self.guard().insert(loan.id().clone(), loan.clone());
        Ok(loan.id().clone())
    }

    fn insert_new(&self, loan: &Loan) -> Result<bool> {
        match self.guard().entry(loan.id().clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(loan.clone());
                Ok(true)
            }
        }
    }

    fn find_by_id(&self, id: &LoanId) -> Result<Loan> {
        self.guard()
            .get(id)
            .cloned()
            .ok_or_else(|| BillingError::NotFound { id: id.clone() })
    }

    fn list_ids(&self) -> Result<Vec<LoanId>> {
        Ok(self.guard().keys().cloned().collect())
    }

    fn update<T, F>(&self, id: &LoanId, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Loan) -> Result<T>,
    {
        let mut loans = self.guard();
        let stored = loans
            .get_mut(id)
            .ok_or_else(|| BillingError::NotFound { id: id.clone() })?;

        // mutate a copy so a failed mutation commits nothing
        let mut working = stored.clone();
        let output = mutate(&mut working)?;
        *stored = working;

        Ok(output)
    }
}

impl<R: LoanRepository> LoanRepository for Arc<R> {
    fn save(&self, loan: &Loan) -> Result<LoanId> {
        (**self).save(loan)
    }

    fn insert_new(&self, loan: &Loan) -> Result<bool> {
        (**self).insert_new(loan)
    }

    fn find_by_id(&self, id: &LoanId) -> Result<Loan> {
        (**self).find_by_id(id)
    }

    fn list_ids(&self) -> Result<Vec<LoanId>> {
        (**self).list_ids()
    }

    fn update<T, F>(&self, id: &LoanId, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Loan) -> Result<T>,
    {
        (**self).update(id, mutate)
    }

    fn exists(&self, id: &LoanId) -> Result<bool> {
        (**self).exists(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::{Money, Rate};
    use crate::errors::ErrorKind;
    use crate::factory::{create_loan, LoanBuilder};
    use std::thread;

    fn loan_with_id(id: &str, principal: i64) -> Loan {
        LoanBuilder::new()
            .id(LoanId::new(id))
            .principal(Money::from_major(principal))
            .rate(Rate::from_percentage(5))
            .weeks(10)
            .build()
            .unwrap()
    }

    #[test]
    fn test_save_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonLoanRepository::new(dir.path().join("loans.json"));

        let loan = loan_with_id("123", 1_000);
        let id = repo.save(&loan).unwrap();
        assert_eq!(id.as_str(), "123");

        let saved = repo.find_by_id(&id).unwrap();
        assert_eq!(saved.principal(), Money::from_major(1_000));
        assert_eq!(saved, loan);
    }

    #[test]
    fn test_save_multiple_loans() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonLoanRepository::new(dir.path().join("loans.json"));

        repo.save(&loan_with_id("1", 500)).unwrap();
        repo.save(&loan_with_id("2", 1_000)).unwrap();

        assert_eq!(repo.find_by_id(&"1".into()).unwrap().principal(), Money::from_major(500));
        assert_eq!(repo.find_by_id(&"2".into()).unwrap().principal(), Money::from_major(1_000));
        assert_eq!(repo.list_ids().unwrap(), vec![LoanId::new("1"), LoanId::new("2")]);
    }

    #[test]
    fn test_save_replaces_existing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonLoanRepository::new(dir.path().join("loans.json"));

        let mut loan = loan_with_id("abc", 1_000);
        repo.save(&loan).unwrap();
        loan.apply_payment(1, Money::from_major(105)).unwrap();
        repo.save(&loan).unwrap();

        assert_eq!(repo.list_ids().unwrap().len(), 1);
        assert_eq!(
            repo.find_by_id(loan.id()).unwrap().outstanding_amount(),
            Money::from_major(945)
        );
    }

    #[test]
    fn test_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loans.json");

        let mut loan = create_loan(Money::from_major(5_000_000), Rate::from_percentage(10), 50).unwrap();
        loan.apply_payment(1, Money::from_major(110_000)).unwrap();
        loan.is_delinquent(4);

        JsonLoanRepository::new(&path).save(&loan).unwrap();

        let reopened = JsonLoanRepository::new(&path);
        let restored = reopened.find_by_id(loan.id()).unwrap();
        assert_eq!(restored, loan);
        assert_eq!(restored.outstanding_amount(), Money::from_major(5_390_000));
    }

    #[test]
    fn test_find_missing_loan() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonLoanRepository::new(dir.path().join("loans.json"));
        repo.save(&loan_with_id("present", 1_000)).unwrap();

        let err = repo.find_by_id(&LoanId::new("absent")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!repo.exists(&LoanId::new("absent")).unwrap());
        assert!(repo.exists(&LoanId::new("present")).unwrap());
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonLoanRepository::new(dir.path().join("never-written.json"));

        assert!(repo.load_all().unwrap().is_empty());
        assert!(repo.list_ids().unwrap().is_empty());
    }

    #[test]
    fn test_load_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        fs::write(&path, b"").unwrap();

        let repo = JsonLoanRepository::new(&path);
        assert!(repo.load_all().unwrap().is_empty());

        fs::write(&path, b"  \n").unwrap();
        assert!(repo.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_load_corrupted_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupted.json");
        fs::write(&path, b"invalid json").unwrap();

        let repo = JsonLoanRepository::new(&path);
        let err = repo.load_all().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);

        let err = repo.find_by_id(&LoanId::new("123")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);

        // a corrupt ledger is never overwritten by a save
        assert!(repo.save(&loan_with_id("123", 1_000)).is_err());
        assert_eq!(fs::read(&path).unwrap(), b"invalid json");
    }

    #[test]
    fn test_failed_update_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loans.json");
        let repo = JsonLoanRepository::new(&path);
        repo.save(&loan_with_id("123", 1_000)).unwrap();
        let before = fs::read(&path).unwrap();

        let err = repo
            .update(&LoanId::new("123"), |loan| loan.apply_payment(1, Money::from_major(1)))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AmountMismatch);
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_update_commits_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonLoanRepository::new(dir.path().join("loans.json"));
        repo.save(&loan_with_id("123", 1_000)).unwrap();

        let outstanding = repo
            .update(&LoanId::new("123"), |loan| {
                loan.apply_payment(1, Money::from_major(105))?;
                Ok(loan.outstanding_amount())
            })
            .unwrap();

        assert_eq!(outstanding, Money::from_major(945));
        assert_eq!(
            repo.find_by_id(&LoanId::new("123")).unwrap().outstanding_amount(),
            Money::from_major(945)
        );

        let err = repo.update(&LoanId::new("nope"), |_| Ok(())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_concurrent_saves_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(JsonLoanRepository::new(dir.path().join("loans.json")));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let repo = Arc::clone(&repo);
                thread::spawn(move || {
                    for i in 0..5 {
                        let loan = loan_with_id(&format!("loan-{}-{}", t, i), 1_000);
                        repo.save(&loan).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(repo.list_ids().unwrap().len(), 40);
    }

    #[test]
    fn test_concurrent_payments_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(JsonLoanRepository::new(dir.path().join("loans.json")));
        let loan = loan_with_id("shared", 1_000);
        repo.save(&loan).unwrap();

        let handles: Vec<_> = (1..=10)
            .map(|week| {
                let repo = Arc::clone(&repo);
                thread::spawn(move || {
                    repo.update(&LoanId::new("shared"), |loan| {
                        loan.apply_payment(week, Money::from_major(105))
                    })
                    .unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let settled = repo.find_by_id(&LoanId::new("shared")).unwrap();
        assert!(settled.outstanding_amount().is_zero());
        assert_eq!(settled.paid_weeks(), 10);
    }

    #[test]
    fn test_insert_new_keeps_existing_loan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loans.json");
        let repo = JsonLoanRepository::new(&path);

        assert!(repo.insert_new(&loan_with_id("123", 1_000)).unwrap());
        let before = fs::read(&path).unwrap();

        assert!(!repo.insert_new(&loan_with_id("123", 5_000)).unwrap());
        assert_eq!(fs::read(&path).unwrap(), before);
        assert_eq!(
            repo.find_by_id(&LoanId::new("123")).unwrap().principal(),
            Money::from_major(1_000)
        );
    }

    #[test]
    fn test_concurrent_insert_new_admits_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(JsonLoanRepository::new(dir.path().join("loans.json")));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let repo = Arc::clone(&repo);
                thread::spawn(move || repo.insert_new(&loan_with_id("same", 1_000 + t)).unwrap())
            })
            .collect();

        let stored = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|stored| *stored)
            .count();

        assert_eq!(stored, 1);
        assert_eq!(repo.list_ids().unwrap(), vec![LoanId::new("same")]);
    }

    #[test]
    fn test_shared_through_arc() {
        let repo = Arc::new(MemoryLoanRepository::new());
        let shared = Arc::clone(&repo);

        let loan = loan_with_id("arc", 1_000);
        shared.save(&loan).unwrap();

        assert!(LoanRepository::exists(&shared, loan.id()).unwrap());
        assert_eq!(repo.len(), 1);
        assert_eq!(shared.list_ids().unwrap(), vec![LoanId::new("arc")]);
    }

    #[test]
    fn test_memory_repository() {
        let repo = MemoryLoanRepository::new();
        assert!(repo.is_empty());

        let loan = loan_with_id("m1", 1_000);
        repo.save(&loan).unwrap();
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.find_by_id(loan.id()).unwrap(), loan);

        let err = repo
            .update(loan.id(), |loan| loan.apply_payment(20, Money::from_major(105)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidWeek);
        assert_eq!(repo.find_by_id(loan.id()).unwrap(), loan);

        assert!(!repo.insert_new(&loan_with_id("m1", 2_000)).unwrap());
        assert!(repo.insert_new(&loan_with_id("m2", 2_000)).unwrap());

        let err = repo.find_by_id(&LoanId::new("m3")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
