//! Entity store over sled.
//!
//! Every record lives under `<prefix>/<id>` in one keyspace and carries a version
//! that is bumped on each write. Mutations go through [`EntityStore::commit`], which
//! runs the closure inside a sled transaction; [`Txn::recheck`] compares a record
//! with the snapshot the caller validated against and aborts with
//! [`WorkflowError::Conflict`] when they differ, so no decision is ever committed on
//! stale data.
use crate::error::WorkflowError;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use std::sync::Arc;

pub type TxnResult<T> = ConflictableTransactionResult<T, WorkflowError>;

/// A versioned entity persisted as CBOR.
pub trait Record: minicbor::Encode<()> + for<'b> minicbor::Decode<'b, ()> {
    const PREFIX: &'static str;

    fn record_id(&self) -> &str;
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);

    fn key(&self) -> String {
        key_for::<Self>(self.record_id())
    }
}

/// `Record` for a struct with `id: String` and `version: u64` fields.
macro_rules! impl_record {
    ($ty:ty, $prefix:literal) => {
        impl $crate::store::Record for $ty {
            const PREFIX: &'static str = $prefix;

            fn record_id(&self) -> &str {
                &self.id
            }
            fn version(&self) -> u64 {
                self.version
            }
            fn set_version(&mut self, version: u64) {
                self.version = version;
            }
        }
    };
}
pub(crate) use impl_record;

pub fn key_for<T: Record + ?Sized>(id: &str) -> String {
    format!("{}/{}", T::PREFIX, id)
}

fn encode<T: Record>(record: &T) -> Result<Vec<u8>, WorkflowError> {
    minicbor::to_vec(record).map_err(|e| WorkflowError::Encoding(e.to_string()))
}

fn decode<T: Record>(bytes: &[u8]) -> Result<T, WorkflowError> {
    minicbor::decode(bytes).map_err(|e| WorkflowError::Encoding(e.to_string()))
}

/// Abort the surrounding transaction with a workflow error.
pub fn abort<T>(err: WorkflowError) -> TxnResult<T> {
    Err(ConflictableTransactionError::Abort(err))
}

/// Lift a workflow result into the transaction, aborting on error.
pub trait OrAbort<T> {
    fn or_abort(self) -> TxnResult<T>;
}

impl<T> OrAbort<T> for Result<T, WorkflowError> {
    fn or_abort(self) -> TxnResult<T> {
        self.map_err(ConflictableTransactionError::Abort)
    }
}

#[derive(Clone)]
pub struct EntityStore {
    instance: Arc<sled::Db>,
}

impl EntityStore {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }

    pub fn find<T: Record>(&self, id: &str) -> Result<Option<T>, WorkflowError> {
        match self.instance.get(key_for::<T>(id).as_bytes())? {
            Some(bytes) => Ok(Some(decode(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    pub fn get<T: Record>(&self, id: &str) -> Result<T, WorkflowError> {
        self.find(id)?.ok_or_else(|| WorkflowError::NotFound {
            entity: T::PREFIX,
            id: id.to_string(),
        })
    }

    /// All records of a kind, in key order.
    pub fn scan<T: Record>(&self) -> Result<Vec<T>, WorkflowError> {
        let prefix = format!("{}/", T::PREFIX);
        self.instance
            .scan_prefix(prefix.as_bytes())
            .values()
            .map(|bytes| decode(bytes?.as_ref()))
            .collect()
    }

    /// Resolve a secondary index entry (e.g. booking number to booking id).
    pub fn lookup(&self, index: &str, value: &str) -> Result<Option<String>, WorkflowError> {
        Ok(self
            .instance
            .get(format!("{index}/{value}").as_bytes())?
            .map(|id| String::from_utf8_lossy(id.as_ref()).into_owned()))
    }

    /// Run `op` atomically. Either every write it makes lands or none does.
    pub fn commit<R>(&self, op: impl Fn(&Txn<'_>) -> TxnResult<R>) -> Result<R, WorkflowError> {
        let result = self.instance.transaction(|tree| op(&Txn { tree }));

        match result {
            Ok(value) => {
                tracing::debug!("store commit applied");
                Ok(value)
            }
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(WorkflowError::Storage(err)),
        }
    }

    pub fn flush(&self) -> Result<(), WorkflowError> {
        self.instance.flush()?;
        Ok(())
    }
}

/// Typed view over a sled transaction.
pub struct Txn<'a> {
    tree: &'a TransactionalTree,
}

impl Txn<'_> {
    pub fn find<T: Record>(&self, id: &str) -> TxnResult<Option<T>> {
        match self.tree.get(key_for::<T>(id).as_bytes())? {
            Some(bytes) => match decode(bytes.as_ref()) {
                Ok(record) => Ok(Some(record)),
                Err(err) => abort(err),
            },
            None => Ok(None),
        }
    }

    pub fn load<T: Record>(&self, id: &str) -> TxnResult<T> {
        match self.find(id)? {
            Some(record) => Ok(record),
            None => abort(WorkflowError::NotFound {
                entity: T::PREFIX,
                id: id.to_string(),
            }),
        }
    }

    /// Re-read `snapshot` and fail with `Conflict` unless nobody wrote it since.
    pub fn recheck<T: Record>(&self, snapshot: &T) -> TxnResult<T> {
        let current: T = self.load(snapshot.record_id())?;
        if current.version() != snapshot.version() {
            return abort(WorkflowError::Conflict {
                entity: T::PREFIX,
                id: snapshot.record_id().to_string(),
            });
        }
        Ok(current)
    }

    /// Write `record` with its version bumped by one.
    pub fn save<T: Record>(&self, record: &T) -> TxnResult<T>
    where
        T: Clone,
    {
        let mut stored = record.clone();
        stored.set_version(record.version() + 1);
        match encode(&stored) {
            Ok(bytes) => {
                self.tree.insert(stored.key().as_bytes(), bytes)?;
                Ok(stored)
            }
            Err(err) => abort(err),
        }
    }

    /// Write a record that must not exist yet.
    pub fn create<T: Record + Clone>(&self, record: &T) -> TxnResult<T> {
        if self.tree.get(record.key().as_bytes())?.is_some() {
            return abort(WorkflowError::Conflict {
                entity: T::PREFIX,
                id: record.record_id().to_string(),
            });
        }
        self.save(record)
    }

    /// Claim a unique secondary index entry. Returns the id already holding it, if any.
    pub fn claim(&self, index: &str, value: &str, id: &str) -> TxnResult<Option<String>> {
        let key = format!("{index}/{value}");
        if let Some(holder) = self.tree.get(key.as_bytes())? {
            return Ok(Some(String::from_utf8_lossy(holder.as_ref()).into_owned()));
        }
        self.tree.insert(key.as_bytes(), id.as_bytes())?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
    struct Counter {
        #[n(0)]
        id: String,
        #[n(1)]
        value: u32,
        #[n(2)]
        version: u64,
    }

    impl Record for Counter {
        const PREFIX: &'static str = "counter";
        fn record_id(&self) -> &str {
            &self.id
        }
        fn version(&self) -> u64 {
            self.version
        }
        fn set_version(&mut self, version: u64) {
            self.version = version;
        }
    }

    fn store() -> (tempfile::TempDir, EntityStore) {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path().join("store.db")).unwrap();
        (dir, EntityStore::new(Arc::new(db)))
    }

    #[test]
    fn save_bumps_version() {
        let (_dir, store) = store();
        let counter = Counter {
            id: "a".into(),
            value: 1,
            version: 0,
        };

        let saved = store.commit(|txn| txn.create(&counter)).unwrap();
        assert_eq!(saved.version, 1);
        assert_eq!(store.get::<Counter>("a").unwrap(), saved);
    }

    #[test]
    fn stale_snapshot_is_a_conflict() {
        let (_dir, store) = store();
        let counter = Counter {
            id: "a".into(),
            value: 1,
            version: 0,
        };
        let snapshot = store.commit(|txn| txn.create(&counter)).unwrap();

        // someone else writes first
        store
            .commit(|txn| {
                let mut current = txn.recheck(&snapshot)?;
                current.value = 2;
                txn.save(&current)
            })
            .unwrap();

        let err = store
            .commit(|txn| {
                let mut current = txn.recheck(&snapshot)?;
                current.value = 3;
                txn.save(&current)
            })
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Conflict { .. }));
        assert_eq!(store.get::<Counter>("a").unwrap().value, 2);
    }

    #[test]
    fn aborted_commit_writes_nothing() {
        let (_dir, store) = store();
        let first = Counter {
            id: "a".into(),
            value: 1,
            version: 0,
        };

        let err = store
            .commit(|txn| {
                txn.create(&first)?;
                abort::<()>(WorkflowError::invalid("value", "boom"))
            })
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Invalid { .. }));
        assert!(store.find::<Counter>("a").unwrap().is_none());
    }

    #[test]
    fn claim_is_unique() {
        let (_dir, store) = store();
        let first = store.commit(|txn| txn.claim("plate", "29A-12345", "v1")).unwrap();
        let second = store.commit(|txn| txn.claim("plate", "29A-12345", "v2")).unwrap();

        assert_eq!(first, None);
        assert_eq!(second.as_deref(), Some("v1"));
        assert_eq!(store.lookup("plate", "29A-12345").unwrap().as_deref(), Some("v1"));
    }
}
