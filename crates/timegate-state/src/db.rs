use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;

use timegate_core::authority::AuthorityConfig;
use timegate_core::error::TimegateError;
use timegate_core::operation::OperationRecord;
use timegate_core::types::{Address, Nonce, OperationId};
use timegate_core::unit::{DeployedUnit, ImplementationUnit};

const AUTHORITY_KEY: &[u8] = b"authority";

fn storage_err(e: sled::Error) -> TimegateError {
    TimegateError::Storage(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, TimegateError> {
    bincode::serialize(value).map_err(|e| TimegateError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TimegateError> {
    bincode::deserialize(bytes).map_err(|e| TimegateError::Serialization(e.to_string()))
}

/// All state changes one call makes, committed together by
/// [`AuthorityDb::commit`].
#[derive(Default, Debug)]
pub struct StagedMutations {
    pub operations: Vec<OperationRecord>,
    /// Ids dropped under `CancelPolicy::AllowReuse`.
    pub removed_operations: Vec<OperationId>,
    pub units: Vec<DeployedUnit>,
    pub implementations: Vec<ImplementationUnit>,
    pub nonce: Option<(Address, Nonce)>,
    pub authority: Option<AuthorityConfig>,
}

/// Persistent authority database backed by sled.
///
/// Named trees:
///   operations      : OperationId bytes → bincode(OperationRecord)
///   units           : Address bytes     → bincode(DeployedUnit)
///   implementations : Address bytes     → bincode(ImplementationUnit)
///   nonces          : Address bytes     → u64 big-endian
///   meta            : utf8 key bytes    → bincode(AuthorityConfig)
pub struct AuthorityDb {
    db: sled::Db,
    operations: sled::Tree,
    units: sled::Tree,
    implementations: sled::Tree,
    nonces: sled::Tree,
    meta: sled::Tree,
}

impl AuthorityDb {
    /// Open or create the authority database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TimegateError> {
        let db = sled::open(path).map_err(storage_err)?;
        let operations      = db.open_tree("operations").map_err(storage_err)?;
        let units           = db.open_tree("units").map_err(storage_err)?;
        let implementations = db.open_tree("implementations").map_err(storage_err)?;
        let nonces          = db.open_tree("nonces").map_err(storage_err)?;
        let meta            = db.open_tree("meta").map_err(storage_err)?;
        Ok(Self { db, operations, units, implementations, nonces, meta })
    }

    fn get<T: DeserializeOwned>(tree: &sled::Tree, key: &[u8]) -> Result<Option<T>, TimegateError> {
        match tree.get(key).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    // ── Authority ────────────────────────────────────────────────────────────

    pub fn get_authority(&self) -> Result<Option<AuthorityConfig>, TimegateError> {
        Self::get(&self.meta, AUTHORITY_KEY)
    }

    /// Write the authority config outside of a call. Only genesis does this.
    pub fn put_authority(&self, config: &AuthorityConfig) -> Result<(), TimegateError> {
        self.meta.insert(AUTHORITY_KEY, encode(config)?).map_err(storage_err)?;
        Ok(())
    }

    // ── Operations ───────────────────────────────────────────────────────────

    pub fn get_operation(&self, id: &OperationId) -> Result<Option<OperationRecord>, TimegateError> {
        Self::get(&self.operations, id.as_bytes())
    }

    pub fn iter_operations(&self) -> Result<Vec<OperationRecord>, TimegateError> {
        let mut out = Vec::new();
        for item in self.operations.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    // ── Units ────────────────────────────────────────────────────────────────

    pub fn get_unit(&self, address: &Address) -> Result<Option<DeployedUnit>, TimegateError> {
        Self::get(&self.units, address.as_bytes())
    }

    pub fn get_implementation(
        &self,
        address: &Address,
    ) -> Result<Option<ImplementationUnit>, TimegateError> {
        Self::get(&self.implementations, address.as_bytes())
    }

    pub fn iter_implementations(&self) -> Result<Vec<ImplementationUnit>, TimegateError> {
        let mut out = Vec::new();
        for item in self.implementations.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    // ── Nonces ───────────────────────────────────────────────────────────────

    pub fn get_nonce(&self, address: &Address) -> Result<Nonce, TimegateError> {
        match self.nonces.get(address.as_bytes()).map_err(storage_err)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| TimegateError::Serialization("corrupt nonce entry".into()))?;
                Ok(u64::from_be_bytes(arr))
            }
            None => Ok(0),
        }
    }

    // ── Commit ───────────────────────────────────────────────────────────────

    /// Apply every staged write in one multi-tree transaction, then flush.
    /// Either all of them become durable or none do.
    pub fn commit(&self, staged: &StagedMutations) -> Result<(), TimegateError> {
        // Encode up front: the transaction closure may be retried on conflict.
        let ops: Vec<(OperationId, Vec<u8>)> = staged
            .operations
            .iter()
            .map(|r| Ok((r.id, encode(r)?)))
            .collect::<Result<_, TimegateError>>()?;
        let units: Vec<(Address, Vec<u8>)> = staged
            .units
            .iter()
            .map(|u| Ok((u.address, encode(u)?)))
            .collect::<Result<_, TimegateError>>()?;
        let impls: Vec<(Address, Vec<u8>)> = staged
            .implementations
            .iter()
            .map(|i| Ok((i.address, encode(i)?)))
            .collect::<Result<_, TimegateError>>()?;
        let authority = staged.authority.as_ref().map(encode).transpose()?;

        (&self.operations, &self.units, &self.implementations, &self.nonces, &self.meta)
            .transaction(|(op_tree, unit_tree, impl_tree, nonce_tree, meta_tree)| {
                for (id, bytes) in &ops {
                    op_tree.insert(&id.as_bytes()[..], bytes.as_slice())?;
                }
                for id in &staged.removed_operations {
                    op_tree.remove(&id.as_bytes()[..])?;
                }
                for (addr, bytes) in &units {
                    unit_tree.insert(&addr.as_bytes()[..], bytes.as_slice())?;
                }
                for (addr, bytes) in &impls {
                    impl_tree.insert(&addr.as_bytes()[..], bytes.as_slice())?;
                }
                if let Some((addr, nonce)) = &staged.nonce {
                    nonce_tree.insert(&addr.as_bytes()[..], &nonce.to_be_bytes()[..])?;
                }
                if let Some(bytes) = &authority {
                    meta_tree.insert(AUTHORITY_KEY, bytes.as_slice())?;
                }
                Ok::<(), ConflictableTransactionError<TimegateError>>(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(inner) => inner,
                TransactionError::Storage(se) => storage_err(se),
            })?;

        self.flush()
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), TimegateError> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }
}
