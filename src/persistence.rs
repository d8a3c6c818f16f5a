use crate::model::{Contact, ContactId};
use crate::store::{ChangeSet, CommitOutcome, ContactFilter, ContactStore, Store};
use anyhow::{anyhow, Result};
use rocksdb::{checkpoint::Checkpoint, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use tracing::{debug, warn};

const CF_CONTACTS: &str = "contacts";
const CF_METADATA: &str = "metadata";

const KEY_NEXT_CONTACT_ID: &[u8] = b"next_contact_id";
const KEY_MANIFEST: &[u8] = b"manifest";

const STORAGE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StorageManifest {
    format_version: u32,
    app_version: String,
}

/// RocksDB-backed contact store.
///
/// Every contact is mirrored in an in-memory `Store` that serves reads;
/// commits are staged against the mirror, written as one `WriteBatch`, and
/// only then published to the mirror.
pub struct PersistentStore {
    inner: Store,
    db: DB,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PersistentOpenOptions {
    pub repair: bool,
}

impl PersistentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, PersistentOpenOptions::default())
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: PersistentOpenOptions,
    ) -> Result<Self> {
        if options.repair {
            repair_db(path.as_ref())?;
        }
        let db = open_db(path)?;
        validate_or_init_manifest(&db)?;

        let mut instance = Self {
            inner: Store::new(),
            db,
        };
        instance.load_contacts_into_store()?;
        if let Some(next_id) = load_metadata::<u64>(&instance.db, KEY_NEXT_CONTACT_ID)? {
            let next_id = next_id.max(instance.inner.next_contact_id());
            instance.inner.set_next_contact_id(next_id);
        }
        debug!(
            contacts = instance.inner.len(),
            next_id = instance.inner.next_contact_id(),
            "opened persistent contact store"
        );
        Ok(instance)
    }

    pub fn inner(&self) -> &Store {
        &self.inner
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    pub fn checkpoint(&self, path: impl AsRef<Path>) -> Result<()> {
        let checkpoint = Checkpoint::new(&self.db)?;
        checkpoint.create_checkpoint(path)?;
        Ok(())
    }

    fn load_contacts_into_store(&mut self) -> Result<()> {
        let contacts_cf = self
            .db
            .cf_handle(CF_CONTACTS)
            .ok_or_else(|| anyhow!("missing contacts column family"))?;
        for entry in self.db.iterator_cf(contacts_cf, IteratorMode::Start) {
            let (_key, value) = entry?;
            let contact: Contact = bincode::deserialize(&value)?;
            self.inner.insert_contact(contact)?;
        }
        Ok(())
    }
}

impl ContactStore for PersistentStore {
    fn find(&self, filter: &ContactFilter) -> Result<Vec<Contact>> {
        self.inner.find(filter)
    }

    fn get(&self, id: ContactId) -> Result<Option<Contact>> {
        self.inner.get(id)
    }

    fn commit(&mut self, changes: ChangeSet) -> Result<CommitOutcome> {
        if changes.is_empty() {
            return Ok(CommitOutcome::default());
        }
        let staged = self.inner.stage(&changes)?;

        let contacts_cf = self
            .db
            .cf_handle(CF_CONTACTS)
            .ok_or_else(|| anyhow!("missing contacts column family"))?;
        let metadata_cf = self
            .db
            .cf_handle(CF_METADATA)
            .ok_or_else(|| anyhow!("missing metadata column family"))?;

        let mut batch = WriteBatch::default();
        for contact in &staged.written {
            batch.put_cf(contacts_cf, contact_key(contact.id), bincode::serialize(contact)?);
        }
        batch.put_cf(
            metadata_cf,
            KEY_NEXT_CONTACT_ID,
            bincode::serialize(&staged.next_contact_id)?,
        );
        self.db.write(batch)?;

        let outcome = staged.outcome();
        self.inner.publish(staged);
        Ok(outcome)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn flush(&self) -> Result<()> {
        PersistentStore::flush(self)
    }

    fn checkpoint(&self, path: &Path) -> Result<()> {
        PersistentStore::checkpoint(self, path)
    }
}

impl Drop for PersistentStore {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!(error = %err, "failed to flush contact store on drop");
        }
    }
}

fn contact_key(id: ContactId) -> [u8; 8] {
    id.0.to_be_bytes()
}

fn open_db(path: impl AsRef<Path>) -> Result<DB> {
    let mut options = Options::default();
    options.create_if_missing(true);
    options.create_missing_column_families(true);
    options.set_paranoid_checks(true);
    let cfs = vec![
        ColumnFamilyDescriptor::new(CF_CONTACTS, Options::default()),
        ColumnFamilyDescriptor::new(CF_METADATA, Options::default()),
    ];
    Ok(DB::open_cf_descriptors(&options, path, cfs)?)
}

fn save_metadata<T: serde::Serialize>(db: &DB, key: &[u8], value: T) -> Result<()> {
    let metadata_cf = db
        .cf_handle(CF_METADATA)
        .ok_or_else(|| anyhow!("missing metadata column family"))?;
    let bytes = bincode::serialize(&value)?;
    db.put_cf(metadata_cf, key, bytes)?;
    Ok(())
}

fn repair_db(path: &Path) -> Result<()> {
    let mut options = Options::default();
    options.create_if_missing(true);
    DB::repair(&options, path)?;
    Ok(())
}

fn validate_or_init_manifest(db: &DB) -> Result<()> {
    if let Some(manifest) = load_metadata::<StorageManifest>(db, KEY_MANIFEST)? {
        if manifest.format_version != STORAGE_FORMAT_VERSION {
            return Err(anyhow!(
                "storage format version mismatch: expected {}, found {} (written by {})",
                STORAGE_FORMAT_VERSION,
                manifest.format_version,
                manifest.app_version
            ));
        }
        return Ok(());
    }

    let manifest = StorageManifest {
        format_version: STORAGE_FORMAT_VERSION,
        app_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    save_metadata(db, KEY_MANIFEST, &manifest)
}

fn load_metadata<T: serde::de::DeserializeOwned>(db: &DB, key: &[u8]) -> Result<Option<T>> {
    let metadata_cf = db
        .cf_handle(CF_METADATA)
        .ok_or_else(|| anyhow!("missing metadata column family"))?;
    if let Some(bytes) = db.get_cf(metadata_cf, key)? {
        Ok(Some(bincode::deserialize(&bytes)?))
    } else {
        Ok(None)
    }
}
