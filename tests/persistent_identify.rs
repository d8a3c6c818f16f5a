use identirust::config::{IdentirustConfig, StorageConfig};
use identirust::test_support::{check_cluster_invariants, seeded_store};
use identirust::{ContactId, Identirust, PersistentStore};
use tempfile::tempdir;

fn persistent_config(path: &std::path::Path) -> IdentirustConfig {
    IdentirustConfig {
        storage: StorageConfig {
            data_dir: Some(path.to_path_buf()),
            repair: false,
        },
        ..IdentirustConfig::default()
    }
}

#[test]
fn clusters_survive_restart() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = persistent_config(dir.path());

    let merged = {
        let identirust = Identirust::open(&config)?;
        identirust.identify(Some("doc@hillvalley.edu"), None)?;
        identirust.identify(None, Some("1985"))?;
        let merged = identirust.identify(Some("doc@hillvalley.edu"), Some("1985"))?;
        identirust.flush()?;
        merged
    };
    assert_eq!(merged.primary_contact_id, ContactId(1));
    assert_eq!(merged.secondary_contact_ids, vec![ContactId(2)]);

    let identirust = Identirust::open(&config)?;
    assert_eq!(identirust.contact_count(), 2);
    assert_eq!(identirust.identify(None, Some("1985"))?, merged);

    // Ids keep counting from where the previous run stopped.
    let view = identirust.identify(Some("marty@hillvalley.edu"), Some("1985"))?;
    assert_eq!(view.secondary_contact_ids, vec![ContactId(2), ContactId(3)]);

    let snapshot = seeded_store(identirust.contacts()?);
    assert_eq!(check_cluster_invariants(&snapshot)?, 1);
    Ok(())
}

#[test]
fn checkpoint_restores_into_a_new_store() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let backup_parent = tempdir()?;
    let backup = backup_parent.path().join("backup");

    let identirust = Identirust::with_store(PersistentStore::open(dir.path())?);
    let view = identirust.identify(Some("a"), Some("1"))?;
    identirust.checkpoint(&backup)?;

    let restored = Identirust::with_store(PersistentStore::open(&backup)?);
    assert_eq!(restored.identify(Some("a"), None)?, view);
    assert_eq!(restored.contact_count(), 1);
    Ok(())
}

#[test]
fn in_memory_store_cannot_checkpoint() {
    let dir = tempdir().unwrap();
    let identirust = Identirust::new();
    assert!(identirust.checkpoint(&dir.path().join("backup")).is_err());
}
