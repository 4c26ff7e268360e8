mod common;

use common::{dir_size, populate};
use dbrepair::{
    storage::{Database, StorageEngine},
    BackgroundOperations, CollectionOptions, Config, DataFileSet, DatabaseName, Document,
    Engine, LockManager, Repairer,
};
use std::{io::Write, sync::Arc};
use test_log::test;

#[test]
fn repair_drops_torn_tail() -> dbrepair::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = Config::new(folder.path());
    let name = DatabaseName::new("shop")?;

    {
        let engine = Engine::new(config.clone());
        populate(&engine, &name, 2, 50)?;
    }

    let files = DataFileSet::new(&config, folder.path(), &name);
    let last = files.data_file_path(0);
    let clean_len = std::fs::metadata(&last)?.len();

    {
        let mut file = std::fs::OpenOptions::new().append(true).open(&last)?;
        file.write_all(&[0, 0, 0, 0, 1, 0, 0, 0xFF, 0xFF, 1, 2, 3])?;
        file.sync_all()?;
    }

    let engine = Arc::new(Engine::new(config.clone()));
    let expected = engine
        .get(&name, folder.path())?
        .expect("should exist")
        .find("shop.coll1")?;

    let repairer = Repairer::new(config, engine.clone(), Arc::new(BackgroundOperations::default()));
    let locks = LockManager::default();
    let lock = locks.lock_exclusive(&name, folder.path());

    repairer.repair_database(&lock, "shop", false, false)?;

    assert!(std::fs::metadata(&last)?.len() < clean_len);

    let db = engine.get(&name, folder.path())?.expect("should exist");
    assert_eq!(expected, db.find("shop.coll1")?);

    Ok(())
}

#[test]
fn repair_reclaims_removed_records() -> dbrepair::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = Config::new(folder.path()).data_file_size(4_096);
    let engine = Arc::new(Engine::new(config.clone()));
    let name = DatabaseName::new("shop")?;

    {
        let db = engine.open_or_create(&name)?;
        db.create_collection("shop.items", &CollectionOptions::default())?;

        let mut locations = vec![];
        for i in 0..500 {
            locations.push(db.insert(
                "shop.items",
                &Document::new().with("i", i).with("pad", "x".repeat(50)),
            )?);
        }

        for location in locations.into_iter().skip(10) {
            db.remove("shop.items", location)?;
        }
    }

    let files = DataFileSet::new(&config, folder.path(), &name);
    assert!(files.data_file_path(5).try_exists()?);
    let size_before = dir_size(folder.path())?;

    let repairer = Repairer::new(config, engine.clone(), Arc::new(BackgroundOperations::default()));
    let locks = LockManager::default();
    let lock = locks.lock_exclusive(&name, folder.path());

    repairer.repair_database(&lock, "shop", false, false)?;

    assert!(!files.data_file_path(1).try_exists()?);
    assert!(dir_size(folder.path())? < size_before / 10);

    let db = engine.get(&name, folder.path())?.expect("should exist");
    assert_eq!(10, db.count("shop.items")?);

    let locations = db.scan("shop.items")?.collect::<Vec<_>>();
    assert!(locations.iter().all(|location| location.file == 0));

    Ok(())
}

#[test]
fn repair_keeps_capped_collections() -> dbrepair::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = Config::new(folder.path());
    let engine = Arc::new(Engine::new(config.clone()));
    let name = DatabaseName::new("shop")?;

    let options = CollectionOptions::capped(10_000, Some(5));

    {
        let db = engine.open_or_create(&name)?;
        db.create_collection("shop.log", &options)?;

        for i in 0..20 {
            db.insert("shop.log", &Document::new().with("i", i))?;
        }
    }

    let repairer = Repairer::new(config, engine.clone(), Arc::new(BackgroundOperations::default()));
    let locks = LockManager::default();
    let lock = locks.lock_exclusive(&name, folder.path());

    repairer.repair_database(&lock, "shop", false, false)?;

    let db = engine.get(&name, folder.path())?.expect("should exist");
    assert_eq!(
        (15..20).map(|i| Document::new().with("i", i)).collect::<Vec<_>>(),
        db.find("shop.log")?
    );

    let (_, stored) = db
        .namespaces()?
        .into_iter()
        .find(|(ns, _)| ns == "shop.log")
        .expect("should exist");
    assert_eq!(options, CollectionOptions::parse(&stored)?);

    Ok(())
}
