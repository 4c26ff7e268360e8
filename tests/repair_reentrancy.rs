mod common;

use common::{populate, snapshot, staging_dirs, FaultyEngine, Faults};
use dbrepair::{BackgroundOperations, Config, DatabaseName, Engine, LockManager, Repairer};
use std::{panic::AssertUnwindSafe, sync::Arc};
use test_log::test;

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| payload.downcast_ref::<&str>().map(ToString::to_string))
        .unwrap_or_default()
}

#[test]
fn repair_started_during_repair_panics() -> dbrepair::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = Config::new(folder.path());
    let engine = Arc::new(FaultyEngine::new(
        Engine::new(config.clone()),
        Faults::default(),
    ));
    let name = DatabaseName::new("shop")?;

    populate(engine.inner(), &name, 2, 20)?;
    let originals = snapshot(folder.path())?;

    let repairer = Arc::new(Repairer::new(
        config,
        engine.clone(),
        Arc::new(BackgroundOperations::default()),
    ));
    let locks = Arc::new(LockManager::default());

    {
        let repairer = repairer.clone();
        let locks = locks.clone();

        engine.on_insert(Arc::new(move || {
            let other = DatabaseName::new("other").expect("should be valid");
            let lock = locks.lock_exclusive(&other, &repairer.config().data_path);
            let _ = repairer.repair_database(&lock, "other", false, false);
        }));
    }

    let lock = locks.lock_exclusive(&name, folder.path());

    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        repairer.repair_database(&lock, "shop", false, false)
    }));

    let payload = result.expect_err("nested repair should panic");
    assert!(
        panic_message(&*payload).contains("a repair is already in progress"),
        "unexpected panic: {}",
        panic_message(&*payload),
    );

    assert!(!repairer.is_in_progress());
    assert!(staging_dirs(folder.path())?.is_empty());
    assert_eq!(originals, snapshot(folder.path())?);

    Ok(())
}
