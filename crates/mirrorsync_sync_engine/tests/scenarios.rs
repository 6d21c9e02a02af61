//! End-to-end tests of the sync engine against the in-memory server.

use mirrorsync_core::{Context, EntityFilter};
use mirrorsync_protocol::{EntityId, OperationKind};
use mirrorsync_sync_engine::{
    ConnectivityMonitor, LiveChannel, PassOutcome, RecoveryTarget, Repository, RetryConfig,
    Scheduler, SyncConfig, SyncEngine, TokioScheduler, DEFAULT_PAGE_SIZE,
};
use mirrorsync_testkit::prelude::*;
use proptest::prelude::*;
use serde_json::Value;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TOKEN: &str = "u1";

fn client() -> Arc<Context> {
    let ctx = Arc::new(Context::open_in_memory().unwrap());
    ctx.set_credential(TOKEN);
    ctx
}

fn price(entity: &mirrorsync_protocol::Entity) -> Option<i64> {
    entity.field("price").and_then(Value::as_i64)
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn offline_create_syncs_when_network_returns() {
    let ctx = client();
    let remote = Arc::new(MemoryRemote::new());
    remote.set_offline(true);

    let monitor = Arc::new(ConnectivityMonitor::new(false));
    let engine = Arc::new(SyncEngine::new(Arc::clone(&ctx), Arc::clone(&remote)));
    let scheduler = Arc::new(TokioScheduler::start(engine.clone(), RetryConfig::new()).unwrap());
    monitor.register(scheduler.clone() as Arc<dyn RecoveryTarget>);

    let repo = Repository::new(Arc::clone(&ctx))
        .with_scheduler(scheduler.clone() as Arc<dyn Scheduler>)
        .with_connectivity(Arc::clone(&monitor));
    let created = repo.create(game("Half-Life", 10).fields).unwrap();
    assert!(created.id.is_temporary());
    assert!(created.needs_sync);
    let queued = ctx.queue().all_ordered();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].kind, OperationKind::Create);

    // The startup pass fails against the unreachable server and backs off.
    wait_for(|| scheduler.passes_run() >= 1).await;
    assert_eq!(ctx.queue().len(), 1);

    remote.set_offline(false);
    monitor.report(true);
    wait_for(|| ctx.queue().is_empty()).await;
    wait_for(|| scheduler.passes_run() == 2).await;

    let synced = repo.list(&EntityFilter::new());
    assert_eq!(synced.len(), 1);
    assert!(!synced[0].id.is_temporary());
    assert_eq!(synced[0].version, 1);
    assert!(!synced[0].needs_sync);
    assert!(repo.get(&created.id).is_none());
    assert_eq!(remote.entities().len(), 1);

    scheduler.shutdown().await;
}

#[test]
fn concurrent_edits_resolve_to_server_copy() {
    let remote = Arc::new(MemoryRemote::new());
    let alice = client();
    let bob = client();
    let alice_engine = SyncEngine::new(Arc::clone(&alice), Arc::clone(&remote));
    let bob_engine = SyncEngine::new(Arc::clone(&bob), Arc::clone(&remote));
    let alice_repo = Repository::new(Arc::clone(&alice));
    let bob_repo = Repository::new(Arc::clone(&bob));

    alice_repo.create(game("Portal", 10).fields).unwrap();
    assert_eq!(alice_engine.run_pass().synced, 1);
    bob_repo.refresh(&*remote, DEFAULT_PAGE_SIZE).unwrap();

    let id = alice.store().list(&EntityFilter::new())[0].id.clone();
    let mut a = alice_repo.get(&id).unwrap();
    a.set_field("price", 20);
    alice_repo.update(a).unwrap();
    let mut b = bob_repo.get(&id).unwrap();
    b.set_field("price", 30);
    bob_repo.update(b).unwrap();

    assert_eq!(alice_engine.run_pass().synced, 1);
    assert_eq!(remote.entity(&id).unwrap().version, 2);

    remote.clear_calls();
    let result = bob_engine.run_pass();
    assert_eq!(result.outcome, PassOutcome::Succeeded);
    assert_eq!(result.conflicts_resolved, 1);
    assert_eq!(
        remote.calls(),
        vec![
            RemoteCall::Update {
                id: id.clone(),
                base_version: 1
            },
            RemoteCall::Read { id: id.clone() },
        ]
    );

    let resolved = bob_repo.get(&id).unwrap();
    assert_eq!(resolved.version, 2);
    assert_eq!(price(&resolved), Some(20));
    assert!(!resolved.needs_sync);
    assert!(bob.queue().is_empty());
}

#[tokio::test]
async fn live_update_supersedes_queued_edit() {
    let ctx = client();
    let connector = MemoryPushConnector::new();
    let remote = Arc::new(MemoryRemote::with_push(connector.clone()));
    let server = remote.seed(synced_game("g1", 2, TOKEN, "Portal", 10));
    ctx.store().upsert(server.clone()).unwrap();
    edit_offline(&ctx, &server.id, |e| {
        e.set_field("price", 12);
    });

    let config = SyncConfig::new("http://test/api/games", "ws://test");
    let channel = LiveChannel::new(Arc::clone(&ctx), Arc::new(connector.clone()), &config).unwrap();
    channel.connect().unwrap();
    wait_for(|| connector.authorized_tokens() == vec![TOKEN.to_string()]).await;

    remote.edit_as(TOKEN, &server.id, |e| {
        e.set_field("price", 50);
    });
    wait_for(|| ctx.store().get(&server.id).map(|e| e.version) == Some(3)).await;

    let local = ctx.store().get(&server.id).unwrap();
    assert!(!local.needs_sync);
    assert_eq!(price(&local), Some(50));
    assert_eq!(ctx.queue().len(), 1);

    let engine = SyncEngine::new(Arc::clone(&ctx), Arc::clone(&remote));
    let result = engine.run_pass();
    assert_eq!(result.dropped, 1);
    assert_eq!(result.synced, 0);
    assert_eq!(remote.call_count(), 0);
    assert!(ctx.queue().is_empty());
    assert_eq!(price(&ctx.store().get(&server.id).unwrap()), Some(50));

    channel.disconnect();
}

#[test]
fn edit_racing_create_is_sent_after_it() {
    let ctx = client();
    let remote = Arc::new(MemoryRemote::new());
    let id = create_offline(&ctx, game("Celeste", 20));

    let fired = Arc::new(AtomicBool::new(false));
    let hook_ctx = Arc::clone(&ctx);
    let hook_id = id.clone();
    let hook_fired = Arc::clone(&fired);
    remote.on_call(move |call| {
        if *call == RemoteCall::Create && !hook_fired.swap(true, Ordering::SeqCst) {
            edit_offline(&hook_ctx, &hook_id, |e| {
                e.set_field("price", 25);
            });
        }
    });

    let engine = SyncEngine::new(Arc::clone(&ctx), Arc::clone(&remote));
    engine.run_pass();
    let server_id = EntityId::new("srv-1");
    let local = ctx.store().get(&server_id).unwrap();
    assert!(local.needs_sync);
    assert_eq!(price(&local), Some(25));
    let ops = ctx.queue().all_ordered();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].kind, OperationKind::Update);
    assert_eq!(ops[0].entity_id, server_id);

    engine.run_pass();
    assert_eq!(
        remote.calls(),
        vec![
            RemoteCall::Create,
            RemoteCall::Update {
                id: server_id.clone(),
                base_version: 1
            },
        ]
    );
    let stored = remote.entity(&server_id).unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(price(&stored), Some(25));
    assert!(ctx.queue().is_empty());
}

#[test]
fn repeated_passes_are_idempotent() {
    let ctx = client();
    let remote = Arc::new(MemoryRemote::new());
    let repo = Repository::new(Arc::clone(&ctx));
    let engine = SyncEngine::new(Arc::clone(&ctx), Arc::clone(&remote));

    for i in 0..3 {
        repo.create(game(&format!("Game {i}"), i).fields).unwrap();
    }
    assert_eq!(engine.run_pass().synced, 3);
    let after_first = repo.list(&EntityFilter::new());
    let calls = remote.call_count();

    let second = engine.run_pass();
    assert_eq!(second.outcome, PassOutcome::Succeeded);
    assert_eq!(second.synced, 0);
    assert_eq!(remote.call_count(), calls);
    assert_eq!(repo.list(&EntityFilter::new()), after_first);
}

#[tokio::test]
async fn repeated_online_reports_trigger_one_pass() {
    let ctx = client();
    let remote = Arc::new(MemoryRemote::new());
    let engine = Arc::new(SyncEngine::new(Arc::clone(&ctx), Arc::clone(&remote)));
    let scheduler = Arc::new(TokioScheduler::start(engine, RetryConfig::immediate()).unwrap());
    let monitor = ConnectivityMonitor::new(false);
    monitor.register(scheduler.clone() as Arc<dyn RecoveryTarget>);
    wait_for(|| scheduler.passes_run() == 1).await;

    monitor.report(true);
    wait_for(|| scheduler.passes_run() == 2).await;
    for _ in 0..5 {
        monitor.report(true);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(monitor.recoveries(), 1);
    assert_eq!(scheduler.passes_run(), 2);
    scheduler.shutdown().await;
}

#[test]
fn queued_work_survives_restart_and_torn_tail() {
    let test_ctx = TestContext::file();
    test_ctx.set_credential(TOKEN);
    let repo = Repository::new(Arc::clone(&test_ctx.ctx));
    let created = repo.create(game("Outer Wilds", 25).fields).unwrap();
    drop(repo);

    let journal = test_ctx.path().unwrap().join("journal.log");
    let mut file = std::fs::OpenOptions::new().append(true).open(&journal).unwrap();
    file.write_all(&mirrorsync_core::journal::JOURNAL_MAGIC).unwrap();
    file.write_all(&[1, 0]).unwrap();
    drop(file);

    let test_ctx = test_ctx.reopen();
    assert_eq!(test_ctx.store().get(&created.id), Some(created.clone()));
    let ops = test_ctx.queue().all_ordered();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].kind, OperationKind::Create);

    // Credentials are session state and are not persisted.
    assert!(test_ctx.credential().is_none());
    test_ctx.set_credential(TOKEN);
    let remote = Arc::new(MemoryRemote::new());
    let engine = SyncEngine::new(Arc::clone(&test_ctx.ctx), Arc::clone(&remote));
    assert_eq!(engine.run_pass().synced, 1);
    drop(engine);

    let test_ctx = test_ctx.reopen();
    assert!(test_ctx.queue().is_empty());
    let stored = test_ctx.store().list(&EntityFilter::new());
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].needs_sync);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn clean_pass_leaves_mirror_matching_server(edits in local_edits_strategy(20)) {
        let ctx = client();
        let remote = Arc::new(MemoryRemote::new());
        let repo = Repository::new(Arc::clone(&ctx));

        for edit in edits {
            let existing = repo.list(&EntityFilter::new());
            match edit {
                LocalEdit::Create(fields) => {
                    repo.create(fields).unwrap();
                }
                LocalEdit::Reprice(n, new_price) if !existing.is_empty() => {
                    let mut entity = existing[n % existing.len()].clone();
                    entity.set_field("price", new_price);
                    repo.update(entity).unwrap();
                }
                LocalEdit::Delete(n) if !existing.is_empty() => {
                    repo.delete(&existing[n % existing.len()].id).unwrap();
                }
                _ => {}
            }
        }

        let engine = SyncEngine::new(Arc::clone(&ctx), Arc::clone(&remote));
        let result = engine.run_pass();
        prop_assert_eq!(result.failed, 0);
        prop_assert!(ctx.queue().is_empty());

        for local in repo.list(&EntityFilter::new()) {
            prop_assert!(!local.needs_sync);
            prop_assert!(!local.id.is_temporary());
            let server = remote.entity(&local.id);
            prop_assert!(server.is_some());
            prop_assert_eq!(&server.unwrap().fields, &local.fields);
        }
    }
}
