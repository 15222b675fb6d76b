use super::*;

fn general() -> Conversation {
    Conversation {
        last_read: Some(Ts::from("1700000000.000100")),
        latest_message: Some(Ts::from("1700000000.000200")),
        ..Conversation::new("C1", "general")
    }
}

fn direct() -> Conversation {
    Conversation {
        peer_user_id: Some(UserId::from("U2")),
        peer_presence: Presence::Active,
        ..Conversation::new("D1", "bob")
    }
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let store = SnapshotStore::new(MEMORY_URL).await.expect("db");
    store.health_check().await.expect("health check");
}

#[tokio::test]
async fn saved_conversations_replace_the_previous_set() {
    let store = SnapshotStore::new(MEMORY_URL).await.expect("db");
    let stale = Conversation::new("C9", "old-channel");
    store
        .save_conversations(&[stale])
        .await
        .expect("first save");
    store
        .save_conversations(&[direct(), general()])
        .await
        .expect("second save");

    let loaded = store.load_conversations().await.expect("load");
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0], general());
    assert_eq!(loaded[1].id, ConversationId::from("D1"));
    assert_eq!(loaded[1].peer_user_id, Some(UserId::from("U2")));
    assert_eq!(loaded[1].peer_presence, Presence::Unknown);
}

#[tokio::test]
async fn users_are_upserted() {
    let store = SnapshotStore::new(MEMORY_URL).await.expect("db");
    let alice = UserId::from("U1");
    let bob = UserId::from("U2");
    store
        .save_users([(&alice, "alice"), (&bob, "bob")])
        .await
        .expect("first save");
    store
        .save_users([(&alice, "Alice A.")])
        .await
        .expect("second save");

    let users = store.load_users().await.expect("load");
    assert_eq!(
        users,
        vec![(alice, "Alice A.".to_string()), (bob, "bob".to_string())]
    );
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("snapshot.db");

    let store = SnapshotStore::new(&db_path.to_string_lossy())
        .await
        .expect("db");
    store
        .save_conversations(&[general()])
        .await
        .expect("save");
    drop(store);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );

    let reopened = SnapshotStore::new(&db_path.to_string_lossy())
        .await
        .expect("reopen");
    assert_eq!(
        reopened.load_conversations().await.expect("load"),
        vec![general()]
    );
}

#[test]
fn bare_paths_become_sqlite_urls() {
    assert_eq!(normalize_database_url("sqlite::memory:"), MEMORY_URL);
    assert_eq!(
        normalize_database_url("/tmp/threadline/snapshot.db"),
        "sqlite:///tmp/threadline/snapshot.db"
    );
    assert_eq!(
        normalize_database_url("sqlite://cache.db?mode=rwc"),
        "sqlite://cache.db?mode=rwc"
    );
    assert_eq!(
        sqlite_path("sqlite:///tmp/threadline/snapshot.db?mode=rwc"),
        Some(PathBuf::from("/tmp/threadline/snapshot.db"))
    );
    assert_eq!(sqlite_path(MEMORY_URL), None);
}
