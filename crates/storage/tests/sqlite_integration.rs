use storage::repository::KeyValueStore;
use storage::sqlite::SqliteRepository;

#[tokio::test]
async fn sqlite_roundtrip_and_overwrite() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_kv_roundtrip?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    assert_eq!(repo.get("timer:42:mc:7").await.unwrap(), None);

    repo.set("timer:42:mc:7", r#"{"remaining_seconds":600}"#)
        .await
        .unwrap();
    assert_eq!(
        repo.get("timer:42:mc:7").await.unwrap().as_deref(),
        Some(r#"{"remaining_seconds":600}"#)
    );

    // Last write wins, no merge.
    repo.set("timer:42:mc:7", r#"{"remaining_seconds":599}"#)
        .await
        .unwrap();
    assert_eq!(
        repo.get("timer:42:mc:7").await.unwrap().as_deref(),
        Some(r#"{"remaining_seconds":599}"#)
    );
}

#[tokio::test]
async fn sqlite_remove_and_prefix_listing() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_kv_listing?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    repo.set("completed:42:mc:7", "true").await.unwrap();
    repo.set("completed:42:fill:3", "true").await.unwrap();
    repo.set("retest:42:mc:7", "true").await.unwrap();

    let keys = repo.list_keys("completed:42:").await.unwrap();
    assert_eq!(keys, vec!["completed:42:fill:3", "completed:42:mc:7"]);

    repo.remove("completed:42:mc:7").await.unwrap();
    repo.remove("completed:42:mc:7").await.unwrap();
    assert_eq!(repo.get("completed:42:mc:7").await.unwrap(), None);

    let keys = repo.list_keys("completed:42:").await.unwrap();
    assert_eq!(keys, vec!["completed:42:fill:3"]);
}

#[tokio::test]
async fn sqlite_migrations_are_idempotent() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_kv_migrate?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("first migrate");
    repo.migrate().await.expect("second migrate");

    repo.set("answers:1:mc:1", "{}").await.unwrap();
    assert_eq!(
        repo.get("answers:1:mc:1").await.unwrap().as_deref(),
        Some("{}")
    );
}
