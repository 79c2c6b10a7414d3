use devtest_core::{
    ChangeNotifier, ControllerError, DataChanged, DevTestController, DevTestView, RepoError,
    StoreConfig,
};
use tempfile::TempDir;
use tokio::sync::broadcast::error::TryRecvError;

fn controller() -> (TempDir, DevTestController) {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::file(dir.path().join("devtest.db")).with_page_size(2);
    (dir, DevTestController::new(config, ChangeNotifier::new()))
}

fn view(name: &str, date: &str) -> DevTestView {
    DevTestView {
        campaign_name: Some(name.to_string()),
        date: date.to_string(),
        clicks: Some(10),
        ..DevTestView::default()
    }
}

#[tokio::test]
async fn save_persists_and_notifies_subscribers() {
    let (_dir, controller) = controller();
    let mut events = controller.notifier().subscribe();

    let id = controller.save(view("spring", "2024/03/09")).await.unwrap();

    assert_eq!(events.recv().await.unwrap(), DataChanged);
    let edited = controller.edit(id).await.unwrap();
    assert_eq!(edited.id, id);
    assert_eq!(edited.date, "2024/03/09");
    assert_eq!(edited.row_version, 1);
}

#[tokio::test]
async fn default_in_memory_store_keeps_rows_between_calls() {
    let controller = DevTestController::new(StoreConfig::default(), ChangeNotifier::new());

    let id = controller.save(view("spring", "2024/03/09")).await.unwrap();

    let listed = controller.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);
    assert_eq!(controller.edit(id).await.unwrap().campaign_name.as_deref(), Some("spring"));

    let isolated = DevTestController::new(StoreConfig::default(), ChangeNotifier::new());
    assert!(isolated.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn edit_round_trips_through_save() {
    let (_dir, controller) = controller();
    let id = controller.save(view("spring", "")).await.unwrap();

    let mut edited = controller.edit(id).await.unwrap();
    assert_eq!(edited.date, "");
    edited.clicks = Some(11);
    edited.date = "2024-12-31".to_string();
    assert_eq!(controller.save(edited).await.unwrap(), id);

    let listed = controller.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].clicks, Some(11));
    assert_eq!(listed[0].date, "2024/12/31");
}

#[tokio::test]
async fn delete_notifies_only_on_success() {
    let (_dir, controller) = controller();
    let id = controller.save(view("spring", "")).await.unwrap();
    let mut events = controller.notifier().subscribe();

    let err = controller.delete(id + 100).await.unwrap_err();
    assert!(matches!(err, ControllerError::Repo(RepoError::NotFound { .. })));
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

    controller.delete(id).await.unwrap();
    assert_eq!(events.recv().await.unwrap(), DataChanged);
    assert!(controller.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_date_is_rejected_without_writing() {
    let (_dir, controller) = controller();
    let mut events = controller.notifier().subscribe();

    let err = controller
        .save(view("spring", "not a date"))
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::InvalidDate(_)));
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    assert!(controller.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn page_uses_configured_page_size() {
    let (_dir, controller) = controller();
    for name in ["a", "b", "c"] {
        controller.save(view(name, "")).await.unwrap();
    }

    let page = controller.page(1).await.unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.page_size, 2);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].campaign_name.as_deref(), Some("c"));
}

#[test]
fn view_serializes_with_display_date() {
    let json = serde_json::to_value(view("spring", "2024/03/09")).unwrap();
    assert_eq!(json["date"], "2024/03/09");
    assert_eq!(json["campaign_name"], "spring");

    let parsed: DevTestView =
        serde_json::from_str(r#"{"campaign_name":"x","clicks":null,"conversions":null,"impressions":null,"affiliate_name":null}"#)
            .unwrap();
    assert_eq!(parsed.id, 0);
    assert_eq!(parsed.date, "");
}
