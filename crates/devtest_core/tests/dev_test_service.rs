use chrono::NaiveDate;
use devtest_core::{DevTestDto, DevTestService, RepoError, StoreConfig, UnitOfWork};

fn open_memory() -> UnitOfWork {
    UnitOfWork::open(&StoreConfig::in_memory()).unwrap()
}

fn dto(name: &str) -> DevTestDto {
    DevTestDto {
        campaign_name: Some(name.to_string()),
        date: NaiveDate::from_ymd_opt(2024, 5, 1).and_then(|day| day.and_hms_opt(8, 0, 0)),
        clicks: Some(120),
        conversions: Some(4),
        impressions: Some(9000),
        affiliate_name: Some("north".to_string()),
        ..DevTestDto::default()
    }
}

#[test]
fn save_new_then_get_returns_same_fields() {
    let uow = open_memory();
    let service = DevTestService::new(&uow);

    let input = dto("spring");
    let id = service.save(input.clone()).unwrap();
    assert!(id > 0);

    let loaded = service.get_by_id(id).unwrap();
    assert_eq!(loaded.id, id);
    assert_eq!(loaded.row_version, 1);
    assert_eq!(
        DevTestDto {
            id: 0,
            row_version: 0,
            ..loaded
        },
        input
    );
}

#[test]
fn save_existing_updates_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::file(dir.path().join("devtest.db"));

    let id = {
        let uow = UnitOfWork::open(&config).unwrap();
        let id = DevTestService::new(&uow).save(dto("spring")).unwrap();
        id
    };

    let uow = UnitOfWork::open(&config).unwrap();
    let service = DevTestService::new(&uow);
    let mut edited = service.get_by_id(id).unwrap();
    edited.clicks = Some(999);
    edited.affiliate_name = None;
    assert_eq!(service.save(edited).unwrap(), id);

    let reader = UnitOfWork::open(&config).unwrap();
    let stored = DevTestService::new(&reader).get_by_id(id).unwrap();
    assert_eq!(stored.clicks, Some(999));
    assert_eq!(stored.affiliate_name, None);
    assert_eq!(stored.row_version, 2);
    assert_eq!(DevTestService::new(&reader).list_all().unwrap().len(), 1);
}

#[test]
fn save_with_stale_version_conflicts() {
    let uow = open_memory();
    let service = DevTestService::new(&uow);
    let id = service.save(dto("spring")).unwrap();

    let mut first = service.get_by_id(id).unwrap();
    first.clicks = Some(1);
    service.save(first).unwrap();

    let stale = DevTestDto {
        id,
        row_version: 1,
        ..dto("late")
    };
    let err = service.save(stale).unwrap_err();
    assert!(err.is_concurrency_conflict());
    assert_eq!(service.get_by_id(id).unwrap().clicks, Some(1));
}

#[test]
fn delete_then_get_is_not_found() {
    let uow = open_memory();
    let service = DevTestService::new(&uow);
    let id = service.save(dto("spring")).unwrap();

    service.delete(id).unwrap();

    assert!(matches!(
        service.get_by_id(id),
        Err(RepoError::NotFound { entity: "DevTest", id: missing }) if missing == id
    ));
    assert!(service.list_all().unwrap().is_empty());
}

#[test]
fn delete_unknown_id_is_not_found() {
    let uow = open_memory();
    let err = DevTestService::new(&uow).delete(12).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn list_all_is_ordered_by_id() {
    let uow = open_memory();
    let service = DevTestService::new(&uow);
    let ids = ["a", "b", "c"]
        .into_iter()
        .map(|name| service.save(dto(name)).unwrap())
        .collect::<Vec<_>>();

    let listed = service
        .list_all()
        .unwrap()
        .into_iter()
        .map(|row| row.id)
        .collect::<Vec<_>>();
    assert_eq!(listed, ids);
}

#[test]
fn page_reports_total_and_slice() {
    let uow = open_memory();
    let service = DevTestService::new(&uow);
    for index in 0..5 {
        service.save(dto(&format!("c{index}"))).unwrap();
    }

    let page = service.page(2, 2).unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].campaign_name.as_deref(), Some("c4"));
}

#[test]
fn save_rejects_overlong_names() {
    let uow = open_memory();
    let service = DevTestService::new(&uow);

    let err = service
        .save(DevTestDto {
            affiliate_name: Some("a".repeat(300)),
            ..dto("spring")
        })
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));
    assert!(service.list_all().unwrap().is_empty());
}
