use devtest_core::{
    DevTest, DevTestDto, DevTestService, IdentityMap, Predicate, RepoError, Repository,
    StoreConfig, UnitOfWork,
};

fn dto(name: &str, clicks: i32) -> DevTestDto {
    DevTestDto {
        campaign_name: Some(name.to_string()),
        clicks: Some(clicks),
        ..DevTestDto::default()
    }
}

#[tokio::test]
async fn async_service_round_trip_matches_sync_behaviour() {
    let uow = UnitOfWork::open_async(&StoreConfig::in_memory())
        .await
        .unwrap();
    let service = DevTestService::new(&uow);

    let id = service.save_async(dto("spring", 3)).await.unwrap();
    let loaded = service.get_by_id_async(id).await.unwrap();
    assert_eq!(loaded.clicks, Some(3));
    assert_eq!(loaded.row_version, 1);

    let mut edited = loaded;
    edited.clicks = Some(4);
    assert_eq!(service.save_async(edited).await.unwrap(), id);
    assert_eq!(service.get_by_id(id).unwrap().clicks, Some(4));

    assert_eq!(service.list_all_async().await.unwrap().len(), 1);
    service.delete_async(id).await.unwrap();
    assert!(service.get_by_id_async(id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn async_repository_operations_stage_like_sync_ones() {
    let uow = UnitOfWork::open_async(&StoreConfig::in_memory())
        .await
        .unwrap();
    let repo = Repository::<DevTest>::new(&uow, &IdentityMap::new().with("DevTest", "id"));

    repo.insert_many_async(
        (0..6)
            .map(|i| DevTest {
                clicks: Some(i),
                ..DevTest::new("bulk")
            })
            .collect(),
    )
    .await
    .unwrap();
    assert_eq!(uow.save_async().await.unwrap(), 6);

    let page = repo
        .filter_paged_async(Predicate::always(), 1, 4)
        .await
        .unwrap();
    assert_eq!(page.total, 6);
    assert_eq!(page.items.len(), 2);

    let first = repo
        .first_or_default_async(Predicate::gt("clicks", 3_i64))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.clicks, Some(4));
    assert_eq!(repo.all().count_async().await.unwrap(), 6);
    assert_eq!(repo.filter(Predicate::lt("clicks", 2_i64)).load_async().await.unwrap().len(), 2);

    let staged = repo
        .delete_where_async(Predicate::lt("clicks", 2_i64))
        .await
        .unwrap();
    assert_eq!(staged, 2);
    repo.delete_async(&first).await.unwrap();
    assert_eq!(uow.save_async().await.unwrap(), 3);
    assert_eq!(repo.all().count().unwrap(), 3);

    let mut survivor = repo.all().first().unwrap().unwrap();
    survivor.campaign_name = Some("audited".to_string());
    repo.update_async(survivor.clone(), true).await.unwrap();
    uow.save_async().await.unwrap();
    let reloaded = repo.get_by_id_async(survivor.id).await.unwrap().unwrap();
    assert_eq!(reloaded.campaign_name.as_deref(), Some("audited"));

    assert!(repo.delete_by_id_async(9_999).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn async_calls_after_dispose_fail() {
    let uow = UnitOfWork::open_async(&StoreConfig::in_memory())
        .await
        .unwrap();
    uow.dispose();

    assert!(matches!(uow.save_async().await, Err(RepoError::Disposed)));
    let repo = Repository::<DevTest>::new(&uow, &IdentityMap::new());
    assert!(matches!(
        repo.insert_async(DevTest::new("late")).await,
        Err(RepoError::Disposed)
    ));
}

#[tokio::test]
async fn dispose_async_releases_the_session_once() {
    let config = StoreConfig::in_memory();
    let uow = UnitOfWork::open_async(&config).await.unwrap();
    let repo = Repository::<DevTest>::new(&uow, &IdentityMap::new());
    repo.insert_async(DevTest::new("discarded")).await.unwrap();

    uow.dispose_async().await;
    assert!(uow.is_disposed());
    uow.dispose_async().await;
    uow.dispose();

    assert!(matches!(uow.save_async().await, Err(RepoError::Disposed)));
    let reader = UnitOfWork::open_async(&config).await.unwrap();
    let count = Repository::<DevTest>::new(&reader, &IdentityMap::new())
        .all()
        .count_async()
        .await
        .unwrap();
    assert_eq!(count, 0);
}
