//! Query and mutation lifecycles through composed routers

use super::test_utils::{posts_router, ApiError, Post, PostsBackend};
use parking_lot::Mutex;
use query_router::{
    CacheEngine, MemoryEngine, MutationError, MutationOptions, NamespaceAllocator, QueryOptions,
    QueryStatus,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_missing_post_reaches_callbacks_and_engine() {
    let allocator = NamespaceAllocator::new();
    let backend = PostsBackend::new(&["only"]);
    let posts = posts_router(&backend, &allocator);
    let engine = MemoryEngine::new();
    let events = Arc::new(Mutex::new(Vec::new()));
    let on_error = Arc::clone(&events);
    let on_settled = Arc::clone(&events);

    let by_id = posts.query::<u32, Post, ApiError>("byId").unwrap();
    let state = by_id
        .invoke(
            &engine,
            42,
            QueryOptions::new()
                .on_error(move |error: &ApiError| on_error.lock().push(format!("error {}", error.0)))
                .on_settled(move |data: Option<&Post>, error: Option<&ApiError>| {
                    on_settled
                        .lock()
                        .push(format!("settled {} {}", data.is_some(), error.is_some()))
                }),
        )
        .await
        .unwrap();

    assert_eq!(state.status, QueryStatus::Error);
    assert_eq!(state.error.unwrap().0, "post 42 not found");
    assert_eq!(
        *events.lock(),
        vec![
            "error post 42 not found".to_string(),
            "settled false true".to_string()
        ]
    );
    let snapshot = engine.query_state(&by_id.key(&42).unwrap()).unwrap();
    assert_eq!(snapshot.error.unwrap().message(), "api error: post 42 not found");
}

#[tokio::test]
async fn test_cached_leaf_is_not_refetched_until_forced() {
    let allocator = NamespaceAllocator::new();
    let backend = PostsBackend::new(&["a", "b"]);
    let posts = posts_router(&backend, &allocator);
    let engine = MemoryEngine::new();
    let all = posts.query::<(), Vec<Post>, ApiError>("all").unwrap();

    all.invoke(&engine, (), QueryOptions::new()).await.unwrap();
    all.invoke(&engine, (), QueryOptions::new()).await.unwrap();
    assert_eq!(backend.list_calls(), 1);

    let refetched = all.refetch(&engine, (), QueryOptions::new()).await.unwrap();
    assert_eq!(backend.list_calls(), 2);
    assert_eq!(refetched.fetch_count, 2);

    all.invoke(&engine, (), QueryOptions::new().stale_time(Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(backend.list_calls(), 3);
}

#[tokio::test]
async fn test_disabled_query_reports_idle() {
    let allocator = NamespaceAllocator::new();
    let backend = PostsBackend::new(&["a"]);
    let posts = posts_router(&backend, &allocator);
    let engine = MemoryEngine::new();

    let state = posts
        .query::<(), Vec<Post>, ApiError>("all")
        .unwrap()
        .invoke(&engine, (), QueryOptions::new().enabled(false))
        .await
        .unwrap();

    assert!(state.is_idle());
    assert_eq!(state.data, None);
    assert_eq!(backend.list_calls(), 0);
}

#[tokio::test]
async fn test_mutation_callbacks_and_failure() {
    let allocator = NamespaceAllocator::new();
    let backend = PostsBackend::new(&[]);
    let posts = posts_router(&backend, &allocator);
    let engine: Arc<dyn CacheEngine> = Arc::new(MemoryEngine::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    let on_success = Arc::clone(&events);
    let on_error = Arc::clone(&events);
    let on_settled = Arc::clone(&events);

    let add = posts
        .mutation::<String, Post, ApiError>("add")
        .unwrap()
        .invoke(
            engine,
            MutationOptions::new()
                .on_success(move |post: &Post, title: &String| {
                    on_success.lock().push(format!("added {} as {}", title, post.id))
                })
                .on_error(move |error: &ApiError, title: &String| {
                    on_error.lock().push(format!("rejected '{}': {}", title, error.0))
                })
                .on_settled(move |_: Option<&Post>, _: Option<&ApiError>, _: &String| {
                    on_settled.lock().push("settled".to_string())
                }),
        );

    let post = add.mutate("hello".to_string()).await.unwrap();
    assert_eq!(post.title, "hello");

    match add.mutate(String::new()).await {
        Err(MutationError::Failed(error)) => assert_eq!(error.0, "title is empty"),
        other => panic!("unexpected outcome: {:?}", other.map(|post| post.id)),
    }
    assert_eq!(add.error().unwrap().0, "title is empty");

    assert_eq!(
        *events.lock(),
        vec![
            "added hello as 1".to_string(),
            "settled".to_string(),
            "rejected '': title is empty".to_string(),
            "settled".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_cancel_through_context_stops_fetch() {
    let allocator = NamespaceAllocator::new();
    let slow = query_router::RouterDefinition::new()
        .query(
            "never",
            query_router::Query::new(|_: ()| futures::future::pending::<Result<u32, ApiError>>()),
        )
        .compose(&allocator)
        .unwrap();
    let engine = Arc::new(MemoryEngine::new());
    let leaf = slow.query::<(), u32, ApiError>("never").unwrap();

    let task = tokio::spawn({
        let engine = Arc::clone(&engine);
        let leaf = Arc::clone(&leaf);
        async move { leaf.invoke(engine.as_ref(), (), QueryOptions::new()).await }
    });
    while engine.in_flight_len() == 0 {
        tokio::task::yield_now().await;
    }

    let context = slow.context(engine.clone());
    assert_eq!(context.cancel_all().await, 1);

    let outcome = task.await.unwrap();
    assert!(matches!(outcome, Err(query_router::CacheError::Cancelled(_))));
}
