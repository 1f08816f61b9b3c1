//! Context tree built from composed routers

use super::test_utils::{posts_router, ApiError, Post, PostsBackend};
use futures::channel::oneshot;
use parking_lot::Mutex;
use query_router::{
    CacheEngine, ContextNode, MemoryEngine, MutationOptions, NamespaceAllocator, Query,
    QueryFilters, QueryOptions, RouterDefinition, RouterError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn test_invalidate_after_mutation_refetches_only_that_leaf() {
    let allocator = NamespaceAllocator::new();
    let backend = PostsBackend::new(&["first"]);
    let posts = posts_router(&backend, &allocator);
    let root = RouterDefinition::new()
        .router("posts", posts)
        .compose(&allocator)
        .unwrap();
    let engine: Arc<dyn CacheEngine> = Arc::new(MemoryEngine::new());
    let posts = root.router("posts").unwrap();

    let all = posts.query::<(), Vec<Post>, ApiError>("all").unwrap();
    let by_id = posts.query::<u32, Post, ApiError>("byId").unwrap();
    let before = all.invoke(engine.as_ref(), (), QueryOptions::new()).await.unwrap();
    by_id.invoke(engine.as_ref(), 1, QueryOptions::new()).await.unwrap();
    assert_eq!(before.data.unwrap().len(), 1);

    let add = posts
        .mutation::<String, Post, ApiError>("add")
        .unwrap()
        .invoke(Arc::clone(&engine), MutationOptions::new());
    let added = add.mutate("second".to_string()).await.unwrap();
    assert_eq!(added.id, 2);

    let context = root.context(Arc::clone(&engine));
    let marked = context
        .router("posts")
        .unwrap()
        .scope("all")
        .unwrap()
        .invalidate(None)
        .await;
    assert_eq!(marked, 1);
    assert_eq!(context.router("posts").unwrap().scope("all").unwrap().prefix().to_string(), "0/all");

    let by_id_state = engine.query_state(&by_id.key(&1).unwrap()).unwrap();
    assert!(!by_id_state.invalidated);

    let after = all.invoke(engine.as_ref(), (), QueryOptions::new()).await.unwrap();
    assert_eq!(after.data.unwrap().len(), 2);
    assert_eq!(after.fetch_count, 2);
    assert_eq!(backend.list_calls(), 2);
}

#[test]
fn test_tree_shape_is_instance_shape_minus_mutations() {
    let allocator = NamespaceAllocator::new();
    let backend = PostsBackend::new(&[]);
    let root = RouterDefinition::new()
        .router("posts", posts_router(&backend, &allocator))
        .router(
            "admin",
            RouterDefinition::new()
                .router("posts", posts_router(&backend, &allocator))
                .compose(&allocator)
                .unwrap(),
        )
        .compose(&allocator)
        .unwrap();

    let context = root.context(Arc::new(MemoryEngine::new()));

    assert_eq!(context.names(), vec!["posts", "admin"]);
    let posts = context.router("posts").unwrap();
    assert_eq!(posts.names(), vec!["all", "byId"]);
    assert_eq!(root.router("posts").unwrap().names(), vec!["all", "byId", "add"]);

    let admin_posts = context.router("admin").unwrap().router("posts").unwrap();
    assert_eq!(admin_posts.namespace().get(), 1);
    assert!(matches!(admin_posts.get("byId"), Some(ContextNode::Query(_))));
    assert!(admin_posts.get("add").is_none());
    assert_eq!(context.scopes().len(), 4);
}

#[tokio::test]
async fn test_set_data_is_served_without_fetching() {
    let allocator = NamespaceAllocator::new();
    let backend = PostsBackend::new(&["from backend"]);
    let posts = posts_router(&backend, &allocator);
    let engine: Arc<dyn CacheEngine> = Arc::new(MemoryEngine::new());
    let context = posts.context(Arc::clone(&engine));

    let seeded = vec![Post {
        id: 9,
        title: "seeded".to_string(),
    }];
    let all = context.query::<(), Vec<Post>>("all").unwrap();
    assert_eq!(all.get_data(&()).unwrap(), None);
    all.set_data(&(), seeded.clone()).unwrap();
    assert_eq!(all.get_data(&()).unwrap(), Some(seeded.clone()));

    let state = posts
        .query::<(), Vec<Post>, ApiError>("all")
        .unwrap()
        .invoke(engine.as_ref(), (), QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(state.data, Some(seeded));
    assert_eq!(backend.list_calls(), 0);
}

#[tokio::test]
async fn test_filtered_invalidate_matches_partial_arguments() {
    #[derive(serde::Serialize, Clone)]
    struct Page {
        author: String,
        page: u32,
    }

    let allocator = NamespaceAllocator::new();
    let pages = RouterDefinition::new()
        .query(
            "page",
            query_router::Query::new(|page: Page| async move {
                Ok::<_, ApiError>(format!("{}:{}", page.author, page.page))
            }),
        )
        .compose(&allocator)
        .unwrap();
    let engine: Arc<dyn CacheEngine> = Arc::new(MemoryEngine::new());
    let leaf = pages.query::<Page, String, ApiError>("page").unwrap();
    for (author, page) in [("ann", 1), ("ann", 2), ("bob", 1)] {
        let args = Page {
            author: author.to_string(),
            page,
        };
        leaf.invoke(engine.as_ref(), args, QueryOptions::new()).await.unwrap();
    }

    let scope = pages.context(Arc::clone(&engine));
    let ann = QueryFilters::for_args(&serde_json::json!({ "author": "ann" })).unwrap();
    assert_eq!(scope.scope("page").unwrap().invalidate(Some(ann.clone())).await, 2);

    // Exact matching needs the whole argument value.
    assert_eq!(
        scope.scope("page").unwrap().invalidate(Some(ann.exact(true))).await,
        0
    );
}

#[test]
fn test_lookup_errors_name_the_problem() {
    let allocator = NamespaceAllocator::new();
    let backend = PostsBackend::new(&[]);
    let context = posts_router(&backend, &allocator).context(Arc::new(MemoryEngine::new()));

    assert!(matches!(
        context.query::<u32, String>("byId"),
        Err(RouterError::TypeMismatch { .. })
    ));
    assert!(matches!(
        context.router("all"),
        Err(RouterError::WrongRouteKind { .. })
    ));
    assert!(matches!(
        context.scope("missing"),
        Err(RouterError::RouteNotFound(_))
    ));
}

#[tokio::test]
async fn test_invalidate_while_list_is_loading_refetches_next_time() {
    let allocator = NamespaceAllocator::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let (release, gate) = oneshot::channel::<()>();
    let gate = Arc::new(Mutex::new(Some(gate)));
    let counter = Arc::clone(&calls);
    let list = Query::<(), usize, ApiError>::new(move |_: ()| {
        let loaded = counter.fetch_add(1, Ordering::SeqCst);
        let gate = gate.lock().take();
        async move {
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            Ok::<_, ApiError>(loaded)
        }
    });
    let posts = RouterDefinition::new()
        .query("all", list)
        .compose(&allocator)
        .unwrap();
    let memory = MemoryEngine::new();
    let engine: Arc<dyn CacheEngine> = Arc::new(memory.clone());
    let all = posts.query::<(), usize, ApiError>("all").unwrap();
    let context = posts.context(Arc::clone(&engine));

    let (first, marked) = futures::join!(
        all.invoke(engine.as_ref(), (), QueryOptions::new()),
        async {
            while memory.in_flight_len() == 0 {
                tokio::task::yield_now().await;
            }
            let marked = context.scope("all").unwrap().invalidate(None).await;
            release.send(()).unwrap();
            marked
        },
    );
    assert_eq!(marked, 1);
    assert_eq!(first.unwrap().data, Some(0));

    let second = all.invoke(engine.as_ref(), (), QueryOptions::new()).await.unwrap();
    assert_eq!(second.data, Some(1));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
