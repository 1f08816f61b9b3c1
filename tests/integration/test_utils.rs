//! Shared fixtures: an in-memory posts backend and the routers built on it.

use parking_lot::Mutex;
use query_router::{Mutation, NamespaceAllocator, Query, RouterDefinition, RouterInstance};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: u32,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiError(pub String);

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "api error: {}", self.0)
    }
}

/// Counts how often each operation reaches the backend.
pub struct PostsBackend {
    posts: Mutex<Vec<Post>>,
    list_calls: AtomicUsize,
}

impl PostsBackend {
    pub fn new(titles: &[&str]) -> Arc<Self> {
        let posts = titles
            .iter()
            .enumerate()
            .map(|(i, title)| Post {
                id: i as u32 + 1,
                title: title.to_string(),
            })
            .collect();
        Arc::new(PostsBackend {
            posts: Mutex::new(posts),
            list_calls: AtomicUsize::new(0),
        })
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn list(&self) -> Vec<Post> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.posts.lock().clone()
    }

    fn find(&self, id: u32) -> Result<Post, ApiError> {
        self.posts
            .lock()
            .iter()
            .find(|post| post.id == id)
            .cloned()
            .ok_or_else(|| ApiError(format!("post {} not found", id)))
    }

    fn add(&self, title: String) -> Result<Post, ApiError> {
        if title.is_empty() {
            return Err(ApiError("title is empty".to_string()));
        }
        let mut posts = self.posts.lock();
        let post = Post {
            id: posts.len() as u32 + 1,
            title,
        };
        posts.push(post.clone());
        Ok(post)
    }
}

/// `{ all, byId, add }` over `backend`.
pub fn posts_router(backend: &Arc<PostsBackend>, allocator: &NamespaceAllocator) -> RouterInstance {
    let list = Arc::clone(backend);
    let find = Arc::clone(backend);
    let add = Arc::clone(backend);

    RouterDefinition::new()
        .query(
            "all",
            Query::new(move |_: ()| {
                let posts = list.list();
                async move { Ok::<_, ApiError>(posts) }
            }),
        )
        .query(
            "byId",
            Query::new(move |id: u32| {
                let post = find.find(id);
                async move { post }
            }),
        )
        .mutation(
            "add",
            Mutation::new(move |title: String| {
                let post = add.add(title);
                async move { post }
            }),
        )
        .compose(allocator)
        .unwrap()
}

/// `{ fetchAll }` returning a fixed list, for namespacing checks.
pub fn fetch_all_router(items: &[&str], allocator: &NamespaceAllocator) -> RouterInstance {
    let items: Vec<String> = items.iter().map(|item| item.to_string()).collect();
    RouterDefinition::new()
        .query(
            "fetchAll",
            Query::new(move |_: ()| {
                let items = items.clone();
                async move { Ok::<_, ApiError>(items) }
            }),
        )
        .compose(allocator)
        .unwrap()
}
