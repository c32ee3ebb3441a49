use std::sync::Arc;

use moka::future::Cache as MokaCache;

use crate::models::{Group, GroupId, Task, TaskId};
use crate::store::ContentStore;
use crate::util::api_util::APIError;
use crate::util::auto_fetch::{
    AutoCache, AutoCacheReadHandle, Expiration, PerValueExpiry,
};
use crate::util::stat::{fetch_scoreboard, Scoreboard};

type APICache<K, V> = AutoCache<
    K,
    V,
    Box<dyn Fn(K) -> AutoCacheReadHandle<V, APIError> + Send + Sync>,
    APIError,
>;

/// Read caches in front of the content store. Task and group records live
/// long and are invalidated explicitly by the admin surface; the
/// scoreboard snapshot is short-lived and additionally invalidated on
/// every scoring mutation.
pub struct Cache {
    pub task_cache: APICache<TaskId, Arc<Task>>,
    pub group_cache: APICache<GroupId, Arc<Group>>,
    stat: MokaCache<(), (Expiration, Arc<Scoreboard>)>,
    store: Arc<ContentStore>,
}

#[derive(Debug, serde::Serialize)]
pub struct CacheStatusResponse {
    task: (usize, usize),
    group: (usize, usize),
}

fn fetch_task(store: Arc<ContentStore>, task_id: TaskId) -> AutoCacheReadHandle<Arc<Task>, APIError> {
    tokio::spawn(async move {
        match store.fetch_task(task_id).await? {
            Some(task) => Ok((Arc::new(task), Expiration::Long)),
            None => Err(APIError::TaskNotFound),
        }
    })
}

fn fetch_group(
    store: Arc<ContentStore>,
    group_id: GroupId,
) -> AutoCacheReadHandle<Arc<Group>, APIError> {
    tokio::spawn(async move {
        match store.fetch_group(group_id).await? {
            Some(group) => Ok((Arc::new(group), Expiration::Long)),
            None => Err(APIError::GroupNotFound),
        }
    })
}

impl Cache {
    pub fn new(store: Arc<ContentStore>) -> Self {
        let fetch_closure_task = {
            let store = Arc::clone(&store);
            Box::new(move |key| fetch_task(Arc::clone(&store), key))
                as Box<dyn Fn(TaskId) -> AutoCacheReadHandle<Arc<Task>, APIError> + Send + Sync>
        };

        let fetch_closure_group = {
            let store = Arc::clone(&store);
            Box::new(move |key| fetch_group(Arc::clone(&store), key))
                as Box<dyn Fn(GroupId) -> AutoCacheReadHandle<Arc<Group>, APIError> + Send + Sync>
        };

        Self {
            task_cache: AutoCache::new(256, fetch_closure_task),
            group_cache: AutoCache::new(256, fetch_closure_group),
            stat: MokaCache::builder()
                .max_capacity(2)
                .expire_after(PerValueExpiry)
                .build(),
            store,
        }
    }

    pub fn get_size(&self) -> CacheStatusResponse {
        CacheStatusResponse {
            task: self.task_cache.size(),
            group: self.group_cache.size(),
        }
    }

    pub async fn get_task(&self, task_id: TaskId) -> Result<Arc<Task>, APIError> {
        self.task_cache.get(task_id).await
    }

    pub async fn get_group(&self, group_id: GroupId) -> Result<Arc<Group>, APIError> {
        self.group_cache.get(group_id).await
    }

    pub async fn invalidate_task(&self, task_id: TaskId) {
        self.task_cache.invalidate(task_id).await;
    }

    pub async fn invalidate_group(&self, group_id: GroupId) {
        self.group_cache.invalidate(group_id).await;
    }

    pub async fn scoreboard(&self) -> Result<Arc<Scoreboard>, APIError> {
        if let Some((_, data)) = self.stat.get(&()).await {
            return Ok(data);
        }
        let fresh = Arc::new(fetch_scoreboard(&self.store).await?);
        self.stat
            .get_with((), async { (Expiration::Short, fresh.clone()) })
            .await;
        Ok(fresh)
    }

    pub async fn invalidate_scoreboard(&self) {
        self.stat.invalidate(&()).await;
    }
}
