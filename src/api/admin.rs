//! Administrative operations on tasks, groups, teams and generation
//! configs. Validation happens before any mutation; the store is never
//! left partially updated. Authorization is the transport's concern.

use std::collections::{BTreeSet, HashSet};

use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::hierarchy::{self, MAX_GROUP_DEPTH};
use crate::models::{
    FlagSpec, Group, GroupId, Hint, Seed, Task, TaskId, Team, ROOT_GROUP,
};
use crate::store::is_safe_name;
use crate::util::api_util::{APIError, APIRequest};
use crate::util::cipher_util::is_hint_hexid;
use crate::App;

#[derive(Debug, Deserialize)]
pub struct TaskUpsertRequest {
    /// Absent allocates a fresh id; present replaces the whole record.
    pub id: Option<TaskId>,
    pub title: String,
    pub text: String,
    pub value: i64,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub flags: Vec<FlagSpec>,
    #[serde(default)]
    pub group: GroupId,
    #[serde(default)]
    pub order: i32,
    pub seed: Seed,
    #[serde(default)]
    pub hints: Vec<Hint>,
}

impl APIRequest for TaskUpsertRequest {
    fn ok(&self) -> bool {
        !self.title.is_empty()
            && self.value >= 0
            && self.group >= ROOT_GROUP
            && self.id.map_or(true, |id| id > 0)
    }
}

fn validate_task(request: &TaskUpsertRequest) -> Result<(), APIError> {
    let mut seen = HashSet::new();
    for hint in &request.hints {
        if !is_hint_hexid(&hint.hexid) {
            return Err(APIError::Validation(format!(
                "hint id {:?} is not 32 lowercase hex characters",
                hint.hexid
            )));
        }
        if !seen.insert(hint.hexid.as_str()) {
            return Err(APIError::Validation(format!(
                "duplicate hint id {:?}",
                hint.hexid
            )));
        }
        if hint.cost < 0 {
            return Err(APIError::Validation(format!(
                "hint {:?} has negative cost",
                hint.hexid
            )));
        }
    }
    for flag in &request.flags {
        if let FlagSpec::Regex(pattern) = flag {
            Regex::new(pattern)
                .map_err(|e| APIError::Validation(format!("bad flag pattern: {e}")))?;
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct TaskUpsertResponse {
    pub task_id: TaskId,
}

pub async fn create_or_update_task(
    app: &App,
    request: &TaskUpsertRequest,
) -> Result<TaskUpsertResponse, APIError> {
    request.sanity()?;
    validate_task(request)?;
    if request.group != ROOT_GROUP && !app.store.group_exists(request.group).await {
        return Err(APIError::GroupNotFound);
    }

    let task_id = match request.id {
        Some(id) => {
            if !app.store.task_exists(id).await {
                return Err(APIError::TaskNotFound);
            }
            id
        }
        None => app.store.allocate_task_id().await?,
    };

    let task = Task {
        id: task_id,
        title: request.title.clone(),
        text: request.text.clone(),
        value: request.value,
        labels: request.labels.clone(),
        flags: request.flags.clone(),
        group: request.group,
        order: request.order,
        seed: request.seed.clone(),
        hints: request.hints.clone(),
    };
    app.store.write_task(&task).await?;
    app.cache.invalidate_task(task_id).await;
    info!("Stored task {task_id} ({:?})", task.title);
    Ok(TaskUpsertResponse { task_id })
}

#[derive(Debug, Deserialize)]
pub struct TaskDeleteRequest {
    pub task_id: TaskId,
}

impl APIRequest for TaskDeleteRequest {
    fn ok(&self) -> bool {
        self.task_id > 0
    }
}

pub async fn delete_task(app: &App, request: &TaskDeleteRequest) -> Result<(), APIError> {
    request.sanity()?;
    app.store.delete_task(request.task_id).await?;
    app.cache.invalidate_task(request.task_id).await;
    app.cache.invalidate_scoreboard().await;
    info!("Deleted task {} and its submission history", request.task_id);
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct GroupUpsertRequest {
    pub id: Option<GroupId>,
    pub name: String,
    #[serde(default)]
    pub parent: GroupId,
    pub seed: Seed,
    #[serde(default)]
    pub generation_config: String,
}

impl APIRequest for GroupUpsertRequest {
    fn ok(&self) -> bool {
        !self.name.is_empty()
            && self.parent >= ROOT_GROUP
            && self.id.map_or(true, |id| id > 0)
    }
}

#[derive(Debug, Serialize)]
pub struct GroupUpsertResponse {
    pub group_id: GroupId,
}

pub async fn create_or_update_group(
    app: &App,
    request: &GroupUpsertRequest,
) -> Result<GroupUpsertResponse, APIError> {
    request.sanity()?;
    if request.parent != ROOT_GROUP && !app.store.group_exists(request.parent).await {
        return Err(APIError::GroupNotFound);
    }

    let group_id = match request.id {
        Some(id) => {
            let existing = app.store.read_group(id).await?;
            if existing.parent != request.parent
                && !hierarchy::may_reparent(&app.store, id, request.parent).await?
            {
                return Err(APIError::CycleDetected);
            }
            id
        }
        None => app.store.allocate_group_id().await?,
    };

    let group = Group {
        id: group_id,
        name: request.name.clone(),
        parent: request.parent,
        seed: request.seed.clone(),
        generation_config: request.generation_config.clone(),
    };
    app.store.write_group(&group).await?;
    app.cache.invalidate_group(group_id).await;
    info!("Stored group {group_id} ({:?})", group.name);
    Ok(GroupUpsertResponse { group_id })
}

#[derive(Debug, Deserialize)]
pub struct ReparentRequest {
    pub group_id: GroupId,
    pub new_parent: GroupId,
}

impl APIRequest for ReparentRequest {
    fn ok(&self) -> bool {
        self.group_id > 0 && self.new_parent >= ROOT_GROUP
    }
}

pub async fn reparent_group(app: &App, request: &ReparentRequest) -> Result<(), APIError> {
    request.sanity()?;
    let mut group = app.store.read_group(request.group_id).await?;
    if request.new_parent != ROOT_GROUP && !app.store.group_exists(request.new_parent).await {
        return Err(APIError::GroupNotFound);
    }
    if !hierarchy::may_reparent(&app.store, request.group_id, request.new_parent).await? {
        return Err(APIError::CycleDetected);
    }
    group.parent = request.new_parent;
    app.store.write_group(&group).await?;
    app.cache.invalidate_group(request.group_id).await;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct GroupDeleteRequest {
    pub group_id: GroupId,
}

impl APIRequest for GroupDeleteRequest {
    fn ok(&self) -> bool {
        self.group_id > 0
    }
}

/// Deletes a group record. Children are left pointing at the dead id on
/// purpose; the path renderer shows them under an ellipsis until an admin
/// reparents them.
pub async fn delete_group(app: &App, request: &GroupDeleteRequest) -> Result<(), APIError> {
    request.sanity()?;
    let orphans: Vec<GroupId> = app
        .store
        .list_groups()
        .await?
        .iter()
        .filter(|g| g.parent == request.group_id)
        .map(|g| g.id)
        .collect();
    app.store.delete_group(request.group_id).await?;
    app.cache.invalidate_group(request.group_id).await;
    if !orphans.is_empty() {
        warn!(
            "Deleted group {} leaving orphaned children {:?}",
            request.group_id, orphans
        );
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct GroupPathRequest {
    pub group_id: GroupId,
}

impl APIRequest for GroupPathRequest {
    fn ok(&self) -> bool {
        self.group_id >= ROOT_GROUP
    }
}

#[derive(Debug, Serialize)]
pub struct GroupPathResponse {
    pub path: Vec<String>,
}

pub async fn group_path(
    app: &App,
    request: &GroupPathRequest,
) -> Result<GroupPathResponse, APIError> {
    request.sanity()?;
    let table = app.store.group_table().await?;
    Ok(GroupPathResponse {
        path: hierarchy::build_group_path(&table, request.group_id, MAX_GROUP_DEPTH),
    })
}

#[derive(Debug, Deserialize)]
pub struct GenConfigRequest {
    pub task_id: TaskId,
    pub source: String,
}

impl APIRequest for GenConfigRequest {
    fn ok(&self) -> bool {
        self.task_id > 0 && !self.source.is_empty()
    }
}

/// Installs generator source for a task. Existing cached instances become
/// stale by mtime and regenerate on next access.
pub async fn set_generation_config(app: &App, request: &GenConfigRequest) -> Result<(), APIError> {
    request.sanity()?;
    app.store
        .write_gen_config(request.task_id, &request.source)
        .await
}

#[derive(Debug, Deserialize)]
pub struct ApplyPresetRequest {
    pub task_id: TaskId,
    pub preset: String,
}

impl APIRequest for ApplyPresetRequest {
    fn ok(&self) -> bool {
        self.task_id > 0 && is_safe_name(&self.preset)
    }
}

pub async fn apply_gen_preset(app: &App, request: &ApplyPresetRequest) -> Result<(), APIError> {
    request.sanity()?;
    let source = app.store.read_preset(&request.preset).await?;
    info!(
        "Applying generation preset {:?} to task {}",
        request.preset, request.task_id
    );
    app.store.write_gen_config(request.task_id, &source).await
}

/// Cache occupancy, for the operator dashboard.
pub fn cache_status(app: &App) -> crate::util::cache::CacheStatusResponse {
    app.cache.get_size()
}

#[derive(Debug, Deserialize)]
pub struct RegisterTeamRequest {
    pub name: String,
}

impl APIRequest for RegisterTeamRequest {
    fn ok(&self) -> bool {
        is_safe_name(&self.name)
    }
}

/// Issues the team's seed on first registration; repeated calls return
/// the existing record unchanged.
pub async fn register_team(app: &App, request: &RegisterTeamRequest) -> Result<Team, APIError> {
    request.sanity()?;
    app.store.issue_team(&request.name).await
}
