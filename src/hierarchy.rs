//! Group-tree walks: seed and generation-config inheritance, cycle-safe
//! reparent validation, and path rendering for the admin surface. Every
//! walk is an explicit loop with a depth bound so corrupted parent chains
//! terminate instead of recursing.

use std::collections::{HashMap, HashSet};

use log::warn;

use crate::generators;
use crate::models::{Group, GroupId, Seed, Task, ROOT_GROUP};
use crate::store::ContentStore;
use crate::util::api_util::APIError;

pub const MAX_GROUP_DEPTH: usize = 30;

/// Resolves a group's seed to a literal, following `inherit` up the parent
/// chain. A group whose seed is `inherit` while its parent is the root has
/// nothing left to inherit from.
pub async fn resolve_group_seed(
    store: &ContentStore,
    group_id: GroupId,
) -> Result<String, APIError> {
    let mut current = group_id;
    for _ in 0..MAX_GROUP_DEPTH {
        let group = store.read_group(current).await?;
        match group.seed {
            Seed::Literal(literal) => return Ok(literal),
            Seed::Inherit => {
                if group.parent == ROOT_GROUP {
                    return Err(APIError::InvalidInherit);
                }
                current = group.parent;
            }
        }
    }
    warn!("Seed resolution for group {group_id} exceeded depth {MAX_GROUP_DEPTH}");
    Err(APIError::InvalidInherit)
}

pub async fn resolve_task_seed(store: &ContentStore, task: &Task) -> Result<String, APIError> {
    match &task.seed {
        Seed::Literal(literal) => Ok(literal.clone()),
        Seed::Inherit => {
            if task.group == ROOT_GROUP {
                return Err(APIError::InvalidInherit);
            }
            resolve_group_seed(store, task.group).await
        }
    }
}

/// Simulates `group.parent = new_parent` and walks to the root. Revisiting
/// any group (the moved one included) is a cycle. Must be consulted before
/// a reparent is persisted; the hierarchy is never left partially updated.
pub async fn may_reparent(
    store: &ContentStore,
    group_id: GroupId,
    new_parent: GroupId,
) -> Result<bool, APIError> {
    let mut visited = HashSet::from([group_id]);
    let mut current = new_parent;
    while current != ROOT_GROUP {
        if !visited.insert(current) {
            return Ok(false);
        }
        current = store.read_group(current).await?.parent;
    }
    Ok(true)
}

/// Group names from the root down to `group_id`. A walk that runs out of
/// depth, or hits a dangling parent left behind by group deletion, yields
/// a path prefixed with an ellipsis marker instead of an error.
pub fn build_group_path(
    groups: &HashMap<GroupId, Group>,
    group_id: GroupId,
    max_depth: usize,
) -> Vec<String> {
    let mut path = Vec::new();
    let mut current = group_id;
    let mut hops = 0;
    while current != ROOT_GROUP {
        if hops >= max_depth {
            path.push("…".to_string());
            break;
        }
        match groups.get(&current) {
            Some(group) => {
                path.push(group.name.clone());
                current = group.parent;
            }
            None => {
                path.push("…".to_string());
                break;
            }
        }
        hops += 1;
    }
    path.reverse();
    path
}

/// Returns the task's generation config, materializing the inherited
/// default on first use: the nearest non-empty group config up the chain,
/// or the built-in no-op. The resolved text is persisted into the task
/// directory so staleness checks have a concrete mtime to compare against.
pub async fn ensure_generation_config(
    store: &ContentStore,
    task: &Task,
) -> Result<String, APIError> {
    if let Some(existing) = store.read_gen_config(task.id).await? {
        return Ok(existing);
    }
    let resolved = resolve_default_config(store, task.group).await?;
    store.write_gen_config(task.id, &resolved).await?;
    Ok(resolved)
}

async fn resolve_default_config(
    store: &ContentStore,
    group_id: GroupId,
) -> Result<String, APIError> {
    let mut current = group_id;
    for _ in 0..MAX_GROUP_DEPTH {
        if current == ROOT_GROUP {
            break;
        }
        match store.fetch_group(current).await? {
            Some(group) => {
                if !group.generation_config.is_empty() {
                    return Ok(group.generation_config);
                }
                current = group.parent;
            }
            None => {
                warn!("Group {current} missing while resolving generation config");
                break;
            }
        }
    }
    Ok(generators::DEFAULT_CONFIG.to_string())
}
