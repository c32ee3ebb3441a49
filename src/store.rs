//! Filesystem-backed content store. Tasks, groups and teams are versioned
//! JSON documents under a data directory; submissions and hint purchases
//! are append-only per-team ledgers. Layout:
//!
//! ```text
//! <data>/seed.txt
//! <data>/tasks-etc/maxid.txt, maxgroupid.txt
//! <data>/tasks/<id>/task.json
//! <data>/tasks/<id>/generate.cfg
//! <data>/tasks/<id>/generated/<token>/task.json, gen-time.txt
//! <data>/groups/<id>/group.json
//! <data>/teams/<name>/team.json, submissions.jsonl, hints.jsonl, last-submission.txt
//! ```

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OnceCell};

use crate::models::{Group, GroupId, HintPurchase, Submission, Task, TaskId, Team};
use crate::util::api_util::{new_unlocated_server_error, APIError, ERROR_STORE_DECODE};
use crate::util::cipher_util::{new_global_seed, new_team_seed};

const RECORD_VERSION: u32 = 1;

static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap());

/// Team and preset names become path components; anything else is rejected
/// before it reaches the filesystem.
pub fn is_safe_name(s: &str) -> bool {
    NAME_RE.is_match(s)
}

#[derive(Serialize, Deserialize)]
struct Stored<T> {
    v: u32,
    #[serde(flatten)]
    record: T,
}

pub struct ContentStore {
    root: PathBuf,
    presets_dir: PathBuf,
    global_seed: OnceCell<String>,
    task_id_lock: Mutex<()>,
    group_id_lock: Mutex<()>,
    team_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ContentStore {
    pub fn new(root: PathBuf, presets_dir: PathBuf) -> Self {
        Self {
            root,
            presets_dir,
            global_seed: OnceCell::new(),
            task_id_lock: Mutex::new(()),
            group_id_lock: Mutex::new(()),
            team_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Lock serializing every read-modify-write on this team's durable
    /// state (ledgers, cooldown record).
    pub async fn team_lock(&self, team: &str) -> Arc<Mutex<()>> {
        let mut locks = self.team_locks.lock().await;
        Arc::clone(locks.entry(team.to_string()).or_default())
    }

    /// The installation-wide seed, generated once and persisted.
    pub async fn global_seed(&self) -> Result<String, APIError> {
        self.global_seed
            .get_or_try_init(|| async {
                let path = self.root.join("seed.txt");
                if let Some(existing) = read_optional(&path).await? {
                    return Ok(existing.trim().to_string());
                }
                let seed = new_global_seed();
                write_atomic(&path, seed.as_bytes()).await?;
                Ok(seed)
            })
            .await
            .cloned()
    }

    // ---- id allocation ------------------------------------------------

    pub async fn allocate_task_id(&self) -> Result<TaskId, APIError> {
        let _guard = self.task_id_lock.lock().await;
        next_id(&self.root.join("tasks-etc").join("maxid.txt")).await
    }

    pub async fn allocate_group_id(&self) -> Result<GroupId, APIError> {
        let _guard = self.group_id_lock.lock().await;
        next_id(&self.root.join("tasks-etc").join("maxgroupid.txt")).await
    }

    // ---- tasks ---------------------------------------------------------

    fn task_dir(&self, id: TaskId) -> PathBuf {
        self.root.join("tasks").join(id.to_string())
    }

    pub async fn task_exists(&self, id: TaskId) -> bool {
        fs::try_exists(self.task_dir(id).join("task.json"))
            .await
            .unwrap_or(false)
    }

    pub async fn fetch_task(&self, id: TaskId) -> Result<Option<Task>, APIError> {
        read_record(&self.task_dir(id).join("task.json")).await
    }

    pub async fn read_task(&self, id: TaskId) -> Result<Task, APIError> {
        self.fetch_task(id).await?.ok_or(APIError::TaskNotFound)
    }

    pub async fn write_task(&self, task: &Task) -> Result<(), APIError> {
        let dir = self.task_dir(task.id);
        fs::create_dir_all(&dir).await?;
        write_record(&dir.join("task.json"), task).await
    }

    /// Removes the task directory (definition, generation config and every
    /// generated instance) and cascades deletion of its submission history
    /// from all team ledgers.
    pub async fn delete_task(&self, id: TaskId) -> Result<(), APIError> {
        let dir = self.task_dir(id);
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(APIError::TaskNotFound);
        }
        fs::remove_dir_all(&dir).await?;
        for team in self.list_teams().await? {
            let lock = self.team_lock(&team.name).await;
            let _guard = lock.lock().await;
            self.purge_task_submissions(&team.name, id).await?;
        }
        Ok(())
    }

    pub async fn list_task_ids(&self) -> Result<Vec<TaskId>, APIError> {
        list_numeric_dirs(&self.root.join("tasks")).await
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>, APIError> {
        let mut tasks = Vec::new();
        for id in self.list_task_ids().await? {
            match self.fetch_task(id).await? {
                Some(task) => tasks.push(task),
                None => warn!("Task directory {id} has no readable task.json"),
            }
        }
        tasks.sort_by_key(|t| (t.group, t.order, t.id));
        Ok(tasks)
    }

    // ---- groups --------------------------------------------------------

    fn group_dir(&self, id: GroupId) -> PathBuf {
        self.root.join("groups").join(id.to_string())
    }

    pub async fn group_exists(&self, id: GroupId) -> bool {
        fs::try_exists(self.group_dir(id).join("group.json"))
            .await
            .unwrap_or(false)
    }

    pub async fn fetch_group(&self, id: GroupId) -> Result<Option<Group>, APIError> {
        read_record(&self.group_dir(id).join("group.json")).await
    }

    pub async fn read_group(&self, id: GroupId) -> Result<Group, APIError> {
        self.fetch_group(id).await?.ok_or(APIError::GroupNotFound)
    }

    pub async fn write_group(&self, group: &Group) -> Result<(), APIError> {
        let dir = self.group_dir(group.id);
        fs::create_dir_all(&dir).await?;
        write_record(&dir.join("group.json"), group).await
    }

    /// Deletes the group record only. Children keep their `parent` pointer;
    /// orphaning is deliberate and visible in `build_group_path`.
    pub async fn delete_group(&self, id: GroupId) -> Result<(), APIError> {
        let dir = self.group_dir(id);
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(APIError::GroupNotFound);
        }
        fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    pub async fn list_groups(&self) -> Result<Vec<Group>, APIError> {
        let mut groups = Vec::new();
        for id in list_numeric_dirs(&self.root.join("groups")).await? {
            match self.fetch_group(id).await? {
                Some(group) => groups.push(group),
                None => warn!("Group directory {id} has no readable group.json"),
            }
        }
        groups.sort_by_key(|g| g.id);
        Ok(groups)
    }

    pub async fn group_table(&self) -> Result<HashMap<GroupId, Group>, APIError> {
        Ok(self
            .list_groups()
            .await?
            .into_iter()
            .map(|g| (g.id, g))
            .collect())
    }

    // ---- generation config and presets --------------------------------

    fn gen_config_path(&self, task: TaskId) -> PathBuf {
        self.task_dir(task).join("generate.cfg")
    }

    pub async fn read_gen_config(&self, task: TaskId) -> Result<Option<String>, APIError> {
        Ok(read_optional(&self.gen_config_path(task)).await?)
    }

    pub async fn write_gen_config(&self, task: TaskId, source: &str) -> Result<(), APIError> {
        if !self.task_exists(task).await {
            return Err(APIError::TaskNotFound);
        }
        write_atomic(&self.gen_config_path(task), source.as_bytes()).await
    }

    /// Modification time of the task's generation config, in unix seconds.
    /// Staleness checks compare against this; content is never hashed.
    pub async fn gen_config_mtime(&self, task: TaskId) -> Result<Option<i64>, APIError> {
        match fs::metadata(&self.gen_config_path(task)).await {
            Ok(meta) => {
                let modified = meta.modified()?;
                let secs = modified
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0);
                Ok(Some(secs))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read_preset(&self, name: &str) -> Result<String, APIError> {
        if !is_safe_name(name) {
            return Err(APIError::Validation(format!(
                "invalid preset name {name:?}"
            )));
        }
        read_optional(&self.presets_dir.join(format!("{name}.cfg")))
            .await?
            .ok_or(APIError::PresetNotFound)
    }

    // ---- generated instances -------------------------------------------

    fn instance_dir(&self, task: TaskId, token: &str) -> PathBuf {
        self.task_dir(task).join("generated").join(token)
    }

    pub async fn instance_exists(&self, task: TaskId, token: &str) -> bool {
        fs::try_exists(self.instance_dir(task, token).join("task.json"))
            .await
            .unwrap_or(false)
    }

    pub async fn read_instance(
        &self,
        task: TaskId,
        token: &str,
    ) -> Result<Option<Task>, APIError> {
        read_record(&self.instance_dir(task, token).join("task.json")).await
    }

    /// Generation timestamp of the cached instance, unix seconds. A missing
    /// or unparsable sidecar reads as "no instance".
    pub async fn instance_stamp(&self, task: TaskId, token: &str) -> Result<Option<i64>, APIError> {
        let path = self.instance_dir(task, token).join("gen-time.txt");
        match read_optional(&path).await? {
            Some(raw) => match raw.trim().parse::<i64>() {
                Ok(stamp) => Ok(Some(stamp)),
                Err(_) => {
                    warn!("Unparsable generation timestamp at {}", path.display());
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Publishes a generated instance. Content lands before the timestamp
    /// sidecar, each through an atomic rename, so a concurrent reader never
    /// observes a stamp without its instance.
    pub async fn write_instance(
        &self,
        task: TaskId,
        token: &str,
        instance: &Task,
        stamp: i64,
    ) -> Result<(), APIError> {
        let dir = self.instance_dir(task, token);
        fs::create_dir_all(&dir).await?;
        write_record(&dir.join("task.json"), instance).await?;
        write_atomic(&dir.join("gen-time.txt"), stamp.to_string().as_bytes()).await
    }

    // ---- teams ---------------------------------------------------------

    fn team_dir(&self, team: &str) -> PathBuf {
        self.root.join("teams").join(team)
    }

    /// Creates the team with a fresh seed, or returns the existing record.
    /// Seeds are immutable once issued; tokens depend on them.
    pub async fn issue_team(&self, name: &str) -> Result<Team, APIError> {
        if !is_safe_name(name) {
            return Err(APIError::Validation(format!("invalid team name {name:?}")));
        }
        let lock = self.team_lock(name).await;
        let _guard = lock.lock().await;
        if let Some(existing) = self.fetch_team(name).await? {
            return Ok(existing);
        }
        let team = Team {
            name: name.to_string(),
            seed: new_team_seed(),
        };
        let dir = self.team_dir(name);
        fs::create_dir_all(&dir).await?;
        write_record(&dir.join("team.json"), &team).await?;
        Ok(team)
    }

    pub async fn fetch_team(&self, name: &str) -> Result<Option<Team>, APIError> {
        read_record(&self.team_dir(name).join("team.json")).await
    }

    pub async fn read_team(&self, name: &str) -> Result<Team, APIError> {
        self.fetch_team(name)
            .await?
            .ok_or_else(|| APIError::Validation(format!("unknown team {name:?}")))
    }

    pub async fn list_teams(&self) -> Result<Vec<Team>, APIError> {
        let dir = self.root.join("teams");
        let mut names = Vec::new();
        match fs::read_dir(&dir).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    if let Some(name) = entry.file_name().to_str() {
                        names.push(name.to_string());
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        }
        names.sort();
        let mut teams = Vec::new();
        for name in names {
            match self.fetch_team(&name).await? {
                Some(team) => teams.push(team),
                None => warn!("Team directory {name:?} has no readable team.json"),
            }
        }
        Ok(teams)
    }

    // ---- ledgers -------------------------------------------------------

    pub async fn append_submission(&self, row: &Submission) -> Result<(), APIError> {
        append_jsonl(&self.team_dir(&row.team).join("submissions.jsonl"), row).await
    }

    pub async fn submissions_for(&self, team: &str) -> Result<Vec<Submission>, APIError> {
        read_jsonl(&self.team_dir(team).join("submissions.jsonl")).await
    }

    pub async fn has_correct_submission(
        &self,
        team: &str,
        task: TaskId,
    ) -> Result<bool, APIError> {
        Ok(self
            .submissions_for(team)
            .await?
            .iter()
            .any(|s| s.task == task && s.correct))
    }

    async fn purge_task_submissions(&self, team: &str, task: TaskId) -> Result<(), APIError> {
        let path = self.team_dir(team).join("submissions.jsonl");
        let rows = read_jsonl::<Submission>(&path).await?;
        if rows.iter().all(|s| s.task != task) {
            return Ok(());
        }
        let mut out = String::new();
        for row in rows.iter().filter(|s| s.task != task) {
            out.push_str(&serde_json::to_string(row)?);
            out.push('\n');
        }
        write_atomic(&path, out.as_bytes()).await
    }

    pub async fn append_hint_purchase(&self, row: &HintPurchase) -> Result<(), APIError> {
        append_jsonl(&self.team_dir(&row.team).join("hints.jsonl"), row).await
    }

    pub async fn hint_purchases_for(&self, team: &str) -> Result<Vec<HintPurchase>, APIError> {
        read_jsonl(&self.team_dir(team).join("hints.jsonl")).await
    }

    pub async fn hint_purchased(
        &self,
        team: &str,
        task: TaskId,
        hexid: &str,
    ) -> Result<bool, APIError> {
        Ok(self
            .hint_purchases_for(team)
            .await?
            .iter()
            .any(|p| p.task == task && p.hexid == hexid))
    }

    // ---- submission cooldown record ------------------------------------

    pub async fn last_submission(&self, team: &str) -> Result<Option<DateTime<Utc>>, APIError> {
        let path = self.team_dir(team).join("last-submission.txt");
        match read_optional(&path).await? {
            Some(raw) => match raw.trim().parse::<DateTime<Utc>>() {
                Ok(time) => Ok(Some(time)),
                Err(_) => {
                    warn!("Unparsable last-submission record at {}", path.display());
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub async fn set_last_submission(
        &self,
        team: &str,
        time: DateTime<Utc>,
    ) -> Result<(), APIError> {
        let dir = self.team_dir(team);
        fs::create_dir_all(&dir).await?;
        write_atomic(
            &dir.join("last-submission.txt"),
            time.to_rfc3339().as_bytes(),
        )
        .await
    }
}

// ---- file helpers ------------------------------------------------------

async fn read_optional(path: &Path) -> Result<Option<String>, std::io::Error> {
    match fs::read_to_string(path).await {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write-to-temp plus rename, so concurrent readers see either the old or
/// the new content, never a torn write.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), APIError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, APIError> {
    let Some(raw) = read_optional(path).await? else {
        return Ok(None);
    };
    let stored: Stored<T> = serde_json::from_str(&raw)?;
    if stored.v > RECORD_VERSION {
        return Err(new_unlocated_server_error(
            format!(
                "record {} has version {} but this build understands {}",
                path.display(),
                stored.v,
                RECORD_VERSION
            ),
            ERROR_STORE_DECODE,
        ));
    }
    Ok(Some(stored.record))
}

async fn write_record<T: Serialize>(path: &Path, record: &T) -> Result<(), APIError> {
    let stored = Stored {
        v: RECORD_VERSION,
        record,
    };
    write_atomic(path, serde_json::to_vec_pretty(&stored)?.as_slice()).await
}

async fn append_jsonl<T: Serialize>(path: &Path, row: &T) -> Result<(), APIError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_string(row)?;
    line.push('\n');
    let mut file = fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    Ok(())
}

async fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, APIError> {
    let Some(raw) = read_optional(path).await? else {
        return Ok(Vec::new());
    };
    let mut rows = Vec::new();
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str(line) {
            Ok(row) => rows.push(row),
            Err(e) => warn!("Skipping unreadable ledger row in {}: {e}", path.display()),
        }
    }
    Ok(rows)
}

async fn next_id(path: &Path) -> Result<i32, APIError> {
    let current = match read_optional(path).await? {
        Some(raw) => raw.trim().parse::<i32>().unwrap_or(0),
        None => 0,
    };
    let next = current + 1;
    write_atomic(path, next.to_string().as_bytes()).await?;
    Ok(next)
}

async fn list_numeric_dirs(dir: &Path) -> Result<Vec<i32>, APIError> {
    let mut ids = Vec::new();
    match fs::read_dir(dir).await {
        Ok(mut entries) => {
            while let Some(entry) = entries.next_entry().await? {
                if let Some(id) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                    ids.push(id);
                }
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    }
    ids.sort_unstable();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Seed;
    use tempfile::TempDir;

    fn store() -> (TempDir, ContentStore) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("db");
        let presets = dir.path().join("presets");
        (dir, ContentStore::new(root, presets))
    }

    fn task(id: TaskId) -> Task {
        Task {
            id,
            title: format!("Task {id}"),
            text: "Body".into(),
            value: 100,
            labels: Default::default(),
            flags: vec![],
            group: 0,
            order: 0,
            seed: Seed::Literal("0011223344556677".into()),
            hints: vec![],
        }
    }

    #[tokio::test]
    async fn id_allocation_is_monotonic() {
        let (_dir, store) = store();
        assert_eq!(store.allocate_task_id().await.unwrap(), 1);
        assert_eq!(store.allocate_task_id().await.unwrap(), 2);
        assert_eq!(store.allocate_group_id().await.unwrap(), 1);
        assert_eq!(store.allocate_task_id().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn task_records_round_trip() {
        let (_dir, store) = store();
        assert!(!store.task_exists(7).await);
        assert!(store.fetch_task(7).await.unwrap().is_none());
        assert!(matches!(
            store.read_task(7).await,
            Err(APIError::TaskNotFound)
        ));

        store.write_task(&task(7)).await.unwrap();
        assert!(store.task_exists(7).await);
        let read = store.read_task(7).await.unwrap();
        assert_eq!(read.title, "Task 7");
        assert_eq!(read.seed, Seed::Literal("0011223344556677".into()));
    }

    #[tokio::test]
    async fn global_seed_is_persisted_once() {
        let (dir, store) = store();
        let first = store.global_seed().await.unwrap();
        assert_eq!(first.len(), crate::GLOBAL_SEED_LENGTH);

        // A second store over the same directory reads the same seed back.
        let other = ContentStore::new(dir.path().join("db"), dir.path().join("presets"));
        assert_eq!(other.global_seed().await.unwrap(), first);
    }

    #[tokio::test]
    async fn team_seed_is_immutable_once_issued() {
        let (_dir, store) = store();
        let first = store.issue_team("alpha").await.unwrap();
        assert_eq!(first.seed.len(), crate::TEAM_SEED_LENGTH);
        let again = store.issue_team("alpha").await.unwrap();
        assert_eq!(again.seed, first.seed);

        assert!(store.issue_team("../escape").await.is_err());
    }

    #[tokio::test]
    async fn ledgers_append_and_filter() {
        let (_dir, store) = store();
        store.issue_team("alpha").await.unwrap();
        let row = Submission {
            team: "alpha".into(),
            task: 1,
            flag: "FLAG{x}".into(),
            correct: true,
            points: 100,
            time: Utc::now(),
        };
        store.append_submission(&row).await.unwrap();
        store
            .append_submission(&Submission {
                task: 2,
                correct: false,
                points: 0,
                ..row.clone()
            })
            .await
            .unwrap();

        assert!(store.has_correct_submission("alpha", 1).await.unwrap());
        assert!(!store.has_correct_submission("alpha", 2).await.unwrap());
        assert_eq!(store.submissions_for("alpha").await.unwrap().len(), 2);
        assert!(store.submissions_for("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_a_task_purges_its_submission_history() {
        let (_dir, store) = store();
        store.issue_team("alpha").await.unwrap();
        store.write_task(&task(1)).await.unwrap();
        store.write_task(&task(2)).await.unwrap();
        for task_id in [1, 2] {
            store
                .append_submission(&Submission {
                    team: "alpha".into(),
                    task: task_id,
                    flag: "f".into(),
                    correct: true,
                    points: 10,
                    time: Utc::now(),
                })
                .await
                .unwrap();
        }

        store.delete_task(1).await.unwrap();
        assert!(!store.task_exists(1).await);
        let remaining = store.submissions_for("alpha").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].task, 2);
    }

    #[tokio::test]
    async fn instance_artifacts_round_trip() {
        let (_dir, store) = store();
        store.write_task(&task(5)).await.unwrap();
        let token = "ab".repeat(28);

        assert!(store.instance_stamp(5, &token).await.unwrap().is_none());
        store
            .write_instance(5, &token, &task(5), 1234)
            .await
            .unwrap();
        assert!(store.instance_exists(5, &token).await);
        assert_eq!(store.instance_stamp(5, &token).await.unwrap(), Some(1234));
        assert!(store.read_instance(5, &token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn gen_config_mtime_tracks_writes() {
        let (_dir, store) = store();
        store.write_task(&task(3)).await.unwrap();
        assert_eq!(store.gen_config_mtime(3).await.unwrap(), None);
        store.write_gen_config(3, "noop\n").await.unwrap();
        assert!(store.gen_config_mtime(3).await.unwrap().is_some());
        assert_eq!(
            store.read_gen_config(3).await.unwrap().as_deref(),
            Some("noop\n")
        );

        assert_eq!(
            store.write_gen_config(99, "noop\n").await,
            Err(APIError::TaskNotFound)
        );
    }
}
