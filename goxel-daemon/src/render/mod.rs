//! Render artifact manager: allocates, indexes, and evicts files
//! produced by `goxel.render_scene`/`goxel.export_model`.
//!
//! A single mutex-guarded index is the one source of truth for live
//! on-disk artifacts, the same pattern used for in-memory resource
//! tables elsewhere in this crate. Token generation draws on `rand`.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rand::Rng;

use crate::error::DaemonError;

#[derive(Debug, Clone)]
pub struct RenderEntry {
    pub path: PathBuf,
    pub session: Option<String>,
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub bytes: u64,
    pub created_at: u64,
    pub last_accessed_at: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderStats {
    pub count: usize,
    pub total_bytes: u64,
    pub budget_bytes: u64,
    pub ttl_seconds: u64,
    pub total_renders_produced: u64,
}

struct Index {
    entries: HashMap<PathBuf, RenderEntry>,
    total_renders_produced: u64,
}

/// Single mutex over the whole index: all state mutations take it, and
/// every operation held under it is short.
pub struct RenderManager {
    root: PathBuf,
    budget_bytes: u64,
    ttl_seconds: u64,
    index: Mutex<Index>,
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs()
}

fn random_hex_token(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| format!("{:x}", rng.gen_range(0..16u8)))
        .collect()
}

/// Normalizes `p` and checks it falls under `base` with no `..`
/// components surviving normalization.
pub fn validate_path(p: &Path, base: &Path) -> bool {
    let mut normalized = PathBuf::new();
    for component in p.components() {
        match component {
            Component::ParentDir => return false,
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized.starts_with(base)
}

impl RenderManager {
    pub fn new(root: PathBuf, budget_bytes: u64, ttl_seconds: u64) -> Self {
        RenderManager {
            root,
            budget_bytes,
            ttl_seconds,
            index: Mutex::new(Index {
                entries: HashMap::new(),
                total_renders_produced: 0,
            }),
        }
    }

    /// The configured render root, for callers (e.g. the dispatcher) that
    /// must validate a client-supplied path before ever touching disk
    /// with it.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns a unique absolute path under the configured root, creating
    /// its parent directory with mode 0700.
    pub fn allocate_path(&self, session: Option<&str>, format: &str) -> Result<PathBuf, DaemonError> {
        std::fs::create_dir_all(&self.root).map_err(io_err("allocate_path"))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&self.root)
                .map_err(io_err("allocate_path"))?
                .permissions();
            perms.set_mode(0o700);
            let _ = std::fs::set_permissions(&self.root, perms);
        }

        let session_part = session.unwrap_or(&random_hex_token(6)).to_string();
        let token = random_hex_token(8);
        let filename = format!("render_{}_{}_{}.{}", now_unix(), session_part, token, format);
        Ok(self.root.join(filename))
    }

    /// Indexes an on-disk render. The file must already exist under
    /// `root`.
    pub fn register(
        &self,
        path: PathBuf,
        session: Option<String>,
        format: String,
        width: u32,
        height: u32,
    ) -> Result<(), DaemonError> {
        if !validate_path(&path, &self.root) {
            return Err(DaemonError::InvalidParams(
                "render path must live under the configured render root".into(),
            ));
        }

        let metadata = std::fs::metadata(&path).map_err(|e| DaemonError::EngineFailure {
            kind: "file_not_found".to_string(),
            message: e.to_string(),
        })?;

        let mut index = self.index.lock();
        if index.entries.contains_key(&path) {
            return Err(DaemonError::EngineFailure {
                kind: "file_exists".to_string(),
                message: format!("{} is already registered", path.display()),
            });
        }

        let now = now_unix();
        index.entries.insert(
            path.clone(),
            RenderEntry {
                path,
                session,
                format,
                width,
                height,
                bytes: metadata.len(),
                created_at: now,
                last_accessed_at: now,
            },
        );
        index.total_renders_produced += 1;
        drop(index);

        self.enforce_budget()?;
        Ok(())
    }

    /// Looks up an entry, bumping `last_accessed_at` on hit.
    pub fn get(&self, path: &Path) -> Option<RenderEntry> {
        let mut index = self.index.lock();
        let now = now_unix();
        if let Some(entry) = index.entries.get_mut(path) {
            entry.last_accessed_at = now;
            return Some(entry.clone());
        }
        None
    }

    /// Unlinks the file and removes its entry.
    pub fn remove(&self, path: &Path) -> Result<(), DaemonError> {
        let mut index = self.index.lock();
        if index.entries.remove(path).is_none() {
            return Err(DaemonError::EngineFailure {
                kind: "file_not_found".to_string(),
                message: format!("{} is not registered", path.display()),
            });
        }
        drop(index);
        let _ = std::fs::remove_file(path);
        Ok(())
    }

    /// Removes every entry past its TTL.
    pub fn cleanup_expired(&self) -> (usize, u64) {
        let now = now_unix();
        let mut index = self.index.lock();
        let expired: Vec<PathBuf> = index
            .entries
            .values()
            .filter(|e| now.saturating_sub(e.created_at) > self.ttl_seconds)
            .map(|e| e.path.clone())
            .collect();

        let mut bytes_freed = 0u64;
        for path in &expired {
            if let Some(entry) = index.entries.remove(path) {
                bytes_freed += entry.bytes;
                let _ = std::fs::remove_file(path);
            }
        }
        (expired.len(), bytes_freed)
    }

    /// Evicts LRU entries (tie-broken by oldest `created_at`) while total
    /// bytes exceed the configured budget.
    pub fn enforce_budget(&self) -> Result<(usize, u64), DaemonError> {
        let mut index = self.index.lock();
        let mut evicted = 0usize;
        let mut bytes_freed = 0u64;

        loop {
            let total: u64 = index.entries.values().map(|e| e.bytes).sum();
            if total <= self.budget_bytes {
                break;
            }
            let victim = index
                .entries
                .values()
                .min_by_key(|e| (e.last_accessed_at, e.created_at))
                .map(|e| e.path.clone());

            let Some(victim) = victim else { break };
            if let Some(entry) = index.entries.remove(&victim) {
                bytes_freed += entry.bytes;
                evicted += 1;
                let _ = std::fs::remove_file(&victim);
            }
        }

        Ok((evicted, bytes_freed))
    }

    pub fn stats(&self) -> RenderStats {
        let index = self.index.lock();
        RenderStats {
            count: index.entries.len(),
            total_bytes: index.entries.values().map(|e| e.bytes).sum(),
            budget_bytes: self.budget_bytes,
            ttl_seconds: self.ttl_seconds,
            total_renders_produced: index.total_renders_produced,
        }
    }
}

fn io_err(op: &'static str) -> impl Fn(std::io::Error) -> DaemonError {
    move |e| DaemonError::EngineFailure {
        kind: op.to_string(),
        message: e.to_string(),
    }
}
