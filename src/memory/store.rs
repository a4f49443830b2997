//! On-disk memory store.
//!
//! Storage format is a single pretty-printed JSON document in
//! `.vibemem/memories.json` (project) or `~/.vibemem/memories.json` (global).
//! The store is read once per run and written once after `add`/`forget`.
//! There is no locking: concurrent invocations are last-writer-wins.

use super::record::{Category, MemoryRecord, NewMemory, Scope};
use crate::tokens::{ApproxCounter, TokenCounter};
use crate::{Result, VibememError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const STORE_DIR: &str = ".vibemem";
pub const MEMORY_FILE: &str = "memories.json";
pub const INDEX_FILE: &str = "index.md";
pub const ID_PREFIX: &str = "mem-";
const ID_HASH_LEN: usize = 7;
const STORE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    #[serde(default)]
    memories: Vec<MemoryRecord>,
}

/// One scope's worth of memories plus the directory they persist to
#[derive(Debug, Clone)]
pub struct MemoryStore {
    dir: PathBuf,
    scope: Scope,
    records: Vec<MemoryRecord>,
}

impl MemoryStore {
    /// `.vibemem` directory for a project root
    pub fn project_dir(root: &Path) -> PathBuf {
        root.join(STORE_DIR)
    }

    /// Global directory: `$VIBEMEM_HOME`, else `~/.vibemem`
    pub fn global_dir() -> Result<PathBuf> {
        if let Ok(home) = std::env::var("VIBEMEM_HOME") {
            return Ok(PathBuf::from(home));
        }
        let home = dirs::home_dir()
            .ok_or_else(|| VibememError::Config("could not find home directory".to_string()))?;
        Ok(home.join(STORE_DIR))
    }

    /// Open the store in `dir`. A missing memory file is an empty store;
    /// an unparseable one is an error.
    pub fn open(dir: impl Into<PathBuf>, scope: Scope) -> Result<Self> {
        let dir = dir.into();
        let records = Self::load(&dir.join(MEMORY_FILE))?;
        debug!("Loaded {} {} memories from {:?}", records.len(), scope, dir);
        Ok(Self {
            dir,
            scope,
            records,
        })
    }

    /// Create an empty store that has not been persisted yet
    pub fn empty(dir: impl Into<PathBuf>, scope: Scope) -> Self {
        Self {
            dir: dir.into(),
            scope,
            records: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn memory_path(&self) -> PathBuf {
        self.dir.join(MEMORY_FILE)
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.dir.join(format!("{}.bak", MEMORY_FILE))
    }

    fn tmp_path(&self) -> PathBuf {
        self.dir.join(format!("{}.tmp", MEMORY_FILE))
    }

    /// Records in insertion order
    pub fn records(&self) -> &[MemoryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Read a memory file. Corruption is fatal: there is no safe partial
    /// recovery for the source of truth.
    pub fn load(path: &Path) -> Result<Vec<MemoryRecord>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let text = fs::read_to_string(path)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let doc: StoreDocument =
            serde_json::from_str(&text).map_err(|source| VibememError::CorruptStore {
                path: path.to_path_buf(),
                source,
            })?;

        if doc.version > STORE_VERSION {
            warn!(
                "Memory store {:?} has version {} (this build knows {})",
                path, doc.version, STORE_VERSION
            );
        }

        let mut seen = HashSet::new();
        for record in &doc.memories {
            if !seen.insert(record.id.as_str()) {
                return Err(VibememError::CorruptStore {
                    path: path.to_path_buf(),
                    source: <serde_json::Error as serde::de::Error>::custom(format!(
                        "duplicate memory id {}",
                        record.id
                    )),
                });
            }
        }

        Ok(doc.memories)
    }

    /// Write the whole store: temp file, then rename over the primary.
    /// The previous file is kept as `memories.json.bak`.
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let primary = self.memory_path();
        let backup = self.backup_path();
        let tmp = self.tmp_path();

        if primary.exists() {
            fs::copy(&primary, &backup)?;
        }

        let doc = StoreDocument {
            version: STORE_VERSION,
            memories: self.records.clone(),
        };
        let content = serde_json::to_string_pretty(&doc)?;

        let mut file = fs::File::create(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        let _ = file.sync_all();

        fs::rename(&tmp, &primary)?;
        debug!("Saved {} memories to {:?}", self.records.len(), primary);

        // The index is derived from memories.json; failing to write it
        // doesn't fail the save.
        if let Err(e) = fs::write(self.index_path(), self.index_markdown()) {
            warn!("Failed to write {:?}: {}", self.index_path(), e);
        }
        Ok(())
    }

    /// Per-category counts and estimated tokens, pointing at `vibemem show`
    pub fn index_markdown(&self) -> String {
        let mut by_category: BTreeMap<&Category, (usize, usize)> = BTreeMap::new();
        for record in &self.records {
            let (count, tokens) = by_category.entry(&record.category).or_default();
            *count += 1;
            *tokens += record.size_tokens(&ApproxCounter);
        }

        let mut out = String::from("# vibemem index\n\n");
        if by_category.is_empty() {
            out.push_str("No memories yet. Add one with `vibemem add`.\n");
            return out;
        }
        for (category, (count, tokens)) in by_category {
            let noun = if count == 1 { "memory" } else { "memories" };
            out.push_str(&format!("- **{category}**: {count} {noun} (~{tokens} tokens)\n"));
        }
        out.push_str("\nUse `vibemem show -c <category>` to view details.\n");
        out
    }

    /// Add a memory stamped with the current time. Returns the new id.
    pub fn add(&mut self, memory: NewMemory) -> String {
        self.add_at(memory, Utc::now())
    }

    /// Add a memory with an explicit creation time.
    pub fn add_at(&mut self, memory: NewMemory, now: DateTime<Utc>) -> String {
        let id = next_memory_id(&self.records, &memory.content, &now);
        self.records.push(MemoryRecord {
            id: id.clone(),
            category: memory.category,
            content: memory.content,
            priority: memory.priority,
            scope: self.scope,
            created_at: now,
            updated_at: now,
        });
        id
    }

    /// Remove a memory by id. Returns false when the id is unknown.
    pub fn forget(&mut self, id: &str) -> bool {
        match self.records.iter().position(|r| r.id == id) {
            Some(idx) => {
                self.records.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&MemoryRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Resolve a user-supplied reference: exact id first, then a content
    /// substring that matches exactly one memory.
    pub fn find(&self, needle: &str) -> Option<&MemoryRecord> {
        if let Some(record) = self.get(needle) {
            return Some(record);
        }
        if needle.trim().is_empty() {
            return None;
        }

        let needle = needle.to_lowercase();
        let mut matches = self
            .records
            .iter()
            .filter(|r| r.content.to_lowercase().contains(&needle));
        match (matches.next(), matches.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }

    /// Memories newest first, optionally filtered by category
    pub fn list(&self, category: Option<&Category>) -> Vec<&MemoryRecord> {
        let mut out: Vec<&MemoryRecord> = self
            .records
            .iter()
            .filter(|r| category.map_or(true, |c| &r.category == c))
            .collect();
        out.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        out
    }

    pub fn total_tokens(&self, counter: &dyn TokenCounter) -> usize {
        self.records.iter().map(|r| r.size_tokens(counter)).sum()
    }
}

/// Global records followed by project records, each in its own order.
/// Both inputs are left untouched; duplicates are kept.
pub fn merge(global: &[MemoryRecord], project: &[MemoryRecord]) -> Vec<MemoryRecord> {
    global.iter().chain(project.iter()).cloned().collect()
}

fn next_memory_id(existing: &[MemoryRecord], content: &str, created_at: &DateTime<Utc>) -> String {
    use std::collections::hash_map::DefaultHasher;

    let modulus = 36_u64.pow(ID_HASH_LEN as u32);
    let stamp = created_at.to_rfc3339();
    let mut nonce = 0_u64;
    loop {
        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        stamp.hash(&mut hasher);
        nonce.hash(&mut hasher);

        let suffix = to_base36_padded(hasher.finish() % modulus, ID_HASH_LEN);
        let candidate = format!("{}{}", ID_PREFIX, suffix);
        if !existing.iter().any(|r| r.id == candidate) {
            return candidate;
        }
        nonce = nonce.saturating_add(1);
    }
}

fn to_base36_padded(mut value: u64, width: usize) -> String {
    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    let mut chars = vec!['0'; width];
    for slot in chars.iter_mut().rev() {
        *slot = ALPHABET[(value % 36) as usize] as char;
        value /= 36;
    }
    chars.into_iter().collect()
}
