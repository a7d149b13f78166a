//! Creator blacklist
//!
//! One creator address per line, append-only. The in-memory set answers
//! lookups; the file is reloaded before every leaderboard refresh so edits
//! made by hand between runs are picked up too.

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::Mutex;

pub struct Blacklist {
    path: PathBuf,
    set: Mutex<HashSet<String>>,
}

impl Blacklist {
    /// Load the blacklist file if it exists; a missing file is an empty list.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let set = read_entries(&path);
        if !set.is_empty() {
            log::info!("Loaded {} blacklisted creators", set.len());
        }
        Self {
            path,
            set: Mutex::new(set),
        }
    }

    /// Re-read the file, merging anything new into the in-memory set.
    pub async fn reload(&self) {
        let fresh = read_entries(&self.path);
        let mut set = self.set.lock().await;
        set.extend(fresh);
    }

    pub async fn contains(&self, owner: &str) -> bool {
        self.set.lock().await.contains(owner)
    }

    /// Blacklist a creator, appending to the file. Already-known creators
    /// are not written twice. File writes serialize on the set lock.
    pub async fn add(&self, owner: &str) -> Result<(), std::io::Error> {
        let mut set = self.set.lock().await;
        if !set.insert(owner.to_string()) {
            return Ok(());
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", owner)?;
        log::info!("🚫 Added {} to blacklist", owner);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.set.lock().await.len()
    }
}

fn read_entries(path: &PathBuf) -> HashSet<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => HashSet::new(),
    }
}
