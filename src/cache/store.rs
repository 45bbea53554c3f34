//! On-disk dependency cache with an in-memory snapshot

use crate::cache::entry::{CacheEntry, CacheStatus};
use crate::cache::lock::FileLock;
use crate::context::Fingerprint;
use crate::error::{BuildError, BuildResult};
use crate::package::PackageManagerKind;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::io::Write;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::fs;
use tracing::{debug, info, warn};

const ENTRY_FILE: &str = "entry.json";
const ARTIFACTS_DIR: &str = "artifacts";
const LOCK_SUFFIX: &str = ".lock";

/// What a resolver produced
#[derive(Debug, Clone)]
pub struct Resolution {
    pub package_manager: PackageManagerKind,
    /// Files written into the artifact directory
    pub artifacts: Vec<PathBuf>,
    pub label: String,
}

/// Result of [`DependencyCache::get_or_resolve`]
#[derive(Debug, Clone)]
pub struct Cached {
    pub entry: CacheEntry,
    /// Served without running the resolver
    pub hit: bool,
}

type Snapshot = Arc<HashMap<Fingerprint, CacheEntry>>;

/// Writer gate of one fingerprint
#[derive(Default)]
struct Flight {
    /// Resolutions completed through this gate
    finished: AtomicU64,
    /// Failure of the most recent resolution, handed to callers that waited on it
    gate: tokio::sync::Mutex<Option<Arc<BuildError>>>,
}

/// Holds a fingerprint's gate; the gate is dropped from the map with its last user
struct FlightHandle<'a> {
    cache: &'a DependencyCache,
    fp: Fingerprint,
    flight: Arc<Flight>,
}

impl Deref for FlightHandle<'_> {
    type Target = Flight;

    fn deref(&self) -> &Flight {
        &self.flight
    }
}

impl Drop for FlightHandle<'_> {
    fn drop(&mut self) {
        let mut flights = self.cache.flights.lock().unwrap_or_else(PoisonError::into_inner);
        let ours = flights
            .get(&self.fp)
            .is_some_and(|f| Arc::ptr_eq(f, &self.flight));
        // The map's reference plus ours
        if ours && Arc::strong_count(&self.flight) == 2 {
            flights.remove(&self.fp);
        }
    }
}

/// Cache of resolved dependencies keyed by fingerprint.
///
/// Layout: `<root>/<fp>/entry.json`, `<root>/<fp>/artifacts/`, `<root>/<fp>.lock`.
/// Readers use the published snapshot; writers hold the entry's async gate
/// and its lock file, so one fingerprint is resolved at most once at a time
/// within and across processes. Callers that waited on a resolution in this
/// process share its outcome, failures included.
pub struct DependencyCache {
    root: PathBuf,
    ttl: chrono::Duration,
    manifest_digest: String,
    snapshot: RwLock<Snapshot>,
    flights: Mutex<HashMap<Fingerprint, Arc<Flight>>>,
}

impl DependencyCache {
    /// Open (creating if needed) the cache at `root` and load existing entries
    pub async fn open(root: impl Into<PathBuf>, ttl: chrono::Duration) -> BuildResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| BuildError::io(format!("creating cache dir {}", root.display()), e))?;

        let cache = Self {
            root,
            ttl,
            manifest_digest: String::new(),
            snapshot: RwLock::new(Arc::new(HashMap::new())),
            flights: Mutex::new(HashMap::new()),
        };

        let loaded: HashMap<_, _> = cache
            .entries()
            .await?
            .into_iter()
            .map(|e| (e.fingerprint.clone(), e))
            .collect();
        debug!("Loaded {} cache entries from {}", loaded.len(), cache.root.display());
        cache.publish(|map| *map = loaded);

        Ok(cache)
    }

    /// Digest of the manifest entries must have been resolved from
    pub fn with_manifest_digest(mut self, digest: impl Into<String>) -> Self {
        self.manifest_digest = digest.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_dir(&self, fp: &Fingerprint) -> PathBuf {
        self.entry_dir(fp).join(ARTIFACTS_DIR)
    }

    fn entry_dir(&self, fp: &Fingerprint) -> PathBuf {
        self.root.join(fp.as_str())
    }

    fn entry_file(&self, fp: &Fingerprint) -> PathBuf {
        self.entry_dir(fp).join(ENTRY_FILE)
    }

    fn lock_file(&self, fp: &Fingerprint) -> PathBuf {
        self.root.join(format!("{}{}", fp, LOCK_SUFFIX))
    }

    /// A servable entry, or `None`.
    ///
    /// Stale entries are misses; a valid entry past its TTL or resolved from
    /// another manifest is marked stale on disk. A corrupt entry is
    /// invalidated and is a miss.
    pub async fn lookup(&self, fp: &Fingerprint) -> BuildResult<Option<CacheEntry>> {
        self.lookup_inner(fp, false).await
    }

    async fn lookup_inner(&self, fp: &Fingerprint, locked: bool) -> BuildResult<Option<CacheEntry>> {
        if let Some(entry) = self.read_snapshot().get(fp) {
            if entry.miss_reason(self.ttl, &self.manifest_digest).is_none()
                && self.artifacts_present(entry).await
            {
                return Ok(Some(entry.clone()));
            }
        }

        // Another process may have written it, or the snapshot is outdated
        let entry = match self.read_entry(fp).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(None),
            Err(e @ BuildError::CacheCorruption { .. }) => {
                warn!("{}", e);
                self.discard(fp, locked).await?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if let Some(reason) = entry.miss_reason(self.ttl, &self.manifest_digest) {
            debug!("Cache miss for {}: {}", fp.short(), reason);
            if entry.status == CacheStatus::Valid {
                self.mark_stale(fp, locked).await?;
            } else {
                self.publish(|map| {
                    map.insert(fp.clone(), entry);
                });
            }
            return Ok(None);
        }

        if !self.artifacts_present(&entry).await {
            warn!(
                "{}",
                BuildError::CacheCorruption {
                    fingerprint: fp.to_string(),
                    reason: "artifacts missing".to_string(),
                }
            );
            self.discard(fp, locked).await?;
            return Ok(None);
        }

        self.publish(|map| {
            map.insert(fp.clone(), entry.clone());
        });
        Ok(Some(entry))
    }

    /// Record `entry` under `fp`
    pub async fn store(&self, fp: &Fingerprint, entry: CacheEntry) -> BuildResult<()> {
        let flight = self.flight(fp);
        let _guard = flight.gate.lock().await;
        let _file = FileLock::acquire(&self.lock_file(fp)).await?;
        self.write_entry(fp, entry).await
    }

    /// Remove one entry and its artifacts
    pub async fn invalidate(&self, fp: &Fingerprint) -> BuildResult<()> {
        let flight = self.flight(fp);
        let _guard = flight.gate.lock().await;
        let _file = FileLock::acquire(&self.lock_file(fp)).await?;
        self.remove_entry(fp).await
    }

    /// Remove every entry and its lock file
    pub async fn clear(&self) -> BuildResult<usize> {
        let mut removed = 0;
        for fp in self.fingerprints_on_disk().await? {
            self.invalidate(&fp).await?;
            removed += 1;
        }
        self.remove_lock_files().await?;
        self.publish(|map| map.clear());
        info!("Cleared {} cache entries", removed);
        Ok(removed)
    }

    /// Every readable entry on disk, oldest first
    pub async fn entries(&self) -> BuildResult<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for fp in self.fingerprints_on_disk().await? {
            match self.read_entry(&fp).await {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => warn!("{}", e),
            }
        }
        entries.sort_by_key(|e| e.verified_at);
        Ok(entries)
    }

    /// Serve `fp` from the cache, or run `resolver` exactly once across all
    /// concurrent callers and record what it produced.
    ///
    /// The resolver gets an empty artifact directory. A failed resolution is
    /// recorded as `failed`; its error goes to the caller that ran it and to
    /// every caller that was waiting on it. The next caller resolves again.
    pub async fn get_or_resolve<F, Fut>(&self, fp: &Fingerprint, resolver: F) -> BuildResult<Cached>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = BuildResult<Resolution>>,
    {
        if let Some(entry) = self.lookup(fp).await? {
            return Ok(Cached { entry, hit: true });
        }

        let flight = self.flight(fp);
        let seen = flight.finished.load(Ordering::Acquire);
        let mut last_failure = flight.gate.lock().await;
        let _file = FileLock::acquire(&self.lock_file(fp)).await?;

        if flight.finished.load(Ordering::Acquire) != seen {
            if let Some(failure) = last_failure.as_ref() {
                debug!("{} failed while waiting: {}", fp.short(), failure);
                return Err(BuildError::Shared(failure.clone()));
            }
        }

        // Whoever held the lock before us may have resolved it already
        if let Some(entry) = self.lookup_inner(fp, true).await? {
            debug!("{} resolved while waiting", fp.short());
            return Ok(Cached { entry, hit: true });
        }

        let artifact_dir = self.artifact_dir(fp);
        self.remove_entry(fp).await?;
        fs::create_dir_all(&artifact_dir)
            .await
            .map_err(|e| BuildError::io(format!("creating {}", artifact_dir.display()), e))?;

        let outcome = match resolver(artifact_dir.clone()).await {
            Ok(resolution) => self.record_resolution(fp, &artifact_dir, resolution).await,
            Err(e) => {
                self.record_failure(fp).await;
                Err(e)
            }
        };

        *last_failure = None;
        let outcome = outcome.map_err(|e| {
            let shared = Arc::new(e);
            *last_failure = Some(shared.clone());
            BuildError::Shared(shared)
        });
        flight.finished.fetch_add(1, Ordering::Release);
        outcome
    }

    async fn record_resolution(
        &self,
        fp: &Fingerprint,
        artifact_dir: &Path,
        resolution: Resolution,
    ) -> BuildResult<Cached> {
        let refs = artifact_refs(artifact_dir, &resolution.artifacts)?;
        let entry = CacheEntry::valid(
            fp.clone(),
            resolution.package_manager,
            self.manifest_digest.clone(),
            refs,
        )
        .with_label(resolution.label);
        self.write_entry(fp, entry.clone()).await?;
        Ok(Cached { entry, hit: false })
    }

    /// Persist an expired or outdated entry as stale; takes the entry locks
    /// unless already held
    async fn mark_stale(&self, fp: &Fingerprint, locked: bool) -> BuildResult<()> {
        if locked {
            return self.mark_stale_locked(fp).await;
        }
        let flight = self.flight(fp);
        let _guard = flight.gate.lock().await;
        let _file = FileLock::acquire(&self.lock_file(fp)).await?;
        self.mark_stale_locked(fp).await
    }

    async fn mark_stale_locked(&self, fp: &Fingerprint) -> BuildResult<()> {
        // Re-read under the lock; another writer may have refreshed it
        let Ok(Some(mut entry)) = self.read_entry(fp).await else {
            return Ok(());
        };
        if entry.status == CacheStatus::Valid
            && entry.miss_reason(self.ttl, &self.manifest_digest).is_some()
        {
            entry.status = CacheStatus::Stale;
            self.write_entry(fp, entry).await?;
        }
        Ok(())
    }

    async fn record_failure(&self, fp: &Fingerprint) {
        let artifact_dir = self.artifact_dir(fp);
        if let Err(e) = fs::remove_dir_all(&artifact_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", artifact_dir.display(), e);
            }
        }

        let mut entry = CacheEntry::valid(
            fp.clone(),
            PackageManagerKind::Cpm,
            self.manifest_digest.clone(),
            BTreeSet::new(),
        );
        entry.status = CacheStatus::Failed;
        if let Some(previous) = self.read_snapshot().get(fp) {
            entry.package_manager = previous.package_manager;
            entry.label = previous.label.clone();
        }
        if let Err(e) = self.write_entry(fp, entry).await {
            warn!("Failed to record failed resolution: {}", e);
        }
    }

    /// Atomically replace `entry.json` and publish the entry
    async fn write_entry(&self, fp: &Fingerprint, entry: CacheEntry) -> BuildResult<()> {
        let dir = self.entry_dir(fp);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| BuildError::io(format!("creating {}", dir.display()), e))?;

        let json = serde_json::to_vec_pretty(&entry)?;
        write_atomic(&self.entry_file(fp), json).await?;

        debug!(status = %entry.status, "Stored cache entry {}", fp.short());
        self.publish(|map| {
            map.insert(fp.clone(), entry);
        });
        Ok(())
    }

    async fn read_entry(&self, fp: &Fingerprint) -> BuildResult<Option<CacheEntry>> {
        let path = self.entry_file(fp);
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BuildError::io(format!("reading {}", path.display()), e)),
        };

        let entry: CacheEntry =
            serde_json::from_slice(&content).map_err(|e| BuildError::CacheCorruption {
                fingerprint: fp.to_string(),
                reason: format!("unreadable metadata: {}", e),
            })?;

        if &entry.fingerprint != fp {
            return Err(BuildError::CacheCorruption {
                fingerprint: fp.to_string(),
                reason: format!("metadata belongs to {}", entry.fingerprint),
            });
        }
        Ok(Some(entry))
    }

    /// Drop a corrupt entry; takes the entry locks unless already held
    async fn discard(&self, fp: &Fingerprint, locked: bool) -> BuildResult<()> {
        if locked {
            self.remove_entry(fp).await
        } else {
            self.invalidate(fp).await
        }
    }

    /// Delete metadata first so readers never see metadata without artifacts
    async fn remove_entry(&self, fp: &Fingerprint) -> BuildResult<()> {
        let entry_file = self.entry_file(fp);
        match fs::remove_file(&entry_file).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(BuildError::io(format!("removing {}", entry_file.display()), e)),
        }

        let dir = self.entry_dir(fp);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => debug!("Removed cache entry {}", fp.short()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(BuildError::io(format!("removing {}", dir.display()), e)),
        }

        self.publish(|map| {
            map.remove(fp);
        });
        Ok(())
    }

    async fn artifacts_present(&self, entry: &CacheEntry) -> bool {
        let dir = self.artifact_dir(&entry.fingerprint);
        for artifact in &entry.artifact_refs {
            if fs::metadata(dir.join(artifact)).await.is_err() {
                return false;
            }
        }
        true
    }

    async fn fingerprints_on_disk(&self) -> BuildResult<Vec<Fingerprint>> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(BuildError::io(format!("listing {}", self.root.display()), e)),
        };

        let mut fingerprints = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| BuildError::io(format!("listing {}", self.root.display()), e))?
        {
            let is_dir = item.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            if let Ok(fp) = Fingerprint::parse(&item.file_name().to_string_lossy()) {
                fingerprints.push(fp);
            }
        }
        fingerprints.sort();
        Ok(fingerprints)
    }

    /// Remove `<fp>.lock` files, each while holding it.
    ///
    /// A process already blocked on a removed file still locks the old inode,
    /// so this is only safe on a cache no other process is resolving into.
    async fn remove_lock_files(&self) -> BuildResult<()> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(BuildError::io(format!("listing {}", self.root.display()), e)),
        };

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| BuildError::io(format!("listing {}", self.root.display()), e))?
        {
            let name = item.file_name().to_string_lossy().into_owned();
            let Some(fp) = name
                .strip_suffix(LOCK_SUFFIX)
                .and_then(|stem| Fingerprint::parse(stem).ok())
            else {
                continue;
            };

            let flight = self.flight(&fp);
            let _guard = flight.gate.lock().await;
            let path = self.lock_file(&fp);
            let _file = FileLock::acquire(&path).await?;
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(BuildError::io(format!("removing {}", path.display()), e)),
            }
        }
        Ok(())
    }

    fn flight(&self, fp: &Fingerprint) -> FlightHandle<'_> {
        let flight = self
            .flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(fp.clone())
            .or_default()
            .clone();
        FlightHandle {
            cache: self,
            fp: fp.clone(),
            flight,
        }
    }

    fn read_snapshot(&self) -> Snapshot {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Copy-on-write update of the published snapshot
    fn publish(&self, update: impl FnOnce(&mut HashMap<Fingerprint, CacheEntry>)) {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = HashMap::clone(&guard);
        update(&mut next);
        *guard = Arc::new(next);
    }
}

/// Artifact paths relative to `dir`; anything outside it is rejected
fn artifact_refs(dir: &Path, artifacts: &[PathBuf]) -> BuildResult<BTreeSet<PathBuf>> {
    artifacts
        .iter()
        .map(|path| {
            let relative = if path.is_absolute() {
                path.strip_prefix(dir).map(Path::to_path_buf).map_err(|_| {
                    BuildError::Internal(format!(
                        "artifact {} is outside {}",
                        path.display(),
                        dir.display()
                    ))
                })?
            } else {
                path.clone()
            };
            Ok(relative)
        })
        .collect()
}

/// Write through a temp file in the same directory, then rename
async fn write_atomic(path: &Path, content: Vec<u8>) -> BuildResult<()> {
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = target
            .parent()
            .ok_or_else(|| BuildError::Internal(format!("{} has no parent", target.display())))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| BuildError::io(format!("creating temp file in {}", dir.display()), e))?;
        tmp.write_all(&content)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| BuildError::io(format!("writing {}", target.display()), e))?;
        tmp.persist(&target)
            .map_err(|e| BuildError::io(format!("renaming into {}", target.display()), e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| BuildError::Internal(format!("write task failed: {}", e)))?
}
