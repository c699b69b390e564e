//! Reference mirrored-drive storage engine.
//!
//! Every drive holds a full copy: buckets are directories and objects are
//! files under `<drive>/<bucket>/`. Each drive carries a format descriptor at
//! `<drive>/.quorio.sys/format.json` naming the deployment it belongs to.

use super::{
    BackendInfo, BackendKind, BucketInfo, Disk, ListObjectsInfo, ObjectInfo, ObjectLayer,
    StorageBootstrap, StorageInfo,
};
use crate::names::RESERVED_BUCKET;
use crate::{QuorioError, Result, compute_hash};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use ulid::Ulid;

const FORMAT_FILE: &str = "format.json";
const FORMAT_VERSION: &str = "1";
const FORMAT_NAME: &str = "mirror";
const TMP_DIR: &str = "tmp";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatDescriptor {
    pub version: String,
    pub format: String,
    pub deployment_id: String,
    pub disk_id: String,
}

impl FormatDescriptor {
    fn new(deployment_id: &str) -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            format: FORMAT_NAME.to_string(),
            deployment_id: deployment_id.to_string(),
            disk_id: Ulid::new().to_string(),
        }
    }
}

fn sys_dir(root: &Path) -> PathBuf {
    root.join(RESERVED_BUCKET)
}

fn format_path(root: &Path) -> PathBuf {
    sys_dir(root).join(FORMAT_FILE)
}

async fn read_format(root: &Path) -> Option<FormatDescriptor> {
    let data = fs::read(format_path(root)).await.ok()?;
    match serde_json::from_slice::<FormatDescriptor>(&data) {
        Ok(format) if format.format == FORMAT_NAME => Some(format),
        Ok(_) | Err(_) => {
            tracing::warn!("Ignoring unreadable format descriptor on {:?}", root);
            None
        }
    }
}

/// Write to a per-drive temporary file first, then rename for atomicity.
async fn write_file(root: &Path, target: &Path, payload: &[u8]) -> Result<()> {
    let tmp_dir = sys_dir(root).join(TMP_DIR);
    fs::create_dir_all(&tmp_dir).await?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }

    let temp_path = tmp_dir.join(Ulid::new().to_string());
    let mut file = fs::File::create(&temp_path).await?;
    let written = async {
        file.write_all(payload).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, target).await
    }
    .await;

    if let Err(error) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(error.into());
    }
    Ok(())
}

async fn write_format(root: &Path, format: &FormatDescriptor) -> Result<()> {
    let payload = serde_json::to_vec_pretty(format)?;
    write_file(root, &format_path(root), &payload).await
}

/// Most common deployment among `formats` and how many drives carry it.
fn majority_deployment(formats: &[Option<FormatDescriptor>]) -> Option<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for format in formats.iter().flatten() {
        *counts.entry(format.deployment_id.as_str()).or_default() += 1;
    }

    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(id, count)| (id.to_string(), count))
}

fn system_time_to_utc(time: std::io::Result<std::time::SystemTime>) -> DateTime<Utc> {
    time.map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now())
}

/// Builds [`MirrorObjectLayer`] instances over a static list of drives.
pub struct MirrorBootstrap {
    endpoints: Vec<PathBuf>,
}

impl MirrorBootstrap {
    pub fn new(endpoints: Vec<PathBuf>) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(QuorioError::Config(
                "at least one drive endpoint is required".to_string(),
            ));
        }
        Ok(Self { endpoints })
    }

    pub fn endpoints(&self) -> &[PathBuf] {
        &self.endpoints
    }

    /// Formats a brand-new deployment when no drive carries a descriptor yet,
    /// then opens the engine. Used once at node startup.
    pub async fn initialize(&self) -> Result<Arc<dyn ObjectLayer>> {
        for endpoint in &self.endpoints {
            fs::create_dir_all(endpoint).await?;
        }

        let disks = self.init_disks().await?;
        let mut formats = Vec::with_capacity(disks.len());
        for disk in &disks {
            formats.push(read_format(&disk.endpoint).await);
        }

        if formats.iter().all(Option::is_none) {
            let deployment_id = Ulid::new().to_string();
            for disk in disks.iter().filter(|disk| disk.online) {
                write_format(&disk.endpoint, &FormatDescriptor::new(&deployment_id)).await?;
            }
            tracing::info!(
                "Formatted {} drive(s) for new deployment {}",
                disks.len(),
                deployment_id
            );
        }

        self.open(disks).await
    }
}

#[async_trait]
impl StorageBootstrap for MirrorBootstrap {
    fn backend_kind(&self) -> BackendKind {
        if self.endpoints.len() > 1 {
            BackendKind::Erasure
        } else {
            BackendKind::Fs
        }
    }

    async fn init_disks(&self) -> Result<Vec<Disk>> {
        let mut disks = Vec::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            let online = fs::metadata(endpoint)
                .await
                .map(|meta| meta.is_dir())
                .unwrap_or(false);
            if !online {
                tracing::warn!("Drive {:?} is offline", endpoint);
            }
            disks.push(Disk {
                endpoint: endpoint.clone(),
                online,
            });
        }
        Ok(disks)
    }

    async fn heal_format(&self, disks: &[Disk]) -> Result<()> {
        let mut formats = Vec::with_capacity(disks.len());
        for disk in disks {
            formats.push(if disk.online {
                read_format(&disk.endpoint).await
            } else {
                None
            });
        }

        let (deployment_id, formatted) = majority_deployment(&formats).ok_or_else(|| {
            QuorioError::Storage("no formatted drive available to heal from".to_string())
        })?;
        let read_quorum = (disks.len() / 2).max(1);
        if formatted < read_quorum {
            return Err(QuorioError::Storage(format!(
                "insufficient formatted drives: {} of {} carry deployment {}",
                formatted,
                disks.len(),
                deployment_id
            )));
        }

        let mut healed = 0;
        for (disk, format) in disks.iter().zip(&formats) {
            if !disk.online {
                continue;
            }
            match format {
                Some(existing) if existing.deployment_id == deployment_id => {}
                Some(existing) => {
                    tracing::warn!(
                        "Drive {:?} belongs to deployment {}, leaving it untouched",
                        disk.endpoint,
                        existing.deployment_id
                    );
                }
                None => {
                    write_format(&disk.endpoint, &FormatDescriptor::new(&deployment_id)).await?;
                    healed += 1;
                }
            }
        }

        tracing::info!(
            "Format heal complete: {} drive(s) rewritten for deployment {}",
            healed,
            deployment_id
        );
        Ok(())
    }

    async fn open(&self, disks: Vec<Disk>) -> Result<Arc<dyn ObjectLayer>> {
        let mut formats = Vec::with_capacity(disks.len());
        for disk in &disks {
            formats.push(if disk.online {
                read_format(&disk.endpoint).await
            } else {
                None
            });
        }

        let (deployment_id, _) = majority_deployment(&formats)
            .ok_or_else(|| QuorioError::Storage("no formatted drives found".to_string()))?;

        let drives: Vec<PathBuf> = disks
            .iter()
            .zip(&formats)
            .filter(|(_, format)| {
                format
                    .as_ref()
                    .is_some_and(|format| format.deployment_id == deployment_id)
            })
            .map(|(disk, _)| disk.endpoint.clone())
            .collect();

        Ok(Arc::new(MirrorObjectLayer::new(
            self.backend_kind(),
            drives,
            disks.len(),
        )))
    }
}

pub struct MirrorObjectLayer {
    kind: BackendKind,
    drives: Vec<PathBuf>,
    total_disks: usize,
    closed: AtomicBool,
}

/// One stored copy of an object.
struct ObjectCopy {
    size: u64,
    mod_time: DateTime<Utc>,
    etag: String,
}

impl MirrorObjectLayer {
    pub fn new(kind: BackendKind, drives: Vec<PathBuf>, total_disks: usize) -> Self {
        Self {
            kind,
            drives,
            total_disks,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(QuorioError::Storage(
                "storage engine has been shut down".to_string(),
            ));
        }
        Ok(())
    }

    fn bucket_dir(drive: &Path, bucket: &str) -> PathBuf {
        drive.join(bucket)
    }

    fn object_path(drive: &Path, bucket: &str, object: &str) -> PathBuf {
        let mut path = Self::bucket_dir(drive, bucket);
        for component in object.split('/') {
            path.push(component);
        }
        path
    }

    async fn bucket_exists_on(drive: &Path, bucket: &str) -> bool {
        fs::metadata(Self::bucket_dir(drive, bucket))
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }

    async fn bucket_exists(&self, bucket: &str) -> bool {
        for drive in &self.drives {
            if Self::bucket_exists_on(drive, bucket).await {
                return true;
            }
        }
        false
    }

    async fn read_copy(drive: &Path, bucket: &str, object: &str) -> Option<(Bytes, ObjectCopy)> {
        let path = Self::object_path(drive, bucket, object);
        let meta = fs::metadata(&path).await.ok()?;
        if !meta.is_file() {
            return None;
        }
        let data = fs::read(&path).await.ok()?;
        let copy = ObjectCopy {
            size: data.len() as u64,
            mod_time: system_time_to_utc(meta.modified()),
            etag: compute_hash(&data),
        };
        Some((Bytes::from(data), copy))
    }

    /// The object's info when some drive is missing it or the copies differ.
    async fn heal_candidate(&self, bucket: &str, object: &str) -> Option<ObjectInfo> {
        let mut first: Option<ObjectCopy> = None;
        let mut present = 0;
        let mut consistent = true;
        for drive in &self.drives {
            if let Some((_, copy)) = Self::read_copy(drive, bucket, object).await {
                present += 1;
                match &first {
                    Some(reference) if reference.etag != copy.etag => consistent = false,
                    Some(_) => {}
                    None => first = Some(copy),
                }
            }
        }

        if present == self.total_disks && consistent {
            return None;
        }
        first.map(|copy| ObjectInfo {
            bucket: bucket.to_string(),
            name: object.to_string(),
            size: copy.size,
            mod_time: copy.mod_time,
            etag: copy.etag,
        })
    }

    /// Creates `bucket` on every drive.
    pub async fn make_bucket(&self, bucket: &str) -> Result<()> {
        self.ensure_open()?;
        for drive in &self.drives {
            fs::create_dir_all(Self::bucket_dir(drive, bucket)).await?;
        }
        Ok(())
    }

    /// Writes `data` to every drive.
    pub async fn put_object(&self, bucket: &str, object: &str, data: Bytes) -> Result<ObjectInfo> {
        self.ensure_open()?;
        if !self.bucket_exists(bucket).await {
            return Err(QuorioError::BucketNotFound(bucket.to_string()));
        }
        for drive in &self.drives {
            write_file(drive, &Self::object_path(drive, bucket, object), &data).await?;
        }
        self.get_object_info(bucket, object).await
    }

    /// Object names under `bucket` on one drive, relative and `/`-separated.
    async fn walk_bucket(drive: &Path, bucket: &str) -> Result<Vec<String>> {
        let root = Self::bucket_dir(drive, bucket);
        let mut names = Vec::new();
        let mut pending = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => continue,
                Err(error) => return Err(error.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    if let Ok(relative) = path.strip_prefix(&root) {
                        let name: Vec<String> = relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy().into_owned())
                            .collect();
                        names.push(name.join("/"));
                    }
                }
            }
        }

        Ok(names)
    }

    async fn bucket_names(drive: &Path) -> Result<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        let mut entries = match fs::read_dir(drive).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(error) => return Err(error.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name != RESERVED_BUCKET {
                    names.insert(name.to_string());
                }
            }
        }
        Ok(names)
    }

    async fn dir_size(dir: &Path) -> Result<u64> {
        let mut total = 0;
        let mut pending = vec![dir.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    pending.push(entry.path());
                } else {
                    total += meta.len();
                }
            }
        }
        Ok(total)
    }
}

#[async_trait]
impl ObjectLayer for MirrorObjectLayer {
    async fn storage_info(&self) -> Result<StorageInfo> {
        self.ensure_open()?;

        let mut used = 0;
        if let Some(drive) = self.drives.first() {
            for bucket in Self::bucket_names(drive).await? {
                used += Self::dir_size(&Self::bucket_dir(drive, &bucket)).await?;
            }
        }

        let (read_quorum, write_quorum) = match self.kind {
            BackendKind::Fs => (1, 1),
            BackendKind::Erasure => ((self.total_disks / 2).max(1), self.total_disks / 2 + 1),
        };

        Ok(StorageInfo {
            used,
            backend: BackendInfo {
                kind: self.kind,
                online_disks: self.drives.len(),
                offline_disks: self.total_disks.saturating_sub(self.drives.len()),
                read_quorum,
                write_quorum,
            },
        })
    }

    async fn get_bucket_info(&self, bucket: &str) -> Result<BucketInfo> {
        self.ensure_open()?;
        for drive in &self.drives {
            if let Ok(meta) = fs::metadata(Self::bucket_dir(drive, bucket)).await {
                if meta.is_dir() {
                    return Ok(BucketInfo {
                        name: bucket.to_string(),
                        created: system_time_to_utc(meta.created().or_else(|_| meta.modified())),
                    });
                }
            }
        }
        Err(QuorioError::BucketNotFound(bucket.to_string()))
    }

    async fn get_object_info(&self, bucket: &str, object: &str) -> Result<ObjectInfo> {
        self.ensure_open()?;
        if !self.bucket_exists(bucket).await {
            return Err(QuorioError::BucketNotFound(bucket.to_string()));
        }

        for drive in &self.drives {
            if let Some((_, copy)) = Self::read_copy(drive, bucket, object).await {
                return Ok(ObjectInfo {
                    bucket: bucket.to_string(),
                    name: object.to_string(),
                    size: copy.size,
                    mod_time: copy.mod_time,
                    etag: copy.etag,
                });
            }
        }

        Err(QuorioError::ObjectNotFound {
            bucket: bucket.to_string(),
            object: object.to_string(),
        })
    }

    async fn heal_bucket(&self, bucket: &str) -> Result<()> {
        self.ensure_open()?;
        if !self.bucket_exists(bucket).await {
            return Err(QuorioError::BucketNotFound(bucket.to_string()));
        }

        let mut healed = 0;
        for drive in &self.drives {
            if !Self::bucket_exists_on(drive, bucket).await {
                fs::create_dir_all(Self::bucket_dir(drive, bucket)).await?;
                healed += 1;
            }
        }

        tracing::info!("Healed bucket {} on {} drive(s)", bucket, healed);
        Ok(())
    }

    async fn heal_object(&self, bucket: &str, object: &str) -> Result<()> {
        self.ensure_open()?;

        let mut copies = Vec::with_capacity(self.drives.len());
        for drive in &self.drives {
            copies.push(Self::read_copy(drive, bucket, object).await);
        }

        let mut votes: HashMap<&str, usize> = HashMap::new();
        for (_, copy) in copies.iter().flatten() {
            *votes.entry(copy.etag.as_str()).or_default() += 1;
        }
        let reference_etag = votes
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(etag, _)| etag.to_string())
            .ok_or_else(|| QuorioError::ObjectNotFound {
                bucket: bucket.to_string(),
                object: object.to_string(),
            })?;

        let reference = copies
            .iter()
            .flatten()
            .find(|(_, copy)| copy.etag == reference_etag)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| QuorioError::Internal("reference copy vanished".to_string()))?;

        let mut healed = 0;
        for (drive, copy) in self.drives.iter().zip(&copies) {
            let current = copy.as_ref().map(|(_, copy)| copy.etag.as_str());
            if current == Some(reference_etag.as_str()) {
                continue;
            }
            fs::create_dir_all(Self::bucket_dir(drive, bucket)).await?;
            write_file(drive, &Self::object_path(drive, bucket, object), &reference).await?;
            healed += 1;
        }

        tracing::info!("Healed object {}/{} on {} drive(s)", bucket, object, healed);
        Ok(())
    }

    async fn list_buckets_heal(&self) -> Result<Vec<BucketInfo>> {
        self.ensure_open()?;

        let mut per_drive = Vec::with_capacity(self.drives.len());
        for drive in &self.drives {
            per_drive.push(Self::bucket_names(drive).await?);
        }

        let all: BTreeSet<&String> = per_drive.iter().flatten().collect();
        let mut unhealthy = Vec::new();
        for name in all {
            if per_drive.iter().any(|names| !names.contains(name)) {
                unhealthy.push(self.get_bucket_info(name).await?);
            }
        }
        Ok(unhealthy)
    }

    async fn list_objects_heal(
        &self,
        bucket: &str,
        prefix: &str,
        marker: &str,
        delimiter: &str,
        max_keys: usize,
    ) -> Result<ListObjectsInfo> {
        self.ensure_open()?;
        if !self.bucket_exists(bucket).await {
            return Err(QuorioError::BucketNotFound(bucket.to_string()));
        }

        // A marker that is itself a common prefix covers every key under it.
        let marker_is_prefix = !delimiter.is_empty() && marker.ends_with(delimiter);
        let mut names: BTreeSet<String> = BTreeSet::new();
        for drive in &self.drives {
            names.extend(
                Self::walk_bucket(drive, bucket)
                    .await?
                    .into_iter()
                    .filter(|name| name.starts_with(prefix) && name.as_str() > marker)
                    .filter(|name| !(marker_is_prefix && name.starts_with(marker))),
            );
        }

        // Entries in key order: objects, or common prefixes when grouped.
        let mut entries: BTreeMap<String, Option<ObjectInfo>> = BTreeMap::new();
        for name in names {
            let Some(info) = self.heal_candidate(bucket, &name).await else {
                continue;
            };

            if !delimiter.is_empty() {
                if let Some(pos) = name[prefix.len()..].find(delimiter) {
                    let common = name[..prefix.len() + pos + delimiter.len()].to_string();
                    entries.entry(common).or_insert(None);
                    continue;
                }
            }
            entries.insert(name, Some(info));
        }

        let mut result = ListObjectsInfo::default();
        let mut last_key = None;
        for (key, entry) in entries {
            if result.objects.len() + result.prefixes.len() >= max_keys {
                result.is_truncated = true;
                break;
            }
            match entry {
                Some(info) => result.objects.push(info),
                None => result.prefixes.push(key.clone()),
            }
            last_key = Some(key);
        }
        if result.is_truncated {
            result.next_marker = last_key;
        }

        Ok(result)
    }

    async fn shutdown(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        tracing::info!("Storage engine over {} drive(s) shut down", self.drives.len());
        Ok(())
    }
}
