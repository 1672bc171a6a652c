//! Backup engine (spec §4.I).
//!
//! Per plan: create a timestamped directory, run each component's backup
//! adapter in order, then optionally compress → encrypt → verify → upload
//! the result. CPU/IO-heavy steps (tar+gzip, hashing) run on
//! [`tokio::task::spawn_blocking`] so they don't starve the async runtime —
//! the same suspension-point discipline spec §5 calls out for this engine.

use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::task;

use crate::adapters::{BackupStorageAdapter, ComponentBackupAdapter, EncryptionAdapter};
use crate::errors::CoreError;
use crate::ids::{wall_now_millis, BackupExecutionId};
use crate::model::{
    BackupExecution, BackupManifest, BackupMetadata, BackupPlan, BackupType, ComponentResult,
    ExecutionStatus,
};
use crate::telemetry::{emit_best_effort, BackupEvent, PolicyEvent, TelemetrySink};

/// Components the engine knows how to back up (spec §4.I).
pub const RECOGNIZED_COMPONENTS: &[&str] = &["database", "redis", "configurations", "logs", "documents"];

/// Components whose backup failure fails the whole execution. The spec
/// names the concept ("a component marked critical") without specifying
/// which are critical for this fleet; `database` is the only one whose loss
/// makes a backup non-restorable, so it is the only critical component
/// (DESIGN.md decision).
pub const CRITICAL_COMPONENTS: &[&str] = &["database"];

fn is_critical(component: &str) -> bool {
    CRITICAL_COMPONENTS.contains(&component)
}

/// The outcome of one [`BackupEngine::execute`] call.
#[derive(Debug, Clone)]
pub struct BackupResult {
    pub execution: BackupExecution,
    pub manifest: Option<BackupManifest>,
}

pub struct BackupEngine<A, ST, E, S> {
    component_adapter: Arc<A>,
    storage: Arc<ST>,
    encryption: Arc<E>,
    sink: Arc<S>,
    base_path: PathBuf,
    remote_upload: bool,
    registry: DashMap<BackupExecutionId, BackupMetadata>,
    active_plans: DashMap<crate::ids::BackupPlanId, ()>,
}

impl<A, ST, E, S> BackupEngine<A, ST, E, S>
where
    A: ComponentBackupAdapter + 'static,
    ST: BackupStorageAdapter + 'static,
    E: EncryptionAdapter + 'static,
    S: TelemetrySink + 'static,
{
    pub fn new(component_adapter: Arc<A>, storage: Arc<ST>, encryption: Arc<E>, sink: Arc<S>, base_path: impl Into<PathBuf>) -> Self {
        Self::with_remote_upload(component_adapter, storage, encryption, sink, base_path, false)
    }

    /// Like [`Self::new`], but with remote storage upload enabled
    /// (`DSR_BACKUP_REMOTE`, spec §6).
    pub fn with_remote_upload(
        component_adapter: Arc<A>,
        storage: Arc<ST>,
        encryption: Arc<E>,
        sink: Arc<S>,
        base_path: impl Into<PathBuf>,
        remote_upload: bool,
    ) -> Self {
        Self {
            component_adapter,
            storage,
            encryption,
            sink,
            base_path: base_path.into(),
            remote_upload,
            registry: DashMap::new(),
            active_plans: DashMap::new(),
        }
    }

    fn validate(&self, plan: &BackupPlan) -> Result<(), CoreError> {
        if matches!(plan.backup_type, BackupType::Incremental) {
            return Err(CoreError::validation("incremental backups are not implemented"));
        }
        let recognized: HashSet<&str> = RECOGNIZED_COMPONENTS.iter().copied().collect();
        for component in &plan.components {
            if !recognized.contains(component.as_str()) {
                return Err(CoreError::validation(format!("unrecognized backup component {component}")));
            }
        }
        Ok(())
    }

    /// Run one plan to completion (spec §4.I). Returns `Ok` with a
    /// `Failed`-status result for domain-level failures (a critical
    /// component failed); `Err` only for preconditions that mean the run
    /// never started (bad input, duplicate active execution).
    pub async fn execute(&self, plan: BackupPlan) -> Result<BackupResult, CoreError> {
        self.validate(&plan)?;

        if self.active_plans.insert(plan.id, ()).is_some() {
            return Err(CoreError::conflict(format!("plan {} already has an active execution", plan.id)));
        }

        let execution_id = BackupExecutionId::new();
        let start_millis = wall_now_millis();
        emit_best_effort(
            (*self.sink).clone(),
            PolicyEvent::Backup(BackupEvent::Started {
                execution_id: execution_id.to_string(),
                plan_id: plan.id.to_string(),
            }),
        )
        .await;

        let result = self.run(execution_id, start_millis, &plan).await;
        self.active_plans.remove(&plan.id);
        result
    }

    async fn run(&self, execution_id: BackupExecutionId, start_millis: i64, plan: &BackupPlan) -> Result<BackupResult, CoreError> {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let type_dir = match plan.backup_type {
            BackupType::Full => "full",
            BackupType::Incremental => "incremental",
        };
        let dest_dir = self.base_path.join(type_dir).join(timestamp.to_string());
        task::spawn_blocking({
            let dir = dest_dir.clone();
            move || std::fs::create_dir_all(&dir)
        })
        .await
        .map_err(join_err)?
        .map_err(|e| CoreError::adapter_failure(format!("failed to create backup directory: {e}")))?;

        let mut results = Vec::new();
        let mut failed = false;
        for component in &plan.components {
            let outcome = self.component_adapter.backup(component, &dest_dir).await;
            let ok = outcome.is_ok();
            let critical = is_critical(component);
            emit_best_effort(
                (*self.sink).clone(),
                PolicyEvent::Backup(BackupEvent::ComponentCompleted {
                    execution_id: execution_id.to_string(),
                    component: component.clone(),
                    ok,
                }),
            )
            .await;
            results.push(ComponentResult {
                component: component.clone(),
                ok,
                critical,
                detail: outcome.err().map(|e| e.to_string()),
            });
            if !ok && critical {
                failed = true;
            }
        }

        if failed {
            let _ = task::spawn_blocking({
                let dir = dest_dir.clone();
                move || std::fs::remove_dir_all(&dir)
            })
            .await;
            let execution = BackupExecution {
                id: execution_id,
                plan_id: plan.id,
                start_millis,
                end_millis: Some(wall_now_millis()),
                status: ExecutionStatus::Failed,
                backup_path: None,
            };
            emit_best_effort(
                (*self.sink).clone(),
                PolicyEvent::Backup(BackupEvent::Failed {
                    execution_id: execution_id.to_string(),
                    reason: "critical component failed".to_string(),
                }),
            )
            .await;
            return Ok(BackupResult { execution, manifest: None });
        }

        let mut backup_path = dest_dir.clone();
        let mut compressed = false;
        let mut encrypted = false;

        if plan.compression {
            backup_path = compress_directory(&dest_dir).await?;
            compressed = true;
        }

        if plan.encryption {
            let encrypted_path = self.encryption.encrypt_file(backup_path.to_string_lossy().as_ref()).await?;
            let plaintext = backup_path.clone();
            let _ = task::spawn_blocking(move || std::fs::remove_file(&plaintext)).await;
            backup_path = PathBuf::from(encrypted_path);
            encrypted = true;
        }

        let checksum = checksum_of(&backup_path).await?;

        let mut verified = false;
        if plan.verification {
            verified = verify_artifact(&backup_path, &checksum).await.is_ok();
        }

        let remote_storage_location = if self.remote_upload {
            let key = backup_path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            self.storage.upload(backup_path.to_string_lossy().as_ref(), &key).await.ok()
        } else {
            None
        };

        let size_bytes = file_size(&backup_path).await.unwrap_or(0);

        let manifest = BackupManifest {
            backup_id: execution_id,
            components: results,
            checksum,
            compressed,
            encrypted,
            verified,
            created_at_millis: wall_now_millis(),
        };

        self.registry.insert(
            execution_id,
            BackupMetadata {
                backup_id: execution_id,
                backup_path: backup_path.to_string_lossy().to_string(),
                manifest: manifest.clone(),
                size_bytes,
                compressed,
                encrypted,
                remote_storage_location,
                integrity_verified: verified,
            },
        );

        let execution = BackupExecution {
            id: execution_id,
            plan_id: plan.id,
            start_millis,
            end_millis: Some(wall_now_millis()),
            status: ExecutionStatus::Completed,
            backup_path: Some(backup_path.to_string_lossy().to_string()),
        };

        emit_best_effort(
            (*self.sink).clone(),
            PolicyEvent::Backup(BackupEvent::Completed {
                execution_id: execution_id.to_string(),
                duration: std::time::Duration::from_millis(
                    (execution.end_millis.unwrap_or(start_millis) - start_millis).max(0) as u64,
                ),
            }),
        )
        .await;

        Ok(BackupResult { execution, manifest: Some(manifest) })
    }

    pub fn metadata(&self, backup_id: BackupExecutionId) -> Option<BackupMetadata> {
        self.registry.get(&backup_id).map(|e| e.clone())
    }

    /// Recompute the stored artifact's checksum and compare against the
    /// manifest (spec §8 scenario 4: a flipped byte is caught here).
    pub async fn verify_backup_integrity(&self, backup_id: BackupExecutionId) -> Result<(), CoreError> {
        let metadata = self
            .registry
            .get(&backup_id)
            .ok_or_else(|| CoreError::not_found(format!("no backup {backup_id}")))?
            .clone();
        verify_artifact(Path::new(&metadata.backup_path), &metadata.manifest.checksum).await
    }

    /// Restore from a backup. Refuses to run if integrity verification
    /// fails against the *current* artifact, not just the flag recorded at
    /// creation time (spec §4.I: "restore MUST refuse to run if integrity
    /// verification fails").
    pub async fn restore(&self, backup_id: BackupExecutionId) -> Result<(), CoreError> {
        self.verify_backup_integrity(backup_id).await?;
        let metadata = self
            .registry
            .get(&backup_id)
            .ok_or_else(|| CoreError::not_found(format!("no backup {backup_id}")))?
            .clone();

        let mut working_path = PathBuf::from(&metadata.backup_path);
        if metadata.encrypted {
            let decrypted = self.encryption.decrypt_file(working_path.to_string_lossy().as_ref()).await?;
            working_path = PathBuf::from(decrypted);
        }

        let restore_dir = if metadata.compressed {
            decompress_archive(&working_path).await?
        } else {
            working_path
        };

        for component in &metadata.manifest.components {
            if component.ok {
                self.component_adapter.restore(&component.component, &restore_dir).await?;
            }
        }
        Ok(())
    }

    /// Purge registry entries whose manifest is older than `retention`.
    /// Returns how many were purged (spec §4.I: "old metadata past
    /// retentionDays is purged by a scheduled sweep").
    pub async fn purge_expired(&self, retention: std::time::Duration) -> usize {
        let cutoff = wall_now_millis() - retention.as_millis() as i64;
        let expired: Vec<BackupExecutionId> = self
            .registry
            .iter()
            .filter(|entry| entry.value().manifest.created_at_millis < cutoff)
            .map(|entry| *entry.key())
            .collect();

        for id in &expired {
            if let Some((_, metadata)) = self.registry.remove(id) {
                if let Some(remote) = &metadata.remote_storage_location {
                    let _ = self.storage.delete(remote).await;
                }
                let _ = task::spawn_blocking({
                    let path = PathBuf::from(metadata.backup_path);
                    move || std::fs::remove_file(&path)
                })
                .await;
            }
        }
        expired.len()
    }
}

fn join_err(e: tokio::task::JoinError) -> CoreError {
    CoreError::adapter_failure(format!("backup task panicked: {e}"))
}

async fn compress_directory(dir: &Path) -> Result<PathBuf, CoreError> {
    let dir = dir.to_path_buf();
    task::spawn_blocking(move || -> Result<PathBuf, CoreError> {
        let archive_path = dir.with_extension("tar.gz");
        let file = std::fs::File::create(&archive_path)
            .map_err(|e| CoreError::adapter_failure(format!("failed to create archive: {e}")))?;
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder
            .append_dir_all(".", &dir)
            .map_err(|e| CoreError::adapter_failure(format!("failed to archive backup: {e}")))?;
        builder.into_inner().map_err(|e| CoreError::adapter_failure(format!("failed to finish archive: {e}")))?;
        std::fs::remove_dir_all(&dir)
            .map_err(|e| CoreError::adapter_failure(format!("failed to remove staging directory: {e}")))?;
        Ok(archive_path)
    })
    .await
    .map_err(join_err)?
}

async fn decompress_archive(archive: &Path) -> Result<PathBuf, CoreError> {
    let archive = archive.to_path_buf();
    task::spawn_blocking(move || -> Result<PathBuf, CoreError> {
        let dest_dir = archive.with_extension("");
        let file = std::fs::File::open(&archive)
            .map_err(|e| CoreError::adapter_failure(format!("failed to open archive: {e}")))?;
        let decoder = flate2::read::GzDecoder::new(file);
        let mut archive = tar::Archive::new(decoder);
        archive
            .unpack(&dest_dir)
            .map_err(|e| CoreError::adapter_failure(format!("failed to unpack archive: {e}")))?;
        Ok(dest_dir)
    })
    .await
    .map_err(join_err)?
}

async fn checksum_of(path: &Path) -> Result<String, CoreError> {
    let path = path.to_path_buf();
    task::spawn_blocking(move || -> Result<String, CoreError> {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = walk_files(&path);
            entries.sort();
            let mut hasher = Sha256::new();
            for entry in entries {
                let mut f = std::fs::File::open(&entry)
                    .map_err(|e| CoreError::adapter_failure(format!("failed to read {entry:?}: {e}")))?;
                let mut buf = Vec::new();
                f.read_to_end(&mut buf).map_err(|e| CoreError::adapter_failure(e.to_string()))?;
                hasher.update(&buf);
            }
            Ok(hex(hasher.finalize().as_slice()))
        } else {
            let bytes = std::fs::read(&path)
                .map_err(|e| CoreError::adapter_failure(format!("failed to read {path:?}: {e}")))?;
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            Ok(hex(hasher.finalize().as_slice()))
        }
    })
    .await
    .map_err(join_err)?
}

async fn verify_artifact(path: &Path, expected_checksum: &str) -> Result<(), CoreError> {
    let size = file_size(path).await?;
    if size == 0 {
        return Err(CoreError::integrity_failure(format!("backup artifact {path:?} is empty")));
    }
    let actual = checksum_of(path).await?;
    if actual != expected_checksum {
        return Err(CoreError::integrity_failure(format!("checksum mismatch for {path:?}")));
    }
    Ok(())
}

async fn file_size(path: &Path) -> Result<u64, CoreError> {
    let path = path.to_path_buf();
    task::spawn_blocking(move || -> Result<u64, CoreError> {
        if path.is_dir() {
            Ok(walk_files(&path).iter().filter_map(|p| std::fs::metadata(p).ok()).map(|m| m.len()).sum())
        } else {
            std::fs::metadata(&path).map(|m| m.len()).map_err(|e| CoreError::adapter_failure(e.to_string()))
        }
    })
    .await
    .map_err(join_err)?
}

fn walk_files(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else { return out };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            out.extend(walk_files(&path));
        } else {
            out.push(path);
        }
    }
    out
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BackupPlanId;
    use crate::telemetry::MemorySink;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct FileComponentAdapter;

    #[async_trait]
    impl ComponentBackupAdapter for FileComponentAdapter {
        async fn backup(&self, component: &str, destination_dir: &Path) -> Result<(), CoreError> {
            std::fs::write(destination_dir.join(format!("{component}.bin")), b"data")
                .map_err(|e| CoreError::adapter_failure(e.to_string()))
        }

        async fn restore(&self, _component: &str, _source_dir: &Path) -> Result<(), CoreError> {
            Ok(())
        }
    }

    struct FailingDatabaseAdapter;

    #[async_trait]
    impl ComponentBackupAdapter for FailingDatabaseAdapter {
        async fn backup(&self, component: &str, destination_dir: &Path) -> Result<(), CoreError> {
            if component == "database" {
                return Err(CoreError::adapter_failure("database unreachable"));
            }
            std::fs::write(destination_dir.join(format!("{component}.bin")), b"data")
                .map_err(|e| CoreError::adapter_failure(e.to_string()))
        }

        async fn restore(&self, _component: &str, _source_dir: &Path) -> Result<(), CoreError> {
            Ok(())
        }
    }

    struct NullStorage;

    #[async_trait]
    impl BackupStorageAdapter for NullStorage {
        async fn upload(&self, _local_path: &str, remote_key: &str) -> Result<String, CoreError> {
            Ok(format!("remote://{remote_key}"))
        }

        async fn delete(&self, _remote_key: &str) -> Result<(), CoreError> {
            Ok(())
        }
    }

    struct NullEncryption;

    #[async_trait]
    impl EncryptionAdapter for NullEncryption {
        async fn encrypt_file(&self, path: &str) -> Result<String, CoreError> {
            let encrypted = format!("{path}.enc");
            std::fs::copy(path, &encrypted).map_err(|e| CoreError::adapter_failure(e.to_string()))?;
            Ok(encrypted)
        }

        async fn decrypt_file(&self, path: &str) -> Result<String, CoreError> {
            let decrypted = path.trim_end_matches(".enc").to_string();
            std::fs::copy(path, &decrypted).map_err(|e| CoreError::adapter_failure(e.to_string()))?;
            Ok(decrypted)
        }
    }

    fn plan(components: Vec<&str>, compression: bool, encryption: bool, verification: bool) -> BackupPlan {
        BackupPlan {
            id: BackupPlanId::new(),
            backup_type: BackupType::Full,
            components: components.into_iter().map(String::from).collect(),
            compression,
            encryption,
            verification,
            retention_days: 30,
            scheduled_at_millis: None,
        }
    }

    fn engine(base: &Path) -> BackupEngine<FileComponentAdapter, NullStorage, NullEncryption, MemorySink> {
        BackupEngine::new(
            Arc::new(FileComponentAdapter),
            Arc::new(NullStorage),
            Arc::new(NullEncryption),
            Arc::new(MemorySink::unbounded()),
            base,
        )
    }

    #[tokio::test]
    async fn successful_backup_with_compression_encryption_and_verification() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        let result = engine
            .execute(plan(vec!["database", "configurations"], true, true, true))
            .await
            .unwrap();

        assert_eq!(result.execution.status, ExecutionStatus::Completed);
        let manifest = result.manifest.unwrap();
        assert!(manifest.verified);
        assert!(manifest.compressed);
        assert!(manifest.encrypted);

        let metadata = engine.metadata(result.execution.id).unwrap();
        assert!(metadata.integrity_verified);
    }

    #[tokio::test]
    async fn critical_component_failure_fails_whole_execution() {
        let dir = tempdir().unwrap();
        let engine = BackupEngine::new(
            Arc::new(FailingDatabaseAdapter),
            Arc::new(NullStorage),
            Arc::new(NullEncryption),
            Arc::new(MemorySink::unbounded()),
            dir.path(),
        );
        let result = engine.execute(plan(vec!["database", "logs"], false, false, false)).await.unwrap();
        assert_eq!(result.execution.status, ExecutionStatus::Failed);
        assert!(result.manifest.is_none());
    }

    #[tokio::test]
    async fn tampered_archive_fails_integrity_check_and_refuses_restore() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        let result = engine.execute(plan(vec!["database"], true, false, true)).await.unwrap();
        let backup_id = result.execution.id;
        let path = engine.metadata(backup_id).unwrap().backup_path;

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let verify_err = engine.verify_backup_integrity(backup_id).await.unwrap_err();
        assert!(verify_err.is_integrity_failure());

        let restore_err = engine.restore(backup_id).await.unwrap_err();
        assert!(restore_err.is_integrity_failure());
    }

    #[tokio::test]
    async fn duplicate_active_execution_is_conflict() {
        use std::sync::atomic::{AtomicBool, Ordering};

        struct SlowAdapter(Arc<AtomicBool>);

        #[async_trait]
        impl ComponentBackupAdapter for SlowAdapter {
            async fn backup(&self, _component: &str, _destination_dir: &Path) -> Result<(), CoreError> {
                while !self.0.load(Ordering::SeqCst) {
                    tokio::task::yield_now().await;
                }
                Ok(())
            }
            async fn restore(&self, _component: &str, _source_dir: &Path) -> Result<(), CoreError> {
                Ok(())
            }
        }

        let dir = tempdir().unwrap();
        let release = Arc::new(AtomicBool::new(false));
        let engine = Arc::new(BackupEngine::new(
            Arc::new(SlowAdapter(release.clone())),
            Arc::new(NullStorage),
            Arc::new(NullEncryption),
            Arc::new(MemorySink::unbounded()),
            dir.path(),
        ));

        let p = plan(vec!["logs"], false, false, false);
        let p2 = p.clone();
        let engine2 = engine.clone();
        let handle = tokio::spawn(async move { engine2.execute(p).await });
        tokio::task::yield_now().await;

        let err = engine.execute(p2).await.unwrap_err();
        assert!(err.is_conflict());

        release.store(true, Ordering::SeqCst);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn purge_expired_removes_old_entries() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        let result = engine.execute(plan(vec!["logs"], false, false, false)).await.unwrap();
        assert_eq!(result.execution.status, ExecutionStatus::Completed);

        // Force the manifest to look ancient.
        if let Some(mut entry) = engine.registry.get_mut(&result.execution.id) {
            entry.manifest.created_at_millis = 0;
        }

        let purged = engine.purge_expired(std::time::Duration::from_secs(86_400 * 30)).await;
        assert_eq!(purged, 1);
        assert!(engine.metadata(result.execution.id).is_none());
    }
}
