use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

const COPY_BUFFER_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    pub timeout: Duration,
    pub verify_checksum: bool,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub preserve_attrs: bool,
    /// -1 keeps the source owner.
    pub target_uid: i64,
    /// -1 keeps the source group.
    pub target_gid: i64,
    /// false copies and leaves the source in place.
    pub remove_source: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            verify_checksum: false,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(5),
            preserve_attrs: true,
            target_uid: -1,
            target_gid: -1,
            remove_source: true,
        }
    }
}

impl TransferOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            timeout: config.transfer.timeout(),
            verify_checksum: config.verify_checksums,
            retry_attempts: config.transfer.retry_attempts,
            retry_delay: config.transfer.retry_delay(),
            preserve_attrs: config.transfer.preserve_attrs,
            target_uid: config.transfer.target_uid,
            target_gid: config.transfer.target_gid,
            remove_source: config.delete_source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransferResult {
    pub success: bool,
    pub bytes_total: u64,
    pub bytes_copied: u64,
    pub duration: Duration,
    pub checksum: Option<String>,
    pub source_removed: bool,
    pub attempts: u32,
    pub error: Option<String>,
}

pub trait Transferer: Send + Sync {
    fn name(&self) -> &'static str;

    fn transfer(&self, src: &Path, dst: &Path, options: &TransferOptions)
        -> Result<TransferResult>;
}

fn preflight(src: &Path, dst: &Path) -> Result<u64> {
    let metadata = match fs::metadata(src) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(EngineError::SourceMissing(src.to_path_buf()))
        }
        Err(err) => return Err(EngineError::io(src, err)),
    };
    if fs::symlink_metadata(dst).is_ok() {
        return Err(EngineError::DestinationExists(dst.to_path_buf()));
    }
    if let Some(parent) = dst.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| EngineError::io(parent, err))?;
    }
    Ok(metadata.len())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NativeTransferer;

impl Transferer for NativeTransferer {
    fn name(&self) -> &'static str {
        "native"
    }

    fn transfer(
        &self,
        src: &Path,
        dst: &Path,
        options: &TransferOptions,
    ) -> Result<TransferResult> {
        let bytes_total = preflight(src, dst)?;
        let started = Instant::now();

        if options.remove_source && fs::rename(src, dst).is_ok() {
            if let Err(err) = apply_ownership(dst, options) {
                warn!(dst = %dst.display(), error = %err, "ownership update failed after rename");
            }
            return Ok(TransferResult {
                success: true,
                bytes_total,
                bytes_copied: bytes_total,
                duration: started.elapsed(),
                source_removed: true,
                attempts: 1,
                ..TransferResult::default()
            });
        }

        let deadline = started.checked_add(options.timeout);
        let attempts = options.retry_attempts.max(1);
        let mut result = TransferResult {
            bytes_total,
            ..TransferResult::default()
        };

        for attempt in 1..=attempts {
            result.attempts = attempt;
            match copy_verified(src, dst, options, deadline) {
                Ok((bytes, checksum)) => {
                    result.bytes_copied = bytes;
                    result.checksum = Some(checksum);
                    result.error = None;
                    break;
                }
                Err(err) => {
                    if err.kind() == io::ErrorKind::AlreadyExists {
                        return Err(EngineError::DestinationExists(dst.to_path_buf()));
                    }
                    let _ = fs::remove_file(dst);
                    warn!(
                        src = %src.display(),
                        attempt,
                        error = %err,
                        "copy attempt failed"
                    );
                    result.error = Some(err.to_string());
                    if err.kind() == io::ErrorKind::TimedOut {
                        break;
                    }
                    if attempt < attempts {
                        thread::sleep(options.retry_delay);
                    }
                }
            }
        }

        if result.error.is_none() {
            finish_copy(src, dst, options, &mut result, |path| fs::remove_file(path));
        }
        result.duration = started.elapsed();
        Ok(result)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KernelCopyTransferer;

impl Transferer for KernelCopyTransferer {
    fn name(&self) -> &'static str {
        "kernel_copy"
    }

    fn transfer(
        &self,
        src: &Path,
        dst: &Path,
        options: &TransferOptions,
    ) -> Result<TransferResult> {
        let bytes_total = preflight(src, dst)?;
        let started = Instant::now();
        let mut result = TransferResult {
            bytes_total,
            attempts: 1,
            ..TransferResult::default()
        };

        let copied = fs::copy(src, dst).and_then(|bytes| {
            let checksum = hash_file(dst)?;
            if options.verify_checksum && hash_file(src)? != checksum {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "checksum mismatch after copy",
                ));
            }
            apply_ownership(dst, options)?;
            Ok((bytes, checksum))
        });

        match copied {
            Ok((bytes, checksum)) => {
                result.bytes_copied = bytes;
                result.checksum = Some(checksum);
                finish_copy(src, dst, options, &mut result, |path| fs::remove_file(path));
            }
            Err(err) => {
                let _ = fs::remove_file(dst);
                result.error = Some(err.to_string());
            }
        }
        result.duration = started.elapsed();
        Ok(result)
    }
}

pub struct FallbackTransferer {
    backends: Vec<Box<dyn Transferer>>,
}

impl FallbackTransferer {
    pub fn new(backends: Vec<Box<dyn Transferer>>) -> Self {
        Self { backends }
    }
}

impl Default for FallbackTransferer {
    fn default() -> Self {
        Self::new(vec![Box::new(NativeTransferer), Box::new(KernelCopyTransferer)])
    }
}

impl Transferer for FallbackTransferer {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn transfer(
        &self,
        src: &Path,
        dst: &Path,
        options: &TransferOptions,
    ) -> Result<TransferResult> {
        let mut last = TransferResult {
            error: Some("no transfer backend configured".to_string()),
            ..TransferResult::default()
        };
        for backend in &self.backends {
            let result = backend.transfer(src, dst, options)?;
            if result.success {
                debug!(backend = backend.name(), dst = %dst.display(), "transfer complete");
                return Ok(result);
            }
            warn!(
                backend = backend.name(),
                error = result.error.as_deref().unwrap_or("unknown"),
                "transfer backend failed; trying next"
            );
            last = result;
        }
        Ok(last)
    }
}

fn copy_verified(
    src: &Path,
    dst: &Path,
    options: &TransferOptions,
    deadline: Option<Instant>,
) -> io::Result<(u64, String)> {
    let source = File::open(src)?;
    let source_meta = source.metadata()?;
    let mut reader = BufReader::new(source);
    let mut target = OpenOptions::new().write(true).create_new(true).open(dst)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0_u8; COPY_BUFFER_BYTES];
    let mut copied = 0_u64;

    loop {
        if deadline.is_some_and(|deadline| Instant::now() > deadline) {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "transfer timed out"));
        }
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        target.write_all(&buffer[..read])?;
        hasher.update(&buffer[..read]);
        copied += read as u64;
    }
    target.sync_all()?;

    if options.preserve_attrs {
        target.set_permissions(source_meta.permissions())?;
        if let Ok(modified) = source_meta.modified() {
            target.set_modified(modified)?;
        }
        preserve_owner(dst, &source_meta);
    }
    drop(target);

    let checksum = hasher.finalize().to_hex().to_string();
    if options.verify_checksum && hash_file(dst)? != checksum {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "checksum mismatch after copy",
        ));
    }
    apply_ownership(dst, options)?;
    Ok((copied, checksum))
}

/// A move whose source cannot be removed is rolled back so no second copy stays behind.
fn finish_copy(
    src: &Path,
    dst: &Path,
    options: &TransferOptions,
    result: &mut TransferResult,
    remove_source: impl FnOnce(&Path) -> io::Result<()>,
) {
    if !options.remove_source {
        result.success = true;
        return;
    }
    let Err(err) = remove_source(src) else {
        result.source_removed = true;
        result.success = true;
        return;
    };
    result.error = Some(match fs::remove_file(dst) {
        Ok(()) => format!(
            "failed to remove source {} after copy, copy discarded: {err}",
            src.display()
        ),
        Err(cleanup) => format!(
            "failed to remove source {} after copy: {err}; copy left at {}: {cleanup}",
            src.display(),
            dst.display()
        ),
    });
}

pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0_u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(unix)]
fn apply_ownership(path: &Path, options: &TransferOptions) -> io::Result<()> {
    let uid = u32::try_from(options.target_uid).ok();
    let gid = u32::try_from(options.target_gid).ok();
    if uid.is_none() && gid.is_none() {
        return Ok(());
    }
    std::os::unix::fs::chown(path, uid, gid)
}

/// Best effort: only privileged processes may give files away.
#[cfg(unix)]
fn preserve_owner(path: &Path, source: &fs::Metadata) {
    use std::os::unix::fs::MetadataExt;

    if let Err(err) = std::os::unix::fs::chown(path, Some(source.uid()), Some(source.gid())) {
        debug!(path = %path.display(), error = %err, "kept copier ownership");
    }
}

#[cfg(not(unix))]
fn preserve_owner(_path: &Path, _source: &fs::Metadata) {}

#[cfg(not(unix))]
fn apply_ownership(_path: &Path, _options: &TransferOptions) -> io::Result<()> {
    Ok(())
}
