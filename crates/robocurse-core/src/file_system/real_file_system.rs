use std::fs;
use std::path::Path;

use super::{FileSystem, FsError};

pub struct RealFileSystem;

impl RealFileSystem {
    pub fn new() -> Self {
        Self
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> FsError {
        match e.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(path.display().to_string()),
            std::io::ErrorKind::PermissionDenied => {
                FsError::PermissionDenied(path.display().to_string())
            }
            _ => FsError::IoError(format!("{}: {}", path.display(), e)),
        }
    }
}

impl Default for RealFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for RealFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        fs::create_dir_all(path).map_err(|e| Self::map_io_error(e, path))
    }

    fn available_space(&self, path: &Path) -> Result<u64, FsError> {
        available_space_impl(path)
    }

    fn dir_size(&self, path: &Path) -> Result<u64, FsError> {
        if !path.is_dir() {
            return Err(FsError::NotADirectory(path.display().to_string()));
        }
        let mut total = 0u64;
        let mut stack = vec![path.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir).map_err(|e| Self::map_io_error(e, &dir))? {
                let entry = entry.map_err(|e| FsError::IoError(e.to_string()))?;
                let entry_path = entry.path();
                if entry_path.is_dir() {
                    stack.push(entry_path);
                } else if let Ok(meta) = entry.metadata() {
                    total += meta.len();
                }
            }
        }
        Ok(total)
    }
}

#[cfg(unix)]
fn available_space_impl(path: &Path) -> Result<u64, FsError> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| FsError::IoError(format!("{}: invalid path", path.display())))?;
    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return Err(FsError::IoError(format!(
                "statvfs failed for {}",
                path.display()
            )));
        }
        Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
    }
}

#[cfg(not(unix))]
fn available_space_impl(path: &Path) -> Result<u64, FsError> {
    // No portable probe here; report unknown-as-plenty and let the copy
    // tool surface out-of-space errors.
    let _ = path;
    Ok(u64::MAX)
}
