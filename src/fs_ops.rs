//! Write-then-rename helpers so a crash never leaves a half-written output.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use uuid::Uuid;

/// Hidden sibling of `dest` with a unique suffix, on the same filesystem.
pub fn staging_path(dest: &Path) -> PathBuf {
    hidden_sibling(dest, &format!("{}.tmp", Uuid::new_v4().simple()))
}

pub fn write_file_atomic(dest: &Path, bytes: &[u8]) -> io::Result<()> {
    let staged = staging_path(dest);
    if let Err(e) = fs::write(&staged, bytes) {
        let _ = fs::remove_file(&staged);
        return Err(e);
    }
    fs::rename(&staged, dest)
}

/// Move the fully written `staged` directory into place, replacing `dest`.
pub fn replace_dir(staged: &Path, dest: &Path) -> io::Result<()> {
    let old = hidden_sibling(dest, &format!("{}.old", Uuid::new_v4().simple()));
    let had_previous = dest.exists();
    if had_previous {
        fs::rename(dest, &old)?;
    }
    if let Err(e) = fs::rename(staged, dest) {
        if had_previous {
            let _ = fs::rename(&old, dest);
        }
        return Err(e);
    }
    if had_previous {
        if old.is_dir() {
            fs::remove_dir_all(&old)?;
        } else {
            fs::remove_file(&old)?;
        }
    }
    Ok(())
}

fn hidden_sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    path.with_file_name(format!(".{}.{}", name, suffix))
}
