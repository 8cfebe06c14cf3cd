use eyre::Context as _;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write as _,
    path::{Path, PathBuf},
};

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt as _, PermissionsExt as _};

pub const MODE_DIR_PRIVATE: u32 = 0o700;
pub const MODE_FILE_PRIVATE: u32 = 0o600;

/// Create `dir` if needed and clamp it to owner-only permissions on Unix.
pub fn ensure_private_dir(dir: &Path) -> eyre::Result<()> {
    match fs::symlink_metadata(dir) {
        Ok(md) if md.file_type().is_symlink() => {
            eyre::bail!("refusing to use symlinked directory: {}", dir.display());
        }
        Ok(md) if !md.is_dir() => eyre::bail!("expected directory at {}", dir.display()),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
        }
        Err(e) => return Err(eyre::Report::new(e).wrap_err(format!("stat {}", dir.display()))),
    }

    #[cfg(unix)]
    {
        let mode = fs::metadata(dir)
            .with_context(|| format!("stat {}", dir.display()))?
            .permissions()
            .mode();
        if (mode & 0o077) != 0 {
            fs::set_permissions(dir, fs::Permissions::from_mode(MODE_DIR_PRIVATE))
                .with_context(|| format!("chmod {MODE_DIR_PRIVATE:o} {}", dir.display()))?;
        }
    }
    Ok(())
}

fn sibling_tmp(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let suffix = hex::encode(rand::random::<u64>().to_le_bytes());
    path.with_file_name(format!(".{name}.tmp.{suffix}"))
}

/// Write `bytes` to a fresh private temp file next to `path`, fsync, then rename over `path`.
/// Readers see either the old or the new content, never a torn file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> eyre::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| eyre::eyre!("missing parent for {}", path.display()))?;
    ensure_private_dir(parent)?;

    if fs::symlink_metadata(path).is_ok_and(|md| md.file_type().is_symlink()) {
        eyre::bail!("refusing to write to symlink: {}", path.display());
    }

    let tmp = sibling_tmp(path);
    let mut oo = OpenOptions::new();
    oo.create_new(true).write(true);
    #[cfg(unix)]
    {
        oo.mode(MODE_FILE_PRIVATE);
    }
    let mut f = oo
        .open(&tmp)
        .with_context(|| format!("open temp {}", tmp.display()))?;
    let written = f
        .write_all(bytes)
        .and_then(|()| f.flush())
        .and_then(|()| f.sync_all());
    drop(f);
    if let Err(e) = written {
        drop(fs::remove_file(&tmp));
        return Err(eyre::Report::new(e).wrap_err(format!("write {}", tmp.display())));
    }

    #[cfg(windows)]
    {
        if path.exists() {
            fs::remove_file(path).with_context(|| format!("remove existing {}", path.display()))?;
        }
    }

    fs::rename(&tmp, path).with_context(|| {
        drop(fs::remove_file(&tmp));
        format!("rename {} -> {}", tmp.display(), path.display())
    })?;
    Ok(())
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> eyre::Result<()> {
    let s = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    write_atomic(path, s.as_bytes())
}

/// `Ok(None)` when the file does not exist.
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> eyre::Result<Option<T>> {
    let s = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(eyre::Report::new(e).wrap_err(format!("read {}", path.display()))),
    };
    let v = serde_json::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn json_round_trip_and_missing_file() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let p = td.path().join("nested").join("state.json");
        assert!(read_json_opt::<BTreeMap<String, String>>(&p)?.is_none());

        let mut m = BTreeMap::new();
        m.insert("k".to_owned(), "v".to_owned());
        write_json_atomic(&p, &m)?;
        write_json_atomic(&p, &m)?;
        assert_eq!(read_json_opt::<BTreeMap<String, String>>(&p)?, Some(m));

        let leftovers = fs::read_dir(p.parent().ok_or_else(|| eyre::eyre!("no parent"))?)?
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .count();
        assert_eq!(leftovers, 0, "temp files must be renamed away");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn files_and_dirs_are_private() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let dir = td.path().join("d");
        let p = dir.join("f.json");
        write_atomic(&p, b"{}")?;
        let fmode = fs::metadata(&p)?.permissions().mode() & 0o777;
        let dmode = fs::metadata(&dir)?.permissions().mode() & 0o777;
        assert_eq!(fmode, MODE_FILE_PRIVATE);
        assert_eq!(dmode & 0o077, 0);
        Ok(())
    }
}
