use eyre::Context as _;
use rand::Rng as _;
use std::{
    fs::{self, OpenOptions},
    io::Write as _,
    path::{Path, PathBuf},
};

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt as _, PermissionsExt as _};

pub const MODE_DIR_PRIVATE: u32 = 0o700;
pub const MODE_FILE_PRIVATE: u32 = 0o600;

/// Outcome of a create-only write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

fn is_symlink(p: &Path) -> eyre::Result<bool> {
    let md = fs::symlink_metadata(p).with_context(|| format!("stat {}", p.display()))?;
    Ok(md.file_type().is_symlink())
}

pub fn ensure_private_dir(dir: &Path) -> eyre::Result<()> {
    if dir.exists() {
        if is_symlink(dir)? {
            eyre::bail!("refusing to use symlinked directory: {}", dir.display());
        }
        let md = fs::metadata(dir).with_context(|| format!("stat {}", dir.display()))?;
        if !md.is_dir() {
            eyre::bail!("expected directory at {}", dir.display());
        }
    } else {
        fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
    }

    // Best-effort: enforce private perms on Unix.
    #[cfg(unix)]
    {
        let md = fs::metadata(dir).with_context(|| format!("stat {}", dir.display()))?;
        let mut mode = md.permissions().mode();
        if (mode & 0o077) != 0 {
            mode = MODE_DIR_PRIVATE;
            fs::set_permissions(dir, fs::Permissions::from_mode(mode))
                .with_context(|| format!("chmod {:o} {}", mode, dir.display()))?;
        }
    }

    Ok(())
}

fn tmp_path_for(parent: &Path, final_name: &Path) -> PathBuf {
    let base = final_name
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let mut rand_bytes = [0_u8; 8];
    rand::rng().fill_bytes(&mut rand_bytes);
    let suffix = hex::encode(rand_bytes);
    parent.join(format!(".{base}.tmp.{suffix}"))
}

fn open_private_temp(tmp: &Path, mode: u32) -> eyre::Result<fs::File> {
    let mut oo = OpenOptions::new();
    oo.create_new(true).write(true);
    #[cfg(unix)]
    {
        oo.mode(mode);
    }
    oo.open(tmp)
        .with_context(|| format!("open temp {}", tmp.display()))
}

fn write_synced(tmp: &Path, bytes: &[u8], mode: u32) -> eyre::Result<()> {
    let mut f = open_private_temp(tmp, mode)?;
    f.write_all(bytes)
        .with_context(|| format!("write {}", tmp.display()))?;
    f.flush()
        .with_context(|| format!("flush {}", tmp.display()))?;
    f.sync_all()
        .with_context(|| format!("fsync {}", tmp.display()))?;
    Ok(())
}

/// Replace `path` atomically (temp file + rename).
pub fn write_atomic_restrictive(path: &Path, bytes: &[u8], mode: u32) -> eyre::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| eyre::eyre!("missing parent for {}", path.display()))?;
    ensure_private_dir(parent)?;

    if path.exists() && is_symlink(path)? {
        eyre::bail!("refusing to write to symlink: {}", path.display());
    }

    let tmp = tmp_path_for(parent, path);
    write_synced(&tmp, bytes, mode)?;

    // `rename` is atomic on Unix. On Windows, this can fail if the destination exists.
    #[cfg(windows)]
    {
        if path.exists() {
            fs::remove_file(path).with_context(|| format!("remove existing {}", path.display()))?;
        }
    }

    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

pub fn write_string_atomic_restrictive(path: &Path, s: &str, mode: u32) -> eyre::Result<()> {
    write_atomic_restrictive(path, s.as_bytes(), mode)
}

/// Write `bytes` to `path` only if nothing exists there yet.
///
/// The content is fully written and synced to a temp file first, then hard-linked into place.
/// `hard_link` fails when the destination exists, so a visible file is never partial and an
/// existing file is never replaced.
pub fn create_new_restrictive(path: &Path, bytes: &[u8], mode: u32) -> eyre::Result<CreateOutcome> {
    let parent = path
        .parent()
        .ok_or_else(|| eyre::eyre!("missing parent for {}", path.display()))?;
    ensure_private_dir(parent)?;

    if path.exists() {
        if is_symlink(path)? {
            eyre::bail!("refusing to write to symlink: {}", path.display());
        }
        return Ok(CreateOutcome::AlreadyExists);
    }

    let tmp = tmp_path_for(parent, path);
    write_synced(&tmp, bytes, mode)?;

    let linked = fs::hard_link(&tmp, path);
    drop(fs::remove_file(&tmp));
    match linked {
        Ok(()) => Ok(CreateOutcome::Created),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(CreateOutcome::AlreadyExists),
        Err(e) => Err(eyre::Report::new(e).wrap_err(format!(
            "hard_link {} -> {}",
            tmp.display(),
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_new_never_replaces_existing_content() -> eyre::Result<()> {
        let td = tempfile::tempdir().context("create tempdir")?;
        let p = td.path().join("nested").join("blob.key");

        let first = create_new_restrictive(&p, b"first", MODE_FILE_PRIVATE)?;
        assert_eq!(first, CreateOutcome::Created);
        let second = create_new_restrictive(&p, b"second", MODE_FILE_PRIVATE)?;
        assert_eq!(second, CreateOutcome::AlreadyExists);

        assert_eq!(fs::read(&p).context("read blob")?, b"first".to_vec());

        // No temp files left behind.
        let parent = p.parent().ok_or_else(|| eyre::eyre!("missing parent"))?;
        let entries = fs::read_dir(parent).context("read dir")?.count();
        assert_eq!(entries, 1);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn created_files_are_private() -> eyre::Result<()> {
        let td = tempfile::tempdir().context("create tempdir")?;
        let p = td.path().join("secret.bin");
        create_new_restrictive(&p, b"x", MODE_FILE_PRIVATE)?;
        let mode = fs::metadata(&p).context("stat")?.permissions().mode();
        assert_eq!(mode & 0o777, MODE_FILE_PRIVATE);
        Ok(())
    }
}
