//! Container extraction.

use std::fs;
use std::path::{Component, Path, PathBuf};

use log::{debug, info};

use crate::error::{FormatError, Result};
use crate::image::Container;

/// Check that an entry path stays inside the output directory.
///
/// Absolute paths and `..` components are rejected; `.` components are
/// dropped.
pub fn safe_relative_path(path: &str) -> Result<PathBuf> {
    let unsafe_path = || FormatError::UnsafePath(path.to_string());
    if path.starts_with(['/', '\\']) {
        return Err(unsafe_path().into());
    }

    let mut relative = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {},
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_path().into());
            },
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(unsafe_path().into());
    }
    Ok(relative)
}

/// Create `dir` and its parents. Existing directories are fine.
pub fn create_dirs(dir: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(dir)?;
    Ok(())
}

/// Write one extracted file under `out_dir`, creating intermediate
/// directories. An existing file at the same path is replaced.
pub fn write_entry_file(out_dir: &Path, path: &str, data: &[u8]) -> Result<PathBuf> {
    let target = out_dir.join(safe_relative_path(path)?);
    if let Some(parent) = target.parent() {
        create_dirs(parent)?;
    }
    fs::write(&target, data)?;
    debug!("Wrote {} ({} bytes)", target.display(), data.len());
    Ok(target)
}

/// Extract every entry of `container` into `out_dir`.
///
/// All entry paths and bounds are checked before the first file is
/// written. Returns the written paths in entry order.
pub fn unpack(container: &Container, data: &[u8], out_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = container.entries();
    let mut planned = Vec::with_capacity(entries.len());
    for entry in entries {
        safe_relative_path(&entry.path)?;
        planned.push((entry, entry.data(data)?));
    }

    info!(
        "Unpacking {} entries from {} image into {}",
        planned.len(),
        container.kind(),
        out_dir.display()
    );

    let mut written = Vec::with_capacity(planned.len());
    for (entry, bytes) in planned {
        info!("{:08x}-{:08x} {}", entry.offset, entry.offset + entry.length, entry.path);
        written.push(write_entry_file(out_dir, &entry.path, bytes)?);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::image::{rkaf, rkfp, rkfw};

    #[test]
    fn test_safe_paths() {
        assert_eq!(
            safe_relative_path("Image/boot.img").unwrap(),
            PathBuf::from("Image/boot.img")
        );
        assert_eq!(
            safe_relative_path("./misc.img").unwrap(),
            PathBuf::from("misc.img")
        );
        for bad in ["/etc/passwd", "../x", "a/../../b", "", ".", "\\windows"] {
            assert!(
                matches!(
                    safe_relative_path(bad),
                    Err(Error::Format(FormatError::UnsafePath(_)))
                ),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn test_write_entry_file_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_entry_file(dir.path(), "Image/sub/a.img", b"one").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"one");

        // Existing directories and files are reused.
        write_entry_file(dir.path(), "Image/sub/a.img", b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
    }

    #[test]
    fn test_unpack_rkaf() {
        let data = rkaf::tests::build(&[
            ("boot", "Image/boot.img", b"BOOTDATA", 0x2000),
            ("update", "SELF", b"", 0),
        ]);
        let container = Container::parse(&data).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let written = unpack(&container, &data, dir.path()).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(fs::read(dir.path().join("Image/boot.img")).unwrap(), b"BOOTDATA");
    }

    #[test]
    fn test_unpack_rkfw_writes_both_blobs() {
        let data = rkfw::tests::build(b"BOOTloader", b"RKAFupdate");
        let container = Container::parse(&data).unwrap();
        let dir = tempfile::tempdir().unwrap();
        unpack(&container, &data, dir.path()).unwrap();
        assert_eq!(fs::read(dir.path().join("BOOT")).unwrap(), b"BOOTloader");
        assert_eq!(
            fs::read(dir.path().join("embedded-update.img")).unwrap(),
            b"RKAFupdate"
        );
    }

    #[test]
    fn test_unpack_rkfp_nested_path() {
        let data = rkfp::tests::build(&[("dtb/board.dtb", b"DTB")]);
        let container = Container::parse(&data).unwrap();
        let dir = tempfile::tempdir().unwrap();
        unpack(&container, &data, dir.path()).unwrap();
        assert_eq!(fs::read(dir.path().join("dtb/board.dtb")).unwrap(), b"DTB");
    }

    #[test]
    fn test_unsafe_entry_aborts_before_writing() {
        let data = rkaf::tests::build(&[
            ("boot", "boot.img", b"BOOT", 0),
            ("evil", "../escape.img", b"EVIL", 0),
        ]);
        let container = Container::parse(&data).unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(unpack(&container, &data, dir.path()).is_err());
        assert!(!dir.path().join("boot.img").exists());
    }
}
