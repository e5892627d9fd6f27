use crate::unit_options::UnitOption;
use crate::{Error, Result, util};

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Outcome of persisting a drop-in.
#[derive(Clone, Debug)]
pub(crate) struct WriteReport {
    pub(crate) changed: bool,
    pub(crate) path: PathBuf,
}

/// Render directives as unit-file text.
///
/// Sections appear in order of first use, separated by a blank line. Directives keep their
/// relative order, duplicates included.
pub(crate) fn serialize(opts: &[UnitOption]) -> Result<String> {
    let mut sections: Vec<(&str, Vec<&UnitOption>)> = Vec::new();
    for opt in opts {
        util::validate_no_control("directive section", &opt.section)?;
        util::validate_no_control("directive name", &opt.name)?;
        util::validate_no_control("directive value", &opt.value)?;

        match sections.iter().position(|(s, _)| *s == opt.section) {
            Some(i) => sections[i].1.push(opt),
            None => sections.push((opt.section.as_str(), vec![opt])),
        }
    }

    let mut out = String::new();
    out.push_str("# Managed by nomad-driver-systemd. DO NOT EDIT.\n");
    for (i, (section, group)) in sections.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push('[');
        out.push_str(section);
        out.push_str("]\n");
        for opt in group {
            out.push_str(&opt.name);
            out.push('=');
            out.push_str(&opt.value);
            out.push('\n');
        }
    }
    Ok(out)
}

/// Write `<units_root>/<unit>.d/<name>.conf`, replacing whatever was there.
pub(crate) fn write_dropin(
    units_root: &Path,
    unit: &str,
    name: &str,
    contents: &str,
) -> Result<WriteReport> {
    let path = dropin_path(units_root, unit, name);
    let dir = path
        .parent()
        .ok_or_else(|| Error::invalid_input("invalid drop-in path"))?;
    fs::create_dir_all(dir).map_err(|e| map_dropin_io("create drop-in directory", dir, e))?;

    match fs::read(&path) {
        Ok(existing) if existing == contents.as_bytes() => {
            return Ok(WriteReport {
                changed: false,
                path,
            });
        }
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(map_dropin_io("read drop-in", &path, e)),
    }

    atomic_write(&path, contents.as_bytes())
        .map_err(|e| map_dropin_io("write drop-in", &path, e))?;

    Ok(WriteReport {
        changed: true,
        path,
    })
}

/// Remove a drop-in written by `write_dropin`. Returns whether a file was removed.
pub(crate) fn remove_dropin(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(map_dropin_io("remove drop-in", path, e)),
    }
    if let Some(dir) = path.parent() {
        fsync_dir(dir).map_err(|e| map_dropin_io("sync drop-in directory", dir, e))?;
    }
    Ok(true)
}

pub(crate) fn dropin_path(units_root: &Path, unit: &str, name: &str) -> PathBuf {
    units_root
        .join(format!("{unit}.d"))
        .join(format!("{name}.conf"))
}

fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;

    let tmp_path = loop {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let candidate = dir.join(format!(
            ".{}.tmp-{}-{}",
            path.file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("dropin.conf"),
            std::process::id(),
            n
        ));
        if !candidate.exists() {
            break candidate;
        }
    };

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp_path)?;
    if let Err(e) = file.write_all(contents).and_then(|()| file.sync_all()) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    fs::rename(&tmp_path, path)?;
    fsync_dir(dir)?;
    Ok(())
}

fn map_dropin_io(context: &'static str, path: &Path, e: io::Error) -> Error {
    Error::UnitWrite {
        context: format!("{context} {}: {e}", path.to_string_lossy()),
    }
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> io::Result<()> {
    let f = fs::File::open(dir)?;
    f.sync_all()
}

#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_dir(name: &str) -> PathBuf {
        let n = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut dir = std::env::temp_dir();
        dir.push(format!("nomad-systemd-{name}-{}-{n}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn serialize_groups_sections_and_keeps_duplicates() {
        let opts = vec![
            UnitOption::new("Service", "BindPaths", "/a:/a"),
            UnitOption::new("Unit", "Description", "web"),
            UnitOption::new("Service", "BindPaths", "/b:/b"),
        ];
        let text = serialize(&opts).expect("serialize");
        assert_eq!(
            text,
            "# Managed by nomad-driver-systemd. DO NOT EDIT.\n\
             [Service]\nBindPaths=/a:/a\nBindPaths=/b:/b\n\
             \n[Unit]\nDescription=web\n"
        );
    }

    #[test]
    fn serialize_rejects_newlines_in_values() {
        let opts = vec![UnitOption::new("Service", "User", "root\nExecStart=/bin/sh")];
        let err = serialize(&opts).expect_err("must fail");
        let Error::InvalidInput { .. } = err else {
            panic!("unexpected error: {err:?}");
        };
    }

    #[test]
    fn write_dropin_creates_directories_and_overwrites() {
        let root = temp_dir("dropin");
        let unit = "webserver@1.service";

        let r1 = write_dropin(&root, unit, "nomad", "[Service]\nUser=a\n").expect("write ok");
        assert!(r1.changed);
        assert_eq!(r1.path, root.join("webserver@1.service.d/nomad.conf"));

        let r2 = write_dropin(&root, unit, "nomad", "[Service]\nUser=a\n").expect("write ok");
        assert!(!r2.changed);

        let r3 = write_dropin(&root, unit, "nomad", "[Service]\nUser=b\n").expect("write ok");
        assert!(r3.changed);
        let on_disk = std::fs::read_to_string(&r3.path).expect("read back");
        assert_eq!(on_disk, "[Service]\nUser=b\n");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn write_dropin_fails_with_unit_write_error() {
        let root = temp_dir("blocked");
        let blocker = root.join("file");
        std::fs::write(&blocker, b"x").expect("write blocker");

        let err = write_dropin(&blocker, "web.service", "nomad", "x").expect_err("must fail");
        let Error::UnitWrite { context } = err else {
            panic!("unexpected error: {err:?}");
        };
        assert!(context.contains("create drop-in directory"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn removed_dropin_is_rewritten_as_changed() {
        let root = temp_dir("rollback");
        let unit = "webserver@1.service";

        let r1 = write_dropin(&root, unit, "nomad", "[Service]\nUser=a\n").expect("write ok");
        assert!(remove_dropin(&r1.path).expect("remove"));
        assert!(!r1.path.exists());
        assert!(!remove_dropin(&r1.path).expect("second remove"));

        let r2 = write_dropin(&root, unit, "nomad", "[Service]\nUser=a\n").expect("write ok");
        assert!(r2.changed);

        let _ = std::fs::remove_dir_all(&root);
    }
}
