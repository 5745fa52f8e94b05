//! Directory listing output for the NLST and LIST commands.
//!
//! NLST emits bare names, one per CRLF-terminated line. LIST emits an
//! `ls -l`-style report: a `total <n>` header, then one line per entry
//! with type/permission flags, link count, numeric owner and group, size,
//! a date column that switches from `HH:MM` to the year once a file is
//! about six months old, the name, and a ` -> target` suffix for symlinks.
//!
//! Entries are collected with `lstat` semantics so symlinks report as
//! themselves, and sorted by raw byte order. Listing a path that is not a
//! directory is not an error: it produces a single entry for that path.

use jiff::Timestamp;
use nix::sys::stat::{Mode, SFlag};

use std::fs::{self, Metadata};
use std::io::{self, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Age at which the date column switches to the year form, in seconds.
const SIX_MONTHS_SECS: i64 = 60 * 60 * 24 * 30 * 6;

struct Entry {
    name: String,
    path: PathBuf,
    meta: Metadata,
}

/// Write an NLST listing: entry names only.
pub fn write_name_list<W: Write>(out: &mut W, path: &Path, display: &str) -> io::Result<()> {
    for entry in collect_entries(path, display)? {
        write!(out, "{}\r\n", entry.name)?;
    }
    Ok(())
}

/// Write a LIST listing in long format.
pub fn write_full_list<W: Write>(out: &mut W, path: &Path, display: &str) -> io::Result<()> {
    let entries = collect_entries(path, display)?;
    write!(out, "total {}\r\n", entries.len())?;

    let now = Timestamp::now().as_second();
    for entry in &entries {
        write_entry(out, entry, now)?;
    }
    Ok(())
}

/// Enumerate `path` with `lstat` per entry, sorted by name; a
/// non-directory yields itself as a single entry under its display name.
fn collect_entries(path: &Path, display: &str) -> io::Result<Vec<Entry>> {
    let meta = fs::metadata(path)?;
    if !meta.is_dir() {
        return Ok(vec![Entry {
            name: display.to_string(),
            path: path.to_path_buf(),
            meta,
        }]);
    }

    let mut entries = Vec::new();
    for dir_entry in fs::read_dir(path)? {
        let dir_entry = dir_entry?;
        let entry_path = dir_entry.path();
        let meta = fs::symlink_metadata(&entry_path)?;
        entries.push(Entry {
            name: dir_entry.file_name().to_string_lossy().into_owned(),
            path: entry_path,
            meta,
        });
    }
    entries.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
    Ok(entries)
}

fn write_entry<W: Write>(out: &mut W, entry: &Entry, now: i64) -> io::Result<()> {
    let mode = entry.meta.mode();

    write!(
        out,
        "{} {:>3} {:<8} {:<8} {:>8} {} {}",
        mode_string(mode),
        entry.meta.nlink(),
        entry.meta.uid(),
        entry.meta.gid(),
        entry.meta.size(),
        format_mtime(entry.meta.mtime(), now),
        entry.name
    )?;

    if mode & SFlag::S_IFMT.bits() == SFlag::S_IFLNK.bits() {
        if let Ok(target) = fs::read_link(&entry.path) {
            write!(out, " -> {}", target.to_string_lossy())?;
        }
    }

    write!(out, "\r\n")
}

/// The ten-character type-and-permissions column, with `s`/`S`, `t`/`T`
/// overlays when setuid/setgid/sticky bits are present.
fn mode_string(mode: u32) -> String {
    let bit = |flag: Mode| mode & flag.bits() != 0;
    let overlay = |special: bool, executable: bool, set_char: char, clear_char: char| {
        match (special, executable) {
            (true, true) => set_char,
            (true, false) => clear_char,
            (false, true) => 'x',
            (false, false) => '-',
        }
    };

    let mut s = String::with_capacity(10);
    s.push(file_type_char(mode));
    s.push(if bit(Mode::S_IRUSR) { 'r' } else { '-' });
    s.push(if bit(Mode::S_IWUSR) { 'w' } else { '-' });
    s.push(overlay(bit(Mode::S_ISUID), bit(Mode::S_IXUSR), 's', 'S'));
    s.push(if bit(Mode::S_IRGRP) { 'r' } else { '-' });
    s.push(if bit(Mode::S_IWGRP) { 'w' } else { '-' });
    s.push(overlay(bit(Mode::S_ISGID), bit(Mode::S_IXGRP), 's', 'S'));
    s.push(if bit(Mode::S_IROTH) { 'r' } else { '-' });
    s.push(if bit(Mode::S_IWOTH) { 'w' } else { '-' });
    s.push(overlay(bit(Mode::S_ISVTX), bit(Mode::S_IXOTH), 't', 'T'));
    s
}

fn file_type_char(mode: u32) -> char {
    let fmt = mode & SFlag::S_IFMT.bits();
    if fmt == SFlag::S_IFSOCK.bits() {
        's'
    } else if fmt == SFlag::S_IFLNK.bits() {
        'l'
    } else if fmt == SFlag::S_IFBLK.bits() {
        'b'
    } else if fmt == SFlag::S_IFDIR.bits() {
        'd'
    } else if fmt == SFlag::S_IFCHR.bits() {
        'c'
    } else if fmt == SFlag::S_IFIFO.bits() {
        'p'
    } else {
        '-'
    }
}

/// `Mon day HH:MM` for files younger than about six months either way,
/// `Mon day  YYYY` otherwise ("C"-locale month names, UTC).
fn format_mtime(mtime: i64, now: i64) -> String {
    let ts = Timestamp::from_second(mtime).unwrap_or(Timestamp::UNIX_EPOCH);
    if (now - mtime).abs() > SIX_MONTHS_SECS {
        ts.strftime("%b %e  %Y").to_string()
    } else {
        ts.strftime("%b %e %H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::{PermissionsExt, symlink};
    use tempfile::TempDir;

    fn listing_lines(buf: &[u8]) -> Vec<String> {
        let text = String::from_utf8_lossy(buf);
        text.split("\r\n")
            .filter(|line| !line.is_empty())
            .map(|line| line.to_string())
            .collect()
    }

    fn make_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("beta.txt"), b"hello world").unwrap();
        fs::write(dir.path().join("alpha.txt"), b"x").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        symlink("beta.txt", dir.path().join("link")).unwrap();
        dir
    }

    #[test]
    fn test_name_list_sorted() {
        let dir = make_tree();
        let mut out = Vec::new();
        write_name_list(&mut out, dir.path(), "/").unwrap();

        let lines = listing_lines(&out);
        assert_eq!(lines, vec!["alpha.txt", "beta.txt", "link", "sub"]);
    }

    #[test]
    fn test_name_list_single_file() {
        let dir = make_tree();
        let mut out = Vec::new();
        write_name_list(&mut out, &dir.path().join("beta.txt"), "/beta.txt").unwrap();

        assert_eq!(listing_lines(&out), vec!["/beta.txt"]);
    }

    #[test]
    fn test_full_list_header_and_order() {
        let dir = make_tree();
        let mut out = Vec::new();
        write_full_list(&mut out, dir.path(), "/").unwrap();

        let lines = listing_lines(&out);
        assert_eq!(lines[0], "total 4");
        assert!(lines[1].ends_with("alpha.txt"), "{}", lines[1]);
        assert!(lines[2].ends_with("beta.txt"), "{}", lines[2]);
        assert!(lines[3].contains("link -> beta.txt"), "{}", lines[3]);
        assert!(lines[4].ends_with("sub"), "{}", lines[4]);
    }

    #[test]
    fn test_full_list_empty_directory() {
        let dir = TempDir::new().unwrap();
        let mut out = Vec::new();
        write_full_list(&mut out, dir.path(), "/").unwrap();

        assert_eq!(listing_lines(&out), vec!["total 0"]);
    }

    #[test]
    fn test_full_list_type_chars() {
        let dir = make_tree();
        let mut out = Vec::new();
        write_full_list(&mut out, dir.path(), "/").unwrap();

        let lines = listing_lines(&out);
        assert!(lines[1].starts_with('-'));
        assert!(lines[3].starts_with('l'));
        assert!(lines[4].starts_with('d'));
    }

    #[test]
    fn test_full_list_size_column() {
        let dir = make_tree();
        let mut out = Vec::new();
        write_full_list(&mut out, dir.path(), "/").unwrap();

        let beta = &listing_lines(&out)[2];
        let size: u64 = beta.split_whitespace().nth(4).unwrap().parse().unwrap();
        assert_eq!(size, 11);
    }

    #[test]
    fn test_listing_missing_path_fails() {
        let dir = TempDir::new().unwrap();
        let mut out = Vec::new();
        assert!(write_full_list(&mut out, &dir.path().join("gone"), "/gone").is_err());
    }

    #[test]
    fn test_mode_string_plain_file() {
        assert_eq!(mode_string(0o100644), "-rw-r--r--");
        assert_eq!(mode_string(0o100755), "-rwxr-xr-x");
        assert_eq!(mode_string(0o040755), "drwxr-xr-x");
    }

    #[test]
    fn test_mode_string_special_bits() {
        // setuid with and without user execute
        assert_eq!(mode_string(0o104755), "-rwsr-xr-x");
        assert_eq!(mode_string(0o104655), "-rwSr-xr-x");
        // setgid
        assert_eq!(mode_string(0o102715), "-rwx--sr-x");
        // sticky with and without other execute
        assert_eq!(mode_string(0o041777), "drwxrwxrwt");
        assert_eq!(mode_string(0o041776), "drwxrwxrwT");
    }

    #[test]
    fn test_mode_string_permissions() {
        let dir = make_tree();
        let path = dir.path().join("alpha.txt");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        let mut out = Vec::new();
        write_full_list(&mut out, dir.path(), "/").unwrap();
        assert!(listing_lines(&out)[1].starts_with("-rw-r-----"));
    }

    #[test]
    fn test_recent_mtime_uses_clock_form() {
        let dir = make_tree();
        let mut out = Vec::new();
        write_full_list(&mut out, dir.path(), "/").unwrap();

        // Freshly created files use the HH:MM column.
        let line = &listing_lines(&out)[1];
        let date = line.split_whitespace().nth(7).unwrap();
        assert!(date.contains(':'), "{}", line);
    }

    #[test]
    fn test_format_mtime_six_month_boundary() {
        let now = 1_700_000_000;
        let recent = format_mtime(now - 60 * 60 * 24 * 30, now);
        assert!(recent.contains(':'), "{}", recent);

        let old = format_mtime(now - SIX_MONTHS_SECS - 1, now);
        assert!(!old.contains(':'), "{}", old);
        assert!(old.ends_with("2023"), "{}", old);

        // A timestamp in the far future also gets the year form.
        let future = format_mtime(now + SIX_MONTHS_SECS + 1, now);
        assert!(!future.contains(':'), "{}", future);
    }
}
