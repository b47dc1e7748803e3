//! File framing: listing a source tree, concatenating file bytes into the
//! stream, and splitting a restored stream back into files.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};
use walkdir::WalkDir;

use crate::error::{Result, StrataError};
use crate::framing::{read_exact_frame, read_exact_or_eof, read_u64_le};
use crate::pipe::PipeWriter;

/// One entry of a version's file list. `path` is relative to the source
/// root with `/` separators; list order is the concatenation order of the
/// stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub size: u64,
}

/// Walk the source tree in sorted order, yielding regular files only.
/// Unreadable entries and broken symlinks are logged and skipped.
pub fn list_files(source: &Path) -> Result<Vec<FileRecord>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(source).sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %entry.path().display(), "skipping file without metadata: {e}");
                continue;
            }
        };
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| StrataError::InvalidFormat(format!(
                "walked path '{}' escapes source root",
                entry.path().display()
            )))?;
        let path = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push(FileRecord { path, size: meta.len() });
    }
    debug!(count = files.len(), "listed source files");
    Ok(files)
}

/// Stream the listed files into the pipe in order. Any failure to deliver
/// exactly the listed bytes aborts the stream through the pipe, because a
/// short or reordered stream would silently desynchronise the file list
/// from the recipe.
pub fn concat_files(source: &Path, files: &[FileRecord], mut writer: PipeWriter) {
    let mut buf = vec![0u8; 64 * 1024];
    for record in files {
        let abs = join_relative(source, &record.path);
        let mut file = match File::open(&abs) {
            Ok(f) => f,
            Err(e) => {
                error!(path = %record.path, "failed to open source file: {e}");
                writer.fail(io::Error::new(
                    e.kind(),
                    format!("open '{}': {e}", record.path),
                ));
                return;
            }
        };
        let mut remaining = record.size;
        while remaining > 0 {
            let want = buf.len().min(remaining as usize);
            let n = match file.read(&mut buf[..want]) {
                Ok(0) => {
                    error!(path = %record.path, "source file shrank during commit");
                    writer.fail(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("'{}' shrank during commit", record.path),
                    ));
                    return;
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(path = %record.path, "failed to read source file: {e}");
                    writer.fail(io::Error::new(
                        e.kind(),
                        format!("read '{}': {e}", record.path),
                    ));
                    return;
                }
            };
            if writer.write_all(&buf[..n]).is_err() {
                // Matcher gone; it owns the error.
                return;
            }
            remaining -= n as u64;
        }
        // Bytes past the listed size (a file that grew) are ignored.
    }
    let _ = writer.flush();
}

/// Write the restored stream out file by file: exactly `size` bytes each,
/// in list order, creating parent directories as needed.
pub fn write_files<R: Read>(dest: &Path, files: &[FileRecord], reader: &mut R) -> Result<()> {
    for record in files {
        validate_rel_path(&record.path)?;
        let target = join_relative(dest, &record.path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&target)?;
        let mut writer = BufWriter::new(file);
        let copied = io::copy(&mut reader.by_ref().take(record.size), &mut writer)?;
        if copied != record.size {
            return Err(StrataError::InvalidFormat(format!(
                "restored stream ended early for '{}': {copied}/{} bytes",
                record.path, record.size
            )));
        }
        writer.flush()?;
    }
    Ok(())
}

/// Store the file list: repeated `{path_len: u32, path, size: u64}`.
pub fn store_file_list(path: &Path, files: &[FileRecord]) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    for record in files {
        let bytes = record.path.as_bytes();
        w.write_all(&(bytes.len() as u32).to_le_bytes())?;
        w.write_all(bytes)?;
        w.write_all(&record.size.to_le_bytes())?;
    }
    w.flush()?;
    Ok(())
}

pub fn load_file_list(path: &Path) -> Result<Vec<FileRecord>> {
    let data = fs::read(path)?;
    let mut r = data.as_slice();
    let mut files = Vec::new();
    loop {
        let mut len_buf = [0u8; 4];
        if !read_exact_or_eof(&mut r, &mut len_buf, "file record")? {
            break;
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut path_buf = vec![0u8; len];
        read_exact_frame(&mut r, &mut path_buf, "file record path")?;
        let path = String::from_utf8(path_buf)
            .map_err(|_| StrataError::InvalidFormat("file record path is not UTF-8".into()))?;
        let size = read_u64_le(&mut r, "file record size")?;
        files.push(FileRecord { path, size });
    }
    Ok(files)
}

/// Resolve a stored `/`-separated relative path below `root`.
fn join_relative(root: &Path, rel: &str) -> PathBuf {
    rel.split('/').fold(root.to_path_buf(), |p, c| p.join(c))
}

/// Reject stored paths that could escape the restore destination.
fn validate_rel_path(path: &str) -> Result<()> {
    if path.is_empty() || path.starts_with('/') {
        return Err(StrataError::InvalidFormat(format!(
            "unsafe file record path '{path}'"
        )));
    }
    if path.split('/').any(|c| c.is_empty() || c == "." || c == "..") {
        return Err(StrataError::InvalidFormat(format!(
            "unsafe file record path '{path}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe;
    use crate::testutil::{build_tree, gen_text};

    #[test]
    fn listing_is_sorted_and_relative() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(
            dir.path(),
            &[
                ("b/two.log", gen_text(1, 100)),
                ("a/one.log", gen_text(2, 50)),
                ("a/zz/deep.log", gen_text(3, 10)),
                ("top.log", gen_text(4, 25)),
            ],
        );
        let files = list_files(dir.path()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, ["a/one.log", "a/zz/deep.log", "b/two.log", "top.log"]);
        assert_eq!(files[0].size, 50);
    }

    #[test]
    fn file_list_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("files");
        let files = vec![
            FileRecord { path: "a/one.log".into(), size: 590 },
            FileRecord { path: "b/two.log".into(), size: 0 },
        ];
        store_file_list(&path, &files).unwrap();
        assert_eq!(load_file_list(&path).unwrap(), files);
    }

    #[test]
    fn truncated_file_list_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("files");
        store_file_list(&path, &[FileRecord { path: "a".into(), size: 1 }]).unwrap();
        let data = fs::read(&path).unwrap();
        fs::write(&path, &data[..data.len() - 2]).unwrap();
        let err = load_file_list(&path).unwrap_err();
        assert!(matches!(err, StrataError::InvalidFormat(_)));
    }

    #[test]
    fn concat_streams_files_in_list_order() {
        let dir = tempfile::tempdir().unwrap();
        let one = gen_text(5, 700);
        let two = gen_text(6, 1300);
        build_tree(dir.path(), &[("a.log", one.clone()), ("b.log", two.clone())]);
        let files = list_files(dir.path()).unwrap();

        let (mut reader, writer) = pipe::pipe(4, 256);
        std::thread::scope(|s| {
            s.spawn(|| concat_files(dir.path(), &files, writer));
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap();
            let expected: Vec<u8> = one.iter().chain(two.iter()).copied().collect();
            assert_eq!(out, expected);
        });
    }

    #[test]
    fn concat_aborts_when_a_listed_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path(), &[("a.log", gen_text(5, 100))]);
        let mut files = list_files(dir.path()).unwrap();
        files.push(FileRecord { path: "gone.log".into(), size: 10 });

        let (mut reader, writer) = pipe::pipe(4, 256);
        std::thread::scope(|s| {
            s.spawn(|| concat_files(dir.path(), &files, writer));
            let mut out = Vec::new();
            let err = reader.read_to_end(&mut out).unwrap_err();
            assert!(err.to_string().contains("gone.log"));
        });
    }

    #[test]
    fn write_files_splits_stream_by_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let one = gen_text(7, 300);
        let two = gen_text(8, 200);
        let stream: Vec<u8> = one.iter().chain(two.iter()).copied().collect();
        let files = vec![
            FileRecord { path: "x/a.log".into(), size: 300 },
            FileRecord { path: "y/b.log".into(), size: 200 },
        ];
        write_files(dir.path(), &files, &mut stream.as_slice()).unwrap();
        assert_eq!(fs::read(dir.path().join("x/a.log")).unwrap(), one);
        assert_eq!(fs::read(dir.path().join("y/b.log")).unwrap(), two);
    }

    #[test]
    fn write_files_rejects_short_streams() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![FileRecord { path: "a.log".into(), size: 100 }];
        let err = write_files(dir.path(), &files, &mut [0u8; 40].as_slice()).unwrap_err();
        assert!(matches!(err, StrataError::InvalidFormat(_)));
    }

    #[test]
    fn write_files_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        for bad in ["../escape", "/abs", "a//b", "a/./b"] {
            let files = vec![FileRecord { path: bad.into(), size: 0 }];
            let err = write_files(dir.path(), &files, &mut [].as_slice()).unwrap_err();
            assert!(matches!(err, StrataError::InvalidFormat(_)), "{bad}");
        }
    }
}
