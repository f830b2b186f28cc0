//! Local artifact storage
//!
//! Filesystem root that holds downloaded meeting artifacts. All paths in the
//! catalog are relative to this root; writes go through a temp file so a
//! crash never leaves a half-written artifact at its final path.

pub mod documents;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub struct MeetingStorage {
    root: PathBuf,
}

impl MeetingStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> io::Result<Self> {
        fs::create_dir_all(&root)?;
        let root = root.as_ref().canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a catalog-relative one.
    pub fn absolute<P: AsRef<Path>>(&self, rel: P) -> PathBuf {
        self.root.join(rel)
    }

    /// Absolute path with its parent directories created.
    pub fn prepare<P: AsRef<Path>>(&self, rel: P) -> io::Result<PathBuf> {
        let path = self.absolute(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    /// Write bytes to a relative path via a sibling temp file and rename.
    pub fn write_file<P: AsRef<Path>>(&self, rel: P, bytes: &[u8]) -> io::Result<u64> {
        let path = self.prepare(rel)?;
        let file_name = path
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
        let tmp_path = path.with_file_name(format!("{}.tmp", file_name.to_string_lossy()));
        fs::write(&tmp_path, bytes)?;
        fs::rename(&tmp_path, &path)?;
        Ok(bytes.len() as u64)
    }

    pub fn read_file<P: AsRef<Path>>(&self, rel: P) -> io::Result<Vec<u8>> {
        fs::read(self.absolute(rel))
    }

    pub fn exists<P: AsRef<Path>>(&self, rel: P) -> bool {
        self.absolute(rel).exists()
    }

    /// Direct children of a relative directory, as root-relative paths in
    /// sorted order.
    pub fn list_children<P: AsRef<Path>>(&self, rel: P) -> io::Result<Vec<PathBuf>> {
        let rel = rel.as_ref();
        let mut children = Vec::new();
        for entry in fs::read_dir(self.absolute(rel))? {
            children.push(rel.join(entry?.file_name()));
        }
        children.sort();
        Ok(children)
    }

    pub fn file_size<P: AsRef<Path>>(&self, rel: P) -> io::Result<u64> {
        Ok(fs::metadata(self.absolute(rel))?.len())
    }

    pub fn remove_file<P: AsRef<Path>>(&self, rel: P) -> io::Result<()> {
        fs::remove_file(self.absolute(rel))
    }
}
