//! Append-only part files for in-progress uploads, plus small JSON records.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
#[cfg(unix)]
use std::os::unix::fs::FileExt;

/// Data received so far for one upload session. Its length is the committed
/// size of the session.
pub(crate) struct PartFile {
    file: File,
    path: PathBuf,
}

impl PartFile {
    /// Create an empty part file. Fails if one already exists.
    pub(crate) fn create(path: &Path) -> io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Open the part file of an existing session (read+write, no truncation).
    pub(crate) fn open_existing(path: &Path) -> io::Result<Self> {
        let file = File::options().read(true).write(true).open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub(crate) fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    #[cfg(unix)]
    pub(crate) fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.write_all_at(data, offset)
    }

    #[cfg(not(unix))]
    pub(crate) fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = self.file.try_clone()?;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)
    }

    pub(crate) fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    pub(crate) fn reader(&self) -> io::Result<File> {
        File::open(&self.path)
    }

    /// Atomically move the data to `final_path`, replacing any previous object.
    /// Both paths must be on the same filesystem.
    pub(crate) fn finalize(self, final_path: &Path) -> io::Result<()> {
        let Self { file, path } = self;
        drop(file);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&path, final_path)
    }
}

/// Write `value` as JSON next to `path` and rename it into place.
pub(crate) fn write_json(path: &Path, value: &impl Serialize) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let data = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)
}

/// `Ok(None)` when the file does not exist.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn append_then_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let part_path = dir.path().join("abc.part");
        let part = PartFile::create(&part_path).unwrap();
        assert_eq!(part.len().unwrap(), 0);
        part.write_at(0, b"hello ").unwrap();
        part.write_at(6, b"world").unwrap();
        part.sync().unwrap();
        assert_eq!(part.len().unwrap(), 11);

        let final_path = dir.path().join("bucket").join("nested").join("obj");
        part.finalize(&final_path).unwrap();
        assert!(!part_path.exists());
        assert_eq!(fs::read(&final_path).unwrap(), b"hello world");
    }

    #[test]
    fn create_refuses_existing() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x.part");
        PartFile::create(&p).unwrap();
        assert!(PartFile::create(&p).is_err());
        let reopened = PartFile::open_existing(&p).unwrap();
        assert_eq!(reopened.len().unwrap(), 0);
    }

    #[test]
    fn json_records() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("records").join("r.json");
        assert!(read_json::<BTreeMap<String, u64>>(&p).unwrap().is_none());

        let mut m = BTreeMap::new();
        m.insert("committed".to_string(), 42u64);
        write_json(&p, &m).unwrap();
        let back: BTreeMap<String, u64> = read_json(&p).unwrap().unwrap();
        assert_eq!(back, m);

        fs::write(&p, b"{not json").unwrap();
        assert!(read_json::<BTreeMap<String, u64>>(&p).is_err());
    }
}
