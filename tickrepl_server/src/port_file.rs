// `.nrepl-port` advertisement: the bound port as decimal digits, nothing
// else. Editors read it to find the server. Written (truncating) on start,
// removed on shutdown.

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct PortFile {
    path: PathBuf,
}

impl PortFile {
    pub fn write(path: &Path, port: u16) -> io::Result<Self> {
        std::fs::write(path, port.to_string())?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file. Already gone counts as success.
    pub fn remove(self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_digits_only_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".nrepl-port");
        std::fs::write(&path, "a much longer stale file body").unwrap();

        let file = PortFile::write(&path, 7888).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "7888");

        file.remove().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn removing_a_vanished_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".nrepl-port");
        let file = PortFile::write(&path, 1).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(file.remove().is_ok());
    }

    #[test]
    fn unwritable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join(".nrepl-port");
        assert!(PortFile::write(&path, 1).is_err());
    }
}
