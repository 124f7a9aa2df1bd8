//! Test utilities for creating temporary log files and rotating them.

#[cfg(test)]
use std::fs::{File, OpenOptions};
#[cfg(test)]
use std::io::Write;
#[cfg(test)]
use std::path::{Path, PathBuf};

#[cfg(test)]
pub struct TempLogFile {
    pub path: PathBuf,
    _temp_dir: tempfile::TempDir,
}

#[cfg(test)]
impl TempLogFile {
    /// Create a new empty temporary log file for testing
    pub fn new() -> std::io::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("test.log");

        File::create(&path)?;

        Ok(Self {
            path,
            _temp_dir: temp_dir,
        })
    }

    /// Create a temporary log file with initial content
    pub fn with_content(content: &[u8]) -> std::io::Result<Self> {
        let temp_file = Self::new()?;
        temp_file.append(content)?;
        Ok(temp_file)
    }

    /// Append bytes, creating the file if it is missing
    pub fn append(&self, content: &[u8]) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.write_all(content)?;
        file.flush()?;
        Ok(())
    }

    /// Truncate the file in place (copytruncate rotation)
    pub fn truncate(&self) -> std::io::Result<()> {
        OpenOptions::new().write(true).truncate(true).open(&self.path)?;
        Ok(())
    }

    /// Remove the file and create an empty one under the same name
    pub fn remove_and_recreate(&self) -> std::io::Result<()> {
        std::fs::remove_file(&self.path)?;
        File::create(&self.path)?;
        Ok(())
    }

    /// Move the file aside and create an empty one under the same name
    pub fn rename_and_recreate(&self) -> std::io::Result<()> {
        std::fs::rename(&self.path, self.path.with_extension("log.1"))?;
        File::create(&self.path)?;
        Ok(())
    }

    /// Update the modification time without touching content
    pub fn touch(&self) -> std::io::Result<()> {
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_modified(std::time::SystemTime::now())
    }

    /// Get the path to the temporary file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_log_file_creation() {
        let temp_file = TempLogFile::new().unwrap();
        assert!(temp_file.path().exists());
    }

    #[test]
    fn test_temp_log_file_with_content() {
        let temp_file = TempLogFile::with_content(b"test line").unwrap();

        let file_content = std::fs::read(temp_file.path()).unwrap();
        assert_eq!(file_content, b"test line");
    }

    #[test]
    fn test_append_content() {
        let temp_file = TempLogFile::new().unwrap();
        temp_file.append(b"line 1\n").unwrap();
        temp_file.append(b"line 2\n").unwrap();

        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        assert_eq!(content, "line 1\nline 2\n");
    }

    #[test]
    fn test_truncate() {
        let temp_file = TempLogFile::with_content(b"initial content").unwrap();
        temp_file.truncate().unwrap();

        let content = std::fs::read(temp_file.path()).unwrap();
        assert!(content.is_empty());
    }

    #[test]
    fn test_rename_and_recreate_keeps_old_content_aside() {
        let temp_file = TempLogFile::with_content(b"old").unwrap();
        temp_file.rename_and_recreate().unwrap();

        assert!(std::fs::read(temp_file.path()).unwrap().is_empty());
        let rotated = std::fs::read(temp_file.path().with_extension("log.1")).unwrap();
        assert_eq!(rotated, b"old");
    }

    #[test]
    fn test_remove_and_recreate() {
        let temp_file = TempLogFile::with_content(b"old").unwrap();
        temp_file.remove_and_recreate().unwrap();
        assert!(std::fs::read(temp_file.path()).unwrap().is_empty());
    }

    #[test]
    fn test_touch_keeps_content() {
        let temp_file = TempLogFile::with_content(b"same").unwrap();
        temp_file.touch().unwrap();
        assert_eq!(std::fs::read(temp_file.path()).unwrap(), b"same");
    }
}
