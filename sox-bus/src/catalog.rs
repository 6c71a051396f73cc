use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::error::BusError;

/// Directory of effect files, looked up by name fragment.
#[derive(Debug, Clone)]
pub struct EffectCatalog {
    dir: PathBuf,
}

impl EffectCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File names in the directory, sorted. Read fresh on every call.
    pub async fn list(&self) -> anyhow::Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("list effects in {}", self.dir.display()))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// First file (in name order) whose name contains `name`, ignoring case.
    pub async fn resolve(&self, name: &str) -> anyhow::Result<PathBuf> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return Err(BusError::EffectNotFound(name.to_string()).into());
        }
        let found = self
            .list()
            .await?
            .into_iter()
            .find(|file| file.to_lowercase().contains(&needle));
        match found {
            Some(file) => Ok(self.dir.join(file)),
            None => Err(BusError::EffectNotFound(name.to_string()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(files: &[&str]) -> anyhow::Result<tempfile::TempDir> {
        let dir = tempfile::tempdir()?;
        for file in files {
            std::fs::write(dir.path().join(file), b"fx")?;
        }
        std::fs::create_dir(dir.path().join("applause-archive"))?;
        Ok(dir)
    }

    #[tokio::test]
    async fn test_resolve_case_insensitive_substring() -> anyhow::Result<()> {
        let dir = fixture(&["Applause.mp3", "boo.mp3"])?;
        let catalog = EffectCatalog::new(dir.path());
        assert_eq!(catalog.resolve("applause").await?, dir.path().join("Applause.mp3"));
        assert_eq!(catalog.resolve("BOO").await?, dir.path().join("boo.mp3"));
        Ok(())
    }

    #[tokio::test]
    async fn test_resolve_first_sorted_match_wins() -> anyhow::Result<()> {
        let dir = fixture(&["laugh-2.mp3", "laugh-1.mp3"])?;
        let catalog = EffectCatalog::new(dir.path());
        assert_eq!(catalog.resolve("laugh").await?, dir.path().join("laugh-1.mp3"));
        Ok(())
    }

    #[tokio::test]
    async fn test_resolve_not_found() -> anyhow::Result<()> {
        let dir = fixture(&["boo.mp3"])?;
        let catalog = EffectCatalog::new(dir.path());
        for name in ["non existing command", "", "  ", "archive"] {
            let err = catalog.resolve(name).await.unwrap_err();
            assert!(
                matches!(BusError::find(&err), Some(BusError::EffectNotFound(_))),
                "{:?}: {:#}",
                name,
                err
            );
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_list_sees_new_files() -> anyhow::Result<()> {
        let dir = fixture(&["b.mp3"])?;
        let catalog = EffectCatalog::new(dir.path());
        assert_eq!(catalog.list().await?, vec!["b.mp3"]);
        std::fs::write(dir.path().join("a.mp3"), b"fx")?;
        assert_eq!(catalog.list().await?, vec!["a.mp3", "b.mp3"]);
        Ok(())
    }
}
