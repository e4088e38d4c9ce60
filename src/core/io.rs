use anyhow::{Context, Result};
use async_trait::async_trait;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
}

pub struct NativeStorage;

impl NativeStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NativeStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path))?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }
}

/// Reads and deserialises a JSON or YAML document, picking the format from
/// the file extension.
pub async fn read_document<T: serde::de::DeserializeOwned>(
    storage: &dyn Storage,
    path: &str,
) -> Result<T> {
    let bytes = storage.read(path).await?;
    let content = String::from_utf8(bytes).with_context(|| format!("{} is not UTF-8", path))?;
    if path.ends_with(".yml") || path.ends_with(".yaml") {
        serde_yaml_ng::from_str(&content).with_context(|| format!("Failed to parse {}", path))
    } else {
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_native_storage_creates_parent_dirs() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("a").join("b").join("file.json");
        let path_str = path.to_string_lossy().to_string();

        let storage = NativeStorage::new();
        assert!(!storage.exists(&path_str).await?);
        storage.write(&path_str, b"[1, 2]").await?;
        assert!(storage.exists(&path_str).await?);

        let parsed: Vec<u32> = read_document(&storage, &path_str).await?;
        assert_eq!(parsed, vec![1, 2]);
        Ok(())
    }

    #[tokio::test]
    async fn test_read_document_yaml() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("list.yml");
        let path_str = path.to_string_lossy().to_string();

        let storage = NativeStorage::new();
        storage.write(&path_str, b"- a\n- b\n").await?;
        let parsed: Vec<String> = read_document(&storage, &path_str).await?;
        assert_eq!(parsed, vec!["a".to_string(), "b".to_string()]);
        Ok(())
    }
}
