use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::settings::{default_config_dir, SettingsError};
use crate::tags::{normalize_hex_color, NewTag, Tag, TagPatch, TagStore, TagStoreError};

#[derive(Debug, Error)]
pub enum TagFileError {
    #[error("failed to resolve default config path: {0}")]
    Config(#[from] SettingsError),
    #[error("failed to read tags file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse tags file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize tags: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write tags file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<TagFileError> for TagStoreError {
    fn from(error: TagFileError) -> Self {
        TagStoreError::new(error.to_string())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TagsDocument {
    #[serde(default)]
    tags: Vec<Tag>,
}

/// Tags kept in `tags.toml` next to the settings file. Every successful
/// mutation is written back before it is reported.
#[derive(Debug)]
pub struct FileTagStore {
    path: PathBuf,
    tags: Mutex<Vec<Tag>>,
}

impl FileTagStore {
    pub fn load_default() -> Result<Self, TagFileError> {
        Self::load_from_path(default_config_dir()?.join("tags.toml"))
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, TagFileError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self::empty(path));
        }

        let raw = fs::read_to_string(&path).map_err(|source| TagFileError::Read {
            path: path.clone(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self::empty(path));
        }

        let doc: TagsDocument = toml::from_str(&raw).map_err(|source| TagFileError::Parse {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            path,
            tags: Mutex::new(doc.tags),
        })
    }

    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            tags: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn tags(&self) -> Vec<Tag> {
        self.tags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn persist(&self, tags: &[Tag]) -> Result<(), TagFileError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| TagFileError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let doc = TagsDocument {
            tags: tags.to_vec(),
        };
        let rendered =
            toml::to_string_pretty(&doc).map_err(|source| TagFileError::Serialize { source })?;

        fs::write(&self.path, rendered).map_err(|source| TagFileError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Applies `change` to a copy of the tags and commits it only once the
    /// file write went through.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Vec<Tag>) -> Result<T, TagStoreError>,
    ) -> Result<T, TagStoreError> {
        let mut tags = self.tags.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = tags.clone();
        let output = change(&mut next)?;
        self.persist(&next)?;
        *tags = next;
        Ok(output)
    }
}

fn validated_name(
    name: &str,
    tags: &[Tag],
    except_id: Option<&str>,
) -> Result<String, TagStoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TagStoreError::new("Tag name is required"));
    }
    let taken = tags
        .iter()
        .any(|tag| tag.name == name && Some(tag.id.as_str()) != except_id);
    if taken {
        return Err(TagStoreError::new(format!("Tag `{name}` already exists")));
    }
    Ok(name.to_string())
}

fn validated_color(color: &str) -> Result<String, TagStoreError> {
    normalize_hex_color(color)
        .ok_or_else(|| TagStoreError::new(format!("`{color}` is not a hex color")))
}

#[async_trait]
impl TagStore for FileTagStore {
    async fn create_tag(&self, tag: NewTag) -> Result<Tag, TagStoreError> {
        self.mutate(|tags| {
            let created = Tag {
                id: Uuid::new_v4().to_string(),
                name: validated_name(&tag.name, tags, None)?,
                color: validated_color(&tag.color)?,
            };
            debug!(tag_id = %created.id, "storing new tag");
            tags.push(created.clone());
            Ok(created)
        })
    }

    async fn update_tag(&self, id: &str, patch: TagPatch) -> Result<Tag, TagStoreError> {
        self.mutate(|tags| {
            let name = match patch.name.as_deref() {
                Some(name) => Some(validated_name(name, tags, Some(id))?),
                None => None,
            };
            let color = patch.color.as_deref().map(validated_color).transpose()?;
            let tag = tags
                .iter_mut()
                .find(|tag| tag.id == id)
                .ok_or_else(|| TagStoreError::new(format!("Tag `{id}` was not found")))?;
            TagPatch { name, color }.apply_to(tag);
            Ok(tag.clone())
        })
    }

    async fn delete_tag(&self, id: &str) -> Result<(), TagStoreError> {
        self.mutate(|tags| {
            let original_len = tags.len();
            tags.retain(|tag| tag.id != id);
            if tags.len() == original_len {
                return Err(TagStoreError::new(format!("Tag `{id}` was not found")));
            }
            Ok(())
        })
    }
}
