//! Tags CRUD for the settings screen.
//!
//! [`TagsEditor`] keeps a transient copy of the tags owned by a
//! [`TagStore`] and drives one editing session at a time:
//! `idle -> editing(color) -> submitting -> idle | failed`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::observers::{SubscriptionId, Subscribers};

/// Colors handed out to new tags, in rotation.
pub const TAG_PALETTE: [&str; 8] = [
    "#e74c3c", "#e67e22", "#f1c40f", "#2ecc71", "#1abc9c", "#3498db", "#9b59b6", "#34495e",
];

#[must_use]
pub fn palette_color(index: usize) -> String {
    TAG_PALETTE[index % TAG_PALETTE.len()].to_string()
}

/// Canonical `#rrggbb` form of a hex color. Accepts `rgb`/`rrggbb` with or
/// without the leading `#`.
#[must_use]
pub fn normalize_hex_color(raw: &str) -> Option<String> {
    let digits = raw.trim();
    let digits = digits.strip_prefix('#').unwrap_or(digits);
    if !digits.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return None;
    }
    let digits = digits.to_ascii_lowercase();
    match digits.len() {
        3 => Some(digits.chars().fold(String::from("#"), |mut out, ch| {
            out.push(ch);
            out.push(ch);
            out
        })),
        6 => Some(format!("#{digits}")),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub color: String,
}

/// Payload of a create call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewTag {
    pub name: String,
    pub color: String,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TagPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl TagPatch {
    #[must_use]
    pub fn color(color: impl Into<String>) -> Self {
        Self {
            name: None,
            color: Some(color.into()),
        }
    }

    #[must_use]
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            color: None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.color.is_none()
    }

    /// Applies the patch. The id is never touched.
    pub fn apply_to(&self, tag: &mut Tag) {
        if let Some(name) = &self.name {
            tag.name.clone_from(name);
        }
        if let Some(color) = &self.color {
            tag.color.clone_from(color);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct TagStoreError {
    pub message: String,
}

impl TagStoreError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Rejection body of a tag store call: `{ "error": { "message": ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRejection {
    pub error: TagStoreError,
}

impl From<TagRejection> for TagStoreError {
    fn from(rejection: TagRejection) -> Self {
        rejection.error
    }
}

#[async_trait]
pub trait TagStore: Send + Sync {
    async fn create_tag(&self, tag: NewTag) -> Result<Tag, TagStoreError>;
    async fn update_tag(&self, id: &str, patch: TagPatch) -> Result<Tag, TagStoreError>;
    async fn delete_tag(&self, id: &str) -> Result<(), TagStoreError>;
}

#[async_trait]
impl<S: TagStore + ?Sized> TagStore for Arc<S> {
    async fn create_tag(&self, tag: NewTag) -> Result<Tag, TagStoreError> {
        (**self).create_tag(tag).await
    }

    async fn update_tag(&self, id: &str, patch: TagPatch) -> Result<Tag, TagStoreError> {
        (**self).update_tag(id, patch).await
    }

    async fn delete_tag(&self, id: &str) -> Result<(), TagStoreError> {
        (**self).delete_tag(id).await
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagsError {
    #[error("{0}")]
    Validation(String),
    #[error("tag `{0}` does not exist")]
    UnknownTag(String),
    #[error("no color edit is in progress")]
    NotEditing,
    #[error("deleting tag `{0}` was not confirmed")]
    DeleteNotRevealed(String),
    #[error(transparent)]
    Store(#[from] TagStoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EditorPhase {
    #[default]
    Idle,
    EditingColor {
        tag_id: String,
        draft: String,
        dirty: bool,
    },
    Submitting,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagsSnapshot {
    pub tags: Vec<Tag>,
    pub phase: EditorPhase,
    pub error: Option<String>,
    pub pending_delete: Option<String>,
}

#[derive(Debug)]
pub struct TagsEditor<S: TagStore> {
    store: S,
    tags: Vec<Tag>,
    picker_color: String,
    created: usize,
    phase: EditorPhase,
    error: Option<String>,
    pending_delete: Option<String>,
    subscribers: Subscribers<TagsSnapshot>,
}

impl<S: TagStore> TagsEditor<S> {
    #[must_use]
    pub fn new(store: S, tags: Vec<Tag>) -> Self {
        let created = tags.len();
        Self {
            store,
            tags,
            picker_color: palette_color(created),
            created,
            phase: EditorPhase::Idle,
            error: None,
            pending_delete: None,
            subscribers: Subscribers::new(),
        }
    }

    #[must_use]
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    #[must_use]
    pub fn phase(&self) -> &EditorPhase {
        &self.phase
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub fn picker_color(&self) -> &str {
        &self.picker_color
    }

    #[must_use]
    pub fn pending_delete(&self) -> Option<&str> {
        self.pending_delete.as_deref()
    }

    #[must_use]
    pub fn snapshot(&self) -> TagsSnapshot {
        TagsSnapshot {
            tags: self.tags.clone(),
            phase: self.phase.clone(),
            error: self.error.clone(),
            pending_delete: self.pending_delete.clone(),
        }
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&TagsSnapshot) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.subscribers.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    pub fn set_picker_color(&mut self, color: &str) -> Result<(), TagsError> {
        let normalized = normalize_hex_color(color)
            .ok_or_else(|| self.fail(TagsError::Validation(format!("`{color}` is not a hex color"))))?;
        self.picker_color = normalized;
        self.changed();
        Ok(())
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
        if self.phase == EditorPhase::Failed {
            self.phase = EditorPhase::Idle;
        }
        self.changed();
    }

    /// Creates a tag. Without an explicit `color` the picker color is used.
    pub async fn create_tag(&mut self, name: &str, color: Option<&str>) -> Result<Tag, TagsError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(self.fail(TagsError::Validation("Tag name is required".to_string())));
        }
        let color = match color {
            Some(raw) => normalize_hex_color(raw).ok_or_else(|| {
                self.fail(TagsError::Validation(format!("`{raw}` is not a hex color")))
            })?,
            None => self.picker_color.clone(),
        };

        let request = NewTag {
            name: name.to_string(),
            color,
        };
        self.begin_submit();
        match self.store.create_tag(request).await {
            Ok(tag) => {
                info!(tag_id = %tag.id, "tag created");
                self.tags.push(tag.clone());
                self.created += 1;
                self.picker_color = palette_color(self.created);
                self.finish_ok();
                Ok(tag)
            }
            Err(error) => Err(self.fail(TagsError::Store(error))),
        }
    }

    pub async fn update_tag(&mut self, id: &str, patch: TagPatch) -> Result<Tag, TagsError> {
        if !self.tags.iter().any(|tag| tag.id == id) {
            return Err(self.fail(TagsError::UnknownTag(id.to_string())));
        }

        self.begin_submit();
        match self.store.update_tag(id, patch).await {
            Ok(updated) => {
                if let Some(existing) = self.tags.iter_mut().find(|tag| tag.id == id) {
                    existing.name = updated.name.clone();
                    existing.color = updated.color.clone();
                }
                self.finish_ok();
                Ok(updated)
            }
            Err(error) => Err(self.fail(TagsError::Store(error))),
        }
    }

    /// Opens the color picker of `tag_id` with its current color as draft.
    pub fn begin_color_edit(&mut self, tag_id: &str) -> Result<(), TagsError> {
        let tag = self
            .tags
            .iter()
            .find(|tag| tag.id == tag_id)
            .ok_or_else(|| TagsError::UnknownTag(tag_id.to_string()))?;
        self.phase = EditorPhase::EditingColor {
            tag_id: tag.id.clone(),
            draft: tag.color.clone(),
            dirty: false,
        };
        self.changed();
        Ok(())
    }

    /// Keystroke in the color input; nothing is sent until click-away.
    pub fn input_color(&mut self, value: &str) -> Result<(), TagsError> {
        let EditorPhase::EditingColor { draft, dirty, .. } = &mut self.phase else {
            return Err(TagsError::NotEditing);
        };
        value.clone_into(draft);
        *dirty = true;
        self.changed();
        Ok(())
    }

    /// Closes the picker. Sends a single update with the final draft when
    /// the color input was touched.
    pub async fn click_away(&mut self) -> Result<Option<Tag>, TagsError> {
        let (tag_id, draft, dirty) = match std::mem::take(&mut self.phase) {
            EditorPhase::EditingColor {
                tag_id,
                draft,
                dirty,
            } => (tag_id, draft, dirty),
            other => {
                self.phase = other;
                return Ok(None);
            }
        };

        if !dirty {
            self.changed();
            return Ok(None);
        }

        let Some(color) = normalize_hex_color(&draft) else {
            return Err(self.fail(TagsError::Validation(format!(
                "`{draft}` is not a hex color"
            ))));
        };

        debug!(%tag_id, %color, "committing color edit");
        self.update_tag(&tag_id, TagPatch::color(color))
            .await
            .map(Some)
    }

    /// First step of a delete: reveals the confirm affordance for `tag_id`.
    pub fn reveal_delete(&mut self, tag_id: &str) -> Result<(), TagsError> {
        if !self.tags.iter().any(|tag| tag.id == tag_id) {
            return Err(TagsError::UnknownTag(tag_id.to_string()));
        }
        self.pending_delete = Some(tag_id.to_string());
        self.changed();
        Ok(())
    }

    pub fn cancel_delete(&mut self) {
        self.pending_delete = None;
        self.changed();
    }

    /// Second step of a delete. Only reaches the store when the same tag was
    /// revealed first.
    pub async fn confirm_delete(&mut self, tag_id: &str) -> Result<(), TagsError> {
        if self.pending_delete.as_deref() != Some(tag_id) {
            return Err(TagsError::DeleteNotRevealed(tag_id.to_string()));
        }
        self.pending_delete = None;

        self.begin_submit();
        match self.store.delete_tag(tag_id).await {
            Ok(()) => {
                info!(%tag_id, "tag deleted");
                self.tags.retain(|tag| tag.id != tag_id);
                self.finish_ok();
                Ok(())
            }
            Err(error) => Err(self.fail(TagsError::Store(error))),
        }
    }

    fn begin_submit(&mut self) {
        self.phase = EditorPhase::Submitting;
        self.changed();
    }

    fn finish_ok(&mut self) {
        self.phase = EditorPhase::Idle;
        self.error = None;
        self.changed();
    }

    fn fail(&mut self, error: TagsError) -> TagsError {
        self.error = Some(match &error {
            TagsError::Store(store) => store.message.clone(),
            other => other.to_string(),
        });
        self.phase = EditorPhase::Failed;
        self.changed();
        error
    }

    fn changed(&self) {
        self.subscribers.notify(&self.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{
        normalize_hex_color, palette_color, EditorPhase, NewTag, Tag, TagPatch, TagRejection,
        TagStore, TagStoreError, TagsEditor, TagsError,
    };

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Create(NewTag),
        Update(String, TagPatch),
        Delete(String),
    }

    #[derive(Debug, Default)]
    struct RecordingStore {
        calls: Mutex<Vec<Call>>,
        create_error: Option<TagStoreError>,
        update_error: Option<TagStoreError>,
    }

    impl RecordingStore {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl TagStore for RecordingStore {
        async fn create_tag(&self, tag: NewTag) -> Result<Tag, TagStoreError> {
            self.calls.lock().unwrap().push(Call::Create(tag.clone()));
            if let Some(error) = &self.create_error {
                return Err(error.clone());
            }
            Ok(Tag {
                id: format!("id-{}", tag.name),
                name: tag.name,
                color: tag.color,
            })
        }

        async fn update_tag(&self, id: &str, patch: TagPatch) -> Result<Tag, TagStoreError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Update(id.to_string(), patch.clone()));
            if let Some(error) = &self.update_error {
                return Err(error.clone());
            }
            let mut tag = mock_tag();
            patch.apply_to(&mut tag);
            Ok(tag)
        }

        async fn delete_tag(&self, id: &str) -> Result<(), TagStoreError> {
            self.calls.lock().unwrap().push(Call::Delete(id.to_string()));
            Ok(())
        }
    }

    fn mock_tag() -> Tag {
        Tag {
            id: "id".to_string(),
            name: "Tag 1".to_string(),
            color: "#ffffff".to_string(),
        }
    }

    fn mock_error(message: &str) -> TagStoreError {
        let rejection: TagRejection =
            serde_json::from_value(serde_json::json!({"error": {"message": message}}))
                .expect("valid rejection payload");
        rejection.into()
    }

    #[tokio::test]
    async fn create_sends_name_and_current_picker_color() {
        let store = Arc::new(RecordingStore::default());
        let mut editor = TagsEditor::new(Arc::clone(&store), Vec::new());
        let picker_color = editor.picker_color().to_string();

        let tag = editor
            .create_tag("Tag name", None)
            .await
            .expect("create should succeed");

        assert_eq!(
            store.calls(),
            vec![Call::Create(NewTag {
                name: "Tag name".to_string(),
                color: picker_color.clone(),
            })]
        );
        assert_eq!(tag.color, picker_color);
        assert_eq!(editor.tags(), &[tag]);
        assert_ne!(editor.picker_color(), picker_color);
        assert_eq!(editor.phase(), &EditorPhase::Idle);
    }

    #[tokio::test]
    async fn create_requires_a_name() {
        let store = Arc::new(RecordingStore::default());
        let mut editor = TagsEditor::new(Arc::clone(&store), Vec::new());

        let err = editor
            .create_tag("   ", None)
            .await
            .expect_err("blank name should fail");

        assert_eq!(err, TagsError::Validation("Tag name is required".to_string()));
        assert_eq!(editor.error(), Some("Tag name is required"));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn chosen_color_reaches_the_create_payload() {
        let store = Arc::new(RecordingStore::default());
        let mut editor = TagsEditor::new(Arc::clone(&store), Vec::new());

        editor.set_picker_color("#000").expect("valid color");
        editor
            .create_tag("Tag name", None)
            .await
            .expect("create should succeed");
        editor
            .create_tag("Other", Some("#ABCDEF"))
            .await
            .expect("create should succeed");

        assert_eq!(
            store.calls(),
            vec![
                Call::Create(NewTag {
                    name: "Tag name".to_string(),
                    color: "#000000".to_string(),
                }),
                Call::Create(NewTag {
                    name: "Other".to_string(),
                    color: "#abcdef".to_string(),
                }),
            ]
        );
    }

    #[tokio::test]
    async fn invalid_color_is_a_validation_error_without_store_call() {
        let store = Arc::new(RecordingStore::default());
        let mut editor = TagsEditor::new(Arc::clone(&store), Vec::new());
        let picker_color = editor.picker_color().to_string();

        let err = editor
            .create_tag("Tag name", Some("#zz"))
            .await
            .expect_err("invalid color should fail");
        assert_eq!(err, TagsError::Validation("`#zz` is not a hex color".to_string()));
        assert_eq!(editor.error(), Some("`#zz` is not a hex color"));

        editor
            .set_picker_color("blue")
            .expect_err("invalid picker color should fail");
        assert_eq!(editor.picker_color(), picker_color);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn color_edit_commits_once_on_click_away() {
        let store = Arc::new(RecordingStore::default());
        let mut editor = TagsEditor::new(Arc::clone(&store), vec![mock_tag()]);

        editor.begin_color_edit("id").expect("tag exists");
        editor.input_color("#f").expect("editing");
        editor.input_color("#ff").expect("editing");
        editor.input_color("#fff").expect("editing");
        let updated = editor
            .click_away()
            .await
            .expect("update should succeed")
            .expect("dirty edit should be sent");

        assert_eq!(
            store.calls(),
            vec![Call::Update("id".to_string(), TagPatch::color("#ffffff"))]
        );
        assert_eq!(updated.id, "id");
        assert_eq!(editor.phase(), &EditorPhase::Idle);
    }

    #[tokio::test]
    async fn click_away_without_input_sends_nothing() {
        let store = Arc::new(RecordingStore::default());
        let mut editor = TagsEditor::new(Arc::clone(&store), vec![mock_tag()]);

        editor.begin_color_edit("id").expect("tag exists");
        let outcome = editor.click_away().await.expect("nothing to commit");

        assert!(outcome.is_none());
        assert!(store.calls().is_empty());
        assert_eq!(editor.phase(), &EditorPhase::Idle);
    }

    #[tokio::test]
    async fn update_rejection_sets_error_from_payload_message() {
        let store = Arc::new(RecordingStore {
            update_error: Some(mock_error("Mock error")),
            create_error: Some(mock_error("Mock create error")),
            ..RecordingStore::default()
        });
        let mut editor = TagsEditor::new(Arc::clone(&store), vec![mock_tag()]);

        editor.begin_color_edit("id").expect("tag exists");
        editor.input_color("#fff").expect("editing");
        let err = editor.click_away().await.expect_err("update should fail");
        assert_eq!(err, TagsError::Store(mock_error("Mock error")));
        assert_eq!(editor.error(), Some("Mock error"));
        assert_eq!(editor.phase(), &EditorPhase::Failed);

        editor
            .create_tag("value", None)
            .await
            .expect_err("create should fail");
        assert_eq!(editor.error(), Some("Mock create error"));
        assert_eq!(editor.tags(), &[mock_tag()]);
    }

    #[tokio::test]
    async fn delete_needs_reveal_then_confirm() {
        let store = Arc::new(RecordingStore::default());
        let mut editor = TagsEditor::new(Arc::clone(&store), vec![mock_tag()]);

        let err = editor
            .confirm_delete("id")
            .await
            .expect_err("single interaction must not delete");
        assert_eq!(err, TagsError::DeleteNotRevealed("id".to_string()));
        assert!(store.calls().is_empty());

        editor.reveal_delete("id").expect("tag exists");
        assert!(store.calls().is_empty());
        editor
            .confirm_delete("id")
            .await
            .expect("confirmed delete should succeed");

        assert_eq!(store.calls(), vec![Call::Delete("id".to_string())]);
        assert!(editor.tags().is_empty());

        let err = editor
            .confirm_delete("id")
            .await
            .expect_err("confirmation is single use");
        assert_eq!(err, TagsError::DeleteNotRevealed("id".to_string()));
    }

    #[tokio::test]
    async fn cancelled_delete_cannot_be_confirmed() {
        let store = Arc::new(RecordingStore::default());
        let mut editor = TagsEditor::new(Arc::clone(&store), vec![mock_tag()]);

        editor.reveal_delete("id").expect("tag exists");
        editor.cancel_delete();
        assert!(editor.confirm_delete("id").await.is_err());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn subscribers_observe_submitting_phase() {
        let store = Arc::new(RecordingStore::default());
        let mut editor = TagsEditor::new(Arc::clone(&store), Vec::new());
        let phases = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&phases);
        editor.subscribe(move |snapshot| sink.lock().unwrap().push(snapshot.phase.clone()));

        editor.create_tag("Tag name", None).await.expect("create should succeed");

        assert_eq!(
            *phases.lock().unwrap(),
            vec![EditorPhase::Submitting, EditorPhase::Idle]
        );
    }

    #[test]
    fn hex_colors_are_normalized() {
        assert_eq!(normalize_hex_color("#fff"), Some("#ffffff".to_string()));
        assert_eq!(normalize_hex_color("A1B2C3"), Some("#a1b2c3".to_string()));
        assert_eq!(normalize_hex_color("#ff"), None);
        assert_eq!(normalize_hex_color("#ggg"), None);
    }

    #[test]
    fn palette_rotates() {
        assert_eq!(palette_color(0), palette_color(super::TAG_PALETTE.len()));
        assert_ne!(palette_color(0), palette_color(1));
    }

    #[test]
    fn color_patch_serializes_only_color() {
        let rendered = serde_json::to_value(TagPatch::color("#ffffff")).expect("serializable");
        assert_eq!(rendered, serde_json::json!({"color": "#ffffff"}));
    }
}
