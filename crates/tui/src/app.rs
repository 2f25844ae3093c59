use std::sync::Arc;

use connector_core::query_runner::QueryResult;
use connector_core::schema_browser::{TableMetadata, TablePreview};
use connector_core::session::{
    ConnectionStatus, CredentialField, Credentials, Dialect, Session, SessionError, SessionHandle,
};
use connector_core::tags::{EditorPhase, Tag, TagStore, TagsEditor};
use tracing::debug;

const ACTIVITY_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pane {
    Connection,
    Schema,
    Query,
    Tags,
}

impl Pane {
    pub(crate) fn next(self) -> Self {
        match self {
            Self::Connection => Self::Schema,
            Self::Schema => Self::Query,
            Self::Query => Self::Tags,
            Self::Tags => Self::Connection,
        }
    }

    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::Connection => "Connection",
            Self::Schema => "Schema",
            Self::Query => "Query",
            Self::Tags => "Tags",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionKey {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaFocus {
    Databases,
    Tables,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Msg {
    Quit,
    ToggleHelp,
    NextPane,
    Submit,
    Cancel,
    Disconnect,
    EditColor,
    PickColor,
    Delete,
    Navigate(DirectionKey),
    Input(char),
    Backspace,
}

/// Work that talks to the backend; runs off the UI thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Connect {
        dialect: Dialect,
        credentials: Credentials,
    },
    Disconnect,
    ListDatabases,
    ListTables(String),
    PreviewTable(String),
    RunQuery(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagAction {
    Create(String),
    ClickAway,
    ConfirmDelete(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Session(SessionCommand),
    Tag(TagAction),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Connected(Result<Session, SessionError>),
    Disconnected(Result<Session, SessionError>),
    Databases(Result<Vec<String>, SessionError>),
    Tables(Result<Arc<TableMetadata>, SessionError>),
    Query {
        statement: String,
        result: Result<QueryResult, SessionError>,
    },
}

#[derive(Debug)]
pub struct ConnectorApp<S: TagStore> {
    session_handle: SessionHandle,
    session: Session,
    pane: Pane,
    active_field: usize,
    databases: Vec<String>,
    database_cursor: usize,
    tables: Option<Arc<TableMetadata>>,
    table_cursor: usize,
    schema_focus: SchemaFocus,
    query_text: String,
    query_result: Option<QueryResult>,
    tags: TagsEditor<S>,
    tag_cursor: usize,
    tag_name_input: String,
    picker_draft: Option<String>,
    show_help: bool,
    should_quit: bool,
    status_line: String,
    activity: Vec<String>,
}

impl<S: TagStore> ConnectorApp<S> {
    #[must_use]
    pub fn new(session_handle: SessionHandle, tags: TagsEditor<S>) -> Self {
        let session = session_handle.snapshot();
        Self {
            session_handle,
            session,
            pane: Pane::Connection,
            active_field: 0,
            databases: Vec::new(),
            database_cursor: 0,
            tables: None,
            table_cursor: 0,
            schema_focus: SchemaFocus::Databases,
            query_text: String::new(),
            query_result: None,
            tags,
            tag_cursor: 0,
            tag_name_input: String::new(),
            picker_draft: None,
            show_help: false,
            should_quit: false,
            status_line: "Pick a dialect with Left/Right, fill credentials, Enter to connect"
                .to_string(),
            activity: Vec::new(),
        }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn pane(&self) -> Pane {
        self.pane
    }

    #[must_use]
    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    #[must_use]
    pub fn show_help(&self) -> bool {
        self.show_help
    }

    #[must_use]
    pub fn status_line(&self) -> &str {
        &self.status_line
    }

    #[must_use]
    pub fn activity(&self) -> &[String] {
        &self.activity
    }

    /// Every dialect paired with whether it is the selected one.
    #[must_use]
    pub fn dialect_markers(&self) -> Vec<(Dialect, bool)> {
        Dialect::ALL
            .into_iter()
            .map(|dialect| (dialect, dialect == self.session.dialect))
            .collect()
    }

    #[must_use]
    pub fn credential_fields(&self) -> &'static [CredentialField] {
        self.session.dialect.required_fields()
    }

    #[must_use]
    pub fn active_field(&self) -> Option<CredentialField> {
        self.credential_fields().get(self.active_field).copied()
    }

    #[must_use]
    pub fn databases(&self) -> &[String] {
        &self.databases
    }

    #[must_use]
    pub fn database_cursor(&self) -> usize {
        self.database_cursor
    }

    #[must_use]
    pub fn tables(&self) -> Option<&TableMetadata> {
        self.tables.as_deref()
    }

    #[must_use]
    pub fn table_cursor(&self) -> usize {
        self.table_cursor
    }

    #[must_use]
    pub fn schema_focus(&self) -> SchemaFocus {
        self.schema_focus
    }

    #[must_use]
    pub fn selected_table(&self) -> Option<&TablePreview> {
        self.tables
            .as_deref()
            .and_then(|metadata| metadata.tables.get(self.table_cursor))
    }

    #[must_use]
    pub fn query_text(&self) -> &str {
        &self.query_text
    }

    #[must_use]
    pub fn query_result(&self) -> Option<&QueryResult> {
        self.query_result.as_ref()
    }

    #[must_use]
    pub fn tag_list(&self) -> &[Tag] {
        self.tags.tags()
    }

    #[must_use]
    pub fn tags_editor(&self) -> &TagsEditor<S> {
        &self.tags
    }

    #[must_use]
    pub fn tag_cursor(&self) -> usize {
        self.tag_cursor
    }

    #[must_use]
    pub fn tag_name_input(&self) -> &str {
        &self.tag_name_input
    }

    /// Color typed for the next new tag, while the picker is open.
    #[must_use]
    pub fn picker_draft(&self) -> Option<&str> {
        self.picker_draft.as_deref()
    }

    pub fn handle(&mut self, msg: Msg) -> Option<Command> {
        match msg {
            Msg::Quit => {
                self.should_quit = true;
                None
            }
            Msg::ToggleHelp => {
                self.show_help = !self.show_help;
                None
            }
            Msg::NextPane => {
                self.pane = self.pane.next();
                self.status_line = format!("Switched to {}", self.pane.title());
                None
            }
            Msg::Disconnect => self.request_disconnect(),
            other => match self.pane {
                Pane::Connection => self.handle_connection(other),
                Pane::Schema => self.handle_schema(other),
                Pane::Query => self.handle_query(other),
                Pane::Tags => self.handle_tags(other),
            },
        }
    }

    /// Latest session snapshot, pushed by the session subscription.
    pub fn apply_session(&mut self, session: Session) {
        if !session.is_connected() {
            self.databases.clear();
            self.database_cursor = 0;
            self.tables = None;
            self.table_cursor = 0;
            self.schema_focus = SchemaFocus::Databases;
            self.query_result = None;
        }
        self.session = session;
    }

    /// Applies the outcome of a [`SessionCommand`]; may ask for a follow-up.
    pub fn apply(&mut self, completion: Completion) -> Option<Command> {
        self.apply_session(self.session_handle.snapshot());

        match completion {
            Completion::Connected(Ok(session)) => {
                if session.is_connected() {
                    self.record(format!(
                        "Connected to {} at {}",
                        session.dialect.label(),
                        session.credential(CredentialField::Host)
                    ));
                    self.status_line = "Connected".to_string();
                    return Some(Command::Session(SessionCommand::ListDatabases));
                }
                let message = session
                    .error_message
                    .unwrap_or_else(|| "Connection failed".to_string());
                self.record(format!("Connection failed: {message}"));
                self.status_line = message;
                None
            }
            Completion::Disconnected(Ok(session)) => {
                self.status_line = match session.error_message {
                    Some(message) => format!("Disconnect failed: {message}"),
                    None => {
                        self.record("Disconnected".to_string());
                        "Disconnected".to_string()
                    }
                };
                None
            }
            Completion::Databases(Ok(databases)) => {
                self.databases = databases;
                self.database_cursor = 0;
                let selected = self.session.selected_database.clone()?;
                let position = self.databases.iter().position(|name| *name == selected)?;
                self.database_cursor = position;
                Some(Command::Session(SessionCommand::ListTables(selected)))
            }
            Completion::Tables(Ok(metadata)) => {
                self.status_line = format!(
                    "{} table(s) in `{}`",
                    metadata.tables.len(),
                    metadata.database
                );
                if let Some(position) = self
                    .databases
                    .iter()
                    .position(|name| *name == metadata.database)
                {
                    self.database_cursor = position;
                }
                self.tables = Some(metadata);
                self.table_cursor = 0;
                self.schema_focus = SchemaFocus::Tables;
                None
            }
            Completion::Query { statement, result } => {
                if !statement.is_empty() {
                    self.query_text = statement;
                }
                match result {
                    Ok(result) => {
                        self.status_line = match &result.error {
                            Some(message) => format!("Query failed: {message}"),
                            None => format!("{} row(s)", result.rows.len()),
                        };
                        self.query_result = Some(result);
                        self.pane = Pane::Query;
                    }
                    Err(error) => self.fail(&error),
                }
                None
            }
            Completion::Connected(Err(error))
            | Completion::Disconnected(Err(error))
            | Completion::Databases(Err(error))
            | Completion::Tables(Err(error)) => {
                self.fail(&error);
                None
            }
        }
    }

    pub async fn run_tag_action(&mut self, action: TagAction) {
        let outcome = match action {
            TagAction::Create(name) => match self.tags.create_tag(&name, None).await {
                Ok(tag) => {
                    self.tag_name_input.clear();
                    self.tag_cursor = self.tags.tags().len().saturating_sub(1);
                    Ok(format!("Created tag `{}`", tag.name))
                }
                Err(error) => Err(error),
            },
            TagAction::ClickAway => self.tags.click_away().await.map(|updated| match updated {
                Some(tag) => format!("Saved color {} for `{}`", tag.color, tag.name),
                None => "Color unchanged".to_string(),
            }),
            TagAction::ConfirmDelete(id) => self
                .tags
                .confirm_delete(&id)
                .await
                .map(|()| "Tag deleted".to_string()),
        };

        self.status_line = match outcome {
            Ok(message) => message,
            Err(error) => error.to_string(),
        };
        self.tag_cursor = self
            .tag_cursor
            .min(self.tags.tags().len().saturating_sub(1));
    }

    fn handle_connection(&mut self, msg: Msg) -> Option<Command> {
        match msg {
            Msg::Navigate(direction @ (DirectionKey::Left | DirectionKey::Right)) => {
                let current = Dialect::ALL
                    .iter()
                    .position(|dialect| *dialect == self.session.dialect)
                    .unwrap_or(0);
                let count = Dialect::ALL.len();
                let next = if direction == DirectionKey::Right {
                    (current + 1) % count
                } else {
                    (current + count - 1) % count
                };
                self.select_dialect(Dialect::ALL[next]);
            }
            Msg::Navigate(DirectionKey::Up) => {
                let count = self.credential_fields().len();
                self.active_field = (self.active_field + count - 1) % count;
            }
            Msg::Navigate(DirectionKey::Down) => {
                self.active_field = (self.active_field + 1) % self.credential_fields().len();
            }
            Msg::Input(ch) => self.edit_credential(|value| value.push(ch)),
            Msg::Backspace => self.edit_credential(|value| {
                value.pop();
            }),
            Msg::Submit => return self.request_connect(),
            _ => {}
        }
        None
    }

    pub fn select_dialect(&mut self, dialect: Dialect) {
        match self.session_handle.select_dialect(dialect) {
            Ok(session) => {
                self.session = session;
                self.active_field = 0;
                self.status_line = format!("Dialect: {}", dialect.label());
            }
            Err(error) => self.status_line = error.to_string(),
        }
    }

    fn edit_credential(&mut self, edit: impl FnOnce(&mut String)) {
        if matches!(
            self.session.status,
            ConnectionStatus::Connected | ConnectionStatus::Connecting
        ) {
            self.status_line = "Disconnect before editing credentials".to_string();
            return;
        }
        let Some(field) = self.active_field() else {
            return;
        };
        let mut value = self.session.credential(field).to_string();
        edit(&mut value);
        self.session = self.session_handle.set_credential(field, value);
    }

    fn request_connect(&mut self) -> Option<Command> {
        match self.session.status {
            ConnectionStatus::Connecting => {
                self.status_line = SessionError::Busy.to_string();
                return None;
            }
            ConnectionStatus::Connected => {
                self.status_line = SessionError::AlreadyConnected.to_string();
                return None;
            }
            ConnectionStatus::Disconnected | ConnectionStatus::Error => {}
        }

        let missing = self.session.missing_fields();
        if !missing.is_empty() {
            self.status_line = SessionError::MissingCredentials { missing }.to_string();
            return None;
        }

        self.status_line = format!("Connecting to {}...", self.session.dialect.label());
        Some(Command::Session(SessionCommand::Connect {
            dialect: self.session.dialect,
            credentials: self.session.credentials.clone(),
        }))
    }

    fn request_disconnect(&mut self) -> Option<Command> {
        if self.session.status == ConnectionStatus::Disconnected {
            self.status_line = SessionError::NotConnected.to_string();
            return None;
        }
        self.status_line = "Disconnecting...".to_string();
        Some(Command::Session(SessionCommand::Disconnect))
    }

    fn handle_schema(&mut self, msg: Msg) -> Option<Command> {
        match msg {
            Msg::Navigate(DirectionKey::Left) => self.schema_focus = SchemaFocus::Databases,
            Msg::Navigate(DirectionKey::Right) if self.tables.is_some() => {
                self.schema_focus = SchemaFocus::Tables;
            }
            Msg::Navigate(DirectionKey::Up) => match self.schema_focus {
                SchemaFocus::Databases => {
                    self.database_cursor = self.database_cursor.saturating_sub(1);
                }
                SchemaFocus::Tables => self.table_cursor = self.table_cursor.saturating_sub(1),
            },
            Msg::Navigate(DirectionKey::Down) => match self.schema_focus {
                SchemaFocus::Databases => {
                    self.database_cursor = step_down(self.database_cursor, self.databases.len());
                }
                SchemaFocus::Tables => {
                    let count = self.tables.as_ref().map_or(0, |meta| meta.tables.len());
                    self.table_cursor = step_down(self.table_cursor, count);
                }
            },
            Msg::Submit => {
                if !self.session.is_connected() {
                    self.status_line = SessionError::NotConnected.to_string();
                    return None;
                }
                return match self.schema_focus {
                    SchemaFocus::Databases => {
                        let database = self.databases.get(self.database_cursor)?.clone();
                        self.status_line = format!("Loading tables of `{database}`...");
                        Some(Command::Session(SessionCommand::ListTables(database)))
                    }
                    SchemaFocus::Tables => {
                        let table = self.selected_table()?.name.clone();
                        self.status_line = format!("Previewing `{table}`...");
                        Some(Command::Session(SessionCommand::PreviewTable(table)))
                    }
                };
            }
            _ => {}
        }
        None
    }

    fn handle_query(&mut self, msg: Msg) -> Option<Command> {
        match msg {
            Msg::Input(ch) => self.query_text.push(ch),
            Msg::Backspace => {
                self.query_text.pop();
            }
            Msg::Submit => {
                self.status_line = "Running query...".to_string();
                return Some(Command::Session(SessionCommand::RunQuery(
                    self.query_text.clone(),
                )));
            }
            _ => {}
        }
        None
    }

    fn handle_tags(&mut self, msg: Msg) -> Option<Command> {
        if self.picker_draft.is_some() {
            self.handle_picker(msg);
            return None;
        }
        let editing = matches!(self.tags.phase(), EditorPhase::EditingColor { .. });
        let selected_id = self
            .tags
            .tags()
            .get(self.tag_cursor)
            .map(|tag| tag.id.clone());

        let outcome = match msg {
            Msg::Navigate(DirectionKey::Up) => {
                self.tag_cursor = self.tag_cursor.saturating_sub(1);
                self.tags.cancel_delete();
                Ok(())
            }
            Msg::Navigate(DirectionKey::Down) => {
                self.tag_cursor = step_down(self.tag_cursor, self.tags.tags().len());
                self.tags.cancel_delete();
                Ok(())
            }
            Msg::Input(ch) if editing => {
                let mut draft = self.color_draft();
                draft.push(ch);
                self.tags.input_color(&draft)
            }
            Msg::Backspace if editing => {
                let mut draft = self.color_draft();
                draft.pop();
                self.tags.input_color(&draft)
            }
            Msg::Input(ch) => {
                self.tag_name_input.push(ch);
                Ok(())
            }
            Msg::Backspace => {
                self.tag_name_input.pop();
                Ok(())
            }
            Msg::PickColor if !editing => {
                self.picker_draft = Some(String::new());
                self.status_line = "Type a color for new tags, Esc to apply".to_string();
                Ok(())
            }
            Msg::EditColor => match &selected_id {
                Some(id) => self.tags.begin_color_edit(id),
                None => Ok(()),
            },
            Msg::Delete => match &selected_id {
                Some(id) => self.tags.reveal_delete(id),
                None => Ok(()),
            },
            Msg::Submit if editing => return Some(Command::Tag(TagAction::ClickAway)),
            Msg::Submit => {
                if let Some(id) = selected_id
                    .clone()
                    .filter(|id| self.tags.pending_delete() == Some(id.as_str()))
                {
                    return Some(Command::Tag(TagAction::ConfirmDelete(id)));
                }
                return Some(Command::Tag(TagAction::Create(self.tag_name_input.clone())));
            }
            Msg::Cancel if editing => return Some(Command::Tag(TagAction::ClickAway)),
            Msg::Cancel => {
                if self.tags.pending_delete().is_some() {
                    self.tags.cancel_delete();
                } else {
                    self.tags.dismiss_error();
                }
                Ok(())
            }
            _ => Ok(()),
        };

        if let Err(error) = outcome {
            self.status_line = error.to_string();
        }
        None
    }

    /// New-tag color picker: keystrokes edit the draft, Enter or Esc
    /// applies it. An untouched draft leaves the picker color as it was.
    fn handle_picker(&mut self, msg: Msg) {
        let Some(draft) = self.picker_draft.as_mut() else {
            return;
        };
        match msg {
            Msg::Input(ch) => draft.push(ch),
            Msg::Backspace => {
                draft.pop();
            }
            Msg::Submit | Msg::Cancel | Msg::PickColor => {
                let Some(draft) = self.picker_draft.take() else {
                    return;
                };
                if draft.is_empty() {
                    return;
                }
                self.status_line = match self.tags.set_picker_color(&draft) {
                    Ok(()) => format!("New tags will use {}", self.tags.picker_color()),
                    Err(error) => error.to_string(),
                };
            }
            _ => {}
        }
    }

    fn color_draft(&self) -> String {
        match self.tags.phase() {
            EditorPhase::EditingColor { draft, .. } => draft.clone(),
            _ => String::new(),
        }
    }

    fn fail(&mut self, error: &SessionError) {
        if *error == SessionError::StaleResponse {
            debug!("ignoring stale completion");
            return;
        }
        self.status_line = error.to_string();
        self.record(error.to_string());
    }

    fn record(&mut self, line: String) {
        self.activity.push(line);
        if self.activity.len() > ACTIVITY_LIMIT {
            let overflow = self.activity.len() - ACTIVITY_LIMIT;
            self.activity.drain(..overflow);
        }
    }
}

fn step_down(cursor: usize, len: usize) -> usize {
    (cursor + 1).min(len.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use connector_core::query_runner::QueryResult;
    use connector_core::schema_browser::{TableMetadata, TablePreview};
    use connector_core::session::{
        ConnectionStatus, CredentialField, Dialect, Session, SessionError, SessionHandle,
    };
    use connector_core::tags::{NewTag, Tag, TagPatch, TagStore, TagStoreError, TagsEditor};

    use super::{
        Command, Completion, ConnectorApp, DirectionKey, Msg, Pane, SchemaFocus, SessionCommand,
        TagAction,
    };

    #[derive(Debug, Default)]
    struct MemoryTagStore {
        created: Mutex<Vec<NewTag>>,
        deleted: Mutex<Vec<String>>,
        updates: Mutex<Vec<(String, TagPatch)>>,
    }

    #[async_trait::async_trait]
    impl TagStore for MemoryTagStore {
        async fn create_tag(&self, tag: NewTag) -> Result<Tag, TagStoreError> {
            self.created.lock().unwrap().push(tag.clone());
            Ok(Tag {
                id: format!("id-{}", tag.name),
                name: tag.name,
                color: tag.color,
            })
        }

        async fn update_tag(&self, id: &str, patch: TagPatch) -> Result<Tag, TagStoreError> {
            self.updates
                .lock()
                .unwrap()
                .push((id.to_string(), patch.clone()));
            let mut tag = seeded_tag();
            patch.apply_to(&mut tag);
            Ok(tag)
        }

        async fn delete_tag(&self, id: &str) -> Result<(), TagStoreError> {
            self.deleted.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    fn seeded_tag() -> Tag {
        Tag {
            id: "id".to_string(),
            name: "Tag 1".to_string(),
            color: "#ffffff".to_string(),
        }
    }

    fn app_with_store(store: Arc<MemoryTagStore>) -> ConnectorApp<Arc<MemoryTagStore>> {
        ConnectorApp::new(
            SessionHandle::new(Dialect::Mysql),
            TagsEditor::new(store, vec![seeded_tag()]),
        )
    }

    fn app() -> ConnectorApp<Arc<MemoryTagStore>> {
        app_with_store(Arc::new(MemoryTagStore::default()))
    }

    fn type_text(app: &mut ConnectorApp<Arc<MemoryTagStore>>, text: &str) {
        for ch in text.chars() {
            assert!(app.handle(Msg::Input(ch)).is_none());
        }
    }

    fn fill_mysql_form(app: &mut ConnectorApp<Arc<MemoryTagStore>>) {
        for value in ["root", "secret", "localhost", "3306"] {
            type_text(app, value);
            app.handle(Msg::Navigate(DirectionKey::Down));
        }
    }

    fn connected_session() -> Session {
        let mut session = Session::new(Dialect::Mysql);
        session.status = ConnectionStatus::Connected;
        session.selected_database = Some("plotly_datasets".to_string());
        session
    }

    #[test]
    fn pane_cycles_in_expected_order() {
        assert_eq!(Pane::Connection.next(), Pane::Schema);
        assert_eq!(Pane::Schema.next(), Pane::Query);
        assert_eq!(Pane::Query.next(), Pane::Tags);
        assert_eq!(Pane::Tags.next(), Pane::Connection);
    }

    #[test]
    fn exactly_one_dialect_is_marked_selected() {
        let mut app = app();

        for _ in 0..Dialect::ALL.len() {
            let markers = app.dialect_markers();
            let selected = markers
                .iter()
                .filter(|(_, selected)| *selected)
                .map(|(dialect, _)| *dialect)
                .collect::<Vec<_>>();
            assert_eq!(selected, vec![app.session().dialect]);
            app.handle(Msg::Navigate(DirectionKey::Right));
        }
    }

    #[test]
    fn switching_dialect_clears_typed_credentials() {
        let mut app = app();
        fill_mysql_form(&mut app);
        assert_eq!(app.session().credential(CredentialField::Username), "root");

        app.handle(Msg::Navigate(DirectionKey::Right));

        assert_eq!(app.session().dialect, Dialect::Mariadb);
        assert!(app.session().credentials.is_empty());
        assert_eq!(app.active_field(), Some(CredentialField::Username));
    }

    #[test]
    fn connect_with_empty_field_issues_no_command() {
        let mut app = app();
        type_text(&mut app, "root");

        assert!(app.handle(Msg::Submit).is_none());
        assert!(app.status_line().contains("password"));
        assert_eq!(app.session().status, ConnectionStatus::Disconnected);
    }

    #[test]
    fn filled_form_issues_connect_command() {
        let mut app = app();
        fill_mysql_form(&mut app);

        let command = app.handle(Msg::Submit).expect("connect command");

        let Command::Session(SessionCommand::Connect {
            dialect,
            credentials,
        }) = command
        else {
            panic!("unexpected command {command:?}");
        };
        assert_eq!(dialect, Dialect::Mysql);
        assert_eq!(credentials.len(), 4);
        assert_eq!(
            credentials.get(&CredentialField::Port).map(String::as_str),
            Some("3306")
        );
    }

    #[test]
    fn postgres_form_asks_for_database() {
        let mut app = app();
        app.select_dialect(Dialect::Postgres);

        assert_eq!(
            app.credential_fields().last(),
            Some(&CredentialField::Database)
        );
    }

    #[test]
    fn successful_connect_requests_database_list() {
        let mut app = app();

        let follow_up = app.apply(Completion::Connected(Ok(connected_session())));

        assert_eq!(
            follow_up,
            Some(Command::Session(SessionCommand::ListDatabases))
        );
        assert_eq!(app.activity().len(), 1);
    }

    #[test]
    fn rejected_connect_shows_backend_message() {
        let mut app = app();
        let mut session = Session::new(Dialect::Mysql);
        session.status = ConnectionStatus::Error;
        session.error_message = Some("Access denied".to_string());

        assert!(app.apply(Completion::Connected(Ok(session))).is_none());

        assert_eq!(app.status_line(), "Access denied");
    }

    #[test]
    fn tables_completion_focuses_table_list_and_preview_runs_query() {
        let mut app = app();
        app.apply_session(connected_session());
        app.pane = Pane::Schema;
        let metadata = Arc::new(TableMetadata {
            database: "plotly_datasets".to_string(),
            tables: vec![TablePreview {
                name: "ebola_2014".to_string(),
                columns: vec!["country".to_string()],
                rows: Vec::new(),
            }],
        });
        app.session = connected_session();
        app.tables = Some(Arc::clone(&metadata));
        app.schema_focus = SchemaFocus::Tables;

        let command = app.handle(Msg::Submit);

        assert_eq!(
            command,
            Some(Command::Session(SessionCommand::PreviewTable(
                "ebola_2014".to_string()
            )))
        );
    }

    #[test]
    fn query_completion_switches_to_query_pane() {
        let mut app = app();

        app.apply(Completion::Query {
            statement: "SELECT * FROM ebola_2014 LIMIT 5".to_string(),
            result: Ok(QueryResult::failed("You have an error in your SQL syntax")),
        });

        assert_eq!(app.pane(), Pane::Query);
        assert_eq!(app.query_text(), "SELECT * FROM ebola_2014 LIMIT 5");
        assert_eq!(
            app.status_line(),
            "Query failed: You have an error in your SQL syntax"
        );
    }

    #[test]
    fn stale_completion_is_ignored() {
        let mut app = app();
        let before = app.status_line().to_string();

        app.apply(Completion::Tables(Err(SessionError::StaleResponse)));

        assert_eq!(app.status_line(), before);
        assert!(app.activity().is_empty());
    }

    #[test]
    fn disconnected_snapshot_clears_schema_and_results() {
        let mut app = app();
        app.apply_session(connected_session());
        app.databases = vec!["plotly_datasets".to_string()];
        app.query_result = Some(QueryResult::default());

        app.apply_session(Session::new(Dialect::Mysql));

        assert!(app.databases().is_empty());
        assert!(app.tables().is_none());
        assert!(app.query_result().is_none());
    }

    #[tokio::test]
    async fn color_edit_commits_once_through_tag_action() {
        let store = Arc::new(MemoryTagStore::default());
        let mut app = app_with_store(Arc::clone(&store));
        app.pane = Pane::Tags;

        app.handle(Msg::EditColor);
        for _ in 0..7 {
            app.handle(Msg::Backspace);
        }
        type_text(&mut app, "#fff");
        let command = app.handle(Msg::Cancel).expect("click-away command");
        assert_eq!(command, Command::Tag(TagAction::ClickAway));
        app.run_tag_action(TagAction::ClickAway).await;

        assert_eq!(
            *store.updates.lock().unwrap(),
            vec![("id".to_string(), TagPatch::color("#ffffff"))]
        );
    }

    #[tokio::test]
    async fn delete_key_then_enter_removes_tag() {
        let store = Arc::new(MemoryTagStore::default());
        let mut app = app_with_store(Arc::clone(&store));
        app.pane = Pane::Tags;

        assert_eq!(
            app.handle(Msg::Submit),
            Some(Command::Tag(TagAction::Create(String::new())))
        );

        app.handle(Msg::Delete);
        let command = app.handle(Msg::Submit).expect("confirm command");
        assert_eq!(
            command,
            Command::Tag(TagAction::ConfirmDelete("id".to_string()))
        );
        app.run_tag_action(TagAction::ConfirmDelete("id".to_string()))
            .await;

        assert_eq!(*store.deleted.lock().unwrap(), vec!["id".to_string()]);
        assert!(app.tag_list().is_empty());
    }

    #[tokio::test]
    async fn typed_name_creates_tag_with_picker_color() {
        let mut app = app();
        app.pane = Pane::Tags;
        type_text(&mut app, "reporting");
        let picker = app.tags_editor().picker_color().to_string();

        let Some(Command::Tag(action)) = app.handle(Msg::Submit) else {
            panic!("expected a tag command");
        };
        app.run_tag_action(action).await;

        let created = app.tag_list().last().expect("tag was created");
        assert_eq!(created.name, "reporting");
        assert_eq!(created.color, picker);
        assert!(app.tag_name_input().is_empty());
    }

    #[tokio::test]
    async fn picked_color_is_used_for_the_next_tag() {
        let store = Arc::new(MemoryTagStore::default());
        let mut app = app_with_store(Arc::clone(&store));
        app.pane = Pane::Tags;

        assert!(app.handle(Msg::PickColor).is_none());
        type_text(&mut app, "#000");
        assert_eq!(app.picker_draft(), Some("#000"));
        assert!(app.handle(Msg::Cancel).is_none());
        assert_eq!(app.tags_editor().picker_color(), "#000000");
        assert!(app.tag_name_input().is_empty());

        type_text(&mut app, "ops");
        let Some(Command::Tag(action)) = app.handle(Msg::Submit) else {
            panic!("expected a tag command");
        };
        app.run_tag_action(action).await;

        assert_eq!(
            *store.created.lock().unwrap(),
            vec![NewTag {
                name: "ops".to_string(),
                color: "#000000".to_string(),
            }]
        );
    }

    #[test]
    fn invalid_picked_color_reports_error_and_keeps_picker() {
        let store = Arc::new(MemoryTagStore::default());
        let mut app = app_with_store(Arc::clone(&store));
        app.pane = Pane::Tags;
        let before = app.tags_editor().picker_color().to_string();

        app.handle(Msg::PickColor);
        type_text(&mut app, "#12");
        app.handle(Msg::Submit);

        assert_eq!(app.tags_editor().picker_color(), before);
        assert_eq!(app.tags_editor().error(), Some("`#12` is not a hex color"));
        assert_eq!(app.status_line(), "`#12` is not a hex color");
        assert!(app.picker_draft().is_none());
        assert!(store.created.lock().unwrap().is_empty());
    }

    #[test]
    fn closing_untouched_picker_keeps_color() {
        let mut app = app();
        app.pane = Pane::Tags;
        let before = app.tags_editor().picker_color().to_string();

        app.handle(Msg::PickColor);
        app.handle(Msg::Cancel);

        assert_eq!(app.tags_editor().picker_color(), before);
        assert!(app.tags_editor().error().is_none());
    }

    #[tokio::test]
    async fn moving_the_cursor_drops_a_revealed_delete() {
        let store = Arc::new(MemoryTagStore::default());
        let mut app = ConnectorApp::new(
            SessionHandle::new(Dialect::Mysql),
            TagsEditor::new(
                Arc::clone(&store),
                vec![
                    seeded_tag(),
                    Tag {
                        id: "id-2".to_string(),
                        name: "Tag 2".to_string(),
                        color: "#000000".to_string(),
                    },
                ],
            ),
        );
        app.pane = Pane::Tags;

        app.handle(Msg::Delete);
        assert_eq!(app.tags_editor().pending_delete(), Some("id"));
        app.handle(Msg::Navigate(DirectionKey::Down));
        app.handle(Msg::Navigate(DirectionKey::Up));

        assert!(app.tags_editor().pending_delete().is_none());
        assert_eq!(
            app.handle(Msg::Submit),
            Some(Command::Tag(TagAction::Create(String::new())))
        );
        assert!(store.deleted.lock().unwrap().is_empty());
    }
}
