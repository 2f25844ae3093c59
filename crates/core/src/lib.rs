pub mod connection_dispatcher;
pub mod connection_log;
pub mod observers;
pub mod query_runner;
pub mod schema_browser;
pub mod session;
pub mod settings;
pub mod tag_store;
pub mod tags;
