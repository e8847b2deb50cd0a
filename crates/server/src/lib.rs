pub mod cfg;
pub mod connection;
pub mod error;
pub mod listener;
pub mod registry;
pub mod session;
pub mod source;

pub use cfg::ServerConfig;
pub use connection::{ConnectionConfig, serve_connection};
pub use error::ServerError;
pub use listener::{ServerHandle, start_server};
pub use registry::{ClientId, ClientRegistry, ClientSummary};
pub use session::{Action, Session, SessionState};
pub use source::{
    ApplySummary, ExportSets, SourceError, apply_export, load_export, parse_export,
    run_source_task,
};
