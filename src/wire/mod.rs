/// Wire boundary for admin commands
///
/// The monitor never touches sockets or the wire codec directly. It drives
/// connections through the `NodeConnection` trait and obtains fresh ones
/// through `ConnectionFactory`; the embedding driver supplies both. Command
/// payloads and replies travel as JSON-shaped documents.
use crate::error::{VigiaError, VigiaResult};
use async_trait::async_trait;

/// A command or reply payload in document form
pub type Document = serde_json::Value;

/// Well-known admin command payloads
pub mod commands {
    use super::Document;
    use serde_json::json;

    pub fn ping() -> Document {
        json!({ "ping": 1 })
    }

    pub fn is_master() -> Document {
        json!({ "ismaster": 1 })
    }

    pub fn build_info() -> Document {
        json!({ "buildinfo": 1 })
    }
}

/// Reply to an admin command
#[derive(Debug, Clone)]
pub struct Reply {
    doc: Document,
}

impl Reply {
    pub fn new(doc: Document) -> Self {
        Self { doc }
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn into_document(self) -> Document {
        self.doc
    }

    /// Whether the server reported success. Servers encode the flag as a
    /// number (integer or double) or occasionally a bool.
    pub fn ok(&self) -> bool {
        match self.doc.get("ok") {
            Some(v) => v.as_f64() == Some(1.0) || v.as_bool() == Some(true),
            None => false,
        }
    }

    /// Server-supplied error message, old and new field names included
    pub fn error_message(&self) -> Option<&str> {
        self.doc
            .get("errmsg")
            .or_else(|| self.doc.get("$err"))
            .and_then(|v| v.as_str())
    }

    /// Server-supplied error code
    pub fn error_code(&self) -> Option<i32> {
        self.doc
            .get("code")
            .and_then(|v| v.as_i64())
            .map(|c| c as i32)
    }

    /// Build the command error for a failed reply
    pub fn command_error(&self, command: &str) -> VigiaError {
        VigiaError::Command {
            command: command.to_string(),
            code: self.error_code(),
            message: self
                .error_message()
                .unwrap_or("command failed without error message")
                .to_string(),
        }
    }
}

/// One live connection to a node, owned by the caller for its lifetime
#[async_trait]
pub trait NodeConnection: Send + Sync {
    /// Run a command against the given database. `allow_on_secondary`
    /// maps to the wire flag permitting execution on non-primary members.
    async fn run_admin_command(
        &mut self,
        database: &str,
        command: Document,
        allow_on_secondary: bool,
    ) -> VigiaResult<Reply>;

    /// Verify the configured credentials are usable for the given database
    async fn verify_credentials(&mut self, database: &str) -> VigiaResult<()>;

    /// Close the connection. Close failures are absorbed by implementations.
    async fn close(&mut self);
}

/// Opens fresh connections to one node address
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn open(&self) -> VigiaResult<Box<dyn NodeConnection>>;
}
