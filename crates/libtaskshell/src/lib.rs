//! Attach a local terminal to the interactive shell of a running task.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod resolver;
pub mod router;
pub mod session;
pub mod terminal;
pub mod validate;
pub mod variant;

pub use config::{ConfigError, ShellConfig};
pub use error::{DialError, Ineligible, SessionError, ShellError, Unresolvable};
pub use orchestrator::{Orchestrator, SessionState};
pub use resolver::{EndpointResolver, QueueResolver};
pub use router::{LocalStdio, threaded_stdin};
pub use session::{Completion, Resizer, Session, SessionStreams};
pub use terminal::{ConsoleTerminal, TerminalDevice, TerminalGuard};
pub use variant::{Dialer, ProtocolDialer};
