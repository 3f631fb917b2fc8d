pub mod bridge;
pub mod engine;
pub mod loader;
pub mod resolver;
pub mod session;
pub mod store;

pub use bridge::ContextBridge;
pub use engine::{OutputFn, ReplayEngine};
pub use loader::{RecordingLoader, TemplateEngine, TEMPLATE_SUFFIX};
pub use session::ReplaySession;
pub use store::{ParameterSet, PersistentStore, STORE_FILE};
