pub mod cdp;
pub mod context;
pub mod selector;

pub use cdp::CdpContext;
pub use context::{ElementHandle, ExecutionContext, WaitTimeout, POLL_INTERVAL};
pub use selector::{pick_selector, pick_single, ResolvedSelector};
