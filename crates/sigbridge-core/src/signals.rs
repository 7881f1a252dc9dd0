//! Well-known signal names.
//!
//! Only the `misc:*` pair has meaning to the bridge itself (app-chain probe).
//! The rest are emitted or consumed by collaborators and are relayed as
//! opaque payloads.

/// Liveness probe sent to (or received from) the instrumented application.
pub const PING: &str = "misc:ping";
/// Reply to [`PING`]; carries only the replier's `sent` stamp.
pub const PONG: &str = "misc:pong";

/// Console command sent to the application.
pub const CONSOLE_IN: &str = "console:in";
/// Leveled log line emitted by the application.
pub const CONSOLE_LOG: &str = "console:log";
/// Element property modification sent to the application.
pub const ELEMENTS_MOD: &str = "elements:mod";
/// Full element tree emitted by the application.
pub const ELEMENTS_TREE: &str = "elements:tree";
/// Partial element update emitted by the application.
pub const ELEMENTS_UPDATE: &str = "elements:update";
/// Network request started.
pub const NET_START: &str = "net:start";
/// Network request progress.
pub const NET_UPDATE: &str = "net:update";
/// Network request finished.
pub const NET_STOP: &str = "net:stop";
/// Network request finished with a final property update.
pub const NET_STOP_UPDATE: &str = "net:stop.update";
/// Process statistics snapshot.
pub const USAGE_STATS: &str = "usage:stats";
/// Application-defined envelope (`kind` + `body`).
pub const CUSTOM_ENVELOPE: &str = "custom:envelope";

/// Placeholder used in logs when an envelope carries no signal name.
pub const NO_SIGNAL: &str = "[no signal]";
