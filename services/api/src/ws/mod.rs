//! WebSocket layer: the viewer session endpoint, its wire protocol, the
//! per-session turn manager, and the transparent relay.

pub mod protocol;
pub mod proxy;
pub mod session;
pub mod turn;

pub use proxy::proxy_ws_handler;
pub use session::ws_handler;
