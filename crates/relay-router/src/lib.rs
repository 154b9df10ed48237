//! Inbound OpenAI-style API surface.

mod proxy;

pub use proxy::{ProxyState, REQUEST_ID_HEADER, proxy_router};
