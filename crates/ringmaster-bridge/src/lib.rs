//! Bridge layer: thin HTTP/WebSocket handlers over the core engine.
//!
//! Everything here calls straight into `ringmaster_core::store::Store` and
//! `ringmaster_core::event::EventBus` — no business logic lives in this
//! crate. It exists so the engine has one illustrative external surface;
//! a real deployment's REST/WS contract is this crate's concern, not the
//! scheduler's.

pub mod api_error;
pub mod auth;
pub mod http_api;
pub mod origin_validation;
