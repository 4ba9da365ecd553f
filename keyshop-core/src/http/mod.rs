// File: src/http/mod.rs

pub mod notify;
pub mod status;

pub use notify::{notify_router, process_notify, start_http_server, NotifyReply, NotifyState};
pub use status::{status_router, StatusState};
