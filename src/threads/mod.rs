pub mod chord;
pub mod setup;
pub mod shutdown_handoff;
pub mod tcp_service;
