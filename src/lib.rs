pub mod api;
pub mod config;
pub mod error;
pub mod rtc;
pub mod session;
