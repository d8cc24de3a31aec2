//! HTTP request handlers.

pub mod admin;
pub mod auth;
pub mod capabilities;
pub mod common;
pub mod files;
pub mod organizations;
pub mod shares;

pub use admin::*;
pub use auth::*;
pub use capabilities::*;
pub use files::*;
pub use organizations::*;
pub use shares::*;
