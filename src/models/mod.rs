mod fabric;
mod network;
mod topology;

pub use fabric::*;
pub use network::*;
pub use topology::*;

use serde::Serialize;

/// Application name/version returned by the API index
#[derive(Debug, Clone, Serialize)]
pub struct AppInfo {
    pub application: String,
    pub version: String,
}
