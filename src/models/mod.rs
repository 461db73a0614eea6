//! Data models for the milestone oracle service

use serde::{Deserialize, Serialize};

pub mod amount;
pub mod oracle;
pub mod resolution;
pub mod webhook;

pub use oracle::*;
pub use resolution::*;
pub use webhook::*;

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}
