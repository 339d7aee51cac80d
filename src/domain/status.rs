use serde::{Deserialize, Serialize};

/// Terminal status carried by every preview and article result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeStatus {
    Success,
    Blocked,
    Failed,
}

impl ScrapeStatus {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        }
    }
}
