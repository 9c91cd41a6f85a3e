#![forbid(unsafe_code)]

//! Runtime configuration.
//!
//! [`RuntimeConfig`] groups every tunable of the owner-thread runtime. The
//! defaults reproduce the classic window-system values, so
//! `RuntimeConfig::default()` is what almost every application wants.
//!
//! # Loading
//!
//! With the `config-file` feature the config can be read from TOML or JSON;
//! missing sections and fields fall back to their defaults.
//!
//! ```toml
//! # weft.toml
//! [ids]
//! capacity = 4096
//!
//! [modal]
//! message_filters = true
//! ```
//!
//! ```rust,ignore
//! let config = RuntimeConfig::from_toml_file("weft.toml")?;
//! ```

#[cfg(feature = "config-file")]
use std::path::Path;

#[cfg(feature = "config-file")]
use serde::{Deserialize, Serialize};

use weft_core::codes;

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "config-file", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config-file", serde(default))]
pub struct RuntimeConfig {
    /// Control identifier pool.
    pub ids: IdPoolConfig,
    /// Application-defined message code range.
    pub messages: MessageRangeConfig,
    /// Layout worker.
    pub layout: LayoutConfig,
    /// Background tasks started with `go`.
    pub tasks: TaskConfig,
    /// Modal loop behavior.
    pub modal: ModalConfig,
}

/// Identifier pool sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config-file", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config-file", serde(default))]
pub struct IdPoolConfig {
    /// Total slots; a 16-bit id space by default.
    pub capacity: u32,
    /// Predefined ids `[0, reserved)` that are never allocated.
    pub reserved: u32,
}

impl Default for IdPoolConfig {
    fn default() -> Self {
        Self {
            capacity: 1 << 16,
            // Predefined dialog ids up to and including "continue" (11).
            reserved: 12,
        }
    }
}

/// Application-defined message code range `[first, limit)`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config-file", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config-file", serde(default))]
pub struct MessageRangeConfig {
    pub first: u32,
    pub limit: u32,
}

impl Default for MessageRangeConfig {
    fn default() -> Self {
        Self {
            first: codes::APP,
            limit: codes::FIRST_REGISTERED,
        }
    }
}

/// Layout performer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config-file", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config-file", serde(default))]
pub struct LayoutConfig {
    /// Name of the worker thread.
    pub worker_name: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            worker_name: "weft-layout".into(),
        }
    }
}

/// Background task settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config-file", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config-file", serde(default))]
pub struct TaskConfig {
    /// Name given to every thread spawned by `go`.
    pub thread_name: String,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            thread_name: "weft-task".into(),
        }
    }
}

/// Modal loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "config-file", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config-file", serde(default))]
pub struct ModalConfig {
    /// Offer each modal message to the installed message filter first.
    pub message_filters: bool,
}

impl RuntimeConfig {
    /// Load from a TOML string.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Toml)
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    #[cfg(feature = "config-file")]
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(ConfigError::Json)
    }

    /// Validate all parameters.
    ///
    /// Returns a list of validation errors. An empty list means the config
    /// is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.ids.capacity == 0 {
            errors.push("ids.capacity must be > 0".into());
        }
        if self.ids.reserved > self.ids.capacity {
            errors.push(format!(
                "ids.reserved ({}) must not exceed ids.capacity ({})",
                self.ids.reserved, self.ids.capacity
            ));
        }

        if self.messages.first < codes::APP {
            errors.push(format!(
                "messages.first must be >= {:#x}, got {:#x}",
                codes::APP,
                self.messages.first
            ));
        }
        if self.messages.limit > codes::FIRST_REGISTERED {
            errors.push(format!(
                "messages.limit must be <= {:#x}, got {:#x}",
                codes::FIRST_REGISTERED,
                self.messages.limit
            ));
        }
        // Two codes are taken by the runtime itself.
        if self.messages.limit < self.messages.first.saturating_add(2) {
            errors.push("messages range must hold at least 2 codes".into());
        }

        if self.layout.worker_name.is_empty() {
            errors.push("layout.worker_name must not be empty".into());
        }
        if self.tasks.thread_name.is_empty() {
            errors.push("tasks.thread_name must not be empty".into());
        }

        errors
    }
}

/// Errors from loading or validating a [`RuntimeConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading a file.
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
    /// TOML parse error.
    #[cfg(feature = "config-file")]
    #[error("TOML parse error: {0}")]
    Toml(#[source] toml::de::Error),
    /// JSON parse error.
    #[cfg(feature = "config-file")]
    #[error("JSON parse error: {0}")]
    Json(#[source] serde_json::Error),
    /// Validation errors.
    #[error("validation errors: {}", .0.join("; "))]
    Validation(Vec<String>),
}
