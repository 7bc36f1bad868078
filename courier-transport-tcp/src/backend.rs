//! Transport backend selection
//!
//! The server asks for a [`TransportPreference`]; the selector turns that
//! plus the host OS name into the [`TransportBackend`] actually used for the
//! listening socket. The decision is re-evaluated on every start.

use courier_core::error::ConfigError;
use std::fmt;
use std::str::FromStr;

/// Backend the caller would like to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportPreference {
    /// Portable sockets on every platform
    #[default]
    Portable,
    /// Linux-tuned listener when running on Linux, portable elsewhere
    Optimized,
}

impl FromStr for TransportPreference {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "portable" | "nio" => Ok(Self::Portable),
            "optimized" | "epoll" | "native" => Ok(Self::Optimized),
            _ => Err(ConfigError::InvalidValue {
                field: "transport".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for TransportPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Portable => write!(f, "portable"),
            Self::Optimized => write!(f, "optimized"),
        }
    }
}

/// Backend chosen for one server start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportBackend {
    /// Plain listener
    Portable,
    /// Listener with `SO_REUSEPORT` and an enlarged accept backlog
    LinuxOptimized,
}

impl TransportBackend {
    /// Whether this is the Linux-tuned backend
    pub fn is_optimized(&self) -> bool {
        matches!(self, Self::LinuxOptimized)
    }
}

impl fmt::Display for TransportBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Portable => write!(f, "portable"),
            Self::LinuxOptimized => write!(f, "linux-optimized"),
        }
    }
}

/// Pick the backend for a preference and OS name
///
/// The optimized backend is chosen only when it is preferred and the OS
/// name, trimmed and ASCII-lowercased, starts with `linux`. An unknown OS
/// name always falls back to the portable backend.
pub fn select_backend(preference: TransportPreference, os_name: Option<&str>) -> TransportBackend {
    if preference != TransportPreference::Optimized {
        return TransportBackend::Portable;
    }

    match os_name {
        Some(name) if name.trim().to_ascii_lowercase().starts_with("linux") => {
            TransportBackend::LinuxOptimized
        }
        _ => TransportBackend::Portable,
    }
}

/// OS name of the running host, e.g. `linux x86_64`
pub fn host_os_name() -> Option<String> {
    let os = std::env::consts::OS;
    if os.is_empty() {
        return None;
    }
    Some(format!("{} {}", os, std::env::consts::ARCH))
}
