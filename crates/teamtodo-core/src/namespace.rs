use std::fmt::Write as _;
use std::str::FromStr;

use anyhow::anyhow;
use tracing::debug;

use crate::task::Role;

pub const GLOBAL_KEY: &str = "tasks_global";
pub const LEGACY_KEY: &str = "tasks";
pub const USER_KEY_PREFIX: &str = "tasks_";

/// Which storage keys a deployment uses for task collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// Per-user namespaces mirrored into one global namespace.
    #[default]
    Shared,
    /// One list under `tasks` for everybody.
    Legacy,
}

impl FromStr for Layout {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(Layout::Shared),
            "legacy" => Ok(Layout::Legacy),
            other => Err(anyhow!("invalid namespace layout: {other}")),
        }
    }
}

/// The ordered pair of keys a session consults when loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceKeys {
    pub primary: String,
    pub fallback: String,
    pub user_key: String,
    pub global_key: String,
}

impl NamespaceKeys {
    /// Keys whose external changes this session reconciles.
    pub fn is_relevant(&self, key: &str) -> bool {
        key == self.global_key || key == self.user_key
    }

    /// Keys a creator writes on save, user key first.
    pub fn write_targets(&self) -> Vec<&str> {
        if self.user_key == self.global_key {
            vec![self.global_key.as_str()]
        } else {
            vec![self.user_key.as_str(), self.global_key.as_str()]
        }
    }
}

pub fn normalize_username(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join("_");
    encode_uri_component(&collapsed)
}

pub fn user_key(name: &str) -> String {
    format!("{USER_KEY_PREFIX}{}", normalize_username(name))
}

#[tracing::instrument(level = "debug")]
pub fn resolve_namespace(user: &str, role: Role, layout: Layout) -> NamespaceKeys {
    let (user_key, global_key) = match layout {
        Layout::Shared => (user_key(user), GLOBAL_KEY.to_string()),
        Layout::Legacy => (LEGACY_KEY.to_string(), LEGACY_KEY.to_string()),
    };

    let (primary, fallback) = match role {
        Role::Creator => (user_key.clone(), global_key.clone()),
        Role::Viewer => (global_key.clone(), user_key.clone()),
    };

    debug!(%primary, %fallback, "resolved namespace");
    NamespaceKeys {
        primary,
        fallback,
        user_key,
        global_key,
    }
}

fn encode_uri_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        let unreserved = byte.is_ascii_alphanumeric()
            || matches!(byte, b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')');
        if unreserved {
            out.push(byte as char);
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}
