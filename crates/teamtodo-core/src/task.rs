use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

/// A single entry of a task collection, in its persisted JSON shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: i64,
    pub author: String,
    pub title: String,
    pub description: String,
    pub completed: bool,
}

/// Ordered as inserted; order only matters for display.
pub type TaskCollection = Vec<Task>;

impl Task {
    pub fn new_pending(id: i64, author: &str, title: &str, description: &str) -> Self {
        Self {
            id,
            author: author.to_string(),
            title: title.trim().to_string(),
            description: description.trim().to_string(),
            completed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Creator,
    Viewer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Creator => "creator",
            Role::Viewer => "viewer",
        }
    }

    pub fn can_write(self) -> bool {
        self == Role::Creator
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "creator" => Ok(Role::Creator),
            "viewer" => Ok(Role::Viewer),
            other => Err(anyhow!("unknown role: {other}")),
        }
    }
}
