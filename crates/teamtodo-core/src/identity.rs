use tracing::{debug, info, warn};

use crate::error::{StorageError, TaskError};
use crate::storage::Storage;
use crate::task::Role;

pub const USER_KEY: &str = "user";
pub const ROLE_KEY: &str = "role";

/// Who is logged in. Persisted so a restart resumes the same session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user: String,
    pub role: Role,
}

impl Identity {
    pub fn new(user: &str, role: Role) -> Result<Self, TaskError> {
        let user = user.trim();
        if user.is_empty() {
            return Err(TaskError::Validation("username cannot be empty".to_string()));
        }
        Ok(Self {
            user: user.to_string(),
            role,
        })
    }
}

/// Returns the stored identity when both halves are present and valid.
#[tracing::instrument(skip(storage))]
pub fn restore<S: Storage + ?Sized>(storage: &S) -> Result<Option<Identity>, StorageError> {
    let user = storage.get(USER_KEY)?;
    let role = storage.get(ROLE_KEY)?;

    let (Some(user), Some(role)) = (user, role) else {
        debug!("no stored identity");
        return Ok(None);
    };
    let role = match role.parse::<Role>() {
        Ok(role) => role,
        Err(err) => {
            warn!(error = %err, "ignoring stored identity with invalid role");
            return Ok(None);
        }
    };
    match Identity::new(&user, role) {
        Ok(identity) => Ok(Some(identity)),
        Err(err) => {
            warn!(error = %err, "ignoring stored identity");
            Ok(None)
        }
    }
}

#[tracing::instrument(skip(storage))]
pub fn persist<S: Storage + ?Sized>(storage: &S, identity: &Identity) -> Result<(), StorageError> {
    storage.set(USER_KEY, &identity.user)?;
    storage.set(ROLE_KEY, identity.role.as_str())?;
    info!(user = %identity.user, role = %identity.role, "stored identity");
    Ok(())
}

/// Forgets the logged-in identity. Task records are left alone.
#[tracing::instrument(skip(storage))]
pub fn clear<S: Storage + ?Sized>(storage: &S) -> Result<(), StorageError> {
    storage.remove(USER_KEY)?;
    storage.remove(ROLE_KEY)?;
    info!("cleared identity");
    Ok(())
}
