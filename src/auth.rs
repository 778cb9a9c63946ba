use std::sync::Arc;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::directory::Directory;

/// Shared password, but only for identities the directory knows. The login
/// user becomes the requester identity for the rest of the connection.
pub struct MemberAuthSource {
    password: String,
    directory: Arc<dyn Directory>,
}

impl std::fmt::Debug for MemberAuthSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberAuthSource").finish_non_exhaustive()
    }
}

impl MemberAuthSource {
    pub fn new(password: String, directory: Arc<dyn Directory>) -> Self {
        Self { password, directory }
    }
}

#[async_trait]
impl AuthSource for MemberAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().unwrap_or_default();
        if self.directory.lookup(user).is_none() {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            tracing::warn!(user, "login refused: not a member");
            return Err(unknown_member(user));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

pub(crate) fn unknown_member(user: &str) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "FATAL".into(),
        "28000".into(),
        format!("{user:?} is not a registered member"),
    )))
}
