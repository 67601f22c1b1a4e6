use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

/// Connection credentials for the wire front end.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Only this login user may connect; any user if `None`.
    pub user: Option<String>,
    pub password: String,
}

impl Credentials {
    pub fn new(user: Option<String>, password: String) -> Self {
        Self { user, password }
    }

    fn admits(&self, login_user: Option<&str>) -> bool {
        match &self.user {
            None => true,
            Some(expected) => login_user == Some(expected.as_str()),
        }
    }
}

#[derive(Debug)]
pub struct SlotdAuthSource {
    credentials: Credentials,
}

impl SlotdAuthSource {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl AuthSource for SlotdAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        if !self.credentials.admits(login.user().as_deref()) {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            tracing::warn!("rejected login for user {:?}", login.user());
            return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                "FATAL".into(),
                "28000".into(),
                "user not permitted".into(),
            ))));
        }
        Ok(Password::new(None, self.credentials.password.as_bytes().to_vec()))
    }
}
