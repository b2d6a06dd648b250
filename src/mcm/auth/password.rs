use async_trait::async_trait;
use russh::client;

use crate::mcm::client::transport_error;
use crate::mcm::error::{McmError, McmResult};
use crate::mcm::session::SshClientHandler;

use super::traits::AuthStrategy;

pub struct PasswordAuth {
    password: String,
}

impl PasswordAuth {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for PasswordAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        address: &str,
        username: &str,
    ) -> McmResult<()> {
        let result = handle
            .authenticate_password(username, &self.password)
            .await
            .map_err(|e| transport_error(address, e))?;

        if result.success() {
            Ok(())
        } else {
            Err(McmError::Auth {
                address: address.to_string(),
                reason: format!("password rejected for user {}", username),
            })
        }
    }

    fn name(&self) -> &'static str {
        "password"
    }
}
