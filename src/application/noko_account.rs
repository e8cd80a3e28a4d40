use crate::domain::models::NokoAccount;
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::entry_mapper::{decode_user, NokoUserResponse};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::noko_client::{NokoClient, NokoClientProvider};
use std::sync::Arc;

const ALLOWED_ROLES: [&str; 3] = ["supervisor", "leader", "coworker"];
const ACTIVE_STATE: &str = "active";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureAccountResult {
    Existing(NokoAccount),
    SetupRequired,
}

pub struct NokoAccountManager<S, C>
where
    S: CredentialStore,
    C: NokoClient,
{
    credential_store: Arc<S>,
    clients: Arc<NokoClientProvider<C>>,
}

impl<S, C> NokoAccountManager<S, C>
where
    S: CredentialStore,
    C: NokoClient,
{
    pub fn new(credential_store: Arc<S>, clients: Arc<NokoClientProvider<C>>) -> Self {
        Self {
            credential_store,
            clients,
        }
    }

    /// Verifies the token against Noko and stores it when the user may use
    /// the application.
    pub async fn connect(&self, api_token: &str) -> Result<NokoAccount, InfraError> {
        let api_token = api_token.trim();
        if api_token.is_empty() {
            return Err(InfraError::Credential(
                "noko api token must not be empty".to_string(),
            ));
        }

        let client = self.clients.client_for(api_token)?;
        let user = client.current_user().await?;
        ensure_user_can_log_time(&user)?;

        let account = NokoAccount {
            api_token: api_token.to_string(),
            user: decode_user(&user),
        };
        self.credential_store.save_account(&account)?;
        tracing::info!(user_id = account.user.id, "connected noko account");
        Ok(account)
    }

    pub fn ensure_account(&self) -> Result<EnsureAccountResult, InfraError> {
        match self.credential_store.load_account()? {
            Some(account) if !account.api_token.trim().is_empty() => {
                Ok(EnsureAccountResult::Existing(account))
            }
            _ => Ok(EnsureAccountResult::SetupRequired),
        }
    }

    pub fn disconnect(&self) -> Result<(), InfraError> {
        self.credential_store.delete_account()?;
        self.clients.clear()
    }
}

pub fn ensure_user_can_log_time(user: &NokoUserResponse) -> Result<(), InfraError> {
    if !ALLOWED_ROLES.contains(&user.role.as_str()) {
        return Err(InfraError::SetupRequired(format!(
            "user role ({}) cannot view project participants which is required for this application",
            user.role
        )));
    }
    if user.state != ACTIVE_STATE {
        return Err(InfraError::SetupRequired(format!(
            "user state ({}) is not active",
            user.state
        )));
    }
    Ok(())
}
