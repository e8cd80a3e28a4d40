use crate::domain::models::NokoAccount;
use crate::infrastructure::error::InfraError;
use std::sync::Mutex;

pub trait CredentialStore: Send + Sync {
    fn save_account(&self, account: &NokoAccount) -> Result<(), InfraError>;
    fn load_account(&self) -> Result<Option<NokoAccount>, InfraError>;
    fn delete_account(&self) -> Result<(), InfraError>;
}

/// Keeps the Noko account as JSON in the OS keyring.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service_name: String,
    account_name: String,
}

impl KeyringCredentialStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new("keepi.noko", "default")
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save_account(&self, account: &NokoAccount) -> Result<(), InfraError> {
        account.validate().map_err(InfraError::Credential)?;
        let payload = serde_json::to_string(account)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        self.entry()?
            .set_password(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn load_account(&self) -> Result<Option<NokoAccount>, InfraError> {
        let payload = match self.entry()?.get_password() {
            Ok(value) => value,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => return Err(InfraError::Credential(error.to_string())),
        };

        let account = serde_json::from_str::<NokoAccount>(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        Ok(Some(account))
    }

    fn delete_account(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(_) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    account: Mutex<Option<NokoAccount>>,
}

impl CredentialStore for InMemoryCredentialStore {
    fn save_account(&self, account: &NokoAccount) -> Result<(), InfraError> {
        account.validate().map_err(InfraError::Credential)?;
        let mut guard = self
            .account
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = Some(account.clone());
        Ok(())
    }

    fn load_account(&self) -> Result<Option<NokoAccount>, InfraError> {
        let guard = self
            .account
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        Ok(guard.clone())
    }

    fn delete_account(&self) -> Result<(), InfraError> {
        let mut guard = self
            .account
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = None;
        Ok(())
    }
}
