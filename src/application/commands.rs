use crate::application::bootstrap::{bootstrap_workspace, BootstrapResult};
use crate::application::categories::{
    cached_noko_projects, cached_noko_tags, CategoryInput, CategoryService,
};
use crate::application::noko_account::{EnsureAccountResult, NokoAccountManager};
use crate::application::timesheet::{ApplyReport, TimesheetService, WeekSheet};
use crate::domain::models::{Category, LoggableDay, NokoCallsDelta, NokoUser, User};
use crate::domain::time_notation::{
    to_short_iso_date, try_parse_time_notation, UNSUPPORTED_TIME_NOTATION_MESSAGE,
};
use crate::domain::week::week_range_for;
use crate::infrastructure::category_repository::{NewUser, SqliteCategoryRepository, StoredCategory};
use crate::infrastructure::config::{load_app_config, save_default_user_id, AppConfig};
use crate::infrastructure::credential_store::{CredentialStore, KeyringCredentialStore};
use crate::infrastructure::entry_mapper::{decode_user, NokoProject, NokoTag};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_cache::{JsonFileStore, LocalCache};
use crate::infrastructure::noko_client::{
    NokoClient, NokoClientProvider, NokoClientSettings, ReqwestNokoClient,
};
use chrono::{Datelike, Local, NaiveDate, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const NOKO_TOKEN_KEYS: [&str; 2] = ["KEEPI_NOKO_TOKEN", "NOKO_TOKEN"];
const IDENTITY_ORIGIN: &str = "noko";

type TokenLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub struct AppState<S = KeyringCredentialStore, C = ReqwestNokoClient>
where
    S: CredentialStore,
    C: NokoClient,
{
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    config: AppConfig,
    credential_store: Arc<S>,
    clients: Arc<NokoClientProvider<C>>,
    categories: CategoryService<SqliteCategoryRepository>,
    cache: LocalCache<JsonFileStore>,
    token_lookup: TokenLookup,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let settings = NokoClientSettings::from_config(&bootstrap.config);
        Ok(Self::from_bootstrap(
            bootstrap,
            Arc::new(KeyringCredentialStore::default()),
            Arc::new(NokoClientProvider::reqwest(settings)),
        ))
    }
}

impl<S, C> AppState<S, C>
where
    S: CredentialStore,
    C: NokoClient + 'static,
{
    pub fn with_services(
        workspace_root: PathBuf,
        credential_store: Arc<S>,
        clients: Arc<NokoClientProvider<C>>,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        Ok(Self::from_bootstrap(bootstrap, credential_store, clients))
    }

    fn from_bootstrap(
        bootstrap: BootstrapResult,
        credential_store: Arc<S>,
        clients: Arc<NokoClientProvider<C>>,
    ) -> Self {
        Self {
            config_dir: bootstrap.config_dir,
            categories: CategoryService::new(Arc::new(SqliteCategoryRepository::new(
                &bootstrap.database_path,
            ))),
            cache: LocalCache::new(JsonFileStore::new(&bootstrap.cache_path)),
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            config: bootstrap.config,
            credential_store,
            clients,
            token_lookup: Arc::new(|key: &str| std::env::var(key).ok()),
            log_guard: Mutex::new(()),
        }
    }

    pub fn with_token_lookup(mut self, token_lookup: TokenLookup) -> Self {
        self.token_lookup = token_lookup;
        self
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }

    fn account_manager(&self) -> NokoAccountManager<S, C> {
        NokoAccountManager::new(Arc::clone(&self.credential_store), Arc::clone(&self.clients))
    }

    /// Environment first, then the connected account.
    fn api_token(&self) -> Result<String, InfraError> {
        if let Some(token) = load_noko_token_from_lookup(self.token_lookup.as_ref()) {
            return Ok(token);
        }
        match self.account_manager().ensure_account()? {
            EnsureAccountResult::Existing(account) => Ok(account.api_token),
            EnsureAccountResult::SetupRequired => Err(InfraError::SetupRequired(format!(
                "no noko account connected; run `keepi connect --token <token>` or set one of: {}",
                NOKO_TOKEN_KEYS.join(", ")
            ))),
        }
    }

    fn client(&self) -> Result<Arc<C>, InfraError> {
        self.clients.client_for(&self.api_token()?)
    }

    fn timesheet(&self) -> Result<TimesheetService<C>, InfraError> {
        Ok(TimesheetService::new(self.client()?).with_policy(self.config.reconcile_policy))
    }

    fn register_noko_user(&self, noko_user: &NokoUser) -> Result<User, InfraError> {
        let user = self.categories.ensure_user(&NewUser {
            external_id: noko_user.id.to_string(),
            email_address: noko_user.email.clone(),
            name: noko_user.name.clone(),
            identity_origin: IDENTITY_ORIGIN.to_string(),
        })?;
        save_default_user_id(&self.config_dir, Some(user.id))?;
        Ok(user)
    }

    /// The local user owning the categories. Registered on first use when
    /// only an environment token is available.
    async fn current_user_id(&self) -> Result<i64, InfraError> {
        if let Some(user_id) = load_app_config(&self.config_dir)?.default_user_id {
            return Ok(user_id);
        }
        let client = self.client()?;
        let noko_user = decode_user(&client.current_user().await?);
        Ok(self.register_noko_user(&noko_user)?.id)
    }

    async fn user_categories(&self) -> Result<Vec<Category>, InfraError> {
        let user_id = self.current_user_id().await?;
        self.categories.categories_for_user(user_id)
    }

    fn refresh_cached_categories(&self, user_id: i64) -> Result<Vec<Category>, InfraError> {
        let categories = self.categories.categories_for_user(user_id)?;
        self.cache.save_categories(&categories)?;
        Ok(categories)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WeekResponse {
    pub week_number: u32,
    pub year: i32,
    pub dates: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectResponse {
    pub user_id: i64,
    pub noko_user: NokoUser,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogResponse {
    pub tags: Vec<NokoTag>,
    pub projects: Vec<NokoProject>,
}

#[derive(Debug, Clone)]
pub struct LogTimeRequest {
    pub date: String,
    pub category: String,
    pub time: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogTimeResponse {
    pub date: String,
    pub category: String,
    pub previous_minutes: u32,
    pub minutes: u32,
    pub delta: NokoCallsDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ApplyReport>,
}

pub fn week_impl(date: Option<String>) -> Result<WeekResponse, InfraError> {
    let date = parse_date_input(date.as_deref(), "date")?;
    let range = week_range_for(date);
    Ok(WeekResponse {
        week_number: range.week_number,
        year: range.year,
        dates: range.dates.iter().map(|day| to_short_iso_date(*day)).collect(),
    })
}

pub async fn connect_impl<S, C>(
    state: &AppState<S, C>,
    token: String,
) -> Result<ConnectResponse, InfraError>
where
    S: CredentialStore,
    C: NokoClient + 'static,
{
    let account = state.account_manager().connect(&token).await?;
    let user = state.register_noko_user(&account.user)?;
    state.log_info(
        "connect",
        &format!("connected noko user {} as local user {}", account.user.id, user.id),
    );
    Ok(ConnectResponse {
        user_id: user.id,
        noko_user: account.user,
    })
}

pub fn disconnect_impl<S, C>(state: &AppState<S, C>) -> Result<(), InfraError>
where
    S: CredentialStore,
    C: NokoClient + 'static,
{
    state.account_manager().disconnect()?;
    save_default_user_id(&state.config_dir, None)?;
    state.log_info("disconnect", "removed noko account");
    Ok(())
}

/// Falls back to the local cache when the category database is unreadable.
pub async fn list_categories_impl<S, C>(state: &AppState<S, C>) -> Result<Vec<Category>, InfraError>
where
    S: CredentialStore,
    C: NokoClient + 'static,
{
    let user_id = state.current_user_id().await?;
    match state.refresh_cached_categories(user_id) {
        Ok(categories) => Ok(categories),
        Err(InfraError::Sqlite(error)) => {
            tracing::warn!(%error, "falling back to cached categories");
            state.cache.load_categories()
        }
        Err(error) => Err(error),
    }
}

pub async fn add_category_impl<S, C>(
    state: &AppState<S, C>,
    input: CategoryInput,
) -> Result<StoredCategory, InfraError>
where
    S: CredentialStore,
    C: NokoClient + 'static,
{
    let user_id = state.current_user_id().await?;
    let stored = state.categories.create_entry_category(user_id, input)?;
    state.refresh_cached_categories(user_id)?;
    state.log_info(
        "categories_add",
        &format!("created category {}", stored.category.name),
    );
    Ok(stored)
}

pub async fn remove_category_impl<S, C>(
    state: &AppState<S, C>,
    name: String,
) -> Result<StoredCategory, InfraError>
where
    S: CredentialStore,
    C: NokoClient + 'static,
{
    let user_id = state.current_user_id().await?;
    let stored = state.categories.find_by_name(user_id, &name)?;
    state.categories.delete_entry_category(user_id, stored.id)?;
    state.refresh_cached_categories(user_id)?;
    state.log_info(
        "categories_remove",
        &format!("removed category {}", stored.category.name),
    );
    Ok(stored)
}

pub async fn catalog_impl<S, C>(
    state: &AppState<S, C>,
    refresh: bool,
) -> Result<CatalogResponse, InfraError>
where
    S: CredentialStore,
    C: NokoClient + 'static,
{
    let client = state.client()?;
    let tags = cached_noko_tags(client.as_ref(), &state.cache, refresh).await?;
    let projects = cached_noko_projects(client.as_ref(), &state.cache, refresh).await?;
    Ok(CatalogResponse { tags, projects })
}

pub async fn show_impl<S, C>(
    state: &AppState<S, C>,
    date: Option<String>,
) -> Result<WeekSheet, InfraError>
where
    S: CredentialStore,
    C: NokoClient + 'static,
{
    let date = parse_date_input(date.as_deref(), "date")?;
    let categories = state.user_categories().await?;
    state.timesheet()?.load_week(date, &categories).await
}

/// Sets one (category, day) cell to the given time and reconciles the week
/// with Noko. A dry run only reports the planned calls.
pub async fn log_time_impl<S, C>(
    state: &AppState<S, C>,
    request: LogTimeRequest,
) -> Result<LogTimeResponse, InfraError>
where
    S: CredentialStore,
    C: NokoClient + 'static,
{
    let date = parse_date_input(Some(&request.date), "date")?;
    let minutes = try_parse_time_notation(&request.time).ok_or_else(|| {
        InfraError::Validation(format!(
            "{UNSUPPORTED_TIME_NOTATION_MESSAGE}: '{}'",
            request.time.trim()
        ))
    })?;

    let categories = state.user_categories().await?;
    let category = categories
        .iter()
        .find(|category| category.name.eq_ignore_ascii_case(request.category.trim()))
        .ok_or_else(|| {
            InfraError::NotFound(format!("entry category '{}'", request.category.trim()))
        })?;
    if !category.is_syncable() {
        return Err(InfraError::Validation(format!(
            "entry category '{}' is readonly or not mapped to a noko project and tags",
            category.name
        )));
    }
    if !category.is_active_on(date) {
        return Err(InfraError::Validation(format!(
            "entry category '{}' is not active on {}",
            category.name,
            to_short_iso_date(date)
        )));
    }

    let service = state.timesheet()?;
    let sheet = service.load_week(date, &categories).await?;
    let mut edited = sheet.grid.clone();
    let cell = edited
        .cell_mut(&category.name, LoggableDay::from_weekday(date.weekday()))
        .ok_or_else(|| InfraError::NotFound(format!("grid cell for {} on {date}", category.name)))?;
    let previous_minutes = cell.input_minutes;
    cell.input_minutes = minutes;

    let delta = service.plan(&sheet, &edited.entries);
    let report = if request.dry_run || delta.is_empty() {
        None
    } else {
        let report = service.apply(&delta).await?;
        state.log_info(
            "log",
            &format!(
                "{} on {}: {} created, {} updated, {} deleted",
                category.name,
                to_short_iso_date(date),
                report.created.len(),
                report.updated.len(),
                report.deleted.len()
            ),
        );
        Some(report)
    };

    Ok(LogTimeResponse {
        date: to_short_iso_date(date),
        category: category.name.clone(),
        previous_minutes,
        minutes,
        delta,
        report,
    })
}

fn load_noko_token_from_lookup<F>(lookup: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String> + ?Sized,
{
    optional_lookup_value(lookup, &NOKO_TOKEN_KEYS)
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String> + ?Sized,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}

/// Accepts `yyyy-mm-dd` and `dd-mm-yyyy`; nothing means today.
fn parse_date_input(value: Option<&str>, field_name: &str) -> Result<NaiveDate, InfraError> {
    let Some(raw) = value.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(Local::now().date_naive());
    };
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d-%m-%Y"))
        .map_err(|error| InfraError::Validation(format!("invalid {field_name} '{raw}': {error}")))
}
