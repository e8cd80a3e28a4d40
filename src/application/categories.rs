use crate::domain::models::{sorted_categories, Category, User};
use chrono::NaiveDate;
use crate::infrastructure::category_repository::{CategoryRepository, NewUser, StoredCategory};
use crate::infrastructure::entry_mapper::{NokoProject, NokoTag};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_cache::{KeyValueStore, LocalCache, NOKO_PROJECTS_KEY, NOKO_TAGS_KEY};
use crate::infrastructure::noko_client::NokoClient;
use std::sync::Arc;

pub const MAX_CATEGORY_NAME_LENGTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterUserResult {
    UserCreated(User),
    UserAlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryInput {
    pub name: String,
    /// Defaults to the end of the user's current list.
    pub order: Option<i64>,
    pub readonly: bool,
    pub project_id: Option<i64>,
    pub noko_tags: Option<Vec<String>>,
    pub enabled: bool,
    pub active_from: Option<NaiveDate>,
    pub active_to: Option<NaiveDate>,
}

pub struct CategoryService<R: CategoryRepository> {
    repository: Arc<R>,
}

impl<R: CategoryRepository> CategoryService<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    pub fn register_user(&self, user: &NewUser) -> Result<RegisterUserResult, InfraError> {
        if self
            .repository
            .user_exists(&user.external_id, &user.email_address)?
        {
            return Ok(RegisterUserResult::UserAlreadyExists);
        }
        match self.repository.insert_user(user) {
            Ok(created) => {
                tracing::info!(user_id = created.id, "registered user");
                Ok(RegisterUserResult::UserCreated(created))
            }
            Err(InfraError::DuplicateUser(_)) => Ok(RegisterUserResult::UserAlreadyExists),
            Err(error) => Err(error),
        }
    }

    /// Registers the user if needed and returns the stored row either way.
    pub fn ensure_user(&self, user: &NewUser) -> Result<User, InfraError> {
        if let Some(existing) = self.repository.find_user_by_external_id(&user.external_id)? {
            return Ok(existing);
        }
        match self.register_user(user)? {
            RegisterUserResult::UserCreated(created) => Ok(created),
            RegisterUserResult::UserAlreadyExists => self
                .repository
                .find_user_by_external_id(&user.external_id)?
                .ok_or_else(|| {
                    InfraError::DuplicateUser(format!(
                        "{} (email {} belongs to another user)",
                        user.external_id, user.email_address
                    ))
                }),
        }
    }

    /// Categories sorted for display; storage order is left untouched.
    pub fn categories_for_user(&self, user_id: i64) -> Result<Vec<Category>, InfraError> {
        let stored = self.stored_categories_for_user(user_id)?;
        let categories = stored
            .into_iter()
            .map(|stored| stored.category)
            .collect::<Vec<_>>();
        Ok(sorted_categories(&categories))
    }

    pub fn stored_categories_for_user(&self, user_id: i64) -> Result<Vec<StoredCategory>, InfraError> {
        self.repository.list_for_user(user_id)
    }

    pub fn create_entry_category(
        &self,
        user_id: i64,
        input: CategoryInput,
    ) -> Result<StoredCategory, InfraError> {
        let existing = self.repository.list_for_user(user_id)?;
        let order = match input.order {
            Some(order) => order,
            None => existing
                .iter()
                .map(|stored| stored.category.order + 1)
                .max()
                .unwrap_or(0),
        };
        let category = build_category(input, order)?;
        if existing
            .iter()
            .any(|stored| stored.category.name == category.name)
        {
            return Err(InfraError::DuplicateCategory(category.name));
        }

        let stored = self.repository.insert(user_id, &category)?;
        tracing::info!(category = %stored.category.name, user_id, "created entry category");
        Ok(stored)
    }

    pub fn update_entry_category(
        &self,
        user_id: i64,
        id: i64,
        input: CategoryInput,
    ) -> Result<(), InfraError> {
        let existing = self.find_owned(user_id, id)?;
        let order = input.order.unwrap_or(existing.category.order);
        let category = build_category(input, order)?;
        self.repository.update(id, &category)
    }

    pub fn delete_entry_category(&self, user_id: i64, id: i64) -> Result<(), InfraError> {
        self.find_owned(user_id, id)?;
        self.repository.delete(id)
    }

    pub fn find_by_name(&self, user_id: i64, name: &str) -> Result<StoredCategory, InfraError> {
        let name = name.trim();
        self.repository
            .list_for_user(user_id)?
            .into_iter()
            .find(|stored| stored.category.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| InfraError::NotFound(format!("entry category '{name}'")))
    }

    fn find_owned(&self, user_id: i64, id: i64) -> Result<StoredCategory, InfraError> {
        self.repository
            .list_for_user(user_id)?
            .into_iter()
            .find(|stored| stored.id == id)
            .ok_or_else(|| InfraError::NotFound(format!("entry category {id}")))
    }
}

fn build_category(input: CategoryInput, order: i64) -> Result<Category, InfraError> {
    let name = input.name.trim().to_string();
    if name.is_empty() || name.chars().count() > MAX_CATEGORY_NAME_LENGTH {
        return Err(InfraError::Validation(format!(
            "category name must be between 1 and {MAX_CATEGORY_NAME_LENGTH} characters"
        )));
    }
    let noko_tags = input.noko_tags.map(|tags| {
        tags.into_iter()
            .map(|tag| tag.trim().to_string())
            .collect::<Vec<_>>()
    });
    let category = Category {
        name,
        order,
        readonly: input.readonly,
        project_id: input.project_id,
        noko_tags,
        enabled: input.enabled,
        active_from: input.active_from,
        active_to: input.active_to,
    };
    category.validate().map_err(InfraError::Validation)?;
    Ok(category)
}

/// Tags from the cache, or from Noko when missing or `refresh` is set. A
/// failed refresh drops the cached value and yields an empty list.
pub async fn cached_noko_tags<C, S>(
    client: &C,
    cache: &LocalCache<S>,
    refresh: bool,
) -> Result<Vec<NokoTag>, InfraError>
where
    C: NokoClient + ?Sized,
    S: KeyValueStore,
{
    if !refresh {
        if let Some(tags) = cache.load_tags()? {
            return Ok(tags);
        }
    }
    match client.list_tags().await {
        Ok(tags) => {
            cache.save_tags(&tags)?;
            Ok(tags)
        }
        Err(error) => {
            tracing::warn!(%error, "failed refreshing noko tags");
            cache.remove(NOKO_TAGS_KEY)?;
            Ok(Vec::new())
        }
    }
}

pub async fn cached_noko_projects<C, S>(
    client: &C,
    cache: &LocalCache<S>,
    refresh: bool,
) -> Result<Vec<NokoProject>, InfraError>
where
    C: NokoClient + ?Sized,
    S: KeyValueStore,
{
    if !refresh {
        if let Some(projects) = cache.load_projects()? {
            return Ok(projects);
        }
    }
    match client.list_enabled_projects().await {
        Ok(projects) => {
            cache.save_projects(&projects)?;
            Ok(projects)
        }
        Err(error) => {
            tracing::warn!(%error, "failed refreshing noko projects");
            cache.remove(NOKO_PROJECTS_KEY)?;
            Ok(Vec::new())
        }
    }
}
