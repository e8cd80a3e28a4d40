use crate::domain::models::{Category, User};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_connection;
use chrono::NaiveDate;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub external_id: String,
    pub email_address: String,
    pub name: String,
    pub identity_origin: String,
}

/// A category as persisted, with its row id and owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredCategory {
    pub id: i64,
    pub user_id: i64,
    pub category: Category,
}

pub trait CategoryRepository: Send + Sync {
    fn user_exists(&self, external_id: &str, email_address: &str) -> Result<bool, InfraError>;
    fn find_user_by_external_id(&self, external_id: &str) -> Result<Option<User>, InfraError>;
    fn insert_user(&self, user: &NewUser) -> Result<User, InfraError>;
    /// Categories of one user in storage order (`order`, then id).
    fn list_for_user(&self, user_id: i64) -> Result<Vec<StoredCategory>, InfraError>;
    fn insert(&self, user_id: i64, category: &Category) -> Result<StoredCategory, InfraError>;
    fn update(&self, id: i64, category: &Category) -> Result<(), InfraError>;
    fn delete(&self, id: i64) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteCategoryRepository {
    db_path: PathBuf,
}

impl SqliteCategoryRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_connection(&self.db_path)
    }
}

fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
                && failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        external_id: row.get(1)?,
        email_address: row.get(2)?,
        name: row.get(3)?,
        identity_origin: row.get(4)?,
    })
}

fn encode_tags(tags: &Option<Vec<String>>) -> Result<Option<String>, InfraError> {
    tags.as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(InfraError::from)
}

fn decode_tags(raw: Option<String>, id: i64) -> Result<Option<Vec<String>>, InfraError> {
    raw.map(|value| {
        serde_json::from_str::<Vec<String>>(&value).map_err(|error| {
            InfraError::InvalidConfig(format!(
                "invalid entry_categories.noko_tags for category {id}: {error}"
            ))
        })
    })
    .transpose()
}

fn encode_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|date| date.format("%Y-%m-%d").to_string())
}

fn decode_date(raw: Option<String>, column: &str, id: i64) -> Result<Option<NaiveDate>, InfraError> {
    raw.map(|value| {
        NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|_| {
            InfraError::InvalidConfig(format!(
                "invalid entry_categories.{column} '{value}' for category {id}"
            ))
        })
    })
    .transpose()
}

impl CategoryRepository for SqliteCategoryRepository {
    fn user_exists(&self, external_id: &str, email_address: &str) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM users WHERE external_id = ?1 OR email_address = ?2",
            params![external_id, email_address],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn find_user_by_external_id(&self, external_id: &str) -> Result<Option<User>, InfraError> {
        let connection = self.connect()?;
        connection
            .query_row(
                "SELECT id, external_id, email_address, name, identity_origin
                 FROM users WHERE external_id = ?1",
                params![external_id],
                user_from_row,
            )
            .optional()
            .map_err(InfraError::from)
    }

    fn insert_user(&self, user: &NewUser) -> Result<User, InfraError> {
        let connection = self.connect()?;
        connection
            .execute(
                "INSERT INTO users (external_id, email_address, name, identity_origin)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    user.external_id,
                    user.email_address,
                    user.name,
                    user.identity_origin
                ],
            )
            .map_err(|error| {
                if is_unique_violation(&error) {
                    InfraError::DuplicateUser(user.external_id.clone())
                } else {
                    InfraError::from(error)
                }
            })?;

        Ok(User {
            id: connection.last_insert_rowid(),
            external_id: user.external_id.clone(),
            email_address: user.email_address.clone(),
            name: user.name.clone(),
            identity_origin: user.identity_origin.clone(),
        })
    }

    fn list_for_user(&self, user_id: i64) -> Result<Vec<StoredCategory>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(
            "SELECT id, user_id, name, ordinal, readonly, project_id, noko_tags,
                    enabled, active_from, active_to
             FROM entry_categories
             WHERE user_id = ?1
             ORDER BY ordinal, id",
        )?;
        let rows = statement
            .query_map(params![user_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, bool>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<String>>(9)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(id, user_id, name, order, readonly, project_id, raw_tags, enabled, from, to)| {
                    Ok(StoredCategory {
                        id,
                        user_id,
                        category: Category {
                            name,
                            order,
                            readonly,
                            project_id,
                            noko_tags: decode_tags(raw_tags, id)?,
                            enabled,
                            active_from: decode_date(from, "active_from", id)?,
                            active_to: decode_date(to, "active_to", id)?,
                        },
                    })
                },
            )
            .collect()
    }

    fn insert(&self, user_id: i64, category: &Category) -> Result<StoredCategory, InfraError> {
        let connection = self.connect()?;
        let tags = encode_tags(&category.noko_tags)?;
        connection
            .execute(
                "INSERT INTO entry_categories
                   (user_id, name, ordinal, readonly, project_id, noko_tags, enabled, active_from, active_to)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    user_id,
                    category.name,
                    category.order,
                    category.readonly,
                    category.project_id,
                    tags,
                    category.enabled,
                    encode_date(category.active_from),
                    encode_date(category.active_to)
                ],
            )
            .map_err(|error| {
                if is_unique_violation(&error) {
                    InfraError::DuplicateCategory(category.name.clone())
                } else {
                    InfraError::from(error)
                }
            })?;

        Ok(StoredCategory {
            id: connection.last_insert_rowid(),
            user_id,
            category: category.clone(),
        })
    }

    fn update(&self, id: i64, category: &Category) -> Result<(), InfraError> {
        let connection = self.connect()?;
        let tags = encode_tags(&category.noko_tags)?;
        let changed = connection
            .execute(
                "UPDATE entry_categories
                 SET name = ?2, ordinal = ?3, readonly = ?4, project_id = ?5, noko_tags = ?6,
                     enabled = ?7, active_from = ?8, active_to = ?9
                 WHERE id = ?1",
                params![
                    id,
                    category.name,
                    category.order,
                    category.readonly,
                    category.project_id,
                    tags,
                    category.enabled,
                    encode_date(category.active_from),
                    encode_date(category.active_to)
                ],
            )
            .map_err(|error| {
                if is_unique_violation(&error) {
                    InfraError::DuplicateCategory(category.name.clone())
                } else {
                    InfraError::from(error)
                }
            })?;
        if changed == 0 {
            return Err(InfraError::NotFound(format!("entry category {id}")));
        }
        Ok(())
    }

    fn delete(&self, id: i64) -> Result<(), InfraError> {
        let connection = self.connect()?;
        let changed = connection.execute("DELETE FROM entry_categories WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(InfraError::NotFound(format!("entry category {id}")));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryState {
    users: Vec<User>,
    categories: Vec<StoredCategory>,
    next_user_id: i64,
    next_category_id: i64,
}

#[derive(Debug, Default)]
pub struct InMemoryCategoryRepository {
    state: Mutex<InMemoryState>,
}

impl InMemoryCategoryRepository {
    fn lock(&self) -> Result<MutexGuard<'_, InMemoryState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("category repository lock poisoned: {error}")))
    }
}

impl CategoryRepository for InMemoryCategoryRepository {
    fn user_exists(&self, external_id: &str, email_address: &str) -> Result<bool, InfraError> {
        let state = self.lock()?;
        Ok(state
            .users
            .iter()
            .any(|user| user.external_id == external_id || user.email_address == email_address))
    }

    fn find_user_by_external_id(&self, external_id: &str) -> Result<Option<User>, InfraError> {
        let state = self.lock()?;
        Ok(state
            .users
            .iter()
            .find(|user| user.external_id == external_id)
            .cloned())
    }

    fn insert_user(&self, user: &NewUser) -> Result<User, InfraError> {
        let mut state = self.lock()?;
        if state.users.iter().any(|existing| {
            existing.external_id == user.external_id || existing.email_address == user.email_address
        }) {
            return Err(InfraError::DuplicateUser(user.external_id.clone()));
        }
        state.next_user_id += 1;
        let stored = User {
            id: state.next_user_id,
            external_id: user.external_id.clone(),
            email_address: user.email_address.clone(),
            name: user.name.clone(),
            identity_origin: user.identity_origin.clone(),
        };
        state.users.push(stored.clone());
        Ok(stored)
    }

    fn list_for_user(&self, user_id: i64) -> Result<Vec<StoredCategory>, InfraError> {
        let state = self.lock()?;
        let mut categories = state
            .categories
            .iter()
            .filter(|stored| stored.user_id == user_id)
            .cloned()
            .collect::<Vec<_>>();
        categories.sort_by_key(|stored| (stored.category.order, stored.id));
        Ok(categories)
    }

    fn insert(&self, user_id: i64, category: &Category) -> Result<StoredCategory, InfraError> {
        let mut state = self.lock()?;
        if !state.users.iter().any(|user| user.id == user_id) {
            return Err(InfraError::NotFound(format!("user {user_id}")));
        }
        if state
            .categories
            .iter()
            .any(|stored| stored.user_id == user_id && stored.category.name == category.name)
        {
            return Err(InfraError::DuplicateCategory(category.name.clone()));
        }
        state.next_category_id += 1;
        let stored = StoredCategory {
            id: state.next_category_id,
            user_id,
            category: category.clone(),
        };
        state.categories.push(stored.clone());
        Ok(stored)
    }

    fn update(&self, id: i64, category: &Category) -> Result<(), InfraError> {
        let mut state = self.lock()?;
        let Some(user_id) = state
            .categories
            .iter()
            .find(|stored| stored.id == id)
            .map(|stored| stored.user_id)
        else {
            return Err(InfraError::NotFound(format!("entry category {id}")));
        };
        if state.categories.iter().any(|stored| {
            stored.id != id && stored.user_id == user_id && stored.category.name == category.name
        }) {
            return Err(InfraError::DuplicateCategory(category.name.clone()));
        }
        if let Some(stored) = state.categories.iter_mut().find(|stored| stored.id == id) {
            stored.category = category.clone();
        }
        Ok(())
    }

    fn delete(&self, id: i64) -> Result<(), InfraError> {
        let mut state = self.lock()?;
        let before = state.categories.len();
        state.categories.retain(|stored| stored.id != id);
        if state.categories.len() == before {
            return Err(InfraError::NotFound(format!("entry category {id}")));
        }
        Ok(())
    }
}
