use crate::domain::models::{NokoUser, RemoteEntry, RemoteProject, RemoteTag};
use crate::infrastructure::error::InfraError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NokoIdRef {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NokoEntryTag {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Entry payload shared by `GET /current_user/entries` and `POST /entries`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NokoEntryResponse {
    pub id: i64,
    pub date: String,
    pub minutes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<NokoIdRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<NokoIdRef>,
    #[serde(default)]
    pub tags: Vec<NokoEntryTag>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NokoUserResponse {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NokoTag {
    pub id: i64,
    pub name: String,
    pub formatted_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NokoProject {
    pub id: i64,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Entries without a project are kept; they simply never match a category.
pub fn decode_entry(entry: &NokoEntryResponse) -> Result<RemoteEntry, InfraError> {
    NaiveDate::parse_from_str(&entry.date, "%Y-%m-%d").map_err(|_| {
        InfraError::Validation(format!(
            "invalid date '{}' on noko entry {}",
            entry.date, entry.id
        ))
    })?;
    let minutes = u32::try_from(entry.minutes).map_err(|_| {
        InfraError::Validation(format!(
            "invalid minutes {} on noko entry {}",
            entry.minutes, entry.id
        ))
    })?;

    let tags = entry
        .tags
        .iter()
        .map(|tag| decode_tag(tag, entry.id))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RemoteEntry {
        id: entry.id,
        date: entry.date.clone(),
        minutes,
        description: entry.description.clone(),
        project: entry
            .project
            .as_ref()
            .map(|project| RemoteProject { id: project.id }),
        tags,
    })
}

// A nameless tag still counts towards the tag multiset, so it cannot be skipped.
fn decode_tag(tag: &NokoEntryTag, entry_id: i64) -> Result<RemoteTag, InfraError> {
    let formatted_name = tag
        .formatted_name
        .clone()
        .or_else(|| tag.name.as_ref().map(|name| format!("#{name}")))
        .ok_or_else(|| {
            InfraError::Validation(format!(
                "tag {} on noko entry {entry_id} has no name",
                tag.id
            ))
        })?;
    Ok(RemoteTag {
        id: tag.id,
        formatted_name,
    })
}

pub fn decode_entries(entries: &[NokoEntryResponse]) -> Result<Vec<RemoteEntry>, InfraError> {
    let decoded = entries.iter().map(decode_entry).collect::<Result<Vec<_>, _>>()?;
    let without_project = decoded.iter().filter(|entry| entry.project.is_none()).count();
    if without_project > 0 {
        tracing::debug!(count = without_project, "noko entries without project");
    }
    Ok(decoded)
}

pub fn decode_user(user: &NokoUserResponse) -> NokoUser {
    let name = format!("{} {}", user.first_name.trim(), user.last_name.trim())
        .trim()
        .to_string();
    NokoUser {
        id: user.id,
        email: user.email.trim().to_string(),
        name: if name.is_empty() {
            user.email.trim().to_string()
        } else {
            name
        },
    }
}
