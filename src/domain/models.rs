use crate::domain::time_notation::to_short_iso_date;
use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const UNMAPPED_CATEGORY_NAME: &str = "Unmapped";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LoggableDay {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl LoggableDay {
    pub const ALL: [LoggableDay; 7] = [
        LoggableDay::Monday,
        LoggableDay::Tuesday,
        LoggableDay::Wednesday,
        LoggableDay::Thursday,
        LoggableDay::Friday,
        LoggableDay::Saturday,
        LoggableDay::Sunday,
    ];

    pub fn from_weekday(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => LoggableDay::Monday,
            Weekday::Tue => LoggableDay::Tuesday,
            Weekday::Wed => LoggableDay::Wednesday,
            Weekday::Thu => LoggableDay::Thursday,
            Weekday::Fri => LoggableDay::Friday,
            Weekday::Sat => LoggableDay::Saturday,
            Weekday::Sun => LoggableDay::Sunday,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoggableDay::Monday => "monday",
            LoggableDay::Tuesday => "tuesday",
            LoggableDay::Wednesday => "wednesday",
            LoggableDay::Thursday => "thursday",
            LoggableDay::Friday => "friday",
            LoggableDay::Saturday => "saturday",
            LoggableDay::Sunday => "sunday",
        }
    }

    pub fn short_label(self) -> &'static str {
        match self {
            LoggableDay::Monday => "Mon",
            LoggableDay::Tuesday => "Tue",
            LoggableDay::Wednesday => "Wed",
            LoggableDay::Thursday => "Thu",
            LoggableDay::Friday => "Fri",
            LoggableDay::Saturday => "Sat",
            LoggableDay::Sunday => "Sun",
        }
    }
}

/// A user defined bucket of work, mapped to a Noko project plus an exact tag
/// combination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub noko_tags: Option<Vec<String>>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// First day the category can be used, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_from: Option<NaiveDate>,
    /// Last day the category can be used, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_to: Option<NaiveDate>,
}

fn default_enabled() -> bool {
    true
}

impl Category {
    pub fn new(
        name: impl Into<String>,
        order: i64,
        project_id: i64,
        noko_tags: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            order,
            readonly: false,
            project_id: Some(project_id),
            noko_tags: Some(noko_tags),
            enabled: true,
            active_from: None,
            active_to: None,
        }
    }

    /// Pseudo category used to surface remote entries that match no real
    /// category.
    pub fn unmapped() -> Self {
        Self {
            name: UNMAPPED_CATEGORY_NAME.to_string(),
            order: i64::MAX,
            readonly: true,
            project_id: None,
            noko_tags: None,
            enabled: true,
            active_from: None,
            active_to: None,
        }
    }

    /// Project id and tags, when both are present.
    pub fn remote_identity(&self) -> Option<(i64, &[String])> {
        match (self.project_id, self.noko_tags.as_deref()) {
            (Some(project_id), Some(tags)) => Some((project_id, tags)),
            _ => None,
        }
    }

    pub fn is_syncable(&self) -> bool {
        !self.readonly && self.remote_identity().is_some()
    }

    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.enabled
            && self.active_from.is_none_or(|from| from <= date)
            && self.active_to.is_none_or(|to| date <= to)
    }

    /// Enabled and active on at least one day of the week.
    pub fn is_active_during(&self, range: &WeekRange) -> bool {
        range.dates.iter().any(|date| self.is_active_on(*date))
    }

    pub fn description(&self) -> Option<String> {
        self.noko_tags.as_ref().map(|tags| tags.join(" "))
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.name, "category.name")?;
        if let Some(tags) = &self.noko_tags {
            if tags.is_empty() {
                return Err("category.noko_tags must not be empty".to_string());
            }
            for tag in tags {
                validate_non_empty(tag, "category.noko_tags[]")?;
            }
        }
        if let (Some(from), Some(to)) = (self.active_from, self.active_to) {
            if from > to {
                return Err(format!(
                    "category.active_from ({from}) must not be after category.active_to ({to})"
                ));
            }
        }
        Ok(())
    }
}

/// Non-readonly categories first, then ascending `order`.
pub fn compare_categories(left: &Category, right: &Category) -> Ordering {
    left.readonly
        .cmp(&right.readonly)
        .then_with(|| left.order.cmp(&right.order))
}

/// Returns a sorted copy; ties keep declaration order.
pub fn sorted_categories(categories: &[Category]) -> Vec<Category> {
    let mut sorted = categories.to_vec();
    sorted.sort_by(compare_categories);
    sorted
}

/// Drops categories that are disabled or inactive for every day of `range`.
pub fn categories_active_during(categories: &[Category], range: &WeekRange) -> Vec<Category> {
    categories
        .iter()
        .filter(|category| category.is_active_during(range))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteProject {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteTag {
    pub id: i64,
    pub formatted_name: String,
}

/// Snapshot of one logged time record in Noko.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteEntry {
    pub id: i64,
    pub date: String,
    pub minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<RemoteProject>,
    #[serde(default)]
    pub tags: Vec<RemoteTag>,
}

impl RemoteEntry {
    /// Same project and exactly the same multiset of formatted tag names.
    /// Entries without a project never match.
    pub fn is_for(&self, category: &Category) -> bool {
        let Some((project_id, category_tags)) = category.remote_identity() else {
            return false;
        };
        let Some(project) = &self.project else {
            return false;
        };
        project.id == project_id && self.has_exact_tags(category_tags)
    }

    pub fn is_for_on(&self, category: &Category, iso_date: &str) -> bool {
        self.date == iso_date && self.is_for(category)
    }

    fn has_exact_tags(&self, expected: &[String]) -> bool {
        if self.tags.len() != expected.len() {
            return false;
        }
        let mut actual = self
            .tags
            .iter()
            .map(|tag| tag.formatted_name.as_str())
            .collect::<Vec<_>>();
        let mut expected = expected.iter().map(String::as_str).collect::<Vec<_>>();
        actual.sort_unstable();
        expected.sort_unstable();
        actual == expected
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_date(&self.date, "entry.date")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WeekRange {
    pub dates: Vec<NaiveDate>,
    pub week_number: u32,
    pub year: i32,
}

impl WeekRange {
    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }
}

/// One editable (category, day) cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeTableEntry {
    pub date: NaiveDate,
    pub day_name: LoggableDay,
    pub category: Category,
    pub initial_minutes: u32,
    pub input_minutes: u32,
}

impl TimeTableEntry {
    pub fn iso_date(&self) -> String {
        to_short_iso_date(self.date)
    }

    pub fn is_modified(&self) -> bool {
        self.initial_minutes != self.input_minutes
    }
}

/// Body of `POST /entries`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateEntryRequest {
    pub date: String,
    pub minutes: u32,
    pub description: String,
    pub project_id: i64,
}

/// Body of `PUT /entries/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateEntryRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    pub minutes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryUpdate {
    pub id: i64,
    pub body: UpdateEntryRequest,
}

/// Remote calls needed to make Noko match an edited grid.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NokoCallsDelta {
    pub creates: Vec<CreateEntryRequest>,
    pub updates: Vec<EntryUpdate>,
    pub ids_to_delete: Vec<i64>,
}

impl NokoCallsDelta {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.ids_to_delete.is_empty()
    }

    pub fn operation_count(&self) -> usize {
        self.creates.len() + self.updates.len() + self.ids_to_delete.len()
    }
}

/// The authenticated Noko identity behind an API token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NokoUser {
    pub id: i64,
    pub email: String,
    pub name: String,
}

/// What the credential store keeps for a connected Noko account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NokoAccount {
    pub api_token: String,
    pub user: NokoUser,
}

impl NokoAccount {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.api_token, "account.api_token")?;
        validate_non_empty(&self.user.email, "account.user.email")
    }
}

/// A user registered in local category storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub external_id: String,
    pub email_address: String,
    pub name: String,
    pub identity_origin: String,
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_date(value: &str, field_name: &str) -> Result<(), String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("{field_name} must be YYYY-MM-DD"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entry(id: i64, project_id: i64, tags: &[&str]) -> RemoteEntry {
        RemoteEntry {
            id,
            date: "2024-01-22".to_string(),
            minutes: 60,
            description: None,
            project: Some(RemoteProject { id: project_id }),
            tags: tags
                .iter()
                .enumerate()
                .map(|(index, name)| RemoteTag {
                    id: 4000 + index as i64,
                    formatted_name: name.to_string(),
                })
                .collect(),
        }
    }

    fn category(tags: &[&str]) -> Category {
        Category::new(
            "Development",
            1,
            1,
            tags.iter().map(|tag| tag.to_string()).collect(),
        )
    }

    #[test]
    fn entry_matches_category_with_same_project_and_tags() {
        assert!(entry(1, 1, &["#Development"]).is_for(&category(&["#Development"])));
    }

    #[test]
    fn entry_tag_order_is_irrelevant() {
        let remote = entry(1, 1, &["#Special", "#Development"]);
        assert!(remote.is_for(&category(&["#Development", "#Special"])));
    }

    #[test]
    fn entry_with_superset_or_subset_of_tags_does_not_match() {
        let category = category(&["#Development"]);
        assert!(!entry(1, 1, &["#Development", "#Special"]).is_for(&category));
        assert!(!entry(2, 1, &[]).is_for(&category));
    }

    #[test]
    fn entry_tags_are_compared_as_multiset() {
        let remote = entry(1, 1, &["#A", "#A"]);
        assert!(!remote.is_for(&category(&["#A", "#B"])));
        assert!(remote.is_for(&category(&["#A", "#A"])));
    }

    #[test]
    fn entry_without_project_does_not_match() {
        let mut remote = entry(1, 1, &["#Development"]);
        remote.project = None;
        assert!(!remote.is_for(&category(&["#Development"])));
    }

    #[test]
    fn entry_on_other_project_does_not_match() {
        assert!(!entry(1, 2, &["#Development"]).is_for(&category(&["#Development"])));
    }

    #[test]
    fn category_without_remote_identity_matches_nothing() {
        let mut without_project = category(&["#Development"]);
        without_project.project_id = None;
        let mut without_tags = category(&["#Development"]);
        without_tags.noko_tags = None;

        let remote = entry(1, 1, &["#Development"]);
        assert!(!remote.is_for(&without_project));
        assert!(!remote.is_for(&without_tags));
        assert!(!remote.is_for(&Category::unmapped()));
    }

    #[test]
    fn unmapped_category_is_readonly_and_sorted_last() {
        let unmapped = Category::unmapped();
        assert!(unmapped.readonly);
        assert!(!unmapped.is_syncable());
        assert_eq!(
            compare_categories(&category(&["#A"]), &unmapped),
            Ordering::Less
        );
    }

    #[test]
    fn sorted_categories_puts_readonly_last_and_keeps_input_untouched() {
        let mut archived = Category::new("Archived", 0, 9, vec!["#Old".to_string()]);
        archived.readonly = true;
        let input = vec![
            archived,
            Category::new("Second", 2, 1, vec!["#B".to_string()]),
            Category::new("First", 1, 1, vec!["#A".to_string()]),
            Category::new("AlsoFirst", 1, 1, vec!["#C".to_string()]),
        ];
        let before = input.clone();

        let sorted = sorted_categories(&input);

        let names = sorted.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["First", "AlsoFirst", "Second", "Archived"]);
        assert_eq!(input, before);
    }

    #[test]
    fn category_validate_rejects_blank_tags() {
        let mut invalid = category(&["#Development"]);
        invalid.noko_tags = Some(vec!["  ".to_string()]);
        assert!(invalid.validate().is_err());

        invalid.noko_tags = Some(Vec::new());
        assert!(invalid.validate().is_err());

        assert!(category(&["#Development"]).validate().is_ok());
    }

    fn week_of_2024_01_22() -> WeekRange {
        WeekRange {
            dates: (22..=28)
                .map(|day| NaiveDate::from_ymd_opt(2024, 1, day).expect("valid date"))
                .collect(),
            week_number: 4,
            year: 2024,
        }
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).expect("valid date")
    }

    #[test]
    fn category_validate_rejects_inverted_active_range() {
        let mut windowed = category(&["#Development"]);
        windowed.active_from = Some(date(25));
        windowed.active_to = Some(date(24));
        assert!(windowed.validate().is_err());

        windowed.active_to = Some(date(25));
        assert!(windowed.validate().is_ok());
        windowed.active_from = None;
        assert!(windowed.validate().is_ok());
    }

    #[test]
    fn activity_window_is_inclusive() {
        let mut windowed = category(&["#Development"]);
        windowed.active_from = Some(date(23));
        windowed.active_to = Some(date(25));

        assert!(!windowed.is_active_on(date(22)));
        assert!(windowed.is_active_on(date(23)));
        assert!(windowed.is_active_on(date(25)));
        assert!(!windowed.is_active_on(date(26)));

        windowed.enabled = false;
        assert!(!windowed.is_active_on(date(24)));
    }

    #[test]
    fn categories_inactive_for_the_whole_week_are_dropped() {
        let week = week_of_2024_01_22();
        let always = category(&["#A"]);
        let mut disabled = category(&["#B"]);
        disabled.name = "Disabled".to_string();
        disabled.enabled = false;
        let mut ended = category(&["#C"]);
        ended.name = "Ended".to_string();
        ended.active_to = Some(date(21));
        let mut starts_sunday = category(&["#D"]);
        starts_sunday.name = "Starts sunday".to_string();
        starts_sunday.active_from = Some(date(28));
        let mut not_started = category(&["#E"]);
        not_started.name = "Not started".to_string();
        not_started.active_from = Some(date(29));

        let active = categories_active_during(
            &[always, disabled, ended, starts_sunday, not_started],
            &week,
        );

        let names = active.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Development", "Starts sunday"]);
    }

    #[test]
    fn category_deserializes_with_defaults() {
        let parsed: Category =
            serde_json::from_str(r##"{"name":"Development","projectId":1,"nokoTags":["#Development"]}"##)
                .expect("deserialize category");
        assert_eq!(parsed.order, 0);
        assert!(!parsed.readonly);
        assert!(parsed.enabled);
        assert_eq!(parsed.active_from, None);
        assert_eq!(parsed.description().as_deref(), Some("#Development"));
    }

    #[test]
    fn create_request_serializes_with_noko_field_names() {
        let request = CreateEntryRequest {
            date: "2024-01-22".to_string(),
            minutes: 240,
            description: "#Development".to_string(),
            project_id: 1,
        };
        let value = serde_json::to_value(&request).expect("serialize request");
        assert_eq!(value["project_id"], 1);
        assert_eq!(value["minutes"], 240);
    }

    proptest! {
        #[test]
        fn tag_permutations_always_match(mut tags in proptest::collection::vec("#[A-Za-z]{1,8}", 1..5)) {
            let category = Category::new(
                "Any",
                0,
                7,
                tags.clone(),
            );
            tags.reverse();
            let remote = RemoteEntry {
                id: 1,
                date: "2024-01-22".to_string(),
                minutes: 15,
                description: None,
                project: Some(RemoteProject { id: 7 }),
                tags: tags
                    .iter()
                    .map(|name| RemoteTag { id: 1, formatted_name: name.clone() })
                    .collect(),
            };
            prop_assert!(remote.is_for(&category));
        }
    }
}
