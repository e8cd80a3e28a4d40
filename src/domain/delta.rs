use crate::domain::grid::sum_minutes;
use crate::domain::models::{
    CreateEntryRequest, EntryUpdate, NokoCallsDelta, RemoteEntry, TimeTableEntry,
    UpdateEntryRequest,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How a changed cell is written back when it already has remote entries.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePolicy {
    /// Delete every matched entry, then create one entry with the new total.
    #[default]
    ReplaceAll,
    /// Update the first matched entry in place and delete the rest.
    UpdateFirst,
}

impl ReconcilePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ReconcilePolicy::ReplaceAll => "replace_all",
            ReconcilePolicy::UpdateFirst => "update_first",
        }
    }
}

pub fn compute_delta(edited: &[TimeTableEntry], original: &[RemoteEntry]) -> NokoCallsDelta {
    compute_delta_with_policy(edited, original, ReconcilePolicy::ReplaceAll)
}

pub fn compute_delta_with_policy(
    edited: &[TimeTableEntry],
    original: &[RemoteEntry],
    policy: ReconcilePolicy,
) -> NokoCallsDelta {
    let mut delta = NokoCallsDelta::default();
    let mut seen_ids = HashSet::new();

    for entry in edited {
        if entry.category.readonly {
            tracing::debug!(category = %entry.category.name, "ignoring changes to readonly category");
            continue;
        }
        let Some((project_id, _)) = entry.category.remote_identity() else {
            tracing::debug!(
                category = %entry.category.name,
                "ignoring changes to category without project id and tags"
            );
            continue;
        };

        let iso_date = entry.iso_date();
        let matched = original
            .iter()
            .filter(|remote| remote.is_for_on(&entry.category, &iso_date))
            .collect::<Vec<_>>();
        let original_minutes = sum_minutes(matched.iter().map(|remote| remote.minutes));
        if original_minutes == entry.input_minutes {
            tracing::debug!(
                category = %entry.category.name,
                date = %iso_date,
                "no change in minutes"
            );
            continue;
        }

        let description = entry.category.description().unwrap_or_default();
        let mut to_delete = matched.iter().map(|remote| remote.id).collect::<Vec<_>>();
        match policy {
            ReconcilePolicy::UpdateFirst if entry.input_minutes > 0 && !to_delete.is_empty() => {
                let first_id = to_delete.remove(0);
                delta.updates.push(EntryUpdate {
                    id: first_id,
                    body: UpdateEntryRequest {
                        date: None,
                        minutes: entry.input_minutes,
                        description: None,
                        project_id: None,
                    },
                });
            }
            _ if entry.input_minutes > 0 => {
                delta.creates.push(CreateEntryRequest {
                    date: iso_date,
                    minutes: entry.input_minutes,
                    description,
                    project_id,
                });
            }
            _ => {}
        }

        for id in to_delete {
            if seen_ids.insert(id) {
                delta.ids_to_delete.push(id);
            }
        }
    }

    delta
}
