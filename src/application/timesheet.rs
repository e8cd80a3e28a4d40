use crate::domain::delta::{compute_delta_with_policy, ReconcilePolicy};
use crate::domain::grid::{build_grid, TimeTableGrid};
use crate::domain::models::{
    categories_active_during, Category, NokoCallsDelta, RemoteEntry, TimeTableEntry, WeekRange,
};
use crate::domain::week::week_range_for;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::noko_client::NokoClient;
use chrono::NaiveDate;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration as TokioDuration};

pub const APPLY_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

/// One week of the timesheet as it was loaded from Noko.
#[derive(Debug, Clone, Serialize)]
pub struct WeekSheet {
    pub range: WeekRange,
    pub grid: TimeTableGrid,
    pub remote_entries: Vec<RemoteEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub created: Vec<RemoteEntry>,
    pub updated: Vec<i64>,
    pub deleted: Vec<i64>,
}

pub struct TimesheetService<C: NokoClient> {
    client: Arc<C>,
    retry_policy: RetryPolicy,
    policy: ReconcilePolicy,
    concurrency: usize,
}

impl<C> TimesheetService<C>
where
    C: NokoClient + 'static,
{
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            retry_policy: RetryPolicy::default(),
            policy: ReconcilePolicy::default(),
            concurrency: APPLY_CONCURRENCY,
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    pub async fn load_week(
        &self,
        date: NaiveDate,
        categories: &[Category],
    ) -> Result<WeekSheet, InfraError> {
        let range = week_range_for(date);
        let (Some(from), Some(to)) = (range.first_date(), range.last_date()) else {
            return Err(InfraError::Validation(format!(
                "no week range could be built around {date}"
            )));
        };

        let remote_entries = self.list_entries_with_retry(from, to).await?;
        let categories = categories_active_during(categories, &range);
        let grid = build_grid(&range, &categories, &remote_entries)?;
        tracing::debug!(
            week = range.week_number,
            year = range.year,
            remote_entries = remote_entries.len(),
            "loaded timesheet week"
        );

        Ok(WeekSheet {
            range,
            grid,
            remote_entries,
        })
    }

    pub fn plan(&self, sheet: &WeekSheet, edited: &[TimeTableEntry]) -> NokoCallsDelta {
        compute_delta_with_policy(edited, &sheet.remote_entries, self.policy)
    }

    /// Runs deletes, then updates, then creates. Calls inside one phase run
    /// concurrently up to the configured bound; the client serialises them
    /// again through its rate limiter.
    pub async fn apply(&self, delta: &NokoCallsDelta) -> Result<ApplyReport, InfraError> {
        if delta.is_empty() {
            return Ok(ApplyReport::default());
        }

        let client = Arc::clone(&self.client);
        let deleted = run_bounded(self.concurrency, delta.ids_to_delete.clone(), move |id| {
            let client = Arc::clone(&client);
            async move {
                client.delete_entry(id).await?;
                tracing::info!(entry_id = id, "deleted noko entry");
                Ok(id)
            }
        })
        .await?;

        let client = Arc::clone(&self.client);
        let updated = run_bounded(self.concurrency, delta.updates.clone(), move |update| {
            let client = Arc::clone(&client);
            async move {
                client.update_entry(update.id, &update.body).await?;
                tracing::info!(entry_id = update.id, minutes = update.body.minutes, "updated noko entry");
                Ok(update.id)
            }
        })
        .await?;

        let client = Arc::clone(&self.client);
        let created = run_bounded(self.concurrency, delta.creates.clone(), move |body| {
            let client = Arc::clone(&client);
            async move {
                let entry = client.create_entry(&body).await?;
                tracing::info!(entry_id = entry.id, date = %entry.date, minutes = entry.minutes, "created noko entry");
                Ok(entry)
            }
        })
        .await?;

        Ok(ApplyReport {
            created,
            updated,
            deleted,
        })
    }

    async fn list_entries_with_retry(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RemoteEntry>, InfraError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match self.client.list_entries(from, to).await {
                Ok(entries) => return Ok(entries),
                Err(error) if should_retry(&error) && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    tracing::warn!(%error, attempt = attempt + 1, delay_ms = delay, "retrying noko entry listing");
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn should_retry(error: &InfraError) -> bool {
    error.is_transient()
}

/// Results come back in input order.
async fn run_bounded<I, T, F, Fut>(limit: usize, items: Vec<I>, task: F) -> Result<Vec<T>, InfraError>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, InfraError>> + Send + 'static,
{
    let mut tasks: JoinSet<Result<(usize, T), InfraError>> = JoinSet::new();
    let mut results = Vec::with_capacity(items.len());
    results.resize_with(items.len(), || None);

    for (index, item) in items.into_iter().enumerate() {
        let future = task(item);
        tasks.spawn(async move { future.await.map(|value| (index, value)) });

        if tasks.len() >= limit.max(1) {
            collect_finished(&mut tasks, &mut results).await?;
        }
    }

    while !tasks.is_empty() {
        collect_finished(&mut tasks, &mut results).await?;
    }

    Ok(results.into_iter().flatten().collect())
}

async fn collect_finished<T: Send + 'static>(
    tasks: &mut JoinSet<Result<(usize, T), InfraError>>,
    results: &mut [Option<T>],
) -> Result<(), InfraError> {
    let Some(join_result) = tasks.join_next().await else {
        return Ok(());
    };
    let (index, value) = join_result
        .map_err(|error| InfraError::Network(format!("failed to join noko request task: {error}")))??;
    if let Some(slot) = results.get_mut(index) {
        *slot = Some(value);
    }
    Ok(())
}
