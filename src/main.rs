use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use keepi::application::categories::CategoryInput;
use keepi::application::commands::{
    add_category_impl, catalog_impl, connect_impl, disconnect_impl, list_categories_impl,
    log_time_impl, remove_category_impl, show_impl, week_impl, AppState, CatalogResponse,
    ConnectResponse, LogTimeRequest, LogTimeResponse, WeekResponse,
};
use keepi::application::timesheet::WeekSheet;
use keepi::domain::grid::{sum_minutes, DAYS_IN_GRID};
use keepi::domain::models::{Category, LoggableDay, TimeTableEntry};
use keepi::domain::time_notation::{to_colon_separated_time, to_hours_minutes_notation};
use keepi::infrastructure::category_repository::StoredCategory;
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const LOG_FILTER_ENV: &str = "KEEPI_LOG";

#[derive(Parser)]
#[command(name = "keepi", version, about = "Weekly timesheet reconciliation against Noko")]
struct Cli {
    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,
    /// Directory holding config/, state/ and logs/ (defaults to the current directory)
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the ISO week around a date
    Week {
        /// yyyy-mm-dd or dd-mm-yyyy, defaults to today
        #[arg(long)]
        date: Option<String>,
    },
    /// Verify a Noko API token and store it in the keyring
    Connect {
        #[arg(long)]
        token: String,
    },
    /// Forget the stored Noko account
    Disconnect,
    /// Entry category management
    Categories {
        #[command(subcommand)]
        action: CategoriesAction,
    },
    /// List Noko tags and enabled projects
    Catalog {
        /// Bypass the local cache
        #[arg(long)]
        refresh: bool,
    },
    /// Show the timesheet grid for a week
    Show {
        #[arg(long)]
        date: Option<String>,
    },
    /// Set the time for one category on one day and sync that week with Noko
    Log {
        #[arg(long)]
        date: String,
        #[arg(long)]
        category: String,
        /// 1h30m, 1u30m, 1:30 or whole hours; 0 clears the cell
        #[arg(long)]
        time: String,
        /// Print the planned Noko calls without sending them
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum CategoriesAction {
    /// List categories, readonly ones last
    List,
    /// Add a category mapped to a Noko project and an exact tag set
    Add {
        name: String,
        #[arg(long)]
        project: i64,
        #[arg(long = "tag", required = true)]
        tags: Vec<String>,
        #[arg(long)]
        order: Option<i64>,
        #[arg(long)]
        readonly: bool,
        /// Store the category but leave it out of every week
        #[arg(long)]
        disabled: bool,
        /// First day the category shows up (yyyy-mm-dd)
        #[arg(long)]
        active_from: Option<NaiveDate>,
        /// Last day the category shows up (yyyy-mm-dd)
        #[arg(long)]
        active_to: Option<NaiveDate>,
    },
    /// Remove a category by name
    Remove { name: String },
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(message) = run(cli).await {
        eprintln!("error: {message}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), String> {
    let json = cli.json;
    if let Commands::Week { date } = &cli.command {
        let week = week_impl(date.clone()).map_err(|error| error.to_string())?;
        return print_output(json, &week, render_week);
    }

    let workspace_root = match cli.workspace {
        Some(path) => path,
        None => std::env::current_dir().map_err(|error| error.to_string())?,
    };
    let state = AppState::new(workspace_root).map_err(|error| error.to_string())?;

    match cli.command {
        Commands::Week { .. } => Ok(()),
        Commands::Connect { token } => {
            let connected = connect_impl(&state, token)
                .await
                .map_err(|error| state.command_error("connect", &error))?;
            print_output(json, &connected, render_connect)
        }
        Commands::Disconnect => {
            disconnect_impl(&state).map_err(|error| state.command_error("disconnect", &error))?;
            print_output(json, &serde_json::json!({ "disconnected": true }), |_| {
                "Noko account removed".to_string()
            })
        }
        Commands::Categories { action } => run_categories(&state, json, action).await,
        Commands::Catalog { refresh } => {
            let catalog = catalog_impl(&state, refresh)
                .await
                .map_err(|error| state.command_error("catalog", &error))?;
            print_output(json, &catalog, render_catalog)
        }
        Commands::Show { date } => {
            let sheet = show_impl(&state, date)
                .await
                .map_err(|error| state.command_error("show", &error))?;
            print_output(json, &sheet, render_sheet)
        }
        Commands::Log {
            date,
            category,
            time,
            dry_run,
        } => {
            let request = LogTimeRequest {
                date,
                category,
                time,
                dry_run,
            };
            let logged = log_time_impl(&state, request)
                .await
                .map_err(|error| state.command_error("log", &error))?;
            print_output(json, &logged, render_log)
        }
    }
}

async fn run_categories(state: &AppState, json: bool, action: CategoriesAction) -> Result<(), String> {
    match action {
        CategoriesAction::List => {
            let categories = list_categories_impl(state)
                .await
                .map_err(|error| state.command_error("categories_list", &error))?;
            print_output(json, categories.as_slice(), render_categories)
        }
        CategoriesAction::Add {
            name,
            project,
            tags,
            order,
            readonly,
            disabled,
            active_from,
            active_to,
        } => {
            let input = CategoryInput {
                name,
                order,
                readonly,
                project_id: Some(project),
                noko_tags: Some(tags),
                enabled: !disabled,
                active_from,
                active_to,
            };
            let stored = add_category_impl(state, input)
                .await
                .map_err(|error| state.command_error("categories_add", &error))?;
            print_output(json, &stored, |stored: &StoredCategory| {
                format!("Created category {}", render_category(&stored.category))
            })
        }
        CategoriesAction::Remove { name } => {
            let removed = remove_category_impl(state, name)
                .await
                .map_err(|error| state.command_error("categories_remove", &error))?;
            print_output(json, &removed, |stored: &StoredCategory| {
                format!("Removed category {}", stored.category.name)
            })
        }
    }
}

fn print_output<T, F>(json: bool, value: &T, render: F) -> Result<(), String>
where
    T: Serialize + ?Sized,
    F: Fn(&T) -> String,
{
    if json {
        let formatted = serde_json::to_string_pretty(value).map_err(|error| error.to_string())?;
        println!("{formatted}");
    } else {
        println!("{}", render(value));
    }
    Ok(())
}

fn render_week(week: &WeekResponse) -> String {
    format!(
        "Week {} of {}: {}",
        week.week_number,
        week.year,
        week.dates.join(" ")
    )
}

fn render_connect(connected: &ConnectResponse) -> String {
    format!(
        "Connected as {} <{}> (local user {})",
        connected.noko_user.name, connected.noko_user.email, connected.user_id
    )
}

fn render_category(category: &Category) -> String {
    let project = category
        .project_id
        .map_or_else(|| "-".to_string(), |id| id.to_string());
    let tags = category.description().unwrap_or_default();
    let readonly = if category.readonly { " (readonly)" } else { "" };
    let disabled = if category.enabled { "" } else { " (disabled)" };
    let window = match (category.active_from, category.active_to) {
        (None, None) => String::new(),
        (from, to) => format!(
            " active {}..{}",
            from.map(|date| date.to_string()).unwrap_or_default(),
            to.map(|date| date.to_string()).unwrap_or_default()
        ),
    };
    format!(
        "{} [project {project}, {tags}]{readonly}{disabled}{window}",
        category.name
    )
}

fn render_categories(categories: &[Category]) -> String {
    if categories.is_empty() {
        return "No categories yet".to_string();
    }
    categories
        .iter()
        .map(|category| format!("{:>4}  {}", category.order, render_category(category)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_catalog(catalog: &CatalogResponse) -> String {
    let mut lines = vec!["Projects:".to_string()];
    lines.extend(
        catalog
            .projects
            .iter()
            .map(|project| format!("{:>8}  {}", project.id, project.name)),
    );
    lines.push("Tags:".to_string());
    lines.extend(
        catalog
            .tags
            .iter()
            .map(|tag| format!("{:>8}  {}", tag.id, tag.formatted_name)),
    );
    lines.join("\n")
}

fn render_row(label: &str, cells: &[TimeTableEntry]) -> String {
    let mut row = format!("{label:<24}");
    for cell in cells {
        row.push_str(&format!("{:>8}", to_hours_minutes_notation(cell.input_minutes)));
    }
    let total = sum_minutes(cells.iter().map(|cell| cell.input_minutes));
    row.push_str(&format!("{:>8}", to_colon_separated_time(total)));
    row
}

fn render_sheet(sheet: &WeekSheet) -> String {
    let mut lines = vec![format!(
        "Week {} of {}",
        sheet.range.week_number, sheet.range.year
    )];

    let mut header = format!("{:<24}", "");
    for day in LoggableDay::ALL {
        header.push_str(&format!("{:>8}", day.short_label()));
    }
    header.push_str(&format!("{:>8}", "Total"));
    lines.push(header);

    for cells in sheet.grid.entries.chunks(DAYS_IN_GRID) {
        if let Some(first) = cells.first() {
            lines.push(render_row(&first.category.name, cells));
        }
    }
    if let Some(first) = sheet.grid.unmapped_entries.first() {
        lines.push(render_row(&first.category.name, &sheet.grid.unmapped_entries));
    }

    lines.push(format!(
        "Total logged: {}",
        to_colon_separated_time(sheet.grid.total_input_minutes())
    ));
    lines.join("\n")
}

fn render_log(logged: &LogTimeResponse) -> String {
    let mut lines = vec![format!(
        "{} on {}: {} -> {}",
        logged.category,
        logged.date,
        to_colon_separated_time(logged.previous_minutes),
        to_colon_separated_time(logged.minutes)
    )];
    if logged.delta.is_empty() {
        lines.push("Nothing to change".to_string());
        return lines.join("\n");
    }
    match &logged.report {
        Some(report) => lines.push(format!(
            "Applied: {} created, {} updated, {} deleted",
            report.created.len(),
            report.updated.len(),
            report.deleted.len()
        )),
        None => {
            lines.push(format!("Planned {} Noko call(s):", logged.delta.operation_count()));
            lines.extend(
                logged
                    .delta
                    .ids_to_delete
                    .iter()
                    .map(|id| format!("  delete entry {id}")),
            );
            lines.extend(logged.delta.updates.iter().map(|update| {
                format!("  update entry {} to {} minutes", update.id, update.body.minutes)
            }));
            lines.extend(logged.delta.creates.iter().map(|create| {
                format!(
                    "  create {} minutes on {} in project {} ({})",
                    create.minutes, create.date, create.project_id, create.description
                )
            }));
        }
    }
    lines.join("\n")
}
