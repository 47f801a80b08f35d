use chrono::{Local, Utc};
use clap::{Args, Subcommand, ValueEnum};

use super::{parse_date, Coordinator, OutputFormat};
use nutrisync::models::{Meal, MealFilter, MealId};
use nutrisync::sync::{Liveness, PageSource, PaginationCursor};

#[derive(Args)]
pub struct MealCommand {
    #[command(subcommand)]
    pub command: MealSubcommand,
}

/// Fields a user can set on a meal.
#[derive(Args)]
pub struct MealFields {
    /// Date (YYYY-MM-DD, 'YYYY-MM-DD HH:MM' or RFC 3339)
    #[arg(long, short)]
    date: Option<String>,

    /// What was eaten
    #[arg(long)]
    foods: Option<String>,

    /// Whether the meal was eaten
    #[arg(long)]
    eaten: Option<bool>,

    #[arg(long)]
    price: Option<f64>,

    #[arg(long, requires = "longitude", allow_hyphen_values = true)]
    latitude: Option<f64>,

    #[arg(long, requires = "latitude", allow_hyphen_values = true)]
    longitude: Option<f64>,
}

impl MealFields {
    fn apply(&self, meal: &mut Meal) -> Result<(), String> {
        if let Some(date) = &self.date {
            meal.date = parse_date(date)?;
        }
        if let Some(foods) = &self.foods {
            meal.foods = foods.clone();
        }
        if let Some(eaten) = self.eaten {
            meal.eaten = eaten;
        }
        if let Some(price) = self.price {
            meal.price = price;
        }
        if let (Some(latitude), Some(longitude)) = (self.latitude, self.longitude) {
            meal.latitude = Some(latitude);
            meal.longitude = Some(longitude);
        }
        Ok(())
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Keep {
    /// Overwrite the server with the local edit
    Local,
    /// Discard the local edit
    Server,
}

#[derive(Subcommand)]
pub enum MealSubcommand {
    /// List meals, most recent first
    List {
        /// Page to show (0-based)
        #[arg(long, short, default_value = "0")]
        page: u32,

        /// Walk every page from the first
        #[arg(long, conflicts_with = "page")]
        all: bool,

        /// Only meals whose comment starts with this prefix
        #[arg(long)]
        comment: Option<String>,

        /// Only eaten (true) or uneaten (false) meals
        #[arg(long)]
        eaten: Option<bool>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show a single meal
    Show {
        id: MealId,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Record a new meal
    Add {
        /// Short description
        comment: String,

        #[command(flatten)]
        fields: MealFields,
    },

    /// Change an existing meal
    Edit {
        id: MealId,

        /// New description
        #[arg(long)]
        comment: Option<String>,

        #[command(flatten)]
        fields: MealFields,
    },

    /// Delete a meal
    Delete { id: MealId },

    /// List meals whose last update was rejected by the server
    Conflicts,

    /// Settle a conflicted meal
    Resolve {
        id: MealId,

        /// Which version to keep
        #[arg(long, value_enum)]
        keep: Keep,
    },
}

impl MealCommand {
    pub async fn run(&self, coordinator: &Coordinator) -> Result<(), Box<dyn std::error::Error>> {
        let liveness = Liveness::new();

        match &self.command {
            MealSubcommand::List {
                page,
                all,
                comment,
                eaten,
                format,
            } => {
                let mut filter = MealFilter::new();
                if let Some(prefix) = comment {
                    filter = filter.with_comment(prefix.clone());
                }
                if let Some(eaten) = eaten {
                    filter = filter.with_eaten(*eaten);
                }

                if *all {
                    list_all(coordinator, filter, format, &liveness).await
                } else {
                    let listed = coordinator.list(*page, filter, &liveness).await?;
                    print_meals(&listed.items, format)?;
                    if matches!(format, OutputFormat::Text) {
                        if listed.source == PageSource::Offline {
                            println!("(offline: showing cached meals)");
                        }
                        if !listed.is_last {
                            println!("More meals on page {}", page + 1);
                        }
                    }
                    Ok(())
                }
            }
            MealSubcommand::Show { id, format } => {
                let meal = coordinator.read(*id, &liveness).await?;
                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&meal)?),
                    OutputFormat::Text => print!("{}", meal),
                }
                Ok(())
            }
            MealSubcommand::Add { comment, fields } => {
                let mut meal = Meal::new(comment.clone(), Utc::now());
                fields.apply(&mut meal)?;

                let created = coordinator.create(&meal, &liveness).await?;
                if created.is_temporary() {
                    println!("Server unreachable; meal queued for sync:");
                } else {
                    println!("Created meal:");
                }
                println!();
                print!("{}", created);
                Ok(())
            }
            MealSubcommand::Edit {
                id,
                comment,
                fields,
            } => {
                let mut meal = coordinator.read(*id, &liveness).await?;
                if let Some(comment) = comment {
                    meal.comment = comment.clone();
                }
                fields.apply(&mut meal)?;

                let stored = coordinator.update(&meal, &liveness).await?;
                if stored.has_conflict {
                    println!("Meal {} was changed elsewhere. Your edit is kept locally;", id);
                    println!("run `nutrisync meal resolve {} --keep local|server`.", id);
                } else if stored.entity_state.is_pending() {
                    println!("Server unreachable; edit queued for sync:");
                    println!();
                    print!("{}", stored);
                } else {
                    println!("Updated meal:");
                    println!();
                    print!("{}", stored);
                }
                Ok(())
            }
            MealSubcommand::Delete { id } => {
                coordinator.remove(*id, &liveness).await?;
                match coordinator.get(*id).await? {
                    Some(_) => println!("Server unreachable; delete of meal {} queued", id),
                    None => println!("Deleted meal {}", id),
                }
                Ok(())
            }
            MealSubcommand::Conflicts => show_conflicts(coordinator).await,
            MealSubcommand::Resolve { id, keep } => {
                let local = coordinator
                    .get(*id)
                    .await?
                    .ok_or_else(|| format!("Meal not found in local cache: {}", id))?;
                let server = coordinator
                    .conflict(*id)
                    .await?
                    .ok_or_else(|| format!("Meal {} has no conflict", id))?;

                let merged = match keep {
                    Keep::Local => local,
                    Keep::Server => Meal {
                        id: Some(*id),
                        ..server
                    },
                };
                let stored = coordinator.resolve_conflict(&merged, &liveness).await?;
                if stored.has_conflict {
                    println!("Meal {} changed again on the server; resolve once more.", id);
                } else {
                    println!("Resolved meal:");
                    println!();
                    print!("{}", stored);
                }
                Ok(())
            }
        }
    }
}

async fn list_all(
    coordinator: &Coordinator,
    filter: MealFilter,
    format: &OutputFormat,
    liveness: &Liveness,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut cursor = PaginationCursor::new(coordinator.clone(), filter);
    let mut meals = Vec::new();
    loop {
        let listed = cursor.fetch_next(liveness).await?;
        meals.extend(listed.items);
        if cursor.reached_end() {
            break;
        }
    }
    print_meals(&meals, format)
}

async fn show_conflicts(coordinator: &Coordinator) -> Result<(), Box<dyn std::error::Error>> {
    let conflicted: Vec<Meal> = coordinator
        .cache()
        .meals()
        .await?
        .into_iter()
        .filter(|meal| meal.has_conflict)
        .collect();

    if conflicted.is_empty() {
        println!("No conflicts.");
        return Ok(());
    }

    for local in &conflicted {
        let Some(id) = local.id else { continue };
        println!("Local version:");
        print!("{}", local);
        match coordinator.conflict(id).await? {
            Some(server) => {
                println!("Server version:");
                print!("{}", server);
            }
            None => println!("Server version: (missing)"),
        }
        println!();
    }
    println!("Total: {} conflict(s)", conflicted.len());
    Ok(())
}

fn print_meals(meals: &[Meal], format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(meals)?);
        }
        OutputFormat::Text => {
            if meals.is_empty() {
                println!("No meals found.");
                return Ok(());
            }

            println!("{:<8} {:<16} {:<6} {:>8}  COMMENT", "ID", "DATE", "EATEN", "PRICE");
            println!("{}", "-".repeat(60));
            for meal in meals {
                let id = meal
                    .id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let marker = if meal.has_conflict {
                    " [conflict]"
                } else if meal.entity_state.is_pending() {
                    " [pending]"
                } else {
                    ""
                };
                println!(
                    "{:<8} {:<16} {:<6} {:>8.2}  {}{}",
                    id,
                    meal.date.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                    if meal.eaten { "yes" } else { "no" },
                    meal.price,
                    meal.comment,
                    marker
                );
            }
        }
    }
    Ok(())
}
