use clap::{Args, Subcommand};
use std::path::PathBuf;

use nutrisync::config::Config;
use nutrisync::models::MealId;
use nutrisync::photo::{FsPhotoStore, PhotoStore};

#[derive(Args)]
pub struct PhotoCommand {
    #[command(subcommand)]
    pub command: PhotoSubcommand,
}

#[derive(Subcommand)]
pub enum PhotoSubcommand {
    /// Attach a JPEG photo to a meal
    Attach {
        meal_id: MealId,

        /// Image file to copy
        file: PathBuf,
    },

    /// Remove a meal's photo
    Detach { meal_id: MealId },
}

impl PhotoCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let user_id = config
            .auth
            .user_id
            .ok_or("auth.user_id must be configured to manage photos")?;
        let store = FsPhotoStore::new(config.photo_dir.value.clone());

        match &self.command {
            PhotoSubcommand::Attach { meal_id, file } => {
                let bytes = tokio::fs::read(file)
                    .await
                    .map_err(|e| format!("Failed to read '{}': {}", file.display(), e))?;
                let path = store.attach(user_id, *meal_id, &bytes).await?;
                println!("Attached photo to meal {}: {}", meal_id, path.display());
            }
            PhotoSubcommand::Detach { meal_id } => {
                if store.detach(user_id, *meal_id).await? {
                    println!("Removed photo of meal {}", meal_id);
                } else {
                    println!("Meal {} has no photo", meal_id);
                }
            }
        }
        Ok(())
    }
}
