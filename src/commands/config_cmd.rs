use clap::{Args, Subcommand};
use std::fmt::Display;

use super::OutputFormat;
use nutrisync::config::{Config, ConfigValue};

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

fn print_value<T: Display>(name: &str, value: &ConfigValue<T>) {
    println!("{}: {}", name, value.value);
    println!("  source: {}", value.source);
    println!();
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!("database_path: {}", config.database_path.value.display());
                        println!("  source: {}", config.database_path.source);
                        println!();

                        print_value("server_url", &config.server_url);
                        print_value("page_size", &config.page_size);
                        print_value("request_timeout_secs", &config.request_timeout_secs);
                        print_value("reconnect_delay_secs", &config.reconnect_delay_secs);
                        print_value("health_interval_secs", &config.health_interval_secs);

                        println!("photo_dir: {}", config.photo_dir.value.display());
                        println!("  source: {}", config.photo_dir.source);
                        println!();

                        println!(
                            "auth.token: {}",
                            if config.auth.token.is_some() { "(set)" } else { "(not set)" }
                        );
                        match config.auth.user_id {
                            Some(user_id) => println!("auth.user_id: {}", user_id),
                            None => println!("auth.user_id: (not set)"),
                        }
                    }
                }
                Ok(())
            }
        }
    }
}
