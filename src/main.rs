//! Save Sync Tool
//!
//! CLI front end for one-off backups, index updates and the scheduler

// savesync/src/main.rs
use anyhow::{Context, Result};
use savesync::config::{AppConfig, DEFAULT_CONFIG_FILE};
use savesync::remote::{open_store, test_connection};
use savesync::status::LogStatusSink;
use savesync::{backup, sync, update, utils};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Environment variable pointing at an alternative config file.
const ENV_CONFIG_PATH: &str = "SAVESYNC_CONFIG";

/// Main entry point for the sync tool
#[tokio::main]
async fn main() -> ExitCode {
    match run_app().await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    dotenv::dotenv().ok();

    let config_path = env::var(ENV_CONFIG_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
    let app_config = AppConfig::load_from_json(&config_path).context(format!(
        "Failed to load application configuration from {}",
        config_path.display()
    ))?;
    utils::logger::init(&app_config.log.level).context("Failed to initialise logging")?;

    let args: Vec<String> = env::args().collect();
    let choice = if args.len() > 1 {
        args[1].trim().to_string()
    } else {
        prompt_choice()?
    };

    match choice.as_str() {
        "1" | "backup" => {
            println!("🚀 Starting Backup Process...");
            let mut store = open_store(&app_config.remote);
            let report = backup::run_backup_flow(&app_config, store.as_mut())
                .await
                .context("Backup process failed")?;
            println!(
                "Archived {} file(s) to {} ({} skipped)",
                report.archived.len(),
                report.archive_path.display(),
                report.warning_count()
            );
        }
        "2" | "update" => {
            println!("🔄 Starting Index Update...");
            let mut store = open_store(&app_config.remote);
            let change = update::run_update_flow(&app_config, store.as_mut())
                .await
                .context("Index update failed")?;
            println!("latest: {} -> {}", change.previous, change.current);
        }
        "3" | "schedule" => {
            println!("⏱️ Starting Scheduler (Ctrl+C to stop)...");
            let mut scheduler = sync::build_scheduler(Arc::new(app_config), Arc::new(LogStatusSink));
            scheduler.start();
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl+C")?;
            println!("Stopping scheduler, waiting for the current run to finish...");
            scheduler.stop().await;
        }
        "4" | "test" => {
            println!("🔌 Testing Remote Connection...");
            let mut store = open_store(&app_config.remote);
            test_connection(store.as_mut())
                .await
                .context("Connection test failed")?;
            println!("Connected to {}", store.location());
        }
        _ => {
            println!("❌ Invalid choice. Please enter '1' (backup), '2' (update), '3' (schedule) or '4' (test).");
            anyhow::bail!("Invalid operation choice");
        }
    }
    Ok(())
}

/// Prompts user to select an operation
///
/// Returns the user's choice as String
fn prompt_choice() -> Result<String> {
    use std::io::{Write, stdin, stdout};

    println!("Select an operation:");
    println!("1. Take Backup (or type 'backup')");
    println!("2. Update Index (or type 'update')");
    println!("3. Run Scheduler (or type 'schedule')");
    println!("4. Test Connection (or type 'test')");
    print!("Enter your choice: ");
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
