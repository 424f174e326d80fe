// Module declarations
mod cli;
mod types;
mod util;
mod error;
mod config;
mod config_file;
mod logging;
mod store;
mod catmaid;
mod neurons;
mod router;
mod workers;
mod schedule;
mod slack;
mod render;
mod zotero;
mod context;
mod handlers;
mod dispatch;
mod bot;
#[cfg(test)]
mod testing;

// Crate-visible items are re-exported at the root so modules can share them
// through `use crate::...`.
#[allow(unused_imports)]
pub(crate) use cli::*;
#[allow(unused_imports)]
pub(crate) use types::*;
#[allow(unused_imports)]
pub(crate) use util::*;
#[allow(unused_imports)]
pub(crate) use error::*;
#[allow(unused_imports)]
pub(crate) use config::*;
#[allow(unused_imports)]
pub(crate) use config_file::*;
#[allow(unused_imports)]
pub(crate) use logging::*;
#[allow(unused_imports)]
pub(crate) use store::*;
#[allow(unused_imports)]
pub(crate) use catmaid::*;
#[allow(unused_imports)]
pub(crate) use neurons::*;
#[allow(unused_imports)]
pub(crate) use router::*;
#[allow(unused_imports)]
pub(crate) use workers::*;
#[allow(unused_imports)]
pub(crate) use schedule::*;
#[allow(unused_imports)]
pub(crate) use slack::*;
#[allow(unused_imports)]
pub(crate) use render::*;
#[allow(unused_imports)]
pub(crate) use zotero::*;
#[allow(unused_imports)]
pub(crate) use context::*;
#[allow(unused_imports)]
pub(crate) use handlers::*;
#[allow(unused_imports)]
pub(crate) use dispatch::*;
#[allow(unused_imports)]
pub(crate) use bot::*;
#[cfg(test)]
#[allow(unused_imports)]
pub(crate) use testing::*;

use clap::Parser;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, debug } => {
            let config_path = resolve_config_path(config);
            let config = BotConfig::load(&config_path)?;
            init_logging(debug, Some(&config.log_path()))?;
            tracing::info!(config = %config_path.display(), "starting catbot");
            run_bot(config, config_path)?;
            Ok(())
        }

        Command::Doctor { config } => {
            let config_path = resolve_config_path(config);
            init_logging(false, None)?;
            let config = BotConfig::load(&config_path)?;
            println!("config: {}", config_path.display());
            let checks = run_doctor(&config);
            for check in &checks {
                let status = if check.ok { "ok" } else { "FAIL" };
                println!("[{status:>4}] {}: {}", check.name, check.detail);
            }
            if checks.iter().any(|check| !check.ok) {
                std::process::exit(1);
            }
            Ok(())
        }

        Command::Dump { store, config } => {
            let config = BotConfig::load(&resolve_config_path(config))?;
            let path = match store {
                StoreKind::Neurondb => config.neurondb_path(),
                StoreKind::Subscriptions => config.subscriptions_path(),
            };
            if !path.exists() {
                eprintln!("Store does not exist: {}", path.display());
                std::process::exit(2);
            }
            println!("{}", KvStore::new(path).dump_json()?);
            Ok(())
        }

        Command::Init { config, force } => {
            let config_path = resolve_config_path(config);
            if config_path.exists() && !force {
                eprintln!("Refusing to overwrite existing file: {}", config_path.display());
                std::process::exit(2);
            }
            save_file_config(&config_path, &BotConfig::default())?;
            println!("Created {}", config_path.display());
            Ok(())
        }
    }
}
