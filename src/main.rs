mod commands;
mod error;
mod manifest;
mod mutator;
mod program_config;
mod protocol;
mod public_ip;
mod reconciler;
mod recognition_tag;
mod security_group;
mod settings;

use crate::commands::Invocation;
use crate::error::Error;
use crate::program_config::ProgramConfig;
use crate::settings::Settings;
use anyhow::Context;
use env_logger::{Env, Target};
use std::fs::OpenOptions;
use std::path::Path;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Parse options
    let options = ProgramConfig::parse();

    let settings_path = match &options.settings_file {
        Some(path) => path.clone(),
        None => Settings::default_path()?,
    };
    let settings = Settings::load(&settings_path)?;

    // Set up logging
    let log_file = options
        .log_file
        .clone()
        .or_else(|| settings.log_path.clone())
        .filter(|p| !p.as_os_str().is_empty());
    init_logging(log_file.as_deref())?;

    let result = Invocation {
        options,
        settings,
        settings_path,
    }
    .run()
    .await;

    if let Err(e) = &result {
        if e.downcast_ref::<Error>().is_some_and(Error::is_retryable) {
            log::info!("The failure looks transient, running the command again may succeed");
        }
    }

    result
}

fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or(if cfg!(debug_assertions) {
            "debug"
        } else {
            "info"
        }));

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file '{}'", path.display()))?;
            builder.target(Target::Pipe(Box::new(file)));
        }
        None => {
            builder.format_timestamp(None).format_module_path(false);
        }
    }

    builder.init();
    Ok(())
}
