use std::process::ExitCode;

use appimage_config::{config, error::ConfigError};
use appimage_core::{IntegrationManager, Result};
use appimage_utils::path::resolve_path;
use clap::Parser;
use cli::{Args, Commands};
use extract::extract_file;
use inspect::{show_info, show_property, Property};
use integrate::{integrate_appimages, show_status, unintegrate_appimages};
use list::list_files;
use logging::setup_logging;
use tracing::debug;

mod cli;
mod extract;
mod inspect;
mod integrate;
mod list;
mod logging;
mod utils;

fn integration_manager() -> Result<IntegrationManager> {
    config::init()?;
    let manager = IntegrationManager::new()?;
    debug!(
        data_home = %manager.data_home().display(),
        vendor = manager.vendor_prefix(),
        "integration manager ready"
    );
    Ok(manager)
}

fn handle_cli() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args);

    if args.no_color {
        utils::set_color(false);
    }

    if let Some(ref path) = args.config {
        config::set_config_path(resolve_path(path).map_err(ConfigError::from)?);
    }

    let json = args.json;
    match args.command {
        Commands::Info { appimage } => show_info(&appimage, json)?,
        Commands::Format { appimage } => show_property(&appimage, Property::Format, json)?,
        Commands::Size { appimage } => show_property(&appimage, Property::Size, json)?,
        Commands::Md5 { appimage } => show_property(&appimage, Property::Md5, json)?,
        Commands::Offset { appimage } => show_property(&appimage, Property::Offset, json)?,
        Commands::List {
            appimage,
            dir,
            recursive,
        } => list_files(&appimage, dir.as_deref(), recursive, json)?,
        Commands::Extract {
            appimage,
            source,
            target,
        } => extract_file(&appimage, &source, &target, json)?,
        Commands::Status { appimage } => show_status(&integration_manager()?, &appimage, json)?,
        Commands::Integrate { appimages, force } => {
            integrate_appimages(&integration_manager()?, &appimages, force, json)?
        }
        Commands::Unintegrate { appimages } => {
            unintegrate_appimages(&integration_manager()?, &appimages, json)?
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .build(),
        )
    }))
    .ok();

    match handle_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{:?}", miette::Report::new(err));
            ExitCode::FAILURE
        }
    }
}
