use std::path::{Path, PathBuf};

use appimage_core::{AppImage, AppImageError, IntegrationManager, IntegrationRecord, Result};
use nu_ansi_term::Color::{Cyan, Green, Yellow};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::utils::{print_json, Colored};

#[derive(Serialize)]
struct Status<'a> {
    path: &'a Path,
    identifier: &'a str,
    integrated: bool,
    should_integrate: Option<bool>,
    record: Option<IntegrationRecord>,
}

pub fn show_status(manager: &IntegrationManager, path: &Path, json: bool) -> Result<()> {
    let appimage = AppImage::open(path)?;
    let record = manager.integration_record(&appimage)?;
    let should_integrate = match manager.should_integrate(&appimage) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(error = %err, "could not evaluate integration policy");
            None
        }
    };

    if json {
        return print_json(&Status {
            path,
            identifier: appimage.identifier(),
            integrated: record.is_some(),
            should_integrate,
            record,
        });
    }

    match record {
        Some(record) => {
            info!("{} is {}", path.display(), Colored(Green, "integrated"));
            for artifact in &record.artifacts {
                info!("  {}", artifact.display());
            }
        }
        None => {
            info!("{} is {}", path.display(), Colored(Yellow, "not integrated"));
            if should_integrate == Some(false) {
                info!("  its desktop entry asks not to be integrated");
            }
        }
    }
    Ok(())
}

pub fn integrate_appimages(
    manager: &IntegrationManager,
    paths: &[PathBuf],
    force: bool,
    json: bool,
) -> Result<()> {
    let mut records = Vec::new();
    let mut failed = 0;

    for path in paths {
        let result = AppImage::open(path).and_then(|appimage| {
            if !force && !manager.should_integrate(&appimage)? {
                warn!(
                    "Skipping {}: its desktop entry asks not to be integrated (use --force)",
                    path.display()
                );
                return Ok(None);
            }
            manager.integrate(&appimage).map(Some)
        });

        match result {
            Ok(Some(record)) => {
                if !json {
                    info!(
                        "Integrated {} ({} files)",
                        Colored(Cyan, path.display()),
                        record.artifacts.len()
                    );
                }
                records.push(record);
            }
            Ok(None) => {}
            Err(err) if paths.len() == 1 => return Err(err),
            Err(err) => {
                error!("Failed to integrate {}: {err}", path.display());
                failed += 1;
            }
        }
    }

    if json {
        print_json(&records)?;
    }
    if failed > 0 {
        return Err(AppImageError::OperationFailed(format!(
            "{failed} of {} AppImages failed to integrate",
            paths.len()
        )));
    }
    Ok(())
}

pub fn unintegrate_appimages(
    manager: &IntegrationManager,
    paths: &[PathBuf],
    json: bool,
) -> Result<()> {
    let mut removed = Vec::new();
    for path in paths {
        let artifacts = manager.unintegrate_path(path)?;
        if !json {
            if artifacts.is_empty() {
                info!("{} was not integrated", path.display());
            } else {
                info!(
                    "Removed integration of {} ({} files)",
                    Colored(Cyan, path.display()),
                    artifacts.len()
                );
            }
        }
        removed.extend(artifacts);
    }

    if json {
        print_json(&removed)?;
    }
    Ok(())
}
