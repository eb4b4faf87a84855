//! Task bodies. Every body except `stop` and `kill` runs between a graceful
//! stop and a restart; the restart runs even when the body fails or panics.

use chrono::Local;
use std::path::Path;
use std::sync::Arc;

use super::archive::sha256_file;
use super::Task;
use crate::supervisor::error::SupervisorError;
use crate::supervisor::Supervisor;

/// Run `task` to completion. The caller holds the task lock.
pub async fn execute(sup: &Arc<Supervisor>, task: &Task) -> Result<String, SupervisorError> {
    if !task.restarts_server() {
        return match task {
            Task::Kill => Ok(kill(sup)),
            _ => stop(sup),
        };
    }

    // A panicking body surfaces as a JoinError; the restart below still runs.
    let result = match tokio::spawn(run_body(sup.clone(), task.clone())).await {
        Ok(result) => result,
        Err(e) => Err(SupervisorError::Internal(anyhow::anyhow!(
            "task body aborted: {}",
            e
        ))),
    };

    let restarted = sup.launch();

    if let Task::Restore { archive } = task {
        remove_upload(archive);
    }

    match (result, restarted) {
        (Ok(msg), Ok(_)) => Ok(msg),
        (Ok(_), Err(e)) => {
            tracing::error!("Restart after task '{}' failed: {}", task.name(), e);
            Err(e)
        }
        (Err(e), Ok(_)) => Err(e),
        (Err(e), Err(restart_err)) => {
            tracing::error!("Restart after task '{}' failed: {}", task.name(), restart_err);
            Err(e)
        }
    }
}

async fn run_body(sup: Arc<Supervisor>, task: Task) -> Result<String, SupervisorError> {
    let phase = sup.stop_gracefully().await;
    tracing::info!("Server quiesced ({:?})", phase);

    match &task {
        Task::Backup => backup(&sup).await,
        Task::Restore { archive } => restore(&sup, archive).await,
        Task::Restart => Ok("server restarted".to_string()),
        Task::AutoUpdate => auto_update(&sup).await,
        Task::Stop | Task::Kill => Ok(String::new()),
    }
}

async fn backup(sup: &Arc<Supervisor>) -> Result<String, SupervisorError> {
    let world = sup.config.world_path();
    if !world.is_dir() {
        let skipped = SupervisorError::MissingData(world.display().to_string());
        tracing::warn!("{}, skipping archive", skipped);
        return Ok(format!("backup skipped: {}", skipped));
    }

    let backup_dir = sup.config.backup_path();
    tokio::fs::create_dir_all(&backup_dir).await?;
    let dest = backup_dir.join(format!(
        "world_{}.zip",
        Local::now().format("%Y-%m-%d_%H-%M-%S")
    ));
    tracing::info!("Archiving {} to {}", world.display(), dest.display());

    let archiver = sup.archiver();
    let (src, out) = (world.clone(), dest.clone());
    let digest = tokio::task::spawn_blocking(move || -> Result<String, SupervisorError> {
        archiver.archive(&src, &out)?;
        Ok(sha256_file(&out)?)
    })
    .await
    .map_err(|e| SupervisorError::Internal(anyhow::anyhow!("archive worker failed: {}", e)))??;

    tracing::info!("Backup written to {} (sha256 {})", dest.display(), digest);
    Ok(format!("backup written to {} (sha256 {})", dest.display(), digest))
}

async fn restore(sup: &Arc<Supervisor>, archive: &Path) -> Result<String, SupervisorError> {
    let world = sup.config.world_path();
    if world.exists() {
        tracing::info!("Removing world directory {}", world.display());
        tokio::fs::remove_dir_all(&world).await?;
    }
    tokio::fs::create_dir_all(&world).await?;

    let archiver = sup.archiver();
    let (src, dest) = (archive.to_path_buf(), world.clone());
    tokio::task::spawn_blocking(move || archiver.extract(&src, &dest))
        .await
        .map_err(|e| SupervisorError::Internal(anyhow::anyhow!("extract worker failed: {}", e)))??;

    tracing::info!("World restored from {}", archive.display());
    Ok(format!("world restored from {}", archive.display()))
}

async fn auto_update(sup: &Arc<Supervisor>) -> Result<String, SupervisorError> {
    let component = sup.config.component_path();
    if component.exists() {
        tracing::info!("Removing {}", component.display());
        tokio::fs::remove_file(&component).await?;
    }

    let url = &sup.config.update.url;
    tracing::info!("Downloading {} from {}", component.display(), url);
    let bytes = download(sup, url).await?;

    if let Some(parent) = component.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&component, &bytes).await?;
    tracing::info!("Installed {} ({} bytes)", component.display(), bytes.len());
    Ok(format!("updated {} ({} bytes)", component.display(), bytes.len()))
}

async fn download(sup: &Supervisor, url: &str) -> Result<Vec<u8>, SupervisorError> {
    let network = |e: reqwest::Error| SupervisorError::NetworkFailure(e.to_string());
    let response = sup.http().get(url).send().await.map_err(network)?;
    if !response.status().is_success() {
        return Err(SupervisorError::NetworkFailure(format!(
            "GET {} returned {}",
            url,
            response.status()
        )));
    }
    let bytes = response.bytes().await.map_err(network)?;
    Ok(bytes.to_vec())
}

fn stop(sup: &Supervisor) -> Result<String, SupervisorError> {
    sup.note_operator_stop();
    if sup.send_command(&sup.config.server.stop_command) {
        Ok("stop command sent".to_string())
    } else {
        Err(SupervisorError::ProcessUnavailable)
    }
}

fn kill(sup: &Supervisor) -> String {
    sup.note_operator_stop();
    if sup.force_kill() {
        "server killed".to_string()
    } else {
        "server was not running".to_string()
    }
}

fn remove_upload(archive: &Path) {
    match std::fs::remove_file(archive) {
        Ok(()) => tracing::info!("Removed uploaded archive {}", archive.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove uploaded archive {}: {}", archive.display(), e),
    }
}
