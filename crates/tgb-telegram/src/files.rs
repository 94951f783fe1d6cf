use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tgb_core::{errors::Error, Result};

use crate::client::BotClient;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetch a user-uploaded file into `dir`, keeping its remote basename.
pub async fn download_file(client: &BotClient, file_id: &str, dir: &Path) -> Result<PathBuf> {
    if file_id.trim().is_empty() {
        return Err(Error::Config("file id is empty".to_string()));
    }

    let info = client.get_file(file_id).await?;
    let remote_path = info
        .file_path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| Error::External(format!("no file_path for file {file_id}")))?;

    let url = format!(
        "{}{}/{}",
        client.config().file_url,
        client.token(),
        remote_path
    );
    let reply = client.http().get_bytes(&url, DOWNLOAD_TIMEOUT).await?;
    if !reply.is_success() {
        return Err(Error::External(format!(
            "file download failed with HTTP {}",
            reply.status
        )));
    }

    let name = Path::new(&remote_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_id.to_string());

    tokio::fs::create_dir_all(dir).await?;
    let target = dir.join(name);
    tokio::fs::write(&target, &reply.body).await?;

    tracing::debug!(file_id, bytes = reply.body.len(), path = %target.display(), "file downloaded");
    Ok(target)
}
