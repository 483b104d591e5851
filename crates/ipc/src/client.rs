//! Minimal control-socket client: one connection per request,
//! newline-delimited JSON.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use uuid::Uuid;

use crate::{ControlRequest, ControlResponse};

pub struct SocketClient {
    path: PathBuf,
}

impl SocketClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn request(&self, request: &ControlRequest) -> Result<ControlResponse> {
        let stream = UnixStream::connect(&self.path).await?;
        let (reader, mut writer) = stream.into_split();

        let mut body = serde_json::to_string(request)?;
        body.push('\n');
        writer.write_all(body.as_bytes()).await?;

        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        Ok(serde_json::from_str(line.trim())?)
    }

    pub async fn status(&self) -> Result<ControlResponse> {
        self.request(&ControlRequest::Status { id: Uuid::new_v4() })
            .await
    }

    pub async fn force_tick(&self) -> Result<ControlResponse> {
        self.request(&ControlRequest::ForceTick { id: Uuid::new_v4() })
            .await
    }

    pub async fn set_safe_mode(&self, enabled: bool) -> Result<ControlResponse> {
        self.request(&ControlRequest::SetSafeMode {
            id: Uuid::new_v4(),
            enabled,
        })
        .await
    }

    pub async fn reset(&self) -> Result<ControlResponse> {
        self.request(&ControlRequest::Reset { id: Uuid::new_v4() })
            .await
    }

    pub async fn metrics(&self) -> Result<ControlResponse> {
        self.request(&ControlRequest::Metrics { id: Uuid::new_v4() })
            .await
    }
}
