//! Control socket: newline-delimited JSON over a Unix stream socket.
//!
//! One request per line, one reply per line. Clients are served
//! concurrently; a malformed line gets a `bad_request` reply and the
//! connection stays open.

use crate::metrics::MetricsRegistry;
use futures::{SinkExt, StreamExt};
use gateway::{CommandReply, ControlPlane, Error, GatewayStatus, TargetState};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest accepted request line
pub const MAX_REQUEST_LEN: usize = 4096;

/// Request read from the control socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    GetStatus,
    Command {
        action: String,
        #[serde(default)]
        param: Option<String>,
    },
}

impl Request {
    fn method(&self) -> &'static str {
        match self {
            Request::GetStatus => "get_status",
            Request::Command { .. } => "command",
        }
    }
}

/// Reply written to the control socket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Reply {
    pub ok: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<GatewayStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested: Option<TargetState>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub fn status(status: GatewayStatus) -> Self {
        Self {
            ok: true,
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn error(code: &str, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            code: Some(code.to_string()),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    fn from_command(result: gateway::Result<CommandReply>) -> Self {
        match result {
            Ok(CommandReply::Reloaded) => Self {
                ok: true,
                result: Some("success".to_string()),
                ..Default::default()
            },
            Ok(CommandReply::ReloadFailed { error }) => Self {
                ok: false,
                result: Some("failed".to_string()),
                error: Some(error),
                ..Default::default()
            },
            Ok(CommandReply::SwitchRequested { target }) => Self {
                ok: true,
                requested: Some(target),
                ..Default::default()
            },
            Err(Error::InvalidArgument(msg)) => Self::error("invalid_argument", msg),
            Err(e) => Self::error("internal", e.to_string()),
        }
    }
}

/// Answer one request line
///
/// Returns the method label used for metrics along with the reply.
pub async fn dispatch(plane: &ControlPlane, line: &str) -> (&'static str, Reply) {
    let request = match serde_json::from_str::<Request>(line) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "Malformed control request");
            return ("invalid", Reply::error("bad_request", e.to_string()));
        }
    };

    let method = request.method();
    let reply = match request {
        Request::GetStatus => Reply::status(plane.get_status().await),
        Request::Command { action, param } => {
            Reply::from_command(plane.command(&action, param.as_deref()).await)
        }
    };

    (method, reply)
}

/// Unix socket listener bound to a [`ControlPlane`]
pub struct RpcServer {
    socket_path: PathBuf,
    plane: Arc<ControlPlane>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl RpcServer {
    pub fn new(
        socket_path: impl Into<PathBuf>,
        plane: Arc<ControlPlane>,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            plane,
            metrics,
        }
    }

    /// Bind the socket, replacing a stale one
    pub fn bind(&self) -> std::io::Result<UnixListener> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        UnixListener::bind(&self.socket_path)
    }

    /// Accept clients until `cancel` fires, then remove the socket
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let listener = self.bind()?;
        self.serve(listener, cancel).await;
        Ok(())
    }

    /// Accept clients on an already bound listener until `cancel` fires
    pub async fn serve(self, listener: UnixListener, cancel: CancellationToken) {
        info!(socket = %self.socket_path.display(), "Control socket listening");

        loop {
            let stream = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept control connection");
                        continue;
                    }
                },
            };

            debug!("Control client connected");
            let plane = self.plane.clone();
            let metrics = self.metrics.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                serve_connection(stream, plane, metrics, cancel).await;
            });
        }

        drop(listener);
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            debug!(error = %e, "Control socket already gone");
        }
        info!("Control socket closed");
    }
}

async fn serve_connection(
    stream: UnixStream,
    plane: Arc<ControlPlane>,
    metrics: Option<Arc<MetricsRegistry>>,
    cancel: CancellationToken,
) {
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_REQUEST_LEN));

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = framed.next() => next,
        };

        let (method, reply) = match next {
            None => break,
            Some(Ok(line)) if line.trim().is_empty() => continue,
            Some(Ok(line)) => dispatch(&plane, line.trim()).await,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                ("invalid", Reply::error("bad_request", "request too long"))
            }
            Some(Err(LinesCodecError::Io(e))) => {
                warn!(error = %e, "Control connection read failed");
                break;
            }
        };

        if let Some(m) = &metrics {
            m.record_rpc(method, reply.ok);
        }

        let json = match serde_json::to_string(&reply) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to encode control reply");
                break;
            }
        };

        if let Err(e) = framed.send(json).await {
            warn!(error = %e, "Control connection write failed");
            break;
        }
    }

    debug!("Control client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_parsing() {
        let request: Request = serde_json::from_str(r#"{"method":"get_status"}"#).unwrap();
        assert_eq!(request, Request::GetStatus);

        let request: Request =
            serde_json::from_str(r#"{"method":"command","action":"switch","param":"up"}"#)
                .unwrap();
        assert_eq!(
            request,
            Request::Command {
                action: "switch".to_string(),
                param: Some("up".to_string()),
            }
        );

        let request: Request =
            serde_json::from_str(r#"{"method":"command","action":"reload"}"#).unwrap();
        assert_eq!(request.method(), "command");

        assert!(serde_json::from_str::<Request>(r#"{"method":"reboot"}"#).is_err());
    }

    #[test]
    fn test_reply_encoding() {
        let json = serde_json::to_string(&Reply::status(GatewayStatus::Up)).unwrap();
        assert_eq!(json, r#"{"ok":true,"status":"up"}"#);

        let json = serde_json::to_string(&Reply::from_command(Ok(CommandReply::Reloaded))).unwrap();
        assert_eq!(json, r#"{"ok":true,"result":"success"}"#);

        let reply = Reply::from_command(Ok(CommandReply::SwitchRequested {
            target: TargetState::Down,
        }));
        assert_eq!(
            serde_json::to_string(&reply).unwrap(),
            r#"{"ok":true,"requested":"down"}"#
        );

        let reply = Reply::from_command(Err(Error::invalid_argument("invalid command")));
        assert_eq!(
            serde_json::to_string(&reply).unwrap(),
            r#"{"ok":false,"code":"invalid_argument","error":"invalid command"}"#
        );

        let reply = Reply::from_command(Ok(CommandReply::ReloadFailed {
            error: "bad yaml".to_string(),
        }));
        assert_eq!(
            serde_json::to_string(&reply).unwrap(),
            r#"{"ok":false,"result":"failed","error":"bad yaml"}"#
        );
    }
}
