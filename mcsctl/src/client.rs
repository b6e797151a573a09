use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use common::protocol::{Request, Response};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// Upper bound on a response buffer.
const MAX_RESPONSE: usize = 64 * 1024;

/// Sends one request over the manager's local socket and decodes the single
/// JSON response. The whole exchange shares one deadline.
pub async fn send(socket: &Path, timeout: Duration, request: &Request) -> Result<Response> {
    let exchange = async {
        let mut stream = UnixStream::connect(socket)
            .await
            .with_context(|| format!("connecting to {}", socket.display()))?;
        stream
            .write_all(request.encode().as_bytes())
            .await
            .context("sending request")?;
        stream.shutdown().await.context("closing write side")?;

        let mut buf = Vec::with_capacity(1024);
        (&mut stream)
            .take(MAX_RESPONSE as u64)
            .read_to_end(&mut buf)
            .await
            .context("reading response")?;
        let response: Response =
            serde_json::from_slice(&buf).context("decoding response")?;
        Ok(response)
    };
    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => bail!("request timed out after {timeout:?}"),
    }
}
