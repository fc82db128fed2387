use anyhow::{Context, Result, bail};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::tungstenite;
use tracing::debug;

/// What ended a listen session.
#[derive(Debug, PartialEq, Eq)]
pub enum ListenOutcome {
    /// The server closed the connection.
    Closed,
    /// The user pressed Ctrl-C.
    Interrupted,
}

/// Connect, authenticate with `token`, then print every payload received.
///
/// Lines typed on stdin are sent to the hub as messages.
pub async fn listen(url: &str, token: &str) -> Result<ListenOutcome> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("Failed to connect to {url}"))?;
    let (mut ws_write, mut ws_read) = ws_stream.split();

    // The credential must be the first frame on the connection.
    ws_write
        .send(tungstenite::Message::Text(token.to_owned().into()))
        .await
        .context("Failed to send credential")?;
    eprintln!("[fanout: connected to {url}]");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            msg = ws_read.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => print_payloads(text.as_str()),
                    Some(Ok(tungstenite::Message::Binary(data))) => {
                        print_payloads(&String::from_utf8_lossy(&data))
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        debug!("Server closed connection: {:?}", frame);
                        return Ok(ListenOutcome::Closed);
                    }
                    // Pings are answered by tungstenite on the next read.
                    Some(Ok(_)) => {}
                    Some(Err(tungstenite::Error::ConnectionClosed)) | None => {
                        return Ok(ListenOutcome::Closed);
                    }
                    Some(Err(e)) => bail!("Connection error: {e}"),
                }
            }

            line = stdin.next_line(), if stdin_open => {
                match line.context("Failed to read stdin")? {
                    Some(line) if !line.is_empty() => {
                        ws_write
                            .send(tungstenite::Message::Text(line.into()))
                            .await
                            .context("Failed to send message")?;
                    }
                    Some(_) => {}
                    None => stdin_open = false,
                }
            }

            _ = tokio::signal::ctrl_c() => {
                let _ = ws_write.send(tungstenite::Message::Close(None)).await;
                return Ok(ListenOutcome::Interrupted);
            }
        }
    }
}

fn print_payloads(frame: &str) {
    for payload in split_payloads(frame) {
        println!("{payload}");
    }
}

/// A written frame may carry several payloads joined by newlines.
pub fn split_payloads(frame: &str) -> impl Iterator<Item = &str> {
    frame.split('\n').filter(|p| !p.is_empty())
}
