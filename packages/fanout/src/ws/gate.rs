//! Authentication gate
//!
//! Runs once per connection, before registration: the first data frame must
//! be a bearer credential and it must arrive before the auth deadline.

use fanout_auth::{AuthError, CredentialVerifier, Identity};
use futures::StreamExt;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use super::frame::{Frame, FrameStream, TransportError};

/// Wait for the credential frame and verify it.
///
/// Control frames received while waiting are skipped. A closed or failing
/// transport counts as [`TransportError::AuthTimeout`]; the credential frame
/// itself is consumed and never broadcast.
pub async fn authenticate<S: FrameStream>(
    stream: &mut S,
    verifier: &dyn CredentialVerifier,
    auth_timeout: Duration,
) -> Result<Identity, TransportError> {
    let deadline = Instant::now() + auth_timeout;

    loop {
        let frame = match timeout_at(deadline, stream.next()).await {
            Err(_) => return Err(TransportError::AuthTimeout),
            Ok(None) => {
                debug!("Transport closed before credential");
                return Err(TransportError::AuthTimeout);
            }
            Ok(Some(Err(e))) => {
                debug!(error = %e, "Transport error before credential");
                return Err(TransportError::AuthTimeout);
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Frame::Data(payload) => {
                let token = std::str::from_utf8(&payload).map_err(|_| {
                    TransportError::AuthRejected(AuthError::Malformed(
                        "credential is not valid UTF-8".into(),
                    ))
                })?;
                return verifier.verify(token).map_err(TransportError::AuthRejected);
            }
            Frame::Ping(_) | Frame::Pong(_) => continue,
            Frame::Close => return Err(TransportError::AuthTimeout),
        }
    }
}
