//! LOGIN exchange over a session.

use blockpost_core::auth::{login_request, on_login_response};
use blockpost_core::{DigestAlgorithm, Frame, Token};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

use crate::error::ClientError;
use crate::transport::Session;

/// Log in as `identity` and store the token on the session. No retry on rejection.
pub async fn authenticate<S>(
    session: &mut Session<S>,
    identity: &str,
    algorithm: DigestAlgorithm,
) -> Result<Token, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = Frame::new(login_request(identity, algorithm));
    let response = session.request(&request).await?;
    match on_login_response(&response.metadata) {
        Ok(token) => {
            info!(identity, "logged in");
            session.set_token(token.clone());
            Ok(token)
        }
        Err(e) => {
            warn!(identity, error = %e, "login rejected");
            Err(e.into())
        }
    }
}
