//! Mutual challenge-response authentication over a line-oriented stream.
//!
//! Both sides feed every line they send or receive (including the trailing newline) into
//! an HMAC-SHA256 keyed with the shared secret, so each tag commits to the full transcript:
//!
//! ```text
//! client → {"method":"gorgon.auth0","params":[<client salt>]}
//! server ← {"result":<server salt>,"error":null}
//! client → {"method":"gorgon.auth1","params":[<tag over the lines above>]}
//! server ← {"result":<tag over the lines above>,"error":null}
//! ```
//!
//! The secret itself never crosses the wire.

use {
    crate::{
        buffered::{BufferedStream, HANDSHAKE_LINE_LIMIT},
        Error, Result,
    },
    hmac::{Hmac, Mac},
    rand::{rngs::OsRng, RngCore},
    serde::{Deserialize, Serialize},
    sha2::Sha256,
    subtle::ConstantTimeEq,
    tokio::io::{AsyncRead, AsyncWrite},
    tracing::debug,
};

type HmacSha256 = Hmac<Sha256>;

const AUTH0: &str = "gorgon.auth0";
const AUTH1: &str = "gorgon.auth1";

#[derive(Debug, Deserialize, Serialize)]
struct AuthRequest {
    method: String,
    #[serde(default)]
    params: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct AuthResponse {
    result: Option<String>,
    error: Option<String>,
}

struct Authenticator<'a, S> {
    stream: &'a mut BufferedStream<S>,
    mac: HmacSha256,
}

impl<'a, S: AsyncRead + AsyncWrite + Unpin> Authenticator<'a, S> {
    fn new(stream: &'a mut BufferedStream<S>, key: &[u8]) -> Result<Self> {
        let mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| Error::InvalidKey)?;
        Ok(Authenticator { stream, mac })
    }

    fn tag(&self) -> String {
        hex::encode(self.mac.clone().finalize().into_bytes())
    }

    async fn send<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.stream.write_line(&line).await?;
        self.mac.update(&line);
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        let line = self.stream.read_line(HANDSHAKE_LINE_LIMIT).await?;
        self.mac.update(&line);
        Ok(line)
    }

    async fn send_request(&mut self, method: &str, param: String) -> Result<()> {
        self.send(&AuthRequest {
            method: method.to_string(),
            params: vec![param],
        })
        .await
    }

    async fn send_result(&mut self, result: String) -> Result<()> {
        self.send(&AuthResponse {
            result: Some(result),
            error: None,
        })
        .await
    }

    /// Reports `err` to the peer, then returns it. A peer that can no longer be written to
    /// still gets `err` as the outcome.
    async fn send_error(&mut self, err: Error) -> Result<()> {
        let response = AuthResponse {
            result: None,
            error: Some(err.to_string()),
        };
        if let Err(send_err) = self.send(&response).await {
            debug!(%err, %send_err, "Handshake error not delivered.");
        }
        Err(err)
    }

    async fn receive_response(&mut self) -> Result<String> {
        let line = self.receive().await?;
        let response: AuthResponse = serde_json::from_slice(&line)?;
        match response {
            AuthResponse {
                error: Some(message),
                ..
            } => Err(Error::from_remote(message)),
            AuthResponse { result: None, .. } => Err(Error::NilResult),
            AuthResponse {
                result: Some(result),
                ..
            } => Ok(result),
        }
    }

    /// Receives a request for `method` with exactly one parameter.
    async fn receive_request(&mut self, method: &str) -> Result<Option<String>> {
        let line = self.receive().await?;
        match serde_json::from_slice::<AuthRequest>(&line) {
            Ok(AuthRequest { method: m, mut params }) if m == method && params.len() == 1 => {
                Ok(params.pop())
            }
            _ => Ok(None),
        }
    }
}

fn random_hex() -> Result<String> {
    let mut salt = [0u8; 16];
    OsRng.try_fill_bytes(&mut salt)?;
    Ok(hex::encode(salt))
}

fn tags_match(expected: &str, actual: &str) -> bool {
    expected.as_bytes().ct_eq(actual.as_bytes()).into()
}

/// Runs the client side of the handshake.
pub async fn auth_client<S>(stream: &mut BufferedStream<S>, key: &[u8]) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut auth = Authenticator::new(stream, key)?;
    auth.send_request(AUTH0, random_hex()?).await?;
    auth.receive_response().await?;
    let tag = auth.tag();
    auth.send_request(AUTH1, tag).await?;
    let expected = auth.tag();
    let tag = auth.receive_response().await?;
    if !tags_match(&expected, &tag) {
        return Err(Error::InvalidServerTag);
    }
    Ok(())
}

/// Runs the server side of the handshake. Every failure is reported to the client before
/// being returned.
pub async fn auth_server<S>(stream: &mut BufferedStream<S>, key: &[u8]) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut auth = Authenticator::new(stream, key)?;
    let first = match auth.receive_request(AUTH0).await {
        // A first message cut short by EOF is as malformed as any other.
        Err(Error::ConnectionClosed) => None,
        received => received?,
    };
    if first.is_none() {
        return auth.send_error(Error::UnexpectedRequest).await;
    }
    let salt = match random_hex() {
        Ok(salt) => salt,
        Err(err) => return auth.send_error(err).await,
    };
    auth.send_result(salt).await?;
    let expected = auth.tag();
    let Some(tag) = auth.receive_request(AUTH1).await? else {
        return auth.send_error(Error::UnexpectedRequest).await;
    };
    if !tags_match(&expected, &tag) {
        return auth.send_error(Error::InvalidClientTag).await;
    }
    let tag = auth.tag();
    auth.send_result(tag).await
}
