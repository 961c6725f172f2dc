//! Authenticated RPC for driving remote fault-injection agents.
//!
//! A connection starts with a mutual challenge-response handshake (see [`auth_client`]
//! and [`auth_server`]) and only then carries newline-delimited JSON requests of the form
//! `{"method":"Service.Method","params":[arg],"id":n}`. A failed handshake closes the
//! connection and never reaches the RPC layer.
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> gorgon_rpc::Result<()> {
//! let mut client = gorgon_rpc::dial("10.0.0.2:9090", b"password").await?;
//! let arg = serde_json::json!({"process": "memcached", "signal": 9});
//! let _reply: String = client.call("KillRpc.Pkill", &arg).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unused_must_use)]
#![warn(rust_2018_idioms, unreachable_pub)]

mod auth;
mod blocking;
mod buffered;
mod error;
mod rpc;

pub use auth::{auth_client, auth_server};
pub use blocking::BlockingClient;
pub use buffered::{BufferedStream, HANDSHAKE_LINE_LIMIT, RPC_LINE_LIMIT};
pub use error::{Error, Result};
pub use rpc::{decode_param, serve_connection, Registry, RpcClient, Service};

use {
    std::{fmt::Display, future::Future, sync::Arc, time::Duration},
    tokio::{
        io::{AsyncRead, AsyncWrite},
        net::{TcpListener, TcpStream, ToSocketAddrs},
    },
    tracing::{info, warn},
};

/// Bound on connecting and authenticating.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

async fn within<T>(future: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(HANDSHAKE_TIMEOUT, future)
        .await
        .map_err(|_| Error::Timeout)?
}

/// Connects and authenticates as a client.
pub async fn dial(address: impl ToSocketAddrs, key: &[u8]) -> Result<RpcClient<TcpStream>> {
    let stream = within(async { TcpStream::connect(address).await.map_err(Error::from) }).await?;
    stream.set_nodelay(true)?;
    let mut stream = BufferedStream::new(stream);
    within(auth_client(&mut stream, key)).await?;
    Ok(RpcClient::new(stream))
}

/// Binds `address` and serves authenticated connections until accepting fails.
pub async fn listen(address: impl ToSocketAddrs, key: &[u8], registry: Registry) -> Result<()> {
    let listener = TcpListener::bind(address).await?;
    info!(addr = %listener.local_addr()?, "RPC listening.");
    serve(listener, key, registry).await
}

pub async fn serve(listener: TcpListener, key: &[u8], registry: Registry) -> Result<()> {
    let key: Arc<[u8]> = Arc::from(key);
    loop {
        let (stream, peer) = listener.accept().await?;
        let key = Arc::clone(&key);
        let registry = registry.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer, &key, &registry).await;
        });
    }
}

/// Authenticates the peer, then serves its requests. Failures are logged.
pub async fn handle_connection<S>(stream: S, peer: impl Display, key: &[u8], registry: &Registry)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    info!(%peer, "RPC accepted.");
    let mut stream = BufferedStream::new(stream);
    if let Err(err) = within(auth_server(&mut stream, key)).await {
        warn!(%peer, %err, "RPC auth failed.");
        return;
    }
    info!(%peer, "RPC auth succeeded.");
    match serve_connection(stream, registry).await {
        Ok(()) => info!(%peer, "RPC connection closed."),
        Err(err) => warn!(%peer, %err, "RPC connection failed."),
    }
}
