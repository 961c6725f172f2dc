use {
    crate::{dial, Result, RpcClient},
    serde::{de::DeserializeOwned, Serialize},
    tokio::{net::TcpStream, runtime::Runtime as TokioRuntime},
};

/// An [`RpcClient`] for synchronous callers such as scenario worker threads. Owns a
/// single-threaded runtime that only runs while a call is in flight.
///
/// Must not be created or dropped from within an async context.
pub struct BlockingClient {
    client: RpcClient<TcpStream>,
    rt: TokioRuntime,
}

impl BlockingClient {
    pub fn dial(address: &str, key: &[u8]) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let client = rt.block_on(dial(address, key))?;
        Ok(BlockingClient { client, rt })
    }

    pub fn call<A, R>(&mut self, method: &str, arg: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.rt.block_on(self.client.call(method, arg))
    }
}
