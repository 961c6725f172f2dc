use {
    crate::{
        buffered::{BufferedStream, RPC_LINE_LIMIT},
        Error, Result,
    },
    serde::{de::DeserializeOwned, Deserialize, Serialize},
    serde_json::Value,
    std::{collections::HashMap, fmt::Debug, sync::Arc},
    tokio::io::{AsyncRead, AsyncWrite},
    tracing::{debug, warn},
};

#[derive(Serialize)]
struct Request<'a, A: ?Sized> {
    method: &'a str,
    params: [&'a A; 1],
    id: u64,
}

#[derive(Deserialize)]
struct IncomingRequest {
    method: String,
    #[serde(default)]
    params: Vec<Value>,
    #[serde(default)]
    id: Value,
}

#[derive(Deserialize, Serialize)]
struct Response {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Calls procedures on an authenticated stream, one request at a time.
pub struct RpcClient<S> {
    stream: BufferedStream<S>,
    next_id: u64,
}

impl<S: AsyncRead + AsyncWrite + Unpin> RpcClient<S> {
    pub fn new(stream: BufferedStream<S>) -> Self {
        RpcClient { stream, next_id: 0 }
    }

    /// Calls `method` (named `Service.Method`) with a single argument.
    pub async fn call<A, R>(&mut self, method: &str, arg: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let id = self.next_id;
        self.next_id += 1;
        let mut line = serde_json::to_vec(&Request {
            method,
            params: [arg],
            id,
        })?;
        line.push(b'\n');
        self.stream.write_line(&line).await?;

        let line = self.stream.read_line(RPC_LINE_LIMIT).await?;
        let response: Response = serde_json::from_slice(&line)?;
        let got = response.id.as_u64().unwrap_or(u64::MAX);
        if got != id {
            return Err(Error::UnexpectedResponse { expected: id, got });
        }
        if let Some(message) = response.error {
            return Err(Error::Remote(message));
        }
        Ok(serde_json::from_value(response.result)?)
    }

    pub fn into_inner(self) -> BufferedStream<S> {
        self.stream
    }
}

/// A named collection of procedures, addressed as `Service.Method`.
///
/// Procedures are synchronous since they typically run commands or drive blocking
/// database clients. The server runs them on the blocking thread pool.
pub trait Service: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Returns the JSON result, or a message to report to the caller.
    fn call(&self, method: &str, param: Value) -> std::result::Result<Value, String>;
}

/// Decodes a parameter, mapping failures to a message for the caller.
pub fn decode_param<T: DeserializeOwned>(param: Value) -> std::result::Result<T, String> {
    serde_json::from_value(param).map_err(|err| format!("rpc: invalid parameter: {err}"))
}

#[derive(Clone, Default)]
pub struct Registry {
    services: HashMap<&'static str, Arc<dyn Service>>,
}

impl Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.services.keys().collect();
        names.sort();
        f.debug_struct("Registry").field("services", &names).finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, service: impl Service) -> Self {
        self.services.insert(service.name(), Arc::new(service));
        self
    }

    pub fn dispatch(&self, method: &str, param: Value) -> std::result::Result<Value, String> {
        let Some((service, procedure)) = method.split_once('.') else {
            return Err(format!("rpc: service/method request ill-formed: {method}"));
        };
        match self.services.get(service) {
            None => Err(format!("rpc: can't find service {method}")),
            Some(service) => service.call(procedure, param),
        }
    }
}

/// Serves requests on an authenticated stream until the peer disconnects.
pub async fn serve_connection<S>(mut stream: BufferedStream<S>, registry: &Registry) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let line = match stream.read_line(RPC_LINE_LIMIT).await {
            Ok(line) => line,
            Err(Error::ConnectionClosed) => return Ok(()),
            Err(err) => return Err(err),
        };
        let response = match serde_json::from_slice::<IncomingRequest>(&line) {
            Err(err) => {
                warn!(%err, "Unable to decode request. Ignoring.");
                Response {
                    id: Value::Null,
                    result: Value::Null,
                    error: Some(format!("rpc: invalid request: {err}")),
                }
            }
            Ok(IncomingRequest {
                method,
                mut params,
                id,
            }) => {
                debug!(%method, ?id, "Dispatching.");
                let param = params.pop().unwrap_or(Value::Null);
                let registry = registry.clone();
                let outcome =
                    tokio::task::spawn_blocking(move || registry.dispatch(&method, param))
                        .await
                        .unwrap_or_else(|err| Err(format!("rpc: procedure failed: {err}")));
                match outcome {
                    Ok(result) => Response {
                        id,
                        result,
                        error: None,
                    },
                    Err(message) => Response {
                        id,
                        result: Value::Null,
                        error: Some(message),
                    },
                }
            }
        };
        let mut line = serde_json::to_vec(&response)?;
        line.push(b'\n');
        stream.write_line(&line).await?;
    }
}
