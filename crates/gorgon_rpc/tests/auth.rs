use {
    gorgon_rpc::{
        auth_client, auth_server, serve_connection, BlockingClient, BufferedStream, Error,
        Registry, RpcClient, Service, HANDSHAKE_LINE_LIMIT,
    },
    serde_json::Value,
    tokio::io::{duplex, AsyncWriteExt},
};

struct Upper;

impl Service for Upper {
    fn name(&self) -> &'static str {
        "Upper"
    }

    fn call(&self, method: &str, param: Value) -> Result<Value, String> {
        match (method, param) {
            ("Apply", Value::String(s)) => Ok(Value::String(s.to_uppercase())),
            (method, _) => Err(format!("rpc: can't find method Upper.{method}")),
        }
    }
}

#[tokio::test]
async fn matching_keys_authenticate_both_sides() {
    let (a, b) = duplex(4096);
    let server = tokio::spawn(async move {
        let mut stream = BufferedStream::new(b);
        auth_server(&mut stream, b"shared secret").await
    });
    let mut stream = BufferedStream::new(a);
    auth_client(&mut stream, b"shared secret").await.unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn mismatched_keys_fail_with_tag_mismatch_on_both_sides() {
    let (a, b) = duplex(4096);
    let server = tokio::spawn(async move {
        let mut stream = BufferedStream::new(b);
        let result = auth_server(&mut stream, b"server secret").await;
        // Nothing after a failed handshake may be served.
        let registry = Registry::new().register(Upper);
        if result.is_err() {
            return result;
        }
        serve_connection(stream, &registry).await
    });
    let mut stream = BufferedStream::new(a);
    let client_err = auth_client(&mut stream, b"client secret").await.unwrap_err();
    let server_err = server.await.unwrap().unwrap_err();
    assert!(matches!(client_err, Error::InvalidClientTag), "{client_err}");
    assert!(matches!(server_err, Error::InvalidClientTag), "{server_err}");
    assert!(client_err.is_tag_mismatch());
    assert!(server_err.is_tag_mismatch());

    let mut client = RpcClient::new(stream);
    assert!(client
        .call::<_, Value>("Upper.Apply", "no")
        .await
        .is_err());
}

#[tokio::test]
async fn malformed_first_message_is_an_unexpected_request() {
    for first in [
        &b"{\"method\":\"gorgon.auth0\"\n"[..],
        &b"{\"method\":\"gorgon.auth0\",\"params\":[]}\n"[..],
        &b"{\"method\":\"gorgon.auth0\",\"params\":[\"a\",\"b\"]}\n"[..],
        &b"not json\n"[..],
    ] {
        let (a, b) = duplex(4096);
        let server = tokio::spawn(async move {
            let mut stream = BufferedStream::new(b);
            auth_server(&mut stream, b"key").await
        });
        let mut client = BufferedStream::new(a);
        client.write_line(first).await.unwrap();
        let reply = client.read_line(HANDSHAKE_LINE_LIMIT).await.unwrap();
        let reply: Value = serde_json::from_slice(&reply).unwrap();
        assert_eq!(reply["error"], "jrpc: unexpected request");
        assert!(reply["result"].is_null());
        assert!(matches!(server.await.unwrap(), Err(Error::UnexpectedRequest)));
    }
}

#[tokio::test]
async fn truncated_first_message_is_an_unexpected_request() {
    let (mut a, b) = duplex(4096);
    let server = tokio::spawn(async move {
        let mut stream = BufferedStream::new(b);
        auth_server(&mut stream, b"key").await
    });
    a.write_all(b"{\"method\":\"gorgon.au").await.unwrap();
    a.shutdown().await.unwrap();
    assert!(matches!(server.await.unwrap(), Err(Error::UnexpectedRequest)));

    let mut client = BufferedStream::new(a);
    let reply = client.read_line(HANDSHAKE_LINE_LIMIT).await.unwrap();
    let reply: Value = serde_json::from_slice(&reply).unwrap();
    assert_eq!(reply["error"], "jrpc: unexpected request");
}

#[tokio::test]
async fn oversized_handshake_line_is_fatal() {
    let (a, b) = duplex(4 * HANDSHAKE_LINE_LIMIT);
    let server = tokio::spawn(async move {
        let mut stream = BufferedStream::new(b);
        auth_server(&mut stream, b"key").await
    });
    let mut client = BufferedStream::new(a);
    client
        .write_line(&vec![b'{'; 2 * HANDSHAKE_LINE_LIMIT])
        .await
        .unwrap();
    assert!(matches!(server.await.unwrap(), Err(Error::LineTooLong)));
}

#[tokio::test]
async fn authenticated_stream_carries_rpc() {
    let (a, b) = duplex(4096);
    tokio::spawn(async move {
        let registry = Registry::new().register(Upper);
        gorgon_rpc::handle_connection(b, "pipe", b"key", &registry).await;
    });
    let mut stream = BufferedStream::new(a);
    auth_client(&mut stream, b"key").await.unwrap();
    let mut client = RpcClient::new(stream);
    let reply: String = client.call("Upper.Apply", "quiet").await.unwrap();
    assert_eq!(reply, "QUIET");
    let err = client.call::<_, Value>("Upper.Other", "x").await.unwrap_err();
    assert!(matches!(err, Error::Remote(_)));
}

#[test]
fn blocking_client_talks_to_tcp_listener() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let rt = tokio::runtime::Runtime::new().unwrap();
    let listener = rt
        .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
        .unwrap();
    let address = listener.local_addr().unwrap().to_string();
    rt.spawn(async move {
        let registry = Registry::new().register(Upper);
        let _ = gorgon_rpc::serve(listener, b"password", registry).await;
    });

    let mut client = BlockingClient::dial(&address, b"password").unwrap();
    let reply: String = client.call("Upper.Apply", "tcp").unwrap();
    assert_eq!(reply, "TCP");

    let err = BlockingClient::dial(&address, b"wrong").err().unwrap();
    assert!(err.is_tag_mismatch(), "{err}");
}
