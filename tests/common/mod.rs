#![allow(dead_code)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;

use atlantiplex_gateway::{build_server, GatewayConfig};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::HeaderValue;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpSocket, TcpStream};

/// Returns a port that was free a moment ago.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Port 1 on loopback: nothing listens there, so connects are refused.
pub fn closed_port() -> u16 {
    1
}

/// Binds a loopback port without listening on it.
///
/// Connects to the port are refused until the socket is turned into a
/// listener, and no other test can take the port in the meantime.
pub fn reserve_port() -> (TcpSocket, u16) {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let port = socket.local_addr().unwrap().port();
    (socket, port)
}

async fn echo(
    req: Request<Incoming>,
    label: &'static str,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().to_string();
    let path = req
        .uri()
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_default();
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    let host = header("host");
    let request_id = header("x-request-id");

    let body = req
        .into_body()
        .collect()
        .await
        .map(|b| b.to_bytes())
        .unwrap_or_default();

    if let Some(millis) = path
        .strip_prefix("/delay/")
        .and_then(|ms| ms.parse::<u64>().ok())
    {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }

    let status = path
        .strip_prefix("/status/")
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::OK);

    let payload = serde_json::json!({
        "backend": label,
        "method": method,
        "path": path,
        "host": host,
        "request_id": request_id,
        "body": String::from_utf8_lossy(&body),
    })
    .to_string();

    let mut response = Response::new(Full::new(Bytes::from(payload)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert("content-type", HeaderValue::from_static("application/json"));
    response
        .headers_mut()
        .insert("x-echo-backend", HeaderValue::from_static(label));
    Ok(response)
}

/// Spawns an upstream that answers with a JSON description of the request.
///
/// Paths of the form `/status/<code>` answer with that status code and
/// `/delay/<ms>` answers after sleeping that long.
pub async fn spawn_echo_backend(label: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    serve_echo(listener, label);
    port
}

/// Serves the echo upstream on an existing listener.
pub fn serve_echo(listener: TcpListener, label: &'static str) {
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                continue;
            };
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(
                        TokioIo::new(stream),
                        service_fn(move |req| echo(req, label)),
                    )
                    .await;
            });
        }
    });
}

/// Spawns an upstream that accepts connections and never answers.
pub async fn spawn_stalled_backend() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            if let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        }
    });

    port
}

/// Gateway configuration for tests: loopback listener on a fresh port,
/// active health checks off unless overridden.
pub fn test_config(vars: &[(&str, String)]) -> GatewayConfig {
    let mut map: HashMap<String, String> = HashMap::new();
    map.insert("HOST".to_string(), "127.0.0.1".to_string());
    map.insert("PORT".to_string(), free_port().to_string());
    map.insert("HEALTH_CHECK_ENABLED".to_string(), "false".to_string());
    for (key, value) in vars {
        map.insert(key.to_string(), value.clone());
    }
    GatewayConfig::from_lookup(|key| map.get(key).cloned()).unwrap()
}

/// Runs the gateway on a background thread and waits until it accepts
/// connections. Returns the listening port.
pub async fn spawn_gateway(config: GatewayConfig) -> u16 {
    let port = config.listen_addr.port();

    std::thread::spawn(move || {
        let server = build_server(&config).unwrap();
        server.run_forever();
    });

    wait_for_port(port).await;
    port
}

pub async fn wait_for_port(port: u16) {
    for _ in 0..100 {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("port {} never opened", port);
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

pub fn url(port: u16, path: &str) -> String {
    format!("http://127.0.0.1:{}{}", port, path)
}
