//! Client against a live server on a loopback port.

use comborpc_client::{
    Client, ClientConfig, ClientError, Codec, Compression, Request, RequestBatch, RoundRobin,
    WireFormat,
};
use comborpc_protocol::NO_METHOD_FOUND;
use comborpc_server::{builtin, Context, Router, Server, ServerConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Call log written by middleware in the server under test.
#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    fn push(&self, entry: &str) {
        self.0.lock().push(entry.to_string());
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock())
    }
}

fn router(log: Recorder) -> Router {
    let m1 = log.clone();
    let m2 = log.clone();
    let h = log;
    builtin::register(Router::builder())
        .use_middleware(move |ctx: &mut Context| {
            if ctx.method() != "traced" {
                ctx.next();
                return;
            }
            m1.push("M1-before");
            ctx.next();
            m1.push("M1-after");
        })
        .use_middleware(move |ctx: &mut Context| {
            if ctx.header("deny").is_some() {
                ctx.write_string("denied");
                ctx.abort();
                return;
            }
            if ctx.method() != "traced" {
                ctx.next();
                return;
            }
            m2.push("M2-before");
            ctx.next();
            m2.push("M2-after");
        })
        .register("traced", move |ctx| {
            h.push("H");
            ctx.write_string("traced");
        })
        .register("upper", |ctx| {
            let text = ctx.read_string().unwrap_or_default().to_uppercase();
            ctx.write_string(text);
        })
        .register("sum", |ctx| match ctx.read_json::<Vec<i64>>() {
            Ok(numbers) => {
                let _ = ctx.write_json(&numbers.iter().sum::<i64>());
            }
            Err(e) => ctx.fail(e.to_string()),
        })
        .register("boom", |_| panic!("exploded"))
        .register("stall", |ctx| {
            std::thread::sleep(Duration::from_millis(300));
            ctx.write_string("late");
        })
        .register("tenant", |ctx| {
            let tenant = ctx.header("tenant").unwrap_or("none").to_string();
            ctx.write_string(tenant);
        })
        .build()
}

async fn start_server(wire: WireFormat, log: Recorder) -> (Server, String) {
    let config = ServerConfig::new("127.0.0.1:0".parse().unwrap())
        .with_timeout(Duration::from_secs(5))
        .with_workers(4)
        .with_wire(wire);
    let server = Server::new(config, router(log));
    let addr = server.start().await.unwrap();
    (server, addr.to_string())
}

async fn shutdown(server: Server) {
    server.stop();
    server.closed().await;
}

fn client(endpoints: Vec<String>, wire: WireFormat) -> Client {
    Client::new(
        ClientConfig::new(endpoints)
            .with_timeout(Duration::from_secs(5))
            .with_wire(wire),
    )
}

#[tokio::test]
async fn combo_call_returns_aligned_responses() {
    let (server, addr) = start_server(WireFormat::default(), Recorder::default()).await;
    let client = client(vec![addr], WireFormat::default());

    let requests: Vec<Request> = (0..20)
        .map(|i| Request::text("upper", format!("item-{}", i)))
        .collect();
    let responses = client.call(&RequestBatch::new(requests)).await.unwrap();

    assert_eq!(responses.len(), 20);
    for (i, response) in responses.iter().enumerate() {
        assert!(response.is_ok());
        assert_eq!(response.text(), format!("ITEM-{}", i));
    }
    shutdown(server).await;
}

#[tokio::test]
async fn missing_method_and_panic_are_item_errors() {
    let (server, addr) = start_server(WireFormat::default(), Recorder::default()).await;
    let client = client(vec![addr], WireFormat::default());

    let responses = client
        .combo()
        .add_text_request("upper", "a")
        .add_text_request("nope", "b")
        .add_text_request("boom", "c")
        .add_json_request("sum", &[1, 2, 3])
        .unwrap()
        .call()
        .await
        .unwrap();

    assert_eq!(responses[0].text(), "A");
    assert_eq!(responses[1].error, NO_METHOD_FOUND);
    assert!(responses[2].is_error());
    assert!(responses[2].error.contains("exploded"));
    assert_eq!(responses[3].parse_json::<i64>().unwrap(), 6);
    assert!(responses[2].parse_json::<i64>().is_err());
    shutdown(server).await;
}

#[tokio::test]
async fn single_endpoint_is_always_selected() {
    let (server, addr) = start_server(WireFormat::default(), Recorder::default()).await;
    let client = client(vec![addr], WireFormat::default());

    for _ in 0..10 {
        let response = client
            .call_one(Request::text(builtin::PING, ""))
            .await
            .unwrap();
        assert_eq!(response.text(), "pong");
    }
    assert_eq!(
        server.stats().connections_total.load(std::sync::atomic::Ordering::Relaxed),
        10
    );
    shutdown(server).await;
}

#[tokio::test]
async fn broadcast_isolates_unreachable_endpoint() {
    let (server, reachable) = start_server(WireFormat::default(), Recorder::default()).await;
    let unreachable = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };

    let client = client(
        vec![reachable.clone(), unreachable.clone()],
        WireFormat::default(),
    );
    let results = client
        .single()
        .set_text_request(builtin::ECHO, "hi")
        .broadcast()
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].endpoint, reachable);
    assert!(results[0].is_ok());
    assert_eq!(results[0].responses().unwrap()[0].text(), "hi");
    assert_eq!(results[1].endpoint, unreachable);
    assert!(results[1].error().is_some());
    shutdown(server).await;
}

#[tokio::test]
async fn broadcast_reaches_every_server() {
    let (a, addr_a) = start_server(WireFormat::default(), Recorder::default()).await;
    let (b, addr_b) = start_server(WireFormat::default(), Recorder::default()).await;

    let client = client(vec![addr_a, addr_b], WireFormat::default())
        .with_load_balance(RoundRobin::new());
    let results = client
        .combo()
        .add_text_request(builtin::PING, "")
        .add_text_request(builtin::ECHO, "x")
        .broadcast()
        .await
        .unwrap();

    assert!(results.iter().all(|r| r.is_ok()));
    assert!(results
        .iter()
        .all(|r| r.responses().unwrap()[0].text() == "pong"));
    shutdown(a).await;
    shutdown(b).await;
}

#[tokio::test]
async fn empty_batch_makes_no_connection_attempt() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let client = client(vec![addr], WireFormat::default());

    let err = client.combo().call().await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));

    let accepted = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(accepted.is_err(), "client must not dial on validation failure");
}

#[tokio::test]
async fn middleware_wraps_handler_in_order() {
    let log = Recorder::default();
    let (server, addr) = start_server(WireFormat::default(), log.clone()).await;
    let client = client(vec![addr], WireFormat::default());

    let response = client.call_one(Request::text("traced", "")).await.unwrap();
    assert_eq!(response.text(), "traced");
    assert_eq!(
        log.take(),
        vec!["M1-before", "M2-before", "H", "M2-after", "M1-after"]
    );
    shutdown(server).await;
}

#[tokio::test]
async fn abort_skips_handler() {
    let log = Recorder::default();
    let (server, addr) = start_server(WireFormat::default(), log.clone()).await;
    let client = client(vec![addr], WireFormat::default());

    let response = client
        .single()
        .set_text_request("traced", "")
        .header("deny", "1")
        .call()
        .await
        .unwrap();

    assert!(response.is_ok());
    assert_eq!(response.text(), "denied");
    assert_eq!(log.take(), vec!["M1-before", "M1-after"]);
    shutdown(server).await;
}

#[tokio::test]
async fn headers_reach_every_item() {
    let (server, addr) = start_server(WireFormat::default(), Recorder::default()).await;
    let client = client(vec![addr], WireFormat::default());

    let responses = client
        .combo()
        .header("tenant", "acme")
        .add_text_request("tenant", "")
        .add_text_request("tenant", "")
        .call()
        .await
        .unwrap();
    assert!(responses.iter().all(|r| r.text() == "acme"));
    shutdown(server).await;
}

#[tokio::test]
async fn alternative_wire_formats() {
    for wire in [
        WireFormat::new(Codec::Bincode, Compression::Gzip),
        WireFormat::new(Codec::Yaml, Compression::None),
        WireFormat::new(Codec::Json, Compression::None),
    ] {
        let (server, addr) = start_server(wire, Recorder::default()).await;
        let client = client(vec![addr], wire);

        let payload = vec![0u8, 1, 2, 254, 255];
        let responses = client
            .combo()
            .add_request(Request::new(builtin::ECHO, payload.clone()))
            .add_request(Request::new(builtin::ECHO, Vec::<u8>::new()))
            .call()
            .await
            .unwrap();
        assert_eq!(responses[0].data.as_ref(), payload.as_slice());
        assert!(responses[1].data.is_empty());
        shutdown(server).await;
    }
}

#[tokio::test]
async fn mismatched_wire_format_fails_call() {
    let (server, addr) = start_server(WireFormat::default(), Recorder::default()).await;
    let client = client(
        vec![addr],
        WireFormat::new(Codec::Bincode, Compression::None),
    );

    let err = client
        .call_one(Request::text(builtin::PING, ""))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)));
    shutdown(server).await;
}

#[tokio::test]
async fn stopped_server_refuses_calls() {
    let (server, addr) = start_server(WireFormat::default(), Recorder::default()).await;
    let client = client(vec![addr], WireFormat::default());
    shutdown(server).await;

    let err = client
        .call_one(Request::text(builtin::PING, ""))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn unbounded_client_timeout_still_calls() {
    let (server, addr) = start_server(WireFormat::default(), Recorder::default()).await;
    let client = Client::new(ClientConfig::new(vec![addr]).with_timeout(Duration::MAX));

    let response = client
        .call_one(Request::text(builtin::PING, ""))
        .await
        .unwrap();
    assert_eq!(response.text(), "pong");
    shutdown(server).await;
}

#[tokio::test]
async fn handler_past_server_deadline_is_retryable() {
    let config = ServerConfig::new("127.0.0.1:0".parse().unwrap())
        .with_timeout(Duration::from_millis(100))
        .with_workers(1);
    let server = Server::new(config, router(Recorder::default()));
    let addr = server.start().await.unwrap().to_string();
    let client = client(vec![addr], WireFormat::default());

    let err = client
        .call_one(Request::text("stall", ""))
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let response = client
        .call_one(Request::text(builtin::PING, ""))
        .await
        .unwrap();
    assert_eq!(response.text(), "pong");
    shutdown(server).await;
}
