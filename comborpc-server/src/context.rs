//! Per-item dispatch state and the cooperative middleware chain.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// A middleware or method handler.
///
/// Middleware and handlers share one signature: they receive the item's [`Context`]
/// and may call [`Context::next`] to run the rest of the chain or
/// [`Context::abort`] to stop it.
pub type Handler = Arc<dyn Fn(&mut Context) + Send + Sync + 'static>;

/// Addresses of the connection a batch arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    pub remote_addr: SocketAddr,
    pub local_addr: SocketAddr,
}

/// State for one request item while it travels through its middleware chain.
///
/// A context is created fresh for every item and owned by that item's chain alone.
pub struct Context {
    method: String,
    input: Bytes,
    output: Vec<u8>,
    error: Option<String>,
    headers: Arc<HashMap<String, String>>,
    peer: Option<PeerInfo>,
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
    chain: Vec<Handler>,
    cursor: usize,
}

impl Context {
    pub fn new(
        method: impl Into<String>,
        input: Bytes,
        headers: Arc<HashMap<String, String>>,
        chain: Vec<Handler>,
    ) -> Self {
        Self {
            method: method.into(),
            input,
            output: Vec::new(),
            error: None,
            headers,
            peer: None,
            values: HashMap::new(),
            chain,
            cursor: 0,
        }
    }

    pub fn with_peer(mut self, peer: PeerInfo) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Runs the remainder of the chain.
    ///
    /// Each step advances a shared cursor, so a middleware that calls `next` wraps
    /// everything downstream of it. Once the chain is exhausted or aborted this is a no-op.
    pub fn next(&mut self) {
        while self.cursor < self.chain.len() {
            let step = Arc::clone(&self.chain[self.cursor]);
            self.cursor += 1;
            step(self);
        }
    }

    /// Stops the chain. Downstream middleware and the handler are skipped and the
    /// output written so far becomes the response.
    pub fn abort(&mut self) {
        self.cursor = self.chain.len() + 1;
    }

    pub fn is_aborted(&self) -> bool {
        self.cursor > self.chain.len()
    }

    /// Records an item-level error and aborts the chain.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.abort();
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn peer(&self) -> Option<PeerInfo> {
        self.peer
    }

    // =========================================================================
    // Input
    // =========================================================================

    pub fn input(&self) -> &[u8] {
        &self.input
    }

    /// Replaces the input seen by downstream middleware and the handler.
    pub fn set_input(&mut self, input: impl Into<Bytes>) {
        self.input = input.into();
    }

    pub fn read_string(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.input)
    }

    pub fn read_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.input)
    }

    pub fn read_yaml<T: DeserializeOwned>(&self) -> Result<T, serde_yaml::Error> {
        serde_yaml::from_slice(&self.input)
    }

    pub fn read_xml<T: DeserializeOwned>(&self) -> Result<T, quick_xml::DeError> {
        quick_xml::de::from_reader(self.input.as_ref())
    }

    // =========================================================================
    // Output
    // =========================================================================

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn write(&mut self, data: impl Into<Vec<u8>>) {
        self.output = data.into();
    }

    pub fn write_string(&mut self, data: impl Into<String>) {
        let data: String = data.into();
        self.output = data.into_bytes();
    }

    pub fn write_json<T: Serialize>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        self.output = serde_json::to_vec(value)?;
        Ok(())
    }

    pub fn write_yaml<T: Serialize>(&mut self, value: &T) -> Result<(), serde_yaml::Error> {
        self.output = serde_yaml::to_string(value)?.into_bytes();
        Ok(())
    }

    /// Writes `value` as XML, with the root element named after the type.
    pub fn write_xml<T: Serialize>(&mut self, value: &T) -> Result<(), quick_xml::SeError> {
        self.output = quick_xml::se::to_string(value)?.into_bytes();
        Ok(())
    }

    // =========================================================================
    // Values shared between middleware of this one invocation
    // =========================================================================

    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    /// Consumes the context, yielding `(error, output)`.
    pub(crate) fn finish(self) -> (Option<String>, Vec<u8>) {
        (self.error, self.output)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.method)
            .field("input_len", &self.input.len())
            .field("output_len", &self.output.len())
            .field("error", &self.error)
            .field("cursor", &self.cursor)
            .field("chain_len", &self.chain.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str, call_next: bool) -> Handler {
        let log = log.clone();
        Arc::new(move |ctx: &mut Context| {
            log.lock().push(format!("{}-before", name));
            if call_next {
                ctx.next();
                log.lock().push(format!("{}-after", name));
            }
        })
    }

    fn context(chain: Vec<Handler>) -> Context {
        Context::new("test", Bytes::from_static(b"in"), Arc::default(), chain)
    }

    #[test]
    fn test_middleware_wraps_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler_log = log.clone();
        let chain = vec![
            recorder(&log, "m1", true),
            recorder(&log, "m2", true),
            Arc::new(move |_: &mut Context| handler_log.lock().push("h".to_string())) as Handler,
        ];

        let mut ctx = context(chain);
        ctx.next();

        assert_eq!(
            *log.lock(),
            vec!["m1-before", "m2-before", "h", "m2-after", "m1-after"]
        );
    }

    #[test]
    fn test_middleware_without_next_still_continues() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![recorder(&log, "m1", false), recorder(&log, "h", false)];

        let mut ctx = context(chain);
        ctx.next();

        assert_eq!(*log.lock(), vec!["m1-before", "h-before"]);
    }

    #[test]
    fn test_abort_skips_downstream() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![
            Arc::new(|ctx: &mut Context| {
                ctx.write_string("denied");
                ctx.abort();
            }) as Handler,
            recorder(&log, "m2", true),
            recorder(&log, "h", false),
        ];

        let mut ctx = context(chain);
        ctx.next();

        assert!(ctx.is_aborted());
        assert!(log.lock().is_empty());
        assert_eq!(ctx.output(), b"denied");
        assert!(ctx.error().is_none());
    }

    #[test]
    fn test_next_after_exhaustion_is_noop() {
        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();
        let chain = vec![Arc::new(move |_: &mut Context| *counter.lock() += 1) as Handler];

        let mut ctx = context(chain);
        ctx.next();
        ctx.next();
        ctx.next();

        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_repeated_next_advances_cursor() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![
            Arc::new(|ctx: &mut Context| {
                ctx.next();
                ctx.next();
            }) as Handler,
            recorder(&log, "m2", false),
            recorder(&log, "h", false),
        ];

        let mut ctx = context(chain);
        ctx.next();

        assert_eq!(*log.lock(), vec!["m2-before", "h-before"]);
    }

    #[test]
    fn test_fail_records_error_and_aborts() {
        let chain = vec![
            Arc::new(|ctx: &mut Context| ctx.fail("bad input")) as Handler,
            Arc::new(|ctx: &mut Context| ctx.write_string("unreachable")) as Handler,
        ];

        let mut ctx = context(chain);
        ctx.next();

        assert_eq!(ctx.error(), Some("bad input"));
        assert!(ctx.output().is_empty());
    }

    #[test]
    fn test_shared_values() {
        let chain = vec![
            Arc::new(|ctx: &mut Context| {
                ctx.set("user", "alice".to_string());
                ctx.next();
            }) as Handler,
            Arc::new(|ctx: &mut Context| {
                let user = ctx.get::<String>("user").cloned().unwrap_or_default();
                ctx.write_string(format!("hello {}", user));
            }) as Handler,
        ];

        let mut ctx = context(chain);
        ctx.next();

        assert_eq!(ctx.output(), b"hello alice");
        assert!(ctx.get::<u32>("user").is_none());
        assert!(ctx.remove("user"));
    }

    #[test]
    fn test_json_io() {
        let mut ctx = Context::new(
            "sum",
            Bytes::from_static(br#"[1,2,3]"#),
            Arc::new(HashMap::from([("k".to_string(), "v".to_string())])),
            Vec::new(),
        );
        let numbers: Vec<i64> = ctx.read_json().unwrap();
        ctx.write_json(&numbers.iter().sum::<i64>()).unwrap();

        assert_eq!(ctx.output(), b"6");
        assert_eq!(ctx.header("k"), Some("v"));
        assert_eq!(ctx.read_string().unwrap(), "[1,2,3]");
    }

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn test_xml_io() {
        let mut ctx = Context::new(
            "flip",
            Bytes::from_static(b"<Point><x>1</x><y>2</y></Point>"),
            Arc::new(HashMap::new()),
            Vec::new(),
        );
        let p: Point = ctx.read_xml().unwrap();
        ctx.write_xml(&Point { x: p.y, y: p.x }).unwrap();
        assert_eq!(ctx.output(), b"<Point><x>2</x><y>1</y></Point>");

        let bad = Context::new(
            "flip",
            Bytes::from_static(b"<Point>"),
            Arc::new(HashMap::new()),
            Vec::new(),
        );
        assert!(bad.read_xml::<Point>().is_err());
    }
}
