// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Request handlers and the access logging middleware

use async_trait::async_trait;
use bytes::Bytes;
use http::Request;
use log::error;
use std::io;
use std::sync::Arc;

use crate::context::{Clock, LogContext, SystemClock};
use crate::error::CompileError;
use crate::format::LogFormat;
use crate::pool::{Pooled, BUFFERS, CONTEXTS};
use crate::response::{ObservingWriter, ResponseWriter};
use crate::writer::LogSink;

/// Produces the response for a request
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handles one request, the response is produced through `response`
    async fn handle(&self, request: &Request<Bytes>, response: &mut dyn ResponseWriter);
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn handle(&self, request: &Request<Bytes>, response: &mut dyn ResponseWriter) {
        (**self).handle(request, response).await
    }
}

/// An access logger: a compiled format and the sink its lines go to
#[derive(Debug, Clone)]
pub struct AccessLog {
    format: Arc<LogFormat>,
    sink: LogSink,
    clock: Arc<dyn Clock>,
}

impl AccessLog {
    /// Compiles `pattern` and logs to `sink`
    pub fn new(pattern: &str, sink: LogSink) -> Result<Self, CompileError> {
        Ok(Self::with_format(Arc::new(LogFormat::compile(pattern)?), sink))
    }

    /// Uses an already compiled format and logs to `sink`
    pub fn with_format(format: Arc<LogFormat>, sink: LogSink) -> Self {
        Self {
            format,
            sink,
            clock: Arc::new(SystemClock),
        }
    }

    /// Common Log Format written to standard error
    pub fn common() -> Self {
        Self::with_format(LogFormat::common(), LogSink::stderr())
    }

    /// Combined Log Format written to standard error
    pub fn combined() -> Self {
        Self::with_format(LogFormat::combined(), LogSink::stderr())
    }

    /// Replaces the sink
    pub fn with_output(mut self, sink: LogSink) -> Self {
        self.sink = sink;
        self
    }

    /// Replaces the source of request and response times
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The compiled format
    pub fn format(&self) -> &LogFormat {
        &self.format
    }

    /// The sink log lines are written to
    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    /// Wraps `handler`, logging one line for each request it handles
    pub fn wrap<H: Handler>(&self, handler: H) -> AccessLogHandler<H> {
        AccessLogHandler {
            log: self.clone(),
            inner: handler,
        }
    }

    /// Renders a finalized context and writes the line to the sink
    pub fn log_line(&self, ctx: &LogContext) -> io::Result<()> {
        if !self.sink.is_enabled() {
            return Ok(());
        }

        let mut buf = BUFFERS.acquire();
        self.format.render(&mut *buf, ctx)?;
        self.sink.write_line(&buf)
    }
}

/// A handler that writes an access log line for each request processed by the inner handler
#[derive(Debug, Clone)]
pub struct AccessLogHandler<H> {
    log: AccessLog,
    inner: H,
}

impl<H> AccessLogHandler<H> {
    /// The access logger
    pub fn log(&self) -> &AccessLog {
        &self.log
    }

    /// The wrapped handler
    pub fn inner(&self) -> &H {
        &self.inner
    }
}

#[async_trait]
impl<H: Handler> Handler for AccessLogHandler<H> {
    async fn handle(&self, request: &Request<Bytes>, response: &mut dyn ResponseWriter) {
        let mut guard = LogGuard::new(&self.log, request, response);
        self.inner.handle(request, &mut guard.writer).await;
    }
}

/// Logs the request when dropped
///
/// This happens when the handler returns, but also if it panics or the request future is
/// dropped before completion. The line then contains whatever was observed up to that point.
struct LogGuard<'a> {
    log: &'a AccessLog,
    ctx: Pooled<'static, LogContext>,
    writer: ObservingWriter<'a>,
}

impl<'a> LogGuard<'a> {
    fn new(
        log: &'a AccessLog,
        request: &Request<Bytes>,
        response: &'a mut dyn ResponseWriter,
    ) -> Self {
        let mut ctx = CONTEXTS.acquire();
        ctx.begin(request, log.clock.now());
        Self {
            log,
            ctx,
            writer: ObservingWriter::new(response),
        }
    }
}

impl Drop for LogGuard<'_> {
    fn drop(&mut self) {
        if !self.log.sink.is_enabled() {
            return;
        }

        self.ctx.finalize(
            self.log.clock.now(),
            self.writer.status(),
            self.writer.bytes_written(),
            self.writer.headers(),
        );
        if let Err(err) = self.log.log_line(&self.ctx) {
            error!("Failed writing access log line: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use http::StatusCode;
    use std::io::Write;
    use std::sync::Mutex;
    use std::time::{Duration, SystemTime};
    use test_log::test;

    use crate::response::{write_all, ResponseRecorder};

    #[derive(Debug, Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct FixedClock;

    impl Clock for FixedClock {
        fn now(&self) -> SystemTime {
            SystemTime::UNIX_EPOCH + Duration::from_secs(60)
        }
    }

    struct NotFound;

    #[async_trait]
    impl Handler for NotFound {
        async fn handle(&self, _request: &Request<Bytes>, response: &mut dyn ResponseWriter) {
            response.write_header(StatusCode::NOT_FOUND);
            write_all(response, b"not found").unwrap();
        }
    }

    #[test]
    fn log_line() {
        let buffer = SharedBuffer::default();
        let log = AccessLog::new("%m %U %s %b", LogSink::from_writer(buffer.clone())).unwrap();

        let request = Request::builder().uri("/index.html").body(()).unwrap();
        let mut ctx = LogContext::new();
        ctx.begin(&request, SystemTime::now());
        log.log_line(&ctx).unwrap();
        log.log_line(&ctx).unwrap();
        assert_eq!(buffer.contents(), "GET /index.html 200 -\nGET /index.html 200 -\n");

        let log = log.with_output(LogSink::disabled());
        assert!(log.log_line(&ctx).is_ok());
    }

    #[test]
    fn presets() {
        let log = AccessLog::combined();
        assert!(Arc::ptr_eq(&log.format, &LogFormat::combined()));
        assert!(log.sink().is_enabled());
        assert_eq!(*AccessLog::common().format(), *LogFormat::common());
        assert!(AccessLog::new("%P", LogSink::disabled()).is_err());
    }

    #[test(tokio::test)]
    async fn shared_handler() {
        let buffer = SharedBuffer::default();
        let log = AccessLog::new("%>s %b %{sec}t", LogSink::from_writer(buffer.clone()))
            .unwrap()
            .with_clock(Arc::new(FixedClock));
        let handler = Arc::new(log.wrap(NotFound));
        assert!(handler.log().sink().is_enabled());

        let request = Request::new(Bytes::new());
        let mut response = ResponseRecorder::new();
        handler.handle(&request, &mut response).await;

        assert_eq!(response.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(response.body(), b"not found");
        assert_eq!(buffer.contents(), "404 9 60\n");
    }
}
