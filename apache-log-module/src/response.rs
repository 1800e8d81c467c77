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

//! Response writing capability and the wrapper observing it

use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use std::fmt::{Debug, Formatter};
use std::io;

/// Optional operations supported by a [`ResponseWriter`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// `flush()` sends buffered body data to the client immediately
    pub flush: bool,
}

fn unsupported_flush() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "response writer cannot flush")
}

/// The server’s means of producing a response
pub trait ResponseWriter: Send {
    /// Response headers
    fn headers(&self) -> &HeaderMap;

    /// Response headers, these can only be changed before the status is written
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Sends the status line and headers
    fn write_header(&mut self, status: StatusCode);

    /// Writes body data, returns the number of bytes accepted
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Optional operations this writer supports
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Sends buffered body data to the client, only available if [`Capabilities::flush`] is set
    fn flush(&mut self) -> io::Result<()> {
        Err(unsupported_flush())
    }
}

/// Writes all of `data`, retrying partial writes
pub fn write_all(writer: &mut (impl ResponseWriter + ?Sized), mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        match writer.write(data) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed writing response body",
                ))
            }
            Ok(written) => data = &data[written..],
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Wraps a response writer, recording the status and the number of body bytes
///
/// Capabilities of the inner writer are checked once on creation. Flushing is passed through
/// immediately if the inner writer supports it, nothing is buffered here.
pub struct ObservingWriter<'a> {
    inner: &'a mut dyn ResponseWriter,
    capabilities: Capabilities,
    status: Option<StatusCode>,
    bytes_written: u64,
}

impl<'a> ObservingWriter<'a> {
    /// Wraps `inner`
    pub fn new(inner: &'a mut dyn ResponseWriter) -> Self {
        let capabilities = inner.capabilities();
        Self {
            inner,
            capabilities,
            status: None,
            bytes_written: 0,
        }
    }

    /// Status sent to the client, 200 if none has been sent yet
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    /// Number of body bytes accepted by the inner writer
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl Debug for ObservingWriter<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservingWriter")
            .field("capabilities", &self.capabilities)
            .field("status", &self.status)
            .field("bytes_written", &self.bytes_written)
            .finish_non_exhaustive()
    }
}

impl ResponseWriter for ObservingWriter<'_> {
    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write_header(&mut self, status: StatusCode) {
        // Only the first status reaches the client
        self.status.get_or_insert(status);
        self.inner.write_header(status);
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.status.get_or_insert(StatusCode::OK);
        let written = self.inner.write(data)?;
        self.bytes_written += written as u64;
        Ok(written)
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.capabilities.flush {
            self.inner.flush()
        } else {
            Err(unsupported_flush())
        }
    }
}

/// A [`ResponseWriter`] keeping the response in memory
#[derive(Debug, Default, Clone)]
pub struct ResponseRecorder {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
    flushable: bool,
    flushed: Vec<usize>,
}

impl ResponseRecorder {
    /// Creates a recorder that doesn’t support flushing
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a recorder that supports flushing
    pub fn flushable() -> Self {
        Self {
            flushable: true,
            ..Default::default()
        }
    }

    /// The status written, if any
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Body data written so far
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body length at the time of each flush
    pub fn flushed(&self) -> &[usize] {
        &self.flushed
    }

    /// Converts the recorded data into a response
    pub fn into_response(self) -> Response<Bytes> {
        let mut response = Response::new(Bytes::from(self.body));
        *response.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = self.headers;
        response
    }
}

impl ResponseWriter for ResponseRecorder {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        self.status.get_or_insert(status);
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.status.get_or_insert(StatusCode::OK);
        self.body.extend_from_slice(data);
        Ok(data.len())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            flush: self.flushable,
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.flushable {
            self.flushed.push(self.body.len());
            Ok(())
        } else {
            Err(unsupported_flush())
        }
    }
}
