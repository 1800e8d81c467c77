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

//! Per-request data an access log line is rendered from

use http::{header, HeaderMap, Method, Request, StatusCode, Uri, Version};
use std::fmt::Debug;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

use crate::pool::Recycle;

/// Address of the client that sent a request
///
/// The server stores this in the request extensions, it is what `%h` renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientAddr(pub SocketAddr);

/// Source of the current time
pub trait Clock: Send + Sync + Debug {
    /// Returns the current time
    fn now(&self) -> SystemTime;
}

/// [`Clock`] implementation returning the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// The fields of one request that a log line can reference
///
/// Request data is copied into storage owned by the context. Header maps are cleared rather than
/// replaced, so a context taken from the pool keeps its allocations and copying a request
/// doesn't allocate in the steady state.
#[derive(Debug, Clone)]
pub struct LogContext {
    method: Method,
    uri: Uri,
    version: Version,
    request_headers: HeaderMap,
    client_addr: Option<SocketAddr>,
    request_time: Option<SystemTime>,
    response_time: Option<SystemTime>,
    elapsed: Duration,
    status: StatusCode,
    response_headers: HeaderMap,
    content_length: u64,
}

impl Default for LogContext {
    fn default() -> Self {
        Self {
            method: Method::GET,
            uri: Uri::default(),
            version: Version::HTTP_11,
            request_headers: HeaderMap::new(),
            client_addr: None,
            request_time: None,
            response_time: None,
            elapsed: Duration::ZERO,
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            content_length: 0,
        }
    }
}

fn copy_headers(target: &mut HeaderMap, source: &HeaderMap) {
    target.clear();
    for (name, value) in source {
        target.append(name.clone(), value.clone());
    }
}

impl LogContext {
    /// Creates an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures the request as it was received at time `now`
    ///
    /// Status is set to 200, the implicit status of a response where the handler never sets one.
    pub fn begin<B>(&mut self, request: &Request<B>, now: SystemTime) {
        self.method.clone_from(request.method());
        self.uri.clone_from(request.uri());
        self.version = request.version();
        copy_headers(&mut self.request_headers, request.headers());
        self.client_addr = request.extensions().get::<ClientAddr>().map(|addr| addr.0);
        self.request_time = Some(now);
        self.status = StatusCode::OK;
    }

    /// Fixes the response data once the handler is done
    pub fn finalize(
        &mut self,
        now: SystemTime,
        status: StatusCode,
        content_length: u64,
        response_headers: &HeaderMap,
    ) {
        self.response_time = Some(now);
        self.elapsed = self
            .request_time
            .and_then(|start| now.duration_since(start).ok())
            .unwrap_or_default();
        self.status = status;
        self.content_length = content_length;
        copy_headers(&mut self.response_headers, response_headers);
    }

    /// Resets all fields to their initial values, keeping allocated header storage
    pub fn reset(&mut self) {
        self.method = Method::GET;
        self.uri = Uri::default();
        self.version = Version::HTTP_11;
        self.request_headers.clear();
        self.client_addr = None;
        self.request_time = None;
        self.response_time = None;
        self.elapsed = Duration::ZERO;
        self.status = StatusCode::OK;
        self.response_headers.clear();
        self.content_length = 0;
    }

    /// Request method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request URI
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// HTTP version of the request
    pub fn version(&self) -> Version {
        self.version
    }

    /// Request headers
    pub fn request_headers(&self) -> &HeaderMap {
        &self.request_headers
    }

    /// Client address if the server supplied one
    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.client_addr
    }

    /// Time the request was received
    pub fn request_time(&self) -> Option<SystemTime> {
        self.request_time
    }

    /// Time the response was finalized
    pub fn response_time(&self) -> Option<SystemTime> {
        self.response_time
    }

    /// Time between receiving the request and finalizing the response, zero if not measured
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Response status
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers
    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// Number of response body bytes sent
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// The requested host: `Host` header or the authority of an absolute URI
    pub fn host(&self) -> Option<&str> {
        self.request_headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| self.uri.host())
    }

    /// User name from the userinfo part of the URI
    pub fn username(&self) -> Option<&str> {
        let (userinfo, _) = self.uri.authority()?.as_str().rsplit_once('@')?;
        let name = userinfo.split_once(':').map_or(userinfo, |(name, _)| name);
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}

impl Recycle for LogContext {
    fn recycle(&mut self) {
        self.reset();
    }
}
