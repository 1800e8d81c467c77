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

//! # Apache Log Module
//!
//! This crate writes access logs in formats defined by
//! [Apache `LogFormat` patterns](https://httpd.apache.org/docs/current/mod/mod_log_config.html#formats),
//! e.g. the [Common Log Format](https://en.wikipedia.org/wiki/Common_Log_Format). Patterns are
//! compiled once, each request then only walks the list of compiled directives. A configuration
//! could look like this:
//!
//! ```yaml
//! log_file: access.log
//! log_format: '%h %l %u %t "%r" %>s %b %D'
//! ```
//!
//! Both fields are also available as `--log-file` and `--log-format` command line options.
//!
//! The `log_format` setting accepts `common` and `combined` for the respective standard formats,
//! the Combined Log Format is used if it is omitted. See [`LogFormat`] for the supported
//! directives. `log_file` can be empty to disable logging or `-` to write to standard output. A
//! log file will be created if necessary, data in already existing files will be kept.
//!
//! This module will add one line per request to the log file. The line is written once the
//! handler is done, even if it panics or the request is cancelled.
//!
//! ## Code example
//!
//! [`AccessLog::wrap`] puts the access logger in front of any [`Handler`]. The server is
//! expected to call the resulting handler for each request, with the client address stored as
//! [`ClientAddr`] in the request extensions.
//!
//! ```rust
//! use apache_log_module::{write_all, AccessLog, AccessLogConf, Handler, ResponseWriter};
//! use async_trait::async_trait;
//! use bytes::Bytes;
//! use http::Request;
//!
//! #[derive(Debug)]
//! struct Hello;
//!
//! #[async_trait]
//! impl Handler for Hello {
//!     async fn handle(&self, _request: &Request<Bytes>, response: &mut dyn ResponseWriter) {
//!         let _ = write_all(response, b"Hello, world!");
//!     }
//! }
//!
//! let conf = AccessLogConf::from_yaml(r#"log_format: '%h %t "%r" %>s %b %D'"#).unwrap();
//! let log = AccessLog::try_from(conf).unwrap();
//! let handler = log.wrap(Hello);
//!
//! // Pass the handler to the server here
//! ```

pub mod configuration;
mod context;
mod directive;
mod error;
mod format;
mod handler;
mod pool;
mod response;
mod writer;

pub use configuration::{AccessLogConf, AccessLogOpt};
pub use context::{ClientAddr, Clock, LogContext, SystemClock};
pub use error::{CompileError, Error};
pub use format::{LogFormat, COMBINED_LOG_FORMAT, COMMON_LOG_FORMAT};
pub use handler::{AccessLog, AccessLogHandler, Handler};
pub use pool::{Pool, Pooled, Recycle};
pub use response::{write_all, Capabilities, ObservingWriter, ResponseRecorder, ResponseWriter};
pub use writer::LogSink;
