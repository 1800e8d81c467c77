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

//! Compiling log format patterns and rendering log lines from them

use chrono::format::StrftimeItems;
use http::HeaderName;
use log::debug;
use once_cell::sync::Lazy;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::Arc;

use crate::context::LogContext;
use crate::directive::{Directive, FractionUnit, TimePoint, TimeUnit};
use crate::error::CompileError;
use crate::pool::BUFFERS;

/// The Common Log Format
pub const COMMON_LOG_FORMAT: &str = r#"%h %l %u %t "%r" %>s %b"#;

/// The Combined Log Format, Common Log Format with referrer and user agent
pub const COMBINED_LOG_FORMAT: &str =
    r#"%h %l %u %t "%r" %>s %b "%{Referer}i" "%{User-agent}i""#;

static COMMON: Lazy<Arc<LogFormat>> = Lazy::new(|| preset(COMMON_LOG_FORMAT));
static COMBINED: Lazy<Arc<LogFormat>> = Lazy::new(|| preset(COMBINED_LOG_FORMAT));

fn preset(pattern: &str) -> Arc<LogFormat> {
    match LogFormat::compile(pattern) {
        Ok(format) => Arc::new(format),
        Err(err) => unreachable!("built-in log format {pattern:?} failed to compile: {err}"),
    }
}

/// Collects directives, merging adjacent literal text
#[derive(Debug, Default)]
struct Compiler {
    directives: Vec<Directive>,
    pending: String,
}

impl Compiler {
    fn literal(&mut self, text: &str) {
        self.pending.push_str(text);
    }

    fn push(&mut self, directive: Directive) {
        self.flush_literal();
        self.directives.push(directive);
    }

    fn flush_literal(&mut self) {
        if !self.pending.is_empty() {
            let text = std::mem::take(&mut self.pending);
            self.directives.push(Directive::Literal(text.into_boxed_str()));
        }
    }

    fn finish(mut self) -> Vec<Directive> {
        self.flush_literal();
        self.directives
    }
}

fn unsupported(directive: impl Into<String>) -> CompileError {
    CompileError::UnsupportedDirective {
        directive: directive.into(),
    }
}

fn letter_directive(letter: char) -> Result<Directive, CompileError> {
    Ok(match letter {
        'b' => Directive::BytesSent,
        'D' => Directive::Elapsed(TimeUnit::Microseconds),
        'h' => Directive::RemoteAddr,
        'H' => Directive::Protocol,
        'm' => Directive::Method,
        'p' => Directive::Pid,
        'q' => Directive::Query,
        'r' => Directive::RequestLine,
        's' => Directive::Status,
        't' => Directive::RequestTime,
        'T' => Directive::Elapsed(TimeUnit::Seconds),
        'u' => Directive::RemoteUser,
        'U' => Directive::Path,
        'v' | 'V' => Directive::Host,
        other => return Err(unsupported(other)),
    })
}

fn header_name(name: &str) -> Result<HeaderName, CompileError> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| CompileError::InvalidHeaderName {
        name: name.to_owned(),
    })
}

fn elapsed_directive(unit: &str) -> Result<Directive, CompileError> {
    Ok(match unit {
        "s" => Directive::Elapsed(TimeUnit::Seconds),
        "ms" => Directive::Elapsed(TimeUnit::Milliseconds),
        "us" => Directive::Elapsed(TimeUnit::Microseconds),
        "ms_frac" => Directive::ElapsedFraction(FractionUnit::Milliseconds),
        "us_frac" => Directive::ElapsedFraction(FractionUnit::Microseconds),
        unit => {
            return Err(CompileError::UnsupportedTimeUnit {
                unit: unit.to_owned(),
            })
        }
    })
}

fn time_directive(key: &str) -> Result<Directive, CompileError> {
    Ok(match key {
        "sec" => Directive::SinceEpoch(TimeUnit::Seconds),
        "msec" => Directive::SinceEpoch(TimeUnit::Milliseconds),
        "usec" => Directive::SinceEpoch(TimeUnit::Microseconds),
        "msec_frac" => Directive::EpochFraction(FractionUnit::Milliseconds),
        "usec_frac" => Directive::EpochFraction(FractionUnit::Microseconds),
        key => {
            let (point, format) = if let Some(format) = key.strip_prefix("begin:") {
                (TimePoint::Begin, format)
            } else if let Some(format) = key.strip_prefix("end:") {
                (TimePoint::End, format)
            } else {
                (TimePoint::Begin, key)
            };
            let items = StrftimeItems::new(format).parse_to_owned().map_err(|_| {
                CompileError::InvalidTimeFormat {
                    format: format.to_owned(),
                }
            })?;
            Directive::Time { point, items }
        }
    })
}

fn block_directive(key: &str, kind: char) -> Result<Directive, CompileError> {
    match kind {
        'i' => header_name(key).map(Directive::RequestHeader),
        'o' => header_name(key).map(Directive::ResponseHeader),
        'e' => Ok(Directive::Env(key.into())),
        't' => time_directive(key),
        'T' => elapsed_directive(key),
        kind => Err(unsupported(format!("{{{key}}}{kind}"))),
    }
}

/// Splits `KEY}x...` into key, block type and the remaining pattern
fn split_block(input: &str) -> Option<(&str, char, &str)> {
    let (key, rest) = input.split_once('}')?;
    let mut chars = rest.chars();
    let kind = chars.next()?;
    Some((key, kind, chars.as_str()))
}

/// A compiled log format
///
/// Compiling a pattern once produces an immutable list of directives that can be shared between
/// any number of concurrent requests. Supported directives:
///
/// * `%%`: verbatim `%` character
/// * `%h`: client’s IP address
/// * `%l`: verbatim `-` character
/// * `%u`: user name from the request URI
/// * `%t`: time the request was received, e.g. `[10/Oct/2000:13:55:36 -0700]`
/// * `%r`: request line, e.g. `GET / HTTP/1.1`
/// * `%s`, `%>s`: status code of the response
/// * `%b`: number of response body bytes, `-` if none
/// * `%m`, `%H`: request method and protocol
/// * `%p`: process ID
/// * `%q`, `%U`: query string (with leading `?`) and path of the request
/// * `%v`, `%V`: requested host name
/// * `%D`, `%T`, `%{s|ms|us}T`: processing time in microseconds, seconds or the given unit
/// * `%{ms_frac|us_frac}T`: millisecond or microsecond part of the processing time
/// * `%{name}i`, `%{name}o`: request or response header
/// * `%{name}e`: environment variable
/// * `%{sec|msec|usec}t`: request time since the Unix epoch
/// * `%{msec_frac|usec_frac}t`: millisecond or microsecond part of the request time
/// * `%{format}t`, `%{begin:format}t`, `%{end:format}t`: request or response time in strftime
///   format
#[derive(Debug, Clone, PartialEq)]
pub struct LogFormat {
    directives: Vec<Directive>,
}

impl LogFormat {
    /// Compiles a pattern
    pub fn compile(pattern: &str) -> Result<Self, CompileError> {
        let mut compiler = Compiler::default();
        let mut rest = pattern;
        while let Some(pos) = rest.find('%') {
            compiler.literal(&rest[..pos]);

            let mut chars = rest[pos + 1..].chars();
            let Some(next) = chars.next() else {
                // Trailing % is kept
                compiler.literal("%");
                rest = "";
                break;
            };
            rest = chars.as_str();

            match next {
                '%' => compiler.literal("%"),
                'l' => compiler.literal("-"),
                '>' => {
                    if let Some(after) = rest.strip_prefix('s') {
                        compiler.push(Directive::Status);
                        rest = after;
                    } else {
                        compiler.literal("%>");
                    }
                }
                '{' => {
                    if let Some((key, kind, after)) = split_block(rest) {
                        compiler.push(block_directive(key, kind)?);
                        rest = after;
                    } else {
                        // Unterminated block, scanning continues after the brace
                        compiler.literal("%{");
                    }
                }
                letter => compiler.push(letter_directive(letter)?),
            }
        }
        compiler.literal(rest);

        let directives = compiler.finish();
        debug!(
            "Compiled log format {pattern:?} into {} directives",
            directives.len()
        );
        Ok(Self { directives })
    }

    /// The Common Log Format, compiled once per process
    pub fn common() -> Arc<Self> {
        COMMON.clone()
    }

    /// The Combined Log Format, compiled once per process
    pub fn combined() -> Arc<Self> {
        COMBINED.clone()
    }

    /// Renders one log line into `out`
    ///
    /// A newline is added unless the output already ends with one. Rendering stops at the first
    /// write error.
    pub fn render<W: Write + ?Sized>(&self, out: &mut W, ctx: &LogContext) -> io::Result<()> {
        let mut out = TrackLast {
            inner: out,
            last: None,
        };
        for directive in &self.directives {
            directive.write_to(&mut out, ctx)?;
        }
        if out.last != Some(b'\n') {
            out.inner.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Renders a log line into a pooled buffer and passes it to `out` with a single write
    pub fn write_log<W: Write + ?Sized>(&self, out: &mut W, ctx: &LogContext) -> io::Result<()> {
        let mut buf = BUFFERS.acquire();
        self.render(&mut *buf, ctx)?;
        out.write_all(&buf)
    }
}

impl FromStr for LogFormat {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

impl TryFrom<&[u8]> for LogFormat {
    type Error = CompileError;

    fn try_from(pattern: &[u8]) -> Result<Self, Self::Error> {
        let pattern =
            std::str::from_utf8(pattern).map_err(|err| CompileError::InvalidEscapeSequence {
                position: err.valid_up_to(),
            })?;
        Self::compile(pattern)
    }
}

/// Remembers the last byte written
struct TrackLast<'a, W: ?Sized> {
    inner: &'a mut W,
    last: Option<u8>,
}

impl<W: Write + ?Sized> Write for TrackLast<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        if written > 0 {
            self.last = Some(buf[written - 1]);
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
