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

//! Renderers for the individual log format directives

use chrono::format::Item;
use chrono::{DateTime, Local};
use http::HeaderName;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

use crate::context::LogContext;

/// Placeholder for values conventionally absent from access logs
const DASH: &[u8] = b"-";

/// Format of the `%t` directive
const DEFAULT_TIME_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

/// Unit for durations rendered as integers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimeUnit {
    Seconds,
    Milliseconds,
    Microseconds,
}

impl TimeUnit {
    fn count(self, duration: Duration) -> u128 {
        match self {
            Self::Seconds => u128::from(duration.as_secs()),
            Self::Milliseconds => duration.as_millis(),
            Self::Microseconds => duration.as_micros(),
        }
    }
}

/// Unit for sub-second remainders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FractionUnit {
    Milliseconds,
    Microseconds,
}

/// Which end of request processing a timestamp refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimePoint {
    Begin,
    End,
}

/// A compiled log format directive
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Directive {
    /// Verbatim text
    Literal(Box<str>),
    /// `%h`
    RemoteAddr,
    /// `%u`
    RemoteUser,
    /// `%t`
    RequestTime,
    /// `%r`
    RequestLine,
    /// `%s` and `%>s`
    Status,
    /// `%b`
    BytesSent,
    /// `%m`
    Method,
    /// `%H`
    Protocol,
    /// `%p`
    Pid,
    /// `%q`
    Query,
    /// `%U`
    Path,
    /// `%v` and `%V`
    Host,
    /// `%D`, `%T` and `%{unit}T`
    Elapsed(TimeUnit),
    /// `%{ms_frac}T` and `%{us_frac}T`
    ElapsedFraction(FractionUnit),
    /// `%{name}i`
    RequestHeader(HeaderName),
    /// `%{name}o`
    ResponseHeader(HeaderName),
    /// `%{name}e`
    Env(Box<str>),
    /// `%{sec}t`, `%{msec}t` and `%{usec}t`
    SinceEpoch(TimeUnit),
    /// `%{msec_frac}t` and `%{usec_frac}t`
    EpochFraction(FractionUnit),
    /// `%{format}t`, `%{begin:format}t` and `%{end:format}t`
    Time {
        point: TimePoint,
        items: Vec<Item<'static>>,
    },
}

/// Writes `data` with control characters replaced by `\xHH` escapes
fn write_sanitized<W: Write + ?Sized>(out: &mut W, data: &[u8]) -> io::Result<()> {
    let mut rest = data;
    while let Some(pos) = rest.iter().position(u8::is_ascii_control) {
        out.write_all(&rest[..pos])?;
        write!(out, "\\x{:02x}", rest[pos])?;
        rest = &rest[pos + 1..];
    }
    out.write_all(rest)
}

fn write_or_dash<W: Write + ?Sized>(out: &mut W, value: Option<&[u8]>) -> io::Result<()> {
    match value {
        Some(value) if !value.is_empty() => write_sanitized(out, value),
        _ => out.write_all(DASH),
    }
}

/// Removes a `:port` suffix, leaving bracketed IPv6 literals intact
pub(crate) fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        }
    } else {
        host.split_once(':').map_or(host, |(host, _)| host)
    }
}

fn since_epoch(time: Option<SystemTime>) -> Option<Duration> {
    time?.duration_since(SystemTime::UNIX_EPOCH).ok()
}

impl Directive {
    /// Writes the directive’s output for the given request
    pub(crate) fn write_to<W: Write + ?Sized>(
        &self,
        out: &mut W,
        ctx: &LogContext,
    ) -> io::Result<()> {
        match self {
            Self::Literal(text) => out.write_all(text.as_bytes()),
            Self::RemoteAddr => match ctx.client_addr() {
                Some(SocketAddr::V4(addr)) => write!(out, "{}", addr.ip()),
                Some(SocketAddr::V6(addr)) => write!(out, "[{}]", addr.ip()),
                None => out.write_all(DASH),
            },
            Self::RemoteUser => write_or_dash(out, ctx.username().map(str::as_bytes)),
            Self::RequestTime => match ctx.request_time() {
                Some(time) => write!(
                    out,
                    "[{}]",
                    DateTime::<Local>::from(time).format(DEFAULT_TIME_FORMAT)
                ),
                None => out.write_all(b"[]"),
            },
            Self::RequestLine => write!(
                out,
                "{} {} {:?}",
                ctx.method(),
                ctx.uri(),
                ctx.version()
            ),
            Self::Status => write!(out, "{}", ctx.status().as_u16()),
            Self::BytesSent => match ctx.content_length() {
                0 => out.write_all(DASH),
                length => write!(out, "{length}"),
            },
            Self::Method => out.write_all(ctx.method().as_str().as_bytes()),
            Self::Protocol => write!(out, "{:?}", ctx.version()),
            Self::Pid => write!(out, "{}", std::process::id()),
            Self::Query => match ctx.uri().query() {
                Some(query) if !query.is_empty() => write!(out, "?{query}"),
                _ => Ok(()),
            },
            Self::Path => out.write_all(ctx.uri().path().as_bytes()),
            Self::Host => write_or_dash(out, ctx.host().map(|host| strip_port(host).as_bytes())),
            Self::Elapsed(unit) => match ctx.elapsed() {
                elapsed if elapsed.is_zero() => Ok(()),
                elapsed => write!(out, "{}", unit.count(elapsed)),
            },
            Self::ElapsedFraction(unit) => match ctx.elapsed() {
                elapsed if elapsed.is_zero() => Ok(()),
                elapsed => match unit {
                    FractionUnit::Milliseconds => write!(out, "{:03}", elapsed.subsec_millis()),
                    FractionUnit::Microseconds => {
                        write!(out, "{:03}", elapsed.subsec_micros() % 1000)
                    }
                },
            },
            Self::RequestHeader(name) => write_or_dash(
                out,
                ctx.request_headers().get(name).map(|value| value.as_bytes()),
            ),
            Self::ResponseHeader(name) => write_or_dash(
                out,
                ctx.response_headers().get(name).map(|value| value.as_bytes()),
            ),
            Self::Env(name) => {
                let value = std::env::var_os(&**name);
                write_or_dash(
                    out,
                    value
                        .as_ref()
                        .map(|value| value.to_string_lossy())
                        .as_deref()
                        .map(str::as_bytes),
                )
            }
            Self::SinceEpoch(unit) => match since_epoch(ctx.request_time()) {
                Some(duration) => write!(out, "{}", unit.count(duration)),
                None => out.write_all(DASH),
            },
            Self::EpochFraction(unit) => match since_epoch(ctx.request_time()) {
                Some(duration) => {
                    let nanos = duration.subsec_nanos();
                    let fraction = match unit {
                        FractionUnit::Milliseconds => f64::from(nanos) / 1e6,
                        FractionUnit::Microseconds => f64::from(nanos % 1_000_000) / 1e3,
                    };
                    write!(out, "{fraction}")
                }
                None => out.write_all(DASH),
            },
            Self::Time { point, items } => {
                let time = match point {
                    TimePoint::Begin => ctx.request_time(),
                    TimePoint::End => ctx.response_time(),
                };
                match time {
                    Some(time) => write!(
                        out,
                        "{}",
                        DateTime::<Local>::from(time).format_with_items(items.iter())
                    ),
                    None => out.write_all(DASH),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use http::{header, HeaderMap, Request, StatusCode};

    fn render(directive: &Directive, ctx: &LogContext) -> String {
        let mut buf = Vec::new();
        directive.write_to(&mut buf, ctx).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn empty_values() {
        let request = Request::builder().uri("/").body(()).unwrap();
        let mut ctx = LogContext::new();
        ctx.begin(&request, SystemTime::UNIX_EPOCH);

        let foo = HeaderName::from_static("foo");
        let cases = [
            (Directive::RequestHeader(foo.clone()), "-"),
            (Directive::ResponseHeader(foo), "-"),
            (Directive::RemoteAddr, "-"),
            (Directive::Query, ""),
            (Directive::RemoteUser, "-"),
            (Directive::Host, "-"),
            (Directive::BytesSent, "-"),
            (Directive::Elapsed(TimeUnit::Seconds), ""),
            (Directive::Elapsed(TimeUnit::Microseconds), ""),
            (Directive::ElapsedFraction(FractionUnit::Milliseconds), ""),
            (Directive::Status, "200"),
        ];
        for (directive, expected) in cases {
            assert_eq!(render(&directive, &ctx), expected, "{directive:?}");
        }

        ctx.reset();
        assert_eq!(render(&Directive::RequestTime, &ctx), "[]");
        assert_eq!(render(&Directive::SinceEpoch(TimeUnit::Seconds), &ctx), "-");
    }

    #[test]
    fn port_stripping() {
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("example.com:8080"), "example.com");
        assert_eq!(strip_port("127.0.0.1:80"), "127.0.0.1");
        assert_eq!(strip_port("[::1]:51111"), "[::1]");
        assert_eq!(strip_port("[::1]"), "[::1]");
        assert_eq!(strip_port("[::1"), "[::1");
    }

    #[test]
    fn remote_addr() {
        let mut ctx = LogContext::new();
        for (addr, expected) in [("127.0.0.1:8080", "127.0.0.1"), ("[::1]:51111", "[::1]")] {
            let request = Request::builder()
                .extension(crate::ClientAddr(addr.parse().unwrap()))
                .body(())
                .unwrap();
            ctx.begin(&request, SystemTime::now());
            assert_eq!(render(&Directive::RemoteAddr, &ctx), expected);
        }
    }

    #[test]
    fn sanitized_values() {
        let mut buf = Vec::new();
        write_sanitized(&mut buf, b"plain text").unwrap();
        assert_eq!(buf, b"plain text");

        buf.clear();
        write_sanitized(&mut buf, b"\0a\tb\x7f\"\\ c\n").unwrap();
        assert_eq!(buf, b"\\x00a\\x09b\\x7f\"\\ c\\x0a");

        buf.clear();
        write_sanitized(&mut buf, "ünïcödé".as_bytes()).unwrap();
        assert_eq!(buf, "ünïcödé".as_bytes());

        let mut ctx = LogContext::new();
        let mut headers = HeaderMap::new();
        headers.insert(header::SERVER, "tab\there".try_into().unwrap());
        ctx.finalize(SystemTime::now(), StatusCode::OK, 0, &headers);
        assert_eq!(
            render(&Directive::ResponseHeader(header::SERVER), &ctx),
            "tab\\x09here"
        );
    }

    #[test]
    fn elapsed_fractions() {
        let start = SystemTime::UNIX_EPOCH;
        let request = Request::builder().body(()).unwrap();
        let mut ctx = LogContext::new();
        ctx.begin(&request, start);
        ctx.finalize(
            start + Duration::from_micros(3_045_007),
            StatusCode::OK,
            0,
            &HeaderMap::new(),
        );
        assert_eq!(render(&Directive::Elapsed(TimeUnit::Seconds), &ctx), "3");
        assert_eq!(
            render(&Directive::Elapsed(TimeUnit::Milliseconds), &ctx),
            "3045"
        );
        assert_eq!(
            render(&Directive::Elapsed(TimeUnit::Microseconds), &ctx),
            "3045007"
        );
        assert_eq!(
            render(&Directive::ElapsedFraction(FractionUnit::Milliseconds), &ctx),
            "045"
        );
        assert_eq!(
            render(&Directive::ElapsedFraction(FractionUnit::Microseconds), &ctx),
            "007"
        );
    }
}
