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

//! Error types of the Apache Log Module

use std::io;
use std::path::PathBuf;

/// Errors detected while compiling a log format
///
/// A format that fails to compile is never partially usable, there is no way to get a
/// [`LogFormat`](crate::LogFormat) out of a failed compilation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// The pattern isn't valid UTF-8
    #[error("invalid character sequence at byte {position} of the log format")]
    InvalidEscapeSequence {
        /// Offset of the first byte that couldn't be decoded
        position: usize,
    },
    /// A directive letter or block type without a renderer, e.g. `%P` or `%{foo}x`
    #[error("unsupported directive %{directive}")]
    UnsupportedDirective {
        /// The directive without the leading `%`
        directive: String,
    },
    /// Unit of a `%{unit}T` directive isn't known
    #[error("unrecognised elapsed time unit: {unit}")]
    UnsupportedTimeUnit {
        /// The unit as given in the pattern
        unit: String,
    },
    /// Time format of a `%{format}t` directive could not be parsed
    #[error("invalid time format: {format}")]
    InvalidTimeFormat {
        /// The time format without `begin:` or `end:` prefix
        format: String,
    },
    /// Header name of a `%{name}i` or `%{name}o` directive is not a valid HTTP header name
    #[error("invalid header name: {name}")]
    InvalidHeaderName {
        /// The header name as given in the pattern
        name: String,
    },
}

/// Errors setting up access logging from configuration
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Log format could not be compiled
    #[error("failed compiling log format")]
    Compile(#[from] CompileError),
    /// Parent directory of the log file could not be resolved
    #[error("failed resolving log file's parent directory {}", path.display())]
    LogPath {
        /// The log file path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },
    /// Configuration file could not be opened
    #[error("failed opening configuration file {}", path.display())]
    ConfOpen {
        /// The configuration file path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },
    /// Configuration data isn't valid
    #[error("failed reading configuration")]
    ConfRead(#[from] serde_yaml::Error),
}
