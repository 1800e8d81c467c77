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

//! Destinations for rendered log lines

use log::error;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::fs::File;
use std::io::{self, stderr, stdout, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::Error;

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Sinks of all log files opened so far, keyed by normalized path
static OPEN_FILES: Lazy<Mutex<HashMap<PathBuf, LogSink>>> = Lazy::new(Default::default);

/// Resolves the parent directory so that the same file is always known under the same path
pub(crate) fn normalize_path(path: PathBuf) -> Result<PathBuf, Error> {
    if path.as_os_str().is_empty() || path.as_os_str() == "-" {
        // Don't change special paths
        return Ok(path);
    }

    if let Some(parent) = path.parent() {
        let mut parent = if parent.as_os_str().is_empty() {
            Path::new(".").canonicalize()
        } else {
            parent.canonicalize()
        }
        .map_err(|source| Error::LogPath {
            path: path.clone(),
            source,
        })?;
        if let Some(name) = path.file_name() {
            parent.push(name);
        }
        Ok(parent)
    } else {
        // Absolute path in the root, leave unchanged
        Ok(path)
    }
}

/// Where log lines go
///
/// Clones share the underlying writer. Each line is written with a single call while holding the
/// writer’s lock, lines from concurrent requests never interleave.
#[derive(Clone)]
pub struct LogSink {
    inner: Option<SharedWriter>,
}

impl LogSink {
    /// Writes to standard output
    pub fn stdout() -> Self {
        Self::from_writer(stdout())
    }

    /// Writes to standard error
    pub fn stderr() -> Self {
        Self::from_writer(stderr())
    }

    /// Discards all log lines
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Writes to an arbitrary writer
    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Some(Arc::new(Mutex::new(Box::new(writer)))),
        }
    }

    /// Sink for a log file path
    ///
    /// Special values are an empty path (disable logging) and `-` (write to standard output).
    /// Files are opened for appending and created if necessary. All sinks for the same file share
    /// one writer. If the file cannot be opened, standard output is used instead.
    pub fn open(path: &Path) -> Result<Self, Error> {
        if path.as_os_str().is_empty() {
            return Ok(Self::disabled());
        }
        if path.as_os_str() == "-" {
            return Ok(Self::stdout());
        }

        let path = normalize_path(path.to_owned())?;
        let mut files = OPEN_FILES.lock().unwrap_or_else(PoisonError::into_inner);
        let sink = files
            .entry(path)
            .or_insert_with_key(|path| {
                match File::options().append(true).create(true).open(path) {
                    Ok(file) => Self::from_writer(file),
                    Err(err) => {
                        error!(
                            "Failed opening log file {} (cause: {err}), falling back to stdout",
                            path.display()
                        );
                        Self::stdout()
                    }
                }
            })
            .clone();
        Ok(sink)
    }

    /// Checks whether log lines are written anywhere
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Writes a complete log line and flushes the writer
    pub fn write_line(&self, line: &[u8]) -> io::Result<()> {
        if let Some(inner) = &self.inner {
            let mut writer = inner.lock().unwrap_or_else(PoisonError::into_inner);
            writer.write_all(line)?;
            writer.flush()?;
        }
        Ok(())
    }

    /// Checks whether both sinks write to the same destination
    pub fn same_as(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Debug for LogSink {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::env::current_dir;
    use std::fs::read_to_string;

    #[test]
    fn path_normalization() {
        let cwd = current_dir().unwrap().canonicalize().unwrap();
        let mut root = cwd.clone();
        while let Some(parent) = root.parent() {
            root = parent.into();
        }

        assert_eq!(normalize_path("".into()).unwrap(), PathBuf::from(""));
        assert_eq!(normalize_path("-".into()).unwrap(), PathBuf::from("-"));
        assert_eq!(
            normalize_path("access.log".into()).unwrap(),
            cwd.join("access.log")
        );
        assert_eq!(
            normalize_path("./access.log".into()).unwrap(),
            cwd.join("access.log")
        );
        assert_eq!(
            normalize_path("../access.log".into()).unwrap(),
            cwd.parent().unwrap().join("access.log")
        );
        assert_eq!(
            normalize_path(root.join("access.log")).unwrap(),
            root.join("access.log")
        );
        assert!(matches!(
            normalize_path("does/not/exist/access.log".into()),
            Err(Error::LogPath { .. })
        ));
    }

    #[test]
    fn special_paths() {
        assert!(!LogSink::open(Path::new("")).unwrap().is_enabled());
        assert!(LogSink::open(Path::new("-")).unwrap().is_enabled());
        assert!(LogSink::disabled().write_line(b"ignored\n").is_ok());
    }

    #[test]
    fn shared_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        std::fs::write(&path, "existing\n").unwrap();

        let first = LogSink::open(&path).unwrap();
        let second = LogSink::open(&dir.path().join(".").join("access.log")).unwrap();
        assert!(first.same_as(&second));
        assert!(!first.same_as(&LogSink::open(&dir.path().join("other.log")).unwrap()));

        first.write_line(b"first\n").unwrap();
        second.write_line(b"second\n").unwrap();
        assert_eq!(read_to_string(&path).unwrap(), "existing\nfirst\nsecond\n");
    }
}
