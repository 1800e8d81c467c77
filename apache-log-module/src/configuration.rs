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

//! Structures handling command line options and YAML deserialization for the Apache Log Module

use clap::Args;
use log::trace;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Error;
use crate::format::LogFormat;
use crate::handler::AccessLog;
use crate::writer::LogSink;

/// Command line options of the Apache log module
#[derive(Debug, Default, Clone, PartialEq, Eq, Args)]
pub struct AccessLogOpt {
    /// Access log file path
    ///
    /// Special values are an empty string (disable logging) and - (write to standard output).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
    /// Access log format
    ///
    /// Either `common`, `combined` or a pattern like `%h %t "%r" %>s %b`.
    #[arg(long)]
    pub log_format: Option<String>,
}

/// Configuration settings of the Apache log module
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccessLogConf {
    /// Access log file path
    ///
    /// Special values are an empty string (disable logging) and - (write to standard output).
    pub log_file: PathBuf,
    /// Log format
    ///
    /// The values `common` and `combined` select the respective standard formats, anything else
    /// is compiled as a pattern. If empty, the Combined Log Format is used.
    pub log_format: String,
}

impl Default for AccessLogConf {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from("-"),
            log_format: String::new(),
        }
    }
}

impl AccessLogConf {
    /// Parses configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Loads configuration from a YAML file
    pub fn load_from_yaml(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::ConfOpen {
            path: path.to_owned(),
            source,
        })?;
        let conf: Self = serde_yaml::from_reader(BufReader::new(file))?;
        trace!("Loaded configuration file: {conf:#?}");
        Ok(conf)
    }

    /// Merges the command line options into the current configuration. Any command line options
    /// present overwrite existing settings.
    pub fn merge_with_opt(&mut self, opt: AccessLogOpt) {
        if let Some(log_file) = opt.log_file {
            self.log_file = log_file;
        }
        if let Some(log_format) = opt.log_format {
            self.log_format = log_format;
        }
    }

    fn format(&self) -> Result<Arc<LogFormat>, Error> {
        Ok(match self.log_format.as_str() {
            "" | "combined" => LogFormat::combined(),
            "common" => LogFormat::common(),
            pattern => Arc::new(LogFormat::compile(pattern)?),
        })
    }
}

impl TryFrom<AccessLogConf> for AccessLog {
    type Error = Error;

    fn try_from(conf: AccessLogConf) -> Result<Self, Self::Error> {
        let format = conf.format()?;
        let sink = LogSink::open(&conf.log_file)?;
        Ok(Self::with_format(format, sink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::Parser;
    use std::io::Write;

    use crate::error::CompileError;

    #[derive(Debug, Parser)]
    struct Opt {
        #[command(flatten)]
        log: AccessLogOpt,
    }

    #[test]
    fn defaults() {
        let conf = AccessLogConf::from_yaml("{}").unwrap();
        assert_eq!(conf, AccessLogConf::default());
        assert_eq!(conf.log_file, PathBuf::from("-"));

        let log = AccessLog::try_from(conf).unwrap();
        assert_eq!(*log.format(), *LogFormat::combined());
        assert!(log.sink().is_enabled());
    }

    #[test]
    fn parsing() {
        let conf = AccessLogConf::from_yaml(
            r#"
                log_file: ""
                log_format: "%h %t \"%r\" %>s"
            "#,
        )
        .unwrap();
        assert_eq!(conf.log_file, PathBuf::from(""));
        assert_eq!(conf.log_format, r#"%h %t "%r" %>s"#);

        let log = AccessLog::try_from(conf).unwrap();
        assert!(!log.sink().is_enabled());
        assert_eq!(
            *log.format(),
            LogFormat::compile(r#"%h %t "%r" %>s"#).unwrap()
        );

        let conf = AccessLogConf::from_yaml("log_format: common").unwrap();
        assert_eq!(
            *AccessLog::try_from(conf).unwrap().format(),
            *LogFormat::common()
        );

        assert!(matches!(
            AccessLogConf::from_yaml("log_level: debug"),
            Err(Error::ConfRead(_))
        ));
    }

    #[test]
    fn invalid_format() {
        let conf = AccessLogConf::from_yaml("log_format: '%{h}T'").unwrap();
        assert!(matches!(
            AccessLog::try_from(conf),
            Err(Error::Compile(CompileError::UnsupportedTimeUnit { .. }))
        ));
    }

    #[test]
    fn load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf.yaml");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "log_file: access.log").unwrap();
        writeln!(file, "log_format: common").unwrap();
        drop(file);

        let conf = AccessLogConf::load_from_yaml(&path).unwrap();
        assert_eq!(conf.log_file, PathBuf::from("access.log"));
        assert_eq!(conf.log_format, "common");

        assert!(matches!(
            AccessLogConf::load_from_yaml(dir.path().join("missing.yaml")),
            Err(Error::ConfOpen { .. })
        ));
    }

    #[test]
    fn merge_opt() {
        let mut conf = AccessLogConf::from_yaml("log_format: common").unwrap();
        let opt = Opt::try_parse_from(["server", "--log-file", "/tmp/access.log"]).unwrap();
        conf.merge_with_opt(opt.log);
        assert_eq!(conf.log_file, PathBuf::from("/tmp/access.log"));
        assert_eq!(conf.log_format, "common");

        let opt = Opt::try_parse_from(["server", "--log-format", "%h %s", "--log-file=-"]).unwrap();
        conf.merge_with_opt(opt.log);
        assert_eq!(conf.log_file, PathBuf::from("-"));
        assert_eq!(conf.log_format, "%h %s");

        conf.merge_with_opt(AccessLogOpt::default());
        assert_eq!(conf.log_format, "%h %s");
    }
}
