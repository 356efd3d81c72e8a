// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Loading of the bots configuration document. The document is XML with a
//! `<bots>` root carrying connection attributes and one `<bot>` child per
//! engine player; command-line values win over document attributes.

use std::path::{Path, PathBuf};

use chessd_common::xml::{Element, XmlError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not open configuration file '{0}': {1}")]
    Unreadable(PathBuf, std::io::Error),
    #[error("could not parse configuration file '{0}': {1}")]
    Unparseable(PathBuf, XmlError),
    #[error("configuration file '{0}' has no <bots> root element")]
    NotBots(PathBuf),
    #[error("missing server configuration")]
    MissingServer,
    #[error("missing port configuration")]
    MissingPort,
    #[error("invalid port '{0}'")]
    BadPort(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotConfig {
    pub username: String,
    pub password: String,
    pub engine_path: String,
    /// A configured sparring partner the bot keeps challenging; mostly a
    /// debugging aid.
    pub opponent: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub server: String,
    pub port: u16,
    pub log_file: Option<PathBuf>,
    pub bots: Vec<BotConfig>,
}

impl Config {
    /// Load the document at `path`, overlaying any command-line values.
    pub fn load(
        path: &Path,
        server_override: Option<String>,
        port_override: Option<u16>,
        log_override: Option<PathBuf>,
    ) -> Result<Config, ConfigError> {
        let raw = std::fs::read(path)
            .map_err(|e| ConfigError::Unreadable(path.to_path_buf(), e))?;
        let root = Element::parse(&raw)
            .map_err(|e| ConfigError::Unparseable(path.to_path_buf(), e))?;
        if root.name != "bots" {
            return Err(ConfigError::NotBots(path.to_path_buf()));
        }

        let server = server_override
            .or_else(|| root.attr("server").map(str::to_string))
            .ok_or(ConfigError::MissingServer)?;
        let port = match port_override {
            Some(port) => port,
            None => {
                let attr = root.attr("port").ok_or(ConfigError::MissingPort)?;
                attr.parse()
                    .map_err(|_| ConfigError::BadPort(attr.to_string()))?
            }
        };
        let log_file = log_override.or_else(|| root.attr("log").map(PathBuf::from));

        let bots = root
            .children()
            .filter(|c| c.name == "bot")
            .map(|bot| BotConfig {
                username: bot.attr("username").unwrap_or_default().to_string(),
                password: bot.attr("password").unwrap_or_default().to_string(),
                engine_path: bot.attr("enginepath").unwrap_or_default().to_string(),
                opponent: bot
                    .attr("opponent")
                    .filter(|o| !o.is_empty())
                    .map(str::to_string),
            })
            .collect();

        Ok(Config {
            server,
            port,
            log_file,
            bots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.xml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    const SAMPLE: &str = "<bots server='chess.example.org' port='5280' log='/tmp/bots.log'>\
        <bot username='fruit' password='pw1' enginepath='/usr/bin/fruit' opponent='gnu'/>\
        <bot username='gnu' password='pw2' enginepath='gnuchess -x' opponent=''/>\
        </bots>";

    #[test]
    fn loads_document_values() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, SAMPLE);
        let config = Config::load(&path, None, None, None).unwrap();
        assert_eq!(config.server, "chess.example.org");
        assert_eq!(config.port, 5280);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/bots.log")));
        assert_eq!(config.bots.len(), 2);
        assert_eq!(
            config.bots[0],
            BotConfig {
                username: "fruit".to_string(),
                password: "pw1".to_string(),
                engine_path: "/usr/bin/fruit".to_string(),
                opponent: Some("gnu".to_string()),
            }
        );
        // An empty opponent attribute means no challenge loop.
        assert_eq!(config.bots[1].opponent, None);
    }

    #[test]
    fn command_line_wins_over_document() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, SAMPLE);
        let config = Config::load(
            &path,
            Some("other.example.org".to_string()),
            Some(8080),
            Some(PathBuf::from("/var/log/bots.log")),
        )
        .unwrap();
        assert_eq!(config.server, "other.example.org");
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_file, Some(PathBuf::from("/var/log/bots.log")));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.xml");
        assert!(matches!(
            Config::load(&path, None, None, None),
            Err(ConfigError::Unreadable(..))
        ));
    }

    #[test]
    fn missing_server_and_port_are_errors() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "<bots port='5280'/>");
        assert!(matches!(
            Config::load(&path, None, None, None),
            Err(ConfigError::MissingServer)
        ));

        let path = write_config(&dir, "<bots server='srv'/>");
        assert!(matches!(
            Config::load(&path, None, None, None),
            Err(ConfigError::MissingPort)
        ));
        // ... unless the command line supplies them.
        let config = Config::load(&path, None, Some(5280), None).unwrap();
        assert_eq!(config.port, 5280);
    }

    #[test]
    fn wrong_root_and_bad_port_are_errors() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "<bot username='x'/>");
        assert!(matches!(
            Config::load(&path, None, None, None),
            Err(ConfigError::NotBots(_))
        ));

        let path = write_config(&dir, "<bots server='srv' port='teapot'/>");
        assert!(matches!(
            Config::load(&path, None, None, None),
            Err(ConfigError::BadPort(_))
        ));
    }
}
