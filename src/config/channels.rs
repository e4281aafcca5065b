//! Channel configuration file
//!
//! The first two non-header lines each describe one channel as
//! `<port> <baud> <mode>`, for example:
//!
//! ```text
//! # bridge between the modem and the logger
//! COM3 115200 READWRITE
//! COM4 9600 READONLY
//! ```

use crate::core::channel::{ChannelMode, ChannelSpec};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File missing
    #[error("config file {} not found; create it with one channel per line, e.g. `COM1 115200 READWRITE`", .0.display())]
    NotFound(PathBuf),

    /// File unreadable
    #[error("cannot read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Line does not have three fields
    #[error("line {line}: expected `<port> <baud> <mode>`, got `{text}`")]
    Malformed { line: usize, text: String },

    /// Port identifier has the wrong form
    #[error("line {line}: invalid COM / tty port `{port}`")]
    InvalidPort { line: usize, port: String },

    /// Baud rate is not a positive integer
    #[error("line {line}: invalid baud rate `{value}`, should be a positive integer")]
    InvalidBaud { line: usize, value: String },

    /// Unknown mode keyword
    #[error("line {line}: invalid mode `{value}`, should be READONLY, WRITEONLY or READWRITE")]
    InvalidMode { line: usize, value: String },

    /// Fewer than two channel lines
    #[error("expected two channel lines, found {found}")]
    MissingChannels { found: usize },

    /// Both lines name the same port
    #[error("both channels use port `{0}`")]
    DuplicatePort(String),
}

fn port_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(COM[0-9]+|/dev/[A-Za-z0-9._/-]+)$").expect("port pattern is valid")
    })
}

fn is_header(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

/// Validate one `<port> <baud> <mode>` line. `line` is 1-based, for messages.
pub fn parse_channel_line(text: &str, line: usize) -> Result<ChannelSpec, ConfigError> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    let [port, baud, mode] = fields[..] else {
        return Err(ConfigError::Malformed {
            line,
            text: text.trim().to_string(),
        });
    };

    if !port_pattern().is_match(port) {
        return Err(ConfigError::InvalidPort {
            line,
            port: port.to_string(),
        });
    }

    let baud_rate = match baud.parse::<u32>() {
        Ok(rate) if rate > 0 => rate,
        _ => {
            return Err(ConfigError::InvalidBaud {
                line,
                value: baud.to_string(),
            })
        }
    };

    let mode = mode.parse::<ChannelMode>().map_err(|_| ConfigError::InvalidMode {
        line,
        value: mode.to_string(),
    })?;

    Ok(ChannelSpec::new(port, baud_rate, mode))
}

/// Parse the two channel specs out of configuration text.
///
/// Blank lines and `#` lines are skipped; lines after the second channel are ignored.
pub fn parse_channels(text: &str) -> Result<(ChannelSpec, ChannelSpec), ConfigError> {
    let mut specs = Vec::with_capacity(2);
    for (index, line) in text.lines().enumerate() {
        if is_header(line) {
            continue;
        }
        specs.push(parse_channel_line(line, index + 1)?);
        if specs.len() == 2 {
            break;
        }
    }

    let mut specs = specs.into_iter();
    match (specs.next(), specs.next()) {
        (Some(a), Some(b)) => {
            if a.port == b.port {
                return Err(ConfigError::DuplicatePort(a.port));
            }
            Ok((a, b))
        }
        (a, _) => Err(ConfigError::MissingChannels {
            found: usize::from(a.is_some()),
        }),
    }
}

/// Read and validate the channel configuration file
pub fn load_channels(path: &Path) -> Result<(ChannelSpec, ChannelSpec), ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
        _ => ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })?;
    parse_channels(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_valid_line() {
        let spec = parse_channel_line("COM1 115200 READWRITE\n", 1).unwrap();
        assert_eq!(spec, ChannelSpec::new("COM1", 115200, ChannelMode::ReadWrite));

        let spec = parse_channel_line("/dev/ttyUSB0 9600 READONLY", 2).unwrap();
        assert_eq!(spec.mode, ChannelMode::ReadOnly);
    }

    #[test]
    fn test_non_numeric_baud() {
        let err = parse_channel_line("COM5 abc READWRITE", 1).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBaud { line: 1, .. }));
    }

    #[test]
    fn test_zero_and_negative_baud() {
        assert!(matches!(
            parse_channel_line("COM5 0 READWRITE", 1),
            Err(ConfigError::InvalidBaud { .. })
        ));
        assert!(matches!(
            parse_channel_line("COM5 -9600 READWRITE", 1),
            Err(ConfigError::InvalidBaud { .. })
        ));
    }

    #[test]
    fn test_invalid_port_and_mode() {
        assert!(matches!(
            parse_channel_line("LPT1 9600 READWRITE", 3),
            Err(ConfigError::InvalidPort { line: 3, .. })
        ));
        assert!(matches!(
            parse_channel_line("COM1 9600 READ", 1),
            Err(ConfigError::InvalidMode { .. })
        ));
        assert!(matches!(
            parse_channel_line("COM1 9600", 1),
            Err(ConfigError::Malformed { .. })
        ));
        assert!(matches!(
            parse_channel_line("COM1 9600 READWRITE extra", 1),
            Err(ConfigError::Malformed { .. })
        ));
    }

    #[test]
    fn test_parse_channels_skips_headers() {
        let text = "# port baud mode\n\nCOM1 9600 READWRITE\nCOM2 19200 WRITEONLY\nnot a channel\n";
        let (a, b) = parse_channels(text).unwrap();
        assert_eq!(a.port, "COM1");
        assert_eq!(b.baud_rate, 19200);
        assert_eq!(b.mode, ChannelMode::WriteOnly);
    }

    #[test]
    fn test_missing_and_duplicate_channels() {
        assert!(matches!(
            parse_channels("COM1 9600 READWRITE\n"),
            Err(ConfigError::MissingChannels { found: 1 })
        ));
        assert!(matches!(
            parse_channels(""),
            Err(ConfigError::MissingChannels { found: 0 })
        ));
        assert!(matches!(
            parse_channels("COM1 9600 READWRITE\nCOM1 9600 READWRITE\n"),
            Err(ConfigError::DuplicatePort(_))
        ));
    }

    #[test]
    fn test_load_channels_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "COM3 115200 READWRITE").unwrap();
        writeln!(file, "COM4 115200 READWRITE").unwrap();
        let (a, b) = load_channels(file.path()).unwrap();
        assert_eq!((a.port.as_str(), b.port.as_str()), ("COM3", "COM4"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_channels(&dir.path().join("config.txt")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
        assert!(err.to_string().contains("COM1 115200 READWRITE"));
    }
}
