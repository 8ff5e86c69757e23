//! Connection descriptor (DSN) parsing.
//!
//! A DSN has the shape `scheme://public_key@host[:port]/project_id` and tells
//! the uploader where reports go and which key authenticates them. Parsing is
//! pure and happens once per run; everything downstream borrows the result.

use thiserror::Error;

/// Reasons a connection string is rejected before any work starts.
#[derive(Debug, Error)]
pub enum DsnError {
    /// Only http and https ingest endpoints are supported.
    #[error("unsupported DSN scheme '{scheme}': expected http or https")]
    UnsupportedScheme {
        /// The scheme found in the connection string
        scheme: String,
    },

    /// No `key@` component before the host.
    #[error("invalid DSN: missing public key (expected scheme://key@host[:port]/project_id)")]
    MissingKey,

    /// Nothing after the host to identify the ingest project.
    #[error("invalid DSN: missing project id in path")]
    MissingProjectId,

    /// Host component contained a `:` but the remainder is not a port number.
    #[error("invalid DSN port '{port}'")]
    InvalidPort {
        /// The unparseable port text
        port: String,
    },

    /// Catch-all for structurally broken descriptors.
    #[error("malformed DSN: {0}")]
    Malformed(String),
}

/// Parsed connection descriptor. Immutable; constructed once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dsn {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    /// Authentication key, passed as the `sentry_key` query parameter.
    pub public_key: String,
    /// Destination project id, embedded in the upload URL path.
    pub project_id: String,
}

impl Dsn {
    /// Parses `scheme://key@host[:port]/project_id`.
    ///
    /// The key and project id must be non-empty; the port, when present, must
    /// fit a u16. No I/O and no normalisation beyond trimming `/` around the
    /// project path.
    pub fn parse(input: &str) -> Result<Self, DsnError> {
        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| DsnError::Malformed("missing '://' separator".into()))?;

        if scheme != "http" && scheme != "https" {
            return Err(DsnError::UnsupportedScheme {
                scheme: scheme.to_string(),
            });
        }

        let (public_key, rest) = rest.split_once('@').ok_or(DsnError::MissingKey)?;
        if public_key.is_empty() {
            return Err(DsnError::MissingKey);
        }

        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, path),
            None => (rest, ""),
        };

        let project_id = path.trim_matches('/');
        if project_id.is_empty() {
            return Err(DsnError::MissingProjectId);
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port_text)) => {
                let port = port_text.parse::<u16>().map_err(|_| DsnError::InvalidPort {
                    port: port_text.to_string(),
                })?;
                (host, Some(port))
            }
            None => (authority, None),
        };
        if host.is_empty() {
            return Err(DsnError::Malformed("empty host".into()));
        }

        Ok(Dsn {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
            public_key: public_key.to_string(),
            project_id: project_id.to_string(),
        })
    }

    /// The `host` or `host:port` component as it appears in the upload URL.
    pub fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dsn_without_port() {
        let dsn = Dsn::parse("https://abc123@ingest.example.com/42").expect("valid DSN");
        assert_eq!(dsn.scheme, "https");
        assert_eq!(dsn.host, "ingest.example.com");
        assert_eq!(dsn.port, None);
        assert_eq!(dsn.public_key, "abc123");
        assert_eq!(dsn.project_id, "42");
        assert_eq!(dsn.authority(), "ingest.example.com");
    }

    #[test]
    fn parses_dsn_with_port() {
        let dsn = Dsn::parse("http://key@localhost:9000/7").expect("valid DSN");
        assert_eq!(dsn.host, "localhost");
        assert_eq!(dsn.port, Some(9000));
        assert_eq!(dsn.authority(), "localhost:9000");
    }

    #[test]
    fn rejects_non_http_scheme() {
        let err = Dsn::parse("ftp://key@host/1").expect_err("scheme must be rejected");
        assert!(matches!(err, DsnError::UnsupportedScheme { .. }));
    }

    #[test]
    fn rejects_missing_key() {
        assert!(matches!(
            Dsn::parse("https://ingest.example.com/42"),
            Err(DsnError::MissingKey)
        ));
        assert!(matches!(
            Dsn::parse("https://@ingest.example.com/42"),
            Err(DsnError::MissingKey)
        ));
    }

    #[test]
    fn rejects_missing_project_id() {
        assert!(matches!(
            Dsn::parse("https://key@host"),
            Err(DsnError::MissingProjectId)
        ));
        assert!(matches!(
            Dsn::parse("https://key@host/"),
            Err(DsnError::MissingProjectId)
        ));
    }

    #[test]
    fn rejects_bad_port() {
        let err = Dsn::parse("https://key@host:notaport/1").expect_err("port must be rejected");
        assert!(matches!(err, DsnError::InvalidPort { .. }));
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(matches!(
            Dsn::parse("not a dsn at all"),
            Err(DsnError::Malformed(_))
        ));
    }
}
