// Outbound proxy for playlist, key and segment requests.
//
// A proxy is given either as a full URL or as a bare `host[:port]` plus a
// scheme. Either way every request of the session goes through it.

use std::fmt;

use reqwest::Proxy;
use url::Url;

use crate::error::HlsDownloadError;

/// Protocol spoken to the proxy server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyScheme {
    #[default]
    Http,
    Socks5,
}

impl ProxyScheme {
    fn as_str(self) -> &'static str {
        match self {
            ProxyScheme::Http => "http",
            ProxyScheme::Socks5 => "socks5",
        }
    }

    fn default_port(self) -> u16 {
        match self {
            ProxyScheme::Http => 8080,
            ProxyScheme::Socks5 => 1080,
        }
    }
}

impl std::str::FromStr for ProxyScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(ProxyScheme::Http),
            "socks5" | "socks5h" => Ok(ProxyScheme::Socks5),
            other => Err(format!("Unsupported proxy scheme: '{other}'")),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub user: String,
    pub pass: String,
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("user", &self.user)
            .field("pass", &"***")
            .finish()
    }
}

/// A proxy endpoint with optional credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    url: Url,
    credentials: Option<ProxyCredentials>,
}

impl ProxyConfig {
    /// Parses a proxy URL such as `socks5://10.0.0.2:1080`. The scheme picks
    /// the proxy protocol; credentials embedded in the URL are kept.
    pub fn from_url(raw: &str) -> Result<Self, HlsDownloadError> {
        let url = Url::parse(raw).map_err(|e| invalid(raw, e))?;
        let scheme: ProxyScheme = url.scheme().parse().map_err(|e| invalid(raw, e))?;
        let Some(host) = url.host_str() else {
            return Err(invalid(raw, "missing host"));
        };

        let credentials = (!url.username().is_empty()).then(|| ProxyCredentials {
            user: url.username().to_string(),
            pass: url.password().unwrap_or_default().to_string(),
        });
        let mut config = Self::endpoint(scheme, host, url.port_or_known_default())?;
        config.credentials = credentials;
        Ok(config)
    }

    /// Builds a proxy from `host` or `host:port`; a missing port falls back
    /// to the scheme's usual one.
    pub fn from_host(host: &str, scheme: ProxyScheme) -> Result<Self, HlsDownloadError> {
        let (name, port) = match host.rsplit_once(':') {
            Some((name, port)) if !name.ends_with(':') => {
                let port = port.parse::<u16>().map_err(|e| invalid(host, e))?;
                (name, Some(port))
            }
            _ => (host, None),
        };
        Self::endpoint(scheme, name, port)
    }

    fn endpoint(
        scheme: ProxyScheme,
        host: &str,
        port: Option<u16>,
    ) -> Result<Self, HlsDownloadError> {
        if host.is_empty() {
            return Err(invalid(host, "missing host"));
        }
        let port = port.unwrap_or_else(|| scheme.default_port());
        let raw = format!("{}://{host}:{port}", scheme.as_str());
        let url = Url::parse(&raw).map_err(|e| invalid(&raw, e))?;
        Ok(Self {
            url,
            credentials: None,
        })
    }

    /// Replaces any credentials with `user`/`pass`.
    pub fn with_credentials(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.credentials = Some(ProxyCredentials {
            user: user.into(),
            pass: pass.into(),
        });
        self
    }

    pub fn scheme(&self) -> ProxyScheme {
        match self.url.scheme() {
            "socks5" => ProxyScheme::Socks5,
            _ => ProxyScheme::Http,
        }
    }

    pub fn credentials(&self) -> Option<&ProxyCredentials> {
        self.credentials.as_ref()
    }

    /// The reqwest proxy routing every request through this endpoint.
    pub fn to_reqwest(&self) -> Result<Proxy, HlsDownloadError> {
        let mut url = self.url.clone();
        if let Some(credentials) = &self.credentials {
            if self.scheme() == ProxyScheme::Socks5 {
                // reqwest takes SOCKS credentials from the URL only
                url.set_username(&credentials.user)
                    .and_then(|_| url.set_password(Some(&credentials.pass)))
                    .map_err(|_| invalid(self.url.as_str(), "cannot carry credentials"))?;
            }
        }

        let mut proxy = Proxy::all(url.as_str())
            .map_err(|e| HlsDownloadError::Client(format!("Invalid proxy {self}: {e}")))?;
        if let (ProxyScheme::Http, Some(credentials)) = (self.scheme(), &self.credentials) {
            proxy = proxy.basic_auth(&credentials.user, &credentials.pass);
        }
        Ok(proxy)
    }
}

/// `scheme://host:port`, never the credentials.
impl fmt::Display for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}",
            self.url.scheme(),
            self.url.host_str().unwrap_or_default(),
            self.url.port_or_known_default().unwrap_or_default()
        )
    }
}

fn invalid(raw: &str, reason: impl fmt::Display) -> HlsDownloadError {
    HlsDownloadError::Client(format!("Invalid proxy '{raw}': {reason}"))
}
