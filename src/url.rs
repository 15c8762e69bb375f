//! LDAP URL parsing (`ldap[s]://host:port/dn?attrs?scope?filter`)

use crate::error::LdapError;
use crate::filter::Filter;
use crate::protocol::{DEFAULT_LDAPS_PORT, DEFAULT_LDAP_PORT};
use crate::search::SearchScope;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LdapUrl {
    pub scheme: String,
    pub host: Option<String>,
    pub port: u16,
    /// `None` when the URL carries no DN component.
    pub base_dn: Option<String>,
    pub attributes: Vec<String>,
    pub scope: Option<SearchScope>,
    pub filter: Option<Filter>,
    raw: String,
}

impl LdapUrl {
    pub fn parse(s: &str) -> Result<Self, LdapError> {
        let raw = s.trim().to_string();
        let err = |reason: &str| LdapError::Url {
            url: raw.clone(),
            reason: reason.to_string(),
        };
        let parsed = ::url::Url::parse(&raw).map_err(|e| err(&e.to_string()))?;
        let scheme = parsed.scheme().to_ascii_lowercase();
        let default_port = match scheme.as_str() {
            "ldap" => DEFAULT_LDAP_PORT,
            "ldaps" => DEFAULT_LDAPS_PORT,
            other => return Err(err(&format!("unsupported scheme '{other}'"))),
        };
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string());
        let port = parsed.port().unwrap_or(default_port);

        let path = parsed.path().strip_prefix('/').unwrap_or(parsed.path());
        let base_dn = if path.is_empty() {
            None
        } else {
            Some(percent_decode(path).map_err(|r| err(&r))?)
        };

        let mut attributes = Vec::new();
        let mut scope = None;
        let mut filter = None;
        if let Some(query) = parsed.query() {
            let mut parts = query.splitn(4, '?');
            if let Some(attrs) = parts.next().filter(|a| !a.is_empty()) {
                for a in percent_decode(attrs).map_err(|r| err(&r))?.split(',') {
                    let a = a.trim();
                    if !a.is_empty() {
                        attributes.push(a.to_string());
                    }
                }
            }
            if let Some(sc) = parts.next().filter(|s| !s.is_empty()) {
                let sc = percent_decode(sc).map_err(|r| err(&r))?;
                scope = Some(sc.parse::<SearchScope>().map_err(|e| err(&e.to_string()))?);
            }
            if let Some(f) = parts.next().filter(|f| !f.is_empty()) {
                let f = percent_decode(f).map_err(|r| err(&r))?;
                filter = Some(Filter::parse(&f).map_err(|e| err(&e.to_string()))?);
            }
        }

        Ok(Self {
            scheme,
            host,
            port,
            base_dn,
            attributes,
            scope,
            filter,
            raw,
        })
    }

    pub fn host_port(&self) -> Option<String> {
        self.host.as_ref().map(|h| format!("{h}:{}", self.port))
    }

    pub fn is_secure(&self) -> bool {
        self.scheme == "ldaps"
    }
}

fn percent_decode(s: &str) -> Result<String, String> {
    urlencoding::decode(s)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| format!("decoded value is not valid UTF-8: {e}"))
}

impl fmt::Display for LdapUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for LdapUrl {
    type Err = LdapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LdapUrl::parse(s)
    }
}
