//! Anchor descriptor (`/.well-known/stellar.toml`) discovery.

use crate::config::AnchorClientConfig;
use crate::http::AnchorHttp;

pub const DESCRIPTOR_PATH: &str = "/.well-known/stellar.toml";
pub const WEB_AUTH_ENDPOINT_FIELD: &str = "WEB_AUTH_ENDPOINT";
pub const TRANSFER_SERVER_FIELD: &str = "TRANSFER_SERVER_SEP0024";
/// Non-standard: strict anchors only serve auth at the advertised endpoint.
pub const FALLBACK_AUTH_PATH: &str = "/auth";

/// Fields the client reads from the descriptor document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorDescriptor {
    pub web_auth_endpoint: Option<String>,
    pub transfer_server: Option<String>,
}

impl AnchorDescriptor {
    /// Parse as TOML; documents that are not valid TOML are scanned line by
    /// line for `KEY = "value"` pairs instead.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<toml::Table>() {
            Ok(table) => {
                let read = |field: &str| {
                    table
                        .get(field)
                        .and_then(toml::Value::as_str)
                        .and_then(non_empty_url)
                };
                Self {
                    web_auth_endpoint: read(WEB_AUTH_ENDPOINT_FIELD),
                    transfer_server: read(TRANSFER_SERVER_FIELD),
                }
            }
            Err(error) => {
                tracing::debug!(error = %error, "descriptor is not valid toml, scanning lines");
                Self {
                    web_auth_endpoint: scan_field(raw, WEB_AUTH_ENDPOINT_FIELD),
                    transfer_server: scan_field(raw, TRANSFER_SERVER_FIELD),
                }
            }
        }
    }
}

/// Endpoints the engines talk to, after fallbacks are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoints {
    pub auth_endpoint: String,
    pub transfer_server: String,
    pub used_auth_fallback: bool,
}

#[must_use]
pub fn descriptor_url(home_domain: &str) -> String {
    format!("{}{DESCRIPTOR_PATH}", home_domain.trim_end_matches('/'))
}

#[must_use]
pub fn fallback_auth_endpoint(home_domain: &str) -> String {
    format!("{}{FALLBACK_AUTH_PATH}", home_domain.trim_end_matches('/'))
}

/// Fetch the descriptor and resolve the auth and transfer endpoints. Never
/// fails: a missing field or an unreachable descriptor yields the fallbacks.
pub async fn discover(http: &AnchorHttp, config: &AnchorClientConfig) -> ResolvedEndpoints {
    let url = descriptor_url(&config.home_domain);
    let descriptor = match http.get_text(&url).await {
        Ok(raw) => AnchorDescriptor::parse(&raw),
        Err(error) => {
            tracing::warn!(%url, error = %error, "anchor descriptor fetch failed");
            AnchorDescriptor::default()
        }
    };
    resolve(config, descriptor)
}

#[must_use]
pub fn resolve(config: &AnchorClientConfig, descriptor: AnchorDescriptor) -> ResolvedEndpoints {
    let transfer_server = descriptor
        .transfer_server
        .unwrap_or_else(|| config.fallback_transfer_server().to_string());

    match descriptor.web_auth_endpoint {
        Some(auth_endpoint) => ResolvedEndpoints {
            auth_endpoint,
            transfer_server,
            used_auth_fallback: false,
        },
        None => {
            let auth_endpoint = fallback_auth_endpoint(&config.home_domain);
            tracing::warn!(
                field = WEB_AUTH_ENDPOINT_FIELD,
                fallback = %auth_endpoint,
                "auth endpoint not advertised, using non-standard fallback"
            );
            ResolvedEndpoints {
                auth_endpoint,
                transfer_server,
                used_auth_fallback: true,
            }
        }
    }
}

fn scan_field(raw: &str, field: &str) -> Option<String> {
    raw.lines().find_map(|line| {
        let (key, value) = line.trim().split_once('=')?;
        if key.trim() != field {
            return None;
        }
        parse_quoted_value(value.trim()).and_then(|value| non_empty_url(&value))
    })
}

fn parse_quoted_value(raw: &str) -> Option<String> {
    if raw.len() < 2 || !raw.starts_with('"') {
        return None;
    }
    let inner = &raw[1..];
    let end = inner.find('"')?;
    Some(inner[..end].to_string())
}

fn non_empty_url(value: &str) -> Option<String> {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AnchorClientConfig {
        AnchorClientConfig::new("https://anchor.example.com").expect("config")
    }

    #[test]
    fn parse_reads_fields_from_valid_toml() {
        let descriptor = AnchorDescriptor::parse(
            r#"
NETWORK_PASSPHRASE = "Test SDF Network ; September 2015"
WEB_AUTH_ENDPOINT = "https://anchor.example.com/sep10/auth"
TRANSFER_SERVER_SEP0024 = "https://anchor.example.com/sep24/"

[[CURRENCIES]]
code = "USDC"
"#,
        );
        assert_eq!(
            descriptor.web_auth_endpoint.as_deref(),
            Some("https://anchor.example.com/sep10/auth")
        );
        assert_eq!(
            descriptor.transfer_server.as_deref(),
            Some("https://anchor.example.com/sep24")
        );
    }

    #[test]
    fn parse_scans_lines_when_toml_is_malformed() {
        let descriptor = AnchorDescriptor::parse(
            "WEB_AUTH_ENDPOINT = \"https://a.example/auth\"\n[[broken\nORG_NAME = ",
        );
        assert_eq!(
            descriptor.web_auth_endpoint.as_deref(),
            Some("https://a.example/auth")
        );
        assert_eq!(descriptor.transfer_server, None);
    }

    #[test]
    fn resolve_falls_back_to_home_domain_auth() {
        let resolved = resolve(&config(), AnchorDescriptor::default());
        assert_eq!(resolved.auth_endpoint, "https://anchor.example.com/auth");
        assert_eq!(resolved.transfer_server, "https://anchor.example.com");
        assert!(resolved.used_auth_fallback);
    }

    #[test]
    fn resolve_prefers_configured_transfer_server_over_home_domain() {
        let mut config = config();
        config.transfer_server = Some("https://transfers.example.com".to_string());
        let resolved = resolve(
            &config,
            AnchorDescriptor {
                web_auth_endpoint: Some("https://anchor.example.com/web_auth".to_string()),
                transfer_server: None,
            },
        );
        assert_eq!(resolved.transfer_server, "https://transfers.example.com");
        assert!(!resolved.used_auth_fallback);
    }

    #[test]
    fn empty_field_counts_as_absent() {
        let descriptor = AnchorDescriptor::parse("WEB_AUTH_ENDPOINT = \"\"\n");
        assert_eq!(descriptor.web_auth_endpoint, None);
    }
}
