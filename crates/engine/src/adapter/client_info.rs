//! Best-effort client IP / geolocation lookup.
//!
//! Uses `ureq` (sync) wrapped in `tokio::task::spawn_blocking` to avoid
//! blocking the async runtime. Both lookups degrade rather than error:
//! the IP falls back to `127.0.0.1`, geolocation to `None`. The
//! geolocation lookup is bounded to 5 seconds.

use std::time::Duration;

use async_trait::async_trait;
use firma_storage::GeoPoint;

/// Geolocation lookups never wait longer than this.
pub const GEO_TIMEOUT: Duration = Duration::from_secs(5);

const FALLBACK_IP: &str = "127.0.0.1";

#[async_trait]
pub trait ClientInfoResolver: Send + Sync {
    /// Resolve the caller-side public IP. Never fails; falls back to
    /// `127.0.0.1`.
    async fn resolve_ip(&self) -> String;

    /// Best-effort geolocation. Failure or timeout yields `None`, not an
    /// error.
    async fn resolve_geolocation(&self) -> Option<GeoPoint>;

    /// IANA timezone name recorded with evidence bundles.
    fn timezone(&self) -> String {
        "UTC".to_string()
    }
}

/// Fixed resolver for tests and offline deployments.
#[derive(Debug, Clone)]
pub struct StaticResolver {
    pub ip: String,
    pub geolocation: Option<GeoPoint>,
    pub tz: String,
}

impl StaticResolver {
    pub fn localhost() -> Self {
        Self {
            ip: FALLBACK_IP.to_string(),
            geolocation: None,
            tz: "UTC".to_string(),
        }
    }
}

#[async_trait]
impl ClientInfoResolver for StaticResolver {
    async fn resolve_ip(&self) -> String {
        self.ip.clone()
    }

    async fn resolve_geolocation(&self) -> Option<GeoPoint> {
        self.geolocation
    }

    fn timezone(&self) -> String {
        self.tz.clone()
    }
}

/// Resolver backed by two HTTP endpoints: one returning the public IP as
/// plain text, one returning `{"lat": .., "lon": .., "accuracy_m": ..}`.
pub struct HttpClientInfoResolver {
    ip_endpoint: String,
    geo_endpoint: Option<String>,
    tz: String,
}

impl HttpClientInfoResolver {
    pub fn new(ip_endpoint: impl Into<String>, geo_endpoint: Option<String>) -> Self {
        Self {
            ip_endpoint: ip_endpoint.into(),
            geo_endpoint,
            tz: "UTC".to_string(),
        }
    }

    pub fn with_timezone(mut self, tz: impl Into<String>) -> Self {
        self.tz = tz.into();
        self
    }

    fn fetch_text(url: String) -> Option<String> {
        let agent = ureq::Agent::new_with_defaults();
        let response = agent.get(&url).call().ok()?;
        let body = response.into_body().read_to_string().ok()?;
        let trimmed = body.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    fn fetch_geo(url: String) -> Option<GeoPoint> {
        let agent = ureq::Agent::new_with_defaults();
        let response = agent.get(&url).call().ok()?;
        let value: serde_json::Value = response.into_body().read_json().ok()?;
        Some(GeoPoint {
            lat: value.get("lat")?.as_f64()?,
            lon: value.get("lon")?.as_f64()?,
            accuracy_m: value
                .get("accuracy_m")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
        })
    }
}

#[async_trait]
impl ClientInfoResolver for HttpClientInfoResolver {
    async fn resolve_ip(&self) -> String {
        let url = self.ip_endpoint.clone();
        let lookup = tokio::task::spawn_blocking(move || Self::fetch_text(url));
        match tokio::time::timeout(GEO_TIMEOUT, lookup).await {
            Ok(Ok(Some(ip))) => ip,
            _ => FALLBACK_IP.to_string(),
        }
    }

    async fn resolve_geolocation(&self) -> Option<GeoPoint> {
        let url = self.geo_endpoint.clone()?;
        let lookup = tokio::task::spawn_blocking(move || Self::fetch_geo(url));
        match tokio::time::timeout(GEO_TIMEOUT, lookup).await {
            Ok(Ok(geo)) => geo,
            _ => None,
        }
    }

    fn timezone(&self) -> String {
        self.tz.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_resolver_returns_configured_values() {
        let resolver = StaticResolver {
            ip: "203.0.113.7".to_string(),
            geolocation: Some(GeoPoint {
                lat: 40.4,
                lon: -3.7,
                accuracy_m: 50.0,
            }),
            tz: "Europe/Madrid".to_string(),
        };
        assert_eq!(resolver.resolve_ip().await, "203.0.113.7");
        assert_eq!(resolver.resolve_geolocation().await.unwrap().lat, 40.4);
        assert_eq!(resolver.timezone(), "Europe/Madrid");
    }

    #[tokio::test]
    async fn http_resolver_falls_back_on_unreachable_endpoint() {
        // Reserved TEST-NET address; the connect fails fast.
        let resolver =
            HttpClientInfoResolver::new("http://192.0.2.1:9/ip", Some("http://192.0.2.1:9/geo".to_string()));
        assert_eq!(resolver.resolve_ip().await, "127.0.0.1");
        assert!(resolver.resolve_geolocation().await.is_none());
    }
}
