use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::ProviderKey;

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings of an [`OnlineTileLayer`](super::OnlineTileLayer).
///
/// Can be deserialized from a configuration file; missing fields take their default values.
///
/// ```
/// use meridian::layer::FetchOptions;
///
/// let options: FetchOptions = serde_json::from_str(r#"{ "offline_mode": true }"#)?;
/// assert!(options.offline_mode);
/// assert!(options.verify_tls);
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchOptions {
    /// Value of the `User-Agent` header of tile requests.
    pub user_agent: String,
    /// Check the certificate of the tile server.
    pub verify_tls: bool,
    /// Allow intermediate HTTP caches to answer with stale responses.
    pub prefer_cache: bool,
    /// Requests that take longer are cancelled. `None` lets requests run forever.
    pub fetch_timeout: Option<Duration>,
    /// Only use tiles from the persistent cache, never request them from the tile server.
    pub offline_mode: bool,
    /// How tiles are named in the persistent cache.
    pub provider_key: ProviderKey,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            user_agent: concat!("meridian/", env!("CARGO_PKG_VERSION")).to_owned(),
            verify_tls: true,
            prefer_cache: true,
            fetch_timeout: Some(DEFAULT_FETCH_TIMEOUT),
            offline_mode: false,
            provider_key: ProviderKey::default(),
        }
    }
}

impl FetchOptions {
    /// Returns true if none of the settings used only by the built-in HTTP fetcher differ from
    /// the defaults.
    pub(crate) fn has_default_http_settings(&self) -> bool {
        let default = Self::default();
        self.user_agent == default.user_agent
            && self.verify_tls == default.verify_tls
            && self.prefer_cache == default.prefer_cache
    }
}
