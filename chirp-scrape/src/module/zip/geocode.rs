///! ZIP code geocoding
///!
///! Zippopotam.us gives the coordinates of a ZIP code, Nominatim's reverse
///! lookup turns those into a `"County, State"` place title.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{ChirpError, Result};
use crate::module::catalog::PageSource;

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Place title for a five-digit ZIP code, `None` when the services do not know it.
    async fn place_for_zip(&self, zip: &str) -> Result<Option<String>>;
}

#[derive(Debug, Deserialize)]
struct ZippopotamResponse {
    #[serde(default)]
    places: Vec<ZippopotamPlace>,
}

#[derive(Debug, Deserialize)]
struct ZippopotamPlace {
    latitude: String,
    longitude: String,
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    #[serde(default)]
    address: NominatimAddress,
}

#[derive(Debug, Default, Deserialize)]
struct NominatimAddress {
    county: Option<String>,
    city: Option<String>,
    town: Option<String>,
    state: Option<String>,
}

impl NominatimAddress {
    fn place_title(&self) -> Option<String> {
        let state = self.state.as_deref()?;
        let place = self
            .county
            .as_deref()
            .or(self.city.as_deref())
            .or(self.town.as_deref())?;
        Some(format!("{}, {}", place, state))
    }
}

pub struct HttpGeocoder {
    source: Arc<dyn PageSource>,
    zippopotam_url: String,
    nominatim_url: String,
}

impl HttpGeocoder {
    pub fn new(
        source: Arc<dyn PageSource>,
        zippopotam_url: impl Into<String>,
        nominatim_url: impl Into<String>,
    ) -> Self {
        Self {
            source,
            zippopotam_url: zippopotam_url.into().trim_end_matches('/').to_string(),
            nominatim_url: nominatim_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn coordinates(&self, zip: &str) -> Result<Option<(String, String)>> {
        let url = format!("{}/us/{}", self.zippopotam_url, urlencoding::encode(zip));
        let page = self.source.fetch(&url).await?;
        if !page.is_success() {
            tracing::debug!("Zippopotam has no entry for {} (HTTP {})", zip, page.status);
            return Ok(None);
        }

        let response: ZippopotamResponse = serde_json::from_str(&page.body)
            .map_err(|e| ChirpError::parse("zippopotam response", e.to_string()))?;
        Ok(response
            .places
            .into_iter()
            .next()
            .map(|p| (p.latitude, p.longitude)))
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn place_for_zip(&self, zip: &str) -> Result<Option<String>> {
        let Some((lat, lon)) = self.coordinates(zip).await? else {
            return Ok(None);
        };

        let url = format!(
            "{}/reverse?format=jsonv2&lat={}&lon={}&addressdetails=1",
            self.nominatim_url,
            urlencoding::encode(&lat),
            urlencoding::encode(&lon)
        );
        let page = self.source.fetch(&url).await?;
        if !page.is_success() {
            tracing::debug!("Nominatim reverse lookup for {} returned HTTP {}", zip, page.status);
            return Ok(None);
        }

        let response: NominatimResponse = serde_json::from_str(&page.body)
            .map_err(|e| ChirpError::parse("nominatim response", e.to_string()))?;
        let place = response.address.place_title();
        tracing::debug!("Geocoded {} -> {:?}", zip, place);
        Ok(place)
    }
}
