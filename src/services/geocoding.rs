//! Обогащение точки поиска городом и страной через обратное геокодирование.
//!
//! Ошибки геокодера никогда не ломают поиск: сервис поиска откатывается на
//! голые координаты.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{CircuitBreakerConfig, GeoConfig};
use crate::error::{AppError, AppResult};
use crate::geo::GeoPoint;
use crate::models::SearchLocation;
use crate::services::circuit_breaker::CircuitBreaker;

#[async_trait]
pub trait LocationEnricher: Send + Sync {
    async fn enrich(&self, point: GeoPoint) -> AppResult<SearchLocation>;
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    address: Option<ReverseAddress>,
}

#[derive(Debug, Deserialize)]
struct ReverseAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    country: Option<String>,
}

/// Клиент Nominatim-совместимого `/reverse`.
pub struct ReverseGeocoder {
    client: reqwest::Client,
    base_url: String,
    breaker: CircuitBreaker,
}

impl ReverseGeocoder {
    pub fn new(base_url: impl Into<String>, timeout: Duration, breaker: CircuitBreaker) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("event-discovery/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Geocoder(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            breaker,
        })
    }

    /// `None`, если URL геокодера не настроен.
    pub fn from_config(geo: &GeoConfig, breaker: &CircuitBreakerConfig) -> AppResult<Option<Self>> {
        match &geo.geocoder_url {
            Some(url) => Self::new(
                url.clone(),
                Duration::from_millis(geo.geocoder_timeout_ms),
                CircuitBreaker::from_config(breaker),
            )
            .map(Some),
            None => Ok(None),
        }
    }

    async fn fetch(&self, point: GeoPoint) -> Result<ReverseResponse, reqwest::Error> {
        self.client
            .get(format!("{}/reverse", self.base_url))
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", point.latitude.to_string()),
                ("lon", point.longitude.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<ReverseResponse>()
            .await
    }
}

#[async_trait]
impl LocationEnricher for ReverseGeocoder {
    async fn enrich(&self, point: GeoPoint) -> AppResult<SearchLocation> {
        if !self.breaker.can_execute() {
            return Err(AppError::Geocoder("circuit breaker is open".to_string()));
        }

        match self.fetch(point).await {
            Ok(response) => {
                self.breaker.record_success();
                let mut location = SearchLocation::from(point);
                if let Some(address) = response.address {
                    location.city = address.city.or(address.town).or(address.village);
                    location.country = address.country;
                }
                debug!("reverse geocoded {:?} -> {:?}", point, location.city);
                Ok(location)
            }
            Err(e) => {
                self.breaker.record_failure();
                warn!("reverse geocoding failed: {}", e);
                Err(AppError::Geocoder(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn geocoder(url: String, threshold: u32) -> ReverseGeocoder {
        ReverseGeocoder::new(
            url,
            Duration::from_secs(2),
            CircuitBreaker::new(threshold, Duration::from_secs(60)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn resolves_city_and_country() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/reverse"))
            .and(query_param("format", "jsonv2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "address": { "town": "Talgar", "country": "Kazakhstan" }
            })))
            .mount(&server)
            .await;

        let location = geocoder(server.uri(), 3)
            .enrich(GeoPoint { latitude: 43.3, longitude: 77.2 })
            .await
            .unwrap();

        assert_eq!(location.city.as_deref(), Some("Talgar"));
        assert_eq!(location.country.as_deref(), Some("Kazakhstan"));
        assert_eq!(location.latitude, 43.3);
    }

    #[tokio::test]
    async fn opens_breaker_after_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/reverse"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let geocoder = geocoder(server.uri(), 1);
        let point = GeoPoint { latitude: 0.0, longitude: 0.0 };

        assert!(matches!(geocoder.enrich(point).await, Err(AppError::Geocoder(_))));
        // второй вызов не доходит до сервера
        assert!(matches!(geocoder.enrich(point).await, Err(AppError::Geocoder(_))));
    }
}
