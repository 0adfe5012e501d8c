use crate::costs::round_to;
use chrono::{DateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::{RequestBuilder, StatusCode};
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const GLOWMARKT_API_BASE: &str = "https://api.glowmarkt.com/api/v0-1";
pub const GLOWMARKT_APP_ID: &str = "b0f1b774-a586-4f72-9edd-27ead8aa7a8d";
/// Metering days follow the UK calendar unless configured otherwise.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::London;

pub const CLASSIFIER_ELECTRICITY_CONSUMPTION: &str = "electricity.consumption";
pub const CLASSIFIER_ELECTRICITY_COST: &str = "electricity.consumption.cost";
pub const CLASSIFIER_GAS_CONSUMPTION: &str = "gas.consumption";
pub const CLASSIFIER_GAS_COST: &str = "gas.consumption.cost";

/// Lifetime the service documents for issued tokens.
const TOKEN_LIFETIME_DAYS: i64 = 6;
const READING_PERIOD: &str = "PT30M";
const QUERY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GlowmarktError {
    /// Rejected credentials or an auth response that could not be trusted.
    #[error("{0}")]
    Auth(String),
    /// Connectivity problems and unexpected HTTP statuses.
    #[error("{0}")]
    Api(String),
}

/// A single meter data stream, keyed by its classifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    pub resource_id: String,
    pub classifier: String,
    pub name: String,
    pub base_unit: String,
}

/// Account level grouping that owns the resources, usually one per property.
#[derive(Default, Debug, Clone, PartialEq, Deserialize)]
pub struct VirtualEntity {
    #[serde(rename = "veId", default)]
    pub ve_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Deserialize)]
struct ResourceList {
    #[serde(default)]
    resources: Option<Vec<Value>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceDescriptor {
    resource_id: Option<String>,
    classifier: Option<String>,
    name: Option<String>,
    base_unit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ReadingsResponse {
    #[serde(default)]
    status: Option<String>,
    /// `[unix timestamp, value]` pairs; a null value is a missing interval.
    #[serde(default)]
    data: Option<Vec<(f64, Option<f64>)>>,
}

pub struct GlowmarktClient {
    username: String,
    password: String,
    base_url: String,
    app_id: String,
    timezone: Tz,
    virtual_entity_id: Option<String>,
    client: reqwest::Client,
    token: Option<String>,
    token_expiry: Option<DateTime<Utc>>,
    resources: BTreeMap<String, Resource>,
}

impl GlowmarktClient {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            base_url: GLOWMARKT_API_BASE.to_string(),
            app_id: GLOWMARKT_APP_ID.to_string(),
            timezone: DEFAULT_TIMEZONE,
            virtual_entity_id: None,
            client: reqwest::Client::new(),
            token: None,
            token_expiry: None,
            resources: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &crate::config::GlowConfig) -> Self {
        Self::new(&config.username, &config.password)
            .with_base_url(&config.api_base)
            .with_app_id(&config.app_id)
            .with_timezone(config.timezone)
            .with_virtual_entity(config.virtual_entity_id.clone())
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_app_id(mut self, app_id: &str) -> Self {
        self.app_id = app_id.to_string();
        self
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Restricts discovery to a single virtual entity when no selector is passed explicitly.
    pub fn with_virtual_entity(mut self, virtual_entity_id: Option<String>) -> Self {
        self.virtual_entity_id = virtual_entity_id;
        self
    }

    pub fn resources(&self) -> &BTreeMap<String, Resource> {
        &self.resources
    }

    pub async fn authenticate(&mut self) -> Result<(), GlowmarktError> {
        let response = self
            .client
            .post(format!("{}/auth", self.base_url))
            .header("applicationId", &self.app_id)
            .json(&AuthRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await
            .map_err(|e| GlowmarktError::Api(format!("Connection error: {e}")))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(GlowmarktError::Auth(
                "Invalid username or password".to_string(),
            ));
        }
        let response = response
            .error_for_status()
            .map_err(|e| GlowmarktError::Api(format!("Authentication request failed: {e}")))?;
        let body: AuthResponse = response.json().await.map_err(|e| {
            GlowmarktError::Auth(format!("Authentication failed: malformed response: {e}"))
        })?;

        match body {
            AuthResponse {
                valid: true,
                token: Some(token),
            } => {
                self.token = Some(token);
                self.token_expiry = Some(Utc::now() + TimeDelta::days(TOKEN_LIFETIME_DAYS));
                info!("Authenticated against Glowmarkt as {}", self.username);
                Ok(())
            }
            _ => Err(GlowmarktError::Auth(
                "Authentication failed: invalid response".to_string(),
            )),
        }
    }

    pub async fn ensure_authenticated(&mut self) -> Result<(), GlowmarktError> {
        let expired = match (&self.token, self.token_expiry) {
            (Some(_), Some(expiry)) => Utc::now() > expiry,
            _ => true,
        };
        if expired {
            self.authenticate().await?;
        }
        Ok(())
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("applicationId", &self.app_id)
            .header("token", self.token.as_deref().unwrap_or_default())
    }

    pub async fn get_virtual_entities(&mut self) -> Result<Vec<VirtualEntity>, GlowmarktError> {
        self.ensure_authenticated().await?;
        let body: Value = self
            .authorized(self.client.get(format!("{}/virtualentity", self.base_url)))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| GlowmarktError::Api(format!("Failed to get virtual entities: {e}")))?
            .json()
            .await
            .map_err(|e| GlowmarktError::Api(format!("Failed to get virtual entities: {e}")))?;
        Ok(parse_virtual_entities(body))
    }

    /// Rebuilds the resource catalog from scratch.
    ///
    /// Entities whose resource list cannot be fetched are logged and skipped so one
    /// broken property does not hide the others.
    pub async fn discover_resources(
        &mut self,
        selector: Option<&str>,
    ) -> Result<BTreeMap<String, Resource>, GlowmarktError> {
        let selector = selector
            .map(str::to_owned)
            .or_else(|| self.virtual_entity_id.clone());
        self.ensure_authenticated().await?;
        let entities = self.get_virtual_entities().await?;

        let mut resources = BTreeMap::new();
        for ve_id in entities.into_iter().filter_map(|entity| entity.ve_id) {
            if selector.as_deref().is_some_and(|wanted| wanted != ve_id) {
                continue;
            }
            match self.fetch_entity_resources(&ve_id).await {
                Ok(found) => {
                    for resource in found {
                        resources.insert(resource.classifier.clone(), resource);
                    }
                }
                Err(e) => error!("Failed to get resources for {ve_id}: {e}"),
            }
        }
        if let Some(wanted) = selector.as_deref() {
            if resources.is_empty() {
                warn!("No resources found under virtual entity {wanted}");
            }
        }

        info!(
            "Discovered {} resources: {:?}",
            resources.len(),
            resources.keys().collect::<Vec<_>>()
        );
        self.resources = resources;
        Ok(self.resources.clone())
    }

    async fn fetch_entity_resources(&self, ve_id: &str) -> Result<Vec<Resource>, reqwest::Error> {
        let list: ResourceList = self
            .authorized(
                self.client
                    .get(format!("{}/virtualentity/{ve_id}/resources", self.base_url)),
            )
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(list
            .resources
            .unwrap_or_default()
            .into_iter()
            .filter_map(parse_resource)
            .collect())
    }

    /// Today's consumption for one resource, summed from half-hourly intervals.
    ///
    /// `Ok(None)` means nothing could be obtained for this resource; only
    /// authentication failures are returned as errors.
    pub async fn get_daily_reading(
        &mut self,
        resource_id: &str,
    ) -> Result<Option<f64>, GlowmarktError> {
        self.ensure_authenticated().await?;

        let (from, to) = day_window(Utc::now(), self.timezone);
        let request = self
            .authorized(
                self.client
                    .get(format!("{}/resource/{resource_id}/readings", self.base_url)),
            )
            .query(&[
                ("from", from.format(QUERY_TIME_FORMAT).to_string()),
                ("to", to.format(QUERY_TIME_FORMAT).to_string()),
                ("period", READING_PERIOD.to_string()),
                ("offset", "0".to_string()),
                ("function", "sum".to_string()),
            ]);

        let response = match request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
        {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to get reading for {resource_id}: {e}");
                return Ok(None);
            }
        };
        let body: ReadingsResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to decode reading for {resource_id}: {e}");
                return Ok(None);
            }
        };
        debug!("API response for {resource_id}: {body:?}");

        let total = sum_intervals(&body);
        match total {
            Some(total) => debug!("Summed readings for {resource_id}: {total:.3}"),
            None => debug!(
                "No data for {resource_id} (status {:?})",
                body.status.as_deref().unwrap_or("missing")
            ),
        }
        Ok(total)
    }

    pub async fn get_all_readings(
        &mut self,
    ) -> Result<BTreeMap<String, Option<f64>>, GlowmarktError> {
        if self.resources.is_empty() {
            self.discover_resources(None).await?;
        }
        self.fetch_readings().await
    }

    /// Reads every resource already in the catalog, without rediscovering.
    pub async fn fetch_readings(
        &mut self,
    ) -> Result<BTreeMap<String, Option<f64>>, GlowmarktError> {
        let targets: Vec<(String, String)> = self
            .resources
            .values()
            .map(|resource| (resource.classifier.clone(), resource.resource_id.clone()))
            .collect();

        let mut readings = BTreeMap::new();
        for (classifier, resource_id) in targets {
            let value = self.get_daily_reading(&resource_id).await?;
            readings.insert(classifier, value);
        }
        Ok(readings)
    }

    /// Authenticates and discovers, returning how many resources were found.
    pub async fn connection_check(&mut self) -> Result<usize, GlowmarktError> {
        self.authenticate().await?;
        Ok(self.discover_resources(None).await?.len())
    }

    pub async fn test_connection(&mut self) -> bool {
        match self.connection_check().await {
            Ok(count) => count > 0,
            Err(e) => {
                warn!("Connection test failed: {e}");
                false
            }
        }
    }
}

/// `[local midnight, now)` expressed in UTC.
pub fn day_window(now: DateTime<Utc>, timezone: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let midnight = now
        .with_timezone(&timezone)
        .date_naive()
        .and_time(NaiveTime::MIN);
    // A DST gap can swallow midnight itself
    let start = timezone
        .from_local_datetime(&midnight)
        .earliest()
        .or_else(|| {
            timezone
                .from_local_datetime(&(midnight + TimeDelta::hours(1)))
                .earliest()
        })
        .map_or(now, |start| start.with_timezone(&Utc));
    (start, now)
}

fn sum_intervals(response: &ReadingsResponse) -> Option<f64> {
    if response.status.as_deref() != Some("OK") {
        return None;
    }
    let data = response.data.as_deref().filter(|data| !data.is_empty())?;
    let total: f64 = data.iter().filter_map(|(_, value)| *value).sum();
    Some(round_to(total, 3))
}

fn parse_virtual_entities(body: Value) -> Vec<VirtualEntity> {
    match body {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        other => {
            warn!("Unexpected virtual entity payload: {other}");
            Vec::new()
        }
    }
}

fn parse_resource(raw: Value) -> Option<Resource> {
    let descriptor: ResourceDescriptor = serde_json::from_value(raw).ok()?;
    let resource_id = descriptor.resource_id.filter(|id| !id.is_empty())?;
    let classifier = descriptor.classifier.filter(|c| !c.is_empty())?;
    Some(Resource {
        resource_id,
        name: descriptor.name.unwrap_or_else(|| classifier.clone()),
        base_unit: descriptor.base_unit.unwrap_or_default(),
        classifier,
    })
}
