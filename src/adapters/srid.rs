use crate::domain::ports::SridLookup;
use crate::utils::error::{Result, SpandexError};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_PRJ2EPSG_ENDPOINT: &str = "http://prj2epsg.org/search.json";

/// EPSG code declared by the outermost `AUTHORITY["EPSG", ...]` of a
/// projection WKT. ESRI-flavoured WKT usually has none.
pub fn prj_authority_srid(wkt: &str) -> Option<i32> {
    let re = Regex::new(r#"AUTHORITY\[\s*"EPSG"\s*,\s*"?(\d+)"?\s*\]"#).ok()?;
    re.captures_iter(wkt)
        .last()
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    exact: bool,
    #[serde(default)]
    codes: Vec<SearchCode>,
}

#[derive(Debug, Deserialize)]
struct SearchCode {
    code: serde_json::Value,
}

impl SearchCode {
    fn srid(&self) -> Option<i32> {
        match &self.code {
            serde_json::Value::String(s) => s.trim().parse().ok(),
            serde_json::Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
            _ => None,
        }
    }
}

/// Client for the prj2epsg search API.
pub struct Prj2EpsgClient {
    client: Client,
    endpoint: String,
}

impl Prj2EpsgClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = Client::builder().timeout(timeout).build()?;
        Ok(self)
    }
}

impl Default for Prj2EpsgClient {
    fn default() -> Self {
        Self::new(DEFAULT_PRJ2EPSG_ENDPOINT)
    }
}

#[async_trait]
impl SridLookup for Prj2EpsgClient {
    async fn lookup(&self, wkt: &str) -> Result<Option<i32>> {
        tracing::debug!("📡 Querying prj2epsg at {}", self.endpoint);
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("terms", wkt), ("mode", "wkt")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SpandexError::processing(format!(
                "prj2epsg returned HTTP {}",
                response.status()
            )));
        }

        let body: SearchResponse = response.json().await?;
        if !body.exact {
            tracing::debug!("prj2epsg found no exact match");
            return Ok(None);
        }
        Ok(body.codes.first().and_then(SearchCode::srid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    const UTM_10N: &str = r#"PROJCS["NAD83 / UTM zone 10N",GEOGCS["NAD83",DATUM["North_American_Datum_1983",SPHEROID["GRS 1980",6378137,298.257222101,AUTHORITY["EPSG","7019"]],AUTHORITY["EPSG","6269"]],AUTHORITY["EPSG","4269"]],UNIT["metre",1,AUTHORITY["EPSG","9001"]],AUTHORITY["EPSG","26910"]]"#;

    #[test]
    fn test_prj_authority_srid() {
        assert_eq!(prj_authority_srid(UTM_10N), Some(26910));
        assert_eq!(prj_authority_srid(r#"PROJCS["NAD_1983_UTM_Zone_10N"]"#), None);
    }

    #[tokio::test]
    async fn test_lookup_exact_match() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/search.json").query_param("mode", "wkt");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"exact": true, "codes": [{"code": "2227", "name": "NAD83 / California zone 3 (ftUS)"}]}"#);
        });

        let client = Prj2EpsgClient::new(server.url("/search.json"));
        let srid = client.lookup("PROJCS[\"custom\"]").await.unwrap();
        mock.assert();
        assert_eq!(srid, Some(2227));
    }

    #[tokio::test]
    async fn test_lookup_inexact_and_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/search.json");
            then.status(200).body(r#"{"exact": false, "codes": [{"code": 1}]}"#);
        });
        server.mock(|when, then| {
            when.method(GET).path("/down");
            then.status(503);
        });

        let inexact = Prj2EpsgClient::new(server.url("/search.json"));
        assert_eq!(inexact.lookup("x").await.unwrap(), None);

        let down = Prj2EpsgClient::new(server.url("/down"));
        assert!(down.lookup("x").await.is_err());
    }
}
