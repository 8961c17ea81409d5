//! HTTP price lookups against a CoinGecko-style asset endpoint and an
//! exchangerate-api-style FX endpoint.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::debug;

use onramp_types::FetchError;

use crate::config::PriceConfig;
use crate::error::EngineResult;
use crate::price_feed::PriceSource;

const ASSET_SOURCE: &str = "asset price";
const FX_SOURCE: &str = "fx rate";

pub struct HttpPriceSource {
    client: Client,
    asset_price_url: String,
    fx_url: String,
    asset_id: String,
    reference_fiat: String,
    target_fiat: String,
}

impl HttpPriceSource {
    pub fn new(config: &PriceConfig) -> EngineResult<Self> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;

        Ok(Self {
            client,
            asset_price_url: config.asset_price_url.clone(),
            fx_url: config.fx_url.trim_end_matches('/').to_string(),
            asset_id: config.asset_id.to_lowercase(),
            reference_fiat: config.reference_fiat.to_lowercase(),
            target_fiat: config.target_fiat.to_uppercase(),
        })
    }

    async fn get_json(&self, source_name: &str, request: reqwest::RequestBuilder) -> Result<Value, FetchError> {
        let response = request
            .send()
            .await
            .map_err(|e| FetchError::network(source_name, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::network(source_name, format!("HTTP {}", status)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::parse(source_name, e))
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn asset_price(&self) -> Result<Decimal, FetchError> {
        let request = self.client.get(&self.asset_price_url).query(&[
            ("ids", self.asset_id.as_str()),
            ("vs_currencies", self.reference_fiat.as_str()),
        ]);
        let body = self.get_json(ASSET_SOURCE, request).await?;
        debug!("Asset price response: {}", body);

        parse_asset_price(&body, &self.asset_id, &self.reference_fiat)
    }

    async fn fiat_rate(&self) -> Result<Decimal, FetchError> {
        let url = format!("{}/{}", self.fx_url, self.reference_fiat.to_uppercase());
        let body = self.get_json(FX_SOURCE, self.client.get(&url)).await?;

        parse_fiat_rate(&body, &self.target_fiat)
    }
}

/// Extract `{ <asset_id>: { <reference_fiat>: number } }`
pub fn parse_asset_price(body: &Value, asset_id: &str, reference_fiat: &str) -> Result<Decimal, FetchError> {
    let value = body
        .get(asset_id)
        .and_then(|asset| asset.get(reference_fiat))
        .ok_or_else(|| FetchError::missing_field(ASSET_SOURCE, &format!("{}.{}", asset_id, reference_fiat)))?;

    positive_decimal(ASSET_SOURCE, value)
}

/// Extract `{ rates: { <target_fiat>: number } }`
pub fn parse_fiat_rate(body: &Value, target_fiat: &str) -> Result<Decimal, FetchError> {
    let value = body
        .get("rates")
        .and_then(|rates| rates.get(target_fiat))
        .ok_or_else(|| FetchError::missing_field(FX_SOURCE, &format!("rates.{}", target_fiat)))?;

    positive_decimal(FX_SOURCE, value)
}

fn positive_decimal(source_name: &str, value: &Value) -> Result<Decimal, FetchError> {
    let number = value
        .as_f64()
        .ok_or_else(|| FetchError::parse(source_name, format!("expected a number, got {}", value)))?;

    let decimal = Decimal::try_from(number).map_err(|_| FetchError::invalid_value(source_name, number))?;
    if decimal <= Decimal::ZERO {
        return Err(FetchError::invalid_value(source_name, decimal));
    }
    Ok(decimal)
}
