//! `CartwiseApi` over HTTP

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::api::{CartwiseApi, NewChatMessage};
use crate::error::ApiError;
use crate::models::{Cart, ChatMessage, ItemRecord, PriceChangeRecord, Wishlist};

#[derive(Debug, Clone)]
pub struct HttpApiConfig {
    /// API root, e.g. `http://localhost:5000/api`
    pub base_url: String,
    pub request_timeout: Duration,
}

impl Default for HttpApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// REST client for the Cartwise backend
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    base_url: Url,
}

impl HttpApi {
    pub fn new(config: &HttpApiConfig) -> Result<Self, ApiError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(config.base_url.clone()));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json(&self, url: Url) -> Result<Value, ApiError> {
        debug!("GET {}", url);
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.json::<Value>().await?)
    }

    async fn get_list<T: DeserializeOwned>(&self, url: Url) -> Result<Option<Vec<T>>, ApiError> {
        let endpoint = url.path().to_string();
        let body = self.get_json(url).await?;
        Ok(decode_list(&endpoint, body))
    }
}

/// Decode each element on its own so one bad row does not hide the rest
fn decode_list<T: DeserializeOwned>(endpoint: &str, body: Value) -> Option<Vec<T>> {
    let Value::Array(rows) = body else {
        warn!("Expected a list from {}, got {}", endpoint, type_name(&body));
        return None;
    };

    let total = rows.len();
    let decoded: Vec<T> = rows
        .into_iter()
        .filter_map(|row| match serde_json::from_value(row) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Skipping malformed row from {}: {}", endpoint, e);
                None
            }
        })
        .collect();
    if decoded.len() < total {
        debug!("Decoded {}/{} rows from {}", decoded.len(), total, endpoint);
    }
    Some(decoded)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl CartwiseApi for HttpApi {
    async fn wishlist_price_changes(
        &self,
        since: DateTime<Utc>,
        only_wishlist_items: bool,
        user_id: &str,
    ) -> Result<Vec<PriceChangeRecord>, ApiError> {
        let mut url = self.endpoint(&["items", "wishlist-price-changes"])?;
        url.query_pairs_mut()
            .append_pair(
                "lastCheckedTimestamp",
                &since.to_rfc3339_opts(SecondsFormat::Millis, true),
            )
            .append_pair("onlyWishlistItems", &only_wishlist_items.to_string())
            .append_pair("userId", user_id);
        Ok(self.get_list(url).await?.unwrap_or_default())
    }

    async fn items_with_recent_prices(
        &self,
        ids: &[String],
        from_wishlists: bool,
        user_id: &str,
    ) -> Result<Vec<ItemRecord>, ApiError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut url = self.endpoint(&["items"])?;
        url.query_pairs_mut()
            .append_pair("ids", &ids.join(","))
            .append_pair("includeRecentPrices", "true")
            .append_pair("fromWishlists", &from_wishlists.to_string())
            .append_pair("userId", user_id);
        Ok(self.get_list(url).await?.unwrap_or_default())
    }

    async fn chat_messages(&self, cart_id: &str) -> Result<Option<Vec<ChatMessage>>, ApiError> {
        let url = self.endpoint(&["chat", cart_id])?;
        self.get_list(url).await
    }

    async fn post_chat_message(
        &self,
        cart_id: &str,
        message: &NewChatMessage,
    ) -> Result<ChatMessage, ApiError> {
        let url = self.endpoint(&["chat", cart_id])?;
        debug!("POST {}", url);
        let response = self.client.post(url.clone()).json(message).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body: Value = response.json().await?;
        if let Ok(stored) = serde_json::from_value::<ChatMessage>(body.clone()) {
            return Ok(stored);
        }

        // Some deployments echo back only the id
        let id = body
            .get("_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ApiError::Decode {
                endpoint: url.path().to_string(),
                reason: "response has no _id".to_string(),
            })?;
        Ok(ChatMessage {
            id: Some(id.to_string()),
            sender: message.sender.clone(),
            sender_id: message.sender_id.clone(),
            message: message.message.clone(),
            timestamp: message.timestamp,
            client_id: message.client_id.clone(),
            cart_id: Some(cart_id.to_string()),
        })
    }

    async fn user_carts(&self, user_id: &str) -> Result<Vec<Cart>, ApiError> {
        let mut url = self.endpoint(&["carts"])?;
        url.query_pairs_mut().append_pair("userId", user_id);
        Ok(self.get_list(url).await?.unwrap_or_default())
    }

    async fn user_wishlist(&self, user_id: &str) -> Result<Option<Wishlist>, ApiError> {
        let mut url = self.endpoint(&["wishlists"])?;
        url.query_pairs_mut().append_pair("userId", user_id);
        let endpoint = url.path().to_string();
        let body = self.get_json(url).await?;

        match body {
            Value::Array(_) => {
                Ok(decode_list::<Wishlist>(&endpoint, body).and_then(|lists| lists.into_iter().next()))
            }
            Value::Object(_) => serde_json::from_value(body)
                .map(Some)
                .map_err(|e| ApiError::Decode {
                    endpoint,
                    reason: e.to_string(),
                }),
            // Not a wishlist at all; callers keep what they had
            other => Err(ApiError::Decode {
                endpoint,
                reason: format!("expected a wishlist, got {other}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn api(base: &str) -> HttpApi {
        HttpApi::new(&HttpApiConfig {
            base_url: base.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let api = api("http://localhost:5000/api");
        assert_eq!(
            api.endpoint(&["chat", "c 1"]).unwrap().as_str(),
            "http://localhost:5000/api/chat/c%201"
        );

        let api = self::api("http://localhost:5000/api/");
        assert_eq!(
            api.endpoint(&["items"]).unwrap().as_str(),
            "http://localhost:5000/api/items"
        );
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let result = HttpApi::new(&HttpApiConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(ApiError::InvalidUrl(_))));
    }

    #[test]
    fn test_decode_list_skips_bad_rows() {
        let rows: Option<Vec<Cart>> = decode_list(
            "/carts",
            json!([{"_id": "c1"}, {"name": "missing id"}, {"_id": "c2"}]),
        );
        let ids: Vec<String> = rows.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["c1", "c2"]);

        let not_a_list: Option<Vec<Cart>> = decode_list("/carts", json!({"error": "nope"}));
        assert!(not_a_list.is_none());
    }
}
