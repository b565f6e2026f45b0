//! Draw catalog, winner orders and customer tagging over the admin platform's
//! REST API.

use std::time::Duration;

use async_trait::async_trait;
use lifecycle::{
    DrawCatalog, DrawConfig, DrawId, Email, OrderCreator, OrderId, Participant,
    ParticipantDirectory, PrizeLineItem, UpstreamError,
};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{endpoint, parse_base, status_error, transport_error, BuildError};

/// Connection settings for [`HttpUpstreamClient`].
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Root of the admin API, e.g. `https://admin.example.com/api/`.
    pub base_url: String,
    /// Bearer token sent with every request.
    pub access_token: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

/// REST client for the admin platform.
///
/// - `GET  {base}/draws/{id}` → draw configuration (`404` means the draw is gone)
/// - `POST {base}/orders` → prize order for one winner
/// - `POST {base}/customers` → create-or-tag a registered participant
#[derive(Debug, Clone)]
pub struct HttpUpstreamClient {
    client: Client,
    base_url: Url,
    access_token: Option<String>,
}

impl HttpUpstreamClient {
    /// Creates a client from `settings`.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot be
    /// constructed.
    pub fn new(settings: &UpstreamSettings) -> Result<Self, BuildError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: parse_base(&settings.base_url)?,
            access_token: settings.access_token.clone(),
        })
    }

    fn authorised(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DrawConfigBody {
    number_available: u32,
    prize_line_item: LineItemBody,
    #[serde(default)]
    secret: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineItemBody {
    variant_id: String,
    #[serde(default = "one")]
    quantity: u32,
}

fn one() -> u32 {
    1
}

impl From<DrawConfigBody> for DrawConfig {
    fn from(body: DrawConfigBody) -> Self {
        DrawConfig {
            number_available: body.number_available,
            prize_line_item: PrizeLineItem {
                variant_id: body.prize_line_item.variant_id,
                quantity: body.prize_line_item.quantity,
            },
            secret: body.secret,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderBody<'a> {
    draw_id: &'a str,
    email: &'a str,
    line_items: [LineItemBody; 1],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedOrderBody {
    order_id: String,
}

/// Upsert payload: the platform creates the customer if the email is new and
/// otherwise adds the tags.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TagCustomerBody<'a> {
    email: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    tags: [&'a str; 1],
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

#[async_trait]
impl DrawCatalog for HttpUpstreamClient {
    #[instrument(skip(self), fields(draw_id = %draw_id))]
    async fn fetch_draw_config(
        &self,
        draw_id: &DrawId,
    ) -> Result<Option<DrawConfig>, UpstreamError> {
        let url = endpoint(&self.base_url, &["draws", draw_id.as_str()])?;
        let response = self
            .authorised(self.client.get(url))
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("draw not found upstream");
            return Ok(None);
        }
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &headers, body));
        }

        let body: DrawConfigBody =
            response
                .json()
                .await
                .map_err(|e| UpstreamError::InvalidResponse {
                    message: format!("draw configuration: {e}"),
                })?;
        Ok(Some(body.into()))
    }
}

#[async_trait]
impl OrderCreator for HttpUpstreamClient {
    #[instrument(skip(self, prize), fields(draw_id = %draw_id, email = %email))]
    async fn create_order_for_winner(
        &self,
        draw_id: &DrawId,
        email: &Email,
        prize: &PrizeLineItem,
    ) -> Result<OrderId, UpstreamError> {
        let url = endpoint(&self.base_url, &["orders"])?;
        let body = order_body(draw_id, email, prize);
        let response = self
            .authorised(self.client.post(url).json(&body))
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &headers, body));
        }

        let created: CreatedOrderBody =
            response
                .json()
                .await
                .map_err(|e| UpstreamError::InvalidResponse {
                    message: format!("created order: {e}"),
                })?;
        OrderId::new(created.order_id).ok_or_else(|| UpstreamError::InvalidResponse {
            message: "created order has a blank id".to_string(),
        })
    }
}

#[async_trait]
impl ParticipantDirectory for HttpUpstreamClient {
    #[instrument(skip(self, participant), fields(draw_id = %draw_id, email = %participant.email))]
    async fn tag_participant(
        &self,
        participant: &Participant,
        draw_id: &DrawId,
    ) -> Result<(), UpstreamError> {
        let url = endpoint(&self.base_url, &["customers"])?;
        let body = customer_body(participant, draw_id);
        let response = self
            .authorised(self.client.post(url).json(&body))
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &headers, body));
        }
        debug!("participant tagged");
        Ok(())
    }
}

fn customer_body<'a>(participant: &'a Participant, draw_id: &'a DrawId) -> TagCustomerBody<'a> {
    TagCustomerBody {
        email: participant.email.as_str(),
        first_name: participant.first_name.trim(),
        last_name: participant.last_name.trim(),
        tags: [draw_id.as_str()],
    }
}

fn order_body<'a>(draw_id: &'a DrawId, email: &'a Email, prize: &PrizeLineItem) -> CreateOrderBody<'a> {
    CreateOrderBody {
        draw_id: draw_id.as_str(),
        email: email.as_str(),
        line_items: [LineItemBody {
            variant_id: prize.variant_id.clone(),
            quantity: prize.quantity,
        }],
    }
}
