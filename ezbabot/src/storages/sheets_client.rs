//! Thin client for the spreadsheet values API, authenticated as a
//! service account (signed JWT exchanged for a short-lived access token).

use std::time::{Duration, Instant};

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use super::{rows::Row, storage::StoreError};

pub const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com/v4";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh this long before the token actually expires
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// The fields of a service-account key file that matter here
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        serde_json::from_str(json)
            .map_err(|e| StoreError::Auth(format!("invalid service account JSON: {}", e)))
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Row>,
}

/// Quoted A1 range on a named sheet, e.g. `'Transactions'!A2:Z`
pub fn a1_range(sheet: &str, cells: &str) -> String {
    format!("'{}'!{}", sheet.replace('\'', "''"), cells)
}

/// `{base}/spreadsheets/{id}/values/{range}{suffix}`, each part percent-encoded
pub fn values_url(
    api_base: &str,
    spreadsheet_id: &str,
    range: &str,
    suffix: &str,
) -> Result<Url, StoreError> {
    let mut url =
        Url::parse(api_base).map_err(|e| StoreError::Codec(format!("bad API base URL: {}", e)))?;
    url.path_segments_mut()
        .map_err(|_| StoreError::Codec("API base URL cannot have a path".to_string()))?
        .pop_if_empty()
        .push("spreadsheets")
        .push(spreadsheet_id)
        .push("values")
        .push(&format!("{}{}", range, suffix));
    Ok(url)
}

pub struct SheetsClient {
    http: Client,
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    spreadsheet_id: String,
    api_base: String,
    token: Mutex<Option<CachedToken>>,
}

impl SheetsClient {
    pub fn new(
        key: ServiceAccountKey,
        spreadsheet_id: String,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| StoreError::Auth(format!("invalid private key: {}", e)))?;
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            key,
            encoding_key,
            spreadsheet_id,
            api_base: DEFAULT_API_BASE.to_string(),
            token: Mutex::new(None),
        })
    }

    fn signed_assertion(&self) -> Result<String, StoreError> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| StoreError::Auth(format!("failed to sign assertion: {}", e)))
    }

    async fn access_token(&self) -> Result<String, StoreError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let assertion = self.signed_assertion()?;
        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Auth(format!("token exchange failed {}: {}", status, body)));
        }
        let token: TokenResponse = response.json().await?;
        log::debug!("Obtained access token valid for {}s", token.expires_in);

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    fn values_url(&self, range: &str, suffix: &str) -> Result<Url, StoreError> {
        values_url(&self.api_base, &self.spreadsheet_id, range, suffix)
    }

    async fn check(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

/// The values operations the ledger needs from a spreadsheet
#[async_trait::async_trait]
pub trait SheetValues: Send + Sync {
    /// Rows of `range` with raw (unformatted) cell values. Trailing empty
    /// rows are omitted, empty rows in between come back as `[]`.
    async fn get_values(&self, range: &str) -> Result<Vec<Row>, StoreError>;

    /// Insert `rows` starting at the first row of `range`, pushing anything
    /// below further down
    async fn append_rows(&self, range: &str, rows: Vec<Row>) -> Result<(), StoreError>;

    /// Overwrite the cells of `range`
    async fn update_values(&self, range: &str, rows: Vec<Row>) -> Result<(), StoreError>;

    /// Empty the cells of `range`; the row itself stays in place
    async fn clear_range(&self, range: &str) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
impl SheetValues for SheetsClient {
    async fn get_values(&self, range: &str) -> Result<Vec<Row>, StoreError> {
        let mut url = self.values_url(range, "")?;
        url.query_pairs_mut()
            .append_pair("valueRenderOption", "UNFORMATTED_VALUE")
            .append_pair("dateTimeRenderOption", "FORMATTED_STRING");
        let token = self.access_token().await?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        let range: ValueRange = Self::check(response).await?.json().await?;
        Ok(range.values)
    }

    async fn append_rows(&self, range: &str, rows: Vec<Row>) -> Result<(), StoreError> {
        let mut url = self.values_url(range, ":append")?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");
        let token = self.access_token().await?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "values": rows }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn update_values(&self, range: &str, rows: Vec<Row>) -> Result<(), StoreError> {
        let mut url = self.values_url(range, "")?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let token = self.access_token().await?;
        let response = self
            .http
            .put(url)
            .bearer_auth(token)
            .json(&json!({ "range": range, "majorDimension": "ROWS", "values": rows }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn clear_range(&self, range: &str) -> Result<(), StoreError> {
        let url = self.values_url(range, ":clear")?;
        let token = self.access_token().await?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&Value::Object(Default::default()))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
