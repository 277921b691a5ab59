use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::COOKIE;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::config::ClientConfig;
use crate::errors::AppError;

/// Shared HTTP plumbing for the assistant and persistence routes.
///
/// Every request carries the opaque session credential, if one is configured.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base: String,
    cookie: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .connect_timeout(config.read_timeout)
            .build()
            .map_err(|e| AppError::Config { message: format!("HTTP client: {e}") })?;
        Ok(Self {
            client,
            base: config.api_base.clone(),
            cookie: config.session_cookie.clone(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.with_credential(self.client.get(self.url(path)))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.with_credential(self.client.post(self.url(path)))
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.with_credential(self.client.delete(self.url(path)))
    }

    fn with_credential(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.cookie {
            Some(cookie) => builder.header(COOKIE, cookie),
            None => builder,
        }
    }
}

/// Passes 2xx responses through; anything else becomes
/// `AppError::Transport` carrying the status and raw body.
pub async fn ensure_success(resp: Response) -> Result<Response, AppError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(AppError::transport(Some(status.as_u16()), body))
}

pub async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, AppError> {
    let resp = ensure_success(resp).await?;
    resp.json::<T>()
        .await
        .map_err(|e| AppError::Unexpected(format!("Parse error: {e}")))
}

/// Sends `builder` and decodes a JSON body from a 2xx response.
pub async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, AppError> {
    let resp = builder.send().await.map_err(AppError::from_reqwest)?;
    read_json(resp).await
}

/// Sends `builder` and discards the body of a 2xx response.
pub async fn send_ok(builder: RequestBuilder) -> Result<(), AppError> {
    let resp = builder.send().await.map_err(AppError::from_reqwest)?;
    ensure_success(resp).await?;
    Ok(())
}

/// Reads the server's timestamps, which may lack an offset (naive UTC).
pub fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = raw else {
        return Utc::now();
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return ts.with_timezone(&Utc);
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn naive_server_timestamps_are_utc() {
        let ts = parse_timestamp(Some("2024-03-09T14:05:07.123000"));
        assert_eq!((ts.year(), ts.month(), ts.day()), (2024, 3, 9));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (14, 5, 7));

        let offset = parse_timestamp(Some("2024-03-09T14:05:07+02:00"));
        assert_eq!(offset.hour(), 12);
    }

    #[test]
    fn url_joins_base_and_path() {
        let cfg = ClientConfig { api_base: "http://h:1".into(), ..ClientConfig::default() };
        let api = ApiClient::new(&cfg).unwrap();
        assert_eq!(api.url("/api/chat"), "http://h:1/api/chat");
    }
}
