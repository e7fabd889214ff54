use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::data_source::{
    CapabilitySet, Endpoint, HealthState, HealthStatus, SourceClient, SourceError, SourceFuture,
};
use crate::http_client::{status_error, HttpAuth, HttpClient, HttpRequest, ReqwestHttpClient};
use crate::{
    Bar, BarSeries, FundamentalSnapshot, Provenance, ProviderId, Symbol, TradeDate, UtcDateTime,
};

const DEFAULT_BASE_URL: &str = "https://data.alpaca.markets";
const PAGE_LIMIT: usize = 10_000;
const MAX_PAGES: usize = 50;

/// API key pair sent as `APCA-API-KEY-ID` / `APCA-API-SECRET-KEY`.
#[derive(Clone, PartialEq, Eq)]
pub struct AlpacaCredentials {
    pub api_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for AlpacaCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlpacaCredentials")
            .field("api_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Alpaca market-data v2 client for daily bars.
#[derive(Clone)]
pub struct AlpacaAdapter {
    http_client: Arc<dyn HttpClient>,
    credentials: Option<AlpacaCredentials>,
    base_url: String,
    feed: String,
}

impl Default for AlpacaAdapter {
    fn default() -> Self {
        Self::new(Arc::new(ReqwestHttpClient::default()), None)
    }
}

impl AlpacaAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>, credentials: Option<AlpacaCredentials>) -> Self {
        Self {
            http_client,
            credentials,
            base_url: String::from(DEFAULT_BASE_URL),
            feed: String::from("iex"),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    /// `iex` works with free keys; `sip` needs a paid plan.
    pub fn with_feed(mut self, feed: impl Into<String>) -> Self {
        self.feed = feed.into();
        self
    }

    fn auth(&self) -> Result<HttpAuth, SourceError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            SourceError::invalid_request("alpaca credentials are not configured")
        })?;
        Ok(HttpAuth::Headers(vec![
            (String::from("APCA-API-KEY-ID"), credentials.api_key.clone()),
            (
                String::from("APCA-API-SECRET-KEY"),
                credentials.secret_key.clone(),
            ),
        ]))
    }

    fn bars_url(
        &self,
        instrument: &Symbol,
        start: TradeDate,
        end: TradeDate,
        page_token: Option<&str>,
    ) -> String {
        let mut url = format!(
            "{}/v2/stocks/{}/bars?timeframe=1Day&start={start}&end={end}&limit={PAGE_LIMIT}&adjustment=raw&feed={}",
            self.base_url,
            urlencoding::encode(instrument.as_str()),
            urlencoding::encode(&self.feed),
        );
        if let Some(token) = page_token {
            url.push_str("&page_token=");
            url.push_str(&urlencoding::encode(token));
        }
        url
    }

    async fn fetch_page(&self, url: String, auth: &HttpAuth) -> Result<AlpacaBarsPage, SourceError> {
        let request = HttpRequest::get(url).with_auth(auth);
        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|error| error.into_source_error(ProviderId::Alpaca))?;

        if !response.is_success() {
            return Err(status_error(ProviderId::Alpaca, response.status));
        }

        serde_json::from_str(&response.body)
            .map_err(|error| SourceError::internal(format!("failed to parse alpaca bars: {error}")))
    }
}

impl SourceClient for AlpacaAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Alpaca
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::bars_only()
    }

    fn get_bars<'a>(
        &'a self,
        instrument: &'a Symbol,
        start: TradeDate,
        end: TradeDate,
    ) -> SourceFuture<'a, BarSeries> {
        Box::pin(async move {
            let auth = self.auth()?;
            let provenance = Provenance::now(ProviderId::Alpaca);
            let mut bars = Vec::new();
            let mut page_token: Option<String> = None;

            for page in 0..MAX_PAGES {
                let url = self.bars_url(instrument, start, end, page_token.as_deref());
                let body = self.fetch_page(url, &auth).await?;
                let received = body.bars.as_ref().map_or(0, Vec::len);
                debug!(instrument = %instrument, page, received, "alpaca bars page");

                for raw in body.bars.unwrap_or_default() {
                    let bar = normalize_bar(instrument, raw, provenance)?;
                    if bar.date >= start && bar.date <= end {
                        bars.push(bar);
                    }
                }

                match body.next_page_token {
                    Some(token) if !token.is_empty() => page_token = Some(token),
                    _ => break,
                }
            }

            Ok(BarSeries::new(instrument.clone(), bars).into_chronological())
        })
    }

    fn get_fundamentals<'a>(
        &'a self,
        _instrument: &'a Symbol,
    ) -> SourceFuture<'a, Option<FundamentalSnapshot>> {
        Box::pin(async { Err(SourceError::unsupported(Endpoint::Fundamentals)) })
    }

    fn health<'a>(&'a self) -> Pin<Box<dyn Future<Output = HealthStatus> + Send + 'a>> {
        Box::pin(async move {
            if self.credentials.is_some() {
                HealthStatus::healthy()
            } else {
                HealthStatus::new(HealthState::Unhealthy, false)
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct AlpacaBarsPage {
    #[serde(default)]
    bars: Option<Vec<AlpacaBar>>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaBar {
    t: String,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: u64,
}

fn normalize_bar(
    instrument: &Symbol,
    raw: AlpacaBar,
    provenance: Provenance,
) -> Result<Bar, SourceError> {
    let timestamp = UtcDateTime::parse(&raw.t)
        .map_err(|error| SourceError::internal(format!("alpaca bar timestamp: {error}")))?;
    Bar::new(
        instrument.clone(),
        TradeDate::of(timestamp),
        raw.o,
        raw.h,
        raw.l,
        raw.c,
        raw.v,
        provenance,
    )
    .map_err(|error| SourceError::internal(error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::SourceErrorKind;
    use crate::http_client::{HttpError, HttpResponse};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct RecordingHttpClient {
        responses: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl RecordingHttpClient {
        fn scripted(responses: Vec<Result<HttpResponse, HttpError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn recorded_requests(&self) -> Vec<HttpRequest> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .clone()
        }
    }

    impl HttpClient for RecordingHttpClient {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .push(request);
            let response = self
                .responses
                .lock()
                .expect("response queue should not be poisoned")
                .pop_front()
                .unwrap_or_else(|| Err(HttpError::non_retryable("no scripted response")));
            Box::pin(async move { response })
        }
    }

    fn credentials() -> Option<AlpacaCredentials> {
        Some(AlpacaCredentials {
            api_key: String::from("key-id"),
            secret_key: String::from("secret-key"),
        })
    }

    fn day(value: &str) -> TradeDate {
        TradeDate::parse(value).expect("date")
    }

    #[tokio::test]
    async fn follows_page_tokens_and_sends_both_auth_headers() {
        let client = Arc::new(RecordingHttpClient::scripted(vec![
            Ok(HttpResponse::ok_json(
                r#"{"bars":[{"t":"2024-01-02T05:00:00Z","o":10.0,"h":11.0,"l":9.5,"c":10.5,"v":1000,"n":10,"vw":10.2}],
                   "symbol":"AAPL","next_page_token":"abc=="}"#,
            )),
            Ok(HttpResponse::ok_json(
                r#"{"bars":[{"t":"2024-01-03T05:00:00Z","o":10.5,"h":12.0,"l":10.0,"c":11.5,"v":2000}],
                   "symbol":"AAPL","next_page_token":null}"#,
            )),
        ]));
        let adapter = AlpacaAdapter::new(client.clone(), credentials());
        let symbol = Symbol::parse("AAPL").expect("symbol");

        let series = adapter
            .get_bars(&symbol, day("2024-01-01"), day("2024-01-05"))
            .await
            .expect("bars");

        assert_eq!(series.len(), 2);
        assert_eq!(series.bars[0].date, day("2024-01-02"));
        assert_eq!(series.bars[1].volume, 2000);
        assert_eq!(series.bars[1].provenance.source, ProviderId::Alpaca);

        let requests = client.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].url.contains("/v2/stocks/AAPL/bars?timeframe=1Day"));
        assert!(requests[0].url.contains("start=2024-01-01&end=2024-01-05"));
        assert!(requests[1].url.ends_with("&page_token=abc%3D%3D"));
        assert_eq!(
            requests[0].headers.get("apca-api-key-id").map(String::as_str),
            Some("key-id")
        );
        assert_eq!(
            requests[0]
                .headers
                .get("apca-api-secret-key")
                .map(String::as_str),
            Some("secret-key")
        );
    }

    #[tokio::test]
    async fn null_bars_is_an_empty_series() {
        let client = Arc::new(RecordingHttpClient::scripted(vec![Ok(HttpResponse::ok_json(
            r#"{"bars":null,"symbol":"ZZZZ","next_page_token":null}"#,
        ))]));
        let adapter = AlpacaAdapter::new(client, credentials());
        let symbol = Symbol::parse("ZZZZ").expect("symbol");

        let series = adapter
            .get_bars(&symbol, day("2024-01-01"), day("2024-01-05"))
            .await
            .expect("bars");
        assert!(series.is_empty());
    }

    #[tokio::test]
    async fn maps_rate_limit_status() {
        let client = Arc::new(RecordingHttpClient::scripted(vec![Ok(
            HttpResponse::with_status(429, "too many requests"),
        )]));
        let adapter = AlpacaAdapter::new(client, credentials());
        let symbol = Symbol::parse("AAPL").expect("symbol");

        let error = adapter
            .get_bars(&symbol, day("2024-01-01"), day("2024-01-05"))
            .await
            .expect_err("must fail");
        assert_eq!(error.kind(), SourceErrorKind::RateLimited);
        assert!(error.retryable());
    }

    #[tokio::test]
    async fn missing_credentials_fail_without_a_request() {
        let client = Arc::new(RecordingHttpClient::scripted(Vec::new()));
        let adapter = AlpacaAdapter::new(client.clone(), None);
        let symbol = Symbol::parse("AAPL").expect("symbol");

        let error = adapter
            .get_bars(&symbol, day("2024-01-01"), day("2024-01-05"))
            .await
            .expect_err("must fail");
        assert!(!error.retryable());
        assert!(client.recorded_requests().is_empty());
        assert_eq!(adapter.health().await.state, HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn fundamentals_are_unsupported() {
        let adapter = AlpacaAdapter::new(Arc::new(RecordingHttpClient::scripted(Vec::new())), None);
        let symbol = Symbol::parse("MSFT").expect("symbol");

        let error = adapter
            .get_fundamentals(&symbol)
            .await
            .expect_err("must be unsupported");
        assert_eq!(error.kind(), SourceErrorKind::Unsupported);
    }
}
