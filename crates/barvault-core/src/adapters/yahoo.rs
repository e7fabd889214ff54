use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::data_source::{
    CapabilitySet, HealthStatus, PrecomputedAverageSource, SourceClient, SourceError, SourceFuture,
};
use crate::http_client::{status_error, HttpAuth, HttpClient, HttpRequest, ReqwestHttpClient};
use crate::{
    Bar, BarSeries, FundamentalSnapshot, Provenance, ProviderId, Symbol, TradeDate, UtcDateTime,
};

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";
const SUMMARY_MODULES: &str = "defaultKeyStatistics,financialData,summaryDetail,price";

/// Accepted band for a published average relative to the current price.
const AVERAGE_TO_PRICE_BAND: (f64, f64) = (0.3, 3.0);

// ============================================================================
// Session handshake
// ============================================================================

#[derive(Debug, Default)]
struct CachedCrumb {
    crumb: Option<String>,
    refreshed_at: Option<Instant>,
}

/// Caches the crumb token Yahoo's query endpoints require.
///
/// The session cookie from `fc.yahoo.com` lands in the HTTP client's cookie
/// jar; the crumb is then fetched from `getcrumb` and appended to each query.
#[derive(Debug)]
pub struct YahooAuthManager {
    cache: Mutex<CachedCrumb>,
    refresh: tokio::sync::Mutex<()>,
    ttl: Duration,
}

impl Default for YahooAuthManager {
    fn default() -> Self {
        Self {
            cache: Mutex::new(CachedCrumb::default()),
            refresh: tokio::sync::Mutex::new(()),
            ttl: Duration::from_secs(3600),
        }
    }
}

impl YahooAuthManager {
    /// Skips the handshake and always uses `crumb`.
    pub fn with_static_crumb(crumb: impl Into<String>) -> Self {
        let manager = Self {
            ttl: Duration::MAX,
            ..Self::default()
        };
        {
            let mut cache = manager.lock();
            cache.crumb = Some(crumb.into());
            cache.refreshed_at = Some(Instant::now());
        }
        manager
    }

    fn lock(&self) -> MutexGuard<'_, CachedCrumb> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cached(&self) -> Option<String> {
        let cache = self.lock();
        let fresh = cache
            .refreshed_at
            .is_some_and(|refreshed_at| refreshed_at.elapsed() < self.ttl);
        if fresh {
            cache.crumb.clone()
        } else {
            None
        }
    }

    pub async fn crumb(&self, http_client: &dyn HttpClient) -> Result<String, SourceError> {
        if let Some(crumb) = self.cached() {
            return Ok(crumb);
        }

        let _guard = self.refresh.lock().await;
        if let Some(crumb) = self.cached() {
            return Ok(crumb);
        }

        let crumb = fetch_crumb(http_client).await?;
        let mut cache = self.lock();
        cache.crumb = Some(crumb.clone());
        cache.refreshed_at = Some(Instant::now());
        Ok(crumb)
    }

    pub fn invalidate(&self) {
        let mut cache = self.lock();
        if self.ttl != Duration::MAX {
            cache.crumb = None;
            cache.refreshed_at = None;
        }
    }
}

async fn fetch_crumb(http_client: &dyn HttpClient) -> Result<String, SourceError> {
    let cookie_request = HttpRequest::get("https://fc.yahoo.com")
        .with_header("referer", "https://finance.yahoo.com/")
        .with_timeout(Duration::from_secs(10));
    // fc.yahoo.com answers 404 but still sets the session cookie.
    http_client
        .execute(cookie_request)
        .await
        .map_err(|error| error.into_source_error(ProviderId::Yahoo))?;

    for endpoint in [
        "https://query1.finance.yahoo.com/v1/test/getcrumb",
        "https://query2.finance.yahoo.com/v1/test/getcrumb",
    ] {
        let request = HttpRequest::get(endpoint)
            .with_header("referer", "https://finance.yahoo.com/")
            .with_timeout(Duration::from_secs(10));

        let response = match http_client.execute(request).await {
            Ok(response) => response,
            Err(error) => {
                debug!(endpoint, error = %error, "yahoo crumb endpoint failed");
                continue;
            }
        };
        if response.status == 429 {
            return Err(SourceError::rate_limited("yahoo rate limited the crumb request"));
        }

        let body = response.body.trim();
        let plausible = response.is_success()
            && !body.is_empty()
            && body.len() < 100
            && !body.contains(' ')
            && !body.contains('<');
        if plausible {
            return Ok(body.to_owned());
        }
    }

    Err(SourceError::unavailable(
        "failed to fetch yahoo crumb from all endpoints",
    ))
}

// ============================================================================
// Adapter
// ============================================================================

/// Yahoo Finance client: chart bars, quoteSummary fundamentals and the
/// published 50/200-day averages.
#[derive(Clone)]
pub struct YahooAdapter {
    http_client: Arc<dyn HttpClient>,
    auth_manager: Arc<YahooAuthManager>,
    cookie: Option<String>,
    base_url: String,
}

impl Default for YahooAdapter {
    fn default() -> Self {
        Self::new(Arc::new(ReqwestHttpClient::default()))
    }
}

impl YahooAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            auth_manager: Arc::new(YahooAuthManager::default()),
            cookie: None,
            base_url: String::from(DEFAULT_BASE_URL),
        }
    }

    pub fn with_auth_manager(mut self, auth_manager: Arc<YahooAuthManager>) -> Self {
        self.auth_manager = auth_manager;
        self
    }

    /// Sends a fixed session cookie instead of relying on the cookie jar.
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    fn request(&self, url: String) -> HttpRequest {
        let request = HttpRequest::get(url).with_header("referer", "https://finance.yahoo.com/");
        match &self.cookie {
            Some(cookie) => request.with_auth(&HttpAuth::Cookie(cookie.clone())),
            None => request,
        }
    }

    /// Issues a crumb-authenticated GET. A 401/403 invalidates the crumb and
    /// retries once with a fresh one.
    async fn fetch_json<T, F>(&self, url_for_crumb: F) -> Result<T, SourceError>
    where
        T: DeserializeOwned,
        F: Fn(&str) -> String,
    {
        let mut refreshed = false;
        loop {
            let crumb = self.auth_manager.crumb(self.http_client.as_ref()).await?;
            let response = self
                .http_client
                .execute(self.request(url_for_crumb(&crumb)))
                .await
                .map_err(|error| error.into_source_error(ProviderId::Yahoo))?;

            if (response.status == 401 || response.status == 403) && !refreshed {
                warn!(status = response.status, "yahoo rejected crumb; refreshing");
                self.auth_manager.invalidate();
                refreshed = true;
                continue;
            }
            if !response.is_success() {
                return Err(status_error(ProviderId::Yahoo, response.status));
            }

            return serde_json::from_str(&response.body).map_err(|error| {
                SourceError::internal(format!("failed to parse yahoo response: {error}"))
            });
        }
    }

    async fn fetch_summary(&self, instrument: &Symbol) -> Result<Option<YahooSummary>, SourceError> {
        let ticker = instrument.yahoo_ticker();
        let response: YahooQuoteSummaryResponse = self
            .fetch_json(|crumb| {
                format!(
                    "{}/v10/finance/quoteSummary/{}?modules={SUMMARY_MODULES}&crumb={}",
                    self.base_url,
                    urlencoding::encode(&ticker),
                    urlencoding::encode(crumb)
                )
            })
            .await?;

        if let Some(error) = response.quote_summary.error.filter(|error| !error.is_null()) {
            return Err(SourceError::invalid_request(format!(
                "yahoo quoteSummary error: {error}"
            )));
        }

        Ok(response
            .quote_summary
            .result
            .unwrap_or_default()
            .into_iter()
            .next())
    }
}

impl SourceClient for YahooAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Yahoo
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new(true, true, true)
    }

    fn get_bars<'a>(
        &'a self,
        instrument: &'a Symbol,
        start: TradeDate,
        end: TradeDate,
    ) -> SourceFuture<'a, BarSeries> {
        Box::pin(async move {
            let ticker = instrument.yahoo_ticker();
            let period1 = start.unix_start();
            let period2 = end.plus_days(1).unix_start();
            let response: YahooChartResponse = self
                .fetch_json(|crumb| {
                    format!(
                        "{}/v8/finance/chart/{}?period1={period1}&period2={period2}&interval=1d&includePrePost=false&crumb={}",
                        self.base_url,
                        urlencoding::encode(&ticker),
                        urlencoding::encode(crumb)
                    )
                })
                .await?;

            if let Some(error) = response.chart.error.filter(|error| !error.is_null()) {
                return Err(SourceError::invalid_request(format!(
                    "yahoo chart error: {error}"
                )));
            }

            let Some(result) = response.chart.result.unwrap_or_default().into_iter().next() else {
                return Ok(BarSeries::empty(instrument.clone()));
            };

            let bars = chart_bars(instrument, result, Provenance::now(ProviderId::Yahoo))?
                .into_iter()
                .filter(|bar| bar.date >= start && bar.date <= end)
                .collect();
            Ok(BarSeries::new(instrument.clone(), bars).into_chronological())
        })
    }

    fn get_fundamentals<'a>(
        &'a self,
        instrument: &'a Symbol,
    ) -> SourceFuture<'a, Option<FundamentalSnapshot>> {
        Box::pin(async move {
            let snapshot = self
                .fetch_summary(instrument)
                .await?
                .map(|summary| summary.snapshot().sanitized())
                .filter(|snapshot| !snapshot.is_empty());
            Ok(snapshot)
        })
    }

    fn health<'a>(&'a self) -> Pin<Box<dyn Future<Output = HealthStatus> + Send + 'a>> {
        Box::pin(async move { HealthStatus::healthy() })
    }
}

impl PrecomputedAverageSource for YahooAdapter {
    fn get_average<'a>(
        &'a self,
        instrument: &'a Symbol,
        window: usize,
    ) -> SourceFuture<'a, Option<f64>> {
        Box::pin(async move {
            if window != 50 && window != 200 {
                return Ok(None);
            }
            let Some(summary) = self.fetch_summary(instrument).await? else {
                return Ok(None);
            };
            Ok(summary.published_average(window))
        })
    }
}

fn chart_bars(
    instrument: &Symbol,
    result: YahooChartResult,
    provenance: Provenance,
) -> Result<Vec<Bar>, SourceError> {
    let timestamps = result.timestamp.unwrap_or_default();
    let Some(quote) = result.indicators.quote.into_iter().next() else {
        return Ok(Vec::new());
    };

    let mut bars = Vec::with_capacity(timestamps.len());
    for (index, seconds) in timestamps.into_iter().enumerate() {
        let values = (
            quote.open.get(index).copied().flatten(),
            quote.high.get(index).copied().flatten(),
            quote.low.get(index).copied().flatten(),
            quote.close.get(index).copied().flatten(),
        );
        let (Some(open), Some(high), Some(low), Some(close)) = values else {
            continue;
        };
        let volume = quote.volume.get(index).copied().flatten().unwrap_or(0);
        let Ok(volume) = u64::try_from(volume) else {
            debug!(instrument = %instrument, index, volume, "skipping yahoo row with negative volume");
            continue;
        };
        let timestamp = UtcDateTime::from_unix_seconds(seconds)
            .ok_or_else(|| SourceError::internal(format!("invalid yahoo timestamp {seconds}")))?;

        let bar = Bar::new(
            instrument.clone(),
            TradeDate::of(timestamp),
            open,
            high,
            low,
            close,
            volume,
            provenance,
        );
        match bar {
            Ok(bar) => bars.push(bar),
            Err(error) => debug!(instrument = %instrument, index, error = %error, "skipping yahoo row"),
        }
    }
    Ok(bars)
}

// ============================================================================
// Yahoo response structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct YahooChartResponse {
    chart: YahooChartData,
}

#[derive(Debug, Deserialize)]
struct YahooChartData {
    #[serde(default)]
    result: Option<Vec<YahooChartResult>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct YahooChartResult {
    #[serde(default)]
    timestamp: Option<Vec<i64>>,
    indicators: YahooChartIndicators,
}

#[derive(Debug, Deserialize)]
struct YahooChartIndicators {
    #[serde(default)]
    quote: Vec<YahooChartQuote>,
}

#[derive(Debug, Deserialize)]
struct YahooChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<i64>>,
}

#[derive(Debug, Deserialize)]
struct YahooQuoteSummaryResponse {
    #[serde(rename = "quoteSummary")]
    quote_summary: YahooQuoteSummaryData,
}

#[derive(Debug, Deserialize)]
struct YahooQuoteSummaryData {
    #[serde(default)]
    result: Option<Vec<YahooSummary>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooSummary {
    #[serde(default)]
    price: YahooPriceData,
    #[serde(default)]
    summary_detail: YahooSummaryDetail,
    #[serde(default)]
    default_key_statistics: YahooKeyStatistics,
    #[serde(default)]
    financial_data: YahooFinancialData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooPriceData {
    #[serde(default)]
    market_cap: YahooRawValue,
    #[serde(default)]
    regular_market_price: YahooRawValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooSummaryDetail {
    #[serde(default)]
    market_cap: YahooRawValue,
    #[serde(rename = "trailingPE", default)]
    trailing_pe: YahooRawValue,
    #[serde(rename = "forwardPE", default)]
    forward_pe: YahooRawValue,
    #[serde(default)]
    dividend_yield: YahooRawValue,
    #[serde(default)]
    dividend_rate: YahooRawValue,
    #[serde(default)]
    previous_close: YahooRawValue,
    #[serde(default)]
    fifty_day_average: YahooRawValue,
    #[serde(default)]
    two_hundred_day_average: YahooRawValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooKeyStatistics {
    #[serde(default)]
    book_value: YahooRawValue,
    #[serde(default)]
    profit_margins: YahooRawValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooFinancialData {
    #[serde(default)]
    current_price: YahooRawValue,
    #[serde(default)]
    debt_to_equity: YahooRawValue,
    #[serde(default)]
    return_on_equity: YahooRawValue,
    #[serde(default)]
    current_ratio: YahooRawValue,
    #[serde(default)]
    operating_margins: YahooRawValue,
    #[serde(default)]
    revenue_growth: YahooRawValue,
    #[serde(default)]
    profit_margins: YahooRawValue,
}

/// Yahoo wraps numbers as `{"raw": 1.23, "fmt": "1.23"}`; missing values come
/// back as `{}`.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
struct YahooRawValue {
    #[serde(default)]
    raw: Option<f64>,
}

impl YahooRawValue {
    fn value(self) -> Option<f64> {
        self.raw.filter(|value| value.is_finite())
    }

    fn percent(self) -> Option<f64> {
        self.value().map(|value| value * 100.0)
    }
}

impl YahooSummary {
    fn current_price(&self) -> Option<f64> {
        self.financial_data
            .current_price
            .value()
            .or(self.price.regular_market_price.value())
            .or(self.summary_detail.previous_close.value())
            .filter(|price| *price > 0.0)
    }

    fn snapshot(&self) -> FundamentalSnapshot {
        let dividend_yield_percent = self.summary_detail.dividend_yield.percent().or_else(|| {
            let rate = self.summary_detail.dividend_rate.value()?;
            let price = self.current_price()?;
            Some(rate / price * 100.0)
        });

        FundamentalSnapshot {
            market_cap: self
                .price
                .market_cap
                .value()
                .or(self.summary_detail.market_cap.value()),
            pe_ratio: self
                .summary_detail
                .trailing_pe
                .value()
                .or(self.summary_detail.forward_pe.value()),
            debt_to_equity: self.financial_data.debt_to_equity.value(),
            roe_percent: self.financial_data.return_on_equity.percent(),
            current_ratio: self.financial_data.current_ratio.value(),
            operating_margin_percent: self.financial_data.operating_margins.percent(),
            revenue_growth_percent: self.financial_data.revenue_growth.percent(),
            profit_margin_percent: self
                .financial_data
                .profit_margins
                .percent()
                .or(self.default_key_statistics.profit_margins.percent()),
            dividend_yield_percent,
            book_value: self.default_key_statistics.book_value.value(),
        }
    }

    /// The published average, if positive and plausibly close to the price.
    fn published_average(&self, window: usize) -> Option<f64> {
        let average = match window {
            50 => self.summary_detail.fifty_day_average.value(),
            200 => self.summary_detail.two_hundred_day_average.value(),
            _ => None,
        }
        .filter(|average| *average > 0.0)?;

        match self.current_price() {
            Some(price) => {
                let ratio = average / price;
                let (low, high) = AVERAGE_TO_PRICE_BAND;
                if (low..=high).contains(&ratio) {
                    Some(average)
                } else {
                    warn!(window, average, price, "published average outside price band");
                    None
                }
            }
            None => Some(average),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{HttpError, HttpResponse};
    use std::collections::VecDeque;

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

        fn recorded_urls(&self) -> Vec<String> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .iter()
                .map(|request| request.url.clone())
                .collect()
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

    fn adapter(client: Arc<RecordingHttpClient>) -> YahooAdapter {
        YahooAdapter::new(client)
            .with_auth_manager(Arc::new(YahooAuthManager::with_static_crumb("crumb-1")))
    }

    fn day(value: &str) -> TradeDate {
        TradeDate::parse(value).expect("date")
    }

    const CHART: &str = r#"{"chart":{"result":[{
        "meta":{"symbol":"BRK-B"},
        "timestamp":[1704205800,1704292200,1704378600],
        "indicators":{"quote":[{
            "open":[10.0,null,10.6],
            "high":[11.0,null,11.2],
            "low":[9.5,null,10.1],
            "close":[10.5,null,10.9],
            "volume":[1000,null,1500]
        }]}
    }],"error":null}}"#;

    const SUMMARY: &str = r#"{"quoteSummary":{"result":[{
        "price":{"marketCap":{"raw":2.9e12,"fmt":"2.9T"},"regularMarketPrice":{"raw":190.0}},
        "summaryDetail":{"trailingPE":{"raw":29.5},"dividendYield":{"raw":0.005},
                         "fiftyDayAverage":{"raw":185.0},"twoHundredDayAverage":{"raw":175.0}},
        "defaultKeyStatistics":{"bookValue":{"raw":4.3},"profitMargins":{"raw":0.25}},
        "financialData":{"currentPrice":{"raw":190.0},"debtToEquity":{"raw":180.0},
                         "returnOnEquity":{"raw":1.5},"currentRatio":{"raw":0.99},
                         "operatingMargins":{"raw":0.3},"revenueGrowth":{}}
    }],"error":null}}"#;

    #[tokio::test]
    async fn chart_rows_with_gaps_are_skipped() {
        let client = Arc::new(RecordingHttpClient::scripted(vec![Ok(HttpResponse::ok_json(CHART))]));
        let symbol = Symbol::parse("BRK.B").expect("symbol");

        let series = adapter(client.clone())
            .get_bars(&symbol, day("2024-01-01"), day("2024-01-31"))
            .await
            .expect("bars");

        assert_eq!(series.len(), 2);
        assert_eq!(series.bars[0].date, day("2024-01-02"));
        assert_eq!(series.bars[1].date, day("2024-01-04"));
        assert_eq!(series.bars[1].provenance.source, ProviderId::Yahoo);

        let urls = client.recorded_urls();
        assert!(urls[0].contains("/v8/finance/chart/BRK-B?period1=1704067200"));
        assert!(urls[0].ends_with("&crumb=crumb-1"));
    }

    #[tokio::test]
    async fn fundamentals_are_mapped_to_percentages() {
        let client = Arc::new(RecordingHttpClient::scripted(vec![Ok(HttpResponse::ok_json(SUMMARY))]));
        let symbol = Symbol::parse("AAPL").expect("symbol");

        let snapshot = adapter(client)
            .get_fundamentals(&symbol)
            .await
            .expect("fundamentals")
            .expect("snapshot");

        assert_eq!(snapshot.market_cap, Some(2.9e12));
        assert_eq!(snapshot.pe_ratio, Some(29.5));
        assert_eq!(snapshot.roe_percent, Some(150.0));
        assert_eq!(snapshot.operating_margin_percent, Some(30.0));
        assert_eq!(snapshot.dividend_yield_percent, Some(0.5));
        assert_eq!(snapshot.revenue_growth_percent, None);
        assert_eq!(snapshot.book_value, Some(4.3));
    }

    #[tokio::test]
    async fn published_average_is_checked_against_price() {
        let client = Arc::new(RecordingHttpClient::scripted(vec![
            Ok(HttpResponse::ok_json(SUMMARY)),
            Ok(HttpResponse::ok_json(
                SUMMARY.replace(
                    r#""twoHundredDayAverage":{"raw":175.0}"#,
                    r#""twoHundredDayAverage":{"raw":1750.0}"#,
                ),
            )),
        ]));
        let adapter = adapter(client);
        let symbol = Symbol::parse("AAPL").expect("symbol");

        assert_eq!(
            adapter.get_average(&symbol, 200).await.expect("average"),
            Some(175.0)
        );
        assert_eq!(adapter.get_average(&symbol, 200).await.expect("average"), None);
        assert_eq!(adapter.get_average(&symbol, 20).await.expect("average"), None);
    }

    #[tokio::test]
    async fn rejected_crumb_is_refreshed_once() {
        let client = Arc::new(RecordingHttpClient::scripted(vec![
            Ok(HttpResponse::with_status(401, "")),
            Ok(HttpResponse::with_status(404, "")),
            Ok(HttpResponse::ok_json("fresh-crumb")),
            Ok(HttpResponse::ok_json(CHART)),
        ]));
        let adapter = YahooAdapter::new(client.clone()).with_auth_manager(Arc::new({
            let manager = YahooAuthManager::default();
            {
                let mut cache = manager.lock();
                cache.crumb = Some(String::from("stale"));
                cache.refreshed_at = Some(Instant::now());
            }
            manager
        }));
        let symbol = Symbol::parse("AAPL").expect("symbol");

        let series = adapter
            .get_bars(&symbol, day("2024-01-01"), day("2024-01-31"))
            .await
            .expect("bars after refresh");
        assert_eq!(series.len(), 2);

        let urls = client.recorded_urls();
        assert_eq!(urls.len(), 4);
        assert!(urls[0].ends_with("crumb=stale"));
        assert_eq!(urls[1], "https://fc.yahoo.com");
        assert!(urls[2].ends_with("/v1/test/getcrumb"));
        assert!(urls[3].ends_with("crumb=fresh-crumb"));
    }

    #[tokio::test]
    async fn server_errors_are_retryable() {
        let client = Arc::new(RecordingHttpClient::scripted(vec![Ok(
            HttpResponse::with_status(503, "unavailable"),
        )]));
        let symbol = Symbol::parse("AAPL").expect("symbol");

        let error = adapter(client)
            .get_bars(&symbol, day("2024-01-01"), day("2024-01-31"))
            .await
            .expect_err("must fail");
        assert!(error.retryable());
    }
}
