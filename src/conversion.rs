use crate::format::{format_amount, format_result};
use crate::tokenizer::Value;
use async_trait::async_trait;
use compact_str::{CompactString, ToCompactString};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub type Rates = HashMap<CompactString, Value>;

/// Reply of an exchange-rate service for one base currency.
#[derive(Debug, Clone, PartialEq)]
pub struct RatesResponse {
    pub success: bool,
    pub base: CompactString,
    pub rates: Rates,
}

#[async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch_rates(&self, base: &str) -> Result<RatesResponse, ConversionError>;
}

#[derive(Debug, Clone)]
pub struct StaticRates {
    base: CompactString,
    rates: Rates,
}

impl StaticRates {
    pub fn new(base: impl Into<CompactString>, rates: Rates) -> Self {
        Self {
            base: base.into(),
            rates,
        }
    }
}

#[async_trait]
impl RateSource for StaticRates {
    async fn fetch_rates(&self, base: &str) -> Result<RatesResponse, ConversionError> {
        let rates = if self.base == base {
            self.rates.clone()
        } else {
            // Requoting needs the requested base in the table
            let Some(&pivot) = self.rates.get(base).filter(|rate| **rate != 0.0) else {
                return Ok(RatesResponse {
                    success: false,
                    base: base.into(),
                    rates: Rates::new(),
                });
            };
            let mut rates: Rates = self
                .rates
                .iter()
                .map(|(code, rate)| (code.clone(), rate / pivot))
                .collect();
            rates.insert(self.base.clone(), 1.0 / pivot);
            rates
        };
        Ok(RatesResponse {
            success: true,
            base: base.into(),
            rates,
        })
    }
}

/// Rates kept from the last successful fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRates {
    pub rates: Rates,
    /// Fetch time, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl CachedRates {
    pub fn is_fresh(&self, now: i64, ttl: Duration) -> bool {
        let age = now.saturating_sub(self.timestamp);
        age >= 0 && (age as u128) < ttl.as_millis()
    }
}

pub trait RateCache: Send {
    fn load(&self) -> Option<CachedRates>;
    fn store(&mut self, rates: CachedRates);
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entry: Option<CachedRates>,
}

impl RateCache for MemoryCache {
    fn load(&self) -> Option<CachedRates> {
        self.entry.clone()
    }

    fn store(&mut self, rates: CachedRates) {
        self.entry = Some(rates);
    }
}

/// Conversion state that lives until the calculator resets.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrencySession {
    pub base: CompactString,
    initial_amount: Option<Value>,
}

impl CurrencySession {
    pub fn new(base: impl Into<CompactString>) -> Self {
        Self {
            base: base.into(),
            initial_amount: None,
        }
    }

    pub fn reset(&mut self, base: &str) {
        self.base = base.into();
        self.initial_amount = None;
    }

    pub fn initial_amount(&self) -> Option<Value> {
        self.initial_amount
    }
}

/// Next step of a conversion request.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Ready { amount: Value, rate: Value },
    Fetch { amount: Value, base: CompactString },
}

pub struct Converter {
    source: Arc<dyn RateSource>,
    cache: Box<dyn RateCache>,
    base: CompactString,
    ttl: Duration,
    timeout: Duration,
}

impl Converter {
    pub fn new(
        source: Arc<dyn RateSource>,
        cache: Box<dyn RateCache>,
        base: impl Into<CompactString>,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            cache,
            base: base.into(),
            ttl,
            timeout,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn session(&self) -> CurrencySession {
        CurrencySession::new(self.base.clone())
    }

    /// Starts converting `amount` into `target`.
    ///
    /// The first conversion of a session pins the amount; later ones keep
    /// converting that same amount. Returns the previous-expression text to
    /// show when the amount was pinned now.
    pub fn plan(
        &self,
        amount: Value,
        target: &str,
        session: &mut CurrencySession,
        now: i64,
    ) -> Result<(Plan, Option<String>), ConversionError> {
        if amount == 0.0 || !amount.is_finite() {
            return Err(ConversionError::InvalidAmount);
        }

        let mut previous = None;
        let amount = match session.initial_amount {
            Some(initial) => initial,
            None => {
                session.initial_amount = Some(amount);
                previous = Some(format!("{} {}", format_result(amount), session.base));
                amount
            }
        };

        let plan = match self.cache.load().filter(|c| c.is_fresh(now, self.ttl)) {
            Some(cached) => {
                debug!(currency = target, "using cached rates");
                let rate = lookup(&cached.rates, target)?;
                Plan::Ready { amount, rate }
            }
            None => Plan::Fetch {
                amount,
                base: session.base.clone(),
            },
        };
        Ok((plan, previous))
    }

    /// Returns a future fetching rates for `base`, bounded by the
    /// configured timeout. It holds no borrow of the converter.
    pub fn fetch(
        &self,
        base: CompactString,
    ) -> impl std::future::Future<Output = Result<RatesResponse, ConversionError>> + Send + 'static
    {
        let source = Arc::clone(&self.source);
        let timeout = self.timeout;
        async move {
            match tokio::time::timeout(timeout, source.fetch_rates(&base)).await {
                Ok(response) => response,
                Err(_) => Err(ConversionError::Timeout),
            }
        }
    }

    pub fn accept(
        &mut self,
        response: RatesResponse,
        target: &str,
        now: i64,
    ) -> Result<Value, ConversionError> {
        if !response.success {
            return Err(ConversionError::ApiFailed);
        }
        let rate = lookup(&response.rates, target)?;
        info!(base = %response.base, rates = response.rates.len(), "caching fetched rates");
        self.cache.store(CachedRates {
            rates: response.rates,
            timestamp: now,
        });
        Ok(rate)
    }
}

fn lookup(rates: &Rates, target: &str) -> Result<Value, ConversionError> {
    rates
        .get(target)
        .copied()
        .ok_or_else(|| ConversionError::UnknownCurrency(target.to_compact_string()))
}

/// Buffer text for a converted amount, e.g. `"13.20 USD"`.
pub fn conversion_text(amount: Value, rate: Value, target: &str) -> String {
    format!("{} {}", format_amount(amount * rate), target)
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error("Not valid amount")]
    InvalidAmount,
    #[error("Invalid currency: {0}")]
    UnknownCurrency(CompactString),
    #[error("Rate service reported a failure")]
    ApiFailed,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Rate request timed out")]
    Timeout,
}

impl ConversionError {
    pub fn message(&self) -> &'static str {
        match self {
            ConversionError::InvalidAmount => "Not valid amount",
            ConversionError::UnknownCurrency(_) => "Invalid currency!",
            ConversionError::ApiFailed => "API failed",
            ConversionError::Network(_) | ConversionError::Timeout => "No network",
        }
    }

    /// Whether the amount shown above the buffer should go too.
    pub fn clears_previous(&self) -> bool {
        matches!(
            self,
            ConversionError::Network(_) | ConversionError::Timeout
        )
    }
}
