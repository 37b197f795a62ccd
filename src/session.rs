use crate::conversion::{
    conversion_text, ConversionError, Converter, CurrencySession, Plan, RatesResponse,
};
use crate::input::{Display, Signal};
use crate::key::Key;
use crate::tokenizer::Value;
use compact_str::CompactString;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

const COMMAND_BUFFER: usize = 64;

/// What observers see after each processed command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct View {
    pub display: Display,
    /// A rate fetch is in flight; keys other than Clear are dropped.
    pub converting: bool,
}

#[derive(Debug)]
enum Command {
    Key(Key),
    Convert {
        target: CompactString,
    },
    DismissPicker,
    Converted {
        generation: u64,
        target: CompactString,
        amount: Value,
        result: Result<RatesResponse, ConversionError>,
    },
    Sync(oneshot::Sender<()>),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("Calculator session has stopped")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<View>,
}

impl SessionHandle {
    pub async fn press(&self, key: Key) -> Result<(), SessionError> {
        self.send(Command::Key(key)).await
    }

    /// Converts the amount on display into `target`. The picker closes.
    pub async fn convert(&self, target: &str) -> Result<(), SessionError> {
        self.send(Command::Convert {
            target: target.into(),
        })
        .await
    }

    pub async fn dismiss_picker(&self) -> Result<(), SessionError> {
        self.send(Command::DismissPicker).await
    }

    pub fn view(&self) -> View {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<View> {
        self.view.clone()
    }

    /// Waits until every command sent so far is processed and no rate
    /// fetch is in flight, then returns the display.
    pub async fn settled(&self) -> Result<Display, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Sync(tx)).await?;
        rx.await.map_err(|_| SessionError::Closed)?;

        let mut view = self.view.clone();
        let settled = view
            .wait_for(|v| !v.converting)
            .await
            .map_err(|_| SessionError::Closed)?;
        Ok(settled.display.clone())
    }

    async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }
}

pub struct Session {
    display: Display,
    converter: Converter,
    currency: CurrencySession,
    generation: u64,
    in_flight: Option<u64>,
    replies: mpsc::WeakSender<Command>,
    view: watch::Sender<View>,
}

impl Session {
    /// Stops once every handle is dropped.
    pub fn spawn(converter: Converter) -> SessionHandle {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let (view, view_rx) = watch::channel(View::default());
        let session = Session {
            display: Display::default(),
            currency: converter.session(),
            converter,
            generation: 0,
            in_flight: None,
            replies: commands.downgrade(),
            view,
        };
        tokio::spawn(session.run(rx));
        SessionHandle {
            commands,
            view: view_rx,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            self.handle(command);
            self.publish();
        }
        debug!("calculator session stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Key(key) => self.key(key),
            Command::Convert { target } => self.convert(target),
            Command::DismissPicker => self.display.show_currency_picker = false,
            Command::Converted {
                generation,
                target,
                amount,
                result,
            } => self.converted(generation, target, amount, result),
            Command::Sync(done) => {
                let _ = done.send(());
            }
        }
    }

    fn key(&mut self, key: Key) {
        if self.in_flight.is_some() && key != Key::Clear {
            warn!(?key, "conversion in flight, key dropped");
            return;
        }
        match self.display.handle_key(key) {
            Ok(transition) => {
                self.display = transition.display;
                match transition.signal {
                    Some(Signal::ResetCurrency) => {
                        if self.in_flight.take().is_some() {
                            info!("abandoned rate request");
                        }
                        self.currency.reset(self.converter.base());
                    }
                    Some(Signal::OpenCurrencyPicker) => debug!("currency picker opened"),
                    None => {}
                }
            }
            Err(e) => error!(?key, error = %e, "key rejected by evaluator"),
        }
    }

    fn convert(&mut self, target: CompactString) {
        if self.in_flight.is_some() {
            warn!(%target, "conversion already in flight");
            return;
        }
        self.display.show_currency_picker = false;

        let amount = self.display.leading_amount();
        let now = now_millis();
        let planned = self
            .converter
            .plan(amount, &target, &mut self.currency, now);
        let (plan, previous) = match planned {
            Ok(planned) => planned,
            Err(e) => return self.fail(e),
        };
        if let Some(previous) = previous {
            self.display.previous = previous;
        }

        match plan {
            Plan::Ready { amount, rate } => {
                self.display
                    .show_conversion(conversion_text(amount, rate, &target));
            }
            Plan::Fetch { amount, base } => {
                info!(%base, %target, "fetching exchange rates");
                self.generation += 1;
                let generation = self.generation;
                self.in_flight = Some(generation);

                let fetch = self.converter.fetch(base);
                let replies = self.replies.clone();
                tokio::spawn(async move {
                    let result = fetch.await;
                    let Some(replies) = replies.upgrade() else {
                        return;
                    };
                    let command = Command::Converted {
                        generation,
                        target,
                        amount,
                        result,
                    };
                    if replies.send(command).await.is_err() {
                        debug!("session gone before rates arrived");
                    }
                });
            }
        }
    }

    fn converted(
        &mut self,
        generation: u64,
        target: CompactString,
        amount: Value,
        result: Result<RatesResponse, ConversionError>,
    ) {
        if self.in_flight != Some(generation) {
            debug!(generation, "discarding stale rates");
            return;
        }
        self.in_flight = None;

        let rate = result
            .and_then(|response| self.converter.accept(response, &target, now_millis()));
        match rate {
            Ok(rate) => {
                info!(%target, rate, "converted");
                self.display
                    .show_conversion(conversion_text(amount, rate, &target));
            }
            Err(e) => self.fail(e),
        }
    }

    fn fail(&mut self, e: ConversionError) {
        warn!(error = %e, "conversion failed");
        self.display
            .show_error(e.message().to_string(), e.clears_previous());
    }

    fn publish(&self) {
        let converting = self.in_flight.is_some();
        self.view.send_if_modified(|view| {
            let changed = view.display != self.display || view.converting != converting;
            if changed {
                view.display = self.display.clone();
                view.converting = converting;
            }
            changed
        });
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::{MemoryCache, RateSource, Rates, StaticRates};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(8 * 60 * 60);

    fn rates() -> Rates {
        [("EUR", 1.0), ("USD", 1.1), ("GBP", 0.8)]
            .into_iter()
            .map(|(c, r)| (c.into(), r))
            .collect()
    }

    fn spawn_with(source: Arc<dyn RateSource>, timeout: Duration) -> SessionHandle {
        let cache = Box::<MemoryCache>::default();
        Session::spawn(Converter::new(source, cache, "EUR", TTL, timeout))
    }

    fn spawn_static() -> SessionHandle {
        spawn_with(
            Arc::new(StaticRates::new("EUR", rates())),
            Duration::from_secs(5),
        )
    }

    async fn type_keys(handle: &SessionHandle, keys: &str) {
        for key in Key::parse_sequence(keys).unwrap() {
            handle.press(key).await.unwrap();
        }
    }

    struct CountingSource {
        inner: StaticRates,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RateSource for CountingSource {
        async fn fetch_rates(&self, base: &str) -> Result<RatesResponse, ConversionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch_rates(base).await
        }
    }

    struct Offline;

    #[async_trait]
    impl RateSource for Offline {
        async fn fetch_rates(&self, _base: &str) -> Result<RatesResponse, ConversionError> {
            Err(ConversionError::Network("connection refused".into()))
        }
    }

    struct Slow(Duration);

    #[async_trait]
    impl RateSource for Slow {
        async fn fetch_rates(&self, base: &str) -> Result<RatesResponse, ConversionError> {
            tokio::time::sleep(self.0).await;
            StaticRates::new("EUR", rates()).fetch_rates(base).await
        }
    }

    #[tokio::test]
    async fn test_keys_are_applied_in_order() {
        let handle = spawn_static();
        type_keys(&handle, "3+4=").await;
        let display = handle.settled().await.unwrap();
        assert_eq!(display.buffer, "7");
        assert_eq!(display.previous, "3+4");
        assert_eq!(handle.view().display, display);
    }

    #[tokio::test]
    async fn test_convert_key_opens_picker() {
        let handle = spawn_static();
        type_keys(&handle, "12$").await;
        assert!(handle.settled().await.unwrap().show_currency_picker);

        handle.dismiss_picker().await.unwrap();
        assert!(!handle.settled().await.unwrap().show_currency_picker);
    }

    #[tokio::test]
    async fn test_conversion() {
        let handle = spawn_static();
        type_keys(&handle, "12$").await;
        handle.convert("USD").await.unwrap();
        let display = handle.settled().await.unwrap();
        assert_eq!(display.buffer, "13.20 USD");
        assert_eq!(display.previous, "12 EUR");
        assert!(display.flags.conversion_displayed);
        assert!(!display.show_currency_picker);

        type_keys(&handle, "5").await;
        let display = handle.settled().await.unwrap();
        assert_eq!(display.buffer, "5");
        assert_eq!(display.previous, "");
    }

    #[tokio::test]
    async fn test_second_conversion_uses_cache() {
        let source = Arc::new(CountingSource {
            inner: StaticRates::new("EUR", rates()),
            calls: AtomicUsize::new(0),
        });
        let handle = spawn_with(source.clone(), Duration::from_secs(5));

        type_keys(&handle, "10").await;
        handle.convert("GBP").await.unwrap();
        assert_eq!(handle.settled().await.unwrap().buffer, "8.00 GBP");

        type_keys(&handle, "C20").await;
        handle.convert("USD").await.unwrap();
        assert_eq!(handle.settled().await.unwrap().buffer, "22.00 USD");
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_amount() {
        let handle = spawn_static();
        handle.convert("USD").await.unwrap();
        let display = handle.settled().await.unwrap();
        assert_eq!(display.buffer, "Not valid amount");
        assert!(display.flags.error_state);
    }

    #[tokio::test]
    async fn test_unknown_currency() {
        let handle = spawn_static();
        type_keys(&handle, "12").await;
        handle.convert("XYZ").await.unwrap();
        let display = handle.settled().await.unwrap();
        assert_eq!(display.buffer, "Invalid currency!");
        assert!(display.flags.error_state);
    }

    #[tokio::test]
    async fn test_network_failure() {
        let handle = spawn_with(Arc::new(Offline), Duration::from_secs(5));
        type_keys(&handle, "12").await;
        handle.convert("USD").await.unwrap();
        let display = handle.settled().await.unwrap();
        assert_eq!(display.buffer, "No network");
        assert_eq!(display.previous, "");
        assert!(display.flags.error_state);

        type_keys(&handle, "7").await;
        assert_eq!(handle.settled().await.unwrap().buffer, "7");
    }

    #[tokio::test]
    async fn test_timeout() {
        let handle = spawn_with(
            Arc::new(Slow(Duration::from_secs(10))),
            Duration::from_millis(50),
        );
        type_keys(&handle, "12").await;
        handle.convert("USD").await.unwrap();
        assert_eq!(handle.settled().await.unwrap().buffer, "No network");
    }

    #[tokio::test]
    async fn test_subscribers_follow_views() {
        let handle = spawn_with(
            Arc::new(Slow(Duration::from_millis(100))),
            Duration::from_secs(5),
        );
        let mut views = handle.subscribe();
        assert_eq!(*views.borrow_and_update(), View::default());

        handle.press(Key::Digit(1)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), views.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(views.borrow_and_update().display.buffer, "1");

        type_keys(&handle, "2").await;
        handle.convert("USD").await.unwrap();
        let view = tokio::time::timeout(Duration::from_secs(1), views.wait_for(|v| v.converting))
            .await
            .unwrap()
            .unwrap()
            .clone();
        assert_eq!(view.display.buffer, "12");
        assert_eq!(view.display.previous, "12 EUR");

        tokio::time::timeout(Duration::from_secs(1), views.changed())
            .await
            .unwrap()
            .unwrap();
        let view = views.borrow_and_update().clone();
        assert!(!view.converting);
        assert_eq!(view.display.buffer, "13.20 USD");
        assert!(view.display.flags.conversion_displayed);
        assert_eq!(handle.view(), view);
    }

    #[tokio::test]
    async fn test_keys_dropped_while_converting() {
        let handle = spawn_with(
            Arc::new(Slow(Duration::from_millis(100))),
            Duration::from_secs(5),
        );
        type_keys(&handle, "12").await;
        handle.convert("USD").await.unwrap();
        type_keys(&handle, "5+").await;
        let display = handle.settled().await.unwrap();
        assert_eq!(display.buffer, "13.20 USD");
    }

    #[tokio::test]
    async fn test_clear_abandons_conversion() {
        let handle = spawn_with(
            Arc::new(Slow(Duration::from_millis(100))),
            Duration::from_secs(5),
        );
        type_keys(&handle, "12").await;
        handle.convert("USD").await.unwrap();
        handle.press(Key::Clear).await.unwrap();
        assert_eq!(handle.settled().await.unwrap(), Display::default());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.settled().await.unwrap(), Display::default());
    }
}
