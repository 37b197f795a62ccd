use anyhow::{bail, Context, Error};
use clap::Parser;
use keycalc::config::Config;
use keycalc::conversion::{Converter, MemoryCache, StaticRates};
use keycalc::input::Display;
use keycalc::key::Key;
use keycalc::session::{Session, SessionHandle};
use std::io::BufRead;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Keypad calculator. Feeds key symbols to a calculator session and prints
/// the expression buffer.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Key sequences, e.g. `12+3=`. Reads lines from stdin when absent.
    #[arg(allow_hyphen_values = true, trailing_var_arg = true)]
    keys: Vec<String>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Error> {
    let args = Args::parse();
    let config = Config::load(args.config.as_deref()).context("Failed to load config")?;
    init_logging(&config);

    let source = Arc::new(StaticRates::new(
        config.base_currency.as_str(),
        config.rates.clone(),
    ));
    let converter = Converter::new(
        source,
        Box::<MemoryCache>::default(),
        config.base_currency.as_str(),
        config.cache_ttl(),
        config.conversion_timeout(),
    );
    let session = Session::spawn(converter);

    let stdout = std::io::stdout();
    let lock = stdout.lock();
    let mut w = std::io::BufWriter::new(lock);

    if !args.keys.is_empty() {
        for arg in &args.keys {
            for key in parse_keys(arg)? {
                session.press(key).await?;
            }
        }
        let display = session.settled().await?;
        writeln!(&mut w, "{}", display.buffer)?;
    } else {
        let stdin = std::io::stdin();
        let reader = std::io::BufReader::new(stdin);
        let is_interactive = atty::is(atty::Stream::Stdin);

        if is_interactive {
            write!(&mut w, ">>> ")?;
            w.flush()?;
        }

        for line in reader.lines() {
            let line = line?;
            if let Err(e) = handle_line(&session, &config, line.trim(), &mut w).await {
                if !is_interactive {
                    return Err(e);
                }
                writeln!(&mut w, "error: {:#}", e)?;
            }

            if is_interactive {
                write!(&mut w, ">>> ")?;
            }
            w.flush()?;
        }
    }
    w.flush()?;

    Ok(())
}

async fn handle_line(
    session: &SessionHandle,
    config: &Config,
    line: &str,
    w: &mut impl Write,
) -> Result<(), Error> {
    match line.split_once(' ').unwrap_or((line, "")) {
        (":convert", code) => {
            let code = code.trim().to_uppercase();
            if code.is_empty() {
                bail!("Usage: :convert <CURRENCY>");
            }
            session.convert(&code).await?;
        }
        (":rates", _) => {
            let mut rates: Vec<_> = config.rates.iter().collect();
            rates.sort_by(|a, b| a.0.cmp(b.0));
            for (code, rate) in rates {
                writeln!(w, "1 {} = {} {}", config.base_currency, rate, code)?;
            }
            return Ok(());
        }
        (command, _) if command.starts_with(':') => bail!("Unknown command: {}", command),
        _ => {
            for key in parse_keys(line)? {
                session.press(key).await?;
            }
        }
    }

    let display = session.settled().await?;
    print_display(&display, config, w)?;
    Ok(())
}

/// A whole argument may name one key (`AC`, `⌫`); otherwise every
/// character is a key.
fn parse_keys(s: &str) -> Result<Vec<Key>, Error> {
    if let Ok(key) = s.parse::<Key>() {
        return Ok(vec![key]);
    }
    Ok(Key::parse_sequence(s)?)
}

fn print_display(display: &Display, config: &Config, w: &mut impl Write) -> Result<(), Error> {
    if !display.previous.is_empty() {
        writeln!(w, "  {}", display.previous)?;
    }
    writeln!(w, "{}", display.buffer)?;
    if display.show_currency_picker {
        let mut codes: Vec<_> = config.rates.keys().map(|c| c.as_str()).collect();
        codes.sort_unstable();
        writeln!(w, "convert to: {}  (:convert <CODE>)", codes.join(" "))?;
    }
    Ok(())
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_may_start_with_minus() {
        let args = Args::try_parse_from(["keycalc", "-5+3="]).unwrap();
        assert_eq!(args.keys, vec!["-5+3="]);

        let args = Args::try_parse_from(["keycalc", "-12--34", "="]).unwrap();
        assert_eq!(args.keys, vec!["-12--34", "="]);
    }

    #[test]
    fn test_config_flag_before_keys() {
        let args = Args::try_parse_from(["keycalc", "-c", "calc.toml", "-2×3="]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("calc.toml")));
        assert_eq!(args.keys, vec!["-2×3="]);
    }
}
