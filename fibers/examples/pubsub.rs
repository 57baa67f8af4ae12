// examples/pubsub.rs
use fibre_fibers::{Channel, Fiber, Handler};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Quote {
  symbol: &'static str,
  price: u32,
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

  let quotes: Channel<Quote> = Channel::new("quotes");
  let ui = Fiber::new("ui");
  let audit = Fiber::new("audit");

  println!("--- Plain subscription ---");
  let printer = Handler::new(|channel: &Channel<Quote>, quote: Quote| {
    println!("[{}] {} @ {}", channel.name(), quote.symbol, quote.price);
  });
  let plain = quotes.with(&audit).subscribe(&printer);

  println!("--- Keyed snapshot every 100ms ---");
  let snapshots = quotes.with(&ui).keyed(
    Duration::from_millis(100),
    |quote: &Quote| quote.symbol,
    Handler::new(|_, latest: HashMap<&'static str, Quote>| {
      let mut symbols: Vec<_> = latest.values().map(|q| format!("{}={}", q.symbol, q.price)).collect();
      symbols.sort();
      println!("[snapshot] {}", symbols.join(", "));
    }),
  );

  let ticker = ui.schedule_on_interval(None, Duration::from_millis(250), || {
    println!("[ui] tick");
  });

  for (i, symbol) in ["ACME", "INIT", "ACME", "ZETA", "INIT"].into_iter().enumerate() {
    let quote = Quote {
      symbol,
      price: 100 + i as u32,
    };
    if let Err(e) = quotes.publish(quote).await {
      println!("publish failed: {}", e);
    }
    tokio::time::sleep(Duration::from_millis(30)).await;
  }

  tokio::time::sleep(Duration::from_millis(600)).await;

  plain.cancel();
  snapshots.cancel();
  ticker.cancel();

  let queued = ui.lock(|| "ui fiber drained").await;
  println!("{:?}", queued);
  audit.wait().await;
}
