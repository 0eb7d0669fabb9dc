//! Miniature weather proxy: the same lookup cached, bypassed, invalidated,
//! and reported on.
//!
//! Run with `cargo run --example weather_proxy`.

use std::sync::Arc;
use std::time::Duration;

use readthru::{
    CacheGate, Invalidator, MemoryStore, SourceStatus, StatusTracker, locale_key, metrics_report,
    nocache_requested,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Weather {
    temp: f64,
    description: String,
}

#[derive(Debug, Error)]
#[error("upstream weather API failed")]
struct WeatherApiError;

// Stands in for the upstream HTTP call.
async fn fetch_from_upstream(city: &str) -> Result<Weather, WeatherApiError> {
    println!("  -> calling upstream for {city}");
    Ok(Weather {
        temp: 30.5,
        description: format!("scattered clouds over {city}"),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .init();

    let store = Arc::new(MemoryStore::new());
    let gate = CacheGate::new(store.clone());
    let admin = Invalidator::with_tags(store.clone(), Arc::clone(gate.tags()));
    let tracker = StatusTracker::new(store.clone());

    let ttl = Duration::from_secs(600);
    let key = locale_key(Some("Manila"), None, None)?;

    println!("first request (miss):");
    let weather: Weather = gate
        .get_or_compute_tagged(&key, ttl, false, &["weather"], || async {
            fetch_from_upstream("Manila").await
        })
        .await?;
    println!("  {weather:?}");

    println!("second request (hit, no upstream call):");
    let weather: Weather = gate
        .get_or_compute_tagged(&key, ttl, false, &["weather"], || async {
            fetch_from_upstream("Manila").await
        })
        .await?;
    println!("  {weather:?}");

    println!("third request with ?nocache=true (bypasses read and write):");
    let skip = nocache_requested("nocache=true");
    let weather: Weather = gate
        .get_or_compute(&key, ttl, skip, || async {
            fetch_from_upstream("Manila").await
        })
        .await?;
    println!("  {weather:?}");

    tracker.set_status("openweathermap", SourceStatus::Success).await?;
    println!(
        "upstream status: {:?}",
        tracker.get_status("openweathermap").await
    );

    let report = metrics_report(gate.metrics(), store.as_ref()).await?;
    println!("metrics: {}", serde_json::to_string_pretty(&report)?);

    let evicted = admin.invalidate_tag("weather").await?;
    println!("invalidated tag 'weather': {evicted} entries evicted");

    Ok(())
}
