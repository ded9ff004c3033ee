use anyhow::{Context, Result};
use dashmap::DashMap;
use log::info;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Best-effort source of recent prices for an instrument.
///
/// Implementations must answer from local state without blocking; a miss is
/// `None` and the caller falls back to the stochastic simulator.
pub trait PriceSeriesSource: Send + Sync {
    /// Up to `days + 1` most recent prices, oldest first.
    fn price_series(&self, instrument: &str, days: u32) -> Option<Vec<f64>>;
}

/// In-memory price series keyed by upper-cased instrument label.
#[derive(Default)]
pub struct PriceSeriesCache {
    series: DashMap<String, Vec<f64>>,
}

impl PriceSeriesCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a JSON object of `{ "INSTRUMENT": [prices...] }`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read price data from {}", path.display()))?;
        let parsed: HashMap<String, Vec<f64>> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse price data from {}", path.display()))?;

        let cache = Self::new();
        for (instrument, prices) in parsed {
            cache.insert(&instrument, prices);
        }
        info!(
            "Loaded price series for {} instruments from {}",
            cache.len(),
            path.display()
        );
        Ok(cache)
    }

    pub fn insert(&self, instrument: &str, prices: Vec<f64>) {
        self.series.insert(normalize_instrument(instrument), prices);
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

impl PriceSeriesSource for PriceSeriesCache {
    fn price_series(&self, instrument: &str, days: u32) -> Option<Vec<f64>> {
        let entry = self.series.get(&normalize_instrument(instrument))?;
        let usable: Vec<f64> = entry
            .iter()
            .copied()
            .filter(|price| price.is_finite() && *price > 0.0)
            .collect();
        if usable.len() < 2 {
            return None;
        }
        let window = (days as usize).saturating_add(1).min(usable.len());
        Some(usable[usable.len() - window..].to_vec())
    }
}

fn normalize_instrument(instrument: &str) -> String {
    instrument.trim().to_ascii_uppercase()
}
