//! # WaveKit Bench
//!
//! Performance measurement for the WaveKit service worker runtime.
//!
//! ## Features
//!
//! - Resource key construction benchmarks
//! - Cache lookup and batch commit benchmarks
//! - Cache storage walk benchmarks
//! - Plain-text and JSON reporting
//!
//! The criterion benchmarks live in `benches/wavekit.rs`. This library is a
//! dependency-light runner for quick numbers in environments where a full
//! criterion run is not warranted.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use wavekit_bench::Benchmark;
//!
//! let suite = Benchmark::new().run_all();
//! suite.print_summary();
//! ```

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use wavekit_cache::{Cache, CacheStorage, CachedResponse, ResourceKey};

/// Benchmark errors.
#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Report failed: {0}")]
    Report(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single benchmark result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// Name of the benchmark.
    pub name: String,
    /// Number of measured iterations.
    pub iterations: u64,
    /// Mean time per iteration in nanoseconds.
    pub mean_ns: u64,
    /// Standard deviation in nanoseconds.
    pub std_dev_ns: u64,
    /// Fastest iteration in nanoseconds.
    pub min_ns: u64,
    /// Slowest iteration in nanoseconds.
    pub max_ns: u64,
}

impl BenchmarkResult {
    /// Summarizes a set of sample times.
    pub fn from_samples(name: impl Into<String>, samples: &[Duration]) -> Self {
        let times_ns: Vec<u64> = samples.iter().map(|d| d.as_nanos() as u64).collect();
        let iterations = times_ns.len().max(1) as u64;
        let mean_ns = times_ns.iter().sum::<u64>() / iterations;
        let variance = times_ns
            .iter()
            .map(|&t| {
                let diff = t as f64 - mean_ns as f64;
                diff * diff
            })
            .sum::<f64>()
            / iterations as f64;

        Self {
            name: name.into(),
            iterations,
            mean_ns,
            std_dev_ns: variance.sqrt() as u64,
            min_ns: times_ns.iter().copied().min().unwrap_or(0),
            max_ns: times_ns.iter().copied().max().unwrap_or(0),
        }
    }

    /// Iterations per second implied by the mean.
    pub fn ops_per_sec(&self) -> f64 {
        if self.mean_ns > 0 {
            1_000_000_000.0 / self.mean_ns as f64
        } else {
            0.0
        }
    }

    /// Print a summary line.
    pub fn print_line(&self) {
        println!(
            "{:44} {:>12} {:>12} {:>12}/s",
            self.name,
            format_duration(self.mean_ns),
            format!("±{}", format_duration(self.std_dev_ns)),
            format_ops(self.ops_per_sec()),
        );
    }
}

/// Format nanoseconds as a human-readable duration.
fn format_duration(ns: u64) -> String {
    if ns >= 1_000_000_000 {
        format!("{:.2} s", ns as f64 / 1_000_000_000.0)
    } else if ns >= 1_000_000 {
        format!("{:.2} ms", ns as f64 / 1_000_000.0)
    } else if ns >= 1_000 {
        format!("{:.2} µs", ns as f64 / 1_000.0)
    } else {
        format!("{} ns", ns)
    }
}

/// Format operations per second.
fn format_ops(ops: f64) -> String {
    if ops >= 1_000_000.0 {
        format!("{:.2}M", ops / 1_000_000.0)
    } else if ops >= 1_000.0 {
        format!("{:.2}K", ops / 1_000.0)
    } else {
        format!("{:.2}", ops)
    }
}

/// Collection of benchmark results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkSuite {
    /// Suite name.
    pub name: String,
    /// Individual results.
    pub results: Vec<BenchmarkResult>,
    /// Wall time for the whole suite.
    pub total_time: Duration,
}

impl BenchmarkSuite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            results: Vec::new(),
            total_time: Duration::ZERO,
        }
    }

    pub fn add(&mut self, result: BenchmarkResult) {
        self.results.push(result);
    }

    /// Print summary of all results.
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(84));
        println!("Benchmark Suite: {}", self.name);
        println!("{}", "=".repeat(84));
        println!(
            "{:44} {:>12} {:>12} {:>12}",
            "Name", "Mean", "StdDev", "Throughput"
        );
        println!("{}", "-".repeat(84));

        for result in &self.results {
            result.print_line();
        }

        println!("{}", "-".repeat(84));
        println!("Total time: {:?}", self.total_time);
        println!();
    }

    /// Save results to a JSON file.
    pub fn save_json(&self, path: &str) -> Result<(), BenchError> {
        let json =
            serde_json::to_string_pretty(self).map_err(|e| BenchError::Report(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Benchmark runner.
pub struct Benchmark {
    /// Number of warmup iterations.
    pub warmup: u64,
    /// Number of measured iterations.
    pub iterations: u64,
}

impl Benchmark {
    pub fn new() -> Self {
        Self {
            warmup: 10,
            iterations: 100,
        }
    }

    pub fn with_iterations(mut self, iterations: u64) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_warmup(mut self, warmup: u64) -> Self {
        self.warmup = warmup;
        self
    }

    /// Run a benchmark function.
    pub fn run<F>(&self, name: &str, mut f: F) -> BenchmarkResult
    where
        F: FnMut(),
    {
        debug!(
            name,
            warmup = self.warmup,
            iterations = self.iterations,
            "Running benchmark"
        );

        for _ in 0..self.warmup {
            f();
        }

        let mut samples = Vec::with_capacity(self.iterations as usize);
        for _ in 0..self.iterations {
            let start = Instant::now();
            f();
            samples.push(start.elapsed());
        }

        BenchmarkResult::from_samples(name, &samples)
    }

    /// Run the standard cache benchmarks.
    pub fn run_all(&self) -> BenchmarkSuite {
        let start = Instant::now();
        let mut suite = BenchmarkSuite::new("WaveKit Runtime");

        suite.add(self.bench_key_plain());
        suite.add(self.bench_key_fragment());
        suite.add(self.bench_lookup_hit());
        suite.add(self.bench_lookup_miss());
        suite.add(self.bench_batch_commit());
        suite.add(self.bench_storage_walk());

        suite.total_time = start.elapsed();
        suite
    }

    fn bench_key_plain(&self) -> BenchmarkResult {
        let url = bench_url("/src/js/main.js");
        self.run("key/build/plain", || {
            let _ = ResourceKey::get(&url);
        })
    }

    fn bench_key_fragment(&self) -> BenchmarkResult {
        let url = bench_url("/docs/guide#section-3");
        self.run("key/build/fragment", || {
            let _ = ResourceKey::get(&url);
        })
    }

    fn bench_lookup_hit(&self) -> BenchmarkResult {
        let mut cache = Cache::new("bench");
        cache.put_batch(generate_entries(1000));
        let key = ResourceKey::get(&bench_url("/assets/chunk-500.js"));
        self.run("cache/lookup/hit (1000 entries)", || {
            let _ = cache.match_request(&key);
        })
    }

    fn bench_lookup_miss(&self) -> BenchmarkResult {
        let mut cache = Cache::new("bench");
        cache.put_batch(generate_entries(1000));
        let key = ResourceKey::get(&bench_url("/not-there.js"));
        self.run("cache/lookup/miss (1000 entries)", || {
            let _ = cache.match_request(&key);
        })
    }

    fn bench_batch_commit(&self) -> BenchmarkResult {
        let entries = generate_entries(100);
        self.run("cache/commit/batch (100 entries)", || {
            let mut cache = Cache::new("bench");
            cache.put_batch(entries.clone());
        })
    }

    fn bench_storage_walk(&self) -> BenchmarkResult {
        let mut storage = CacheStorage::new();
        for name in ["first", "second", "third"] {
            storage.open(name).put_batch(generate_entries(100));
        }
        let key = ResourceKey::get(&bench_url("/not-there.js"));
        self.run("storage/walk/miss (3 containers)", || {
            let _ = storage.match_request(&key);
        })
    }
}

impl Default for Benchmark {
    fn default() -> Self {
        Self::new()
    }
}

fn bench_url(path: &str) -> Url {
    Url::parse("https://app.example/")
        .and_then(|base| base.join(path))
        .expect("bench url parses")
}

/// Deterministic corpus of cached responses, shared with the criterion
/// benchmarks.
pub fn generate_entries(n: usize) -> Vec<CachedResponse> {
    (0..n)
        .map(|i| {
            let url = bench_url(&format!("/assets/chunk-{i}.js"));
            let key = ResourceKey::get(&url);
            CachedResponse::new(&key, 200, Default::default(), vec![b'x'; 256])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benchmark_result() {
        let samples = vec![
            Duration::from_micros(100),
            Duration::from_micros(120),
            Duration::from_micros(90),
        ];
        let result = BenchmarkResult::from_samples("test", &samples);
        assert_eq!(result.iterations, 3);
        assert!(result.mean_ns > 0);
        assert!(result.min_ns <= result.max_ns);
        assert!(result.ops_per_sec() > 0.0);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(500), "500 ns");
        assert_eq!(format_duration(1_500), "1.50 µs");
        assert_eq!(format_duration(1_500_000), "1.50 ms");
        assert_eq!(format_duration(1_500_000_000), "1.50 s");
    }

    #[test]
    fn test_generate_entries() {
        let entries = generate_entries(5);
        assert_eq!(entries.len(), 5);
        assert!(entries[0].url.ends_with("chunk-0.js"));
        assert!(entries[4].url.ends_with("chunk-4.js"));
    }

    #[test]
    fn test_run_counts_iterations() {
        let bench = Benchmark::new().with_warmup(1).with_iterations(5);
        let result = bench.run("noop", || {});
        assert_eq!(result.iterations, 5);
    }
}
