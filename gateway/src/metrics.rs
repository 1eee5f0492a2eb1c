use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const LATENCY_WINDOW: usize = 100;

/// Per-route forwarding counters, exported in Prometheus text format.
pub struct ProxyMetrics {
    forwards: DashMap<String, AtomicU64>,
    responses: DashMap<(String, &'static str), AtomicU64>,
    failures: DashMap<String, AtomicU64>,
    latencies: DashMap<String, Vec<u64>>,
}

fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

impl ProxyMetrics {
    pub fn new() -> Self {
        Self {
            forwards: DashMap::new(),
            responses: DashMap::new(),
            failures: DashMap::new(),
            latencies: DashMap::new(),
        }
    }

    pub fn record_forward(&self, route: &str) {
        self.forwards
            .entry(route.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response(&self, route: &str, status: u16, elapsed: Duration) {
        self.responses
            .entry((route.to_string(), status_class(status)))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);

        let mut window = self.latencies
            .entry(route.to_string())
            .or_insert_with(Vec::new);
        window.push(elapsed.as_millis() as u64);

        let len = window.len();
        if len > LATENCY_WINDOW {
            window.drain(0..len - LATENCY_WINDOW);
        }
    }

    pub fn record_failure(&self, route: &str) {
        self.failures
            .entry(route.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn export(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP medrag_gateway_forwards_total Requests forwarded upstream\n");
        output.push_str("# TYPE medrag_gateway_forwards_total counter\n");
        for entry in self.forwards.iter() {
            output.push_str(&format!(
                "medrag_gateway_forwards_total{{route=\"{}\"}} {}\n",
                entry.key(),
                entry.value().load(Ordering::Relaxed)
            ));
        }
        output.push('\n');

        output.push_str("# HELP medrag_gateway_responses_total Upstream responses by status class\n");
        output.push_str("# TYPE medrag_gateway_responses_total counter\n");
        for entry in self.responses.iter() {
            let (route, class) = entry.key();
            output.push_str(&format!(
                "medrag_gateway_responses_total{{route=\"{}\",class=\"{}\"}} {}\n",
                route,
                class,
                entry.value().load(Ordering::Relaxed)
            ));
        }
        output.push('\n');

        output.push_str("# HELP medrag_gateway_failures_total Forwards that never got an upstream response\n");
        output.push_str("# TYPE medrag_gateway_failures_total counter\n");
        for entry in self.failures.iter() {
            output.push_str(&format!(
                "medrag_gateway_failures_total{{route=\"{}\"}} {}\n",
                entry.key(),
                entry.value().load(Ordering::Relaxed)
            ));
        }
        output.push('\n');

        output.push_str("# HELP medrag_gateway_upstream_latency_ms Upstream latency percentiles\n");
        output.push_str("# TYPE medrag_gateway_upstream_latency_ms gauge\n");
        for entry in self.latencies.iter() {
            let mut samples = entry.value().clone();
            if samples.is_empty() {
                continue;
            }
            samples.sort_unstable();
            for (label, p) in [("0.5", 50.0), ("0.95", 95.0), ("0.99", 99.0)] {
                output.push_str(&format!(
                    "medrag_gateway_upstream_latency_ms{{route=\"{}\",quantile=\"{}\"}} {}\n",
                    entry.key(),
                    label,
                    percentile(&samples, p)
                ));
            }
        }

        output
    }
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn percentile(sorted_data: &[u64], p: f64) -> u64 {
    if sorted_data.is_empty() {
        return 0;
    }
    let index = ((p / 100.0) * (sorted_data.len() as f64 - 1.0)).round() as usize;
    sorted_data[index.min(sorted_data.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_picks_nearest_rank() {
        let data: Vec<u64> = (1..=10).collect();
        assert_eq!(percentile(&data, 50.0), 6);
        assert_eq!(percentile(&data, 99.0), 10);
        assert_eq!(percentile(&[], 50.0), 0);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let metrics = ProxyMetrics::new();
        for ms in 0..150 {
            metrics.record_response("proxy", 200, Duration::from_millis(ms));
        }
        let window = metrics.latencies.get("proxy").unwrap();
        assert_eq!(window.len(), LATENCY_WINDOW);
        assert_eq!(window[0], 50);
    }

    #[test]
    fn test_export_groups_by_status_class() {
        let metrics = ProxyMetrics::new();
        metrics.record_forward("proxy");
        metrics.record_forward("proxy");
        metrics.record_response("proxy", 200, Duration::from_millis(12));
        metrics.record_response("proxy", 401, Duration::from_millis(8));
        metrics.record_failure("gi");

        let text = metrics.export();
        assert!(text.contains("medrag_gateway_forwards_total{route=\"proxy\"} 2"));
        assert!(text.contains("medrag_gateway_responses_total{route=\"proxy\",class=\"2xx\"} 1"));
        assert!(text.contains("medrag_gateway_responses_total{route=\"proxy\",class=\"4xx\"} 1"));
        assert!(text.contains("medrag_gateway_failures_total{route=\"gi\"} 1"));
        assert!(text.contains("medrag_gateway_upstream_latency_ms{route=\"proxy\",quantile=\"0.5\"}"));
    }
}
