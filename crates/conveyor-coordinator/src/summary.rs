//! Computes the `SaveRunSummary` metrics blob from one run's extraction
//! records (spec.md §6 "Computed run summary").

use conveyor_core::{classify_error, ExtractStatus, ExtractionRecord, FailureDetail, RunSummary, SlowFile};
use std::collections::BTreeMap;

const TOP_SLOWEST: usize = 5;
const MAX_FAILURE_DETAILS: usize = 50;
const FAILURE_MESSAGE_TRUNCATE: usize = 300;

pub(crate) fn build(records: &[ExtractionRecord], duration_ms: i64) -> RunSummary {
    let total_files = records.len() as i64;
    let success = records
        .iter()
        .filter(|r| r.status == ExtractStatus::Done)
        .count() as i64;
    let skipped = records
        .iter()
        .filter(|r| r.status == ExtractStatus::Skipped)
        .count() as i64;
    let failed = records
        .iter()
        .filter(|r| r.status == ExtractStatus::Error)
        .count() as i64;

    let mut latencies: Vec<i64> = records.iter().filter_map(|r| r.latency_ms).collect();
    latencies.sort_unstable();

    let avg_latency_ms = average(&latencies);
    let p50_latency_ms = percentile(&latencies, 50.0);
    let p95_latency_ms = percentile(&latencies, 95.0);
    let p99_latency_ms = percentile(&latencies, 99.0);

    let duration_secs = (duration_ms as f64 / 1000.0).max(f64::EPSILON);
    let throughput_per_second = total_files as f64 / duration_secs;
    let throughput_per_minute = throughput_per_second * 60.0;
    let error_rate = if total_files > 0 {
        failed as f64 / total_files as f64
    } else {
        0.0
    };

    let mut failure_breakdown: BTreeMap<String, i64> = BTreeMap::new();
    let mut failure_count_by_brand: BTreeMap<String, i64> = BTreeMap::new();
    let mut failure_details = Vec::new();
    for record in records.iter().filter(|r| r.status == ExtractStatus::Error) {
        let class = classify_error(
            record.status_code.unwrap_or(0),
            record.error_message.as_deref(),
        );
        *failure_breakdown.entry(class.as_str().to_string()).or_insert(0) += 1;
        *failure_count_by_brand.entry(record.brand.clone()).or_insert(0) += 1;
        if failure_details.len() < MAX_FAILURE_DETAILS {
            let message: String = record
                .error_message
                .as_deref()
                .unwrap_or("")
                .chars()
                .take(FAILURE_MESSAGE_TRUNCATE)
                .collect();
            failure_details.push(FailureDetail {
                relative_path: record.relative_path.clone(),
                error_message: message,
            });
        }
    }

    let mut by_latency: Vec<&ExtractionRecord> =
        records.iter().filter(|r| r.latency_ms.is_some()).collect();
    by_latency.sort_by_key(|r| std::cmp::Reverse(r.latency_ms.unwrap_or(0)));
    let top_slowest_files = by_latency
        .into_iter()
        .take(TOP_SLOWEST)
        .map(|r| SlowFile {
            relative_path: r.relative_path.clone(),
            latency_ms: r.latency_ms.unwrap_or(0),
        })
        .collect();

    RunSummary {
        total_files,
        success,
        failed,
        skipped,
        duration_ms,
        throughput_per_second,
        throughput_per_minute,
        avg_latency_ms,
        p50_latency_ms,
        p95_latency_ms,
        p99_latency_ms,
        error_rate,
        failure_breakdown,
        top_slowest_files,
        failure_count_by_brand,
        failure_details,
    }
}

fn average(sorted: &[i64]) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.iter().sum::<i64>() as f64 / sorted.len() as f64
}

/// Nearest-rank percentile over an already-sorted slice.
fn percentile(sorted: &[i64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    let index = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[index] as f64
}
