//! Metrics Collection
//!
//! Metric modules mirror the ones the benchmark enables by default:
//! `time` (compress/decompress wall time), `size` (sizes and ratios), and
//! `error_stat` (elementwise reconstruction error). A `MetricsSpec` knows
//! which fields its modules would report without running anything, which
//! is what the field registry introspects.

use crate::data::DataBuffer;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Metric module ids enabled when the command line names none.
pub const DEFAULT_METRIC_MODULES: &[&str] = &["time", "size", "error_stat"];

/// Errors building a metrics specification
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("unknown metric module {id:?}")]
    UnknownModule { id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricModule {
    Time,
    Size,
    ErrorStat,
}

impl MetricModule {
    fn parse(id: &str) -> Result<Self, MetricsError> {
        match id {
            "time" => Ok(MetricModule::Time),
            "size" => Ok(MetricModule::Size),
            "error_stat" => Ok(MetricModule::ErrorStat),
            _ => Err(MetricsError::UnknownModule { id: id.to_string() }),
        }
    }

    fn fields(self) -> &'static [&'static str] {
        match self {
            MetricModule::Time => &["time:compress", "time:decompress"],
            MetricModule::Size => &[
                "size:uncompressed_size",
                "size:compressed_size",
                "size:decompressed_size",
                "size:compression_ratio",
                "size:bit_rate",
            ],
            MetricModule::ErrorStat => &[
                "error_stat:max_error",
                "error_stat:mse",
                "error_stat:rmse",
                "error_stat:psnr",
            ],
        }
    }
}

/// An immutable set of enabled metric modules
#[derive(Debug, Clone)]
pub struct MetricsSpec {
    modules: Vec<MetricModule>,
}

impl MetricsSpec {
    /// Build a spec from module ids, rejecting unknown ones.
    pub fn from_ids<I, S>(ids: I) -> Result<Self, MetricsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let modules = ids
            .into_iter()
            .map(|id| MetricModule::parse(id.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { modules })
    }

    /// Field names this spec would report, in module order. This is a pure
    /// function of the spec; the registry relies on it being identical in
    /// every process.
    pub fn result_fields(&self) -> Vec<String> {
        self.modules
            .iter()
            .flat_map(|m| m.fields().iter().map(|f| f.to_string()))
            .collect()
    }

    /// Fresh collector for one compress/decompress cycle.
    pub fn collector(&self) -> MetricsCollector {
        MetricsCollector {
            time: self.modules.contains(&MetricModule::Time),
            size: self.modules.contains(&MetricModule::Size),
            error_stat: self.modules.contains(&MetricModule::ErrorStat),
            values: BTreeMap::new(),
        }
    }
}

/// Accumulates metric values for a single task.
///
/// Each record call is a no-op unless the matching module is enabled, so
/// the worker can call them unconditionally. A task that fails midway
/// simply ends up with fewer recorded values.
#[derive(Debug)]
pub struct MetricsCollector {
    time: bool,
    size: bool,
    error_stat: bool,
    values: BTreeMap<String, f64>,
}

impl MetricsCollector {
    /// Record compression wall time.
    pub fn record_compress_time(&mut self, elapsed: Duration) {
        if self.time {
            self.values
                .insert("time:compress".to_string(), elapsed.as_secs_f64() * 1e3);
        }
    }

    /// Record decompression wall time.
    pub fn record_decompress_time(&mut self, elapsed: Duration) {
        if self.time {
            self.values
                .insert("time:decompress".to_string(), elapsed.as_secs_f64() * 1e3);
        }
    }

    /// Record input/compressed sizes, available as soon as compression ends.
    pub fn record_sizes(&mut self, uncompressed: usize, compressed: usize, elements: usize) {
        if !self.size {
            return;
        }
        self.values
            .insert("size:uncompressed_size".to_string(), uncompressed as f64);
        self.values
            .insert("size:compressed_size".to_string(), compressed as f64);
        let ratio = if compressed > 0 {
            uncompressed as f64 / compressed as f64
        } else {
            0.0
        };
        self.values
            .insert("size:compression_ratio".to_string(), ratio);
        let bit_rate = if elements > 0 {
            (compressed as f64 * 8.0) / elements as f64
        } else {
            0.0
        };
        self.values.insert("size:bit_rate".to_string(), bit_rate);
    }

    /// Record the decompressed size, available once decompression ends.
    pub fn record_decompressed_size(&mut self, decompressed: usize) {
        if self.size {
            self.values
                .insert("size:decompressed_size".to_string(), decompressed as f64);
        }
    }

    /// Record elementwise reconstruction-error statistics.
    pub fn record_error_stats(&mut self, input: &DataBuffer, output: &DataBuffer) {
        if !self.error_stat {
            return;
        }
        let original = input.elements_f64();
        let decoded = output.elements_f64();
        if original.is_empty() || original.len() != decoded.len() {
            return;
        }

        let mut max_error: f64 = 0.0;
        let mut sum_sq: f64 = 0.0;
        let mut min_val = f64::INFINITY;
        let mut max_val = f64::NEG_INFINITY;
        for (a, b) in original.iter().zip(decoded.iter()) {
            let diff = (a - b).abs();
            max_error = max_error.max(diff);
            sum_sq += diff * diff;
            min_val = min_val.min(*a);
            max_val = max_val.max(*a);
        }
        let mse = sum_sq / original.len() as f64;
        let range = max_val - min_val;
        let psnr = if mse > 0.0 && range > 0.0 {
            10.0 * (range * range / mse).log10()
        } else {
            f64::INFINITY
        };

        self.values
            .insert("error_stat:max_error".to_string(), max_error);
        self.values.insert("error_stat:mse".to_string(), mse);
        self.values
            .insert("error_stat:rmse".to_string(), mse.sqrt());
        self.values.insert("error_stat:psnr".to_string(), psnr);
    }

    /// Consume the collector, yielding field name → value.
    pub fn into_results(self) -> BTreeMap<String, f64> {
        self.values
    }
}
