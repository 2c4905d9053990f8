/// A quantile that has both the raw value and the label it is rendered under.
///
/// We work with quantiles for floating-point precision, but the varz document keys its latency
/// block by percentile, without any prefix: a quantile of `0.5` is rendered as `"50"`, and a
/// quantile of `0.99` as `"99"`.  Fractional percentiles drop the decimal point, so `0.999` is
/// rendered as `"999"`.
///
/// There are two special cases, where we label `0.0` and `1.0` as `min` and `max`, respectively.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantile(f64, String);

impl Quantile {
    /// Creates a new [`Quantile`] from a floating-point value.
    ///
    /// All values are clamped between 0.0 and 1.0.
    pub fn new(quantile: f64) -> Quantile {
        let clamped = quantile.max(0.0).min(1.0);
        let display = clamped * 100.0;

        let raw_label = format!("{}", clamped);
        let label = match raw_label.as_str() {
            "0" => "min".to_string(),
            "1" => "max".to_string(),
            _ => format!("{}", display).replace('.', ""),
        };

        Quantile(clamped, label)
    }

    /// Gets the display label.
    pub fn label(&self) -> &str {
        self.1.as_str()
    }

    /// Gets the raw quantile value.
    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Parses a slice of floating-point values into a vector of [`Quantile`]s.
pub fn parse_quantiles(quantiles: &[f64]) -> Vec<Quantile> {
    quantiles.iter().map(|f| Quantile::new(*f)).collect()
}

/// The percentiles rendered for every metric block: 50th, 75th and 99th.
pub fn default_quantiles() -> Vec<Quantile> {
    parse_quantiles(&crate::DEFAULT_PERCENTILES)
}
