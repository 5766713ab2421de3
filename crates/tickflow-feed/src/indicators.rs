//! Streaming indicators.
//!
//! Every indicator updates in O(1) time and holds O(1) memory (the volume SMA
//! holds a fixed-size ring buffer). None of them allocate after construction.

/// Exponential moving average.
///
/// The first observation initializes the average to that value.
#[derive(Debug, Clone, Copy)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn with_alpha(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    /// `alpha = 2 / (period + 1)`.
    pub fn with_period(period: usize) -> Self {
        Self::with_alpha(period_to_alpha(period))
    }

    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            None => x,
            Some(prev) => prev + self.alpha * (x - prev),
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

/// Smoothing factor matching an SMA of `period` samples in average lag.
pub fn period_to_alpha(period: usize) -> f64 {
    2.0 / (period.max(1) as f64 + 1.0)
}

/// Volume-weighted average price over the current session.
#[derive(Debug, Clone, Copy, Default)]
pub struct Vwap {
    numerator: f64,
    denominator: f64,
}

impl Vwap {
    pub fn update(&mut self, price: f64, volume: f64) {
        self.numerator += price * volume;
        self.denominator += volume;
    }

    /// Undefined until some volume has traded in the session.
    pub fn value(&self) -> Option<f64> {
        if self.denominator > 0.0 {
            Some(self.numerator / self.denominator)
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.numerator = 0.0;
        self.denominator = 0.0;
    }

    pub fn numerator(&self) -> f64 {
        self.numerator
    }

    pub fn denominator(&self) -> f64 {
        self.denominator
    }
}

/// Welford's online mean and variance.
#[derive(Debug, Clone, Copy, Default)]
pub struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    pub fn update(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count >= 1).then_some(self.mean)
    }

    pub fn m2(&self) -> f64 {
        self.m2
    }

    /// Sample variance. Needs at least two observations.
    pub fn variance(&self) -> Option<f64> {
        if self.count < 2 {
            return None;
        }
        Some((self.m2 / (self.count - 1) as f64).max(0.0))
    }

    pub fn stddev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }
}

/// Simple moving average over a fixed-length ring buffer.
#[derive(Debug, Clone)]
pub struct RollingSma {
    buf: Vec<f64>,
    head: usize,
    len: usize,
    sum: f64,
}

impl RollingSma {
    pub fn new(window: usize) -> Self {
        Self {
            buf: vec![0.0; window.max(1)],
            head: 0,
            len: 0,
            sum: 0.0,
        }
    }

    pub fn push(&mut self, x: f64) {
        let cap = self.buf.len();
        if self.len == cap {
            self.sum -= self.buf[self.head];
        } else {
            self.len += 1;
        }
        self.buf[self.head] = x;
        self.sum += x;
        self.head = (self.head + 1) % cap;
    }

    /// Mean of the samples currently in the window.
    pub fn mean(&self) -> Option<f64> {
        (self.len > 0).then(|| self.sum / self.len as f64)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    pub fn window(&self) -> usize {
        self.buf.len()
    }
}

/// Wilder smoothing: simple mean over the first `period` samples, then
/// `avg = (avg * (period - 1) + x) / period`.
#[derive(Debug, Clone, Copy)]
struct WilderAverage {
    period: usize,
    seen: usize,
    avg: f64,
}

impl WilderAverage {
    fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            seen: 0,
            avg: 0.0,
        }
    }

    fn update(&mut self, x: f64) {
        if self.seen < self.period {
            self.seen += 1;
            self.avg += (x - self.avg) / self.seen as f64;
        } else {
            let n = self.period as f64;
            self.avg = (self.avg * (n - 1.0) + x) / n;
        }
    }

    fn ready(&self) -> bool {
        self.seen >= self.period
    }

    fn value(&self) -> Option<f64> {
        self.ready().then_some(self.avg)
    }
}

/// Wilder relative strength index over tick-to-tick price changes.
#[derive(Debug, Clone, Copy)]
pub struct WilderRsi {
    gains: WilderAverage,
    losses: WilderAverage,
    last: Option<f64>,
}

impl WilderRsi {
    pub fn new(period: usize) -> Self {
        Self {
            gains: WilderAverage::new(period),
            losses: WilderAverage::new(period),
            last: None,
        }
    }

    pub fn update(&mut self, price: f64) {
        if let Some(last) = self.last {
            let change = price - last;
            self.gains.update(change.max(0.0));
            self.losses.update((-change).max(0.0));
        }
        self.last = Some(price);
    }

    /// RSI in [0, 100] once `period` changes have been observed.
    pub fn value(&self) -> Option<f64> {
        let gain = self.gains.value()?;
        let loss = self.losses.value()?;
        if loss == 0.0 {
            return Some(if gain == 0.0 { 50.0 } else { 100.0 });
        }
        let rs = gain / loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}

/// Average true range where each tick's range is `|price - prev_price|`.
#[derive(Debug, Clone, Copy)]
pub struct WilderAtr {
    ranges: WilderAverage,
    last: Option<f64>,
}

impl WilderAtr {
    pub fn new(period: usize) -> Self {
        Self {
            ranges: WilderAverage::new(period),
            last: None,
        }
    }

    pub fn update(&mut self, price: f64) {
        if let Some(last) = self.last {
            self.ranges.update((price - last).abs());
        }
        self.last = Some(price);
    }

    pub fn value(&self) -> Option<f64> {
        self.ranges.value()
    }
}
