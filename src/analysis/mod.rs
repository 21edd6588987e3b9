//! Rule-based CVD signal classifier
//!
//! Stateless analysis over a window of closed candles. Reads price action
//! and CVD flow together, then walks a fixed priority ladder: divergence
//! beats trend continuation beats accumulation beats everything else.
//! Statistical helpers work in f64 internally; exact CVD sums stay in
//! `Decimal` up to the comparison boundary.

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::{Candle, Timeframe};

/// Trading decision produced by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    EntryLong,
    EntryShort,
    Hold,
    Exit,
    AddPosition,
    ReduceRisk,
    StayOut,
}

/// Combined read of price and CVD direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrendDirection {
    Uptrend,
    Downtrend,
    Weak,
    Accumulation,
    Distribution,
    Sideways,
    Unknown,
}

/// Coarse strength bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Strength {
    Strong,
    Medium,
    Weak,
    Neutral,
    Unknown,
}

/// Coarse volatility bucket from the coefficient of variation of closes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Volatility {
    High,
    Medium,
    Low,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DivergenceKind {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone)]
struct Divergence {
    kind: DivergenceKind,
    description: &'static str,
}

#[derive(Debug, Clone)]
struct TrendRead {
    direction: TrendDirection,
    strength: Strength,
    description: &'static str,
}

/// Numeric inputs behind the decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMetrics {
    /// Close-to-close price change over the window, in percent
    pub price_change_pct: f64,
    /// CVD movement over the window
    pub cvd_change: Decimal,
    /// CVD total at the last candle's close
    pub current_cvd: Decimal,
    /// CVD delta of the last candle
    pub delta_current: Decimal,
    pub strength: Strength,
    pub volatility: Volatility,
}

/// Full classifier output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub decision: Decision,
    pub trend: TrendDirection,
    pub signal: String,
    pub action: String,
    pub reason: String,
    /// 0-100
    pub confidence: u8,
    pub timeframe: Timeframe,
    pub timeframe_context: String,
    pub cvd_status: String,
    pub metrics: AnalysisMetrics,
    pub timestamp_ms: i64,
}

/// Classifier knobs
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Minimum candles before a real signal is produced
    pub min_candles: usize,
    /// Trailing window analysed
    pub window: usize,
    /// Trailing sub-window scanned for divergence extrema
    pub extrema_window: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_candles: 10,
            window: 20,
            extrema_window: 10,
        }
    }
}

/// Stateless rule classifier over closed candles
#[derive(Debug)]
pub struct Analyzer {
    config: AnalyzerConfig,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default())
    }
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Classify the given candle history. Total over every input: short or
    /// empty histories degrade to a zero-confidence stay-out.
    pub fn analyze(&self, candles: &[Candle], timeframe: Timeframe) -> Analysis {
        if candles.is_empty() || candles.len() < self.config.min_candles {
            return self.insufficient_data(timeframe);
        }

        // A zero-width window would slice nothing; always keep at least the
        // last candle so the indexing below stays in bounds
        let span = self.config.window.max(1);
        let window = &candles[candles.len().saturating_sub(span)..];
        let last = &window[window.len() - 1];

        let price_change_pct = price_change_pct(window);
        let cvd_change = last.cvd_close - window[0].cvd_close;
        let divergence = self.detect_divergence(window);
        let trend = trend_read(price_change_pct, cvd_change);
        let strength = flow_strength(window);
        let volatility = volatility_read(window);

        let (decision, signal, action, reason, confidence) = if let Some(div) = &divergence {
            match div.kind {
                DivergenceKind::Bullish => (
                    Decision::EntryLong,
                    "Bullish Divergence".to_string(),
                    "Prepare to buy near support or on a break of structure".to_string(),
                    format!("{}. Strong bullish reversal signal", div.description),
                    85,
                ),
                DivergenceKind::Bearish => (
                    Decision::EntryShort,
                    "Bearish Divergence".to_string(),
                    "Prepare to sell near resistance".to_string(),
                    format!("{}. Strong bearish reversal signal", div.description),
                    85,
                ),
            }
        } else if trend.strength == Strength::Strong && trend.direction == TrendDirection::Uptrend {
            (
                Decision::Hold,
                "Strong Uptrend".to_string(),
                "Hold longs, trail the stop up".to_string(),
                format!("{}. Buyers are in control", trend.description),
                80,
            )
        } else if trend.strength == Strength::Strong && trend.direction == TrendDirection::Downtrend
        {
            (
                Decision::Hold,
                "Strong Downtrend".to_string(),
                "Hold shorts, trail the stop down".to_string(),
                format!("{}. Sellers are in control", trend.description),
                80,
            )
        } else if trend.direction == TrendDirection::Accumulation {
            (
                Decision::AddPosition,
                "Accumulation Phase".to_string(),
                "Prepare a long, breakout building".to_string(),
                trend.description.to_string(),
                70,
            )
        } else if trend.direction == TrendDirection::Distribution {
            (
                Decision::AddPosition,
                "Distribution Phase".to_string(),
                "Prepare a short, breakdown building".to_string(),
                trend.description.to_string(),
                70,
            )
        } else if trend.direction == TrendDirection::Weak {
            (
                Decision::ReduceRisk,
                "Weak Trend".to_string(),
                "Cut size or take partial profit".to_string(),
                format!("{}. Direction is unclear", trend.description),
                40,
            )
        } else if strength == Strength::Weak && volatility == Volatility::High {
            (
                Decision::StayOut,
                "Choppy Market".to_string(),
                "Stand aside, no trade".to_string(),
                "CVD is erratic and the market has no clear direction".to_string(),
                20,
            )
        } else if last.cvd_delta.abs() < Decimal::ONE {
            (
                Decision::StayOut,
                "Low Volume".to_string(),
                "No trade".to_string(),
                "Trading volume is too thin".to_string(),
                10,
            )
        } else {
            (
                Decision::StayOut,
                "Neutral".to_string(),
                "Wait for a clearer signal".to_string(),
                "No specific signal yet. Wait for a better setup".to_string(),
                30,
            )
        };

        let cvd_status = if last.cvd_close > Decimal::ZERO {
            format!("CVD: +{:.0} (buyers in control)", last.cvd_close)
        } else {
            format!("CVD: {:.0} (sellers in control)", last.cvd_close)
        };

        Analysis {
            decision,
            trend: trend.direction,
            signal,
            action,
            reason,
            confidence,
            timeframe,
            timeframe_context: timeframe_context(timeframe).to_string(),
            cvd_status,
            metrics: AnalysisMetrics {
                price_change_pct,
                cvd_change,
                current_cvd: last.cvd_close,
                delta_current: last.cvd_delta,
                strength,
                volatility,
            },
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }

    fn insufficient_data(&self, timeframe: Timeframe) -> Analysis {
        Analysis {
            decision: Decision::StayOut,
            trend: TrendDirection::Unknown,
            signal: "Insufficient Data".to_string(),
            action: "Wait for more candles".to_string(),
            reason: format!(
                "Need at least {} candles to analyze",
                self.config.min_candles
            ),
            confidence: 0,
            timeframe,
            timeframe_context: timeframe_context(timeframe).to_string(),
            cvd_status: "CVD: N/A".to_string(),
            metrics: AnalysisMetrics {
                price_change_pct: 0.0,
                cvd_change: Decimal::ZERO,
                current_cvd: Decimal::ZERO,
                delta_current: Decimal::ZERO,
                strength: Strength::Unknown,
                volatility: Volatility::Unknown,
            },
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Look for price/CVD divergence over the trailing extrema window.
    /// Peaks and troughs are strict local extrema of highs and lows.
    fn detect_divergence(&self, window: &[Candle]) -> Option<Divergence> {
        // A local extremum needs both neighbors, so a scan under three
        // candles cannot diverge
        if self.config.extrema_window < 3 || window.len() < self.config.extrema_window {
            return None;
        }
        let recent = &window[window.len() - self.config.extrema_window..];

        let mut peaks: Vec<(Decimal, Decimal)> = Vec::new();
        let mut troughs: Vec<(Decimal, Decimal)> = Vec::new();
        for i in 1..recent.len() - 1 {
            let prev = &recent[i - 1];
            let curr = &recent[i];
            let next = &recent[i + 1];
            if curr.high > prev.high && curr.high > next.high {
                peaks.push((curr.high, curr.cvd_close));
            }
            if curr.low < prev.low && curr.low < next.low {
                troughs.push((curr.low, curr.cvd_close));
            }
        }

        // Lower low in price with a higher low in CVD
        if troughs.len() >= 2 {
            let (prev_low, prev_cvd) = troughs[troughs.len() - 2];
            let (last_low, last_cvd) = troughs[troughs.len() - 1];
            if last_low < prev_low && last_cvd > prev_cvd {
                return Some(Divergence {
                    kind: DivergenceKind::Bullish,
                    description: "Price set a lower low while CVD set a higher low",
                });
            }
        }

        // Higher high in price with a lower high in CVD
        if peaks.len() >= 2 {
            let (prev_high, prev_cvd) = peaks[peaks.len() - 2];
            let (last_high, last_cvd) = peaks[peaks.len() - 1];
            if last_high > prev_high && last_cvd < prev_cvd {
                return Some(Divergence {
                    kind: DivergenceKind::Bearish,
                    description: "Price set a higher high while CVD set a lower high",
                });
            }
        }

        None
    }
}

/// Close-to-close change over the window, in percent
fn price_change_pct(window: &[Candle]) -> f64 {
    let first = window[0].close.to_f64().unwrap_or(0.0);
    let last = window[window.len() - 1].close.to_f64().unwrap_or(0.0);
    if first <= 0.0 {
        return 0.0;
    }
    (last - first) / first * 100.0
}

fn trend_read(price_change_pct: f64, cvd_change: Decimal) -> TrendRead {
    let price_up = price_change_pct > 0.2;
    let price_down = price_change_pct < -0.2;
    let price_flat = price_change_pct.abs() < 0.2;
    let cvd_up = cvd_change > Decimal::ZERO;
    let cvd_down = cvd_change < Decimal::ZERO;

    if price_up && cvd_up {
        TrendRead {
            direction: TrendDirection::Uptrend,
            strength: Strength::Strong,
            description: "Sustained uptrend, price and CVD rising together",
        }
    } else if price_down && cvd_down {
        TrendRead {
            direction: TrendDirection::Downtrend,
            strength: Strength::Strong,
            description: "Sustained downtrend, price and CVD falling together",
        }
    } else if (price_up && cvd_down) || (price_down && cvd_up) {
        TrendRead {
            direction: TrendDirection::Weak,
            strength: Strength::Weak,
            description: "Weak trend, price and CVD out of sync",
        }
    } else if price_flat && cvd_up {
        TrendRead {
            direction: TrendDirection::Accumulation,
            strength: Strength::Medium,
            description: "CVD rising while price moves sideways, bullish breakout building",
        }
    } else if price_flat && cvd_down {
        TrendRead {
            direction: TrendDirection::Distribution,
            strength: Strength::Medium,
            description: "CVD falling while price moves sideways, bearish breakdown building",
        }
    } else {
        TrendRead {
            direction: TrendDirection::Sideways,
            strength: Strength::Neutral,
            description: "Market moving sideways",
        }
    }
}

/// Mean absolute CVD delta over the window
fn flow_strength(window: &[Candle]) -> Strength {
    let sum: Decimal = window.iter().map(|c| c.cvd_delta.abs()).sum();
    let avg = sum / Decimal::from(window.len());
    if avg > dec!(10) {
        Strength::Strong
    } else if avg > dec!(5) {
        Strength::Medium
    } else {
        Strength::Weak
    }
}

/// Coefficient of variation of closes, in percent
fn volatility_read(window: &[Candle]) -> Volatility {
    let closes: Vec<f64> = window
        .iter()
        .map(|c| c.close.to_f64().unwrap_or(0.0))
        .collect();
    let mean = closes.iter().sum::<f64>() / closes.len() as f64;
    if mean <= 0.0 {
        return Volatility::Low;
    }
    let variance = closes.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / closes.len() as f64;
    let cv = variance.sqrt() / mean * 100.0;
    if cv > 1.0 {
        Volatility::High
    } else if cv > 0.5 {
        Volatility::Medium
    } else {
        Volatility::Low
    }
}

fn timeframe_context(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::Min1 => "Scalping. Fast moves, best suited to experienced traders",
        Timeframe::Min5 => "Scalping and day trading. Clearest CVD reads on this timeframe",
        Timeframe::Min15 => "Day trading. Clear trends with less noise",
        Timeframe::Hour1 => "Swing trading. Longer trends, fewer whipsaws",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: Decimal, high: Decimal, low: Decimal, cvd_close: Decimal, cvd_delta: Decimal) -> Candle {
        Candle {
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::Min1,
            open_time_ms: 0,
            open: close,
            high,
            low,
            close,
            volume: dec!(1),
            buy_volume: dec!(1),
            sell_volume: dec!(0),
            cvd_open: cvd_close - cvd_delta,
            cvd_close,
            cvd_delta,
        }
    }

    fn flat(close: Decimal, cvd_close: Decimal, cvd_delta: Decimal) -> Candle {
        candle(close, close + dec!(0.5), close - dec!(0.5), cvd_close, cvd_delta)
    }

    #[test]
    fn short_history_degrades_to_stay_out() {
        let analyzer = Analyzer::default();
        for n in [0usize, 1, 5, 9] {
            let candles: Vec<Candle> = (0..n).map(|_| flat(dec!(100), dec!(5), dec!(1))).collect();
            let analysis = analyzer.analyze(&candles, Timeframe::Min5);
            assert_eq!(analysis.decision, Decision::StayOut, "n={n}");
            assert_eq!(analysis.trend, TrendDirection::Unknown);
            assert_eq!(analysis.confidence, 0);
        }
    }

    #[test]
    fn strong_uptrend_holds_with_80() {
        // Rising closes and rising CVD across the window
        let candles: Vec<Candle> = (0..20)
            .map(|i| {
                let close = Decimal::from(100 + i);
                candle(close, close, close, Decimal::from(10 + i * 3), dec!(3))
            })
            .collect();
        let analysis = Analyzer::default().analyze(&candles, Timeframe::Min1);
        assert_eq!(analysis.decision, Decision::Hold);
        assert_eq!(analysis.trend, TrendDirection::Uptrend);
        assert_eq!(analysis.confidence, 80);
        assert!(analysis.signal.contains("Uptrend"));
    }

    #[test]
    fn strong_downtrend_holds_with_80() {
        let candles: Vec<Candle> = (0..20)
            .map(|i| {
                let close = Decimal::from(200 - i);
                candle(close, close, close, Decimal::from(-10 - i * 3), dec!(-3))
            })
            .collect();
        let analysis = Analyzer::default().analyze(&candles, Timeframe::Min1);
        assert_eq!(analysis.decision, Decision::Hold);
        assert_eq!(analysis.trend, TrendDirection::Downtrend);
        assert_eq!(analysis.confidence, 80);
    }

    #[test]
    fn bullish_divergence_wins_over_trend() {
        // Flat-ish tape with two price troughs: lower low in price,
        // higher low in CVD
        let mut candles: Vec<Candle> = (0..20)
            .map(|i| flat(dec!(100), Decimal::from(i), dec!(1)))
            .collect();
        candles[13] = candle(dec!(100), dec!(100.5), dec!(98), dec!(10), dec!(1));
        candles[16] = candle(dec!(100), dec!(100.5), dec!(97), dec!(14), dec!(1));
        let analysis = Analyzer::default().analyze(&candles, Timeframe::Min5);
        assert_eq!(analysis.decision, Decision::EntryLong);
        assert_eq!(analysis.confidence, 85);
        assert!(analysis.signal.contains("Bullish"));
    }

    #[test]
    fn bearish_divergence_signals_short() {
        // Two price peaks: higher high in price, lower high in CVD
        let mut candles: Vec<Candle> = (0..20)
            .map(|i| flat(dec!(100), Decimal::from(30 - i), dec!(-1)))
            .collect();
        candles[13] = candle(dec!(100), dec!(103), dec!(99.5), dec!(20), dec!(-1));
        candles[16] = candle(dec!(100), dec!(104), dec!(99.5), dec!(15), dec!(-1));
        let analysis = Analyzer::default().analyze(&candles, Timeframe::Min5);
        assert_eq!(analysis.decision, Decision::EntryShort);
        assert_eq!(analysis.confidence, 85);
    }

    #[test]
    fn accumulation_suggests_adding() {
        // Price pinned, CVD grinding up
        let candles: Vec<Candle> = (0..20)
            .map(|i| flat(dec!(100), Decimal::from(i * 2), dec!(2)))
            .collect();
        let analysis = Analyzer::default().analyze(&candles, Timeframe::Min15);
        assert_eq!(analysis.decision, Decision::AddPosition);
        assert_eq!(analysis.trend, TrendDirection::Accumulation);
        assert_eq!(analysis.confidence, 70);
    }

    #[test]
    fn distribution_suggests_adding_short() {
        let candles: Vec<Candle> = (0..20)
            .map(|i| flat(dec!(100), Decimal::from(-i * 2), dec!(-2)))
            .collect();
        let analysis = Analyzer::default().analyze(&candles, Timeframe::Min15);
        assert_eq!(analysis.decision, Decision::AddPosition);
        assert_eq!(analysis.trend, TrendDirection::Distribution);
        assert_eq!(analysis.confidence, 70);
    }

    #[test]
    fn opposed_price_and_cvd_reduce_risk() {
        // Price climbs past the threshold while CVD bleeds out
        let candles: Vec<Candle> = (0..20)
            .map(|i| {
                let close = dec!(100) + Decimal::from(i) * dec!(0.1);
                candle(close, close, close, Decimal::from(-i * 2), dec!(-2))
            })
            .collect();
        let analysis = Analyzer::default().analyze(&candles, Timeframe::Min1);
        assert_eq!(analysis.decision, Decision::ReduceRisk);
        assert_eq!(analysis.trend, TrendDirection::Weak);
        assert_eq!(analysis.confidence, 40);
    }

    #[test]
    fn choppy_market_stays_out() {
        // Wide alternating closes, tiny deltas, zero net CVD movement
        let candles: Vec<Candle> = (0..20)
            .map(|i| {
                let close = if i % 2 == 0 { dec!(102.5) } else { dec!(100) };
                let delta = if i % 2 == 0 { dec!(0.5) } else { dec!(-0.5) };
                candle(close, close, close, dec!(10), delta)
            })
            .collect();
        let analysis = Analyzer::default().analyze(&candles, Timeframe::Min1);
        assert_eq!(analysis.decision, Decision::StayOut);
        assert_eq!(analysis.confidence, 20);
        assert!(analysis.signal.contains("Choppy"));
        assert_eq!(analysis.metrics.volatility, Volatility::High);
        assert_eq!(analysis.metrics.strength, Strength::Weak);
    }

    #[test]
    fn thin_last_candle_flags_low_volume() {
        // Flat price, CVD going nowhere, last delta under one unit
        let candles: Vec<Candle> = (0..20)
            .map(|i| {
                let delta = if i % 2 == 0 { dec!(0.5) } else { dec!(-0.5) };
                flat(dec!(100), dec!(10), delta)
            })
            .collect();
        let analysis = Analyzer::default().analyze(&candles, Timeframe::Min1);
        assert_eq!(analysis.decision, Decision::StayOut);
        assert_eq!(analysis.confidence, 10);
        assert!(analysis.signal.contains("Low Volume"));
    }

    #[test]
    fn quiet_but_liquid_tape_is_neutral() {
        // Flat price, zero net CVD, healthy per-candle deltas
        let candles: Vec<Candle> = (0..20)
            .map(|i| {
                let delta = if i % 2 == 0 { dec!(2) } else { dec!(-2) };
                flat(dec!(100), dec!(10), delta)
            })
            .collect();
        let analysis = Analyzer::default().analyze(&candles, Timeframe::Min1);
        assert_eq!(analysis.decision, Decision::StayOut);
        assert_eq!(analysis.confidence, 30);
        assert_eq!(analysis.trend, TrendDirection::Sideways);
    }

    #[test]
    fn zero_window_config_still_classifies() {
        // Degenerate knobs must degrade, not panic
        let analyzer = Analyzer::new(AnalyzerConfig {
            min_candles: 10,
            window: 0,
            extrema_window: 0,
        });
        let candles: Vec<Candle> = (0..11).map(|i| flat(dec!(100), Decimal::from(i), dec!(1))).collect();
        let analysis = analyzer.analyze(&candles, Timeframe::Min1);
        assert_eq!(analysis.confidence, 30);
        assert_eq!(analysis.decision, Decision::StayOut);

        // min_candles 0 with an empty history is still the insufficient-data path
        let analyzer = Analyzer::new(AnalyzerConfig {
            min_candles: 0,
            window: 0,
            extrema_window: 0,
        });
        let analysis = analyzer.analyze(&[], Timeframe::Min1);
        assert_eq!(analysis.confidence, 0);
    }

    #[test]
    fn analysis_is_deterministic() {
        let candles: Vec<Candle> = (0..20)
            .map(|i| {
                let close = Decimal::from(100 + i % 3);
                candle(close, close + dec!(1), close - dec!(1), Decimal::from(i), dec!(1))
            })
            .collect();
        let analyzer = Analyzer::default();
        let a = analyzer.analyze(&candles, Timeframe::Min5);
        let b = analyzer.analyze(&candles, Timeframe::Min5);
        assert_eq!(a.decision, b.decision);
        assert_eq!(a.trend, b.trend);
        assert_eq!(a.signal, b.signal);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.metrics.cvd_change, b.metrics.cvd_change);
    }

    #[test]
    fn cvd_status_reflects_controlling_side() {
        let bullish: Vec<Candle> = (0..20).map(|_| flat(dec!(100), dec!(42), dec!(2))).collect();
        let analysis = Analyzer::default().analyze(&bullish, Timeframe::Min1);
        assert!(analysis.cvd_status.contains("buyers"));

        let bearish: Vec<Candle> = (0..20).map(|_| flat(dec!(100), dec!(-42), dec!(-2))).collect();
        let analysis = Analyzer::default().analyze(&bearish, Timeframe::Min1);
        assert!(analysis.cvd_status.contains("sellers"));
    }
}
