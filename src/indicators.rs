/// Smoothing span applied to the first difference of the price EMA.
pub const SLOPE_SMOOTHING_SPAN: usize = 14;
const MIN_PRICE_SPAN: usize = 5;

pub fn calculate_ema(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema_values = Vec::with_capacity(prices.len());
    ema_values.push(prices[0]);

    for i in 1..prices.len() {
        let ema = (prices[i] * multiplier) + (ema_values[i - 1] * (1.0 - multiplier));
        ema_values.push(ema);
    }

    ema_values
}

/// EMA span on prices for a given signal parameter (alpha).
pub fn price_span_for(alpha: f64) -> usize {
    if !alpha.is_finite() || alpha <= 0.0 {
        return MIN_PRICE_SPAN;
    }
    ((alpha / 10.0).floor() as usize).max(MIN_PRICE_SPAN)
}

/// Smoothed slope of a price EMA. Gaps in `prices` stay gaps in the output;
/// the computation runs over the observed values only.
pub fn stable_slope(prices: &[Option<f64>], alpha: f64) -> Vec<Option<f64>> {
    let observed: Vec<f64> = prices
        .iter()
        .filter_map(|price| price.filter(|value| value.is_finite()))
        .collect();
    if observed.is_empty() {
        return vec![None; prices.len()];
    }

    let smoothed = calculate_ema(&observed, price_span_for(alpha));
    let mut diffs = Vec::with_capacity(smoothed.len());
    diffs.push(0.0);
    diffs.extend(smoothed.windows(2).map(|pair| pair[1] - pair[0]));
    let slope = calculate_ema(&diffs, SLOPE_SMOOTHING_SPAN);

    let mut values = slope.into_iter();
    prices
        .iter()
        .map(|price| match price {
            Some(value) if value.is_finite() => values.next(),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_seeds_with_first_value() {
        let ema = calculate_ema(&[10.0, 20.0], 3);
        assert_eq!(ema[0], 10.0);
        assert!((ema[1] - 15.0).abs() < 1e-12);
    }

    #[test]
    fn price_span_has_floor_of_five() {
        assert_eq!(price_span_for(200.0), 20);
        assert_eq!(price_span_for(30.0), 5);
        assert_eq!(price_span_for(f64::NAN), 5);
    }

    #[test]
    fn slope_is_positive_on_rising_prices() {
        let prices: Vec<Option<f64>> = (0..60).map(|i| Some(100.0 + i as f64)).collect();
        let slope = stable_slope(&prices, 100.0);
        assert_eq!(slope.len(), prices.len());
        assert_eq!(slope[0], Some(0.0));
        assert!(slope.last().unwrap().unwrap() > 0.0);
    }

    #[test]
    fn gaps_stay_absent_in_slope() {
        let prices = vec![Some(10.0), None, Some(11.0), Some(12.0)];
        let slope = stable_slope(&prices, 50.0);
        assert!(slope[0].is_some());
        assert!(slope[1].is_none());
        assert!(slope[2].is_some());
        assert!(slope[3].is_some());

        let all_gaps = stable_slope(&[None, None], 50.0);
        assert_eq!(all_gaps, vec![None, None]);
    }
}
