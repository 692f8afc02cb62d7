//! Static per-model price table backing `ProviderAdapter::estimate_cost`.
//!
//! Prices are USD per 1M tokens, input/output. Local/self-hosted models
//! (LM Studio, Ollama, llama.cpp, vLLM) have no metered cost and are not
//! listed; `estimate_cost` returns `None` for them, matching the teacher's
//! own local-first stance (`config::Provider` has no pricing concept at all).

const PER_MILLION: &[(&str, f64, f64)] = &[
    ("claude-3-5-sonnet", 3.00, 15.00),
    ("claude-3-5-haiku", 0.80, 4.00),
    ("claude-3-opus", 15.00, 75.00),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4-turbo", 10.00, 30.00),
    ("gemini-1.5-pro", 1.25, 5.00),
    ("gemini-1.5-flash", 0.075, 0.30),
];

/// Looks up `model` by prefix match (so `"gpt-4o-2024-08-06"` matches the
/// `"gpt-4o"` entry) and returns the estimated USD cost, or `None` if the
/// model isn't in the table.
pub fn estimate_cost(model: &str, input_tokens: u32, output_tokens: u32) -> Option<f64> {
    let (_, in_price, out_price) = PER_MILLION.iter().find(|(name, _, _)| model.starts_with(name))?;
    let cost = (input_tokens as f64 / 1_000_000.0) * in_price
        + (output_tokens as f64 / 1_000_000.0) * out_price;
    Some(cost)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matches_dated_model_names() {
        let cost = estimate_cost("gpt-4o-2024-08-06", 1_000_000, 1_000_000).unwrap();
        assert!((cost - 12.50).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_returns_none() {
        assert!(estimate_cost("llama3:8b", 1000, 1000).is_none());
    }

    #[test]
    fn zero_tokens_cost_zero() {
        assert_eq!(estimate_cost("gpt-4o-mini", 0, 0), Some(0.0));
    }
}
