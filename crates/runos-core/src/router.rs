// runos-core/src/router.rs
// ============================================================================
// Module: Model Router
// Description: Maps (estimated token count, node name, provider pool) to a
//              model choice record.
// Purpose: A pure, deterministic routing decision attached to every context
//          assembly.
// Dependencies: none beyond crate::model
// ============================================================================

//! ## Overview
//! `choose_model` never performs I/O and never reads mutable state; given
//! the same inputs it always returns the same [`ModelChoice`]. A
//! [`ProviderPool`]'s `routing` overrides are consulted first; the default
//! token/step threshold rule applies only when no override matches.

use serde::Deserialize;
use serde::Serialize;

use crate::model::ProviderPool;

/// Steps always routed to the large model regardless of token count.
const LARGE_MODEL_STEPS: &[&str] = &["aggregator", "react"];

/// Token threshold above which the default rule selects the large model.
pub const LARGE_CONTEXT_THRESHOLD: u64 = 60_000;

/// Default large-model name and cost when no provider pool overrides it.
pub const DEFAULT_LARGE_MODEL: &str = "gpt-4.1";
/// Default large-model per-invocation cost in US dollars.
pub const DEFAULT_LARGE_MODEL_COST_USD: f64 = 0.015;
/// Default small-model name when no provider pool overrides it.
pub const DEFAULT_SMALL_MODEL: &str = "small-fast";
/// Default small-model per-invocation cost in US dollars.
pub const DEFAULT_SMALL_MODEL_COST_USD: f64 = 0.0005;

/// The model router's output: one concrete model selection for a node
/// invocation, plus the cost estimate recorded on its `context_compiled`
/// event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelChoice {
    /// Selected model name.
    pub model: String,
    /// Estimated tokens this invocation needs, carried through unchanged.
    pub tokens: u64,
    /// Per-invocation cost estimate in US dollars.
    pub cost_usd: f64,
    /// Node name this choice was computed for.
    pub step: String,
}

/// Looks up `model_name`'s cost in `pool`, falling back to the default cost
/// for whichever tier the name matches, or zero if neither applies.
fn cost_for(pool: &ProviderPool, model_name: &str) -> f64 {
    if let Some(spec) = pool.models.iter().find(|spec| spec.name == model_name) {
        return spec.cost;
    }
    match model_name {
        DEFAULT_LARGE_MODEL => DEFAULT_LARGE_MODEL_COST_USD,
        DEFAULT_SMALL_MODEL => DEFAULT_SMALL_MODEL_COST_USD,
        _ => 0.0,
    }
}

/// Chooses a model for one node invocation.
///
/// Declarative overrides in `pool.routing` are checked first, in order; a
/// rule with `step: None` matches every node. When no rule matches (or no
/// pool is supplied), the default rule selects the large model when
/// `tokens_needed` exceeds [`LARGE_CONTEXT_THRESHOLD`] or `step` is one of
/// [`LARGE_MODEL_STEPS`], and the small model otherwise.
#[must_use]
pub fn choose_model(tokens_needed: u64, step: &str, pool: Option<&ProviderPool>) -> ModelChoice {
    if let Some(pool) = pool {
        if let Some(rule) = pool
            .routing
            .iter()
            .find(|rule| rule.step.as_deref().is_none_or(|s| s == step))
        {
            return ModelChoice {
                model: rule.model.clone(),
                tokens: tokens_needed,
                cost_usd: cost_for(pool, &rule.model),
                step: step.to_string(),
            };
        }
    }

    let use_large = tokens_needed > LARGE_CONTEXT_THRESHOLD || LARGE_MODEL_STEPS.contains(&step);
    let (model, default_cost) = if use_large {
        (DEFAULT_LARGE_MODEL, DEFAULT_LARGE_MODEL_COST_USD)
    } else {
        (DEFAULT_SMALL_MODEL, DEFAULT_SMALL_MODEL_COST_USD)
    };
    let cost_usd = pool.map_or(default_cost, |pool| cost_for(pool, model));

    ModelChoice {
        model: model.to_string(),
        tokens: tokens_needed,
        cost_usd,
        step: step.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelSpec;
    use crate::model::RoutingRule;

    #[test]
    fn large_model_chosen_above_threshold() {
        let choice = choose_model(70_000, "py_fixer", None);
        assert_eq!(choice.model, DEFAULT_LARGE_MODEL);
    }

    #[test]
    fn large_model_chosen_for_critical_steps_regardless_of_tokens() {
        let choice = choose_model(100, "aggregator", None);
        assert_eq!(choice.model, DEFAULT_LARGE_MODEL);
    }

    #[test]
    fn small_model_chosen_below_threshold() {
        let choice = choose_model(1_000, "tester", None);
        assert_eq!(choice.model, DEFAULT_SMALL_MODEL);
    }

    #[test]
    fn router_is_a_pure_function_of_its_inputs() {
        let a = choose_model(12_345, "security", None);
        let b = choose_model(12_345, "security", None);
        assert_eq!(a, b);
    }

    #[test]
    fn pool_routing_override_wins_over_default_rule() {
        let pool = ProviderPool {
            name: "default".to_string(),
            models: vec![ModelSpec {
                name: "house-model".to_string(),
                max_context: 32_000,
                rps: 50,
                cost: 0.01,
            }],
            routing: vec![RoutingRule {
                step: Some("tester".to_string()),
                model: "house-model".to_string(),
            }],
        };
        let choice = choose_model(1, "tester", Some(&pool));
        assert_eq!(choice.model, "house-model");
        assert!((choice.cost_usd - 0.01).abs() < f64::EPSILON);
    }

    #[test]
    fn wildcard_routing_rule_matches_every_step() {
        let pool = ProviderPool {
            name: "default".to_string(),
            models: Vec::new(),
            routing: vec![RoutingRule { step: None, model: "catch-all".to_string() }],
        };
        let choice = choose_model(999_999, "aggregator", Some(&pool));
        assert_eq!(choice.model, "catch-all");
    }
}
