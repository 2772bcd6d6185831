use std::collections::BTreeMap;

use crate::config::ModelPricing;

use super::LlmUsage;

/// Per-million-token prices by model.
///
/// Lookup is exact first, then by model family (`opus`, `sonnet`, `haiku`)
/// so dated model ids resolve without listing every release.
#[derive(Debug, Clone)]
pub struct PriceTable {
    exact: BTreeMap<String, ModelPricing>,
}

fn family_price(model: &str) -> Option<ModelPricing> {
    let (input, output) = if model.contains("opus") {
        (15.0, 75.0)
    } else if model.contains("sonnet") {
        (3.0, 15.0)
    } else if model.contains("haiku") {
        (0.8, 4.0)
    } else {
        return None;
    };
    Some(ModelPricing {
        input_per_million: input,
        output_per_million: output,
    })
}

impl PriceTable {
    /// Built-in family prices plus `overrides` keyed by exact model id.
    pub fn new(overrides: BTreeMap<String, ModelPricing>) -> Self {
        Self { exact: overrides }
    }

    pub fn price(&self, model: &str) -> Option<ModelPricing> {
        self.exact
            .get(model)
            .copied()
            .or_else(|| family_price(model))
    }

    /// Cost in USD. Unknown models fall back to sonnet rates so spend is
    /// never silently recorded as zero.
    pub fn cost(&self, model: &str, usage: LlmUsage) -> f64 {
        let price = self.price(model).unwrap_or_else(|| {
            tracing::warn!(model, "No price for model, using sonnet rates");
            ModelPricing {
                input_per_million: 3.0,
                output_per_million: 15.0,
            }
        });
        (usage.input_tokens as f64 * price.input_per_million
            + usage.output_tokens as f64 * price.output_per_million)
            / 1_000_000.0
    }
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::new(BTreeMap::new())
    }
}
