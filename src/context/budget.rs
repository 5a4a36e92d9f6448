//! Context budgets per model family.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Input budget of a model: its context window minus tokens kept for output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelBudget {
    pub context_window: usize,
    pub reserved_output: usize,
}

impl ModelBudget {
    pub const fn new(context_window: usize, reserved_output: usize) -> Self {
        Self {
            context_window,
            reserved_output,
        }
    }

    /// Tokens available for the prompt.
    pub fn input_budget(&self) -> usize {
        self.context_window.saturating_sub(self.reserved_output)
    }
}

const FAMILY_BUDGETS: [(&[&str], ModelBudget); 4] = [
    (
        &["claude", "sonnet", "opus", "haiku"],
        ModelBudget::new(200_000, 64_000),
    ),
    (&["gemini"], ModelBudget::new(1_000_000, 300_000)),
    (&["deepseek"], ModelBudget::new(128_000, 28_000)),
    (&["gpt", "o1", "o3", "o4"], ModelBudget::new(128_000, 28_000)),
];

const FALLBACK_BUDGET: ModelBudget = ModelBudget::new(41_000, 10_000);

/// Resolves a model identifier to its budget.
///
/// Overrides are matched first, by case-insensitive substring; the longest
/// matching key wins so `gpt-4o-mini` can be tuned apart from `gpt-4o`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct BudgetTable {
    overrides: BTreeMap<String, ModelBudget>,
}

impl BudgetTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, pattern: impl Into<String>, budget: ModelBudget) -> Self {
        self.overrides.insert(pattern.into().to_lowercase(), budget);
        self
    }

    pub fn resolve(&self, model: &str) -> ModelBudget {
        let model = model.to_lowercase();
        if let Some((_, budget)) = self
            .overrides
            .iter()
            .filter(|(pattern, _)| model.contains(pattern.as_str()))
            .max_by_key(|(pattern, _)| pattern.len())
        {
            return *budget;
        }
        FAMILY_BUDGETS
            .iter()
            .find(|(needles, _)| needles.iter().any(|n| model.contains(n)))
            .map(|(_, budget)| *budget)
            .unwrap_or(FALLBACK_BUDGET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn families_resolve_to_known_budgets() {
        let table = BudgetTable::new();
        assert_eq!(table.resolve("anthropic/claude-sonnet-4").input_budget(), 136_000);
        assert_eq!(table.resolve("gemini-2.5-pro").input_budget(), 700_000);
        assert_eq!(table.resolve("openai/gpt-4o").input_budget(), 100_000);
        assert_eq!(table.resolve("some-local-model").input_budget(), 31_000);
    }

    #[test]
    fn longest_override_wins() {
        let table = BudgetTable::new()
            .with_override("gpt-4o", ModelBudget::new(64_000, 4_000))
            .with_override("GPT-4o-mini", ModelBudget::new(32_000, 2_000));
        assert_eq!(table.resolve("gpt-4o-mini").input_budget(), 30_000);
        assert_eq!(table.resolve("gpt-4o").input_budget(), 60_000);
    }
}
