// Usage and cost accounting
//
// Every executor reports its delta through `accumulate_llm` or
// `accumulate_tool`. Both build a delta and fold it in with `merge`, which
// is plain field-wise addition: the order in which deltas arrive never
// changes the totals.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const DEFAULT_CURRENCY: &str = "USD";

/// Token and call counters for LLM calls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub api_calls: u64,
    pub processing_time_ms: u64,
}

impl LlmUsage {
    pub fn merge(&mut self, other: &LlmUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        self.api_calls += other.api_calls;
        self.processing_time_ms += other.processing_time_ms;
    }
}

/// Counters for a single tool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUsageEntry {
    pub calls: u64,
    pub total_time_ms: u64,
    pub successes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsUsage {
    pub total_calls: u64,
    pub total_time_ms: u64,
    #[serde(default)]
    pub by_tool: BTreeMap<String, ToolUsageEntry>,
}

impl ToolsUsage {
    pub fn merge(&mut self, other: &ToolsUsage) {
        self.total_calls += other.total_calls;
        self.total_time_ms += other.total_time_ms;
        for (tool, entry) in &other.by_tool {
            let current = self.by_tool.entry(tool.clone()).or_default();
            current.calls += entry.calls;
            current.total_time_ms += entry.total_time_ms;
            current.successes += entry.successes;
        }
    }
}

/// Running usage totals of an operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub llm: LlmUsage,
    #[serde(default)]
    pub tools: ToolsUsage,
}

impl Usage {
    pub fn merge(&mut self, other: &Usage) {
        self.llm.merge(&other.llm);
        self.tools.merge(&other.tools);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmCost {
    pub total: f64,
    #[serde(default)]
    pub by_model: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCost {
    pub total: f64,
    #[serde(default)]
    pub by_tool: BTreeMap<String, f64>,
}

/// Running monetary totals of an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cost {
    #[serde(default)]
    pub llm: LlmCost,
    #[serde(default)]
    pub tools: ToolsCost,
    pub total: f64,
    pub currency: String,
}

impl Default for Cost {
    fn default() -> Self {
        Self {
            llm: LlmCost::default(),
            tools: ToolsCost::default(),
            total: 0.0,
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

impl Cost {
    pub fn merge(&mut self, other: &Cost) {
        self.llm.total += other.llm.total;
        for (model, amount) in &other.llm.by_model {
            *self.llm.by_model.entry(model.clone()).or_default() += amount;
        }
        self.tools.total += other.tools.total;
        for (tool, amount) in &other.tools.by_tool {
            *self.tools.by_tool.entry(tool.clone()).or_default() += amount;
        }
        self.total += other.total;
        if self.currency.is_empty() {
            self.currency = other.currency.clone();
        }
    }
}

/// Final usage report of one LLM call, as delivered by the chat model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Provider-reported total; derived from input + output when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    /// Provider-computed cost of the call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl ModelUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: None,
            cost: None,
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn total(&self) -> u64 {
        self.total_tokens
            .unwrap_or(self.input_tokens + self.output_tokens)
    }
}

/// Fixed per-call price table for tools, keyed by `identifier/api_name`
#[derive(Debug, Clone, PartialEq)]
pub struct ToolPricing {
    prices: HashMap<String, f64>,
}

impl Default for ToolPricing {
    fn default() -> Self {
        let prices = [
            ("web-browsing/search", 0.001),
            ("web-browsing/crawlSinglePage", 0.002),
            ("web-browsing/crawlMultiPages", 0.004),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self { prices }
    }
}

impl ToolPricing {
    /// A table where every tool is free
    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
        }
    }

    pub fn with_price(mut self, tool_key: impl Into<String>, price: f64) -> Self {
        self.prices.insert(tool_key.into(), price);
        self
    }

    /// Price of one call; unlisted tools cost 0
    pub fn price(&self, tool_key: &str) -> f64 {
        self.prices.get(tool_key).copied().unwrap_or(0.0)
    }
}

/// Fold one LLM call into the running totals
pub fn accumulate_llm(
    usage: &Usage,
    cost: &Cost,
    model: &str,
    report: &ModelUsage,
    processing_time_ms: u64,
) -> (Usage, Cost) {
    let delta_usage = Usage {
        llm: LlmUsage {
            input_tokens: report.input_tokens,
            output_tokens: report.output_tokens,
            total_tokens: report.total(),
            api_calls: 1,
            processing_time_ms,
        },
        tools: ToolsUsage::default(),
    };

    let amount = report.cost.unwrap_or(0.0);
    let mut delta_cost = Cost {
        total: amount,
        ..Cost::default()
    };
    delta_cost.llm.total = amount;
    delta_cost.llm.by_model.insert(model.to_string(), amount);

    apply(usage, cost, &delta_usage, &delta_cost)
}

/// Fold one tool call into the running totals
pub fn accumulate_tool(
    usage: &Usage,
    cost: &Cost,
    tool_key: &str,
    execution_time_ms: u64,
    success: bool,
    pricing: &ToolPricing,
) -> (Usage, Cost) {
    let mut delta_usage = Usage::default();
    delta_usage.tools.total_calls = 1;
    delta_usage.tools.total_time_ms = execution_time_ms;
    delta_usage.tools.by_tool.insert(
        tool_key.to_string(),
        ToolUsageEntry {
            calls: 1,
            total_time_ms: execution_time_ms,
            successes: u64::from(success),
        },
    );

    let price = pricing.price(tool_key);
    let mut delta_cost = Cost {
        total: price,
        ..Cost::default()
    };
    delta_cost.tools.total = price;
    delta_cost.tools.by_tool.insert(tool_key.to_string(), price);

    apply(usage, cost, &delta_usage, &delta_cost)
}

fn apply(usage: &Usage, cost: &Cost, delta_usage: &Usage, delta_cost: &Cost) -> (Usage, Cost) {
    let mut usage = usage.clone();
    let mut cost = cost.clone();
    usage.merge(delta_usage);
    cost.merge(delta_cost);
    (usage, cost)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm(usage: &Usage, cost: &Cost, report: &ModelUsage) -> (Usage, Cost) {
        accumulate_llm(usage, cost, "gpt-test", report, 100)
    }

    #[test]
    fn test_accumulate_llm_order_independent() {
        let x = ModelUsage::new(10, 5).with_cost(0.5);
        let y = ModelUsage::new(3, 7).with_cost(0.25);
        let (u0, c0) = (Usage::default(), Cost::default());

        let (u1, c1) = llm(&u0, &c0, &x);
        let (xy_usage, xy_cost) = llm(&u1, &c1, &y);

        let (u1, c1) = llm(&u0, &c0, &y);
        let (yx_usage, yx_cost) = llm(&u1, &c1, &x);

        assert_eq!(xy_usage, yx_usage);
        assert_eq!(xy_cost, yx_cost);
        assert_eq!(xy_usage.llm.total_tokens, 25);
        assert_eq!(xy_usage.llm.api_calls, 2);
        assert_eq!(xy_cost.total, 0.75);
        assert_eq!(xy_cost.llm.by_model["gpt-test"], 0.75);
    }

    #[test]
    fn test_accumulate_llm_combined_call_matches_totals() {
        let x = ModelUsage::new(10, 5).with_cost(0.5);
        let y = ModelUsage::new(3, 7).with_cost(0.25);
        let combined = ModelUsage::new(13, 12).with_cost(0.75);
        let (u0, c0) = (Usage::default(), Cost::default());

        let (u1, c1) = llm(&u0, &c0, &x);
        let (separate_usage, separate_cost) = llm(&u1, &c1, &y);
        let (combined_usage, combined_cost) = llm(&u0, &c0, &combined);

        assert_eq!(separate_usage.llm.input_tokens, combined_usage.llm.input_tokens);
        assert_eq!(separate_usage.llm.output_tokens, combined_usage.llm.output_tokens);
        assert_eq!(separate_usage.llm.total_tokens, combined_usage.llm.total_tokens);
        assert_eq!(separate_cost.total, combined_cost.total);
    }

    #[test]
    fn test_merge_is_associative() {
        let pricing = ToolPricing::empty().with_price("a/run", 0.5);
        let base = (Usage::default(), Cost::default());
        let a = accumulate_tool(&base.0, &base.1, "a/run", 20, true, &pricing);
        let b = accumulate_tool(&base.0, &base.1, "b/run", 30, false, &pricing);
        let c = llm(&base.0, &base.1, &ModelUsage::new(1, 2).with_cost(0.25));

        let mut left = a.0.clone();
        left.merge(&b.0);
        left.merge(&c.0);

        let mut bc = b.0.clone();
        bc.merge(&c.0);
        let mut right = a.0.clone();
        right.merge(&bc);

        assert_eq!(left, right);

        let mut left_cost = a.1.clone();
        left_cost.merge(&b.1);
        left_cost.merge(&c.1);
        let mut bc_cost = b.1.clone();
        bc_cost.merge(&c.1);
        let mut right_cost = a.1.clone();
        right_cost.merge(&bc_cost);

        assert_eq!(left_cost, right_cost);
        assert_eq!(left_cost.total, 0.75);
    }

    #[test]
    fn test_accumulate_tool_counts_successes_and_price() {
        let pricing = ToolPricing::default();
        let (usage, cost) = accumulate_tool(
            &Usage::default(),
            &Cost::default(),
            "web-browsing/search",
            40,
            true,
            &pricing,
        );
        let (usage, cost) = accumulate_tool(&usage, &cost, "local/echo", 10, false, &pricing);

        assert_eq!(usage.tools.total_calls, 2);
        assert_eq!(usage.tools.total_time_ms, 50);
        assert_eq!(usage.tools.by_tool["web-browsing/search"].successes, 1);
        assert_eq!(usage.tools.by_tool["local/echo"].successes, 0);
        assert_eq!(cost.tools.by_tool["local/echo"], 0.0);
        assert_eq!(cost.total, 0.001);
        assert_eq!(cost.currency, "USD");
    }
}
