//! Builds the bounded context bundle handed to the query generator

use crate::time_context::{TimeContext, TimeTokens};
use crate::utils::TextUtils;
use tracing::{debug, info};

const SCHEMA_HEADER: &str = "[Target Database Schema]";
const NO_SCHEMA_MARKER: &str = "[Default Schema]\n(No schema loaded)";
const KNOWLEDGE_HEADER: &str = "[Business Rules & Custom Knowledge]";

/// Builds context from the time provider, the schema cache and the knowledge snapshot
pub struct ContextBuilder {
    config: ContextBuilderConfig,
}

/// Configuration for context building
#[derive(Debug, Clone)]
pub struct ContextBuilderConfig {
    /// Upper bound on the rendered bundle, in characters.
    pub max_total_chars: usize,
    /// Naming token for time-partitioned tables; empty disables the partition hint.
    pub partition_table_prefix: String,
}

impl Default for ContextBuilderConfig {
    fn default() -> Self {
        Self {
            max_total_chars: 24_000,
            partition_table_prefix: "outm_".to_string(),
        }
    }
}

/// One generation call's worth of context. Never persisted.
#[derive(Debug, Clone)]
pub struct ContextBundle {
    pub tokens: TimeTokens,
    pub time_block: String,
    pub schema_block: String,
    pub knowledge_block: Option<String>,
}

impl ContextBundle {
    /// Fixed order: time, schema, then knowledge when present.
    pub fn render(&self) -> String {
        let mut sections = vec![self.time_block.as_str(), self.schema_block.as_str()];
        if let Some(knowledge) = self.knowledge_block.as_deref() {
            sections.push(knowledge);
        }
        sections.join("\n\n")
    }

    pub fn has_schema(&self) -> bool {
        self.schema_block.starts_with(SCHEMA_HEADER)
    }
}

impl ContextBuilder {
    pub fn new(config: ContextBuilderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextBuilderConfig {
        &self.config
    }

    /// Compose the bundle. Deterministic for a given clock reading.
    pub fn build(&self, user_request: &str, schema: &str, knowledge: &str, time: &TimeContext) -> ContextBundle {
        let time_block = time.render_block(&self.config.partition_table_prefix);
        let schema = schema.trim();
        let knowledge = knowledge.trim();

        let (schema, knowledge) = self.fit_to_budget(&time_block, schema, knowledge);

        let schema_block = if schema.is_empty() {
            NO_SCHEMA_MARKER.to_string()
        } else {
            format!("{}\n{}", SCHEMA_HEADER, schema)
        };
        let knowledge_block = (!knowledge.is_empty()).then(|| format!("{}\n{}", KNOWLEDGE_HEADER, knowledge));

        debug!(
            "Built context for request of {} chars (schema {} chars, knowledge {} chars)",
            user_request.chars().count(),
            schema.chars().count(),
            knowledge.chars().count()
        );

        ContextBundle {
            tokens: time.tokens(),
            time_block,
            schema_block,
            knowledge_block,
        }
    }

    /// Trim schema and knowledge so the rendered bundle stays under the bound.
    /// Knowledge keeps at least half of the remaining room; the schema takes the rest.
    fn fit_to_budget(&self, time_block: &str, schema: &str, knowledge: &str) -> (String, String) {
        // headers, their newlines and the two section separators
        let overhead = NO_SCHEMA_MARKER.len().max(SCHEMA_HEADER.len() + 1) + KNOWLEDGE_HEADER.len() + 1 + 4;
        let remaining = self
            .config
            .max_total_chars
            .saturating_sub(time_block.chars().count() + overhead);

        let schema_len = schema.chars().count();
        let knowledge_len = knowledge.chars().count();
        if schema_len + knowledge_len <= remaining {
            return (schema.to_string(), knowledge.to_string());
        }

        let knowledge_budget = knowledge_len.min((remaining / 2).max(remaining.saturating_sub(schema_len)));
        let schema_budget = remaining - knowledge_budget;
        info!(
            "Context over budget ({} chars); trimming schema to {} and knowledge to {}",
            schema_len + knowledge_len,
            schema_budget,
            knowledge_budget
        );

        (
            TextUtils::truncate_lines(schema, schema_budget).into_owned(),
            TextUtils::truncate_lines(knowledge, knowledge_budget).into_owned(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn seoul_evening() -> TimeContext {
        TimeContext::at(Utc.with_ymd_and_hms(2025, 5, 19, 20, 30, 0).unwrap(), chrono_tz::Asia::Seoul)
    }

    #[test]
    fn test_empty_inputs_keep_only_time_block_and_marker() {
        let builder = ContextBuilder::new(ContextBuilderConfig::default());
        let bundle = builder.build("오늘 매출", "", "", &seoul_evening());
        let rendered = bundle.render();

        assert!(rendered.starts_with("[System Context - TIMEZONE: KST (Asia/Seoul)]"));
        assert!(rendered.contains("2025-05-20"));
        assert!(rendered.contains("outm_2505"));
        assert!(!rendered.contains(SCHEMA_HEADER));
        assert!(!rendered.contains(KNOWLEDGE_HEADER));
        assert!(rendered.ends_with("(No schema loaded)"));
        assert!(bundle.knowledge_block.is_none());
        assert!(!bundle.has_schema());
    }

    #[test]
    fn test_sections_are_in_fixed_order() {
        let builder = ContextBuilder::new(ContextBuilderConfig::default());
        let bundle = builder.build(
            "재고 조회",
            "Table 'parts': barcode (varchar) [PK], descr (nvarchar(100))",
            "curjago is the current stock column.",
            &seoul_evening(),
        );
        let rendered = bundle.render();

        let time_at = rendered.find("[System Context").unwrap();
        let schema_at = rendered.find(SCHEMA_HEADER).unwrap();
        let knowledge_at = rendered.find(KNOWLEDGE_HEADER).unwrap();
        assert!(time_at < schema_at && schema_at < knowledge_at);
        assert!(rendered.contains("barcode (varchar) [PK]"));
        assert_eq!(bundle.tokens.yymm, "2505");
    }

    #[test]
    fn test_whitespace_only_knowledge_is_omitted() {
        let builder = ContextBuilder::new(ContextBuilderConfig::default());
        let bundle = builder.build("q", "Table 't': id (int)", "  \n ", &seoul_evening());
        assert!(bundle.knowledge_block.is_none());
        assert!(bundle.has_schema());
    }

    #[test]
    fn test_oversized_inputs_are_bounded() {
        let config = ContextBuilderConfig { max_total_chars: 2_000, ..Default::default() };
        let builder = ContextBuilder::new(config);
        let schema = (0..500).map(|i| format!("Table 't{i}': id (int) [PK]")).collect::<Vec<_>>().join("\n");
        let knowledge = "rule line\n".repeat(400);

        let bundle = builder.build("q", &schema, &knowledge, &seoul_evening());
        let rendered = bundle.render();
        assert!(rendered.chars().count() <= 2_000, "rendered {} chars", rendered.chars().count());
        assert!(rendered.contains("Table 't0'"));
        assert!(rendered.contains("rule line"));
        assert!(rendered.contains("... (truncated)"));
    }

    #[test]
    fn test_no_partition_prefix_omits_partition_hint() {
        let config = ContextBuilderConfig { partition_table_prefix: String::new(), ..Default::default() };
        let bundle = ContextBuilder::new(config).build("q", "", "", &seoul_evening());
        assert!(!bundle.time_block.contains("Real-time Table"));
        assert!(bundle.time_block.contains("Current Month Suffix: 2505"));
    }
}
