//! Bounded context assembly for retrieval-augmented generation
//!
//! Turns a query plus nearest-neighbor candidates into a bounded set of
//! prompt context blocks: classify the query intent, keep candidates of
//! the matching style, and truncate descriptions so prompt size stays
//! predictable. Filtering never empties the context while candidates
//! exist; it falls back to the raw top-K.

use crate::config::EngineConfig;
use crate::knowledge::KnowledgeHit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    /// Profile/document lookups ("cv", "who is", ...).
    Document,
    /// Everything else: informational and product questions.
    Product,
}

/// Context blocks ready for the generation gateway, plus the filtered
/// candidates retained for the deterministic generation-failure summary.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub intent: QueryIntent,
    pub blocks: Vec<String>,
    pub candidates: Vec<KnowledgeHit>,
}

pub struct ContextAssembler {
    profile_keywords: Vec<String>,
    truncate_chars: usize,
    max_entries: usize,
    fallback_max_items: usize,
    doc_price_threshold: f64,
}

impl ContextAssembler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            profile_keywords: config.profile_keywords.clone(),
            truncate_chars: config.context_truncate_chars,
            max_entries: config.top_k,
            fallback_max_items: config.fallback_max_items,
            doc_price_threshold: config.doc_price_threshold,
        }
    }

    /// Keyword heuristic over the lowercased query.
    pub fn classify_intent(&self, query: &str) -> QueryIntent {
        let lowered = query.to_lowercase();
        if self
            .profile_keywords
            .iter()
            .any(|kw| lowered.contains(kw.as_str()))
        {
            QueryIntent::Document
        } else {
            QueryIntent::Product
        }
    }

    /// Document-style entries: file-like titles, or the low price marker
    /// used by ingestion.
    pub fn is_document_style(&self, hit: &KnowledgeHit) -> bool {
        let title = hit.title.to_lowercase();
        let looks_like_file =
            title.ends_with(".pdf") || title.ends_with(".doc") || title.ends_with(".docx");
        let has_marker_price = hit
            .price_marker
            .map(|p| p <= self.doc_price_threshold)
            .unwrap_or(false);

        looks_like_file || has_marker_price
    }

    /// Build the bounded generation context from top-K candidates ordered
    /// by non-decreasing distance.
    pub fn assemble(&self, query: &str, hits: Vec<KnowledgeHit>) -> AssembledContext {
        let intent = self.classify_intent(query);

        let mut filtered: Vec<KnowledgeHit> = hits
            .iter()
            .filter(|hit| {
                let doc_style = self.is_document_style(hit);
                match intent {
                    QueryIntent::Document => doc_style,
                    QueryIntent::Product => !doc_style,
                }
            })
            .take(self.max_entries)
            .cloned()
            .collect();

        // Never hand generation an empty context while candidates exist.
        if filtered.is_empty() {
            filtered = hits.into_iter().take(self.max_entries).collect();
        }

        let blocks = filtered.iter().map(|hit| self.render_block(hit)).collect();

        AssembledContext {
            intent,
            blocks,
            candidates: filtered,
        }
    }

    fn render_block(&self, hit: &KnowledgeHit) -> String {
        let summary = truncate_chars(&hit.description, self.truncate_chars);
        let price = hit
            .price_marker
            .map(format_price)
            .map(|p| format!("${}", p))
            .unwrap_or_else(|| "N/A".to_string());

        format!(
            "===\nItem: {}\nDetails: {}\nPrice: {}\n===\n\n",
            hit.title, summary, price
        )
    }

    /// Deterministic bullet-list summary used when generation fails.
    /// `apology` is returned when there is nothing to summarize.
    pub fn fallback_summary(
        &self,
        query: &str,
        candidates: &[KnowledgeHit],
        apology: &str,
    ) -> String {
        if candidates.is_empty() {
            return apology.to_string();
        }

        let mut summary = format!(
            "Based on your query about \"{}\", here's what I found:\n\n",
            query
        );

        for hit in candidates.iter().take(self.fallback_max_items) {
            summary.push_str("• ");
            summary.push_str(&hit.title);
            if let Some(price) = hit.price_marker {
                if price > self.doc_price_threshold {
                    summary.push_str(&format!(" (${})", format_price(price)));
                }
            }
            summary.push('\n');
        }

        summary.push_str("\nWould you like more details about any of these?");
        summary
    }
}

/// Truncate on a char boundary and mark the cut.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}

fn format_price(price: f64) -> String {
    if (price - price.round()).abs() < f64::EPSILON {
        format!("{:.0}", price)
    } else {
        format!("{:.2}", price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn assembler() -> ContextAssembler {
        ContextAssembler::new(&EngineConfig::default())
    }

    fn product(title: &str, price: f64) -> KnowledgeHit {
        KnowledgeHit {
            title: title.to_string(),
            description: format!("{} description", title),
            price_marker: Some(price),
            distance: 0.1,
        }
    }

    fn document(title: &str) -> KnowledgeHit {
        KnowledgeHit {
            title: title.to_string(),
            description: "document text".to_string(),
            price_marker: Some(1.0),
            distance: 0.2,
        }
    }

    #[test]
    fn test_intent_classification() {
        let assembler = assembler();
        assert_eq!(assembler.classify_intent("show me your cv"), QueryIntent::Document);
        assert_eq!(assembler.classify_intent("Who is the founder?"), QueryIntent::Document);
        assert_eq!(assembler.classify_intent("price of USDT top-up"), QueryIntent::Product);
    }

    #[test]
    fn test_document_style_detection() {
        let assembler = assembler();
        assert!(assembler.is_document_style(&document("notes")));
        assert!(assembler.is_document_style(&product("resume.pdf", 50.0)));
        assert!(!assembler.is_document_style(&product("gift card", 25.0)));
    }

    #[test]
    fn test_profile_query_keeps_only_documents() {
        let assembler = assembler();
        let hits = vec![
            product("gift card", 25.0),
            document("cv.pdf"),
            product("top-up", 10.0),
            document("profile notes"),
        ];

        let context = assembler.assemble("show me the cv", hits);
        assert_eq!(context.intent, QueryIntent::Document);
        assert_eq!(context.candidates.len(), 2);
        for candidate in &context.candidates {
            assert!(assembler.is_document_style(candidate));
        }
    }

    #[test]
    fn test_empty_filter_falls_back_to_raw_top_k() {
        let assembler = assembler();
        let hits = vec![product("gift card", 25.0), product("top-up", 10.0)];

        // Document intent, but only products available: filtering must not
        // produce an empty context.
        let context = assembler.assemble("who is joshua", hits.clone());
        assert_eq!(context.candidates.len(), hits.len());
        assert_eq!(context.blocks.len(), hits.len());
    }

    #[test]
    fn test_candidates_capped_at_max_entries() {
        let assembler = assembler();
        let hits: Vec<KnowledgeHit> = (0..8).map(|i| product(&format!("item {}", i), 20.0)).collect();

        let context = assembler.assemble("any product", hits);
        assert_eq!(context.candidates.len(), 5);
    }

    #[test]
    fn test_description_truncated_to_budget() {
        let assembler = assembler();
        let long = "x".repeat(2000);
        let hits = vec![KnowledgeHit {
            title: "long item".to_string(),
            description: long,
            price_marker: Some(20.0),
            distance: 0.1,
        }];

        let context = assembler.assemble("long item details", hits);
        let block = &context.blocks[0];
        assert!(block.contains(&"x".repeat(800)));
        assert!(!block.contains(&"x".repeat(801)));
        assert!(block.contains("..."));
    }

    #[test]
    fn test_block_renders_price_or_na() {
        let assembler = assembler();
        let hits = vec![
            product("gift card", 25.0),
            KnowledgeHit {
                title: "unpriced".to_string(),
                description: "d".to_string(),
                price_marker: None,
                distance: 0.3,
            },
        ];

        let context = assembler.assemble("gift card", hits);
        assert!(context.blocks[0].contains("Price: $25"));
        assert!(context.blocks[1].contains("Price: N/A"));
    }

    #[test]
    fn test_fallback_summary_lists_names_and_prices() {
        let assembler = assembler();
        let candidates = vec![
            product("gift card", 25.0),
            document("guide.pdf"),
            product("top-up", 10.5),
            product("extra", 9.0),
        ];

        let summary = assembler.fallback_summary("cards", &candidates, "apology");
        assert!(summary.contains("• gift card ($25)"));
        // Document marker prices are not advertised.
        assert!(summary.contains("• guide.pdf\n"));
        assert!(summary.contains("($10.50)"));
        // Capped at fallback_max_items.
        assert!(!summary.contains("extra"));
    }

    #[test]
    fn test_fallback_summary_empty_candidates_apologizes() {
        let assembler = assembler();
        let summary = assembler.fallback_summary("anything", &[], "need more detail");
        assert_eq!(summary, "need more detail");
    }
}
