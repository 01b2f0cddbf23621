//! Intent classification.
//!
//! Classification is a pluggable seam: the engine only needs a category
//! label for the latest human utterance. The default implementation is a
//! keyword classifier, fast enough to run on every turn.

use async_trait::async_trait;

use crate::core::errors::Result;
use crate::state::IntentCategory;

/// Produces a category label from the latest human utterance.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, utterance: &str) -> Result<IntentCategory>;
}

const ORDER_KEYWORDS: &[&str] = &[
    "order", "tracking", "delivery", "shipped", "package", "where is my",
];
const RETURN_KEYWORDS: &[&str] = &["return", "exchange", "refund", "send back", "wrong item"];
const WARRANTY_KEYWORDS: &[&str] = &[
    "warranty", "covered", "repair", "broken", "cracked", "damaged", "fix",
];
const TROUBLESHOOT_KEYWORDS: &[&str] = &[
    "not working",
    "problem",
    "issue",
    "error",
    "won't",
    "can't",
    "doesn't",
    "help me",
    "troubleshoot",
];
const ACCOUNT_KEYWORDS: &[&str] = &[
    "account",
    "profile",
    "password",
    "email",
    "address",
    "payment method",
];
const PRODUCT_KEYWORDS: &[&str] = &[
    "product",
    "compare",
    "difference",
    "which one",
    "recommend",
    "specs",
    "features",
];
const ESCALATE_KEYWORDS: &[&str] = &[
    "human",
    "agent",
    "representative",
    "speak to someone",
    "manager",
];

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| text.contains(kw))
}

/// Keyword-based classifier.
///
/// Category checks run in fixed order; the first matching table wins, so an
/// utterance mentioning both an order and a return classifies as `Order`.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn classify_text(&self, utterance: &str) -> IntentCategory {
        let text = utterance.to_lowercase();
        if contains_any(&text, ORDER_KEYWORDS) {
            IntentCategory::Order
        } else if contains_any(&text, RETURN_KEYWORDS) {
            IntentCategory::Return
        } else if contains_any(&text, WARRANTY_KEYWORDS) {
            IntentCategory::Warranty
        } else if contains_any(&text, TROUBLESHOOT_KEYWORDS) {
            IntentCategory::Troubleshoot
        } else if contains_any(&text, ACCOUNT_KEYWORDS) {
            IntentCategory::Account
        } else if contains_any(&text, PRODUCT_KEYWORDS) {
            IntentCategory::Product
        } else if contains_any(&text, ESCALATE_KEYWORDS) {
            IntentCategory::Escalate
        } else {
            IntentCategory::General
        }
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, utterance: &str) -> Result<IntentCategory> {
        Ok(self.classify_text(utterance))
    }
}
