//! Selector-driven data extraction
//!
//! Opt-in rules mapping a label to a CSS selector plus an extraction mode
//! (text, attribute, existence, multiple, nested fields). Rules that fail
//! to match simply produce no entry; selector syntax is checked when the
//! rules are compiled.

use crate::ConfigError;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One extraction rule, as configured
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionRule {
    pub selector: String,

    /// Read this attribute instead of the element text
    #[serde(default)]
    pub attribute: Option<String>,

    /// Yield a boolean for whether the selector matches
    #[serde(default)]
    pub exists: bool,

    /// Yield every match instead of the first
    #[serde(default)]
    pub multiple: bool,

    /// Nested rules evaluated inside each matched element
    #[serde(default)]
    pub fields: Option<HashMap<String, ExtractionRule>>,
}

/// A value produced by data extraction
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExtractedValue {
    Flag(bool),
    Text(String),
    List(Vec<ExtractedValue>),
    Map(HashMap<String, ExtractedValue>),
}

struct CompiledRule {
    selector: Selector,
    attribute: Option<String>,
    exists: bool,
    multiple: bool,
    fields: Option<HashMap<String, CompiledRule>>,
}

/// Compiled rule set, reusable across pages
pub struct DataExtractor {
    rules: HashMap<String, CompiledRule>,
}

impl DataExtractor {
    pub fn new(rules: &HashMap<String, ExtractionRule>) -> Result<Self, ConfigError> {
        Ok(Self {
            rules: compile_rules(rules)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Applies the rules to a document, producing the labeled mapping
    pub fn extract(&self, document: &Html) -> HashMap<String, ExtractedValue> {
        let mut out = HashMap::new();
        for (label, rule) in &self.rules {
            let matches: Vec<ElementRef> = document.select(&rule.selector).collect();
            if let Some(value) = evaluate(rule, &matches) {
                out.insert(label.clone(), value);
            }
        }
        out
    }
}

fn compile_rules(
    rules: &HashMap<String, ExtractionRule>,
) -> Result<HashMap<String, CompiledRule>, ConfigError> {
    rules
        .iter()
        .map(|(label, rule)| Ok((label.clone(), compile_rule(label, rule)?)))
        .collect()
}

fn compile_rule(label: &str, rule: &ExtractionRule) -> Result<CompiledRule, ConfigError> {
    let selector = Selector::parse(&rule.selector).map_err(|e| {
        ConfigError::Validation(format!(
            "bad selector for extraction rule {}: {:?}",
            label, e
        ))
    })?;
    let fields = rule
        .fields
        .as_ref()
        .map(|fields| compile_rules(fields))
        .transpose()?;
    Ok(CompiledRule {
        selector,
        attribute: rule.attribute.clone(),
        exists: rule.exists,
        multiple: rule.multiple,
        fields,
    })
}

fn evaluate(rule: &CompiledRule, matches: &[ElementRef]) -> Option<ExtractedValue> {
    if rule.exists {
        return Some(ExtractedValue::Flag(!matches.is_empty()));
    }

    if let Some(fields) = &rule.fields {
        let maps: Vec<ExtractedValue> = matches
            .iter()
            .map(|element| ExtractedValue::Map(evaluate_fields(fields, *element)))
            .collect();
        return if rule.multiple {
            Some(ExtractedValue::List(maps))
        } else {
            maps.into_iter().next()
        };
    }

    if rule.multiple {
        let values = matches
            .iter()
            .filter_map(|element| single_value(rule, *element))
            .map(ExtractedValue::Text)
            .collect();
        return Some(ExtractedValue::List(values));
    }

    matches
        .first()
        .and_then(|element| single_value(rule, *element))
        .map(ExtractedValue::Text)
}

fn evaluate_fields(
    fields: &HashMap<String, CompiledRule>,
    scope: ElementRef,
) -> HashMap<String, ExtractedValue> {
    let mut out = HashMap::new();
    for (label, rule) in fields {
        let matches: Vec<ElementRef> = scope.select(&rule.selector).collect();
        if let Some(value) = evaluate(rule, &matches) {
            out.insert(label.clone(), value);
        }
    }
    out
}

fn single_value(rule: &CompiledRule, element: ElementRef) -> Option<String> {
    match &rule.attribute {
        Some(attr) => element.value().attr(attr).map(str::to_string),
        None => {
            let text = element
                .text()
                .collect::<Vec<_>>()
                .join(" ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            Some(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules_from_json(json: &str) -> DataExtractor {
        let rules: HashMap<String, ExtractionRule> = serde_json::from_str(json).unwrap();
        DataExtractor::new(&rules).unwrap()
    }

    fn sample_doc() -> Html {
        Html::parse_document(
            r#"<html><body>
            <h1 class="headline">Big News</h1>
            <div class="author" data-id="42">Jo Writer</div>
            <ul class="tags">
                <li>rust</li>
                <li>crawler</li>
            </ul>
            <div class="card">
                <span class="name">First</span>
                <span class="price">10</span>
            </div>
            <div class="card">
                <span class="name">Second</span>
                <span class="price">20</span>
            </div>
        </body></html>"#,
        )
    }

    #[test]
    fn test_text_extraction() {
        let extractor = rules_from_json(r#"{"headline": {"selector": "h1.headline"}}"#);
        let out = extractor.extract(&sample_doc());
        assert_eq!(
            out.get("headline"),
            Some(&ExtractedValue::Text("Big News".to_string()))
        );
    }

    #[test]
    fn test_attribute_extraction() {
        let extractor = rules_from_json(
            r#"{"author_id": {"selector": ".author", "attribute": "data-id"}}"#,
        );
        let out = extractor.extract(&sample_doc());
        assert_eq!(
            out.get("author_id"),
            Some(&ExtractedValue::Text("42".to_string()))
        );
    }

    #[test]
    fn test_exists_extraction() {
        let extractor = rules_from_json(
            r#"{
                "has_author": {"selector": ".author", "exists": true},
                "has_video": {"selector": "video", "exists": true}
            }"#,
        );
        let out = extractor.extract(&sample_doc());
        assert_eq!(out.get("has_author"), Some(&ExtractedValue::Flag(true)));
        assert_eq!(out.get("has_video"), Some(&ExtractedValue::Flag(false)));
    }

    #[test]
    fn test_multiple_extraction() {
        let extractor =
            rules_from_json(r#"{"tags": {"selector": ".tags li", "multiple": true}}"#);
        let out = extractor.extract(&sample_doc());
        assert_eq!(
            out.get("tags"),
            Some(&ExtractedValue::List(vec![
                ExtractedValue::Text("rust".to_string()),
                ExtractedValue::Text("crawler".to_string()),
            ]))
        );
    }

    #[test]
    fn test_nested_fields() {
        let extractor = rules_from_json(
            r#"{
                "cards": {
                    "selector": ".card",
                    "multiple": true,
                    "fields": {
                        "name": {"selector": ".name"},
                        "price": {"selector": ".price"}
                    }
                }
            }"#,
        );
        let out = extractor.extract(&sample_doc());
        let Some(ExtractedValue::List(cards)) = out.get("cards") else {
            panic!("expected list of cards");
        };
        assert_eq!(cards.len(), 2);
        let ExtractedValue::Map(first) = &cards[0] else {
            panic!("expected map");
        };
        assert_eq!(
            first.get("name"),
            Some(&ExtractedValue::Text("First".to_string()))
        );
        assert_eq!(
            first.get("price"),
            Some(&ExtractedValue::Text("10".to_string()))
        );
    }

    #[test]
    fn test_no_match_produces_no_entry() {
        let extractor = rules_from_json(r#"{"missing": {"selector": ".nope"}}"#);
        let out = extractor.extract(&sample_doc());
        assert!(!out.contains_key("missing"));
    }

    #[test]
    fn test_bad_selector_rejected_at_compile() {
        let rules: HashMap<String, ExtractionRule> =
            serde_json::from_str(r#"{"bad": {"selector": "[[["}}"#).unwrap();
        assert!(DataExtractor::new(&rules).is_err());
    }
}
