use std::collections::BTreeMap;

use serde_json::{Map, Value};

pub const TITLE_WEIGHT: i64 = 3;
pub const TAG_WEIGHT: i64 = 3;
pub const DESCRIPTION_WEIGHT: i64 = 2;
pub const CATEGORY_WEIGHT: i64 = 2;
pub const BODY_WEIGHT: i64 = 1;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it",
    "its", "of", "on", "or", "that", "the", "this", "to", "was", "were", "will", "with",
];

/// Fields that feed a document's search index.
#[derive(Debug, Default, Clone, Copy)]
pub struct IndexSource<'a> {
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub category: Option<&'a str>,
    pub tags: &'a [String],
    pub original_content: &'a str,
    pub converted_content: Option<&'a str>,
}

pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| token.chars().count() >= 2)
        .map(|token| token.to_lowercase())
        .filter(|token| !STOP_WORDS.contains(&token.as_str()))
        .collect()
}

/// Term map where every occurrence adds its field weight.
pub fn build_index(source: &IndexSource<'_>) -> BTreeMap<String, i64> {
    let mut terms: BTreeMap<String, i64> = BTreeMap::new();
    let mut add = |text: &str, weight: i64| {
        for token in tokenize(text) {
            *terms.entry(token).or_insert(0) += weight;
        }
    };

    add(source.title, TITLE_WEIGHT);
    for tag in source.tags {
        add(tag, TAG_WEIGHT);
    }
    if let Some(description) = source.description {
        add(description, DESCRIPTION_WEIGHT);
    }
    if let Some(category) = source.category {
        add(category, CATEGORY_WEIGHT);
    }
    add(source.original_content, BODY_WEIGHT);
    if let Some(converted) = source.converted_content {
        add(converted, BODY_WEIGHT);
    }
    terms
}

pub fn index_value(source: &IndexSource<'_>) -> Value {
    let map: Map<String, Value> = build_index(source)
        .into_iter()
        .map(|(term, weight)| (term, Value::from(weight)))
        .collect();
    Value::Object(map)
}

/// Sum of stored weights for every query term.
pub fn score(index: &Value, query: &str) -> i64 {
    let Some(map) = index.as_object() else {
        return 0;
    };
    tokenize(query)
        .iter()
        .filter_map(|term| map.get(term).and_then(Value::as_i64))
        .sum()
}
