//! Keyword query preprocessing and construction.
//!
//! Multi-token queries are OR-joined: every surviving token becomes a `Should`
//! clause, so a document matching any token is a candidate and BM25 ranks
//! documents matching more (and rarer) tokens higher. Tenant and category
//! filters are zero-scored `Must` clauses of the same query, so they restrict
//! the candidate set without shifting relevance scores.

use tantivy::query::{BooleanQuery, ConstScoreQuery, Occur, Query, TermQuery};
use tantivy::schema::IndexRecordOption;
use tantivy::tokenizer::TokenStream;
use tantivy::{Index, Term};

use stash_core::types::SearchFilter;

use crate::tantivy_utils::TextFields;

/// Minimum token length (in characters) that survives preprocessing.
pub const MIN_TOKEN_CHARS: usize = 2;

/// Strip punctuation, lower-case, split on whitespace and drop short tokens.
pub fn preprocess_query(raw: &str) -> Vec<String> {
    let stripped: String = raw.chars().filter(|c| c.is_alphanumeric() || c.is_whitespace()).collect();
    stripped
        .to_lowercase()
        .split_whitespace()
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_string)
        .collect()
}

/// Run preprocessed tokens through the field's analyzer so they match indexed terms.
///
/// Stop words disappear here; duplicates are collapsed keeping first occurrence.
pub fn analyze_tokens(index: &Index, fields: &TextFields, tokens: &[String]) -> tantivy::Result<Vec<String>> {
    let mut analyzer = index.tokenizer_for_field(fields.flat_text)?;
    let mut terms: Vec<String> = Vec::new();
    for token in tokens {
        let mut stream = analyzer.token_stream(token);
        while stream.advance() {
            let text = stream.token().text.clone();
            if !terms.contains(&text) {
                terms.push(text);
            }
        }
    }
    Ok(terms)
}

/// Build the full query, or `None` when no term survives analysis.
pub fn build_keyword_query(fields: &TextFields, terms: &[String], filter: &SearchFilter) -> Option<Box<dyn Query>> {
    if terms.is_empty() {
        return None;
    }
    let should: Vec<(Occur, Box<dyn Query>)> = terms
        .iter()
        .map(|t| {
            let q = TermQuery::new(Term::from_field_text(fields.flat_text, t), IndexRecordOption::WithFreqs);
            (Occur::Should, Box::new(q) as Box<dyn Query>)
        })
        .collect();
    let text_query: Box<dyn Query> = Box::new(BooleanQuery::new(should));
    if filter.is_empty() {
        return Some(text_query);
    }

    let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Must, text_query)];
    if let Some(tenant) = &filter.tenant_id {
        clauses.push((Occur::Must, exact_match(fields.tenant_id, tenant)));
    }
    if let Some(category) = &filter.category {
        clauses.push((Occur::Must, exact_match(fields.category, category)));
    }
    Some(Box::new(BooleanQuery::new(clauses)))
}

fn exact_match(field: tantivy::schema::Field, value: &str) -> Box<dyn Query> {
    let term_query = TermQuery::new(Term::from_field_text(field, value), IndexRecordOption::Basic);
    Box::new(ConstScoreQuery::new(Box::new(term_query), 0.0))
}
