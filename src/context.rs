//! # Interview Context Index
//!
//! Backs `POST /api/v1/tools/context`: given a free-text query from the agent,
//! return the passages of the job description, template notes and resume that
//! share the most terms with it.
//!
//! ## Ranking:
//! - Documents are split into passages on blank lines (long paragraphs are
//!   further split into sentences)
//! - Query terms are lower-cased words of 3+ characters
//! - A passage scores one point per distinct query term it contains
//! - Ties keep document order; zero-score passages are never returned

use std::collections::HashSet;

pub const NO_CONTEXT: &str = "No relevant context found for this question.";

const MAX_PASSAGE_CHARS: usize = 600;

#[derive(Debug, Clone, PartialEq)]
struct Passage {
    source: &'static str,
    text: String,
    terms: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ContextIndex {
    passages: Vec<Passage>,
}

impl ContextIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document under a short label (`"job description"`, `"resume"`, ...).
    pub fn add_document(&mut self, source: &'static str, text: &str) {
        for chunk in split_passages(text) {
            let terms = terms(&chunk).into_iter().collect();
            self.passages.push(Passage {
                source,
                text: chunk,
                terms,
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// The best `limit` passages for `query`, labelled by source.
    pub fn search(&self, query: &str, limit: usize) -> Vec<String> {
        let query_terms: HashSet<String> = terms(query).into_iter().collect();
        if query_terms.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, usize)> = self
            .passages
            .iter()
            .enumerate()
            .map(|(position, passage)| (passage.terms.intersection(&query_terms).count(), position))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        scored
            .into_iter()
            .take(limit)
            .map(|(_, position)| {
                let passage = &self.passages[position];
                format!("[{}] {}", passage.source, passage.text)
            })
            .collect()
    }

    /// Search and join the hits into one tool response.
    pub fn answer(&self, query: &str, limit: usize) -> String {
        let hits = self.search(query, limit);
        if hits.is_empty() {
            NO_CONTEXT.to_string()
        } else {
            hits.join("\n\n")
        }
    }
}

fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '+' && c != '#')
        .filter(|word| word.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

fn split_passages(text: &str) -> Vec<String> {
    let mut passages = Vec::new();
    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.split_whitespace().collect::<Vec<_>>().join(" ");
        if paragraph.is_empty() {
            continue;
        }
        if paragraph.len() <= MAX_PASSAGE_CHARS {
            passages.push(paragraph);
            continue;
        }

        let mut current = String::new();
        for sentence in paragraph.split_inclusive(&['.', '!', '?'][..]) {
            if !current.is_empty() && current.len() + sentence.len() > MAX_PASSAGE_CHARS {
                passages.push(current.trim().to_string());
                current.clear();
            }
            current.push_str(sentence);
        }
        if !current.trim().is_empty() {
            passages.push(current.trim().to_string());
        }
    }
    passages
}
