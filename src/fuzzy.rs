//! Fuzzy symbol scoring for `/find-type` and `/find-member`.
//!
//! A fixed ladder of match tiers, first hit wins per candidate: exact
//! (case-insensitive) > prefix-stripped exact > prefix tiers > substring
//! tiers > CamelCase word matching > Levenshtein similarity. Scores are
//! comparable across candidates, so callers sort descending and truncate.

// ---------------------------------------------------------------------------
// Prefix stripping
// ---------------------------------------------------------------------------

/// Naming-convention prefixes: U (object), A (actor), F (struct), E (enum),
/// S (widget).
const TYPE_PREFIXES: [char; 5] = ['U', 'A', 'F', 'E', 'S'];

/// Remove at most one conventional leading prefix letter.
pub fn strip_prefix(name: &str) -> &str {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if TYPE_PREFIXES.contains(&c) => chars.as_str(),
        _ => name,
    }
}

/// Alternative spellings of a name under the prefix convention: same tail,
/// each other prefix letter. Used by exact lookup as a fallback.
pub fn prefix_alternatives(name: &str) -> Vec<String> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Vec::new();
    };
    if !TYPE_PREFIXES.contains(&first) {
        return Vec::new();
    }
    let tail = chars.as_str();
    TYPE_PREFIXES
        .iter()
        .filter(|p| **p != first)
        .map(|p| format!("{p}{tail}"))
        .collect()
}

// ---------------------------------------------------------------------------
// Scoring ladder
// ---------------------------------------------------------------------------

/// Score a candidate against a query. 0.0 means no match.
pub fn fuzzy_score(query: &str, candidate: &str) -> f64 {
    let q = query.to_lowercase();
    let c = candidate.to_lowercase();
    let q_stripped = strip_prefix(query).to_lowercase();
    let c_stripped = strip_prefix(candidate).to_lowercase();

    if c == q {
        return 1.0;
    }
    if c_stripped == q || c == q_stripped {
        return 0.98;
    }
    if c.starts_with(&q) {
        return 0.95;
    }
    if c_stripped.starts_with(&q) {
        return 0.93;
    }
    if c_stripped.starts_with(&q_stripped) {
        return 0.92;
    }

    if let Some(pos) = c.find(&q) {
        return 0.85 - 0.15 * (pos as f64 / c.len().max(1) as f64);
    }
    if let Some(pos) = c_stripped.find(&q) {
        return 0.80 - 0.15 * (pos as f64 / c_stripped.len().max(1) as f64);
    }
    if let Some(pos) = c_stripped.find(&q_stripped) {
        return 0.75 - 0.15 * (pos as f64 / c_stripped.len().max(1) as f64);
    }

    let word_score = camel_word_score(query, candidate);
    if word_score > 0.3 {
        return word_score;
    }

    let distance = levenshtein(&q, &c);
    let max_len = q.chars().count().max(c.chars().count()).max(1);
    let similarity = 1.0 - distance as f64 / max_len as f64;
    let threshold = if q.chars().count() < 5 { 0.25 } else { 0.35 };
    if similarity >= threshold {
        return similarity * 0.5;
    }

    0.0
}

// ---------------------------------------------------------------------------
// CamelCase word matching
// ---------------------------------------------------------------------------

/// Split an identifier on CamelCase boundaries, underscores, and digits.
pub fn split_camel_words(ident: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    let mut word = String::new();
    let chars: Vec<char> = ident.chars().collect();
    for (i, &ch) in chars.iter().enumerate() {
        if ch == '_' || ch == '-' || ch == ' ' {
            if !word.is_empty() {
                words.push(std::mem::take(&mut word));
            }
            continue;
        }
        if i > 0 && ch.is_uppercase() {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || (prev.is_uppercase() && next_lower) {
                if !word.is_empty() {
                    words.push(std::mem::take(&mut word));
                }
            }
        }
        word.push(ch);
    }
    if !word.is_empty() {
        words.push(word);
    }
    words
}

/// Word-level match: each query word scores 0.6 when some candidate word
/// starts with it, 0.4 when merely contained, averaged over the query words.
fn camel_word_score(query: &str, candidate: &str) -> f64 {
    let query_words: Vec<String> =
        split_camel_words(query).iter().map(|w| w.to_lowercase()).collect();
    if query_words.is_empty() {
        return 0.0;
    }
    let candidate_words: Vec<String> =
        split_camel_words(candidate).iter().map(|w| w.to_lowercase()).collect();

    let mut total = 0.0;
    for qw in &query_words {
        if candidate_words.iter().any(|cw| cw.starts_with(qw.as_str())) {
            total += 0.6;
        } else if candidate_words.iter().any(|cw| cw.contains(qw.as_str())) {
            total += 0.4;
        }
    }
    total / query_words.len() as f64
}

// ---------------------------------------------------------------------------
// Levenshtein
// ---------------------------------------------------------------------------

pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr: Vec<usize> = vec![0; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Score every candidate name, drop non-matches, sort descending, truncate.
pub fn rank_candidates<'a, I>(query: &str, candidates: I, max_results: usize) -> Vec<(String, f64)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut scored: Vec<(String, f64)> = candidates
        .into_iter()
        .filter_map(|name| {
            let score = fuzzy_score(query, name);
            if score > 0.0 {
                Some((name.to_string(), score))
            } else {
                None
            }
        })
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(max_results);
    scored
}
