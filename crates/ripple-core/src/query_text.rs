//! Heuristics over raw query text.
//!
//! Entity extraction is a keyword scan: every identifier following
//! `FROM`, `INTO`, `UPDATE` or `JOIN` names an entity. Sub-queries and
//! unusual join syntax produce false negatives; that is accepted.

use std::sync::LazyLock;

use regex::Regex;

use crate::model::QueryType;

static ENTITY_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:FROM|INTO|UPDATE|JOIN)\s+([^\s,;()]+)"#).expect("valid entity regex")
});

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_]+").expect("valid word regex"));

/// Words that may follow an entity keyword without naming an entity.
const NOT_ENTITIES: &[&str] = &[
    "select", "set", "where", "values", "value", "of", "nowait", "skip", "only", "lateral",
    "unnest", "table", "dual", "ignore", "or", "and", "on", "as", "using", "with",
];

/// Infer the statement type from the first keyword of the trimmed text.
pub fn infer_query_type(text: &str) -> QueryType {
    let mut words = WORD.find_iter(text.trim()).map(|m| m.as_str().to_uppercase());
    match words.next().as_deref() {
        Some("SELECT") => QueryType::Select,
        Some("INSERT") => QueryType::Insert,
        Some("UPDATE") => QueryType::Update,
        Some("DELETE") => QueryType::Delete,
        Some("BATCH") => QueryType::Batch,
        Some("BEGIN") => {
            // CQL: BEGIN [UNLOGGED | COUNTER] BATCH
            let next: Vec<String> = words.take(2).collect();
            if next.iter().any(|w| w == "BATCH") {
                QueryType::Batch
            } else {
                QueryType::Unknown
            }
        }
        _ => QueryType::Unknown,
    }
}

/// Distinct entity names referenced by the query, in order of appearance.
///
/// Names are lower-cased and stripped of identifier quoting, so
/// `"Users"`, `` `users` `` and `[users]` all yield `users`.
pub fn extract_entities(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in ENTITY_REF.captures_iter(text) {
        let Some(name) = clean_identifier(&caps[1]) else {
            continue;
        };
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

fn clean_identifier(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '"' | '`' | '[' | ']' | '\''))
        .collect::<String>()
        .trim_matches('.')
        .to_lowercase();
    if cleaned.is_empty() || cleaned.starts_with('?') || cleaned.starts_with('$') {
        return None;
    }
    if !cleaned.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_') {
        return None;
    }
    if NOT_ENTITIES.contains(&cleaned.as_str()) {
        return None;
    }
    Some(cleaned)
}

/// A rough structural complexity score: one, plus joins, nested selects
/// and boolean connectives.
pub fn complexity(text: &str) -> u32 {
    let mut joins = 0u32;
    let mut selects = 0u32;
    let mut connectives = 0u32;
    for word in WORD.find_iter(text) {
        match word.as_str().to_uppercase().as_str() {
            "JOIN" => joins += 1,
            "SELECT" => selects += 1,
            "AND" | "OR" => connectives += 1,
            _ => {}
        }
    }
    let nested = selects.saturating_sub(u32::from(infer_query_type(text) == QueryType::Select));
    1 + joins + nested + connectives
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_query_type() {
        assert_eq!(infer_query_type("  select * from t"), QueryType::Select);
        assert_eq!(infer_query_type("INSERT INTO t VALUES (1)"), QueryType::Insert);
        assert_eq!(infer_query_type("Update t set a = 1"), QueryType::Update);
        assert_eq!(infer_query_type("DELETE FROM t"), QueryType::Delete);
        assert_eq!(infer_query_type("BEGIN UNLOGGED BATCH INSERT ..."), QueryType::Batch);
        assert_eq!(infer_query_type("WITH x AS (SELECT 1) SELECT * FROM x"), QueryType::Unknown);
        assert_eq!(infer_query_type(""), QueryType::Unknown);
    }

    #[test]
    fn test_extract_simple() {
        assert_eq!(extract_entities("SELECT * FROM users WHERE id=?"), vec!["users"]);
        assert_eq!(extract_entities("INSERT INTO orders(user_id) VALUES(?)"), vec!["orders"]);
        assert_eq!(extract_entities("update Accounts set x = 1"), vec!["accounts"]);
    }

    #[test]
    fn test_extract_joins_and_dedup() {
        let q = "SELECT * FROM users u JOIN orders o ON o.uid = u.id \
                 LEFT JOIN \"Users\" x ON 1=1 JOIN shop.items i ON 1=1";
        assert_eq!(extract_entities(q), vec!["users", "orders", "shop.items"]);
    }

    #[test]
    fn test_extract_skips_subqueries_and_keywords() {
        assert!(extract_entities("SELECT * FROM (SELECT 1) t").is_empty());
        assert_eq!(
            extract_entities("SELECT * FROM jobs FOR UPDATE SKIP LOCKED"),
            vec!["jobs"]
        );
        assert_eq!(
            extract_entities("INSERT INTO t (a) VALUES (1) ON CONFLICT DO UPDATE SET a = 2"),
            vec!["t"]
        );
    }

    #[test]
    fn test_complexity() {
        assert_eq!(complexity("SELECT * FROM t"), 1);
        assert_eq!(
            complexity("SELECT * FROM a JOIN b ON a.id = b.id WHERE a.x = 1 AND b.y = 2"),
            3
        );
        assert_eq!(
            complexity("DELETE FROM a WHERE id IN (SELECT id FROM b)"),
            2
        );
    }
}
