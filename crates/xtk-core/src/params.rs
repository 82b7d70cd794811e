//! Pure helpers for query-parameter extraction and rewriting. None of these
//! panic on malformed input; unparsable URLs are reported as `None` and left
//! to the caller to skip.

use url::form_urlencoded;
use url::Url;

use crate::{SCK_PARAM, UTM_SOURCE_PARAM};

/// Parses a possibly-invalid URL string without panicking.
pub fn safe_parse(input: &str) -> Option<Url> {
    Url::parse(input).ok()
}

/// Decoded query pairs of `url` in document order, duplicates included.
pub fn query_pairs(url: &Url) -> Vec<(String, String)> {
    url.query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

/// Replaces the value of the first occurrence of `key` in place, dropping
/// any later duplicates; appends when the key is absent.
pub fn upsert(pairs: &mut Vec<(String, String)>, key: &str, value: &str) {
    let mut found = false;
    pairs.retain_mut(|(existing, slot)| {
        if existing.as_str() != key {
            return true;
        }
        if found {
            return false;
        }
        found = true;
        *slot = value.to_string();
        true
    });
    if !found {
        pairs.push((key.to_string(), value.to_string()));
    }
}

/// Collapses duplicate keys: first occurrence keeps its position, the last
/// value wins.
pub fn dedup_pairs(pairs: &[(String, String)]) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::with_capacity(pairs.len());
    for (key, value) in pairs {
        upsert(&mut out, key, value);
    }
    out
}

/// Value for `key`, last occurrence winning, or `None` when absent.
pub fn lookup<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .rev()
        .find(|(existing, _)| existing == key)
        .map(|(_, value)| value.as_str())
}

/// `application/x-www-form-urlencoded` serialization of `pairs`.
pub fn encode_query(pairs: &[(String, String)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter().map(|(key, value)| (key.as_str(), value.as_str())))
        .finish()
}

/// Sets `key=value` on the query string only, preserving every other
/// parameter and the fragment.
pub fn set_query_param(url: &mut Url, key: &str, value: &str) {
    let mut pairs = query_pairs(url);
    upsert(&mut pairs, key, value);
    apply_query(url, &pairs);
}

/// Writes both lead-carrying parameters with the same value.
pub fn set_lead_params(url: &mut Url, lead_id: &str) {
    let mut pairs = query_pairs(url);
    upsert(&mut pairs, UTM_SOURCE_PARAM, lead_id);
    upsert(&mut pairs, SCK_PARAM, lead_id);
    apply_query(url, &pairs);
}

/// Rebuilds `destination`'s query as `base` pairs overridden and extended by
/// the destination's own pairs (destination wins); everything else about the
/// destination, fragment included, is preserved.
pub fn merge_into_url(destination: &Url, base: &[(String, String)]) -> Url {
    let mut pairs = dedup_pairs(base);
    for (key, value) in destination.query_pairs() {
        upsert(&mut pairs, &key, &value);
    }
    let mut merged = destination.clone();
    apply_query(&mut merged, &pairs);
    merged
}

fn apply_query(url: &mut Url, pairs: &[(String, String)]) {
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.set_query(Some(&encode_query(pairs)));
    }
}
