// SPDX-License-Identifier: GPL-3.0-only

//! Comma-delimited mount option helpers

/// Split on `,`, trimming tokens and dropping empty ones.
pub fn split_options(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

pub fn join_options(tokens: &[String]) -> String {
    tokens.join(",")
}

pub fn has_prefixed(tokens: &[String], prefix: &str) -> bool {
    tokens.iter().any(|t| t.starts_with(prefix))
}

/// Append `prefix + value` unless some token already carries `prefix`.
pub fn set_prefixed_if_absent(mut tokens: Vec<String>, prefix: &str, value: &str) -> Vec<String> {
    if !has_prefixed(&tokens, prefix) {
        tokens.push(format!("{prefix}{value}"));
    }
    tokens
}
