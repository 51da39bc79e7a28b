// src/storage/glob.rs

//! Glob matching with the same rules Redis applies to `SCAN MATCH` / `KEYS`.
//!
//! `*` matches any run of bytes, `?` one byte, `[abc]` / `[^abc]` / `[a-z]` a class, and `\x`
//! the literal `x`.

/// Returns true when `key` matches the Redis-style glob `pattern`
pub fn glob_match(pattern: &str, key: &str) -> bool {
    matches(pattern.as_bytes(), key.as_bytes())
}

fn matches(pattern: &[u8], text: &[u8]) -> bool {
    let (mut pi, mut ti) = (0, 0);
    // Pattern position after the last `*` and the text position it is currently anchored at
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < text.len() {
        if pi < pattern.len() && pattern[pi] == b'*' {
            while pi < pattern.len() && pattern[pi] == b'*' {
                pi += 1;
            }
            if pi == pattern.len() {
                return true;
            }
            backtrack = Some((pi, ti));
            continue;
        }

        if pi < pattern.len() {
            if let Some(width) = single(&pattern[pi..], text[ti]) {
                pi += width;
                ti += 1;
                continue;
            }
        }

        match backtrack {
            Some((star_pi, star_ti)) => {
                pi = star_pi;
                ti = star_ti + 1;
                backtrack = Some((star_pi, star_ti + 1));
            }
            None => return false,
        }
    }

    while pi < pattern.len() && pattern[pi] == b'*' {
        pi += 1;
    }
    pi == pattern.len()
}

/// Matches one byte against the token at the start of `pattern`, returning the token width
fn single(pattern: &[u8], byte: u8) -> Option<usize> {
    match pattern[0] {
        b'?' => Some(1),
        b'\\' if pattern.len() > 1 => (pattern[1] == byte).then_some(2),
        b'[' => class(pattern, byte),
        literal => (literal == byte).then_some(1),
    }
}

fn class(pattern: &[u8], byte: u8) -> Option<usize> {
    let mut i = 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut hit = false;
    // An unterminated class runs to the end of the pattern
    while i < pattern.len() && pattern[i] != b']' {
        if pattern[i] == b'\\' && i + 1 < pattern.len() {
            hit |= pattern[i + 1] == byte;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == b'-' {
            let (mut lo, mut hi) = (pattern[i], pattern[i + 2]);
            if lo > hi {
                std::mem::swap(&mut lo, &mut hi);
            }
            hit |= (lo..=hi).contains(&byte);
            i += 3;
        } else {
            hit |= pattern[i] == byte;
            i += 1;
        }
    }

    let width = (i + 1).min(pattern.len());
    (hit != negate).then_some(width)
}
