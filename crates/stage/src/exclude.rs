//! Exclusion patterns over the staged tree.

/// A slash-separated path pattern. `*` matches any run of characters and `?`
/// one character, both within a single segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    segments: Vec<String>,
}
impl Pattern {
    /// `None` for a pattern with no segments.
    pub fn new(raw: &str) -> Option<Self> {
        let segments: Vec<String> =
            raw.trim().split('/').filter(|s| !s.is_empty()).map(str::to_string).collect();
        if segments.is_empty() {
            return None;
        }
        Some(Self { raw: raw.trim().to_string(), segments })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when `path` or one of its ancestor directories matches, so a
    /// matching directory takes everything beneath it along.
    pub fn covers(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        parts.len() >= self.segments.len()
            && self.segments.iter().zip(&parts).all(|(pattern, part)| segment_matches(pattern, part))
    }
}

/// Artifacts that never belong in a snapshot: this tool's own cache and
/// plugin, other static exporters' output and plugins, and translation
/// sources.
pub fn forced(content_dir: &str) -> Vec<Pattern> {
    [
        "stillpress-cache",
        "uploads/wp2static-*",
        "plugins/stillpress",
        "plugins/wp2static",
        "plugins/wp2static-addon-*",
        "languages",
    ]
    .iter()
    .filter_map(|p| Pattern::new(&format!("{content_dir}/{p}")))
    .collect()
}

fn segment_matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    // Position of the last `*` and the text index it is currently absorbing up to.
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, absorbed)) = backtrack {
            p = star + 1;
            t = absorbed + 1;
            backtrack = Some((star, absorbed + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}
