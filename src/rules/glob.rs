//! Minimal glob matching for repository and branch patterns.
//!
//! The only metacharacter is `*`, which matches any sequence of non-slash
//! characters, including the empty sequence. Patterns are anchored at both
//! ends: `app-*` matches `app-acquisitions` and `app-`, but never `app`
//! (nothing for the `-` to consume) or `myapp-foo` (no prefix matching).
//! Matching is case-sensitive and there is no regex fallback.
//!
//! Because `*` refuses to cross `/`, a branch filter of `*` matches `main`
//! but not `feature/widgets`; omit the filter entirely to accept every
//! branch.

/// Matches `text` against `pattern` with anchored `*` glob semantics.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();

    let mut p = 0;
    let mut t = 0;
    // Most recent star: (pattern index after it, text index it resumes from).
    let mut star: Option<(usize, usize)> = None;

    while t < txt.len() {
        if p < pat.len() && pat[p] == '*' {
            star = Some((p + 1, t));
            p += 1;
        } else if p < pat.len() && pat[p] == txt[t] {
            p += 1;
            t += 1;
        } else if let Some((after_star, resume)) = star {
            // Widen the star by one character, unless that would swallow a slash.
            if txt[resume] == '/' {
                return false;
            }
            star = Some((after_star, resume + 1));
            p = after_star;
            t = resume + 1;
        } else {
            return false;
        }
    }

    // Only trailing stars may remain; each matches the empty sequence.
    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}
