//! Path-aware glob matching over normalized relative paths.
//!
//! Tree paths are `/`-separated strings with no leading or trailing
//! separator, so matching works on string segments directly. `**` matches
//! zero or more whole segments. A pattern with no `/` at all is a basename
//! pattern: it matches the final segment at any depth, the way ignore files
//! treat bare patterns.

use thiserror::Error;

use crate::glob::{contains_glob, glob_match};

/// Errors when parsing glob patterns.
#[derive(Debug, Clone, Error)]
pub enum PatternError {
    #[error("empty pattern")]
    Empty,
}

/// One segment of a compiled path pattern.
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    /// Exact segment name: `src`, `index.js`.
    Literal(String),
    /// Single segment with wildcards: `*.js`, `v?`.
    Wild(String),
    /// `**`: zero or more whole segments.
    Globstar,
}

/// A compiled path pattern.
///
/// # Examples
/// ```
/// use kodama_glob::GlobPath;
///
/// let pat = GlobPath::new("src/**/*.js").unwrap();
/// assert!(pat.matches("src/app.js"));
/// assert!(pat.matches("src/lib/deep/util.js"));
/// assert!(!pat.matches("test/app.js"));
///
/// // Bare patterns match the basename at any depth.
/// let pat = GlobPath::new("*.js").unwrap();
/// assert!(pat.matches("app.js"));
/// assert!(pat.matches("subdir/baz.js"));
/// ```
#[derive(Debug, Clone)]
pub struct GlobPath {
    segments: Vec<Segment>,
    basename: bool,
}

impl GlobPath {
    /// Compile a pattern. Leading and trailing separators are ignored;
    /// consecutive globstars collapse to one.
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        let basename = !pattern.contains('/');
        let mut segments = Vec::new();
        for part in pattern.split('/') {
            if part.is_empty() {
                continue;
            }
            if part == "**" {
                if !matches!(segments.last(), Some(Segment::Globstar)) {
                    segments.push(Segment::Globstar);
                }
            } else if contains_glob(part) {
                segments.push(Segment::Wild(part.to_string()));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        Ok(Self { segments, basename })
    }

    /// Check a full relative path against this pattern.
    pub fn matches(&self, path: &str) -> bool {
        if self.basename {
            let name = path.rsplit('/').next().unwrap_or(path);
            return self.segment_matches(&self.segments[0], name);
        }
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        self.match_from(0, &parts, 0, false)
    }

    /// Could a descendant of the directory at `path` still match?
    ///
    /// Used to decide whether to descend into a directory whose own path
    /// does not match. Basename patterns can match at any depth, so they
    /// always answer true.
    pub fn matches_partial(&self, path: &str) -> bool {
        if self.basename {
            return true;
        }
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        self.match_from(0, &parts, 0, true)
    }

    fn segment_matches(&self, segment: &Segment, part: &str) -> bool {
        match segment {
            Segment::Literal(lit) => lit == part,
            Segment::Wild(pat) => glob_match(pat, part),
            Segment::Globstar => true,
        }
    }

    /// Segment walk with globstar backtracking. In partial mode, running out
    /// of path components while pattern remains is a success: deeper entries
    /// may still complete the match.
    fn match_from(&self, si: usize, parts: &[&str], pi: usize, partial: bool) -> bool {
        if si == self.segments.len() {
            // Trailing globstar consumed everything; otherwise the path must
            // be fully consumed too.
            return pi == parts.len();
        }
        if pi == parts.len() {
            // Path exhausted. A bare trailing globstar matches zero segments.
            if partial {
                return true;
            }
            return self.segments[si..].iter().all(|s| *s == Segment::Globstar);
        }

        match &self.segments[si] {
            Segment::Globstar => {
                // Swallow zero or more components.
                (pi..=parts.len()).any(|cut| self.match_from(si + 1, parts, cut, partial))
            }
            seg => {
                self.segment_matches(seg, parts[pi]) && self.match_from(si + 1, parts, pi + 1, partial)
            }
        }
    }
}
