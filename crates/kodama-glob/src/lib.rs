//! Glob pattern matching for kodama tree projections.
//!
//! Two layers:
//!
//! - [`glob_match`] matches a single path segment (or any string) against a
//!   shell-style pattern: `*`, `?`, `[a-z]`, `[!abc]`, `\` escapes, and
//!   `{a,b}` brace alternation.
//! - [`GlobPath`] matches whole relative paths segment by segment, with
//!   globstar (`**`) crossing directory boundaries and a partial-match mode
//!   that answers "could a descendant of this directory still match?",
//!   which is what lets a projection prune its traversal.
//!
//! Patterns without a `/` match against the final path segment at any depth
//! (`*.js` matches both `bar.js` and `subdir/baz.js`); patterns containing a
//! `/` are matched against the full relative path.

mod glob;
mod path;

pub use glob::{contains_glob, expand_braces, glob_match};
pub use path::{GlobPath, PatternError};
