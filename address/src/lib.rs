// Copyright 2021 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
// Enable all clippy lints except for many of the pedantic ones. It's a shame this needs to be copied and pasted across crates, but there doesn't appear to be a way to include inner attributes from a common source.
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
// It is often more clear to show that nothing is being moved.
#![allow(clippy::match_ref_pats)]
// Subjective style.
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
// Default isn't as big a deal as people seem to think it is.
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
// Arc<Mutex> can be more clear than needing to grok Orderings:
#![allow(clippy::mutex_atomic)]

//! Package identifiers and target-pattern parsing (§3 "Target-pattern key", §4.6 "Target-Pattern
//! Resolver"). This crate only covers the text-parsing half of the resolver: turning pattern
//! strings into `TargetPattern`s. Applying a pattern against real packages (expanding a package
//! or below-directory wildcard into the targets it actually matches) requires the package-lookup
//! and traversal layers, so that half lives in `engine::nodes::target_pattern`.

use std::fmt;

/// The directory (relative to some package root) that a package definition file lives in. The
/// empty string identifies the root package.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct PackageId(String);

impl PackageId {
    pub fn new(path: &str) -> PackageId {
        PackageId(path.trim_matches('/').to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "//{}", self.0)
    }
}

/// The name of one target within a package, unique only relative to that package.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TargetName(String);

impl TargetName {
    pub fn new(name: &str) -> TargetName {
        TargetName(name.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A target-pattern string, parsed (§4.6). The `Negative` variant wraps one of the other three:
/// a pattern's sign is orthogonal to what kind of thing it matches.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum ParsedPattern {
    /// An explicit single target: `pkg:name`.
    Target(PackageId, TargetName),
    /// Every target directly defined in one package: `pkg:`.
    Package(PackageId),
    /// Every target defined in a package and every package beneath it, recursively: `pkg::` /
    /// `pkg/...`.
    BelowDirectory(PackageId),
    /// A `-`-prefixed pattern (§4.6 "Exclusion patterns"): removes, rather than adds, whatever
    /// the wrapped pattern matches.
    Negative(Box<ParsedPattern>),
}

impl ParsedPattern {
    pub fn is_negative(&self) -> bool {
        matches!(self, ParsedPattern::Negative(_))
    }

    /// The pattern with any leading `Negative` wrapper stripped off.
    pub fn unsigned(&self) -> &ParsedPattern {
        match self {
            ParsedPattern::Negative(inner) => inner.unsigned(),
            other => other,
        }
    }
}

impl fmt::Display for ParsedPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParsedPattern::Target(package, target) => write!(f, "{package}:{target}"),
            ParsedPattern::Package(package) => write!(f, "{package}:"),
            ParsedPattern::BelowDirectory(package) => write!(f, "{package}::"),
            ParsedPattern::Negative(inner) => write!(f, "-{inner}"),
        }
    }
}

/// One pattern string from a pattern sequence, plus its position in that sequence (§3:
/// "Two keys with the same parsed pattern but different offsets are distinct" — necessary
/// because sequencing is order-sensitive, so the same literal pattern appearing twice must still
/// be resolved, and reported on error, as two distinct occurrences).
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TargetPattern {
    pub parsed: ParsedPattern,
    pub offset: usize,
}

impl TargetPattern {
    pub fn parse(spec: &str, offset: usize) -> Result<TargetPattern, String> {
        let parsed = parsers::target_pattern(spec)
            .map_err(|e| format!("Failed to parse target pattern `{spec}`: {e}"))?;
        Ok(TargetPattern { parsed, offset })
    }
}

impl fmt::Display for TargetPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parsed)
    }
}

/// Parses a left-to-right sequence of pattern strings (§4.6 "Sequencing"). An unparseable pattern
/// is reported in the second return value rather than aborting the rest of the sequence (§4.6
/// "keep-going"); its offset is still consumed, so every successfully-parsed pattern's offset
/// reflects its true position in `specs`.
pub fn parse_sequence<S: AsRef<str>>(specs: &[S]) -> (Vec<TargetPattern>, Vec<(usize, String)>) {
    let mut patterns = Vec::new();
    let mut errors = Vec::new();
    for (offset, spec) in specs.iter().enumerate() {
        match TargetPattern::parse(spec.as_ref(), offset) {
            Ok(pattern) => patterns.push(pattern),
            Err(e) => errors.push((offset, e)),
        }
    }
    (patterns, errors)
}

enum Suffix<'input> {
    Target(&'input str),
    Package,
    BelowDirectory,
}

fn parsed_pattern(package: &str, suffix: Suffix) -> ParsedPattern {
    let package = PackageId::new(package);
    match suffix {
        Suffix::Target(name) => ParsedPattern::Target(package, TargetName::new(name)),
        Suffix::Package => ParsedPattern::Package(package),
        Suffix::BelowDirectory => ParsedPattern::BelowDirectory(package),
    }
}

peg::parser! {
    grammar parsers() for str {
        rule slash_ellipsis() = "/" "..."
        rule colon_colon() = "::"
        rule colon_ellipsis() = ":" "..."

        // A package path stops before a bare `:` (the target/wildcard separator) and before a
        // `/...` below-directory suffix, but otherwise admits any character (including `/`, for
        // multi-component package paths).
        rule path() -> &'input str
            = s:$((!slash_ellipsis() [^':'])*) { s }

        rule target_name() -> &'input str
            = quiet!{ s:$([^':']+) { s } }
            / expected!("a non-empty target name to follow a `:`.")

        rule suffix() -> Suffix<'input>
            = colon_colon() { Suffix::BelowDirectory }
            / colon_ellipsis() { Suffix::BelowDirectory }
            / slash_ellipsis() { Suffix::BelowDirectory }
            / ":" t:target_name() { Suffix::Target(t) }
            / ":" { Suffix::Package }

        pub rule target_pattern() -> ParsedPattern
            = "-" "//"? package:path() suffix:suffix() {
                ParsedPattern::Negative(Box::new(parsed_pattern(package, suffix)))
            }
            / "//"? package:path() suffix:suffix() {
                parsed_pattern(package, suffix)
            }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(package: &str, name: &str) -> ParsedPattern {
        ParsedPattern::Target(PackageId::new(package), TargetName::new(name))
    }

    #[test]
    fn parses_explicit_target() {
        assert_eq!(
            TargetPattern::parse("//foo/bar:baz", 0).unwrap().parsed,
            target("foo/bar", "baz")
        );
        // The `//` anchor is optional.
        assert_eq!(
            TargetPattern::parse("foo/bar:baz", 0).unwrap().parsed,
            target("foo/bar", "baz")
        );
    }

    #[test]
    fn parses_package_wildcard() {
        assert_eq!(
            TargetPattern::parse("//foo/bar:", 0).unwrap().parsed,
            ParsedPattern::Package(PackageId::new("foo/bar"))
        );
    }

    #[test]
    fn parses_below_directory_wildcard_both_spellings() {
        let expected = ParsedPattern::BelowDirectory(PackageId::new("foo/bar"));
        assert_eq!(
            TargetPattern::parse("//foo/bar::", 0).unwrap().parsed,
            expected
        );
        assert_eq!(
            TargetPattern::parse("//foo/bar/...", 0).unwrap().parsed,
            expected
        );
        assert_eq!(
            TargetPattern::parse("//foo/bar:...", 0).unwrap().parsed,
            expected
        );
    }

    #[test]
    fn parses_root_below_directory_wildcard() {
        assert_eq!(
            TargetPattern::parse("//...", 0).unwrap().parsed,
            ParsedPattern::BelowDirectory(PackageId::new(""))
        );
    }

    #[test]
    fn parses_negation() {
        let pattern = TargetPattern::parse("-//broken/...", 1).unwrap();
        assert!(pattern.parsed.is_negative());
        assert_eq!(
            pattern.parsed.unsigned(),
            &ParsedPattern::BelowDirectory(PackageId::new("broken"))
        );
        assert_eq!(pattern.offset, 1);
    }

    #[test]
    fn unparseable_pattern_is_an_error_not_a_panic() {
        assert!(TargetPattern::parse("foo/bar", 0).is_err());
    }

    #[test]
    fn parse_sequence_keeps_going_past_an_unparseable_pattern() {
        let specs = vec!["//foo:", "not a pattern", "-//broken/..."];
        let (patterns, errors) = parse_sequence(&specs);
        assert_eq!(patterns.len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, 1);
        // Offsets reflect true position in the original sequence, skipping the failed one.
        assert_eq!(patterns[0].offset, 0);
        assert_eq!(patterns[1].offset, 2);
    }
}
