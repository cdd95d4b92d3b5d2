// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! §4.4 Package node: reads and parses one package-definition file into the targets it declares.
//!
//! The real rule/target language is out of scope (§1), so this parses a minimal stand-in format:
//! one target per line, `<kind> <name> [attr=value ...]`. Blank lines and `#`-prefixed comments
//! are skipped. A malformed line is reported but does not abort the rest of the file (§4.4
//! "Partial-failure policy" — parsing keeps going, and the targets that did parse are still
//! returned alongside the error as the value's `partial` payload).

use std::collections::BTreeMap;
use std::sync::Arc;

use fs::RootedPath;

use crate::core::EngineCore;
use crate::error::{EngineError, ErrorKind};
use crate::nodes::file::FileKind;
use crate::nodes::{self, NodeKey, NodeValue};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Target {
    pub name: address::TargetName,
    pub kind: String,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackageValue {
    pub id: address::PackageId,
    pub root: fs::Root,
    pub targets: BTreeMap<address::TargetName, Target>,
}

pub(crate) async fn run_node(
    core: Arc<EngineCore>,
    context: &graph::Context<NodeKey>,
    id: address::PackageId,
) -> Result<PackageValue, EngineError> {
    let lookup = nodes::get_package_lookup(context, &core, id.clone()).await?;
    let root = match lookup.as_ref() {
        crate::nodes::PackageLookupValue::Exists { root } => *root,
        crate::nodes::PackageLookupValue::NotFound => {
            return Err(EngineError::new(
                ErrorKind::PackageNotFound,
                format!("{id}: no {} found on any configured root", core.options.build_file_name),
            ));
        }
    };

    let build_file_relative = fs::RelativePath::new(&core.options.build_file_name)
        .map_err(|e| EngineError::new(ErrorKind::Internal, e))?;
    let package_dir = fs::RelativePath::new(id.as_str())
        .map_err(|e| EngineError::new(ErrorKind::Internal, e))?;
    let build_file_path = RootedPath::new(root, package_dir.join(&build_file_relative));

    let file = nodes::get_file(context, &core, build_file_path).await?;
    let FileKind::File { .. } = file.kind else {
        return Err(EngineError::new(
            ErrorKind::InconsistentFilesystem,
            format!(
                "{id}: {} disappeared between lookup and read",
                core.options.build_file_name
            ),
        ));
    };

    let vfs = core.vfs_for(file.resolved.root);
    let content = vfs
        .read_file(file.resolved.relative.as_ref())
        .await
        .map_err(|e| EngineError::io(file.resolved.relative.as_ref(), e))?;
    let text = String::from_utf8_lossy(&content);

    let (targets, errors) = parse_targets(&text);

    let value = PackageValue {
        id: id.clone(),
        root,
        targets,
    };

    if errors.is_empty() {
        Ok(value)
    } else {
        Err(EngineError::new(
            ErrorKind::PackageErrors,
            format!(
                "{id}: {} malformed target definition(s): {}",
                errors.len(),
                errors.join("; ")
            ),
        )
        .with_partial(NodeValue::Package(Arc::new(value))))
    }
}

fn parse_targets(
    text: &str,
) -> (BTreeMap<address::TargetName, Target>, Vec<String>) {
    let mut targets = BTreeMap::new();
    let mut errors = Vec::new();

    for (line_no, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_target_line(line) {
            Ok(target) => {
                if targets.contains_key(&target.name) {
                    errors.push(format!("line {}: duplicate target name `{}`", line_no + 1, target.name));
                    continue;
                }
                targets.insert(target.name.clone(), target);
            }
            Err(e) => errors.push(format!("line {}: {e}", line_no + 1)),
        }
    }

    (targets, errors)
}

fn parse_target_line(line: &str) -> Result<Target, String> {
    let mut parts = line.split_whitespace();
    let kind = parts
        .next()
        .ok_or_else(|| "expected `<kind> <name> [attr=value ...]`".to_owned())?;
    let name_str = parts
        .next()
        .ok_or_else(|| format!("target of kind `{kind}` is missing a name"))?;

    let mut attributes = BTreeMap::new();
    for attr in parts {
        let (key, value) = attr
            .split_once('=')
            .ok_or_else(|| format!("malformed attribute `{attr}`, expected `key=value`"))?;
        attributes.insert(key.to_owned(), value.to_owned());
    }

    Ok(Target {
        name: address::TargetName::new(name_str),
        kind: kind.to_owned(),
        attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_targets() {
        let (targets, errors) = parse_targets(
            "# a comment\nlibrary foo\nbinary bar main=bar.rs\n\nlibrary baz deps=foo,bar\n",
        );
        assert!(errors.is_empty());
        assert_eq!(targets.len(), 3);
        let bar = &targets[&address::TargetName::new("bar")];
        assert_eq!(bar.kind, "binary");
        assert_eq!(bar.attributes.get("main"), Some(&"bar.rs".to_owned()));
    }

    #[test]
    fn keeps_going_past_a_malformed_line() {
        let (targets, errors) = parse_targets("library\nlibrary foo\n");
        assert_eq!(targets.len(), 1);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn duplicate_target_names_are_an_error() {
        let (targets, errors) = parse_targets("library foo\nbinary foo\n");
        assert_eq!(targets.len(), 1);
        assert_eq!(errors.len(), 1);
    }
}
