// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! §6 External interfaces: `Evaluator` is the one entry point a caller needs — it owns the
//! `EngineCore`, the generic `graph::Graph<NodeKey>`, and (optionally) a filesystem watch, and
//! exposes `evaluate(keys, keep_going, listener)` plus the target-pattern resolver built on top of
//! it (§4.6).

use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use address::parse_sequence;
use log::{debug, info, warn};
use options::EngineOptions;
use task_executor::Executor;

use crate::core::EngineCore;
use crate::error::{EngineError, ErrorKind};
use crate::nodes::{NodeKey, NodeValue, NodeVariant, TargetAddress};

/// Whether a `BelowDirectory`/`Package` pattern's expansion keeps synthetic, non-rule-declared
/// targets (`NoFilter`) or only the targets a package file declares directly (`RulesOnly`) — a
/// stand-in distinction for the filtering the out-of-scope rule/target language would otherwise
/// define (§4.6 "a pattern's expansion is filtered after matching, not before").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PatternFilter {
    NoFilter,
    RulesOnly,
}

/// One target-pattern sequence, resolved (§4.6). Keeps the parse errors and the per-pattern
/// resolution errors separate from the final target set, per `keep_going`'s "collect everything
/// that failed, rather than stopping at the first" contract.
#[derive(Clone, Debug, Default)]
pub struct ResolvedPatterns {
    pub targets: BTreeSet<TargetAddress>,
    pub errors: Vec<String>,
}

/// The result of one `evaluate()` call: one entry per requested key, in request order.
pub struct EvalResult {
    pub results: Vec<Result<NodeValue, EngineError>>,
}

impl EvalResult {
    pub fn all_ok(&self) -> bool {
        self.results.iter().all(Result::is_ok)
    }
}

/// Observes build-wide progress (§6 "a listener observing progress"). The default `NoopListener`
/// below satisfies callers that don't care; a caller wanting structured progress reporting can
/// implement this against whatever sink it likes (e.g. `log`, or a UI).
pub trait Listener: Send + Sync {
    fn key_started(&self, _key: &NodeKey) {}
    fn key_finished(&self, _key: &NodeKey, _result: &Result<NodeValue, EngineError>) {}
}

pub struct NoopListener;

impl Listener for NoopListener {}

pub struct Evaluator {
    core: Arc<EngineCore>,
    graph: graph::Graph<NodeKey>,
    detector: Option<Arc<watch::ChangeDetector>>,
    last_view: parking_lot::Mutex<Option<watch::View>>,
}

impl Evaluator {
    /// Builds an `Evaluator` over `options`. A filesystem watch is started for each configured
    /// package root's workspace (the first root, since a watch covers one directory tree); if it
    /// can't be started, evaluation proceeds without one — every build is then treated as
    /// `EverythingModified` per §4.8's platform-unavailable fallback note.
    pub fn new(options: EngineOptions, executor: Executor) -> Result<Evaluator, String> {
        let core = Arc::new(EngineCore::new(options, executor.clone())?);
        let graph = graph::Graph::new(executor.clone());

        let detector = match core.options.package_roots.first() {
            Some(root) => match watch::ChangeDetector::new(executor, root.clone()) {
                Ok(detector) => Some(detector),
                Err(e) => {
                    warn!("could not start filesystem watch on {root:?}: {e}; every build will be treated as fully invalidated");
                    None
                }
            },
            None => None,
        };
        let last_view = parking_lot::Mutex::new(detector.as_ref().and_then(|d| d.get_current_view().ok()));

        Ok(Evaluator {
            core,
            graph,
            detector,
            last_view,
        })
    }

    pub fn core(&self) -> &Arc<EngineCore> {
        &self.core
    }

    /// Applies the diff since the last call (or `EverythingModified` if there is no watch, or this
    /// is the first call) to the graph, then bumps the `build_id` sentinel (§4.9). Called once at
    /// the top of `evaluate`.
    fn invalidate_for_new_build(&self) {
        self.core.bump_build_id();

        let Some(detector) = &self.detector else {
            self.invalidate_everything();
            return;
        };

        let mut last_view = self.last_view.lock();
        let Ok(current_view) = detector.get_current_view() else {
            self.invalidate_everything();
            return;
        };
        let diff = match *last_view {
            Some(old_view) => detector.get_diff(old_view, current_view),
            None => watch::Diff::EverythingModified,
        };
        *last_view = Some(current_view);
        drop(last_view);

        match diff {
            watch::Diff::EverythingModified => self.invalidate_everything(),
            watch::Diff::Modified(paths) => {
                if paths.is_empty() {
                    return;
                }
                let core = self.core.clone();
                let result = self.graph.invalidate_from_roots(true, move |key: &NodeKey| {
                    if !Arc::ptr_eq(key.core(), &core) {
                        return false;
                    }
                    matches!(
                        key.variant(),
                        NodeVariant::FileState(p) | NodeVariant::File(p) | NodeVariant::DirectoryListing(p)
                            if paths.contains(&p.relative.to_path_buf())
                    )
                });
                debug!(
                    "invalidated {} path-observing node(s), dirtying {} dependent(s)",
                    result.cleared, result.dirtied
                );
            }
        }
    }

    fn invalidate_everything(&self) {
        let core = self.core.clone();
        let result = self.graph.invalidate_from_roots(true, move |key: &NodeKey| {
            Arc::ptr_eq(key.core(), &core)
                && matches!(
                    key.variant(),
                    NodeVariant::FileState(_) | NodeVariant::File(_) | NodeVariant::DirectoryListing(_)
                )
        });
        info!(
            "no precise diff available: invalidated every filesystem-observing node ({} cleared, {} dirtied)",
            result.cleared, result.dirtied
        );
    }

    /// Evaluates a batch of keys (§6 "evaluate(keys, keep_going, parallelism, listener)").
    /// `parallelism` itself is not a parameter here: the executor backing `self.graph` was already
    /// built with the configured worker count, and each key's dependency sub-graph fans out onto
    /// it independently, so there is nothing further to bound per call.
    pub async fn evaluate(&self, keys: Vec<NodeKey>, listener: &dyn Listener) -> EvalResult {
        self.invalidate_for_new_build();

        let cancelled = Arc::new(AtomicBool::new(false));
        let context = self.graph.context(cancelled.clone());
        let keep_going = self.core.options.keep_going;

        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            if !keep_going && cancelled.load(std::sync::atomic::Ordering::SeqCst) {
                results.push(Err(EngineError::new(
                    ErrorKind::Cancelled,
                    "evaluation was cancelled by an earlier keep_going=false failure",
                )));
                continue;
            }
            listener.key_started(&key);
            let result = context.get(key.clone()).await;
            if result.is_err() && !keep_going {
                cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
            }
            listener.key_finished(&key, &result);
            results.push(result);
        }

        EvalResult { results }
    }

    /// Resolves a left-to-right sequence of target-pattern strings into the targets they match
    /// (§4.6). Unparseable patterns are collected into `errors` rather than aborting the sequence;
    /// a pattern that parses but fails to resolve (no such package/target) is likewise collected
    /// unless `keep_going` is `false`, in which case resolution stops at the first such failure.
    pub async fn resolve_patterns(&self, specs: &[String], filter: PatternFilter) -> ResolvedPatterns {
        self.invalidate_for_new_build();

        let (patterns, parse_errors) = parse_sequence(specs);
        let mut resolved = ResolvedPatterns {
            errors: parse_errors
                .into_iter()
                .map(|(offset, e)| format!("[{offset}] {e}"))
                .collect(),
            ..Default::default()
        };

        let cancelled = Arc::new(AtomicBool::new(false));
        let context = self.graph.context(cancelled.clone());
        let keep_going = self.core.options.keep_going;

        for pattern in patterns {
            if !keep_going && !resolved.errors.is_empty() {
                break;
            }
            let is_negative = pattern.parsed.is_negative();
            let key = NodeKey::new(self.core.clone(), NodeVariant::TargetPattern(pattern.clone()));
            match context.get(key).await {
                Ok(NodeValue::TargetPatternMatches(matches)) => {
                    if is_negative {
                        for m in matches.iter() {
                            resolved.targets.remove(m);
                        }
                    } else {
                        resolved.targets.extend(matches.iter().cloned());
                    }
                }
                Ok(_) => resolved
                    .errors
                    .push(format!("[{}] {pattern}: internal error, wrong value kind", pattern.offset)),
                Err(e) => {
                    resolved.errors.push(format!("[{}] {pattern}: {e}", pattern.offset));
                    if !keep_going {
                        break;
                    }
                }
            }
        }

        if filter == PatternFilter::RulesOnly {
            resolved.targets = filter_rules_only(&self.core, &context, resolved.targets).await;
        }

        if resolved.targets.is_empty() && resolved.errors.is_empty() && !specs.is_empty() {
            resolved
                .errors
                .push("pattern sequence matched zero targets".to_owned());
        }

        resolved
    }
}

#[cfg(test)]
mod tests {
    use std::fs as std_fs;

    use task_executor::Executor;

    use super::*;

    fn make_evaluator(root: &std::path::Path) -> Evaluator {
        let executor = Executor::new();
        let options = EngineOptions::new(vec![root.to_path_buf()]);
        Evaluator::new(options, executor).unwrap()
    }

    #[tokio::test]
    async fn resolve_patterns_finds_a_package_wildcard() {
        let tmp = tempfile::TempDir::new().unwrap();
        std_fs::create_dir(tmp.path().join("foo")).unwrap();
        std_fs::write(tmp.path().join("foo/BUILD"), b"library bar\n").unwrap();
        let evaluator = make_evaluator(tmp.path());

        let resolved = evaluator
            .resolve_patterns(&["foo:".to_owned()], PatternFilter::NoFilter)
            .await;
        assert!(resolved.errors.is_empty());
        assert_eq!(resolved.targets.len(), 1);
    }

    #[tokio::test]
    async fn resolve_patterns_collects_an_unparseable_pattern_as_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let evaluator = make_evaluator(tmp.path());

        let resolved = evaluator
            .resolve_patterns(&["not a pattern".to_owned()], PatternFilter::NoFilter)
            .await;
        assert!(resolved.targets.is_empty());
        assert_eq!(resolved.errors.len(), 1);
    }

    #[tokio::test]
    async fn resolve_patterns_reports_zero_matches_as_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        std_fs::create_dir(tmp.path().join("foo")).unwrap();
        std_fs::write(tmp.path().join("foo/BUILD"), b"# empty\n").unwrap();
        let evaluator = make_evaluator(tmp.path());

        let resolved = evaluator
            .resolve_patterns(&["foo:".to_owned()], PatternFilter::NoFilter)
            .await;
        assert!(resolved.targets.is_empty());
        assert_eq!(resolved.errors.len(), 1);
    }

    #[tokio::test]
    async fn evaluate_runs_every_requested_key_in_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        std_fs::write(tmp.path().join("a"), b"a").unwrap();
        std_fs::write(tmp.path().join("b"), b"bb").unwrap();
        let evaluator = make_evaluator(tmp.path());

        let root = fs::Root(0);
        let keys = vec![
            NodeKey::new(
                evaluator.core().clone(),
                NodeVariant::FileState(fs::RootedPath::new(root, fs::RelativePath::new("a").unwrap())),
            ),
            NodeKey::new(
                evaluator.core().clone(),
                NodeVariant::FileState(fs::RootedPath::new(root, fs::RelativePath::new("b").unwrap())),
            ),
        ];
        let result = evaluator.evaluate(keys, &NoopListener).await;
        assert!(result.all_ok());
        assert_eq!(result.results.len(), 2);
    }

    #[tokio::test]
    async fn evaluate_bumps_the_build_id_sentinel_every_call() {
        let tmp = tempfile::TempDir::new().unwrap();
        let evaluator = make_evaluator(tmp.path());

        let key = NodeKey::new(evaluator.core().clone(), NodeVariant::BuildId);
        let first = evaluator.evaluate(vec![key.clone()], &NoopListener).await;
        let second = evaluator.evaluate(vec![key], &NoopListener).await;
        let first_id = match &first.results[0] {
            Ok(NodeValue::BuildId(id)) => *id,
            other => panic!("expected a BuildId value, got {other:?}"),
        };
        let second_id = match &second.results[0] {
            Ok(NodeValue::BuildId(id)) => *id,
            other => panic!("expected a BuildId value, got {other:?}"),
        };
        assert!(second_id > first_id);
    }
}

async fn filter_rules_only(
    core: &Arc<EngineCore>,
    context: &graph::Context<NodeKey>,
    targets: BTreeSet<TargetAddress>,
) -> BTreeSet<TargetAddress> {
    let mut kept = BTreeSet::new();
    for target in targets {
        let key = NodeKey::new(core.clone(), NodeVariant::Package(target.package.clone()));
        if let Ok(NodeValue::Package(package)) = context.get(key).await {
            if package
                .targets
                .get(&target.name)
                .is_some_and(|t| t.kind != "file")
            {
                kept.insert(target);
            }
        }
    }
    kept
}
