//! Semantic Auto-Merger: syntactic eligibility check plus LLM-mediated
//! conflict resolution (spec.md §4.5).
//!
//! JSON-envelope extraction is grounded on the teacher's
//! `services::extract_json_from_response` helper (outermost `{…}` in model
//! output, tolerant of markdown code fences).

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::merge::MergeOutcome;
use crate::domain::ports::{GitRunner, RunnerFactory};

/// Parsed JSON envelope a resolver agent is expected to emit
/// (spec.md §6): `{"merged_files": {"<path>": "<content>"}, "reasoning": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeEnvelope {
    pub merged_files: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub reasoning: String,
}

/// Extracts file paths touched by a unified diff, reading `diff --git a/…
/// b/…` headers.
pub fn extract_files(diff: &str) -> HashSet<String> {
    diff.lines()
        .filter_map(|line| line.strip_prefix("diff --git a/"))
        .filter_map(|rest| rest.split(" b/").next())
        .map(str::to_string)
        .collect()
}

/// Extracts function names touched by a unified diff, reading hunk headers
/// and `+`/`-` lines that look like function definitions. Intentionally
/// conservative and syntactic, per spec.md §4.5 — used only as a hint.
pub fn extract_functions(diff: &str) -> HashSet<String> {
    let mut functions = HashSet::new();
    for line in diff.lines() {
        let body = if let Some(rest) = line.strip_prefix("@@") {
            rest.rsplit_once("@@").map_or(rest, |(_, after)| after)
        } else if let Some(rest) = line.strip_prefix('+') {
            rest
        } else if let Some(rest) = line.strip_prefix('-') {
            rest
        } else {
            continue;
        };
        if let Some(name) = function_name_in(body) {
            functions.insert(name);
        }
    }
    functions
}

fn function_name_in(text: &str) -> Option<String> {
    let text = text.trim();
    let after_fn = text
        .find("fn ")
        .map(|idx| &text[idx + 3..])
        .or_else(|| text.find("function ").map(|idx| &text[idx + 9..]))
        .or_else(|| text.find("def ").map(|idx| &text[idx + 4..]))?;
    let name: String = after_fn
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// `{…}` extraction tolerant of markdown fences, grounded in the teacher's
/// `extract_json_from_response`.
pub fn extract_json_envelope(response: &str) -> &str {
    let trimmed = response.trim();
    if let Some(stripped) = trimmed.strip_prefix("```json") {
        if let Some(end) = stripped.rfind("```") {
            return stripped[..end].trim();
        }
    }
    if let Some(stripped) = trimmed.strip_prefix("```") {
        if let Some(end) = stripped.rfind("```") {
            return stripped[..end].trim();
        }
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            return &trimmed[start..=end];
        }
    }
    trimmed
}

/// Eligibility and resolution duties of the Semantic Auto-Merger.
pub struct SemanticAutoMerger {
    runner_factory: Arc<dyn RunnerFactory>,
    git: Arc<dyn GitRunner>,
    validate_command: Option<Vec<String>>,
}

impl SemanticAutoMerger {
    pub fn new(
        runner_factory: Arc<dyn RunnerFactory>,
        git: Arc<dyn GitRunner>,
        validate_command: Option<Vec<String>>,
    ) -> Self {
        Self {
            runner_factory,
            git,
            validate_command,
        }
    }

    /// True iff the two diffs' file-path sets are disjoint OR their
    /// function-name sets are disjoint (spec.md §4.5). Symmetric by
    /// construction.
    pub fn can_auto_merge(diff_a: &str, diff_b: &str) -> bool {
        let files_a = extract_files(diff_a);
        let files_b = extract_files(diff_b);
        if files_a.is_disjoint(&files_b) {
            return true;
        }
        let functions_a = extract_functions(diff_a);
        let functions_b = extract_functions(diff_b);
        functions_a.is_disjoint(&functions_b)
    }

    /// Builds a merge prompt from both diffs and the conflict file list,
    /// runs an agent, parses its JSON envelope, writes the merged files,
    /// then validates the project still builds and its tests pass before
    /// committing. Any validation failure resets and checks out to discard
    /// the merge, signalling `NeedsHuman` via `Ok(MergeOutcome::failed)`.
    pub async fn resolve(
        &self,
        workdir: &str,
        conflict_files: &[String],
        diff_ours: &str,
        diff_theirs: &str,
    ) -> OrchestratorResult<MergeOutcome> {
        let prompt = build_merge_prompt(conflict_files, diff_ours, diff_theirs);

        let runner = self.runner_factory.new_runner().await.map_err(OrchestratorError::from)?;
        runner.start(&prompt, workdir).await.map_err(OrchestratorError::from)?;
        let result = runner.wait().await.map_err(OrchestratorError::from)?;

        let envelope_text = extract_json_envelope(&result.output);
        let envelope: MergeEnvelope = match serde_json::from_str(envelope_text) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.discard(workdir).await;
                return Ok(MergeOutcome::failed(format!(
                    "failed to parse merge envelope: {err}"
                )));
            }
        };

        for (path, content) in &envelope.merged_files {
            let full_path = std::path::Path::new(workdir).join(path);
            if let Err(err) = tokio::fs::write(&full_path, content).await {
                self.discard(workdir).await;
                return Ok(MergeOutcome::failed(format!(
                    "failed to write merged file {path}: {err}"
                )));
            }
        }

        if !self.validate(workdir).await {
            self.discard(workdir).await;
            return Ok(MergeOutcome {
                success: false,
                reason: Some("NeedsHuman: semantic merge failed validation".into()),
                conflict_files: conflict_files.to_vec(),
                ..Default::default()
            });
        }

        let paths: Vec<&str> = envelope.merged_files.keys().map(String::as_str).collect();
        let mut add_args = vec!["add"];
        add_args.extend(paths);
        let _ = self.git.exec(workdir, &add_args).await;
        let _ = self
            .git
            .exec(workdir, &["commit", "-m", "Semantic auto-merge"])
            .await;

        Ok(MergeOutcome::ok())
    }

    async fn validate(&self, workdir: &str) -> bool {
        let Some(command) = &self.validate_command else {
            return true;
        };
        let Some((program, args)) = command.split_first() else {
            return true;
        };
        tokio::process::Command::new(program)
            .args(args)
            .current_dir(workdir)
            .status()
            .await
            .is_ok_and(|status| status.success())
    }

    async fn discard(&self, workdir: &str) {
        let _ = self.git.exec(workdir, &["reset", "--hard"]).await;
        let _ = self.git.exec(workdir, &["checkout", "."]).await;
    }
}

fn build_merge_prompt(conflict_files: &[String], diff_ours: &str, diff_theirs: &str) -> String {
    format!(
        "Resolve the following merge conflict.\n\nConflicting files:\n{}\n\n\
         --- Incoming diff (ours) ---\n{diff_ours}\n\n\
         --- Incoming diff (theirs) ---\n{diff_theirs}\n\n\
         Respond with a JSON object of the form \
         {{\"merged_files\": {{\"<relpath>\": \"<full file content>\"}}, \"reasoning\": \"<free text>\"}}.",
        conflict_files.join("\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF_A: &str = "diff --git a/src/a.rs b/src/a.rs\n@@ -1,3 +1,3 @@ fn alpha() {\n+let x = 1;\n";
    const DIFF_B: &str = "diff --git a/src/b.rs b/src/b.rs\n@@ -1,3 +1,3 @@ fn beta() {\n+let y = 2;\n";
    const DIFF_C: &str = "diff --git a/src/a.rs b/src/a.rs\n@@ -1,3 +1,3 @@ fn alpha() {\n-let x = 1;\n";

    #[test]
    fn disjoint_files_are_auto_mergeable() {
        assert!(SemanticAutoMerger::can_auto_merge(DIFF_A, DIFF_B));
        assert!(SemanticAutoMerger::can_auto_merge(DIFF_B, DIFF_A));
    }

    #[test]
    fn overlapping_file_and_function_is_not_auto_mergeable() {
        assert!(!SemanticAutoMerger::can_auto_merge(DIFF_A, DIFF_C));
    }

    #[test]
    fn extract_json_envelope_strips_markdown_fence() {
        let response = "```json\n{\"merged_files\": {}, \"reasoning\": \"ok\"}\n```";
        let envelope: MergeEnvelope = serde_json::from_str(extract_json_envelope(response)).unwrap();
        assert_eq!(envelope.reasoning, "ok");
    }

    #[test]
    fn extract_json_envelope_finds_outermost_braces_in_prose() {
        let response = "Here is my answer: {\"merged_files\": {\"a.rs\": \"x\"}, \"reasoning\": \"done\"} thanks";
        let envelope: MergeEnvelope = serde_json::from_str(extract_json_envelope(response)).unwrap();
        assert_eq!(envelope.merged_files.get("a.rs").unwrap(), "x");
    }
}
