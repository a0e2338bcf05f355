use crate::constants;
use crate::models::{ChangeKind, CodeChange};
use regex::Regex;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

/// Parser for the change grammar all strategies share:
///
/// ````text
/// FILE: <path>
/// ```<lang>
/// <content>
/// ```
/// ````
///
/// Each `FILE:` directive claims the nearest subsequent fenced code block
/// that is not already claimed and not past the next directive. Directives
/// left without a block are logged and dropped, never an error.
#[derive(Debug, Clone)]
pub struct ChangeParser {
    file_directive: Regex,
    fence: Regex,
}

struct Fence {
    start: usize,
    language: String,
    body: String,
}

impl Default for ChangeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeParser {
    pub fn new() -> Self {
        Self {
            file_directive: Regex::new(r"(?m)^FILE:[ \t]*(\S+)[ \t]*$")
                .expect("static pattern compiles"),
            fence: Regex::new(r"```([A-Za-z0-9_+#.\-]*)[ \t]*\r?\n((?s).*?)```")
                .expect("static pattern compiles"),
        }
    }

    /// Parse with the mandatory wall-clock ceiling. The regex engine is
    /// linear-time, but adversarial output sizes still get cut off rather
    /// than stalling a strategy.
    pub async fn parse_bounded(
        &self,
        output: String,
        existing_paths: HashSet<String>,
    ) -> Vec<CodeChange> {
        let parser = self.clone();
        let parse = tokio::task::spawn_blocking(move || parser.parse(&output, &existing_paths));
        match tokio::time::timeout(Duration::from_secs(constants::PARSER_TIMEOUT_SECS), parse).await
        {
            Ok(Ok(changes)) => changes,
            Ok(Err(e)) => {
                warn!(error = %e, "Change parsing task failed");
                Vec::new()
            }
            Err(_) => {
                warn!(
                    budget_secs = constants::PARSER_TIMEOUT_SECS,
                    "Change parsing exceeded its budget, dropping output"
                );
                Vec::new()
            }
        }
    }

    pub fn parse(&self, output: &str, existing_paths: &HashSet<String>) -> Vec<CodeChange> {
        let directives: Vec<(usize, usize, &str)> = self
            .file_directive
            .captures_iter(output)
            .map(|c| {
                let whole = c.get(0).expect("match has full capture");
                let path = c.get(1).expect("pattern has path group");
                (whole.start(), whole.end(), path.as_str())
            })
            .collect();

        let fences: Vec<Fence> = self
            .fence
            .captures_iter(output)
            .map(|c| Fence {
                start: c.get(0).expect("match has full capture").start(),
                language: c.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
                body: c.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
            })
            .collect();

        let mut changes = Vec::new();
        let mut next_fence = 0usize;

        for (i, (_, dir_end, path)) in directives.iter().enumerate() {
            // Skip fences that opened before this directive; they belong
            // to nothing (or to an earlier directive that claimed them).
            while next_fence < fences.len() && fences[next_fence].start < *dir_end {
                next_fence += 1;
            }

            let next_directive_start = directives.get(i + 1).map(|(s, _, _)| *s);
            let candidate = fences.get(next_fence);
            let claimed = match (candidate, next_directive_start) {
                (Some(fence), Some(next_start)) if fence.start > next_start => None,
                (Some(fence), _) => Some(fence),
                (None, _) => None,
            };

            let Some(fence) = claimed else {
                warn!(path, "FILE directive without a code block, dropping");
                continue;
            };
            next_fence += 1;

            let language = if fence.language.is_empty() {
                language_from_extension(path)
            } else {
                fence.language.to_lowercase()
            };
            let content = fence.body.clone();
            let kind = if content.trim().is_empty() {
                ChangeKind::Delete
            } else if existing_paths.contains(*path) {
                ChangeKind::Modify
            } else {
                ChangeKind::Create
            };

            debug!(path, %language, ?kind, "Parsed code change");
            changes.push(CodeChange {
                path: path.to_string(),
                language,
                content,
                kind,
            });
        }

        changes
    }
}

/// Maps a file extension to the language tag used across the core.
pub fn language_from_extension(path: &str) -> String {
    let extension = path.rsplit('.').next().unwrap_or_default();
    let language = match extension {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" => "cpp",
        "cs" => "csharp",
        "md" => "markdown",
        "json" => "json",
        "yml" | "yaml" => "yaml",
        "toml" => "toml",
        "sh" => "bash",
        "html" => "html",
        "css" => "css",
        "sql" => "sql",
        _ => "text",
    };
    language.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(output: &str) -> Vec<CodeChange> {
        ChangeParser::new().parse(output, &HashSet::new())
    }

    #[test]
    fn parses_single_file_block() {
        let output = "Here is the fix:\n\nFILE: README.md\n```markdown\n# Fixed\n```\n";
        let changes = parse(output);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "README.md");
        assert_eq!(changes[0].language, "markdown");
        assert_eq!(changes[0].content, "# Fixed\n");
        assert_eq!(changes[0].kind, ChangeKind::Create);
    }

    #[test]
    fn parses_multiple_files_in_order() {
        let output = "FILE: src/a.rs\n```rust\nfn a() {}\n```\nFILE: src/b.rs\n```rust\nfn b() {}\n```\n";
        let changes = parse(output);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].path, "src/a.rs");
        assert_eq!(changes[1].path, "src/b.rs");
    }

    #[test]
    fn missing_fence_language_is_inferred_from_extension() {
        let output = "FILE: src/main.rs\n```\nfn main() {}\n```\n";
        let changes = parse(output);
        assert_eq!(changes[0].language, "rust");
    }

    #[test]
    fn unmatched_directive_is_dropped() {
        let output = "FILE: ghost.rs\n\nno code block follows\n";
        assert!(parse(output).is_empty());
    }

    #[test]
    fn directive_does_not_steal_a_later_directives_block() {
        let output = "FILE: ghost.rs\nFILE: real.rs\n```rust\nfn real() {}\n```\n";
        let changes = parse(output);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "real.rs");
    }

    #[test]
    fn existing_paths_become_modifications() {
        let mut existing = HashSet::new();
        existing.insert("src/lib.rs".to_string());
        let output = "FILE: src/lib.rs\n```rust\npub fn v2() {}\n```\n";
        let changes = ChangeParser::new().parse(output, &existing);
        assert_eq!(changes[0].kind, ChangeKind::Modify);
    }

    #[test]
    fn empty_body_means_delete() {
        let output = "FILE: src/old.rs\n```rust\n```\n";
        let changes = parse(output);
        assert_eq!(changes[0].kind, ChangeKind::Delete);
    }

    #[test]
    fn prose_code_blocks_without_directives_are_ignored() {
        let output = "Some explanation:\n```rust\nfn unrelated() {}\n```\n";
        assert!(parse(output).is_empty());
    }

    #[tokio::test]
    async fn bounded_parse_returns_for_normal_input() {
        let parser = ChangeParser::new();
        let output = "FILE: a.txt\n```\nhello\n```\n".to_string();
        let changes = parser.parse_bounded(output, HashSet::new()).await;
        assert_eq!(changes.len(), 1);
    }
}
