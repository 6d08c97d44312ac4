//! Commit id resolution for the container checkout.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::container::{exec_lossy, ContainerHandle, ExecRequest};
use crate::domain::UNKNOWN_COMMIT;
use crate::llm::TextGenerator;

/// Shortest id accepted without probing the repository directly.
pub const MIN_COMMIT_ID_LEN: usize = 7;

const COMMIT_SYSTEM_PROMPT: &str = "\
You are a Git expert. Reply with the full commit SHA only, no other text.";

/// Keep the longest run of hex digits in `raw`.
///
/// `"sha: abc123!"` becomes `"abc123"`.
pub fn clean_commit_id(raw: &str) -> String {
    raw.split(|c: char| !c.is_ascii_hexdigit())
        .max_by_key(|run| run.len())
        .unwrap_or("")
        .to_string()
}

/// Resolves the HEAD commit of the checkout.
pub struct CommitResolver {
    llm: Arc<dyn TextGenerator>,
    checkout_root: String,
}

impl CommitResolver {
    pub fn new(llm: Arc<dyn TextGenerator>, checkout_root: impl Into<String>) -> Self {
        Self {
            llm,
            checkout_root: checkout_root.into(),
        }
    }

    /// Ask the model first; fall back to `git rev-parse HEAD`, then to
    /// [`UNKNOWN_COMMIT`].
    pub async fn resolve(&self, container: &dyn ContainerHandle) -> String {
        let prompt = format!(
            "What is the current commit SHA of the Git repository at {}? \
             Reply with the full SHA only.",
            self.checkout_root
        );
        let answer = self.llm.complete(&prompt, Some(COMMIT_SYSTEM_PROMPT)).await;
        let cleaned = clean_commit_id(&answer);
        if cleaned.len() >= MIN_COMMIT_ID_LEN {
            return cleaned;
        }

        debug!(answer = %answer.trim(), "model commit id unusable, asking git");
        self.head_from_git(container).await
    }

    /// `git rev-parse HEAD` inside the checkout.
    pub async fn head_from_git(&self, container: &dyn ContainerHandle) -> String {
        let output = exec_lossy(
            container,
            ExecRequest::argv(["git", "rev-parse", "HEAD"]).with_workdir(self.checkout_root.clone()),
        )
        .await;
        let sha = output.stdout.trim();
        if output.success() && !sha.is_empty() && sha.chars().all(|c| c.is_ascii_hexdigit()) {
            sha.to_string()
        } else {
            warn!(exit_code = output.exit_code, "git rev-parse HEAD failed");
            UNKNOWN_COMMIT.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ExecOutput;
    use crate::fakes::{FakeContainer, ScriptedTextGenerator};

    const SHA: &str = "9fceb02d0ae598e95dc970b74767f19372d61af8";

    #[test]
    fn clean_keeps_longest_hex_run() {
        assert_eq!(clean_commit_id("sha: abc123!"), "abc123");
        assert_eq!(clean_commit_id(&format!("The SHA is {SHA}.")), SHA);
        assert_eq!(clean_commit_id("no hex here?"), "e");
        assert_eq!(clean_commit_id(""), "");
    }

    #[tokio::test]
    async fn full_sha_from_model_skips_git() {
        let llm = Arc::new(ScriptedTextGenerator::new([format!("`{SHA}`")]));
        let container = FakeContainer::default();

        let resolver = CommitResolver::new(llm, "/workspace/repo");
        assert_eq!(resolver.resolve(&container).await, SHA);
        assert_eq!(container.interaction_count(), 0);
    }

    #[tokio::test]
    async fn short_id_falls_back_to_rev_parse() {
        let llm = Arc::new(ScriptedTextGenerator::new(["sha: abc123!"]));
        let container =
            FakeContainer::default().on("git rev-parse HEAD", ExecOutput::ok(format!("{SHA}\n")));

        let resolver = CommitResolver::new(llm, "/workspace/repo");
        assert_eq!(resolver.resolve(&container).await, SHA);
        let rev_parse = &container.calls_matching("git rev-parse HEAD")[0];
        assert_eq!(rev_parse.workdir.as_deref(), Some("/workspace/repo"));
    }

    #[tokio::test]
    async fn failed_rev_parse_is_unknown() {
        let llm = Arc::new(ScriptedTextGenerator::new([""]));
        let container = FakeContainer::default().on(
            "git rev-parse HEAD",
            ExecOutput::failed(128, "fatal: not a git repository"),
        );

        let resolver = CommitResolver::new(llm, "/workspace/repo");
        assert_eq!(resolver.resolve(&container).await, UNKNOWN_COMMIT);
    }
}
