//! Maps raw execution output into a [`CanonicalResult`].
//!
//! The model is asked to fill the record from truncated previews and only
//! shapes it. Every field the run itself knows is written back afterwards,
//! untruncated, and a deterministic record is built when its answer is
//! unusable.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::OrchestratorConfig;
use crate::domain::{
    CanonicalResult, IntegrationTest, IntegrationTestRun, RawTestRunResult, RepoInfo, RunOutput,
    TestRunOutput, REQUIRED_GROUPS,
};
use crate::llm::TextGenerator;
use crate::parse::{parse_with, RECORD_CHAIN};

const FORMAT_SYSTEM_PROMPT: &str = r#"You format test results as JSON following this schema exactly:
{
  "Repo": {"remoteUrl": "string", "languages": ["string"]},
  "IntegrationTest": {"fileContent": "string"},
  "IntegrationTestRun": {
    "commitId": "string",
    "result": {"stdout": "string", "stderr": "string", "returnCode": 0},
    "pass": false
  }
}
Reply with the JSON object only."#;

/// Run metadata the formatter needs besides the raw output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMetadata {
    pub remote_url: String,
    pub languages: Vec<String>,
    pub commit_id: String,
}

pub struct ResultFormatter {
    llm: Arc<dyn TextGenerator>,
    config: OrchestratorConfig,
}

impl ResultFormatter {
    pub fn new(llm: Arc<dyn TextGenerator>, config: OrchestratorConfig) -> Self {
        Self { llm, config }
    }

    pub async fn format(&self, meta: &RunMetadata, raw: &RawTestRunResult) -> CanonicalResult {
        let output = match raw {
            RawTestRunResult::Completed(output) => output,
            RawTestRunResult::Aborted { error } => {
                return CanonicalResult::failure(
                    meta.remote_url.clone(),
                    meta.languages.clone(),
                    meta.commit_id.clone(),
                    error.clone(),
                );
            }
        };

        let file_content = output
            .test_files
            .first()
            .map(|f| f.content.clone())
            .unwrap_or_default();

        let response = self
            .llm
            .complete(&self.prompt(meta, output, &file_content), Some(FORMAT_SYSTEM_PROMPT))
            .await;

        let mut record = match parse_record(&response) {
            Some(record) => record,
            None => {
                debug!("formatter response unusable, building record directly");
                deterministic_record(meta, output, &file_content)
            }
        };

        overwrite_known_fields(&mut record, meta, output, file_content);
        record
    }

    fn prompt(&self, meta: &RunMetadata, output: &TestRunOutput, file_content: &str) -> String {
        let content_preview = preview(file_content, self.config.content_preview_chars);
        let stdout_preview = preview(&output.stdout, self.config.output_preview_chars);
        let stderr_preview = preview(&output.stderr, self.config.output_preview_chars);
        format!(
            "Format these test results according to the schema.\n\n\
             Repository URL: {}\n\
             Languages: {}\n\
             Commit ID: {}\n\n\
             Integration test file content (preview):\n{content_preview}\n\n\
             Test results:\n\
             - Success: {}\n\
             - Exit code: {}\n\
             - Standard output (preview): {stdout_preview}\n\
             - Standard error (preview): {stderr_preview}",
            meta.remote_url,
            meta.languages.join(", "),
            meta.commit_id,
            output.success,
            output.exit_code,
        )
    }
}

/// Accept the model's record only if every top-level group is present and
/// the whole object deserializes.
fn parse_record(response: &str) -> Option<CanonicalResult> {
    let value: serde_json::Value = parse_with(response, RECORD_CHAIN)?;
    let object = value.as_object()?;
    if let Some(missing) = REQUIRED_GROUPS.iter().find(|key| !object.contains_key(**key)) {
        warn!(group = %missing, "formatter response is missing a group");
        return None;
    }
    match serde_json::from_value(value) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(error = %e, "formatter response has the wrong shape");
            None
        }
    }
}

fn deterministic_record(
    meta: &RunMetadata,
    output: &TestRunOutput,
    file_content: &str,
) -> CanonicalResult {
    CanonicalResult {
        repo: RepoInfo {
            remote_url: meta.remote_url.clone(),
            languages: meta.languages.clone(),
        },
        integration_test: IntegrationTest {
            file_content: file_content.to_string(),
        },
        integration_test_run: IntegrationTestRun {
            commit_id: meta.commit_id.clone(),
            result: RunOutput {
                stdout: output.stdout.clone(),
                stderr: output.stderr.clone(),
                return_code: i64::from(output.exit_code),
            },
            pass: output.success,
        },
    }
}

fn overwrite_known_fields(
    record: &mut CanonicalResult,
    meta: &RunMetadata,
    output: &TestRunOutput,
    file_content: String,
) {
    record.repo.remote_url = meta.remote_url.clone();
    record.repo.languages = meta.languages.clone();
    record.integration_test.file_content = file_content;
    let run = &mut record.integration_test_run;
    run.commit_id = meta.commit_id.clone();
    run.result.stdout = output.stdout.clone();
    run.result.stderr = output.stderr.clone();
    run.result.return_code = i64::from(output.exit_code);
    run.pass = output.success;
}

/// First `max` characters, with an ellipsis when truncated.
fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TestFile;
    use crate::fakes::ScriptedTextGenerator;

    fn meta() -> RunMetadata {
        RunMetadata {
            remote_url: "https://github.com/acme/widgets".into(),
            languages: vec!["py".into()],
            commit_id: "0123456789abcdef".into(),
        }
    }

    fn completed(stdout: &str, content: &str, exit_code: i32) -> RawTestRunResult {
        RawTestRunResult::Completed(TestRunOutput {
            success: exit_code == 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code,
            test_files: vec![TestFile::new("/workspace/repo/tests/test_a.py", content)],
        })
    }

    fn formatter(llm: Arc<ScriptedTextGenerator>) -> ResultFormatter {
        ResultFormatter::new(llm, OrchestratorConfig::default())
    }

    #[tokio::test]
    async fn model_record_is_used_with_full_length_fields() {
        let content = "c".repeat(5000);
        let stdout = "o".repeat(3000);
        let llm = Arc::new(ScriptedTextGenerator::new([r#"```json
{"Repo": {"remoteUrl": "https://github.com/acme/widgets", "languages": ["py"]},
 "IntegrationTest": {"fileContent": "ccc..."},
 "IntegrationTestRun": {"commitId": "0123456789abcdef",
   "result": {"stdout": "ooo...", "stderr": "", "returnCode": 0}, "pass": true}}
```"#]));

        let record = formatter(llm.clone())
            .format(&meta(), &completed(&stdout, &content, 0))
            .await;
        assert!(record.passed());
        assert_eq!(record.integration_test.file_content.len(), 5000);
        assert_eq!(record.integration_test_run.result.stdout.len(), 3000);

        let prompt = &llm.prompts()[0].prompt;
        assert!(prompt.contains(&format!("{}...", "c".repeat(1000))));
        assert!(!prompt.contains(&"c".repeat(1001)));
        assert!(!prompt.contains(&"o".repeat(501)));
    }

    #[tokio::test]
    async fn missing_group_falls_back_to_deterministic_record() {
        let llm = Arc::new(ScriptedTextGenerator::new([r#"{"Repo": {}, "IntegrationTest": {}}"#]));

        let record = formatter(llm)
            .format(&meta(), &completed("2 failed", "def test(): ...", 1))
            .await;
        assert_eq!(record.repo.remote_url, "https://github.com/acme/widgets");
        assert_eq!(record.integration_test_run.commit_id, "0123456789abcdef");
        assert_eq!(record.integration_test_run.result.return_code, 1);
        assert!(!record.passed());
        assert_eq!(record.integration_test.file_content, "def test(): ...");
    }

    #[tokio::test]
    async fn empty_response_builds_record_directly() {
        let llm = Arc::new(ScriptedTextGenerator::new([""]));
        let record = formatter(llm)
            .format(&meta(), &completed("ok", "body", 0))
            .await;
        assert!(record.passed());
        assert_eq!(record.integration_test_run.result.stdout, "ok");
        assert_eq!(record.repo.languages, vec!["py"]);
    }

    #[tokio::test]
    async fn wrongly_typed_group_is_rejected() {
        let llm = Arc::new(ScriptedTextGenerator::new([
            r#"{"Repo": "widgets", "IntegrationTest": {}, "IntegrationTestRun": {}}"#,
        ]));
        let record = formatter(llm)
            .format(&meta(), &completed("ok", "body", 0))
            .await;
        assert_eq!(record.repo.remote_url, "https://github.com/acme/widgets");
    }

    #[tokio::test]
    async fn aborted_run_becomes_failure_record() {
        let llm = Arc::new(ScriptedTextGenerator::new(["unused"]));
        let record = formatter(llm.clone())
            .format(&meta(), &RawTestRunResult::aborted("runner exploded"))
            .await;
        assert_eq!(record.integration_test_run.result.stderr, "runner exploded");
        assert_eq!(record.integration_test_run.result.return_code, 1);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_groups_are_filled_from_the_run() {
        let llm = Arc::new(ScriptedTextGenerator::new([
            r#"{"Repo":{},"IntegrationTest":{},"IntegrationTestRun":{}}"#,
        ]));
        let record = formatter(llm)
            .format(&meta(), &completed("1 failed", "body", 1))
            .await;
        assert_eq!(record.repo.remote_url, "https://github.com/acme/widgets");
        assert_eq!(record.repo.languages, vec!["py"]);
        assert_eq!(record.integration_test_run.commit_id, "0123456789abcdef");
        assert_eq!(record.integration_test_run.result.return_code, 1);
        assert!(!record.passed());
    }

    #[tokio::test]
    async fn model_cannot_claim_another_repo_or_a_pass() {
        let llm = Arc::new(ScriptedTextGenerator::new([r#"{
 "Repo": {"remoteUrl": "https://github.com/other/x", "languages": ["go"]},
 "IntegrationTest": {"fileContent": "x"},
 "IntegrationTestRun": {"commitId": "deadbeef",
   "result": {"stdout": "all good", "stderr": "", "returnCode": 0}, "pass": true}}"#]));
        let record = formatter(llm)
            .format(&meta(), &completed("1 failed", "body", 1))
            .await;
        assert_eq!(record.remote_url(), "https://github.com/acme/widgets");
        assert_eq!(record.repo.languages, vec!["py"]);
        assert_eq!(record.integration_test_run.commit_id, "0123456789abcdef");
        assert_eq!(record.integration_test_run.result.stdout, "1 failed");
        assert_eq!(record.integration_test_run.result.return_code, 1);
        assert!(!record.passed());
    }

    #[test]
    fn preview_marks_truncation() {
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("abc", 3), "abc");
    }
}
