//! Repository structure description produced by the analyzer.

use serde::{Deserialize, Serialize};

/// Structured description of a checked-out repository.
///
/// Every field defaults when missing from model output, so a partially
/// populated JSON object still parses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryAnalysis {
    /// Detected languages, most significant first.
    #[serde(default)]
    pub languages: Vec<String>,

    #[serde(default)]
    pub frameworks: Vec<String>,

    /// Dependency manifests (requirements.txt, package.json, ...).
    #[serde(default)]
    pub package_files: Vec<String>,

    #[serde(default)]
    pub test_directories: Vec<String>,

    #[serde(default)]
    pub test_files: Vec<String>,

    #[serde(default)]
    pub structure_summary: String,
}

impl RepositoryAnalysis {
    /// An analysis with no detected content and an explanatory summary.
    pub fn empty(summary: impl Into<String>) -> Self {
        Self {
            structure_summary: summary.into(),
            ..Self::default()
        }
    }

    /// Whether at least one language was detected.
    pub fn has_languages(&self) -> bool {
        self.languages.iter().any(|l| !l.trim().is_empty())
    }

    /// Short language tags used in the canonical record (`python` -> `py`).
    ///
    /// Falls back to `["py"]` when nothing was detected.
    pub fn language_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for lang in &self.languages {
            let tag = language_tag(lang);
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        if tags.is_empty() {
            tags.push("py".to_string());
        }
        tags
    }

    /// Glob patterns for sampling source files of the detected languages.
    pub fn source_globs(&self) -> Vec<&'static str> {
        let mut globs: Vec<&'static str> = Vec::new();
        for lang in &self.languages {
            if let Some(glob) = source_glob(lang) {
                if !globs.contains(&glob) {
                    globs.push(glob);
                }
            }
        }
        if globs.is_empty() {
            globs.push("*.py");
        }
        globs
    }
}

fn language_tag(language: &str) -> String {
    let lower = language.trim().to_lowercase();
    let tag = match lower.as_str() {
        "python" | "python3" | "py" => "py",
        "javascript" | "js" | "node" | "nodejs" => "js",
        "typescript" | "ts" => "ts",
        "rust" | "rs" => "rs",
        "golang" | "go" => "go",
        "ruby" | "rb" => "rb",
        "c++" | "cpp" => "cpp",
        "c#" | "csharp" => "cs",
        "shell" | "bash" | "sh" => "sh",
        other => other,
    };
    tag.to_string()
}

fn source_glob(language: &str) -> Option<&'static str> {
    match language_tag(language).as_str() {
        "py" => Some("*.py"),
        "js" => Some("*.js"),
        "ts" => Some("*.ts"),
        "rs" => Some("*.rs"),
        "go" => Some("*.go"),
        "rb" => Some("*.rb"),
        "java" => Some("*.java"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let analysis: RepositoryAnalysis =
            serde_json::from_str(r#"{"languages": ["Python"]}"#).unwrap();
        assert_eq!(analysis.languages, vec!["Python"]);
        assert!(analysis.frameworks.is_empty());
        assert!(analysis.structure_summary.is_empty());
    }

    #[test]
    fn language_tags_are_normalized_and_deduplicated() {
        let analysis = RepositoryAnalysis {
            languages: vec!["Python".into(), "python3".into(), "JavaScript".into()],
            ..RepositoryAnalysis::default()
        };
        assert_eq!(analysis.language_tags(), vec!["py", "js"]);
    }

    #[test]
    fn language_tags_default_to_python() {
        assert_eq!(RepositoryAnalysis::default().language_tags(), vec!["py"]);
    }

    #[test]
    fn source_globs_follow_languages() {
        let analysis = RepositoryAnalysis {
            languages: vec!["Go".into(), "Markdown".into()],
            ..RepositoryAnalysis::default()
        };
        assert_eq!(analysis.source_globs(), vec!["*.go"]);
        assert_eq!(RepositoryAnalysis::default().source_globs(), vec!["*.py"]);
    }

    #[test]
    fn empty_keeps_summary() {
        let analysis = RepositoryAnalysis::empty("Analysis failed");
        assert!(!analysis.has_languages());
        assert_eq!(analysis.structure_summary, "Analysis failed");
    }
}
