// crates/server/src/collaborators.rs
//! Document rendering and result persistence for tailored résumés.

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;

use crate::tailor::TailoredResume;

/// A rendered document ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    /// File extension without the dot.
    pub extension: &'static str,
    pub content: String,
}

/// Turns a tailored résumé into a document.
///
/// Rendering is synchronous and may be CPU-heavy; callers run it through
/// `spawn_blocking`.
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, job_id: &str, resume: &TailoredResume) -> anyhow::Result<RenderedDocument>;
}

/// Persists a rendered document and reports where it went.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save(&self, job_id: &str, document: &RenderedDocument) -> anyhow::Result<String>;
}

/// Plain Markdown output.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownRenderer;

impl DocumentRenderer for MarkdownRenderer {
    fn render(&self, job_id: &str, resume: &TailoredResume) -> anyhow::Result<RenderedDocument> {
        let mut out = String::new();
        writeln!(out, "# {}", resume.headline.trim())?;
        writeln!(out)?;
        writeln!(out, "_Tailored for job {job_id} · fit score {}/100_", resume.fit_score_display())?;
        writeln!(out)?;
        writeln!(out, "{}", resume.summary.trim())?;

        if !resume.highlights.is_empty() {
            writeln!(out)?;
            writeln!(out, "## Highlights")?;
            writeln!(out)?;
            for highlight in &resume.highlights {
                writeln!(out, "- {}", highlight.trim())?;
            }
        }

        if !resume.keywords.is_empty() {
            writeln!(out)?;
            writeln!(out, "## Keywords")?;
            writeln!(out)?;
            writeln!(out, "{}", resume.keywords.join(", "))?;
        }

        Ok(RenderedDocument {
            extension: "md",
            content: out,
        })
    }
}

/// Writes `<dir>/<job_id>.<ext>`, creating `dir` on first use.
#[derive(Debug, Clone)]
pub struct FsResultStore {
    dir: PathBuf,
}

impl FsResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ResultStore for FsResultStore {
    async fn save(&self, job_id: &str, document: &RenderedDocument) -> anyhow::Result<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("could not create {}", self.dir.display()))?;

        let path = self.dir.join(format!("{job_id}.{}", document.extension));
        // Write then rename so a reader never sees a half-written file.
        let tmp = path.with_extension(format!("{}.tmp", document.extension));
        tokio::fs::write(&tmp, document.content.as_bytes())
            .await
            .with_context(|| format!("could not write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("could not move result into {}", path.display()))?;

        tracing::info!(job_id = %job_id, path = %path.display(), bytes = document.content.len(), "result saved");
        Ok(path.display().to_string())
    }
}
