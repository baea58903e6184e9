// crates/server/src/tailor.rs
//! The résumé-tailoring pipeline.
//!
//! Four stages over a [`TailorJob`]: normalize the inputs, ask the CLI for a
//! [`TailoredResume`], render it, store it. The `done` payload is a one-line
//! HTML summary of the result.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use applydesk_core::llm::{ClaudeCli, InvocationError, InvocationRequest};
use applydesk_server_jobs::{Pipeline, Renderable, Stage};
use async_trait::async_trait;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::collaborators::{DocumentRenderer, RenderedDocument, ResultStore};

/// Per-input bound after normalization.
pub const MAX_INPUT_CHARS: usize = 20_000;

pub const STAGE_READ: &str = "Reading job posting";
pub const STAGE_ASK: &str = "Asking Claude to tailor the résumé";
pub const STAGE_RENDER: &str = "Rendering document";
pub const STAGE_SAVE: &str = "Saving result";

const SYSTEM_PROMPT: &str = "You are an experienced technical recruiter and résumé writer. \
Given a job posting and a candidate's résumé, tailor the résumé to the posting. \
Only use facts present in the résumé; never invent employers, titles, dates or numbers. \
Write a one-line headline, a summary of at most four sentences, three to six achievement \
highlights reworded for this posting, the posting keywords the candidate genuinely covers, \
and a fit score from 0 to 100 for how well the candidate matches the posting.";

/// Request body for `POST /api/jobs/{job_id}/tailor`.
#[derive(Debug, Clone, Deserialize)]
pub struct TailorRequest {
    pub posting: String,
    pub resume: String,
}

/// The structured answer requested from the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TailoredResume {
    pub headline: String,
    pub summary: String,
    #[serde(default)]
    pub highlights: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub fit_score: f64,
}

impl TailoredResume {
    /// JSON Schema handed to `--json-schema`.
    pub fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "headline": {"type": "string"},
                "summary": {"type": "string"},
                "highlights": {"type": "array", "items": {"type": "string"}},
                "keywords": {"type": "array", "items": {"type": "string"}},
                "fit_score": {"type": "number", "minimum": 0, "maximum": 100}
            },
            "required": ["headline", "summary", "highlights", "keywords", "fit_score"],
            "additionalProperties": false
        })
    }

    /// Checks the schema constraints serde cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=100.0).contains(&self.fit_score) {
            bail!("fit score {} is outside 0-100", self.fit_score);
        }
        if self.headline.trim().is_empty() {
            bail!("the tailored résumé has no headline");
        }
        Ok(())
    }

    pub fn fit_score_display(&self) -> String {
        format!("{}", self.fit_score.round() as i64)
    }
}

/// State threaded through the stages of one run.
#[derive(Debug)]
pub struct TailorJob {
    pub job_id: String,
    pub posting: String,
    pub resume: String,
    pub tailored: Option<TailoredResume>,
    pub document: Option<RenderedDocument>,
    pub location: Option<String>,
}

impl TailorJob {
    pub fn new(job_id: impl Into<String>, request: TailorRequest) -> Self {
        Self {
            job_id: job_id.into(),
            posting: request.posting,
            resume: request.resume,
            tailored: None,
            document: None,
            location: None,
        }
    }

    fn user_content(&self) -> String {
        format!(
            "<job_posting>\n{}\n</job_posting>\n\n<resume>\n{}\n</resume>",
            self.posting, self.resume
        )
    }
}

impl Renderable for TailorJob {
    fn render_fragment(&self) -> String {
        let Some(tailored) = &self.tailored else {
            return String::new();
        };

        let mut html = String::from(r#"<section class="tailored-resume">"#);
        html.push_str(&format!(
            r#"<h2>{}</h2><p class="fit-score">Fit score: {}/100</p><p>{}</p>"#,
            escape_html(&tailored.headline),
            tailored.fit_score_display(),
            escape_html(&tailored.summary),
        ));
        if !tailored.highlights.is_empty() {
            html.push_str("<ul>");
            for highlight in &tailored.highlights {
                html.push_str(&format!("<li>{}</li>", escape_html(highlight)));
            }
            html.push_str("</ul>");
        }
        if let Some(location) = &self.location {
            html.push_str(&format!(
                r#"<p class="saved-to">Saved to <code>{}</code></p>"#,
                escape_html(location)
            ));
        }
        html.push_str("</section>");
        html
    }
}

/// Escape text for HTML, folding line breaks so the result stays on one line.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '\r' => {}
            '\n' => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

fn script_or_style() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").expect("valid regex"))
}

fn html_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"))
}

/// Strip markup, decode the common entities, collapse whitespace and bound
/// the length. Paragraph breaks survive as a single blank line.
pub fn normalize_text(raw: &str) -> String {
    let without_code = script_or_style().replace_all(raw, " ");
    let with_breaks = without_code
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n")
        .replace("</p>", "\n\n")
        .replace("</li>", "\n");
    let text = html_tag().replace_all(&with_breaks, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(collapsed);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }

    let joined = paragraphs.join("\n\n");
    match joined.char_indices().nth(MAX_INPUT_CHARS) {
        Some((cut, _)) => joined[..cut].trim_end().to_string(),
        None => joined,
    }
}

/// User-facing wording for an invocation failure.
fn describe_invocation_error(err: &InvocationError) -> String {
    match err {
        InvocationError::ProcessNotFound { program, .. } => format!(
            "Claude CLI not found ({program}). Install it or set APPLYDESK_CLAUDE_BIN"
        ),
        InvocationError::AuthenticationFailed { .. } => {
            "Claude CLI is not logged in. Run `claude` once and complete /login".to_string()
        }
        other => other.to_string(),
    }
}

struct ReadInputs;

#[async_trait]
impl Stage<TailorJob> for ReadInputs {
    fn name(&self) -> &str {
        STAGE_READ
    }

    async fn run(&self, job: &mut TailorJob) -> anyhow::Result<()> {
        job.posting = normalize_text(&job.posting);
        job.resume = normalize_text(&job.resume);
        if job.posting.is_empty() {
            bail!("the job posting is empty");
        }
        if job.resume.is_empty() {
            bail!("the résumé is empty");
        }
        tracing::debug!(
            job_id = %job.job_id,
            posting_chars = job.posting.chars().count(),
            resume_chars = job.resume.chars().count(),
            "inputs normalized"
        );
        Ok(())
    }
}

struct AskClaude {
    claude: ClaudeCli,
    model: String,
    max_turns: u32,
    timeout: Duration,
}

#[async_trait]
impl Stage<TailorJob> for AskClaude {
    fn name(&self) -> &str {
        STAGE_ASK
    }

    async fn run(&self, job: &mut TailorJob) -> anyhow::Result<()> {
        let request = InvocationRequest::new(SYSTEM_PROMPT, job.user_content(), TailoredResume::schema())
            .with_model(self.model.clone())
            .with_max_turns(self.max_turns)
            .with_timeout(self.timeout);

        let tailored: TailoredResume = self
            .claude
            .invoke(&request)
            .await
            .map_err(|e| anyhow!(describe_invocation_error(&e)))?;
        tailored.validate()?;

        tracing::info!(job_id = %job.job_id, fit_score = tailored.fit_score, "résumé tailored");
        job.tailored = Some(tailored);
        Ok(())
    }
}

struct RenderDocument {
    renderer: Arc<dyn DocumentRenderer>,
}

#[async_trait]
impl Stage<TailorJob> for RenderDocument {
    fn name(&self) -> &str {
        STAGE_RENDER
    }

    async fn run(&self, job: &mut TailorJob) -> anyhow::Result<()> {
        let tailored = job
            .tailored
            .clone()
            .context("nothing to render")?;
        let renderer = Arc::clone(&self.renderer);
        let job_id = job.job_id.clone();

        let document = tokio::task::spawn_blocking(move || renderer.render(&job_id, &tailored))
            .await
            .map_err(|e| anyhow!("renderer crashed: {e}"))??;
        job.document = Some(document);
        Ok(())
    }
}

struct SaveResult {
    store: Arc<dyn ResultStore>,
}

#[async_trait]
impl Stage<TailorJob> for SaveResult {
    fn name(&self) -> &str {
        STAGE_SAVE
    }

    async fn run(&self, job: &mut TailorJob) -> anyhow::Result<()> {
        let document = job.document.as_ref().context("nothing to save")?;
        let location = self.store.save(&job.job_id, document).await?;
        job.location = Some(location);
        Ok(())
    }
}

/// Everything the stages need, taken from the app state.
pub struct TailorDeps {
    pub claude: ClaudeCli,
    pub model: String,
    pub max_turns: u32,
    pub timeout: Duration,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub store: Arc<dyn ResultStore>,
}

pub fn pipeline(deps: TailorDeps) -> Pipeline<TailorJob> {
    Pipeline::new()
        .stage(ReadInputs)
        .stage(AskClaude {
            claude: deps.claude,
            model: deps.model,
            max_turns: deps.max_turns,
            timeout: deps.timeout,
        })
        .stage(RenderDocument {
            renderer: deps.renderer,
        })
        .stage(SaveResult { store: deps.store })
}
