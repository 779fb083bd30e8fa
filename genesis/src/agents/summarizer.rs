//! Post-run summarizers: single-turn, tool-less agents that turn the final task
//! summary into a fragment title and a user-facing reply.

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::normalize::{DEFAULT_RESPONSE, DEFAULT_TITLE, normalize_text_output};
use crate::core::types::ConversationItem;
use crate::io::config::EngineConfig;
use crate::io::model::{InferenceRequest, ModelClient};
use crate::io::prompt::PromptEngine;

#[derive(Debug, Clone)]
pub struct Summarizer {
    name: &'static str,
    system: String,
    model: String,
    fallback: &'static str,
}

impl Summarizer {
    pub fn fragment_title(prompts: &PromptEngine, cfg: &EngineConfig) -> Result<Self> {
        Ok(Self {
            name: "fragment-title-generator",
            system: prompts.fragment_title()?,
            model: cfg.model.summary_model.clone(),
            fallback: DEFAULT_TITLE,
        })
    }

    pub fn response(prompts: &PromptEngine, cfg: &EngineConfig) -> Result<Self> {
        Ok(Self {
            name: "response-generator",
            system: prompts.response()?,
            model: cfg.model.summary_model.clone(),
            fallback: DEFAULT_RESPONSE,
        })
    }

    /// Summarize `summary` in one inference.
    ///
    /// An empty summary skips the model and yields the fallback text.
    #[instrument(skip_all, fields(summarizer = self.name))]
    pub fn summarize(&self, model: &dyn ModelClient, summary: &str) -> Result<String> {
        if summary.trim().is_empty() {
            debug!("no summary, using fallback");
            return Ok(self.fallback.to_string());
        }
        let request = InferenceRequest {
            model: self.model.clone(),
            system: self.system.clone(),
            messages: vec![ConversationItem::user(summary)],
            tools: Vec::new(),
        };
        let response = model
            .infer(&request)
            .with_context(|| format!("{} inference", self.name))?;
        Ok(normalize_text_output(&response, self.fallback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{MessageContent, ModelResponse};
    use crate::test_support::{ScriptedModel, tool_call_response};
    use serde_json::json;

    fn cfg() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn title_uses_summary_model_and_concatenates_parts() {
        let model = ScriptedModel::new(vec![ModelResponse {
            output: vec![ConversationItem::assistant(MessageContent::Parts(vec![
                "Hello".into(),
                " World".into(),
            ]))],
        }]);
        let title = Summarizer::fragment_title(&PromptEngine::new(), &cfg()).expect("build");
        let text = title
            .summarize(&model, "<task_summary>Wrote hello.txt</task_summary>")
            .expect("summarize");
        assert_eq!(text, "Hello World");
        assert_eq!(model.requests()[0].model, "gpt-4o");
        assert!(model.requests()[0].tools.is_empty());
    }

    #[test]
    fn non_text_output_falls_back() {
        let model = ScriptedModel::new(vec![tool_call_response("c1", "terminal", json!({}))]);
        let response = Summarizer::response(&PromptEngine::new(), &cfg()).expect("build");
        let text = response.summarize(&model, "summary").expect("summarize");
        assert_eq!(text, "Here you go");
    }

    #[test]
    fn empty_summary_skips_model() {
        let model = ScriptedModel::new(Vec::new());
        let title = Summarizer::fragment_title(&PromptEngine::new(), &cfg()).expect("build");
        assert_eq!(title.summarize(&model, "").expect("summarize"), "Fragment");
        assert_eq!(model.calls(), 0);
    }
}
