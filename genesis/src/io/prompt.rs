//! System prompts for the code agent and the post-run summarizers.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::sentinel::{TASK_SUMMARY_CLOSE, TASK_SUMMARY_OPEN};

const CODE_AGENT_TEMPLATE: &str = include_str!("prompts/code_agent.md");
const FRAGMENT_TITLE_TEMPLATE: &str = include_str!("prompts/fragment_title.md");
const RESPONSE_TEMPLATE: &str = include_str!("prompts/response.md");

/// Template engine wrapper around minijinja.
#[derive(Debug)]
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("code_agent", CODE_AGENT_TEMPLATE)
            .expect("code agent template should be valid");
        env.add_template("fragment_title", FRAGMENT_TITLE_TEMPLATE)
            .expect("fragment title template should be valid");
        env.add_template("response", RESPONSE_TEMPLATE)
            .expect("response template should be valid");
        Self { env }
    }

    /// Code agent system prompt, bound to the sandbox layout and the sentinel.
    pub fn code_agent(&self, workdir: &str, port: u16) -> Result<String> {
        let template = self.env.get_template("code_agent")?;
        let rendered = template.render(context! {
            workdir => workdir.trim_end_matches('/'),
            port => port,
            summary_open => TASK_SUMMARY_OPEN,
            summary_close => TASK_SUMMARY_CLOSE,
        })?;
        Ok(rendered)
    }

    pub fn fragment_title(&self) -> Result<String> {
        Ok(self.env.get_template("fragment_title")?.render(context! {})?)
    }

    pub fn response(&self) -> Result<String> {
        Ok(self.env.get_template("response")?.render(context! {})?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_agent_prompt_carries_workdir_and_sentinel() {
        let prompt = PromptEngine::new()
            .code_agent("/home/user/", 3000)
            .expect("render");
        assert!(prompt.contains("`/home/user`"));
        assert!(prompt.contains("port 3000"));
        assert!(prompt.contains("<task_summary>"));
        assert!(prompt.contains("</task_summary>"));
        assert!(!prompt.contains("{{"));
    }

    #[test]
    fn summarizer_prompts_render() {
        let engine = PromptEngine::new();
        assert!(engine.fragment_title().expect("title").contains("3 words"));
        assert!(engine.response().expect("response").contains("plain text"));
    }
}
