//! Answer generation through a local language model.
//!
//! The model itself is out of process: [`CommandGenerator`] runs any
//! command that reads a prompt on stdin and prints the completion on
//! stdout, such as a llama.cpp CLI.

use std::{
    io::Write,
    process::{Command, Stdio},
};

use crate::error::{Error, Result};

pub const CONTEXT_PLACEHOLDER: &str = "{context}";
pub const QUESTION_PLACEHOLDER: &str = "{question}";

/// Instruction-style prompt that keeps the model on the retrieved text.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "### Instruction:\n\
Answer the question using ONLY the information below. \
Be brief and precise.\n\n\
### Context:\n{context}\n\n\
### Question:\n{question}\n\n\
### Response:";

/// Produces raw completions for a prompt.
pub trait Generator: Send {
    fn generate(&mut self, prompt: &str) -> Result<String>;
}

/// A prompt with one `{context}` slot followed by one `{question}` slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
    context_at: usize,
    question_at: usize,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        let context_at = template.find(CONTEXT_PLACEHOLDER).ok_or_else(|| {
            Error::Config(format!(
                "prompt template is missing {CONTEXT_PLACEHOLDER}"
            ))
        })?;
        let question_at =
            template.find(QUESTION_PLACEHOLDER).ok_or_else(|| {
                Error::Config(format!(
                    "prompt template is missing {QUESTION_PLACEHOLDER}"
                ))
            })?;
        if question_at < context_at {
            return Err(Error::Config(
                "prompt template must place the context before the question"
                    .to_string(),
            ));
        }
        Ok(Self {
            template,
            context_at,
            question_at,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Fill both slots.
    ///
    /// Placeholders that appear inside `context` or `question` are left as
    /// they are.
    ///
    /// # Examples
    ///
    /// ```
    /// use pocketrag::generation::PromptTemplate;
    ///
    /// let template = PromptTemplate::new("C: {context} Q: {question}")?;
    /// assert_eq!(
    ///     template.render("about {question}", "why?"),
    ///     "C: about {question} Q: why?"
    /// );
    /// # Ok::<(), pocketrag::Error>(())
    /// ```
    pub fn render(&self, context: &str, question: &str) -> String {
        let t = &self.template;
        let context_end = self.context_at + CONTEXT_PLACEHOLDER.len();
        let question_end = self.question_at + QUESTION_PLACEHOLDER.len();

        let mut out = String::with_capacity(
            t.len() + context.len() + question.len(),
        );
        out.push_str(&t[..self.context_at]);
        out.push_str(context);
        out.push_str(&t[context_end..self.question_at]);
        out.push_str(question);
        out.push_str(&t[question_end..]);
        out
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        let template = DEFAULT_PROMPT_TEMPLATE.to_string();
        let context_at = template.find(CONTEXT_PLACEHOLDER).unwrap_or(0);
        let question_at = template.find(QUESTION_PLACEHOLDER).unwrap_or(0);
        Self {
            template,
            context_at,
            question_at,
        }
    }
}

/// Runs an external program per prompt.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
}

impl CommandGenerator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a whitespace separated command line such as
    /// `llama-cli -m model.gguf -n 256`.
    pub fn from_command_line(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| {
            Error::Config("generator command is empty".to_string())
        })?;
        Ok(Self::new(program, parts.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Generator for CommandGenerator {
    fn generate(&mut self, prompt: &str) -> Result<String> {
        tracing::debug!(
            program = %self.program,
            prompt_chars = prompt.chars().count(),
            "running generator"
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::Generation(format!("could not start {}: {e}", self.program))
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            Error::Generation("generator stdin unavailable".to_string())
        })?;
        // The child may fill its stdout pipe before it has read all of
        // stdin, so the prompt is written from another thread.
        let prompt = prompt.to_string();
        let writer = std::thread::spawn(move || stdin.write_all(prompt.as_bytes()));

        let output = child.wait_with_output()?;
        match writer.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "generator closed stdin early");
            }
            Err(_) => {
                return Err(Error::Generation(
                    "prompt writer thread panicked".to_string(),
                ));
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Generation(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            return Err(Error::Generation(format!(
                "{} produced no output",
                self.program
            )));
        }

        tracing::debug!(answer_chars = text.chars().count(), "generator finished");
        Ok(text)
    }
}
