//! Summaries of search results from a local chat model.

use std::io::BufRead;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{Error, Result},
    search::SearchResult,
};

pub const OLLAMA_URL_ENV_VAR: &str = "DOCSIFT_OLLAMA_URL";
pub const SUMMARY_MODEL_ENV_VAR: &str = "DOCSIFT_SUMMARY_MODEL";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_SUMMARY_MODEL: &str = "llama3.2";

/// A backend that turns a query and its results into streamed prose.
pub trait Summarizer {
    /// Stream the summary of `results` into `sink`, one piece of text
    /// at a time, returning once the backend signals completion.
    fn summarize(
        &self,
        query: &str,
        results: &[SearchResult],
        sink: &mut dyn FnMut(&str) -> Result<()>,
    ) -> Result<()>;
}

/// Prompt sent to the chat model: the query followed by the results
/// rendered as JSON.
pub fn build_prompt(query: &str, results: &[SearchResult]) -> Result<String> {
    let document = serde_json::to_string(results)?;
    Ok(format!("Query: {query}, Document: {document}"))
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatFrame {
    #[serde(default)]
    message: Option<FrameMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct FrameMessage {
    #[serde(default)]
    content: String,
}

/// Read newline-delimited chat frames from `reader`, forwarding message
/// content to `sink` until a frame with `done: true` arrives.
pub fn read_stream(
    reader: impl BufRead,
    sink: &mut dyn FnMut(&str) -> Result<()>,
) -> Result<()> {
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let frame: ChatFrame = serde_json::from_str(&line).map_err(|e| {
            Error::Summary(format!("malformed stream frame: {e}"))
        })?;
        if let Some(error) = frame.error {
            return Err(Error::Summary(error));
        }
        if let Some(message) = frame.message
            && !message.content.is_empty()
        {
            sink(&message.content)?;
        }
        if frame.done {
            return Ok(());
        }
    }

    Err(Error::Summary("stream ended before completion".into()))
}

/// Summarizer backed by an Ollama server's streaming chat endpoint.
pub struct OllamaSummarizer {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
}

impl OllamaSummarizer {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    /// Configure from `DOCSIFT_OLLAMA_URL` and `DOCSIFT_SUMMARY_MODEL`,
    /// falling back to a local server and `llama3.2`.
    pub fn from_env() -> Self {
        let url = std::env::var(OLLAMA_URL_ENV_VAR)
            .unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string());
        let model = std::env::var(SUMMARY_MODEL_ENV_VAR)
            .unwrap_or_else(|_| DEFAULT_SUMMARY_MODEL.to_string());
        Self::new(url, model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Summarizer for OllamaSummarizer {
    fn summarize(
        &self,
        query: &str,
        results: &[SearchResult],
        sink: &mut dyn FnMut(&str) -> Result<()>,
    ) -> Result<()> {
        let prompt = build_prompt(query, results)?;
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: &prompt,
            }],
            stream: true,
        };

        let url = format!("{}/api/chat", self.base_url);
        debug!(url = %url, model = %self.model, "requesting summary");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Summary(format!("request to {url} failed: {e}")))?;

        read_stream(std::io::BufReader::new(response), sink)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::chunking::Chunk;

    fn collect(input: &str) -> Result<String> {
        let mut out = String::new();
        read_stream(Cursor::new(input.to_string()), &mut |piece: &str| -> Result<()> {
            out.push_str(piece);
            Ok(())
        })?;
        Ok(out)
    }

    #[test]
    fn stream_concatenates_until_done() {
        let input = concat!(
            r#"{"message":{"role":"assistant","content":"The wing "},"done":false}"#,
            "\n\n",
            r#"{"message":{"role":"assistant","content":"is stiff."},"done":false}"#,
            "\n",
            r#"{"message":{"role":"assistant","content":""},"done":true}"#,
            "\n",
            r#"{"message":{"role":"assistant","content":"ignored"},"done":false}"#,
            "\n",
        );
        assert_eq!(collect(input).unwrap(), "The wing is stiff.");
    }

    #[test]
    fn stream_error_frame_is_reported() {
        let input = r#"{"error":"model 'llama9' not found"}"#;
        let err = collect(input).unwrap_err();
        assert!(matches!(err, Error::Summary(msg) if msg.contains("llama9")));
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let input = r#"{"message":{"content":"partial"},"done":false}"#;
        assert!(matches!(collect(input), Err(Error::Summary(_))));
    }

    #[test]
    fn malformed_frame_is_an_error() {
        assert!(matches!(collect("not json\n"), Err(Error::Summary(_))));
    }

    #[test]
    fn sink_errors_stop_the_stream() {
        let input = r#"{"message":{"content":"x"},"done":false}"#;
        let result = read_stream(Cursor::new(input), &mut |_: &str| -> Result<()> {
            Err(Error::Summary("closed".into()))
        });
        assert!(matches!(result, Err(Error::Summary(msg)) if msg == "closed"));
    }

    #[test]
    fn prompt_embeds_results_as_json() {
        let results = vec![SearchResult {
            score: 0.5,
            chunk: Chunk {
                chunk_id: 3,
                start_word: 450,
                end_word: 649,
                text: "downforce".into(),
                file: Some("Data/aero/ks9.md".into()),
            },
        }];
        let prompt = build_prompt("wing load", &results).unwrap();
        assert!(prompt.starts_with("Query: wing load, Document: ["));
        assert!(prompt.contains(r#""text":"downforce""#));
        assert!(prompt.contains(r#""file":"Data/aero/ks9.md""#));
    }

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        let s = OllamaSummarizer::new("http://gpu-box:11434/", "mistral");
        assert_eq!(s.base_url, "http://gpu-box:11434");
        assert_eq!(s.model(), "mistral");
    }
}
