//! Answer generation from retrieved context.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::models::{Answer, GenerationConfig, RetrievedChunk};
use crate::utils::retry::{RetryConfig, with_retry};

const SYSTEM_INSTRUCTION: &str = "أنت مساعد يجيب عن الأسئلة اعتمادًا على المقاطع المرفقة من المصادر. \
أجب بالعربية الفصحى بإيجاز ودقة، وإذا لم تكن الإجابة واردة في المقاطع فصرّح بذلك.";

const UNGROUNDED_INSTRUCTION: &str = "أنت مساعد يجيب عن الأسئلة بالعربية الفصحى. \
لم يُعثر على مقاطع ذات صلة بهذا السؤال، فأجب من معرفتك العامة ونبّه إلى ذلك.";

/// A fully-assembled generation request.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// A pull-based sequence of incremental answer fragments. Finite (ends when
/// the backend signals completion) and not restartable; dropping it drops
/// the underlying connection.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

/// Text-generation backend seam.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String, GenerationError>;
    async fn complete_stream(&self, prompt: &Prompt) -> Result<FragmentStream, GenerationError>;
}

/// A streaming answer: fragment stream plus the grounding metadata that was
/// fixed at prompt-assembly time.
pub struct AnswerStream {
    pub grounded: bool,
    pub sources: Vec<String>,
    inner: FragmentStream,
}

impl Stream for AnswerStream {
    type Item = Result<String, GenerationError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Builds prompts from retrieved chunks and calls the generation backend.
pub struct Generator {
    backend: Arc<dyn GenerationBackend>,
    max_context_chars: usize,
}

struct AssembledPrompt {
    prompt: Prompt,
    context: String,
    sources: Vec<String>,
    grounded: bool,
}

impl Generator {
    pub fn new(backend: Arc<dyn GenerationBackend>, config: &GenerationConfig) -> Self {
        Self {
            backend,
            max_context_chars: config.max_context_chars as usize,
        }
    }

    /// Generate a complete answer. With no retrieved chunks the backend is
    /// still asked, but the result is flagged `grounded: false` so callers
    /// can warn that the answer is not source-backed.
    pub async fn answer(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
        include_context: bool,
    ) -> Result<Answer, GenerationError> {
        let assembled = self.assemble(question, chunks);
        let text = self.backend.complete(&assembled.prompt).await?;

        Ok(Answer {
            text,
            context: include_context.then_some(assembled.context),
            sources: assembled.sources,
            grounded: assembled.grounded,
        })
    }

    /// Streaming variant of [`answer`](Self::answer). Each call issues a new
    /// independent generation.
    pub async fn answer_stream(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
    ) -> Result<AnswerStream, GenerationError> {
        let assembled = self.assemble(question, chunks);
        let inner = self.backend.complete_stream(&assembled.prompt).await?;

        Ok(AnswerStream {
            grounded: assembled.grounded,
            sources: assembled.sources,
            inner,
        })
    }

    /// Assemble the prompt. Chunks arrive in descending relevance order;
    /// when the combined context would exceed the character budget, the
    /// lowest-scoring chunks are dropped whole, never cut mid-text.
    fn assemble(&self, question: &str, chunks: &[RetrievedChunk]) -> AssembledPrompt {
        let mut context = String::new();
        let mut sources = Vec::new();

        for chunk in chunks {
            let addition = chunk.text.chars().count() + 2;
            if !context.is_empty() && context.chars().count() + addition > self.max_context_chars {
                break;
            }
            if !context.is_empty() {
                context.push_str("\n\n");
            }
            context.push_str(&chunk.text);
            if !sources.contains(&chunk.source) {
                sources.push(chunk.source.clone());
            }
        }

        let grounded = !context.is_empty();
        let prompt = if grounded {
            Prompt {
                system: SYSTEM_INSTRUCTION.to_string(),
                user: format!("المقاطع:\n{}\n\nالسؤال: {}", context, question),
            }
        } else {
            Prompt {
                system: UNGROUNDED_INSTRUCTION.to_string(),
                user: format!("السؤال: {}", question),
            }
        };

        AssembledPrompt {
            prompt,
            context,
            sources,
            grounded,
        }
    }
}

// --- OpenAI-compatible HTTP backend -------------------------------------

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    choices: Vec<ChatStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    delta: ChatStreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct ChatStreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions backend speaking the OpenAI wire format (Ollama, vLLM,
/// and hosted endpoints alike). Every request carries the configured
/// deadline; exceeding it surfaces as a typed timeout.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_answer_tokens: u32,
}

impl HttpBackend {
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(GenerationError::RequestError)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config
                .api_key
                .clone()
                .or_else(|| std::env::var("MURSHID_GENERATION_API_KEY").ok()),
            max_answer_tokens: config.max_answer_tokens,
        })
    }

    async fn send(
        &self,
        prompt: &Prompt,
        stream: bool,
    ) -> Result<reqwest::Response, GenerationError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            max_tokens: self.max_answer_tokens,
            stream,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout
            } else {
                GenerationError::RequestError(e)
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Backend(format!(
                "status {}: {}",
                status, body
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    async fn complete(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        // Transient backend failures (timeouts, 5xx, 429) are retried with
        // backoff; the retrieved context is reused as-is.
        with_retry(&RetryConfig::new(3), || async {
            let response = self.send(prompt, false).await?;
            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

            parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| {
                    GenerationError::InvalidResponse("no choices in response".to_string())
                })
        })
        .await
        .into_result()
    }

    async fn complete_stream(&self, prompt: &Prompt) -> Result<FragmentStream, GenerationError> {
        let response = self.send(prompt, true).await?;
        Ok(sse_fragments(response))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>;

struct SseState {
    bytes: ByteStream,
    buffer: String,
    pending: VecDeque<String>,
    done: bool,
}

/// Decode an SSE chat-completions body into text fragments. The stream ends
/// at the `[DONE]` marker; dropping it drops the HTTP response and releases
/// the connection.
fn sse_fragments(response: reqwest::Response) -> FragmentStream {
    let state = SseState {
        bytes: Box::pin(response.bytes_stream()),
        buffer: String::new(),
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(fragment) = st.pending.pop_front() {
                return Some((Ok(fragment), st));
            }
            if st.done {
                return None;
            }

            match st.bytes.next().await {
                Some(Ok(bytes)) => {
                    st.buffer.push_str(&String::from_utf8_lossy(&bytes));
                    while let Some(pos) = st.buffer.find('\n') {
                        let line: String = st.buffer.drain(..=pos).collect();
                        let line = line.trim();
                        let Some(data) = line.strip_prefix("data:") else {
                            continue;
                        };
                        let data = data.trim();
                        if data == "[DONE]" {
                            st.done = true;
                            break;
                        }
                        match serde_json::from_str::<ChatStreamChunk>(data) {
                            Ok(chunk) => {
                                if let Some(text) = chunk
                                    .choices
                                    .into_iter()
                                    .next()
                                    .and_then(|c| c.delta.content)
                                    && !text.is_empty()
                                {
                                    st.pending.push_back(text);
                                }
                            }
                            Err(e) => {
                                st.done = true;
                                return Some((
                                    Err(GenerationError::InvalidResponse(e.to_string())),
                                    st,
                                ));
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    st.done = true;
                    let error = if e.is_timeout() {
                        GenerationError::Timeout
                    } else {
                        GenerationError::RequestError(e)
                    };
                    return Some((Err(error), st));
                }
                None => {
                    st.done = true;
                    return None;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::retry::Retryable;

    struct EchoBackend;

    // Returns the prompt back so tests can assert on assembly
    #[async_trait]
    impl GenerationBackend for EchoBackend {
        async fn complete(&self, prompt: &Prompt) -> Result<String, GenerationError> {
            Ok(prompt.user.clone())
        }

        async fn complete_stream(
            &self,
            prompt: &Prompt,
        ) -> Result<FragmentStream, GenerationError> {
            let fragments: Vec<Result<String, GenerationError>> = prompt
                .user
                .split_whitespace()
                .map(|w| Ok(w.to_string()))
                .collect();
            Ok(Box::pin(stream::iter(fragments)))
        }
    }

    fn chunk(source: &str, text: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: format!("{}#{}", source, score),
            text: text.to_string(),
            source: source.to_string(),
            score,
        }
    }

    fn generator(max_context_chars: u32) -> Generator {
        let config = GenerationConfig {
            max_context_chars,
            ..Default::default()
        };
        Generator::new(Arc::new(EchoBackend), &config)
    }

    #[tokio::test]
    async fn test_answer_is_grounded_with_chunks() {
        let g = generator(1000);
        let chunks = vec![chunk("lesson-01.txt", "الفاعل اسم مرفوع", 0.9)];
        let answer = g.answer("ما هو الفاعل؟", &chunks, true).await.unwrap();

        assert!(answer.grounded);
        assert_eq!(answer.sources, vec!["lesson-01.txt".to_string()]);
        assert_eq!(answer.context.as_deref(), Some("الفاعل اسم مرفوع"));
        assert!(answer.text.contains("الفاعل اسم مرفوع"));
        assert!(answer.text.contains("ما هو الفاعل؟"));
    }

    #[tokio::test]
    async fn test_answer_without_chunks_is_ungrounded() {
        let g = generator(1000);
        let answer = g.answer("ما هو الفاعل؟", &[], false).await.unwrap();

        assert!(!answer.grounded);
        assert!(answer.sources.is_empty());
        // The backend is still asked the question
        assert!(answer.text.contains("ما هو الفاعل؟"));
    }

    #[tokio::test]
    async fn test_truncation_drops_lowest_scoring_chunks_whole() {
        // Budget fits the first chunk but not both
        let g = generator(30);
        let chunks = vec![
            chunk("a.txt", "أول مقطع وهو الأعلى صلة", 0.9),
            chunk("b.txt", "مقطع ثان أقل صلة يسقط كاملا", 0.4),
        ];
        let answer = g.answer("سؤال", &chunks, true).await.unwrap();

        let context = answer.context.unwrap();
        assert_eq!(context, "أول مقطع وهو الأعلى صلة");
        assert_eq!(answer.sources, vec!["a.txt".to_string()]);
        assert!(answer.grounded);
    }

    #[tokio::test]
    async fn test_first_chunk_kept_even_when_over_budget() {
        // A single over-budget chunk is never cut mid-text
        let g = generator(5);
        let chunks = vec![chunk("a.txt", "مقطع أطول من الميزانية المحددة", 0.9)];
        let answer = g.answer("سؤال", &chunks, true).await.unwrap();
        assert_eq!(
            answer.context.as_deref(),
            Some("مقطع أطول من الميزانية المحددة")
        );
    }

    #[tokio::test]
    async fn test_stream_yields_fragments_and_terminates() {
        let g = generator(1000);
        let chunks = vec![chunk("a.txt", "سياق", 0.8)];
        let mut stream = g.answer_stream("سؤال", &chunks).await.unwrap();

        assert!(stream.grounded);
        let mut fragments = Vec::new();
        while let Some(fragment) = stream.next().await {
            fragments.push(fragment.unwrap());
        }
        assert!(!fragments.is_empty());
    }

    #[test]
    fn test_timeout_is_retryable_backend_error_is_not() {
        assert!(GenerationError::Timeout.is_retryable());
        assert!(!GenerationError::Backend("status 400: bad request".to_string()).is_retryable());
        assert!(GenerationError::Backend("status 503: unavailable".to_string()).is_retryable());
        assert!(!GenerationError::InvalidResponse("garbage".to_string()).is_retryable());
    }

    #[test]
    fn test_sse_line_parsing_shape() {
        let chunk: ChatStreamChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"مر"}}]}"#).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("مر"));

        let finish: ChatStreamChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#).unwrap();
        assert!(finish.choices[0].delta.content.is_none());
    }
}
