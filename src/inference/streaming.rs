//! SSE response parsing for both provider wire formats.
//!
//! A provider response body is split into SSE events (`data: …\n\n`), and each
//! event's data payload is handed to a provider-specific [`SseDecoder`] which
//! accumulates tool call fragments across deltas and emits `StreamChunk`s.
//! Non-streaming bodies are parsed by the `parse_*_response` helpers at the
//! bottom of this file into the same `StreamChunk` shape.

use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use super::errors::ProviderError;
use super::tool_call_parser::{
    generate_call_id, parse_native_json_tool_call, parse_text_tool_calls, ToolCallFormat,
};
use super::types::{ChatCompletionChunk, StreamChunk, ToolCall};

// ─── SSE framing ─────────────────────────────────────────────────────────────

/// Provider-specific interpretation of SSE data payloads.
pub trait SseDecoder {
    /// Handle one event's joined `data:` payload.
    ///
    /// Returns `Ok(None)` for events that carry nothing for the caller
    /// (keep-alives, bookkeeping events).
    fn process_data(&mut self, data: &str) -> Result<Option<StreamChunk>, ProviderError>;

    /// Called once when the body ends; flushes anything still pending.
    fn finish(&mut self) -> Result<Option<StreamChunk>, ProviderError>;
}

/// Decode a streaming HTTP response with the given decoder.
pub fn decode_sse_response<D>(
    response: reqwest::Response,
    decoder: D,
) -> impl Stream<Item = Result<StreamChunk, ProviderError>>
where
    D: SseDecoder,
{
    decode_sse_bytes(Box::pin(response.bytes_stream()), decoder)
}

/// Where the SSE reader is in the body.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Reading,
    Flushing,
    Done,
}

struct SseState<S, D> {
    byte_stream: S,
    decoder: D,
    /// Raw bytes not yet framed into events. Decoded only per complete event,
    /// so a character split across reads stays intact.
    buffer: Vec<u8>,
    phase: Phase,
}

/// Decode any byte stream of SSE events.
///
/// Events are split on blank lines; `\r\n` line endings are normalized first
/// so a boundary split across two reads is still found.
pub fn decode_sse_bytes<S, B, E, D>(
    byte_stream: S,
    decoder: D,
) -> impl Stream<Item = Result<StreamChunk, ProviderError>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    D: SseDecoder,
{
    let state = SseState {
        byte_stream,
        decoder,
        buffer: Vec::new(),
        phase: Phase::Reading,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            match st.phase {
                Phase::Done => return None,
                Phase::Flushing => {
                    st.phase = Phase::Done;
                    return match st.decoder.finish() {
                        Ok(Some(chunk)) => Some((Ok(chunk), st)),
                        Ok(None) => None,
                        Err(e) => Some((Err(e), st)),
                    };
                }
                Phase::Reading => {}
            }

            if let Some(event_end) = find_event_end(&st.buffer) {
                let raw: Vec<u8> = st.buffer.drain(..event_end + 2).collect();
                let event = String::from_utf8_lossy(&raw);
                match process_event(&mut st.decoder, &event) {
                    Ok(Some(chunk)) => return Some((Ok(chunk), st)),
                    Ok(None) => continue,
                    Err(e) => return Some((Err(e), st)),
                }
            }

            match st.byte_stream.next().await {
                Some(Ok(bytes)) => {
                    // CR only ever appears as a line ending; dropping it turns
                    // `\r\n` into `\n` even when the pair is split across reads.
                    st.buffer
                        .extend(bytes.as_ref().iter().copied().filter(|&b| b != b'\r'));
                }
                Some(Err(e)) => {
                    st.phase = Phase::Done;
                    return Some((
                        Err(ProviderError::StreamError {
                            reason: format!("stream read error: {e}"),
                        }),
                        st,
                    ));
                }
                None => {
                    // Trailing event without a blank line, then the decoder flush.
                    st.phase = Phase::Flushing;
                    let raw = std::mem::take(&mut st.buffer);
                    let rest = String::from_utf8_lossy(&raw);
                    if !rest.trim().is_empty() {
                        match process_event(&mut st.decoder, &rest) {
                            Ok(Some(chunk)) => return Some((Ok(chunk), st)),
                            Ok(None) => {}
                            Err(e) => {
                                st.phase = Phase::Done;
                                return Some((Err(e), st));
                            }
                        }
                    }
                }
            }
        }
    })
}

/// Offset of the blank line that ends the first complete event.
fn find_event_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

/// Join the `data:` lines of one SSE event and pass them to the decoder.
fn process_event<D: SseDecoder>(
    decoder: &mut D,
    event: &str,
) -> Result<Option<StreamChunk>, ProviderError> {
    let mut data = String::new();
    for line in event.lines() {
        if let Some(payload) = line.strip_prefix("data:") {
            data.push_str(payload.strip_prefix(' ').unwrap_or(payload));
        }
    }

    if data.trim().is_empty() {
        return Ok(None);
    }
    decoder.process_data(data.trim())
}

// ─── OpenAI-compatible decoder ───────────────────────────────────────────────

/// Accumulates OpenAI `chat.completion.chunk` deltas.
pub struct OpenAiStreamDecoder {
    tool_call_format: ToolCallFormat,
    /// Text seen so far, for text-based tool call formats.
    accumulated_content: String,
    /// In-progress tool calls: `(index, id, name, arguments_buffer)`.
    pending_tool_calls: Vec<(u32, Option<String>, String, String)>,
    /// Set once `[DONE]` or a terminal chunk has been handled.
    done: bool,
}

impl OpenAiStreamDecoder {
    pub fn new(tool_call_format: ToolCallFormat) -> Self {
        Self {
            tool_call_format,
            accumulated_content: String::new(),
            pending_tool_calls: Vec::new(),
            done: false,
        }
    }

    fn process_chunk(&mut self, chunk: ChatCompletionChunk) -> Result<Option<StreamChunk>, ProviderError> {
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(None);
        };

        let mut result = StreamChunk {
            token: None,
            tool_calls: None,
            finish_reason: choice.finish_reason.clone(),
        };

        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                self.accumulated_content.push_str(&content);
                result.token = Some(content);
            }
        }

        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let index = tc.index.unwrap_or(0);
            let (name_part, args_part) = match tc.function {
                Some(f) => (f.name.unwrap_or_default(), f.arguments.unwrap_or_default()),
                None => (String::new(), String::new()),
            };

            match self
                .pending_tool_calls
                .iter_mut()
                .find(|(idx, _, _, _)| *idx == index)
            {
                Some((_, id, name, args)) => {
                    name.push_str(&name_part);
                    args.push_str(&args_part);
                    if tc.id.is_some() {
                        *id = tc.id;
                    }
                }
                None => self
                    .pending_tool_calls
                    .push((index, tc.id, name_part, args_part)),
            }
        }

        // Some compatible endpoints finish tool turns with "stop", so any
        // finish reason flushes pending native calls.
        if result.finish_reason.is_some() {
            let calls = self.take_tool_calls()?;
            if !calls.is_empty() {
                result.tool_calls = Some(calls);
                result.finish_reason = Some("tool_calls".into());
            }
            self.done = true;
        }

        Ok(Some(result))
    }

    /// Complete every pending native call, or fall back to text parsing.
    fn take_tool_calls(&mut self) -> Result<Vec<ToolCall>, ProviderError> {
        let pending = std::mem::take(&mut self.pending_tool_calls);
        if !pending.is_empty() {
            return pending
                .into_iter()
                .map(|(_, id, name, args)| parse_native_json_tool_call(id.as_deref(), &name, &args))
                .collect();
        }
        let text = std::mem::take(&mut self.accumulated_content);
        parse_text_tool_calls(self.tool_call_format, &text)
    }
}

impl SseDecoder for OpenAiStreamDecoder {
    fn process_data(&mut self, data: &str) -> Result<Option<StreamChunk>, ProviderError> {
        if data == "[DONE]" {
            return self.finish();
        }

        let chunk: ChatCompletionChunk =
            serde_json::from_str(data).map_err(|e| ProviderError::StreamError {
                reason: format!("failed to parse SSE chunk: {e} (data: {data})"),
            })?;

        self.process_chunk(chunk)
    }

    fn finish(&mut self) -> Result<Option<StreamChunk>, ProviderError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let calls = self.take_tool_calls()?;
        if calls.is_empty() {
            return Ok(None);
        }
        Ok(Some(StreamChunk {
            token: None,
            tool_calls: Some(calls),
            finish_reason: Some("tool_calls".into()),
        }))
    }
}

// ─── Anthropic decoder ───────────────────────────────────────────────────────

/// Accumulates Anthropic Messages API stream events.
///
/// Event types handled: `content_block_start`, `content_block_delta`
/// (`text_delta` / `input_json_delta`), `content_block_stop`,
/// `message_delta` and `error`. Everything else is bookkeeping.
#[derive(Default)]
pub struct AnthropicStreamDecoder {
    /// In-progress `tool_use` blocks: `(index, id, name, partial_json)`.
    pending_tool_uses: Vec<(u64, String, String, String)>,
}

impl AnthropicStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SseDecoder for AnthropicStreamDecoder {
    fn process_data(&mut self, data: &str) -> Result<Option<StreamChunk>, ProviderError> {
        let event: serde_json::Value =
            serde_json::from_str(data).map_err(|e| ProviderError::StreamError {
                reason: format!("failed to parse SSE event: {e} (data: {data})"),
            })?;

        let index = event["index"].as_u64().unwrap_or(0);

        match event["type"].as_str().unwrap_or_default() {
            "content_block_start" => {
                let block = &event["content_block"];
                match block["type"].as_str() {
                    Some("tool_use") => {
                        self.pending_tool_uses.push((
                            index,
                            block["id"].as_str().map(String::from).unwrap_or_else(generate_call_id),
                            block["name"].as_str().unwrap_or_default().to_string(),
                            String::new(),
                        ));
                        Ok(None)
                    }
                    Some("text") => Ok(text_chunk(block["text"].as_str())),
                    _ => Ok(None),
                }
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => Ok(text_chunk(delta["text"].as_str())),
                    Some("input_json_delta") => {
                        if let Some(pending) = self
                            .pending_tool_uses
                            .iter_mut()
                            .find(|(idx, _, _, _)| *idx == index)
                        {
                            pending.3.push_str(delta["partial_json"].as_str().unwrap_or_default());
                        }
                        Ok(None)
                    }
                    _ => Ok(None),
                }
            }
            "content_block_stop" => {
                let Some(pos) = self
                    .pending_tool_uses
                    .iter()
                    .position(|(idx, _, _, _)| *idx == index)
                else {
                    return Ok(None);
                };
                let (_, id, name, args) = self.pending_tool_uses.remove(pos);
                let call = parse_native_json_tool_call(Some(&id), &name, &args)?;
                Ok(Some(StreamChunk {
                    token: None,
                    tool_calls: Some(vec![call]),
                    finish_reason: None,
                }))
            }
            "message_delta" => Ok(event["delta"]["stop_reason"].as_str().map(|reason| StreamChunk {
                token: None,
                tool_calls: None,
                finish_reason: Some(map_anthropic_stop_reason(reason)),
            })),
            "error" => Err(ProviderError::StreamError {
                reason: format!(
                    "{}: {}",
                    event["error"]["type"].as_str().unwrap_or("error"),
                    event["error"]["message"].as_str().unwrap_or("unknown stream error")
                ),
            }),
            _ => Ok(None),
        }
    }

    fn finish(&mut self) -> Result<Option<StreamChunk>, ProviderError> {
        // A body cut off mid tool_use still yields whatever arrived complete.
        let pending = std::mem::take(&mut self.pending_tool_uses);
        if pending.is_empty() {
            return Ok(None);
        }
        let calls = pending
            .into_iter()
            .map(|(_, id, name, args)| parse_native_json_tool_call(Some(&id), &name, &args))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(StreamChunk {
            token: None,
            tool_calls: Some(calls),
            finish_reason: Some("tool_calls".into()),
        }))
    }
}

fn text_chunk(text: Option<&str>) -> Option<StreamChunk> {
    text.filter(|t| !t.is_empty()).map(|t| StreamChunk {
        token: Some(t.to_string()),
        tool_calls: None,
        finish_reason: None,
    })
}

/// Normalize Anthropic stop reasons onto the OpenAI vocabulary.
fn map_anthropic_stop_reason(reason: &str) -> String {
    match reason {
        "tool_use" => "tool_calls".into(),
        "end_turn" | "stop_sequence" => "stop".into(),
        "max_tokens" => "length".into(),
        other => other.to_string(),
    }
}

// ─── Non-streaming bodies ────────────────────────────────────────────────────

/// Parse a non-streaming OpenAI-compatible response body.
pub fn parse_openai_response(
    body: &str,
    format: ToolCallFormat,
) -> Result<StreamChunk, ProviderError> {
    #[derive(Deserialize)]
    struct Response {
        choices: Vec<Choice>,
    }

    #[derive(Deserialize)]
    struct Choice {
        message: ResponseMessage,
        finish_reason: Option<String>,
    }

    #[derive(Deserialize)]
    struct ResponseMessage {
        content: Option<String>,
        tool_calls: Option<Vec<ResponseToolCall>>,
    }

    #[derive(Deserialize)]
    struct ResponseToolCall {
        id: Option<String>,
        function: ResponseFunction,
    }

    #[derive(Deserialize)]
    struct ResponseFunction {
        name: String,
        #[serde(default)]
        arguments: String,
    }

    let resp: Response = serde_json::from_str(body).map_err(|e| ProviderError::StreamError {
        reason: format!("failed to parse response: {e}"),
    })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(ProviderError::StreamError {
            reason: "empty choices array".into(),
        })?;

    let content = choice.message.content.filter(|c| !c.is_empty());

    let mut tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| parse_native_json_tool_call(tc.id.as_deref(), &tc.function.name, &tc.function.arguments))
        .collect::<Result<Vec<_>, _>>()?;

    if tool_calls.is_empty() {
        if let Some(ref text) = content {
            tool_calls = parse_text_tool_calls(format, text)?;
        }
    }

    let finish_reason = if tool_calls.is_empty() {
        choice.finish_reason
    } else {
        Some("tool_calls".into())
    };

    Ok(StreamChunk {
        token: content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        finish_reason,
    })
}

/// Parse a non-streaming Anthropic Messages response body.
pub fn parse_anthropic_response(body: &str) -> Result<StreamChunk, ProviderError> {
    #[derive(Deserialize)]
    struct Response {
        #[serde(default)]
        content: Vec<Block>,
        stop_reason: Option<String>,
    }

    #[derive(Deserialize)]
    struct Block {
        r#type: String,
        text: Option<String>,
        id: Option<String>,
        name: Option<String>,
        input: Option<serde_json::Value>,
    }

    let resp: Response = serde_json::from_str(body).map_err(|e| ProviderError::StreamError {
        reason: format!("failed to parse response: {e}"),
    })?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in resp.content {
        match block.r#type.as_str() {
            "text" => text.push_str(block.text.as_deref().unwrap_or_default()),
            "tool_use" => {
                let name = block.name.unwrap_or_default();
                if name.is_empty() {
                    return Err(ProviderError::ToolCallParseError {
                        raw_response: body.to_string(),
                        reason: "tool_use block without a name".into(),
                    });
                }
                tool_calls.push(ToolCall {
                    id: block.id.unwrap_or_else(generate_call_id),
                    name,
                    arguments: block
                        .input
                        .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
                });
            }
            _ => {}
        }
    }

    let finish_reason = if tool_calls.is_empty() {
        resp.stop_reason.as_deref().map(map_anthropic_stop_reason)
    } else {
        Some("tool_calls".into())
    };

    Ok(StreamChunk {
        token: (!text.is_empty()).then_some(text),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        finish_reason,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn collect<D: SseDecoder>(body: &str, decoder: D, split_at: usize) -> Vec<StreamChunk> {
        let (a, b) = body.split_at(split_at);
        let parts: Vec<Result<Vec<u8>, String>> =
            vec![Ok(a.as_bytes().to_vec()), Ok(b.as_bytes().to_vec())];
        let stream = decode_sse_bytes(stream::iter(parts), decoder);
        futures::executor::block_on(stream.collect::<Vec<_>>())
            .into_iter()
            .map(|r| r.unwrap())
            .collect()
    }

    fn collect_bytes<D: SseDecoder>(body: &[u8], decoder: D, split_at: usize) -> Vec<StreamChunk> {
        let (a, b) = body.split_at(split_at);
        let parts: Vec<Result<Vec<u8>, String>> = vec![Ok(a.to_vec()), Ok(b.to_vec())];
        let stream = decode_sse_bytes(stream::iter(parts), decoder);
        futures::executor::block_on(stream.collect::<Vec<_>>())
            .into_iter()
            .map(|r| r.unwrap())
            .collect()
    }

    fn text_of(chunks: &[StreamChunk]) -> String {
        chunks.iter().filter_map(|c| c.token.as_deref()).collect()
    }

    const OPENAI_TEXT_STREAM: &str = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
        ": keep-alive\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );

    #[test]
    fn test_openai_stream_text_in_order() {
        for split in [1, 17, 60, OPENAI_TEXT_STREAM.len() - 3] {
            let chunks = collect(OPENAI_TEXT_STREAM, OpenAiStreamDecoder::new(ToolCallFormat::NativeJson), split);
            assert_eq!(text_of(&chunks), "Hello", "split at {split}");
            assert_eq!(chunks.last().unwrap().finish_reason.as_deref(), Some("stop"));
        }
    }

    #[test]
    fn test_openai_stream_crlf_boundaries() {
        let body = OPENAI_TEXT_STREAM.replace('\n', "\r\n");
        let chunks = collect(&body, OpenAiStreamDecoder::new(ToolCallFormat::NativeJson), 40);
        assert_eq!(text_of(&chunks), "Hello");
    }

    #[test]
    fn test_openai_stream_multibyte_char_split_across_reads() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"こんにちは\"},\"finish_reason\":null}]}\n\n",
            "data: [DONE]\n\n",
        )
        .as_bytes();
        let start = body.windows(3).position(|w| w == "こ".as_bytes()).unwrap();
        for split in [start + 1, start + 2, start + 4] {
            let chunks = collect_bytes(body, OpenAiStreamDecoder::new(ToolCallFormat::NativeJson), split);
            assert_eq!(text_of(&chunks), "こんにちは", "split at {split}");
        }
    }

    #[test]
    fn test_openai_stream_crlf_pair_split_across_reads() {
        let body = OPENAI_TEXT_STREAM.replace('\n', "\r\n");
        let first_cr = body.find('\r').unwrap();
        let chunks = collect_bytes(body.as_bytes(), OpenAiStreamDecoder::new(ToolCallFormat::NativeJson), first_cr + 1);
        assert_eq!(text_of(&chunks), "Hello");
    }

    #[test]
    fn test_openai_stream_accumulates_tool_call_deltas() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"fs__read_file\",\"arguments\":\"\"}}]},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"path\\\":\"}}]},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"X\\\"}\"}}]},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        let chunks = collect(body, OpenAiStreamDecoder::new(ToolCallFormat::NativeJson), 100);
        let calls: Vec<&ToolCall> = chunks
            .iter()
            .filter_map(|c| c.tool_calls.as_ref())
            .flatten()
            .collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "fs__read_file");
        assert_eq!(calls[0].arguments["path"], "X");
    }

    #[test]
    fn test_openai_stream_tool_call_with_stop_finish_reason() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c\",\"function\":{\"name\":\"date__get_today\",\"arguments\":\"{}\"}}]},\"finish_reason\":\"stop\"}]}\n\n",
        );
        let chunks = collect(body, OpenAiStreamDecoder::new(ToolCallFormat::NativeJson), 5);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(chunks[0].tool_calls.as_ref().unwrap()[0].name, "date__get_today");
    }

    #[test]
    fn test_openai_stream_pythonic_calls_flushed_at_end() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Tool: date__get_today\\n\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Arguments: {}\"},\"finish_reason\":null}]}\n\n",
        );
        let chunks = collect(body, OpenAiStreamDecoder::new(ToolCallFormat::Pythonic), 30);
        let last = chunks.last().unwrap();
        assert_eq!(last.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(last.tool_calls.as_ref().unwrap()[0].name, "date__get_today");
    }

    #[test]
    fn test_openai_stream_bad_json_is_error() {
        let mut decoder = OpenAiStreamDecoder::new(ToolCallFormat::NativeJson);
        assert!(decoder.process_data("{not json").is_err());
    }

    #[test]
    fn test_anthropic_stream_text_and_tool_use() {
        let body = concat!(
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\"}}\n\n",
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Checking\"}}\n\n",
            "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"fs__read_file\",\"input\":{}}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"path\\\": \"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"\\\"X\\\"}\"}}\n\n",
            "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":1}\n\n",
            "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        );
        let chunks = collect(body, AnthropicStreamDecoder::new(), 200);
        assert_eq!(text_of(&chunks), "Checking");
        let call = chunks
            .iter()
            .find_map(|c| c.tool_calls.as_ref())
            .map(|calls| calls[0].clone())
            .unwrap();
        assert_eq!(call.id, "toolu_1");
        assert_eq!(call.arguments["path"], "X");
        assert_eq!(chunks.last().unwrap().finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn test_anthropic_stream_error_event() {
        let mut decoder = AnthropicStreamDecoder::new();
        let err = decoder
            .process_data(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("overloaded_error"));
    }

    #[test]
    fn test_parse_openai_response_text() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Hello"},"finish_reason":"stop"}]}"#;
        let chunk = parse_openai_response(body, ToolCallFormat::NativeJson).unwrap();
        assert_eq!(chunk.token.as_deref(), Some("Hello"));
        assert!(chunk.tool_calls.is_none());
    }

    #[test]
    fn test_parse_openai_response_tool_calls() {
        let body = r#"{
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "fs__read_file", "arguments": "{\"path\": \"X\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;
        let chunk = parse_openai_response(body, ToolCallFormat::NativeJson).unwrap();
        let calls = chunk.tool_calls.unwrap();
        assert_eq!(calls[0].id, "call_abc");
        assert_eq!(calls[0].arguments["path"], "X");
    }

    #[test]
    fn test_parse_openai_response_empty_choices() {
        assert!(parse_openai_response(r#"{"choices": []}"#, ToolCallFormat::NativeJson).is_err());
    }

    #[test]
    fn test_streaming_and_batch_give_same_text() {
        let batch = parse_openai_response(
            r#"{"choices":[{"message":{"content":"Hello"},"finish_reason":"stop"}]}"#,
            ToolCallFormat::NativeJson,
        )
        .unwrap();
        let streamed = collect(OPENAI_TEXT_STREAM, OpenAiStreamDecoder::new(ToolCallFormat::NativeJson), 33);
        assert_eq!(batch.token.unwrap(), text_of(&streamed));
    }

    #[test]
    fn test_parse_anthropic_response() {
        let body = r#"{
            "content": [
                {"type": "text", "text": "Let me look."},
                {"type": "tool_use", "id": "toolu_9", "name": "fs__read_file", "input": {"path": "X"}}
            ],
            "stop_reason": "tool_use"
        }"#;
        let chunk = parse_anthropic_response(body).unwrap();
        assert_eq!(chunk.token.as_deref(), Some("Let me look."));
        assert_eq!(chunk.tool_calls.as_ref().unwrap()[0].id, "toolu_9");
        assert_eq!(chunk.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn test_parse_anthropic_response_end_turn() {
        let body = r#"{"content":[{"type":"text","text":"4"}],"stop_reason":"end_turn"}"#;
        let chunk = parse_anthropic_response(body).unwrap();
        assert_eq!(chunk.token.as_deref(), Some("4"));
        assert_eq!(chunk.finish_reason.as_deref(), Some("stop"));
    }
}
