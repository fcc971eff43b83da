use async_openai::{
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse,
    },
};
use serde_json::Value;

use common::error::AppError;
use vector_index::ScoredChunk;

use crate::memory::{format_history, ChatTurn};

pub const ANSWER_SYSTEM_PROMPT: &str = "You answer questions about uploaded documents. \
Ground every answer in the provided context chunks; when the context does not contain \
the answer, say so instead of speculating. Keep answers short and factual.";

/// Serialises retrieved chunks into the JSON context block the model sees.
pub fn chunks_to_chat_context(chunks: &[ScoredChunk]) -> Value {
    fn round_score(value: f32) -> f64 {
        (f64::from(value) * 1000.0).round() / 1000.0
    }

    serde_json::json!(chunks
        .iter()
        .map(|chunk| {
            serde_json::json!({
                "id": chunk.id,
                "content": chunk.text,
                "score": round_score(chunk.score),
            })
        })
        .collect::<Vec<_>>())
}

pub fn create_user_message_with_history(
    context_json: &Value,
    history: &[ChatTurn],
    query: &str,
) -> String {
    format!(
        r"
        Chat history:
        ==================
        {}

        Context Information:
        ==================
        {}

        User Question:
        ==================
        {}
        ",
        format_history(history),
        context_json,
        query
    )
}

pub fn create_chat_request(
    user_message: String,
    model: &str,
) -> Result<CreateChatCompletionRequest, OpenAIError> {
    CreateChatCompletionRequestArgs::default()
        .model(model)
        .messages([
            ChatCompletionRequestSystemMessage::from(ANSWER_SYSTEM_PROMPT).into(),
            ChatCompletionRequestUserMessage::from(user_message).into(),
        ])
        .build()
}

/// Pulls the answer text out of the completion response.
pub fn process_llm_response(
    response: CreateChatCompletionResponse,
) -> Result<String, AppError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .ok_or(AppError::Processing(
            "No content found in LLM response".into(),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ChatMemory;

    fn sample_chunks() -> Vec<ScoredChunk> {
        vec![
            ScoredChunk {
                id: "chunk-1".into(),
                text: "Revenue increased 10%.".into(),
                score: 0.91234,
            },
            ScoredChunk {
                id: "chunk-2".into(),
                text: "Expenses decreased.".into(),
                score: 0.4,
            },
        ]
    }

    #[test]
    fn test_context_json_carries_content_and_rounded_scores() {
        let context = chunks_to_chat_context(&sample_chunks());
        let entries = context.as_array().expect("array context");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["content"], "Revenue increased 10%.");
        assert_eq!(entries[0]["score"], 0.912);
    }

    #[test]
    fn test_user_message_includes_history_context_and_question() {
        let mut memory = ChatMemory::new();
        memory.record_exchange("Earlier question?", "Earlier answer.");

        let context = chunks_to_chat_context(&sample_chunks());
        let message = create_user_message_with_history(
            &context,
            memory.turns(),
            "What happened to revenue?",
        );

        assert!(message.contains("User: Earlier question?"));
        assert!(message.contains("Revenue increased 10%."));
        assert!(message.contains("What happened to revenue?"));
    }

    #[test]
    fn test_chat_request_includes_system_prompt_and_model() {
        let request =
            create_chat_request("hello".into(), "gpt-4o-mini").expect("build request");
        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.messages.len(), 2);
    }

    #[test]
    fn test_response_content_is_extracted_and_trimmed() {
        let response: CreateChatCompletionResponse = serde_json::from_value(serde_json::json!({
            "id": "chatcmpl-test",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "finish_reason": "stop",
                "message": {
                    "role": "assistant",
                    "content": "  Revenue increased 10%.  "
                }
            }]
        }))
        .expect("deserialize response");

        let answer = process_llm_response(response).expect("extract answer");
        assert_eq!(answer, "Revenue increased 10%.");
    }

    #[test]
    fn test_response_without_choices_is_an_error() {
        let response: CreateChatCompletionResponse = serde_json::from_value(serde_json::json!({
            "id": "chatcmpl-test",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4o-mini",
            "choices": []
        }))
        .expect("deserialize response");

        assert!(matches!(
            process_llm_response(response),
            Err(AppError::Processing(_))
        ));
    }
}
