use crate::error::ApiError;

/// Maximum message length in characters
const MAX_MESSAGE_LENGTH: usize = 4000;
/// Maximum conversation id length
const MAX_CONVERSATION_ID_LENGTH: usize = 128;

/// Validate a chat message
pub fn validate_chat_request(message: &str) -> Result<(), ApiError> {
    if message.trim().is_empty() {
        return Err(ApiError::InvalidInput("Message cannot be empty".to_string()));
    }
    if message.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Message too long (max {} characters)",
            MAX_MESSAGE_LENGTH
        )));
    }
    Ok(())
}

/// Validate conversation id format: ASCII letters, digits, `-` and `_`
pub fn validate_conversation_id(id: &str) -> Result<(), ApiError> {
    if id.is_empty() || id.len() > MAX_CONVERSATION_ID_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Conversation id must be 1-{} characters",
            MAX_CONVERSATION_ID_LENGTH
        )));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(ApiError::InvalidInput(format!(
            "Invalid conversation id format: {}",
            id
        )));
    }
    Ok(())
}
