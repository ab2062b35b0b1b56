//! Character-length token proxy.
//!
//! Deliberately not a real tokenizer: estimates are a char-length sum over
//! message/choice content, which is monotone and non-negative — the only
//! properties the scheduler relies on. Missing fields count as zero and
//! never fail.

use serde_json::Value;

/// Sum of `len(content)` over `payload.messages[*].content`.
pub fn input_tokens(payload: &Value) -> u64 {
    payload
        .get("messages")
        .and_then(Value::as_array)
        .map(|messages| {
            messages
                .iter()
                .filter_map(|m| m.get("content"))
                .filter_map(Value::as_str)
                .map(|s| s.chars().count() as u64)
                .sum()
        })
        .unwrap_or(0)
}

/// Sum of `len(content)` over `response.choices[*].message.content`.
pub fn output_tokens(response: &Value) -> u64 {
    response
        .get("choices")
        .and_then(Value::as_array)
        .map(|choices| {
            choices
                .iter()
                .filter_map(|c| c.get("message"))
                .filter_map(|m| m.get("content"))
                .filter_map(Value::as_str)
                .map(|s| s.chars().count() as u64)
                .sum()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn input_tokens_sums_message_content() {
        let payload = json!({
            "messages": [
                {"role": "user", "content": "hello"},
                {"role": "assistant", "content": "world!"},
            ]
        });
        assert_eq!(input_tokens(&payload), 11);
    }

    #[test]
    fn input_tokens_missing_fields_is_zero() {
        assert_eq!(input_tokens(&json!({})), 0);
        assert_eq!(input_tokens(&json!({"messages": []})), 0);
        assert_eq!(input_tokens(&json!({"messages": [{"role": "user"}]})), 0);
    }

    #[test]
    fn output_tokens_sums_choice_content() {
        let response = json!({
            "choices": [
                {"message": {"role": "assistant", "content": "abcde"}},
            ]
        });
        assert_eq!(output_tokens(&response), 5);
    }

    #[test]
    fn output_tokens_missing_fields_is_zero() {
        assert_eq!(output_tokens(&json!({})), 0);
        assert_eq!(output_tokens(&json!({"choices": [{}]})), 0);
    }

    #[test]
    fn token_counting_never_panics_on_wrong_types() {
        let weird = json!({"messages": "not-an-array"});
        assert_eq!(input_tokens(&weird), 0);
        let weird2 = json!({"messages": [{"content": 123}]});
        assert_eq!(input_tokens(&weird2), 0);
    }
}
