//! Confirmation Request Payload
//!
//! The JSON body the credential signs and the transport sends. Keys are
//! emitted in sorted order so the same confirmation always produces the
//! same bytes.

use serde_json::{Map, Value};

use crate::types::Confirmation;

/// Build the request body for a confirmation
///
/// Fields of the user-data object are merged into the top level; reserved
/// keys always win.
pub fn confirmation_request_payload(confirmation: &Confirmation) -> String {
    let mut body = Map::new();

    if let Ok(Value::Object(user_data)) = serde_json::from_str::<Value>(&confirmation.user_data) {
        body.extend(user_data);
    }

    body.insert(
        "blindedPaymentTokens".to_string(),
        Value::Array(
            confirmation
                .blinded_tokens
                .iter()
                .map(|t| Value::String(t.as_str().to_string()))
                .collect(),
        ),
    );
    body.insert(
        "creativeInstanceId".to_string(),
        Value::String(confirmation.creative_instance_id.clone()),
    );
    body.insert("payload".to_string(), Value::Object(Map::new()));
    body.insert(
        "transactionId".to_string(),
        Value::String(confirmation.transaction_id.clone()),
    );
    body.insert(
        "type".to_string(),
        Value::String(confirmation.confirmation_type.to_string()),
    );

    Value::Object(body).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AdType, BlindedToken, ConfirmationType};

    #[test]
    fn test_payload_fields() {
        let confirmation = Confirmation {
            id: "id".to_string(),
            transaction_id: "tx".to_string(),
            creative_instance_id: "creative".to_string(),
            confirmation_type: ConfirmationType::Clicked,
            ad_type: AdType::NewTabPageAd,
            blinded_tokens: vec![BlindedToken::new("b1")],
            user_data: r#"{"platform":"linux","type":"ignored"}"#.to_string(),
            ..Default::default()
        };

        let payload = confirmation_request_payload(&confirmation);
        let json: Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(json["blindedPaymentTokens"][0], "b1");
        assert_eq!(json["creativeInstanceId"], "creative");
        assert_eq!(json["transactionId"], "tx");
        assert_eq!(json["type"], "click");
        assert_eq!(json["platform"], "linux");
        assert!(json["payload"].as_object().unwrap().is_empty());

        // stable across calls
        assert_eq!(payload, confirmation_request_payload(&confirmation));
    }

    #[test]
    fn test_non_object_user_data_is_ignored() {
        let confirmation = Confirmation {
            transaction_id: "tx".to_string(),
            user_data: "not json".to_string(),
            ..Default::default()
        };

        let json: Value = serde_json::from_str(&confirmation_request_payload(&confirmation)).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 5);
    }
}
