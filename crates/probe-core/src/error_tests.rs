//! Tests for error types.

use super::*;

fn malformed() -> RpcError {
    let source = serde_json::from_slice::<serde_json::Value>(b"not json").unwrap_err();
    RpcError::MalformedPayload { source }
}

#[test]
fn test_call_scoped_errors() {
    assert!(malformed().is_call_scoped());
    assert!(RpcError::Timeout {
        token: CorrelationToken::from("token-1"),
        waited: Duration::from_millis(250),
    }
    .is_call_scoped());
}

#[test]
fn test_run_scoped_errors() {
    assert!(!RpcError::Transport(TransportError::ConnectionClosed).is_call_scoped());
    assert!(!RpcError::Configuration {
        message: "call_count must be positive".to_string(),
    }
    .is_call_scoped());
    assert!(!RpcError::DuplicateToken {
        token: CorrelationToken::from("token-1"),
    }
    .is_call_scoped());
    assert!(!RpcError::WorkerFailed {
        message: "panicked".to_string(),
    }
    .is_call_scoped());
}

#[test]
fn test_transport_error_converts() {
    let error: RpcError = TransportError::QueueNotFound {
        queue_name: "mstest".to_string(),
    }
    .into();

    assert!(matches!(error, RpcError::Transport(_)));
    assert_eq!(error.to_string(), "Transport error: Queue not found: mstest");
}

#[test]
fn test_timeout_message_names_token() {
    let error = RpcError::Timeout {
        token: CorrelationToken::from("abc"),
        waited: Duration::from_secs(2),
    };
    assert_eq!(error.to_string(), "No reply for request abc within 2s");
}
