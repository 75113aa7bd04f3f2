//! Tests for single-in-flight correlation.

use super::*;
use crate::decoder::TRANSPORT_LEG;
use probe_transport::InMemoryTransport;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const HEALTHY: &[u8] = br#"{"worker_id":"worker-1","healthy":true}"#;

fn request_queue() -> QueueName {
    QueueName::new("mstest".to_string()).unwrap()
}

fn reply(token: &str, body: &'static [u8]) -> Message {
    Message::new(Bytes::from_static(body)).with_correlation_id(token.to_string())
}

/// Worker that answers request `n` with whatever `script(n, request)` returns
///
/// Every request seen is recorded for later inspection.
async fn spawn_worker<F>(
    transport: Arc<InMemoryTransport>,
    mut script: F,
) -> Arc<Mutex<Vec<Delivery>>>
where
    F: FnMut(usize, &Delivery) -> Vec<Message> + Send + 'static,
{
    let handle = transport.declare_queue(&request_queue()).await.unwrap();
    let mut stream = transport.consume(&handle).await.unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);

    tokio::spawn(async move {
        let mut index = 0;
        while let Some(request) = stream.next().await {
            let reply_to = request.reply_to.clone().expect("request must carry reply_to");
            for message in script(index, &request) {
                let _ = transport.publish(&reply_to, message).await;
            }
            record.lock().unwrap().push(request);
            index += 1;
        }
    });

    seen
}

/// Answers every request with a matching healthy reply
fn echo_healthy(_index: usize, request: &Delivery) -> Vec<Message> {
    vec![reply(request.correlation_id.as_deref().unwrap(), HEALTHY)]
}

/// Produces "req-1", "req-2", ...
struct SequentialTokens(AtomicUsize);

impl TokenGenerator for SequentialTokens {
    fn new_token(&self) -> CorrelationToken {
        let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
        CorrelationToken::from(format!("req-{}", n))
    }
}

mod successful_calls {
    use super::*;

    #[tokio::test]
    async fn test_call_returns_decoded_status_with_transport_leg() {
        let transport = Arc::new(InMemoryTransport::new());
        spawn_worker(transport.clone(), echo_healthy).await;
        let mut correlator = Correlator::new(transport, request_queue(), ReplyMode::Shared);

        let outcome = correlator.call(Bytes::new()).await.unwrap();

        assert!(outcome.status.healthy);
        assert_eq!(outcome.status.worker_id, "worker-1");
        assert_eq!(outcome.discarded, 0);
        assert_eq!(outcome.status.response_ms.len(), 1);
        let leg = outcome.status.leg_ms(TRANSPORT_LEG).unwrap();
        assert!(leg >= 0.0);
        assert_eq!(outcome.status.round_trip_ms, Some(leg));
    }

    #[tokio::test]
    async fn test_request_carries_token_reply_to_and_body() {
        let transport = Arc::new(InMemoryTransport::new());
        let seen = spawn_worker(transport.clone(), echo_healthy).await;
        let mut correlator = Correlator::new(transport, request_queue(), ReplyMode::Shared)
            .with_token_generator(SequentialTokens(AtomicUsize::new(0)));
        let reply_to = correlator.replies.current_destination().await.unwrap();

        let outcome = correlator
            .call(Bytes::from_static(b"status?"))
            .await
            .unwrap();

        assert_eq!(outcome.token.as_str(), "req-1");
        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].correlation_id.as_deref(), Some("req-1"));
        assert_eq!(requests[0].reply_to, Some(reply_to));
        assert_eq!(requests[0].body, Bytes::from_static(b"status?"));
        assert_eq!(requests[0].content_type.as_deref(), Some(REQUEST_CONTENT_TYPE));
    }

    #[tokio::test]
    async fn test_each_call_uses_a_fresh_token() {
        let transport = Arc::new(InMemoryTransport::new());
        spawn_worker(transport.clone(), echo_healthy).await;
        let mut correlator = Correlator::new(transport, request_queue(), ReplyMode::Shared);

        let first = correlator.call(Bytes::new()).await.unwrap();
        let second = correlator.call(Bytes::new()).await.unwrap();

        assert_ne!(first.token, second.token);
    }
}

mod correlation {
    use super::*;

    #[tokio::test]
    async fn test_decoys_before_match_are_discarded() {
        let transport = Arc::new(InMemoryTransport::new());
        spawn_worker(transport.clone(), |_, request| {
            let token = request.correlation_id.clone().unwrap();
            vec![
                reply("other-1", br#"{"worker_id":"decoy","healthy":false}"#),
                reply("other-2", br#"{"worker_id":"decoy","healthy":false}"#),
                reply(&token, HEALTHY),
            ]
        })
        .await;
        let mut correlator = Correlator::new(transport, request_queue(), ReplyMode::Shared);

        let outcome = correlator.call(Bytes::new()).await.unwrap();

        assert_eq!(outcome.discarded, 2);
        assert_eq!(outcome.status.worker_id, "worker-1");
        assert!(outcome.status.healthy);
    }

    #[tokio::test]
    async fn test_decoys_without_token_or_with_garbage_are_discarded() {
        let transport = Arc::new(InMemoryTransport::new());
        spawn_worker(transport.clone(), |_, request| {
            let token = request.correlation_id.clone().unwrap();
            vec![
                Message::new(Bytes::from_static(b"not even json")),
                reply(&token.to_uppercase(), b"garbage"),
                reply(&token, HEALTHY),
            ]
        })
        .await;
        let mut correlator = Correlator::new(transport, request_queue(), ReplyMode::Shared)
            .with_token_generator(SequentialTokens(AtomicUsize::new(0)));

        let outcome = correlator.call(Bytes::new()).await.unwrap();

        assert_eq!(outcome.token.as_str(), "req-1");
        assert_eq!(outcome.discarded, 2);
        assert!(outcome.status.healthy);
    }

    #[tokio::test]
    async fn test_replies_after_match_are_not_carried_into_next_call() {
        let transport = Arc::new(InMemoryTransport::new());
        spawn_worker(transport.clone(), |_, request| {
            let token = request.correlation_id.clone().unwrap();
            vec![reply(&token, HEALTHY), reply("stray", HEALTHY)]
        })
        .await;
        let mut correlator = Correlator::new(transport, request_queue(), ReplyMode::Shared);

        let first = correlator.call(Bytes::new()).await.unwrap();
        let second = correlator.call(Bytes::new()).await.unwrap();

        assert_eq!(first.discarded, 0);
        // The stray reply from the first round is skipped by the second scan
        assert_eq!(second.discarded, 1);
    }
}

mod reply_modes {
    use super::*;

    #[tokio::test]
    async fn test_shared_mode_reuses_reply_queue() {
        let transport = Arc::new(InMemoryTransport::new());
        let seen = spawn_worker(transport.clone(), echo_healthy).await;
        let mut correlator = Correlator::new(transport, request_queue(), ReplyMode::Shared);

        for _ in 0..3 {
            correlator.call(Bytes::new()).await.unwrap();
        }

        let requests = seen.lock().unwrap();
        assert!(requests.iter().all(|r| r.reply_to == requests[0].reply_to));
        assert_eq!(correlator.reply_channel().declared_count(), 1);
    }

    #[tokio::test]
    async fn test_per_request_mode_uses_new_reply_queue_each_call() {
        let transport = Arc::new(InMemoryTransport::new());
        let seen = spawn_worker(transport.clone(), echo_healthy).await;
        let mut correlator =
            Correlator::new(transport.clone(), request_queue(), ReplyMode::PerRequest);

        for _ in 0..3 {
            correlator.call(Bytes::new()).await.unwrap();
        }

        let requests = seen.lock().unwrap();
        let reply_queues: Vec<_> = requests
            .iter()
            .map(|r| r.reply_to.clone().unwrap())
            .collect();
        assert_ne!(reply_queues[0], reply_queues[1]);
        assert_ne!(reply_queues[1], reply_queues[2]);
        // Abandoned queues are gone; only the request queue and the next reply queue remain
        assert!(reply_queues.iter().all(|q| !transport.queue_exists(q)));
        assert_eq!(transport.queue_count(), 2);
    }
}

mod failures {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_missing_reply_times_out() {
        let transport = Arc::new(InMemoryTransport::new());
        spawn_worker(transport.clone(), |_, _| Vec::new()).await;
        let mut correlator = Correlator::new(transport, request_queue(), ReplyMode::Shared)
            .with_reply_timeout(Some(Duration::from_millis(250)));

        match correlator.call(Bytes::new()).await {
            Err(RpcError::Timeout { waited, .. }) => {
                assert_eq!(waited, Duration::from_millis(250))
            }
            other => panic!("Expected Timeout, got: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_is_discarded_by_next_call() {
        let transport = Arc::new(InMemoryTransport::new());
        let mut first_token = None;
        spawn_worker(transport.clone(), move |index, request| {
            let token = request.correlation_id.clone().unwrap();
            if index == 0 {
                first_token = Some(token);
                return Vec::new();
            }
            let late = first_token.take().unwrap();
            vec![reply(&late, HEALTHY), reply(&token, HEALTHY)]
        })
        .await;
        let mut correlator = Correlator::new(transport, request_queue(), ReplyMode::Shared)
            .with_reply_timeout(Some(Duration::from_millis(100)));

        assert!(matches!(
            correlator.call(Bytes::new()).await,
            Err(RpcError::Timeout { .. })
        ));
        let outcome = correlator.call(Bytes::new()).await.unwrap();

        assert_eq!(outcome.discarded, 1);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_reported() {
        let transport = Arc::new(InMemoryTransport::new());
        spawn_worker(transport.clone(), |_, request| {
            vec![reply(request.correlation_id.as_deref().unwrap(), br#"{"worker_id":"w"}"#)]
        })
        .await;
        let mut correlator = Correlator::new(transport, request_queue(), ReplyMode::Shared);

        let result = correlator.call(Bytes::new()).await;

        assert!(matches!(result, Err(RpcError::MalformedPayload { .. })));
    }

    #[tokio::test]
    async fn test_publish_to_missing_request_queue_is_transport_error() {
        let transport = Arc::new(InMemoryTransport::new());
        let mut correlator =
            Correlator::new(transport, request_queue(), ReplyMode::PerRequest);

        let result = correlator.call(Bytes::new()).await;

        match result {
            Err(RpcError::Transport(TransportError::QueueNotFound { queue_name })) => {
                assert_eq!(queue_name, "mstest")
            }
            other => panic!("Expected QueueNotFound, got: {:?}", other),
        }
        // No rotation after a transport failure
        assert_eq!(correlator.reply_channel().declared_count(), 1);
    }

    #[tokio::test]
    async fn test_channel_loss_while_waiting_is_transport_error() {
        let transport = Arc::new(InMemoryTransport::new());
        let closer = transport.clone();
        spawn_worker(transport.clone(), move |_, _| {
            closer.close();
            Vec::new()
        })
        .await;
        let mut correlator = Correlator::new(transport, request_queue(), ReplyMode::Shared);

        let result = correlator.call(Bytes::new()).await;

        assert!(matches!(
            result,
            Err(RpcError::Transport(TransportError::ChannelClosed { .. }))
        ));
    }
}
