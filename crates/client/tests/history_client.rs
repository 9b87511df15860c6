use std::sync::Arc;

use haven_client::{ClientError, HistoryClient};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use url::Url;

/// Serves exactly one HTTP response and reports the request head it saw.
async fn one_shot_server(status: &'static str, content_type: &'static str, body: &'static str) -> (Url, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (head_tx, head_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        let _ = head_tx.send(String::from_utf8_lossy(&request).into_owned());
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
    });
    (Url::parse(&format!("http://{addr}/")).unwrap(), head_rx)
}

#[tokio::test]
async fn room_history_is_fetched_with_bearer_token() {
    let body = r#"{"items":[{"id":1,"content":"hello","author_id":"u-ana","author_name":"Ana","created_at":"2024-05-01T08:00:00Z"}],"has_more":true}"#;
    let (base, head) = one_shot_server("200 OK", "application/json", body).await;
    let client = HistoryClient::new(base, Arc::new(|| Some("tok".to_string())));

    let page = client.room_messages("r1", 50).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].content, "hello");
    assert!(page.has_more);

    let head = head.await.unwrap().to_ascii_lowercase();
    assert!(head.starts_with("get /api/rooms/r1/messages?limit=50 http/1.1"));
    assert!(head.contains("authorization: bearer tok"));
}

#[tokio::test]
async fn problem_details_become_user_message() {
    let body = r#"{"type":"about:blank","title":"Forbidden","status":403,"detail":"Not a member of this room"}"#;
    let (base, _head) = one_shot_server("403 Forbidden", "application/problem+json", body).await;
    let client = HistoryClient::new(base, Arc::new(|| Some("tok".to_string())));

    let err = client.agent_history("s-1", 20).await.unwrap_err();
    assert!(matches!(err, ClientError::Api(_)));
    assert_eq!(err.user_message(), "Not a member of this room");
}
