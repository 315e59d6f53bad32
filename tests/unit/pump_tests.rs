//! Unit tests for the output pumps, fed from in-memory readers.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use agent_conductor::worker::pump::{run_stderr_pump, run_stdout_pump};
use agent_conductor::worker::queue::{InboundQueue, PendingMessage};
use tokio::io::{AsyncRead, ReadBuf};

/// Yields one line, then fails every read.
struct FailingReader {
    sent: bool,
}

impl AsyncRead for FailingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.sent {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")));
        }
        self.sent = true;
        buf.put_slice(b"{\"a\":1}\n");
        Poll::Ready(Ok(()))
    }
}

async fn collect(queue: &InboundQueue) -> Vec<PendingMessage> {
    let mut rx = queue.consumer().await;
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}

#[tokio::test]
async fn stdout_pump_tags_lines_and_ends_with_sentinel() {
    let queue = InboundQueue::new();
    let input: &[u8] = b"{\"a\":1}\n\n   \n{\"b\":2}  \r\n";

    run_stdout_pump(5, Some(input), queue.sender()).await;

    assert_eq!(
        collect(&queue).await,
        vec![
            PendingMessage::Line {
                generation: 5,
                line: "{\"a\":1}".into()
            },
            PendingMessage::Line {
                generation: 5,
                line: "{\"b\":2}".into()
            },
            PendingMessage::Sentinel { generation: 5 },
        ]
    );
}

#[tokio::test]
async fn stdout_pump_without_handle_pushes_sentinel_immediately() {
    let queue = InboundQueue::new();
    run_stdout_pump::<&[u8]>(2, None, queue.sender()).await;
    assert_eq!(
        collect(&queue).await,
        vec![PendingMessage::Sentinel { generation: 2 }]
    );
}

#[tokio::test]
async fn stdout_pump_forwards_unterminated_final_line() {
    let queue = InboundQueue::new();
    let input: &[u8] = b"first\nlast";
    run_stdout_pump(1, Some(input), queue.sender()).await;

    let items = collect(&queue).await;
    assert_eq!(items.len(), 3);
    assert_eq!(
        items[1],
        PendingMessage::Line {
            generation: 1,
            line: "last".into()
        }
    );
}

#[tokio::test]
async fn stderr_pump_never_touches_the_queue() {
    let queue = InboundQueue::new();
    let input: &[u8] = b"Traceback (most recent call last):\n  boom\n";
    run_stderr_pump(1, Some(input)).await;
    run_stderr_pump::<&[u8]>(1, None).await;
    assert!(collect(&queue).await.is_empty());
}

#[tokio::test]
async fn stdout_read_error_is_queued_before_the_sentinel() {
    let queue = InboundQueue::new();
    run_stdout_pump(3, Some(FailingReader { sent: false }), queue.sender()).await;

    let items = collect(&queue).await;
    assert_eq!(items.len(), 3);
    assert_eq!(
        items[0],
        PendingMessage::Line {
            generation: 3,
            line: "{\"a\":1}".into()
        }
    );
    let PendingMessage::ReadFailed { generation, error } = &items[1] else {
        panic!("expected read failure, got {:?}", items[1]);
    };
    assert_eq!(*generation, 3);
    assert!(error.contains("reset"), "{error}");
    assert_eq!(items[2], PendingMessage::Sentinel { generation: 3 });
}
