//! Chunked streaming of the final answer
//!
//! Single consumer, no cancellation: the producer stops early only when the
//! receiver is dropped.

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

pub const DEFAULT_CHUNK_CHARS: usize = 24;
pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(15);

const CHANNEL_CAPACITY: usize = 16;

/// Split text into chunks of at most `max_chars` characters, breaking after
/// whitespace. A single word longer than the limit becomes its own chunk.
/// Concatenating the chunks yields the input unchanged.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_inclusive(char::is_whitespace) {
        let len = word.chars().count();
        if current_len > 0 && current_len + len > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(word);
        current_len += len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Emit `text` chunk by chunk on a bounded channel
pub fn stream_text(text: String, chunk_chars: usize, delay: Duration) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let chunks = chunk_text(&text, chunk_chars);
        let total = chunks.len();
        for (i, chunk) in chunks.into_iter().enumerate() {
            if tx.send(chunk).await.is_err() {
                debug!(sent = i, total, "Stream receiver dropped");
                return;
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_rejoin_to_input() {
        let text = "NVDA closed at 104.50, up 4.5% over the period.\n\nAnalysts raised targets.";
        let chunks = chunk_text(text, 12);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| c.chars().count() <= 12));
    }

    #[test]
    fn test_long_word_is_own_chunk() {
        let chunks = chunk_text("a supercalifragilistic b", 5);
        assert_eq!(chunks, vec!["a ", "supercalifragilistic ", "b"]);
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(chunk_text("", 10).is_empty());
    }

    #[test]
    fn test_stream_delivers_everything_in_order() {
        tokio_test::block_on(async {
            let text = "Markets were mixed today as yields edged higher.".to_string();
            let mut rx = stream_text(text.clone(), 8, Duration::ZERO);

            let mut received = String::new();
            while let Some(chunk) = rx.recv().await {
                received.push_str(&chunk);
            }
            assert_eq!(received, text);
        });
    }
}
