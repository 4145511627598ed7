// ABOUTME: Classifies freshly received frames by message type and holds them FIFO per type
// ABOUTME: Rust counterpart of ThriftMessageQueue: peek the header, queue the already-wrapped message

use bytes::Bytes;
use std::collections::{HashMap, VecDeque};

use crate::error::RpcResult;
use crate::header::{self, MessageType, QueuedMessage};

/// `MessageQueue` of Section 3: a mapping from message type to an ordered
/// sequence of pending classified messages. FIFO is strict within a type;
/// no ordering is asserted across types (I2).
#[derive(Default)]
pub struct MessageQueue {
    by_type: HashMap<MessageType, VecDeque<QueuedMessage>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the frame's header to classify it, then enqueues it. The
    /// decoder is built once here rather than re-parsed by every consumer
    /// that calls `get`.
    pub fn add(&mut self, frame: Bytes) -> RpcResult<()> {
        let (msg_header, body_offset) = header::peek_header(&frame)?;
        let message_type = msg_header.message_type;
        self.by_type.entry(message_type).or_default().push_back(QueuedMessage {
            header: msg_header,
            frame,
            body_offset,
        });
        Ok(())
    }

    /// Returns the head of the first non-empty per-type queue whose type is
    /// in `types`, in `types`'s order; ties within a type are FIFO.
    pub fn get(&mut self, types: &[MessageType]) -> Option<QueuedMessage> {
        for message_type in types {
            if let Some(queue) = self.by_type.get_mut(message_type) {
                if let Some(msg) = queue.pop_front() {
                    return Some(msg);
                }
            }
        }
        None
    }

    #[cfg(test)]
    fn len_for(&self, message_type: MessageType) -> usize {
        self.by_type.get(&message_type).map_or(0, |q| q.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn frame(method: &str, message_type: MessageType, seq: i32, body: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        header::write_header(&mut buf, method, message_type, seq);
        buf.put_slice(body);
        header::finalize_length(&mut buf);
        buf.freeze()
    }

    #[test]
    fn fifo_within_a_type() {
        let mut queue = MessageQueue::new();
        queue.add(frame("work", MessageType::Call, 1, b"a")).unwrap();
        queue.add(frame("work", MessageType::Call, 2, b"b")).unwrap();

        let first = queue.get(&[MessageType::Call]).unwrap();
        let second = queue.get(&[MessageType::Call]).unwrap();
        assert_eq!(first.header.sequence_id, 1);
        assert_eq!(second.header.sequence_id, 2);
    }

    #[test]
    fn no_cross_type_blocking() {
        let mut queue = MessageQueue::new();
        queue.add(frame("notify", MessageType::Call, 1, b"")).unwrap();

        // A waiter interested only in REPLY/EXCEPTION does not see the
        // queued CALL, and does not consume it either.
        assert!(queue.get(&[MessageType::Reply, MessageType::Exception]).is_none());
        assert_eq!(queue.len_for(MessageType::Call), 1);

        let msg = queue.get(&[MessageType::Call, MessageType::Oneway]).unwrap();
        assert_eq!(msg.header.method_name, "notify");
    }

    #[test]
    fn search_order_follows_argument_order() {
        let mut queue = MessageQueue::new();
        queue.add(frame("x", MessageType::Exception, 1, b"")).unwrap();
        queue.add(frame("x", MessageType::Reply, 2, b"")).unwrap();

        let msg = queue.get(&[MessageType::Reply, MessageType::Exception]).unwrap();
        assert_eq!(msg.header.message_type, MessageType::Reply);
    }
}
