// Inter-process message queue for kacchi
//
// A single FIFO shared by every process. Payloads are copied into the kernel
// heap on send and copied back out (and released) on receive.
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use log::{debug, warn};

use crate::memory::{Heap, MemoryError};
use crate::process::pcb::ProcessId;

/// A queued message; the payload lives in the heap at `payload`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub sender: ProcessId,
    pub receiver: ProcessId,
    pub payload: usize,
    pub size: usize,
}

/// A message handed to its receiver, payload now owned by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub sender: ProcessId,
    pub payload: Vec<u8>,
}

pub struct MessageQueue {
    messages: VecDeque<Message>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self {
            messages: VecDeque::new(),
        }
    }

    /// Copy `data` into the heap and append it to the tail of the queue
    pub fn send(
        &mut self,
        heap: &mut Heap,
        sender: ProcessId,
        receiver: ProcessId,
        data: &[u8],
    ) -> Result<(), MemoryError> {
        let payload = heap.allocate(data.len())?;
        if let Err(e) = heap.write_bytes(payload, data) {
            let _ = heap.free(payload);
            return Err(e);
        }

        self.messages.push_back(Message {
            sender,
            receiver,
            payload,
            size: data.len(),
        });
        debug!("message sent from PID {} to PID {}", sender, receiver);
        Ok(())
    }

    /// Remove the oldest message addressed to `receiver`
    pub fn receive(&mut self, heap: &mut Heap, receiver: ProcessId) -> Option<ReceivedMessage> {
        let index = self.messages.iter().position(|m| m.receiver == receiver)?;
        let message = self.messages.remove(index)?;

        let payload = match heap.read_bytes(message.payload, message.size) {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                warn!("lost payload of message for PID {}: {}", receiver, e);
                Vec::new()
            }
        };
        let _ = heap.free(message.payload);

        Some(ReceivedMessage {
            sender: message.sender,
            payload,
        })
    }

    /// Drop every message sent by or addressed to `pid`, returning how many went
    pub fn purge(&mut self, heap: &mut Heap, pid: ProcessId) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| {
            if m.sender == pid || m.receiver == pid {
                let _ = heap.free(m.payload);
                false
            } else {
                true
            }
        });
        before - self.messages.len()
    }

    pub fn pending_for(&self, receiver: ProcessId) -> usize {
        self.messages.iter().filter(|m| m.receiver == receiver).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}
